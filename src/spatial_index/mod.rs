//! # Spatial index over sky positions
//!
//! [`SkyIndex`] answers **cone searches** ("every record within R of this point") over a set
//! of positioned records that grows incrementally. It is used twice by the engine: once over
//! X-ray detections (keyed by [`DetectionId`](crate::sources::DetectionId)) and once over optical
//! counterparts (keyed by [`OpticalKey`](crate::counterparts::OpticalKey)).
//!
//! Layout
//! -----------------
//! The sky is cut into declination bands and right-ascension cells (see [`cell`]). Each cell
//! keeps the entries whose position falls inside it. A query visits only the cells overlapping
//! the search cap, so the work per query is bounded by the local density around the query
//! point, not by the catalog size. Insertions touch a single cell.
//!
//! Exactness
//! -----------------
//! Candidates gathered from the visited cells are filtered in two passes:
//! 1. a chord-length test on cached unit vectors (cheap, slightly padded),
//! 2. the exact great-circle test with [`angular_separation`].
//!
//! The returned set therefore has **no false negatives and no false positives**.
//!
//! Concurrency
//! -----------------
//! `SkyIndex` has no interior mutability: queries take `&self`, insertions and removals
//! take `&mut self`. Wrapped in a reader–writer lock (as
//! [`SourceCatalog`](crate::catalog::SourceCatalog) does), queries run concurrently and
//! writes are exclusive.
use std::hash::Hash;

use nalgebra::Vector3;
use ordered_float::OrderedFloat;
use smallvec::SmallVec;

use crate::{
    constants::{Degree, FastMap, ANGLE_PAD_DEG, ARCSEC_PER_DEG},
    metasource_errors::MetaSourceError,
    sky_geometry::{angular_separation, chord_sq_for_angle, unit_vector, validate_position},
};

pub mod cell;

use cell::{CellId, SkyGridLayout};

/// Smallest accepted cell edge (one arcsecond); the band table grows as `180 / cell_size_deg`.
pub const MIN_CELL_SIZE_DEG: Degree = 1.0 / ARCSEC_PER_DEG;

#[derive(Debug, Clone)]
struct IndexEntry<K> {
    key: K,
    ra: Degree,
    dec: Degree,
    unit: Vector3<f64>,
}

/// Incremental cell index of sky positions keyed by `K`.
#[derive(Debug, Clone)]
pub struct SkyIndex<K> {
    layout: SkyGridLayout,
    cells: FastMap<CellId, SmallVec<[IndexEntry<K>; 4]>>,
    locations: FastMap<K, CellId>,
}

impl<K> SkyIndex<K>
where
    K: Copy + Eq + Hash + Ord,
{
    /// Create an empty index with a nominal cell edge of `cell_size_deg` degrees.
    ///
    /// Arguments
    /// -----------------
    /// * `cell_size_deg`: cell edge in degrees, in `[MIN_CELL_SIZE_DEG, 90]`. A cell a few
    ///   times larger than the typical search radius keeps most queries inside a handful of cells.
    ///
    /// Return
    /// ----------
    /// * The empty index, or [`MetaSourceError::InvalidMatchingParameter`] for an unusable cell size.
    pub fn new(cell_size_deg: Degree) -> Result<Self, MetaSourceError> {
        if !(cell_size_deg >= MIN_CELL_SIZE_DEG && cell_size_deg <= 90.0) {
            return Err(MetaSourceError::InvalidMatchingParameter(format!(
                "cell_size_deg must be in [1 arcsec, 90 deg], got {cell_size_deg}"
            )));
        }
        Ok(SkyIndex {
            layout: SkyGridLayout::new(cell_size_deg),
            cells: FastMap::default(),
            locations: FastMap::default(),
        })
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.locations.contains_key(key)
    }

    pub fn cell_size_deg(&self) -> Degree {
        self.layout.cell_deg()
    }

    /// Position stored for `key`, if indexed.
    pub fn position(&self, key: &K) -> Option<(Degree, Degree)> {
        let cell = self.locations.get(key)?;
        self.cells
            .get(cell)?
            .iter()
            .find(|e| e.key == *key)
            .map(|e| (e.ra, e.dec))
    }

    /// Insert `key` at `(ra, dec)`.
    ///
    /// Re-inserting an existing key replaces its position.
    ///
    /// Return
    /// ----------
    /// * `Ok(true)` if the key was not indexed before, `Ok(false)` if it was replaced.
    /// * [`MetaSourceError::InvalidPosition`] if the position is out of range; the index is unchanged.
    pub fn insert(&mut self, key: K, ra: Degree, dec: Degree) -> Result<bool, MetaSourceError> {
        validate_position(ra, dec)?;
        let was_present = self.remove(&key);

        let cell = self.layout.cell_of(ra, dec);
        self.cells.entry(cell).or_default().push(IndexEntry {
            key,
            ra,
            dec,
            unit: unit_vector(ra, dec),
        });
        self.locations.insert(key, cell);
        Ok(!was_present)
    }

    /// Remove `key`; returns whether it was indexed.
    pub fn remove(&mut self, key: &K) -> bool {
        let Some(cell) = self.locations.remove(key) else {
            return false;
        };
        if let Some(entries) = self.cells.get_mut(&cell) {
            entries.retain(|e| e.key != *key);
            if entries.is_empty() {
                self.cells.remove(&cell);
            }
        }
        true
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.cells.clear();
        self.locations.clear();
    }

    /// Every indexed key within `radius` degrees of `(ra, dec)`.
    ///
    /// Arguments
    /// -----------------
    /// * `ra`, `dec`: query center in degrees.
    /// * `radius`: search radius in degrees (inclusive). A negative or NaN radius matches nothing.
    ///
    /// Return
    /// ----------
    /// * `(key, separation_deg)` pairs sorted by increasing separation, ties broken by key.
    ///
    /// See also
    /// ------------
    /// * [`SkyIndex::nearest`] – closest entry only.
    pub fn query_radius(&self, ra: Degree, dec: Degree, radius: Degree) -> Vec<(K, Degree)> {
        if !(radius >= 0.0) || self.is_empty() {
            return Vec::new();
        }
        let center = unit_vector(ra, dec);
        let chord_limit = chord_sq_for_angle(radius + ANGLE_PAD_DEG);

        let mut found: Vec<(K, Degree)> = self
            .layout
            .cells_for_cap(ra, dec, radius)
            .iter()
            .filter_map(|cell| self.cells.get(cell))
            .flat_map(|entries| entries.iter())
            .filter(|e| (e.unit - center).norm_squared() <= chord_limit)
            .filter_map(|e| {
                let sep = angular_separation(ra, dec, e.ra, e.dec);
                (sep <= radius).then_some((e.key, sep))
            })
            .collect();

        found.sort_by_key(|(key, sep)| (OrderedFloat(*sep), *key));
        found
    }

    /// Closest indexed key within `radius` degrees, ties broken by key.
    pub fn nearest(&self, ra: Degree, dec: Degree, radius: Degree) -> Option<(K, Degree)> {
        self.query_radius(ra, dec, radius).into_iter().next()
    }

    /// Number of entries stored in the cells a query of this radius would visit.
    ///
    /// Used to check that the candidate set stays local as the catalog grows.
    pub fn candidate_count(&self, ra: Degree, dec: Degree, radius: Degree) -> usize {
        self.layout
            .cells_for_cap(ra, dec, radius)
            .iter()
            .filter_map(|cell| self.cells.get(cell))
            .map(|entries| entries.len())
            .sum()
    }

    /// Iterate over every indexed key (unordered).
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.locations.keys()
    }
}
