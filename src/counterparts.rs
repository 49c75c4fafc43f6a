//! # Optical counterparts
//!
//! Optical catalog sources (DESI Legacy Survey, SDSS, Pan-STARRS, Gaia) cross-matched
//! against X-ray identities. They live in their own [`SkyIndex`], separate from the X-ray
//! detections, and feed the pre-classification flags.
use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::{
    constants::{arcsec_to_deg, deg_to_arcsec, ArcSec, Degree, FastMap},
    metasource_errors::MetaSourceError,
    sky_geometry::validate_position,
    spatial_index::SkyIndex,
};

/// Optical catalogs a counterpart can come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OpticalSurvey {
    /// DESI Legacy Imaging Surveys
    LS,
    SDSS,
    /// Pan-STARRS
    PS,
    GAIA,
}

impl fmt::Display for OpticalSurvey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpticalSurvey::LS => "LS",
            OpticalSurvey::SDSS => "SDSS",
            OpticalSurvey::PS => "PS",
            OpticalSurvey::GAIA => "GAIA",
        };
        f.write_str(name)
    }
}

/// Natural key of an optical source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpticalKey {
    pub survey: OpticalSurvey,
    pub object_id: u64,
}

impl OpticalKey {
    pub fn new(survey: OpticalSurvey, object_id: u64) -> Self {
        OpticalKey { survey, object_id }
    }
}

impl fmt::Display for OpticalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.survey, self.object_id)
    }
}

/// One optical catalog source.
///
/// `star` is the catalog's own point-source classification, `None` when the catalog does not
/// provide one. `w1_mag` / `w2_mag` are the WISE W1 and W2 magnitudes used by the AGN color
/// criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpticalSource {
    pub key: OpticalKey,
    pub ra: Degree,
    pub dec: Degree,
    pub star: Option<bool>,
    pub w1_mag: Option<f64>,
    pub w2_mag: Option<f64>,
}

impl OpticalSource {
    pub fn new(survey: OpticalSurvey, object_id: u64, ra: Degree, dec: Degree) -> Self {
        OpticalSource {
            key: OpticalKey::new(survey, object_id),
            ra,
            dec,
            star: None,
            w1_mag: None,
            w2_mag: None,
        }
    }

    pub fn with_star(mut self, star: bool) -> Self {
        self.star = Some(star);
        self
    }

    pub fn with_wise(mut self, w1_mag: f64, w2_mag: f64) -> Self {
        self.w1_mag = Some(w1_mag);
        self.w2_mag = Some(w2_mag);
        self
    }
}

/// An optical source found around an X-ray position.
#[derive(Debug, Clone, PartialEq)]
pub struct Counterpart<'a> {
    pub source: &'a OpticalSource,
    pub separation_arcsec: ArcSec,
}

/// Optical sources keyed by [`OpticalKey`], with a spatial index for cross-matching.
#[derive(Debug, Clone)]
pub struct OpticalCatalog {
    sources: FastMap<OpticalKey, OpticalSource>,
    index: SkyIndex<OpticalKey>,
}

impl OpticalCatalog {
    pub fn new(cell_size_deg: Degree) -> Result<Self, MetaSourceError> {
        Ok(OpticalCatalog {
            sources: FastMap::default(),
            index: SkyIndex::new(cell_size_deg)?,
        })
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, key: &OpticalKey) -> Option<&OpticalSource> {
        self.sources.get(key)
    }

    /// Insert or replace an optical source.
    ///
    /// Return
    /// ----------
    /// * `Ok(true)` for a new key, `Ok(false)` when an existing key was updated.
    /// * [`MetaSourceError::InvalidPosition`] for an out-of-range position; nothing is stored.
    pub fn insert(&mut self, source: OpticalSource) -> Result<bool, MetaSourceError> {
        validate_position(source.ra, source.dec)?;
        self.index.insert(source.key, source.ra, source.dec)?;
        Ok(self.sources.insert(source.key, source).is_none())
    }

    pub fn remove(&mut self, key: &OpticalKey) -> Option<OpticalSource> {
        self.index.remove(key);
        self.sources.remove(key)
    }

    /// Drop every optical source.
    pub fn clear(&mut self) {
        self.sources.clear();
        self.index.clear();
    }

    /// Optical sources strictly closer than `radius_arcsec` to `(ra, dec)`.
    ///
    /// A source lying exactly on the radius is not a counterpart.
    ///
    /// Return
    /// ----------
    /// * Counterparts sorted by increasing separation, ties broken by key.
    pub fn cross_match(&self, ra: Degree, dec: Degree, radius_arcsec: ArcSec) -> Vec<Counterpart<'_>> {
        let radius = arcsec_to_deg(radius_arcsec);
        self.index
            .query_radius(ra, dec, radius)
            .into_iter()
            .filter(|&(_, sep)| sep < radius)
            .filter_map(|(key, sep)| {
                self.sources.get(&key).map(|source| Counterpart {
                    source,
                    separation_arcsec: deg_to_arcsec(sep),
                })
            })
            .collect()
    }

    /// Closest counterpart per optical survey within `radius_arcsec`.
    ///
    /// Surveys without any source in the radius are absent from the map.
    pub fn nearest_by_survey(
        &self,
        ra: Degree,
        dec: Degree,
        radius_arcsec: ArcSec,
    ) -> BTreeMap<OpticalSurvey, (OpticalKey, ArcSec)> {
        let mut nearest = BTreeMap::new();
        // sorted by separation: the first hit per survey is the closest
        for counterpart in self.cross_match(ra, dec, radius_arcsec) {
            nearest
                .entry(counterpart.source.key.survey)
                .or_insert((counterpart.source.key, counterpart.separation_arcsec));
        }
        nearest
    }
}

#[cfg(test)]
mod counterparts_test {
    use super::*;

    fn catalog() -> OpticalCatalog {
        let mut cat = OpticalCatalog::new(0.1).unwrap();
        let arcsec = arcsec_to_deg(1.0);
        cat.insert(OpticalSource::new(OpticalSurvey::LS, 1, 10.0 + 2.0 * arcsec, 20.0).with_star(false))
            .unwrap();
        cat.insert(OpticalSource::new(OpticalSurvey::GAIA, 7, 10.0, 20.0 + 1.0 * arcsec).with_star(true))
            .unwrap();
        cat.insert(OpticalSource::new(OpticalSurvey::GAIA, 8, 10.0, 20.0 - 3.0 * arcsec))
            .unwrap();
        cat.insert(OpticalSource::new(OpticalSurvey::SDSS, 2, 10.0, 20.0 + 60.0 * arcsec))
            .unwrap();
        cat
    }

    #[test]
    fn test_cross_match_sorted() {
        let cat = catalog();
        let hits = cat.cross_match(10.0, 20.0, 5.0);
        let keys: Vec<OpticalKey> = hits.iter().map(|c| c.source.key).collect();
        assert_eq!(
            keys,
            vec![
                OpticalKey::new(OpticalSurvey::GAIA, 7),
                OpticalKey::new(OpticalSurvey::LS, 1),
                OpticalKey::new(OpticalSurvey::GAIA, 8),
            ]
        );
        assert!((hits[0].separation_arcsec - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cross_match_excludes_radius_boundary() {
        let cat = catalog();
        let dec = 20.0 + arcsec_to_deg(1.0);
        assert!(cat.cross_match(10.0, dec, 0.0).is_empty());

        let hits = cat.cross_match(10.0, dec, 0.5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source.key, OpticalKey::new(OpticalSurvey::GAIA, 7));
        assert_eq!(hits[0].separation_arcsec, 0.0);
    }

    #[test]
    fn test_nearest_by_survey() {
        let cat = catalog();
        let nearest = cat.nearest_by_survey(10.0, 20.0, 5.0);
        assert_eq!(nearest.len(), 2);
        assert_eq!(nearest[&OpticalSurvey::GAIA].0.object_id, 7);
        assert_eq!(nearest[&OpticalSurvey::LS].0.object_id, 1);
        assert!(!nearest.contains_key(&OpticalSurvey::SDSS));
    }

    #[test]
    fn test_reinsert_and_clear() {
        let mut cat = catalog();
        assert!(!cat
            .insert(OpticalSource::new(OpticalSurvey::GAIA, 7, 10.0, 20.0).with_star(false))
            .unwrap());
        assert_eq!(cat.len(), 4);
        assert_eq!(cat.get(&OpticalKey::new(OpticalSurvey::GAIA, 7)).unwrap().star, Some(false));

        assert!(cat.insert(OpticalSource::new(OpticalSurvey::PS, 1, 10.0, 95.0)).is_err());
        assert_eq!(cat.len(), 4);

        cat.clear();
        assert!(cat.is_empty());
        assert!(cat.cross_match(10.0, 20.0, 20.0).is_empty());
    }
}
