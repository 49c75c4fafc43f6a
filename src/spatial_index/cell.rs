//! Declination-band / right-ascension-cell layout of the sky grid.
//!
//! The sphere is cut into `n_bands` equal-height declination bands. Each band is split into
//! a number of equal right-ascension cells chosen so that a cell is never narrower than the
//! nominal cell size at the band edge farthest from the equator. Polar bands collapse to a
//! single cell.
use serde::{Deserialize, Serialize};

use crate::{
    constants::{Degree, ANGLE_PAD_DEG, FULL_CIRCLE_DEG, MAX_ABS_DEC_DEG},
    sky_geometry::{normalize_ra, ra_half_width},
};

/// Address of one grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId {
    pub band: u32,
    pub ra_cell: u32,
}

#[derive(Debug, Clone)]
pub struct SkyGridLayout {
    cell_deg: Degree,
    band_height: Degree,
    ra_cells: Vec<u32>,
}

impl SkyGridLayout {
    /// Build the layout for a nominal cell edge of `cell_deg` degrees.
    ///
    /// The caller guarantees `0 < cell_deg ≤ 90`.
    pub fn new(cell_deg: Degree) -> Self {
        let n_bands = ((2.0 * MAX_ABS_DEC_DEG) / cell_deg).ceil().max(1.0) as u32;
        let band_height = 2.0 * MAX_ABS_DEC_DEG / n_bands as f64;

        let ra_cells = (0..n_bands)
            .map(|band| {
                let lo = -MAX_ABS_DEC_DEG + band as f64 * band_height;
                let hi = lo + band_height;
                let far = lo.abs().max(hi.abs()).min(MAX_ABS_DEC_DEG);
                let circumference = FULL_CIRCLE_DEG * far.to_radians().cos();
                ((circumference / cell_deg).floor() as u32).max(1)
            })
            .collect();

        SkyGridLayout {
            cell_deg,
            band_height,
            ra_cells,
        }
    }

    pub fn cell_deg(&self) -> Degree {
        self.cell_deg
    }

    pub fn n_bands(&self) -> u32 {
        self.ra_cells.len() as u32
    }

    /// Number of right-ascension cells in `band`.
    pub fn cells_in_band(&self, band: u32) -> u32 {
        self.ra_cells[band as usize]
    }

    fn band_of(&self, dec: Degree) -> u32 {
        let raw = ((dec + MAX_ABS_DEC_DEG) / self.band_height).floor();
        (raw.max(0.0) as u32).min(self.n_bands() - 1)
    }

    fn ra_cell_of(&self, band: u32, ra: Degree) -> u32 {
        let n = self.cells_in_band(band);
        let width = FULL_CIRCLE_DEG / n as f64;
        ((normalize_ra(ra) / width).floor() as u32).min(n - 1)
    }

    /// Cell containing the position `(ra, dec)`.
    pub fn cell_of(&self, ra: Degree, dec: Degree) -> CellId {
        let band = self.band_of(dec);
        CellId {
            band,
            ra_cell: self.ra_cell_of(band, ra),
        }
    }

    /// Every cell that may hold a point within `radius` degrees of `(ra, dec)`.
    ///
    /// The set is a superset of the exact cap footprint: whole bands are visited when the cap
    /// reaches a pole, and the right-ascension window wraps across the 0/360 seam.
    pub fn cells_for_cap(&self, ra: Degree, dec: Degree, radius: Degree) -> Vec<CellId> {
        let dec_lo = (dec - radius - ANGLE_PAD_DEG).max(-MAX_ABS_DEC_DEG);
        let dec_hi = (dec + radius + ANGLE_PAD_DEG).min(MAX_ABS_DEC_DEG);
        let half = ra_half_width(dec, radius);
        let ra = normalize_ra(ra);

        let mut cells = Vec::new();
        for band in self.band_of(dec_lo)..=self.band_of(dec_hi) {
            let n = self.cells_in_band(band);
            let window = half.and_then(|h| {
                let width = FULL_CIRCLE_DEG / n as f64;
                let first = ((ra - h) / width).floor() as i64;
                let last = ((ra + h) / width).floor() as i64;
                // a window covering every cell is the same as no window
                (last - first + 1 < n as i64).then_some((first, last))
            });

            match window {
                Some((first, last)) => cells.extend((first..=last).map(|k| CellId {
                    band,
                    ra_cell: k.rem_euclid(n as i64) as u32,
                })),
                None => cells.extend((0..n).map(|ra_cell| CellId { band, ra_cell })),
            }
        }
        cells
    }
}
