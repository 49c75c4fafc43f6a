//! # Duplicate matching
//!
//! Configuration of the positional matching ([`MatchingParams`]) and the
//! [`duplicate_matcher`] deciding, for one new detection, whether it starts a new identity,
//! joins an existing one, or reveals that several identities are duplicates.
use std::fmt;

use crate::{
    constants::ArcSec, metasource_errors::MetaSourceError, spatial_index::MIN_CELL_SIZE_DEG,
};

pub mod duplicate_matcher;

/// Configuration of the positional duplicate matching.
///
/// The matching radius of a detection is
///
/// ```text
/// R = clamp(radius_factor × pos_error, min_radius_arcsec, max_radius_arcsec)
/// ```
///
/// and `default_radius_arcsec` when the detection carries no usable positional error.
///
/// Fields
/// -----------------
/// * `radius_factor` – multiplier applied to the positional error.
/// * `min_radius_arcsec`, `max_radius_arcsec` – clamp bounds of the radius.
/// * `default_radius_arcsec` – radius used when the positional error is missing.
/// * `exclude_same_survey` – ignore candidates observed in the same survey as the new detection.
/// * `cell_size_deg` – edge of the spatial grid cells.
/// * `verify_after_ingest` – run the full invariant verifier after every ingestion call.
///
/// Defaults
/// -----------------
/// * `radius_factor`: 1.1
/// * `min_radius_arcsec`: 4.0
/// * `max_radius_arcsec`: 20.0
/// * `default_radius_arcsec`: 10.0
/// * `exclude_same_survey`: false
/// * `cell_size_deg`: 0.1
/// * `verify_after_ingest`: false
///
/// See also
/// -----------------
/// * [`MatchingParams::builder`] – validated construction.
/// * [`duplicate_matcher::find_match`] – consumer of these parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingParams {
    pub radius_factor: f64,
    pub min_radius_arcsec: ArcSec,
    pub max_radius_arcsec: ArcSec,
    pub default_radius_arcsec: ArcSec,
    pub exclude_same_survey: bool,
    pub cell_size_deg: f64,
    pub verify_after_ingest: bool,
}

impl MatchingParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> MatchingParamsBuilder {
        MatchingParamsBuilder::new()
    }

    /// Check the parameters.
    ///
    /// Checks
    /// -----------------
    /// * `radius_factor > 0`
    /// * `0 < min_radius_arcsec ≤ max_radius_arcsec`
    /// * `min_radius_arcsec ≤ default_radius_arcsec ≤ max_radius_arcsec`
    /// * `1″ ≤ cell_size_deg ≤ 90°`
    ///
    /// Return
    /// ----------
    /// * `Err(MetaSourceError::InvalidMatchingParameter)` naming the first failed rule.
    pub fn validate(&self) -> Result<(), MetaSourceError> {
        let gt0 = |x: f64| x.is_finite() && x > 0.0;

        if !gt0(self.radius_factor) {
            return Err(MetaSourceError::InvalidMatchingParameter(
                "radius_factor must be > 0".into(),
            ));
        }
        if !(gt0(self.min_radius_arcsec)
            && gt0(self.max_radius_arcsec)
            && self.min_radius_arcsec <= self.max_radius_arcsec)
        {
            return Err(MetaSourceError::InvalidMatchingParameter(
                "require 0 < min_radius_arcsec <= max_radius_arcsec".into(),
            ));
        }
        if !(self.default_radius_arcsec >= self.min_radius_arcsec
            && self.default_radius_arcsec <= self.max_radius_arcsec)
        {
            return Err(MetaSourceError::InvalidMatchingParameter(
                "default_radius_arcsec must lie in [min_radius_arcsec, max_radius_arcsec]".into(),
            ));
        }
        if !(self.cell_size_deg >= MIN_CELL_SIZE_DEG && self.cell_size_deg <= 90.0) {
            return Err(MetaSourceError::InvalidMatchingParameter(
                "cell_size_deg must be in [1 arcsec, 90 deg]".into(),
            ));
        }
        Ok(())
    }

    /// Matching radius in arcseconds for a detection with the given positional error.
    ///
    /// A missing, negative or non-finite error falls back to `default_radius_arcsec`.
    pub fn matching_radius(&self, pos_error: Option<ArcSec>) -> ArcSec {
        match pos_error {
            Some(err) if err.is_finite() && err >= 0.0 => (self.radius_factor * err)
                .clamp(self.min_radius_arcsec, self.max_radius_arcsec),
            _ => self.default_radius_arcsec,
        }
    }
}

impl Default for MatchingParams {
    fn default() -> Self {
        MatchingParams {
            radius_factor: 1.1,
            min_radius_arcsec: 4.0,
            max_radius_arcsec: 20.0,
            default_radius_arcsec: 10.0,
            exclude_same_survey: false,
            cell_size_deg: 0.1,
            verify_after_ingest: false,
        }
    }
}

/// Builder for [`MatchingParams`], with validation.
#[derive(Debug, Clone, Default)]
pub struct MatchingParamsBuilder {
    params: MatchingParams,
}

impl MatchingParamsBuilder {
    pub fn new() -> Self {
        Self {
            params: MatchingParams::default(),
        }
    }

    pub fn radius_factor(mut self, v: f64) -> Self {
        self.params.radius_factor = v;
        self
    }

    pub fn min_radius_arcsec(mut self, v: ArcSec) -> Self {
        self.params.min_radius_arcsec = v;
        self
    }

    pub fn max_radius_arcsec(mut self, v: ArcSec) -> Self {
        self.params.max_radius_arcsec = v;
        self
    }

    pub fn default_radius_arcsec(mut self, v: ArcSec) -> Self {
        self.params.default_radius_arcsec = v;
        self
    }

    pub fn exclude_same_survey(mut self, v: bool) -> Self {
        self.params.exclude_same_survey = v;
        self
    }

    pub fn cell_size_deg(mut self, v: f64) -> Self {
        self.params.cell_size_deg = v;
        self
    }

    pub fn verify_after_ingest(mut self, v: bool) -> Self {
        self.params.verify_after_ingest = v;
        self
    }

    /// Validate and return the parameters.
    ///
    /// See [`MatchingParams::validate`] for the checked rules.
    pub fn build(self) -> Result<MatchingParams, MetaSourceError> {
        self.params.validate()?;
        Ok(self.params)
    }
}

impl fmt::Display for MatchingParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            const PARAM_COL: usize = 40;
            writeln!(f, "Duplicate Matching Parameters")?;
            writeln!(f, "-----------------------------")?;

            macro_rules! line {
                ($fmt:expr, $val:expr, $comment:expr) => {{
                    let s = format!($fmt, $val);
                    let pad = if s.len() < PARAM_COL {
                        " ".repeat(PARAM_COL - s.len())
                    } else {
                        " ".to_string()
                    };
                    writeln!(f, "  {}{}# {}", s, pad, $comment)
                }};
            }

            line!(
                "radius_factor         = {:.2}",
                self.radius_factor,
                "Multiplier on the positional error"
            )?;
            line!(
                "min_radius_arcsec     = {:.1}\"",
                self.min_radius_arcsec,
                "Lower clamp of the matching radius"
            )?;
            line!(
                "max_radius_arcsec     = {:.1}\"",
                self.max_radius_arcsec,
                "Upper clamp of the matching radius"
            )?;
            line!(
                "default_radius_arcsec = {:.1}\"",
                self.default_radius_arcsec,
                "Radius without positional error"
            )?;
            line!(
                "exclude_same_survey   = {}",
                self.exclude_same_survey,
                "Skip candidates of the same survey"
            )?;
            line!(
                "cell_size_deg         = {:.3}",
                self.cell_size_deg,
                "Spatial grid cell edge"
            )?;
            line!(
                "verify_after_ingest   = {}",
                self.verify_after_ingest,
                "Full invariant check per ingestion"
            )?;
            Ok(())
        } else {
            write!(
                f,
                "MatchingParams(R=clamp({:.2}×err, {:.1}\", {:.1}\"), default={:.1}\", exclude_same_survey={}, cell={:.3}°)",
                self.radius_factor,
                self.min_radius_arcsec,
                self.max_radius_arcsec,
                self.default_radius_arcsec,
                self.exclude_same_survey,
                self.cell_size_deg,
            )
        }
    }
}

#[cfg(test)]
mod matching_params_test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_matching_radius_policy() {
        let params = MatchingParams::default();
        assert_relative_eq!(params.matching_radius(Some(5.0)), 5.5, epsilon = 1e-12);
        assert_eq!(params.matching_radius(Some(1.0)), 4.0);
        assert_eq!(params.matching_radius(Some(100.0)), 20.0);
        assert_eq!(params.matching_radius(None), 10.0);
        assert_eq!(params.matching_radius(Some(f64::NAN)), 10.0);
        assert_eq!(params.matching_radius(Some(-3.0)), 10.0);
    }

    #[test]
    fn test_builder_validation() {
        assert!(MatchingParams::builder().build().is_ok());

        let err = MatchingParams::builder().radius_factor(0.0).build();
        assert!(matches!(err, Err(MetaSourceError::InvalidMatchingParameter(_))));

        assert!(MatchingParams::builder()
            .min_radius_arcsec(30.0)
            .build()
            .is_err());
        assert!(MatchingParams::builder()
            .default_radius_arcsec(25.0)
            .build()
            .is_err());
        assert!(MatchingParams::builder().cell_size_deg(0.0).build().is_err());
        assert!(MatchingParams::builder().cell_size_deg(91.0).build().is_err());
        assert!(MatchingParams::builder().cell_size_deg(1e-7).build().is_err());
        assert!(MatchingParams::builder()
            .cell_size_deg(MIN_CELL_SIZE_DEG)
            .build()
            .is_ok());
        assert!(MatchingParams::builder()
            .max_radius_arcsec(f64::NAN)
            .build()
            .is_err());

        let params = MatchingParams::builder()
            .min_radius_arcsec(2.0)
            .max_radius_arcsec(30.0)
            .exclude_same_survey(true)
            .build()
            .unwrap();
        assert_eq!(params.max_radius_arcsec, 30.0);
        assert!(params.exclude_same_survey);
    }

    #[test]
    fn test_validate_struct_literal() {
        assert!(MatchingParams::default().validate().is_ok());

        let swapped = MatchingParams {
            min_radius_arcsec: 30.0,
            max_radius_arcsec: 20.0,
            ..Default::default()
        };
        assert!(matches!(
            swapped.validate(),
            Err(MetaSourceError::InvalidMatchingParameter(_))
        ));
    }

    #[test]
    fn test_display() {
        let params = MatchingParams::default();
        let short = format!("{params}");
        assert!(short.starts_with("MatchingParams("));
        let table = format!("{params:#}");
        assert!(table.contains("radius_factor"));
        assert!(table.contains("# Upper clamp of the matching radius"));
    }
}
