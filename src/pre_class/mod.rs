//! # Pre-classification
//!
//! Small derived flags computed per identity once its master and optical counterparts are
//! known:
//!
//! * [`StellarFlag`] – do the optical counterparts around the master look like stars?
//! * AGN color flag – WISE `W1 − W2` color above a threshold for every counterpart.
//! * transient candidate – undetected in one epoch, then bright in the next, and neither a
//!   star nor a WISE AGN.
//!
//! The rules live in [`engine`]; they are pure functions of their inputs and never fail:
//! a missing input degrades the corresponding flag to "unknown".
use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::{constants::SurveyId, counterparts::OpticalSurvey, metasource_errors::MetaSourceError};

pub mod engine;

/// Stellar classification of the optical counterparts around a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StellarFlag {
    /// No counterpart within the radius.
    NoCounterpart,
    /// Every counterpart is a non-star or unclassified.
    NotStar,
    /// Every counterpart is a star.
    Star,
    /// Stars and non-stars.
    Mixed,
}

impl fmt::Display for StellarFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StellarFlag::NoCounterpart => "no counterpart",
            StellarFlag::NotStar => "not star",
            StellarFlag::Star => "star",
            StellarFlag::Mixed => "mixed",
        };
        f.write_str(name)
    }
}

/// Derived flags of one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreClassFlags {
    /// Aggregate over every optical survey.
    pub stellar: StellarFlag,
    /// Per optical survey with at least one counterpart in the radius.
    pub stellar_by_survey: BTreeMap<OpticalSurvey, StellarFlag>,
    pub agn_color: Option<bool>,
    pub transient_candidate: bool,
}

/// Thresholds of the pre-classification rules.
///
/// Defaults
/// -----------------
/// * `agn_color_threshold`: 0.8 mag (`W1 − W2 > 0.8` flags an AGN)
/// * `transient_flux_ratio`: 7.0
/// * `epoch_sequence`: surveys `[1, 2, 3, 4, 5]`
#[derive(Debug, Clone, PartialEq)]
pub struct PreClassParams {
    pub agn_color_threshold: f64,
    pub transient_flux_ratio: f64,
    /// Consecutive survey epochs over which transient pairs `(e, e+1)` are formed.
    pub epoch_sequence: Vec<SurveyId>,
}

impl PreClassParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> PreClassParamsBuilder {
        PreClassParamsBuilder::new()
    }

    /// Check the parameters: finite AGN threshold, `transient_flux_ratio > 0`, and an epoch
    /// sequence of at least two strictly increasing surveys.
    pub fn validate(&self) -> Result<(), MetaSourceError> {
        if !self.agn_color_threshold.is_finite() {
            return Err(MetaSourceError::InvalidPreClassParameter(
                "agn_color_threshold must be finite".into(),
            ));
        }
        if !(self.transient_flux_ratio.is_finite() && self.transient_flux_ratio > 0.0) {
            return Err(MetaSourceError::InvalidPreClassParameter(
                "transient_flux_ratio must be > 0".into(),
            ));
        }
        if self.epoch_sequence.len() < 2 {
            return Err(MetaSourceError::InvalidPreClassParameter(
                "epoch_sequence needs at least two surveys".into(),
            ));
        }
        if self.epoch_sequence.windows(2).any(|w| w[0] >= w[1]) {
            return Err(MetaSourceError::InvalidPreClassParameter(
                "epoch_sequence must be strictly increasing".into(),
            ));
        }
        Ok(())
    }
}

impl Default for PreClassParams {
    fn default() -> Self {
        PreClassParams {
            agn_color_threshold: 0.8,
            transient_flux_ratio: 7.0,
            epoch_sequence: vec![1, 2, 3, 4, 5],
        }
    }
}

/// Builder for [`PreClassParams`], with validation.
#[derive(Debug, Clone, Default)]
pub struct PreClassParamsBuilder {
    params: PreClassParams,
}

impl PreClassParamsBuilder {
    pub fn new() -> Self {
        Self {
            params: PreClassParams::default(),
        }
    }

    pub fn agn_color_threshold(mut self, v: f64) -> Self {
        self.params.agn_color_threshold = v;
        self
    }

    pub fn transient_flux_ratio(mut self, v: f64) -> Self {
        self.params.transient_flux_ratio = v;
        self
    }

    pub fn epoch_sequence(mut self, v: impl Into<Vec<SurveyId>>) -> Self {
        self.params.epoch_sequence = v.into();
        self
    }

    /// Validate and return the parameters, see [`PreClassParams::validate`].
    pub fn build(self) -> Result<PreClassParams, MetaSourceError> {
        self.params.validate()?;
        Ok(self.params)
    }
}

impl fmt::Display for PreClassParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            writeln!(f, "Pre-classification Parameters")?;
            writeln!(f, "-----------------------------")?;
            writeln!(
                f,
                "  agn_color_threshold  = {:.2} mag   # W1 - W2 above this flags an AGN",
                self.agn_color_threshold
            )?;
            writeln!(
                f,
                "  transient_flux_ratio = {:.2}       # flux(e+1) / flux(e) above this",
                self.transient_flux_ratio
            )?;
            writeln!(
                f,
                "  epoch_sequence       = {:?}",
                self.epoch_sequence
            )
        } else {
            write!(
                f,
                "PreClassParams(agn>{:.2}, ratio>{:.1}, epochs={:?})",
                self.agn_color_threshold, self.transient_flux_ratio, self.epoch_sequence
            )
        }
    }
}
