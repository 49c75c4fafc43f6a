use serde::{Deserialize, Serialize};

use crate::constants::{ArcSec, Degree, SurveyId};
use crate::sources::{DetectionId, DetectionKey, IdentityId};

/// Input record for one detection, before it receives an id.
///
/// Only the natural key and the position are mandatory; every quality field is nullable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDetection {
    pub key: DetectionKey,
    pub name: Option<String>,
    pub ra: Degree,
    pub dec: Degree,
    pub likelihood: Option<f64>,
    pub flux: Option<f64>,
    pub extent: Option<f64>,
    pub pos_error: Option<ArcSec>,
}

impl NewDetection {
    pub fn new(survey: SurveyId, survey_index: i64, ra: Degree, dec: Degree) -> Self {
        NewDetection {
            key: DetectionKey::new(survey, survey_index),
            name: None,
            ra,
            dec,
            likelihood: None,
            flux: None,
            extent: None,
            pos_error: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_likelihood(mut self, likelihood: f64) -> Self {
        self.likelihood = Some(likelihood);
        self
    }

    pub fn with_flux(mut self, flux: f64) -> Self {
        self.flux = Some(flux);
        self
    }

    pub fn with_extent(mut self, extent: f64) -> Self {
        self.extent = Some(extent);
        self
    }

    /// Positional error radius in arcseconds.
    pub fn with_pos_error(mut self, pos_error: ArcSec) -> Self {
        self.pos_error = Some(pos_error);
        self
    }
}

/// One observed appearance of a source in one survey epoch.
///
/// The position is immutable once created. The quality fields can be changed with
/// [`DetectionUpdate`]. The owner back-reference is managed by the resolver only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: DetectionId,
    pub key: DetectionKey,
    pub name: Option<String>,
    pub ra: Degree,
    pub dec: Degree,
    pub likelihood: Option<f64>,
    pub flux: Option<f64>,
    pub extent: Option<f64>,
    pub pos_error: Option<ArcSec>,
    pub(crate) owner: Option<IdentityId>,
    pub(crate) seq: u64,
}

impl Detection {
    pub(crate) fn from_new(id: DetectionId, seq: u64, new: NewDetection) -> Self {
        Detection {
            id,
            key: new.key,
            name: new.name,
            ra: new.ra,
            dec: new.dec,
            likelihood: new.likelihood,
            flux: new.flux,
            extent: new.extent,
            pos_error: new.pos_error,
            owner: None,
            seq,
        }
    }

    pub fn survey(&self) -> SurveyId {
        self.key.survey
    }

    /// Identity owning this detection, `None` until grouped.
    pub fn owner(&self) -> Option<IdentityId> {
        self.owner
    }

    /// Insertion sequence number, used as the stable fallback order for master selection.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Apply the set fields of `update`; returns whether anything changed.
    pub fn apply(&mut self, update: &DetectionUpdate) -> bool {
        let mut changed = false;
        changed |= set_if(&mut self.likelihood, update.likelihood);
        changed |= set_if(&mut self.flux, update.flux);
        changed |= set_if(&mut self.extent, update.extent);
        changed |= set_if(&mut self.pos_error, update.pos_error);
        if let Some(name) = &update.name {
            if self.name.as_ref() != Some(name) {
                self.name = Some(name.clone());
                changed = true;
            }
        }
        changed
    }

    /// Fold the quality fields of a re-ingested record into this detection.
    pub(crate) fn refresh_from(&mut self, new: &NewDetection) -> bool {
        self.apply(&DetectionUpdate {
            name: new.name.clone(),
            likelihood: new.likelihood,
            flux: new.flux,
            extent: new.extent,
            pos_error: new.pos_error,
        })
    }
}

/// Bitwise-total comparison, so a stored NaN equals an incoming NaN.
fn set_if(slot: &mut Option<f64>, value: Option<f64>) -> bool {
    match value {
        Some(v) if !slot.is_some_and(|cur| cur.total_cmp(&v).is_eq()) => {
            *slot = Some(v);
            true
        }
        _ => false,
    }
}

/// In-place change of the mutable fields of a detection.
///
/// A `None` field leaves the current value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionUpdate {
    pub name: Option<String>,
    pub likelihood: Option<f64>,
    pub flux: Option<f64>,
    pub extent: Option<f64>,
    pub pos_error: Option<ArcSec>,
}

impl DetectionUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn likelihood(mut self, value: f64) -> Self {
        self.likelihood = Some(value);
        self
    }

    pub fn flux(mut self, value: f64) -> Self {
        self.flux = Some(value);
        self
    }

    pub fn extent(mut self, value: f64) -> Self {
        self.extent = Some(value);
        self
    }

    pub fn pos_error(mut self, value: ArcSec) -> Self {
        self.pos_error = Some(value);
        self
    }

    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = Some(value.into());
        self
    }
}
