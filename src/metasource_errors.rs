use thiserror::Error;

use crate::constants::Degree;
use crate::sources::{DetectionId, IdentityId};

#[derive(Error, Debug, Clone)]
pub enum MetaSourceError {
    #[error("Invalid sky position: RA={ra} deg, DEC={dec} deg (expected RA in [0, 360), DEC in [-90, 90])")]
    InvalidPosition { ra: Degree, dec: Degree },

    #[error("Reference inconsistency: {0}")]
    ReferenceInconsistency(String),

    #[error("Detection {detection} is owned by both identity {first} and identity {second}")]
    DuplicateMembership {
        detection: DetectionId,
        first: IdentityId,
        second: IdentityId,
    },

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid matching parameter: {0}")]
    InvalidMatchingParameter(String),

    #[error("Invalid pre-classification parameter: {0}")]
    InvalidPreClassParameter(String),
}

impl MetaSourceError {
    /// Structural invariant violations abort the whole ingestion call.
    ///
    /// Bad input (an invalid position) and missing records are recoverable and
    /// may be isolated per record by a batch pipeline.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MetaSourceError::ReferenceInconsistency(_) | MetaSourceError::DuplicateMembership { .. }
        )
    }
}

impl PartialEq for MetaSourceError {
    fn eq(&self, other: &Self) -> bool {
        use MetaSourceError::*;
        match (self, other) {
            (InvalidPosition { ra: a, dec: b }, InvalidPosition { ra: c, dec: d }) => {
                // NaN positions are still the same kind of rejection
                (a == c || (a.is_nan() && c.is_nan())) && (b == d || (b.is_nan() && d.is_nan()))
            }
            (ReferenceInconsistency(a), ReferenceInconsistency(b)) => a == b,
            (
                DuplicateMembership {
                    detection: a,
                    first: b,
                    second: c,
                },
                DuplicateMembership {
                    detection: d,
                    first: e,
                    second: f,
                },
            ) => a == d && b == e && c == f,
            (NotFound(a), NotFound(b)) => a == b,
            (InvalidMatchingParameter(a), InvalidMatchingParameter(b)) => a == b,
            (InvalidPreClassParameter(a), InvalidPreClassParameter(b)) => a == b,
            _ => false,
        }
    }
}
