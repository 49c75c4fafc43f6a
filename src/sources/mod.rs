//! # Data model of the identity resolution engine
//!
//! Three record kinds, each addressed by a synthetic id:
//!
//! * [`Detection`] – one appearance of a source in one survey epoch. Naturally keyed by
//!   [`DetectionKey`] (survey + within-survey index), which makes re-ingestion idempotent.
//! * [`Identity`] – the *meta-object*: a cluster of detections believed to be the same
//!   physical source, represented by a master detection.
//! * [`Group`] – a set of identities found to be duplicates of each other, represented by
//!   its primary identity.
//!
//! Records only reference each other by id; the owning tables live in a
//! [`CatalogStore`](crate::store::CatalogStore).
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::SurveyId;

pub mod detection;
pub mod group;
pub mod identity;

pub use detection::{Detection, DetectionUpdate, NewDetection};
pub use group::Group;
pub use identity::Identity;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

record_id!(
    /// Synthetic id of a [`Detection`].
    DetectionId,
    "D"
);
record_id!(
    /// Synthetic id of an [`Identity`].
    IdentityId,
    "I"
);
record_id!(
    /// Synthetic id of a [`Group`].
    GroupId,
    "G"
);

/// Stable natural key of a detection: the survey it was observed in and its index
/// inside that survey's catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DetectionKey {
    pub survey: SurveyId,
    pub survey_index: i64,
}

impl DetectionKey {
    pub fn new(survey: SurveyId, survey_index: i64) -> Self {
        DetectionKey {
            survey,
            survey_index,
        }
    }
}

impl fmt::Display for DetectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "survey {}#{}", self.survey, self.survey_index)
    }
}
