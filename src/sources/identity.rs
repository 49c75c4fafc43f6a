use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::constants::{ArcSec, Degree, SurveyId};
use crate::pre_class::PreClassFlags;
use crate::sources::{Detection, DetectionId, GroupId, IdentityId};

/// The canonical astrophysical object ("meta-object") clustering one or more detections.
///
/// Position and the `master_*` fields mirror the current master detection and are not
/// authoritative on their own. `membership_count` caches `members.len()` and is checked
/// against the detections' back-references by the invariant verifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub ra: Degree,
    pub dec: Degree,
    pub master: Option<DetectionId>,
    /// The master was pinned by an explicit override and is not re-ranked.
    pub master_pinned: bool,
    pub members: SmallVec<[DetectionId; 4]>,
    pub membership_count: usize,
    pub group: Option<GroupId>,
    pub primary_object: bool,
    pub flags: Option<PreClassFlags>,
    /// Flux upper limits for surveys without a member detection.
    pub upper_limits: BTreeMap<SurveyId, f64>,

    pub master_name: Option<String>,
    pub master_survey: Option<SurveyId>,
    pub likelihood: Option<f64>,
    pub extent: Option<f64>,
    pub pos_error: Option<ArcSec>,
}

impl Identity {
    pub(crate) fn new(id: IdentityId, ra: Degree, dec: Degree) -> Self {
        Identity {
            id,
            ra,
            dec,
            master: None,
            master_pinned: false,
            members: SmallVec::new(),
            membership_count: 0,
            group: None,
            primary_object: false,
            flags: None,
            upper_limits: BTreeMap::new(),
            master_name: None,
            master_survey: None,
            likelihood: None,
            extent: None,
            pos_error: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, detection: DetectionId) -> bool {
        self.members.contains(&detection)
    }

    /// Add a member; returns `false` if it was already present.
    pub(crate) fn add_member(&mut self, detection: DetectionId) -> bool {
        if self.contains(detection) {
            return false;
        }
        self.members.push(detection);
        self.membership_count = self.members.len();
        true
    }

    pub(crate) fn remove_member(&mut self, detection: DetectionId) -> bool {
        let before = self.members.len();
        self.members.retain(|d| *d != detection);
        self.membership_count = self.members.len();
        if self.master == Some(detection) {
            self.master = None;
            self.master_pinned = false;
        }
        before != self.members.len()
    }

    /// Copy the master detection's position and descriptive fields.
    pub(crate) fn mirror_master(&mut self, master: &Detection) {
        self.master = Some(master.id);
        self.ra = master.ra;
        self.dec = master.dec;
        self.master_name = master.name.clone();
        self.master_survey = Some(master.survey());
        self.likelihood = master.likelihood;
        self.extent = master.extent;
        self.pos_error = master.pos_error;
    }
}
