use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::constants::SurveyId;
use crate::sources::{GroupId, IdentityId};

/// A set of identities known to be duplicates of each other.
///
/// `primary_membership` caches the membership count of `primary` at the time it was last
/// chosen. `master_name` and `master_survey` surface the primary identity's master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub primary: IdentityId,
    pub primary_membership: usize,
    pub members: BTreeSet<IdentityId>,
    pub master_name: Option<String>,
    pub master_survey: Option<SurveyId>,
}

impl Group {
    /// Singleton group around a freshly created identity.
    pub(crate) fn singleton(id: GroupId, identity: IdentityId) -> Self {
        Group {
            id,
            primary: identity,
            primary_membership: 0,
            members: BTreeSet::from([identity]),
            master_name: None,
            master_survey: None,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, identity: IdentityId) -> bool {
        self.members.contains(&identity)
    }
}
