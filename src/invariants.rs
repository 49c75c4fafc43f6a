//! # Full-state consistency check
//!
//! [`verify_invariants`] walks every record and checks the structural invariants that hold
//! after each ingestion call:
//!
//! 1. every detection is indexed and has exactly one owning identity, which lists it,
//! 2. no detection is listed by two identities,
//! 3. `membership_count` equals the number of detections referencing the identity,
//! 4. every non-empty identity has a master among its members,
//! 5. every identity belongs to exactly one existing group, which lists it,
//! 6. every group has exactly one `primary_object` identity, its primary, whose membership is
//!    at least that of every sibling.
//!
//! The check is linear in the catalog size. It runs in tests and, optionally, after every
//! ingestion call (`MatchingParams::verify_after_ingest`).
use crate::{
    constants::FastMap,
    metasource_errors::MetaSourceError,
    sources::{DetectionId, IdentityId},
    spatial_index::SkyIndex,
    store::CatalogStore,
};

fn inconsistency(msg: String) -> MetaSourceError {
    MetaSourceError::ReferenceInconsistency(msg)
}

/// Check every structural invariant of the catalog.
///
/// Return
/// ----------
/// * `Ok(())` if the state is consistent.
/// * [`MetaSourceError::DuplicateMembership`] if a detection is listed by two identities.
/// * [`MetaSourceError::ReferenceInconsistency`] describing the first other violation found.
pub fn verify_invariants<S: CatalogStore>(
    store: &S,
    index: &SkyIndex<DetectionId>,
) -> Result<(), MetaSourceError> {
    // detection -> listing identity, built from the identity side
    let mut listed_by: FastMap<DetectionId, IdentityId> = FastMap::default();
    for identity_id in store.identity_ids() {
        let identity = store
            .identity(identity_id)
            .ok_or_else(|| inconsistency(format!("identity {identity_id} listed but missing")))?;
        for detection in &identity.members {
            if let Some(other) = listed_by.insert(*detection, identity_id) {
                return Err(MetaSourceError::DuplicateMembership {
                    detection: *detection,
                    first: other.min(identity_id),
                    second: other.max(identity_id),
                });
            }
        }
    }

    let mut referencing: FastMap<IdentityId, usize> = FastMap::default();
    for detection_id in store.detection_ids() {
        let detection = store
            .detection(detection_id)
            .ok_or_else(|| inconsistency(format!("detection {detection_id} listed but missing")))?;
        let owner = detection
            .owner
            .ok_or_else(|| inconsistency(format!("detection {detection_id} has no owner")))?;
        if listed_by.get(&detection_id) != Some(&owner) {
            return Err(inconsistency(format!(
                "detection {detection_id} references {owner}, which does not list it"
            )));
        }
        if !index.contains(&detection_id) {
            return Err(inconsistency(format!(
                "detection {detection_id} is missing from the spatial index"
            )));
        }
        *referencing.entry(owner).or_default() += 1;
    }
    if index.len() != store.n_detections() {
        return Err(inconsistency(format!(
            "spatial index holds {} entries for {} detections",
            index.len(),
            store.n_detections()
        )));
    }

    for identity_id in store.identity_ids() {
        let Some(identity) = store.identity(identity_id) else {
            continue;
        };
        let references = referencing.get(&identity_id).copied().unwrap_or(0);
        if identity.membership_count != references || identity.members.len() != references {
            return Err(inconsistency(format!(
                "identity {identity_id} caches {} members, lists {}, referenced by {references}",
                identity.membership_count,
                identity.members.len()
            )));
        }
        if references == 0 {
            return Err(inconsistency(format!("identity {identity_id} has no member")));
        }
        match identity.master {
            Some(master) if identity.contains(master) => {}
            _ => {
                return Err(inconsistency(format!(
                    "identity {identity_id} has no master among its members"
                )))
            }
        }
        let group_id = identity
            .group
            .ok_or_else(|| inconsistency(format!("identity {identity_id} has no group")))?;
        let group = store
            .group(group_id)
            .ok_or_else(|| inconsistency(format!("identity {identity_id} references missing {group_id}")))?;
        if !group.contains(identity_id) {
            return Err(inconsistency(format!(
                "{group_id} does not list its member identity {identity_id}"
            )));
        }
    }

    for group_id in store.group_ids() {
        let Some(group) = store.group(group_id) else {
            continue;
        };
        if group.is_empty() {
            return Err(inconsistency(format!("{group_id} is empty")));
        }
        if !group.contains(group.primary) {
            return Err(inconsistency(format!(
                "{group_id} primary {} is not a member",
                group.primary
            )));
        }

        let mut n_flagged = 0;
        let mut largest = 0;
        for identity_id in &group.members {
            let identity = store.identity(*identity_id).ok_or_else(|| {
                inconsistency(format!("{group_id} lists missing identity {identity_id}"))
            })?;
            if identity.group != Some(group_id) {
                return Err(inconsistency(format!(
                    "{group_id} lists {identity_id}, which belongs to {:?}",
                    identity.group
                )));
            }
            if identity.primary_object {
                n_flagged += 1;
                if *identity_id != group.primary {
                    return Err(inconsistency(format!(
                        "{identity_id} is flagged primary but {group_id} primary is {}",
                        group.primary
                    )));
                }
            }
            largest = largest.max(identity.membership_count);
        }
        if n_flagged != 1 {
            return Err(inconsistency(format!(
                "{group_id} has {n_flagged} primary identities"
            )));
        }
        let primary_count = store
            .identity(group.primary)
            .map(|i| i.membership_count)
            .unwrap_or(0);
        if primary_count < largest || group.primary_membership != primary_count {
            return Err(inconsistency(format!(
                "{group_id} primary {} has {primary_count} members (cached {}), largest sibling {largest}",
                group.primary, group.primary_membership
            )));
        }
    }

    Ok(())
}
