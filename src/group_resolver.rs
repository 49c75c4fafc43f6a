//! # Group resolution
//!
//! Groups collect identities that turned out to be duplicates of each other. This module
//! maintains them as an **online union-by-size** structure:
//!
//! * every identity starts in its own singleton group ([`create_singleton_group`]),
//! * [`merge_identities`] unites the groups of two identities. The group whose primary
//!   identity has the larger membership survives, every identity of the other group is
//!   re-homed, and the absorbed group is deleted,
//! * [`merge_all`] folds any number of identities into one group by pairwise merges. Each
//!   effective merge removes one group, so the loop always terminates,
//! * [`refresh_primary`] re-elects the primary identity of a group: largest membership,
//!   ties broken by the lowest identity id. Exactly one identity of the group carries
//!   `primary_object = true` afterwards.
//!
//! Merges only rewrite identity → group references. Detection ownership is never touched,
//! so a detection owned by two identities of the merged group reveals a bookkeeping bug and
//! is reported as [`MetaSourceError::DuplicateMembership`].
use std::collections::BTreeSet;

use tracing::debug;

use crate::{
    constants::FastMap,
    metasource_errors::MetaSourceError,
    sources::{DetectionId, Group, GroupId, IdentityId},
    store::CatalogStore,
};

/// Effect of one effective merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    pub survivor: GroupId,
    pub absorbed: GroupId,
    pub previous_primary: IdentityId,
    pub primary: IdentityId,
}

fn group_of<S: CatalogStore>(store: &S, identity: IdentityId) -> Result<GroupId, MetaSourceError> {
    store
        .identity(identity)
        .ok_or_else(|| MetaSourceError::NotFound(format!("identity {identity}")))?
        .group
        .ok_or_else(|| {
            MetaSourceError::ReferenceInconsistency(format!("identity {identity} has no group"))
        })
}

fn membership_of<S: CatalogStore>(store: &S, identity: IdentityId) -> Result<usize, MetaSourceError> {
    store
        .identity(identity)
        .map(|i| i.membership_count)
        .ok_or_else(|| {
            MetaSourceError::ReferenceInconsistency(format!(
                "group member identity {identity} is missing from the store"
            ))
        })
}

/// Create a singleton group for `identity_id` and make it its primary.
pub fn create_singleton_group<S: CatalogStore>(
    store: &mut S,
    identity_id: IdentityId,
) -> Result<GroupId, MetaSourceError> {
    if store
        .identity(identity_id)
        .ok_or_else(|| MetaSourceError::NotFound(format!("identity {identity_id}")))?
        .group
        .is_some()
    {
        return Err(MetaSourceError::ReferenceInconsistency(format!(
            "identity {identity_id} already belongs to a group"
        )));
    }
    let group_id = store.next_group_id();
    store.insert_group(Group::singleton(group_id, identity_id));
    if let Some(identity) = store.identity_mut(identity_id) {
        identity.group = Some(group_id);
    }
    refresh_primary(store, group_id)?;
    Ok(group_id)
}

/// Unite the groups of two identities.
///
/// Arguments
/// -----------------
/// * `a`, `b`: the identities found to be duplicates.
///
/// Return
/// ----------
/// * `Ok(None)` if both already share a group.
/// * `Ok(Some(report))` after an effective merge.
/// * [`MetaSourceError::ReferenceInconsistency`] if an identity has no group or a group lists
///   a missing identity, [`MetaSourceError::DuplicateMembership`] if the merged group ends up
///   with a detection owned twice.
///
/// See also
/// ------------
/// * [`merge_all`] – n-way version used by the ingestion path.
pub fn merge_identities<S: CatalogStore>(
    store: &mut S,
    a: IdentityId,
    b: IdentityId,
) -> Result<Option<MergeReport>, MetaSourceError> {
    let group_a = group_of(store, a)?;
    let group_b = group_of(store, b)?;
    if group_a == group_b {
        return Ok(None);
    }

    let missing = |g: GroupId| {
        MetaSourceError::ReferenceInconsistency(format!("group {g} referenced but missing"))
    };
    let primary_a = store.group(group_a).ok_or_else(|| missing(group_a))?.primary;
    let primary_b = store.group(group_b).ok_or_else(|| missing(group_b))?.primary;
    let size_a = membership_of(store, primary_a)?;
    let size_b = membership_of(store, primary_b)?;

    // larger primary survives; on a tie the group whose primary has the lower id
    let a_survives = size_a > size_b || (size_a == size_b && primary_a < primary_b);
    let (survivor, absorbed, previous_primary) = if a_survives {
        (group_a, group_b, primary_a)
    } else {
        (group_b, group_a, primary_b)
    };

    let absorbed_group = store.remove_group(absorbed).ok_or_else(|| missing(absorbed))?;
    for identity_id in &absorbed_group.members {
        let identity = store.identity_mut(*identity_id).ok_or_else(|| {
            MetaSourceError::ReferenceInconsistency(format!(
                "group {absorbed} lists missing identity {identity_id}"
            ))
        })?;
        identity.group = Some(survivor);
    }
    store
        .group_mut(survivor)
        .ok_or_else(|| missing(survivor))?
        .members
        .extend(absorbed_group.members.iter().copied());

    let primary = refresh_primary(store, survivor)?;
    check_single_ownership(store, survivor)?;

    debug!(
        %survivor,
        %absorbed,
        %previous_primary,
        %primary,
        "groups merged"
    );
    Ok(Some(MergeReport {
        survivor,
        absorbed,
        previous_primary,
        primary,
    }))
}

/// Fold `target` and every identity of `others` into a single group.
///
/// Return
/// ----------
/// * The reports of the effective merges, in application order. Empty when every identity
///   already shared the group of `target`.
pub fn merge_all<S: CatalogStore>(
    store: &mut S,
    target: IdentityId,
    others: &[IdentityId],
) -> Result<Vec<MergeReport>, MetaSourceError> {
    let mut reports = Vec::new();
    for other in others {
        if let Some(report) = merge_identities(store, target, *other)? {
            reports.push(report);
        }
    }
    Ok(reports)
}

/// Re-elect the primary identity of `group_id` and refresh the `primary_object` flags.
///
/// Return
/// ----------
/// * The primary identity: largest membership count, ties broken by the lowest id.
pub fn refresh_primary<S: CatalogStore>(
    store: &mut S,
    group_id: GroupId,
) -> Result<IdentityId, MetaSourceError> {
    let group = store.group(group_id).ok_or_else(|| {
        MetaSourceError::ReferenceInconsistency(format!("group {group_id} is missing"))
    })?;
    let members: Vec<IdentityId> = group.members.iter().copied().collect();

    let mut best: Option<(IdentityId, usize)> = None;
    for identity_id in &members {
        let count = membership_of(store, *identity_id)?;
        // members iterate in id order, so only a strictly larger count replaces
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((*identity_id, count));
        }
    }
    let (primary, primary_membership) = best.ok_or_else(|| {
        MetaSourceError::ReferenceInconsistency(format!("group {group_id} has no identity"))
    })?;

    for identity_id in &members {
        if let Some(identity) = store.identity_mut(*identity_id) {
            identity.primary_object = *identity_id == primary;
        }
    }
    let (master_name, master_survey) = store
        .identity(primary)
        .map(|i| (i.master_name.clone(), i.master_survey))
        .unwrap_or_default();

    let group = store.group_mut(group_id).ok_or_else(|| {
        MetaSourceError::ReferenceInconsistency(format!("group {group_id} is missing"))
    })?;
    if group.primary != primary {
        debug!(group = %group_id, previous = %group.primary, %primary, "primary identity changed");
    }
    group.primary = primary;
    group.primary_membership = primary_membership;
    group.master_name = master_name;
    group.master_survey = master_survey;
    Ok(primary)
}

/// Remove `identity_id` from its group. An emptied group is deleted, otherwise its primary
/// is re-elected.
///
/// Return
/// ----------
/// * `Some(group)` if the group survives, `None` if it was deleted.
pub fn detach_identity<S: CatalogStore>(
    store: &mut S,
    identity_id: IdentityId,
) -> Result<Option<GroupId>, MetaSourceError> {
    let group_id = group_of(store, identity_id)?;
    if let Some(identity) = store.identity_mut(identity_id) {
        identity.group = None;
        identity.primary_object = false;
    }
    let group = store.group_mut(group_id).ok_or_else(|| {
        MetaSourceError::ReferenceInconsistency(format!("group {group_id} is missing"))
    })?;
    group.members.remove(&identity_id);
    if group.is_empty() {
        store.remove_group(group_id);
        debug!(group = %group_id, "empty group deleted");
        return Ok(None);
    }
    refresh_primary(store, group_id)?;
    Ok(Some(group_id))
}

/// Check that no detection is owned by two identities of `group_id`.
pub fn check_single_ownership<S: CatalogStore>(
    store: &S,
    group_id: GroupId,
) -> Result<(), MetaSourceError> {
    let group = store.group(group_id).ok_or_else(|| {
        MetaSourceError::ReferenceInconsistency(format!("group {group_id} is missing"))
    })?;
    let mut owners: FastMap<DetectionId, IdentityId> = FastMap::default();
    for identity_id in &group.members {
        let identity = store.identity(*identity_id).ok_or_else(|| {
            MetaSourceError::ReferenceInconsistency(format!(
                "group {group_id} lists missing identity {identity_id}"
            ))
        })?;
        for detection in &identity.members {
            if let Some(first) = owners.insert(*detection, *identity_id) {
                let (first, second) = if first < *identity_id {
                    (first, *identity_id)
                } else {
                    (*identity_id, first)
                };
                return Err(MetaSourceError::DuplicateMembership {
                    detection: *detection,
                    first,
                    second,
                });
            }
        }
    }
    Ok(())
}

/// Identities sharing the group of `identity_id`, itself included.
pub fn group_members<S: CatalogStore>(
    store: &S,
    identity_id: IdentityId,
) -> Result<BTreeSet<IdentityId>, MetaSourceError> {
    let group_id = group_of(store, identity_id)?;
    Ok(store
        .group(group_id)
        .ok_or_else(|| {
            MetaSourceError::ReferenceInconsistency(format!("group {group_id} is missing"))
        })?
        .members
        .clone())
}
