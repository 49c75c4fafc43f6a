//! # Master selection
//!
//! Every non-empty identity is represented by one **master** detection. The master is the
//! member with the highest detection likelihood:
//!
//! * a missing (or NaN) likelihood ranks below every real value,
//! * equal likelihoods keep the earliest inserted detection,
//! * when no member has a likelihood, the earliest inserted detection is the master.
//!
//! The ranking is total, so the choice never depends on member order.
//!
//! A master may also be **pinned** by an explicit override ([`pin_master`]). A pinned master
//! is kept by [`refresh_master`] for as long as it stays a member of the identity; removing it
//! (purge) or calling [`unpin_master`] returns the identity to the likelihood rule.
use std::cmp::Ordering;

use tracing::debug;

use crate::{
    metasource_errors::MetaSourceError,
    sources::{Detection, DetectionId, IdentityId},
    store::CatalogStore,
};

fn usable(likelihood: Option<f64>) -> Option<f64> {
    likelihood.filter(|l| !l.is_nan())
}

/// `Greater` when `a` is a better master than `b`.
fn compare_master(a: &Detection, b: &Detection) -> Ordering {
    let by_likelihood = match (usable(a.likelihood), usable(b.likelihood)) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    };
    // earlier insertion wins the tie
    by_likelihood.then_with(|| b.seq.cmp(&a.seq))
}

/// Pick the master among `members`; `None` for an empty set.
pub fn select_master<'a, I>(members: I) -> Option<&'a Detection>
where
    I: IntoIterator<Item = &'a Detection>,
{
    members.into_iter().max_by(|a, b| compare_master(a, b))
}

/// Re-select the master of `identity_id` and mirror it into the identity.
///
/// Return
/// ----------
/// * `Ok(true)` if the master changed.
/// * [`MetaSourceError::NotFound`] for an unknown identity.
/// * [`MetaSourceError::ReferenceInconsistency`] if a member is missing from the store.
pub fn refresh_master<S: CatalogStore>(
    store: &mut S,
    identity_id: IdentityId,
) -> Result<bool, MetaSourceError> {
    let identity = store
        .identity(identity_id)
        .ok_or_else(|| MetaSourceError::NotFound(format!("identity {identity_id}")))?;

    let mut members = Vec::with_capacity(identity.members.len());
    for id in &identity.members {
        let detection = store.detection(*id).ok_or_else(|| {
            MetaSourceError::ReferenceInconsistency(format!(
                "identity {identity_id} lists missing detection {id}"
            ))
        })?;
        members.push(detection);
    }

    let pinned = identity
        .master
        .filter(|m| identity.master_pinned && identity.members.contains(m));
    let chosen = match pinned {
        Some(master) => members.iter().copied().find(|d| d.id == master),
        None => select_master(members.iter().copied()),
    }
    .cloned();

    let previous = identity.master;
    let identity = store
        .identity_mut(identity_id)
        .ok_or_else(|| MetaSourceError::NotFound(format!("identity {identity_id}")))?;
    match chosen {
        Some(master) => {
            identity.mirror_master(&master);
            if previous != Some(master.id) {
                debug!(identity = %identity_id, master = %master.id, ?previous, "master changed");
            }
            Ok(previous != Some(master.id))
        }
        None => {
            identity.master = None;
            identity.master_pinned = false;
            Ok(previous.is_some())
        }
    }
}

/// Pin `detection_id` as the master of `identity_id`, bypassing the likelihood rule.
///
/// Return
/// ----------
/// * [`MetaSourceError::NotFound`] if the identity or the detection does not exist, or if the
///   detection is not a member of the identity.
pub fn pin_master<S: CatalogStore>(
    store: &mut S,
    identity_id: IdentityId,
    detection_id: DetectionId,
) -> Result<(), MetaSourceError> {
    let detection = store
        .detection(detection_id)
        .ok_or_else(|| MetaSourceError::NotFound(format!("detection {detection_id}")))?
        .clone();
    let identity = store
        .identity_mut(identity_id)
        .ok_or_else(|| MetaSourceError::NotFound(format!("identity {identity_id}")))?;
    if !identity.contains(detection_id) {
        return Err(MetaSourceError::NotFound(format!(
            "detection {detection_id} is not a member of identity {identity_id}"
        )));
    }
    identity.mirror_master(&detection);
    identity.master_pinned = true;
    debug!(identity = %identity_id, master = %detection_id, "master pinned");
    Ok(())
}

/// Drop a pinned master and return to the likelihood rule.
pub fn unpin_master<S: CatalogStore>(
    store: &mut S,
    identity_id: IdentityId,
) -> Result<bool, MetaSourceError> {
    store
        .identity_mut(identity_id)
        .ok_or_else(|| MetaSourceError::NotFound(format!("identity {identity_id}")))?
        .master_pinned = false;
    refresh_master(store, identity_id)
}
