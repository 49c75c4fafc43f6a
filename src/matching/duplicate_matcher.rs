//! Candidate search for one newly ingested detection.
//!
//! The matcher only reads state. It returns a [`MatchOutcome`] and leaves applying it
//! (creating the identity, attaching the detection, merging groups) to the resolver.
use std::collections::BTreeMap;

use tracing::trace;

use crate::{
    constants::{arcsec_to_deg, deg_to_arcsec, ArcSec, Degree},
    matching::MatchingParams,
    metasource_errors::MetaSourceError,
    sources::{Detection, DetectionId, IdentityId},
    spatial_index::SkyIndex,
    store::CatalogStore,
};

/// One existing detection found within the matching radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchCandidate {
    pub detection: DetectionId,
    pub owner: IdentityId,
    pub separation_arcsec: ArcSec,
}

/// What the new detection turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// No candidate: the detection starts a new identity in a new group.
    NewIdentity,
    /// Every candidate belongs to one identity, which the detection joins.
    Join(IdentityId),
    /// Candidates span several identities. The detection joins `target`; the groups of
    /// `target` and every identity in `others` must be merged.
    Merge {
        target: IdentityId,
        others: Vec<IdentityId>,
    },
}

/// Full answer of the matcher, candidates included for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchDecision {
    pub radius_arcsec: ArcSec,
    pub candidates: Vec<MatchCandidate>,
    pub outcome: MatchOutcome,
}

/// Find the existing detections matching `detection` and decide its identity.
///
/// Arguments
/// -----------------
/// * `store`: record storage, read only.
/// * `index`: spatial index of every stored detection.
/// * `detection`: the new detection. It may already be indexed; it never matches itself.
/// * `params`: matching radius policy and survey exclusion.
///
/// Return
/// ----------
/// * A [`MatchDecision`]. When candidates span several identities the join target is the
///   identity with the largest membership, ties broken by the lowest id.
/// * [`MetaSourceError::ReferenceInconsistency`] if the index returns a detection that is
///   missing from the store or has no owning identity.
///
/// See also
/// ------------
/// * [`MatchingParams::matching_radius`] – radius policy.
/// * [`crate::group_resolver::merge_all`] – applies a [`MatchOutcome::Merge`].
pub fn find_match<S: CatalogStore>(
    store: &S,
    index: &SkyIndex<DetectionId>,
    detection: &Detection,
    params: &MatchingParams,
) -> Result<MatchDecision, MetaSourceError> {
    let radius_arcsec = params.matching_radius(detection.pos_error);
    let radius: Degree = arcsec_to_deg(radius_arcsec);

    let mut candidates = Vec::new();
    for (candidate_id, separation) in index.query_radius(detection.ra, detection.dec, radius) {
        if candidate_id == detection.id {
            continue;
        }
        let candidate = store.detection(candidate_id).ok_or_else(|| {
            MetaSourceError::ReferenceInconsistency(format!(
                "spatial index returned {candidate_id}, which is not in the store"
            ))
        })?;
        if params.exclude_same_survey && candidate.survey() == detection.survey() {
            continue;
        }
        let owner = candidate.owner.ok_or_else(|| {
            MetaSourceError::ReferenceInconsistency(format!(
                "matched detection {candidate_id} ({}) has no owning identity",
                candidate.key
            ))
        })?;
        candidates.push(MatchCandidate {
            detection: candidate_id,
            owner,
            separation_arcsec: deg_to_arcsec(separation),
        });
    }

    let outcome = decide(store, &candidates)?;
    trace!(
        detection = %detection.id,
        radius_arcsec,
        n_candidates = candidates.len(),
        ?outcome,
        "match decision"
    );

    Ok(MatchDecision {
        radius_arcsec,
        candidates,
        outcome,
    })
}

fn decide<S: CatalogStore>(
    store: &S,
    candidates: &[MatchCandidate],
) -> Result<MatchOutcome, MetaSourceError> {
    // distinct owners, ordered by id
    let mut owners: BTreeMap<IdentityId, usize> = BTreeMap::new();
    for candidate in candidates {
        if owners.contains_key(&candidate.owner) {
            continue;
        }
        let identity = store.identity(candidate.owner).ok_or_else(|| {
            MetaSourceError::ReferenceInconsistency(format!(
                "detection {} references missing identity {}",
                candidate.detection, candidate.owner
            ))
        })?;
        owners.insert(candidate.owner, identity.membership_count);
    }

    let mut iter = owners.iter();
    let Some((&first, &first_count)) = iter.next() else {
        return Ok(MatchOutcome::NewIdentity);
    };
    if owners.len() == 1 {
        return Ok(MatchOutcome::Join(first));
    }

    // strictly larger wins, so the lowest id keeps ties
    let (target, _) = iter.fold((first, first_count), |best, (&id, &count)| {
        if count > best.1 {
            (id, count)
        } else {
            best
        }
    });
    let others = owners.keys().copied().filter(|id| *id != target).collect();
    Ok(MatchOutcome::Merge { target, others })
}
