//! # Identity resolution engine
//!
//! [`IdentityResolver`] ties the components together and exposes the public operations of
//! the engine. It is single-threaded (`&mut self` mutators); wrap it in a
//! [`SourceCatalog`](crate::catalog::SourceCatalog) for shared use across threads.
//!
//! Ingestion of one detection
//! -----------------
//! 1. The position is validated; an invalid record is refused before anything is created.
//! 2. A detection whose natural key is already stored is **re-ingested**: its quality fields
//!    are refreshed, nothing else changes.
//! 3. Otherwise the [duplicate matcher](crate::matching::duplicate_matcher) looks for stored
//!    detections within the matching radius and decides:
//!    * no candidate → new identity in a new singleton group,
//!    * one identity → the detection joins it,
//!    * several identities → the detection joins the largest one, then every implicated
//!      group is merged ([`group_resolver::merge_all`]).
//! 4. The master of the receiving identity and the primary of its group are refreshed, and
//!    the pre-classification flags are recomputed if they had been computed before.
//!
//! Every operation leaves the catalog satisfying the invariants checked by
//! [`IdentityResolver::verify_invariants`].
use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::{
    constants::{arcsec_to_deg, deg_to_arcsec, ArcSec, Degree, SurveyId, NO_DETECTION},
    counterparts::{OpticalCatalog, OpticalSource},
    group_resolver::{self, create_singleton_group, detach_identity, merge_all, refresh_primary},
    invariants,
    master_selector::{pin_master, refresh_master, select_master, unpin_master},
    matching::{
        duplicate_matcher::{find_match, MatchOutcome},
        MatchingParams,
    },
    metasource_errors::MetaSourceError,
    pre_class::{
        engine::{classify, EpochEntry},
        PreClassFlags, PreClassParams,
    },
    sky_geometry::validate_position,
    sources::{
        Detection, DetectionId, DetectionKey, DetectionUpdate, Group, GroupId, Identity,
        IdentityId, NewDetection,
    },
    spatial_index::SkyIndex,
    store::{CatalogStore, MemoryStore},
};

pub mod batch;

pub use batch::{BatchReport, RecordOutcome};
pub(crate) use batch::ingest_records;

/// Result of ingesting one detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestResult {
    pub detection_id: DetectionId,
    pub identity_id: IdentityId,
    pub group_id: GroupId,
    /// The detection started a new identity.
    pub was_new_identity: bool,
    /// At least one group merge happened.
    pub was_merge: bool,
    /// The natural key was already stored; the call was a no-op update.
    pub already_known: bool,
}

/// Records removed by [`IdentityResolver::purge_survey`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub detections_removed: usize,
    pub identities_removed: usize,
    pub groups_removed: usize,
}

/// Single-threaded identity resolution engine over a [`CatalogStore`].
#[derive(Debug, Clone)]
pub struct IdentityResolver<S = MemoryStore> {
    store: S,
    index: SkyIndex<DetectionId>,
    optical: OpticalCatalog,
    matching: MatchingParams,
    pre_class: PreClassParams,
}

impl IdentityResolver<MemoryStore> {
    /// In-memory engine with default parameters.
    pub fn new() -> Result<Self, MetaSourceError> {
        Self::with_params(MatchingParams::default(), PreClassParams::default())
    }

    /// In-memory engine with custom parameters.
    pub fn with_params(
        matching: MatchingParams,
        pre_class: PreClassParams,
    ) -> Result<Self, MetaSourceError> {
        Self::with_store(MemoryStore::new(), matching, pre_class)
    }
}

impl<S: CatalogStore> IdentityResolver<S> {
    /// Engine over an existing store. The spatial index is rebuilt from the stored detections.
    ///
    /// Return
    /// ----------
    /// * [`MetaSourceError::InvalidMatchingParameter`] or
    ///   [`MetaSourceError::InvalidPreClassParameter`] for parameters failing their `validate`.
    /// * [`MetaSourceError::InvalidPosition`] if a stored detection has an invalid position.
    pub fn with_store(
        store: S,
        matching: MatchingParams,
        pre_class: PreClassParams,
    ) -> Result<Self, MetaSourceError> {
        matching.validate()?;
        pre_class.validate()?;
        let mut index = SkyIndex::new(matching.cell_size_deg)?;
        for id in store.detection_ids() {
            if let Some(detection) = store.detection(id) {
                index.insert(id, detection.ra, detection.dec)?;
            }
        }
        Ok(IdentityResolver {
            store,
            index,
            optical: OpticalCatalog::new(matching.cell_size_deg)?,
            matching,
            pre_class,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn optical(&self) -> &OpticalCatalog {
        &self.optical
    }

    pub fn matching_params(&self) -> &MatchingParams {
        &self.matching
    }

    pub fn pre_class_params(&self) -> &PreClassParams {
        &self.pre_class
    }

    pub fn n_detections(&self) -> usize {
        self.store.n_detections()
    }

    pub fn n_identities(&self) -> usize {
        self.store.n_identities()
    }

    pub fn n_groups(&self) -> usize {
        self.store.n_groups()
    }

    pub fn identity_ids(&self) -> Vec<IdentityId> {
        self.store.identity_ids()
    }

    pub fn group_ids(&self) -> Vec<GroupId> {
        self.store.group_ids()
    }

    // ---------------------------------------------------------------------------------------------
    // Lookups
    // ---------------------------------------------------------------------------------------------

    pub fn get_identity(&self, id: IdentityId) -> Option<&Identity> {
        self.store.identity(id)
    }

    pub fn get_group(&self, id: GroupId) -> Option<&Group> {
        self.store.group(id)
    }

    pub fn get_detection(&self, id: DetectionId) -> Option<&Detection> {
        self.store.detection(id)
    }

    pub fn detection_by_key(&self, key: &DetectionKey) -> Option<&Detection> {
        self.store
            .detection_by_key(key)
            .and_then(|id| self.store.detection(id))
    }

    /// Like [`get_identity`](Self::get_identity), with [`MetaSourceError::NotFound`].
    pub fn get_identity_checked(&self, id: IdentityId) -> Result<&Identity, MetaSourceError> {
        self.store
            .identity(id)
            .ok_or_else(|| MetaSourceError::NotFound(format!("identity {id}")))
    }

    /// Like [`get_group`](Self::get_group), with [`MetaSourceError::NotFound`].
    pub fn get_group_checked(&self, id: GroupId) -> Result<&Group, MetaSourceError> {
        self.store
            .group(id)
            .ok_or_else(|| MetaSourceError::NotFound(format!("group {id}")))
    }

    fn group_of(&self, identity_id: IdentityId) -> Result<GroupId, MetaSourceError> {
        self.get_identity_checked(identity_id)?.group.ok_or_else(|| {
            MetaSourceError::ReferenceInconsistency(format!("identity {identity_id} has no group"))
        })
    }

    // ---------------------------------------------------------------------------------------------
    // Ingestion
    // ---------------------------------------------------------------------------------------------

    /// Ingest one detection.
    ///
    /// Arguments
    /// -----------------
    /// * `new`: the detection record. Its natural key makes the call idempotent.
    ///
    /// Return
    /// ----------
    /// * An [`IngestResult`] naming the identity and group the detection ended in.
    /// * [`MetaSourceError::InvalidPosition`] if the position is out of range; nothing is created.
    /// * [`MetaSourceError::ReferenceInconsistency`] or [`MetaSourceError::DuplicateMembership`]
    ///   on a structural invariant violation. These are fatal for the caller.
    ///
    /// See also
    /// ------------
    /// * [`IdentityResolver::ingest_batch`] – many records with per-record isolation.
    pub fn ingest_detection(&mut self, new: NewDetection) -> Result<IngestResult, MetaSourceError> {
        validate_position(new.ra, new.dec)?;
        if let Some(existing) = self.store.detection_by_key(&new.key) {
            return self.reingest(existing, &new);
        }

        let detection_id = self.store.next_detection_id();
        let detection = Detection::from_new(detection_id, detection_id.0, new);
        let decision = find_match(&self.store, &self.index, &detection, &self.matching)?;

        let (identity_id, was_new_identity, was_merge) = match decision.outcome {
            MatchOutcome::NewIdentity => {
                let identity_id = self.store.next_identity_id();
                self.store
                    .insert_identity(Identity::new(identity_id, detection.ra, detection.dec));
                self.attach(detection, identity_id)?;
                refresh_master(&mut self.store, identity_id)?;
                create_singleton_group(&mut self.store, identity_id)?;
                debug!(identity = %identity_id, detection = %detection_id, "new identity");
                (identity_id, true, false)
            }
            MatchOutcome::Join(target) => {
                self.attach(detection, target)?;
                self.refresh_identity(target)?;
                debug!(identity = %target, detection = %detection_id, "joined identity");
                (target, false, false)
            }
            MatchOutcome::Merge { target, others } => {
                self.attach(detection, target)?;
                self.refresh_identity(target)?;
                let reports = merge_all(&mut self.store, target, &others)?;
                debug!(
                    identity = %target,
                    detection = %detection_id,
                    ?others,
                    n_merges = reports.len(),
                    "joined identity, duplicates found"
                );
                (target, false, !reports.is_empty())
            }
        };

        let group_id = self.group_of(identity_id)?;
        if self.matching.verify_after_ingest {
            self.verify_invariants()?;
        }
        Ok(IngestResult {
            detection_id,
            identity_id,
            group_id,
            was_new_identity,
            was_merge,
            already_known: false,
        })
    }

    fn reingest(
        &mut self,
        detection_id: DetectionId,
        new: &NewDetection,
    ) -> Result<IngestResult, MetaSourceError> {
        let detection = self.store.detection_mut(detection_id).ok_or_else(|| {
            MetaSourceError::ReferenceInconsistency(format!(
                "key {} maps to missing detection {detection_id}",
                new.key
            ))
        })?;
        if detection.ra != new.ra || detection.dec != new.dec {
            warn!(
                key = %new.key,
                stored_ra = detection.ra,
                stored_dec = detection.dec,
                ra = new.ra,
                dec = new.dec,
                "re-ingested detection has a different position, stored position kept"
            );
        }
        let changed = detection.refresh_from(new);
        let owner = detection.owner.ok_or_else(|| {
            MetaSourceError::ReferenceInconsistency(format!(
                "detection {detection_id} has no owning identity"
            ))
        })?;

        let group_id = if changed {
            self.refresh_identity(owner)?
        } else {
            self.group_of(owner)?
        };
        debug!(detection = %detection_id, key = %new.key, changed, "detection re-ingested");
        Ok(IngestResult {
            detection_id,
            identity_id: owner,
            group_id,
            was_new_identity: false,
            was_merge: false,
            already_known: true,
        })
    }

    /// Store `detection` as a member of `identity_id` and index it.
    fn attach(&mut self, mut detection: Detection, identity_id: IdentityId) -> Result<(), MetaSourceError> {
        let (id, ra, dec) = (detection.id, detection.ra, detection.dec);
        let identity = self.store.identity_mut(identity_id).ok_or_else(|| {
            MetaSourceError::ReferenceInconsistency(format!(
                "cannot attach {id} to missing identity {identity_id}"
            ))
        })?;
        identity.add_member(id);
        detection.owner = Some(identity_id);
        self.store.insert_detection(detection);
        self.index.insert(id, ra, dec)?;
        Ok(())
    }

    /// Refresh master, group primary and computed flags after a change of `identity_id`.
    fn refresh_identity(&mut self, identity_id: IdentityId) -> Result<GroupId, MetaSourceError> {
        refresh_master(&mut self.store, identity_id)?;
        let group_id = self.group_of(identity_id)?;
        refresh_primary(&mut self.store, group_id)?;
        self.reclassify_if_computed(identity_id)?;
        Ok(group_id)
    }

    /// Ingest many detections, isolating bad records.
    ///
    /// Records refused for bad input (invalid position, missing record) are reported in the
    /// [`BatchReport`] and the batch goes on. A fatal error
    /// ([`MetaSourceError::is_fatal`]) aborts the batch and is returned.
    pub fn ingest_batch<I>(&mut self, records: I) -> Result<BatchReport, MetaSourceError>
    where
        I: IntoIterator<Item = NewDetection>,
    {
        batch::ingest_records(records, |record| self.ingest_detection(record))
    }

    /// Change the mutable fields of a stored detection.
    ///
    /// Return
    /// ----------
    /// * `Ok(true)` if a field changed; the owner's master, group primary and flags are refreshed.
    /// * [`MetaSourceError::NotFound`] for an unknown key.
    pub fn update_detection(
        &mut self,
        key: &DetectionKey,
        update: &DetectionUpdate,
    ) -> Result<bool, MetaSourceError> {
        let id = self
            .store
            .detection_by_key(key)
            .ok_or_else(|| MetaSourceError::NotFound(format!("detection {key}")))?;
        let detection = self.store.detection_mut(id).ok_or_else(|| {
            MetaSourceError::ReferenceInconsistency(format!("key {key} maps to missing detection {id}"))
        })?;
        let changed = detection.apply(update);
        let owner = detection.owner.ok_or_else(|| {
            MetaSourceError::ReferenceInconsistency(format!("detection {id} has no owning identity"))
        })?;
        if changed {
            self.refresh_identity(owner)?;
        }
        Ok(changed)
    }

    /// Delete every detection of `survey`.
    ///
    /// Identities left without members are deleted and removed from their group; groups left
    /// without identities are deleted. Remaining identities get a new master and their groups
    /// a new primary. Groups are never split.
    pub fn purge_survey(&mut self, survey: SurveyId) -> Result<PurgeReport, MetaSourceError> {
        let doomed: Vec<DetectionId> = self
            .store
            .detection_ids()
            .into_iter()
            .filter(|id| self.store.detection(*id).is_some_and(|d| d.survey() == survey))
            .collect();

        let mut touched = BTreeSet::new();
        for id in &doomed {
            self.index.remove(id);
            let owner = self.store.remove_detection(*id).and_then(|d| d.owner);
            if let Some(owner) = owner {
                if let Some(identity) = self.store.identity_mut(owner) {
                    identity.remove_member(*id);
                }
                touched.insert(owner);
            }
        }

        let groups_before = self.store.n_groups();
        let mut report = PurgeReport {
            detections_removed: doomed.len(),
            ..PurgeReport::default()
        };
        let mut remaining = Vec::new();
        for identity_id in touched {
            if self.get_identity_checked(identity_id)?.is_empty() {
                detach_identity(&mut self.store, identity_id)?;
                self.store.remove_identity(identity_id);
                report.identities_removed += 1;
            } else {
                refresh_master(&mut self.store, identity_id)?;
                remaining.push(identity_id);
            }
        }
        for identity_id in remaining {
            self.refresh_identity(identity_id)?;
        }
        report.groups_removed = groups_before - self.store.n_groups();

        info!(
            survey,
            detections = report.detections_removed,
            identities = report.identities_removed,
            groups = report.groups_removed,
            "survey purged"
        );
        Ok(report)
    }

    // ---------------------------------------------------------------------------------------------
    // Masters
    // ---------------------------------------------------------------------------------------------

    /// Pin `detection_id` as master of `identity_id`, bypassing the likelihood rule.
    ///
    /// The pin holds until [`clear_master_override`](Self::clear_master_override) or until the
    /// detection leaves the identity.
    pub fn override_master(
        &mut self,
        identity_id: IdentityId,
        detection_id: DetectionId,
    ) -> Result<(), MetaSourceError> {
        pin_master(&mut self.store, identity_id, detection_id)?;
        self.refresh_identity(identity_id)?;
        Ok(())
    }

    /// Return `identity_id` to the likelihood rule; `Ok(true)` if its master changed.
    pub fn clear_master_override(&mut self, identity_id: IdentityId) -> Result<bool, MetaSourceError> {
        let changed = unpin_master(&mut self.store, identity_id)?;
        self.refresh_identity(identity_id)?;
        Ok(changed)
    }

    // ---------------------------------------------------------------------------------------------
    // Optical counterparts and classification
    // ---------------------------------------------------------------------------------------------

    /// Insert or update an optical source; `Ok(true)` for a new key.
    ///
    /// Flags are not recomputed here: call
    /// [`recompute_all_classifications`](Self::recompute_all_classifications) once the optical
    /// catalog is loaded.
    pub fn ingest_optical(&mut self, source: OpticalSource) -> Result<bool, MetaSourceError> {
        self.optical.insert(source)
    }

    /// Drop every optical source.
    pub fn clear_optical(&mut self) {
        info!(n_sources = self.optical.len(), "optical catalog cleared");
        self.optical.clear();
    }

    /// Record a flux upper limit of `identity_id` for a survey it was not detected in.
    pub fn set_upper_limit(
        &mut self,
        identity_id: IdentityId,
        survey: SurveyId,
        flux: f64,
    ) -> Result<(), MetaSourceError> {
        self.store
            .identity_mut(identity_id)
            .ok_or_else(|| MetaSourceError::NotFound(format!("identity {identity_id}")))?
            .upper_limits
            .insert(survey, flux);
        self.reclassify_if_computed(identity_id)
    }

    /// Presence and flux of `identity_id` in each survey of the epoch sequence.
    ///
    /// When several members share a survey the master wins, then the best ranked member.
    /// Undetected epochs carry [`NO_DETECTION`] and the recorded upper limit, if any.
    pub fn epoch_summary(&self, identity_id: IdentityId) -> Result<Vec<EpochEntry>, MetaSourceError> {
        let identity = self.get_identity_checked(identity_id)?;
        let mut members = Vec::with_capacity(identity.members.len());
        for id in &identity.members {
            members.push(self.store.detection(*id).ok_or_else(|| {
                MetaSourceError::ReferenceInconsistency(format!(
                    "identity {identity_id} lists missing detection {id}"
                ))
            })?);
        }

        Ok(self
            .pre_class
            .epoch_sequence
            .iter()
            .map(|&survey| {
                let in_survey = || members.iter().copied().filter(move |d| d.survey() == survey);
                let chosen = in_survey()
                    .find(|d| Some(d.id) == identity.master)
                    .or_else(|| select_master(in_survey()));
                match chosen {
                    Some(d) => EpochEntry {
                        survey,
                        survey_index: d.key.survey_index,
                        flux: d.flux,
                    },
                    None => EpochEntry {
                        survey,
                        survey_index: NO_DETECTION,
                        flux: identity.upper_limits.get(&survey).copied(),
                    },
                }
            })
            .collect())
    }

    /// Recompute the pre-classification flags of `identity_id` from scratch.
    ///
    /// Counterparts are the optical sources within the master's matching radius around the
    /// master position.
    pub fn recompute_classification(
        &mut self,
        identity_id: IdentityId,
    ) -> Result<PreClassFlags, MetaSourceError> {
        let identity = self.get_identity_checked(identity_id)?;
        let master_id = identity.master.ok_or_else(|| {
            MetaSourceError::ReferenceInconsistency(format!("identity {identity_id} has no master"))
        })?;
        let master = self.store.detection(master_id).ok_or_else(|| {
            MetaSourceError::ReferenceInconsistency(format!(
                "identity {identity_id} master {master_id} is missing"
            ))
        })?;

        let radius = self.matching.matching_radius(master.pos_error);
        let counterparts = self.optical.cross_match(master.ra, master.dec, radius);
        let epochs = self.epoch_summary(identity_id)?;
        let flags = classify(&counterparts, &epochs, &self.pre_class);

        debug!(
            identity = %identity_id,
            n_counterparts = counterparts.len(),
            stellar = %flags.stellar,
            agn_color = ?flags.agn_color,
            transient = flags.transient_candidate,
            "classification recomputed"
        );
        self.store
            .identity_mut(identity_id)
            .ok_or_else(|| MetaSourceError::NotFound(format!("identity {identity_id}")))?
            .flags = Some(flags.clone());
        Ok(flags)
    }

    /// Recompute the flags of every identity; returns how many were classified.
    pub fn recompute_all_classifications(&mut self) -> Result<usize, MetaSourceError> {
        let ids = self.store.identity_ids();
        for id in &ids {
            self.recompute_classification(*id)?;
        }
        info!(n_identities = ids.len(), "classifications recomputed");
        Ok(ids.len())
    }

    fn reclassify_if_computed(&mut self, identity_id: IdentityId) -> Result<(), MetaSourceError> {
        let computed = self
            .store
            .identity(identity_id)
            .is_some_and(|i| i.flags.is_some());
        if computed {
            self.recompute_classification(identity_id)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------------------------------
    // Spatial queries
    // ---------------------------------------------------------------------------------------------

    /// Detections within `radius_arcsec` of a position, nearest first.
    pub fn query_radius(&self, ra: Degree, dec: Degree, radius_arcsec: ArcSec) -> Vec<(DetectionId, ArcSec)> {
        self.index
            .query_radius(ra, dec, arcsec_to_deg(radius_arcsec))
            .into_iter()
            .map(|(id, sep)| (id, deg_to_arcsec(sep)))
            .collect()
    }

    /// Primary identity of the group owning the detection nearest to a position.
    ///
    /// Return
    /// ----------
    /// * `Ok(None)` when no detection lies within `radius_arcsec`.
    /// * [`MetaSourceError::InvalidPosition`] for an out-of-range query position.
    pub fn nearest_primary(
        &self,
        ra: Degree,
        dec: Degree,
        radius_arcsec: ArcSec,
    ) -> Result<Option<IdentityId>, MetaSourceError> {
        validate_position(ra, dec)?;
        let Some((detection_id, _)) = self.index.nearest(ra, dec, arcsec_to_deg(radius_arcsec)) else {
            return Ok(None);
        };
        let owner = self
            .store
            .detection(detection_id)
            .and_then(|d| d.owner)
            .ok_or_else(|| {
                MetaSourceError::ReferenceInconsistency(format!(
                    "indexed detection {detection_id} has no owning identity"
                ))
            })?;
        let group_id = self.group_of(owner)?;
        Ok(Some(self.get_group_checked(group_id)?.primary))
    }

    /// Identities sharing the group of `identity_id`, itself included.
    pub fn group_members(&self, identity_id: IdentityId) -> Result<BTreeSet<IdentityId>, MetaSourceError> {
        group_resolver::group_members(&self.store, identity_id)
    }

    /// Check every structural invariant of the catalog.
    pub fn verify_invariants(&self) -> Result<(), MetaSourceError> {
        invariants::verify_invariants(&self.store, &self.index)
    }

    #[cfg(test)]
    pub(crate) fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}
