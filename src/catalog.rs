//! # Thread-safe catalog façade
//!
//! [`SourceCatalog`] shares one [`IdentityResolver`] between threads behind a
//! [`parking_lot::RwLock`]:
//!
//! * lookups and radius queries take the read lock and run concurrently,
//! * every mutation takes the write lock for its whole *find candidates → decide → apply*
//!   critical section, so two merges touching the same identities never interleave.
//!
//! One global lock serializes all writers. Parallel ingestion therefore scales with the
//! read side only: matching work of concurrent writers is not overlapped. This is the
//! throughput limit of the current design.
//!
//! Readers get owned copies of the records, never references into the locked state.
use std::collections::BTreeSet;
use std::thread;

use parking_lot::RwLock;
use tracing::info;

use crate::{
    constants::{ArcSec, Degree, SurveyId},
    counterparts::OpticalSource,
    matching::MatchingParams,
    metasource_errors::MetaSourceError,
    pre_class::{engine::EpochEntry, PreClassFlags, PreClassParams},
    resolver::{ingest_records, BatchReport, IdentityResolver, IngestResult, PurgeReport},
    sources::{
        Detection, DetectionId, DetectionKey, DetectionUpdate, Group, GroupId, Identity,
        IdentityId, NewDetection,
    },
    store::{CatalogStore, MemoryStore},
};

/// Shared, lock-protected identity resolution engine.
#[derive(Debug)]
pub struct SourceCatalog<S = MemoryStore> {
    inner: RwLock<IdentityResolver<S>>,
}

impl SourceCatalog<MemoryStore> {
    pub fn new() -> Result<Self, MetaSourceError> {
        Ok(Self::from_resolver(IdentityResolver::new()?))
    }

    pub fn with_params(
        matching: MatchingParams,
        pre_class: PreClassParams,
    ) -> Result<Self, MetaSourceError> {
        Ok(Self::from_resolver(IdentityResolver::with_params(
            matching, pre_class,
        )?))
    }
}

impl<S: CatalogStore> SourceCatalog<S> {
    pub fn from_resolver(resolver: IdentityResolver<S>) -> Self {
        SourceCatalog {
            inner: RwLock::new(resolver),
        }
    }

    pub fn into_inner(self) -> IdentityResolver<S> {
        self.inner.into_inner()
    }

    /// Run `f` with shared access to the engine.
    pub fn read<R>(&self, f: impl FnOnce(&IdentityResolver<S>) -> R) -> R {
        f(&self.inner.read())
    }

    /// Run `f` with exclusive access to the engine.
    pub fn write<R>(&self, f: impl FnOnce(&mut IdentityResolver<S>) -> R) -> R {
        f(&mut self.inner.write())
    }

    pub fn ingest_detection(&self, new: NewDetection) -> Result<IngestResult, MetaSourceError> {
        self.inner.write().ingest_detection(new)
    }

    /// Ingest a batch, taking the write lock once per record.
    ///
    /// Other writers may interleave between records; each record's own match and merge is
    /// atomic. Bad records are isolated, fatal errors abort the batch.
    pub fn ingest_batch<I>(&self, records: I) -> Result<BatchReport, MetaSourceError>
    where
        I: IntoIterator<Item = NewDetection>,
    {
        ingest_records(records, |record| self.ingest_detection(record))
    }

    pub fn get_identity(&self, id: IdentityId) -> Option<Identity> {
        self.inner.read().get_identity(id).cloned()
    }

    pub fn get_group(&self, id: GroupId) -> Option<Group> {
        self.inner.read().get_group(id).cloned()
    }

    pub fn get_detection(&self, id: DetectionId) -> Option<Detection> {
        self.inner.read().get_detection(id).cloned()
    }

    pub fn detection_by_key(&self, key: &DetectionKey) -> Option<Detection> {
        self.inner.read().detection_by_key(key).cloned()
    }

    pub fn get_identity_checked(&self, id: IdentityId) -> Result<Identity, MetaSourceError> {
        self.inner.read().get_identity_checked(id).cloned()
    }

    pub fn get_group_checked(&self, id: GroupId) -> Result<Group, MetaSourceError> {
        self.inner.read().get_group_checked(id).cloned()
    }

    pub fn recompute_classification(
        &self,
        identity_id: IdentityId,
    ) -> Result<PreClassFlags, MetaSourceError> {
        self.inner.write().recompute_classification(identity_id)
    }

    pub fn recompute_all_classifications(&self) -> Result<usize, MetaSourceError> {
        self.inner.write().recompute_all_classifications()
    }

    pub fn override_master(
        &self,
        identity_id: IdentityId,
        detection_id: DetectionId,
    ) -> Result<(), MetaSourceError> {
        self.inner.write().override_master(identity_id, detection_id)
    }

    pub fn clear_master_override(&self, identity_id: IdentityId) -> Result<bool, MetaSourceError> {
        self.inner.write().clear_master_override(identity_id)
    }

    pub fn update_detection(
        &self,
        key: &DetectionKey,
        update: &DetectionUpdate,
    ) -> Result<bool, MetaSourceError> {
        self.inner.write().update_detection(key, update)
    }

    pub fn set_upper_limit(
        &self,
        identity_id: IdentityId,
        survey: SurveyId,
        flux: f64,
    ) -> Result<(), MetaSourceError> {
        self.inner.write().set_upper_limit(identity_id, survey, flux)
    }

    pub fn ingest_optical(&self, source: OpticalSource) -> Result<bool, MetaSourceError> {
        self.inner.write().ingest_optical(source)
    }

    pub fn clear_optical(&self) {
        self.inner.write().clear_optical()
    }

    pub fn purge_survey(&self, survey: SurveyId) -> Result<PurgeReport, MetaSourceError> {
        self.inner.write().purge_survey(survey)
    }

    pub fn nearest_primary(
        &self,
        ra: Degree,
        dec: Degree,
        radius_arcsec: ArcSec,
    ) -> Result<Option<IdentityId>, MetaSourceError> {
        self.inner.read().nearest_primary(ra, dec, radius_arcsec)
    }

    pub fn query_radius(
        &self,
        ra: Degree,
        dec: Degree,
        radius_arcsec: ArcSec,
    ) -> Vec<(DetectionId, ArcSec)> {
        self.inner.read().query_radius(ra, dec, radius_arcsec)
    }

    pub fn epoch_summary(&self, identity_id: IdentityId) -> Result<Vec<EpochEntry>, MetaSourceError> {
        self.inner.read().epoch_summary(identity_id)
    }

    pub fn group_members(&self, identity_id: IdentityId) -> Result<BTreeSet<IdentityId>, MetaSourceError> {
        self.inner.read().group_members(identity_id)
    }

    pub fn verify_invariants(&self) -> Result<(), MetaSourceError> {
        self.inner.read().verify_invariants()
    }

    pub fn n_detections(&self) -> usize {
        self.inner.read().n_detections()
    }

    pub fn n_identities(&self) -> usize {
        self.inner.read().n_identities()
    }

    pub fn n_groups(&self) -> usize {
        self.inner.read().n_groups()
    }
}

impl<S: CatalogStore + Send + Sync> SourceCatalog<S> {
    /// Ingest independent epoch batches on parallel threads.
    ///
    /// Arguments
    /// -----------------
    /// * `epochs`: one batch of detections per epoch.
    ///
    /// Return
    /// ----------
    /// * One [`BatchReport`] per input batch, in input order. The final state is the one some
    ///   serial order of the individual records would produce.
    /// * The first fatal error met by any thread. Batches on other threads may have been
    ///   partially ingested.
    pub fn ingest_epochs_parallel(
        &self,
        epochs: Vec<Vec<NewDetection>>,
    ) -> Result<Vec<BatchReport>, MetaSourceError> {
        let n_epochs = epochs.len();
        let results: Vec<Result<BatchReport, MetaSourceError>> = thread::scope(|scope| {
            let handles: Vec<_> = epochs
                .into_iter()
                .map(|batch| scope.spawn(move || self.ingest_batch(batch)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(MetaSourceError::ReferenceInconsistency(
                            "ingestion thread panicked".into(),
                        ))
                    })
                })
                .collect()
        });

        let reports = results.into_iter().collect::<Result<Vec<_>, _>>()?;
        info!(
            n_epochs,
            n_records = reports.iter().map(BatchReport::len).sum::<usize>(),
            "parallel ingestion done"
        );
        Ok(reports)
    }
}

#[cfg(test)]
mod catalog_test {
    use super::*;

    #[test]
    fn test_shared_lookups_return_copies() {
        let catalog = SourceCatalog::new().unwrap();
        let result = catalog
            .ingest_detection(NewDetection::new(1, 0, 10.0, 20.0).with_likelihood(3.0))
            .unwrap();
        let identity = catalog.get_identity(result.identity_id).unwrap();
        assert_eq!(identity.membership_count, 1);
        assert_eq!(catalog.get_group(result.group_id).unwrap().primary, result.identity_id);
        assert!(catalog.get_identity(IdentityId(9)).is_none());
        assert_eq!(catalog.read(|r| r.n_detections()), 1);
    }

    #[test]
    fn test_parallel_epochs_match_serial() {
        let epochs: Vec<Vec<NewDetection>> = (1..=4u32)
            .map(|survey| {
                (0..50)
                    .map(|i| {
                        // same sources in every epoch, offset by a fraction of an arcsecond
                        let jitter = survey as f64 * 1e-5;
                        NewDetection::new(survey, i, 10.0 + i as f64 * 0.01 + jitter, 20.0)
                            .with_pos_error(3.0)
                    })
                    .collect()
            })
            .collect();

        let parallel = SourceCatalog::new().unwrap();
        let reports = parallel.ingest_epochs_parallel(epochs.clone()).unwrap();
        assert_eq!(reports.len(), 4);
        parallel.verify_invariants().unwrap();

        let serial = SourceCatalog::new().unwrap();
        for batch in epochs {
            serial.ingest_batch(batch).unwrap();
        }

        assert_eq!(parallel.n_detections(), 200);
        assert_eq!(parallel.n_identities(), serial.n_identities());
        assert_eq!(parallel.n_groups(), serial.n_groups());
        assert_eq!(serial.n_identities(), 50);
    }
}
