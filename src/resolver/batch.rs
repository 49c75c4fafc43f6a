use std::fmt;

use tracing::{error, info, warn};

use crate::{
    metasource_errors::MetaSourceError,
    resolver::IngestResult,
    sources::{DetectionKey, NewDetection},
};

/// Feed `records` one by one to `ingest`, isolating non-fatal failures.
///
/// A fatal error ([`MetaSourceError::is_fatal`]) stops the loop and is returned.
pub(crate) fn ingest_records<I, F>(records: I, mut ingest: F) -> Result<BatchReport, MetaSourceError>
where
    I: IntoIterator<Item = NewDetection>,
    F: FnMut(NewDetection) -> Result<IngestResult, MetaSourceError>,
{
    let mut report = BatchReport::default();
    for record in records {
        let key = record.key;
        match ingest(record) {
            Ok(result) => report.record(RecordOutcome::Ingested(result)),
            Err(err) if err.is_fatal() => {
                error!(%key, error = %err, "batch aborted");
                return Err(err);
            }
            Err(err) => {
                warn!(%key, error = %err, "record rejected");
                report.record(RecordOutcome::Rejected { key, error: err });
            }
        }
    }
    info!(%report, "batch ingested");
    Ok(report)
}

/// Outcome of one record of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Ingested(IngestResult),
    /// The record was refused (bad input); the rest of the batch went on.
    Rejected {
        key: DetectionKey,
        error: MetaSourceError,
    },
}

/// Per-record outcomes and counters of one ingested batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub outcomes: Vec<RecordOutcome>,
    pub n_new_identities: usize,
    pub n_joined: usize,
    pub n_merges: usize,
    pub n_reingested: usize,
    pub n_rejected: usize,
}

impl BatchReport {
    pub(crate) fn record(&mut self, outcome: RecordOutcome) {
        match &outcome {
            RecordOutcome::Ingested(result) if result.already_known => self.n_reingested += 1,
            RecordOutcome::Ingested(result) => {
                if result.was_new_identity {
                    self.n_new_identities += 1;
                } else {
                    self.n_joined += 1;
                }
                if result.was_merge {
                    self.n_merges += 1;
                }
            }
            RecordOutcome::Rejected { .. } => self.n_rejected += 1,
        }
        self.outcomes.push(outcome);
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Successfully ingested records, in input order.
    pub fn ingested(&self) -> impl Iterator<Item = &IngestResult> {
        self.outcomes.iter().filter_map(|o| match o {
            RecordOutcome::Ingested(result) => Some(result),
            RecordOutcome::Rejected { .. } => None,
        })
    }

    /// Rejected records with their reason, in input order.
    pub fn rejected(&self) -> impl Iterator<Item = (&DetectionKey, &MetaSourceError)> {
        self.outcomes.iter().filter_map(|o| match o {
            RecordOutcome::Rejected { key, error } => Some((key, error)),
            RecordOutcome::Ingested(_) => None,
        })
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} records: {} new identities, {} joined, {} merges, {} re-ingested, {} rejected",
            self.len(),
            self.n_new_identities,
            self.n_joined,
            self.n_merges,
            self.n_reingested,
            self.n_rejected
        )
    }
}
