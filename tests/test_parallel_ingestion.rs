use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use metasource::{
    catalog::SourceCatalog,
    constants::arcsec_to_deg,
    sources::{DetectionKey, NewDetection},
};

mod common;
use common::det;

const N_SOURCES: i64 = 40;
const N_EPOCHS: u32 = 4;

/// Epoch `k` sees every source shifted by `6k` arcseconds in declination, so consecutive
/// epochs match each other while epochs two apart do not.
fn epochs() -> Vec<Vec<NewDetection>> {
    (0..N_EPOCHS)
        .map(|k| {
            (0..N_SOURCES)
                .map(|i| {
                    let ra = 200.0 + 0.01 * i as f64;
                    let dec = -10.0 + arcsec_to_deg(6.0 * k as f64);
                    det(k + 1, i, ra, dec).with_likelihood((k + 1) as f64)
                })
                .collect()
        })
        .collect()
}

#[test]
fn test_parallel_epochs_give_serial_groups() {
    let parallel = SourceCatalog::new().unwrap();
    let reports = parallel.ingest_epochs_parallel(epochs()).unwrap();
    assert_eq!(reports.len(), N_EPOCHS as usize);
    assert!(reports.iter().all(|r| r.n_rejected == 0));
    parallel.verify_invariants().unwrap();

    let serial = SourceCatalog::new().unwrap();
    for batch in epochs() {
        serial.ingest_batch(batch).unwrap();
    }

    assert_eq!(parallel.n_detections(), (N_SOURCES * N_EPOCHS as i64) as usize);
    assert_eq!(parallel.n_groups(), N_SOURCES as usize);
    assert_eq!(parallel.n_groups(), serial.n_groups());

    // whatever the interleaving, every epoch of a source ends in the same group
    for i in 0..N_SOURCES {
        let groups: Vec<_> = (1..=N_EPOCHS)
            .map(|survey| {
                let detection = parallel
                    .detection_by_key(&DetectionKey::new(survey, i))
                    .unwrap();
                let owner = detection.owner().unwrap();
                parallel.get_identity(owner).unwrap().group.unwrap()
            })
            .collect();
        assert!(groups.windows(2).all(|w| w[0] == w[1]));
    }
}

#[test]
fn test_readers_run_alongside_writers() {
    let catalog = SourceCatalog::new().unwrap();
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        let writers: Vec<_> = epochs()
            .into_iter()
            .map(|batch| {
                let catalog = &catalog;
                scope.spawn(move || {
                    for record in batch {
                        catalog.ingest_detection(record).unwrap();
                    }
                })
            })
            .collect();

        let reader = scope.spawn(|| {
            let mut n_reads = 0usize;
            loop {
                for (id, sep) in catalog.query_radius(200.0, -10.0, 30.0) {
                    assert!(sep <= 30.0 + 1e-9);
                    assert!(catalog.get_detection(id).is_some());
                }
                n_reads += 1;
                if done.load(Ordering::Acquire) {
                    return n_reads;
                }
            }
        });

        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, Ordering::Release);
        assert!(reader.join().unwrap() > 0);
    });

    catalog.verify_invariants().unwrap();
    assert_eq!(catalog.n_groups(), N_SOURCES as usize);
}

#[test]
fn test_concurrent_reingestion_is_idempotent() {
    let catalog = SourceCatalog::new().unwrap();
    let batch = epochs().remove(0);
    catalog.ingest_batch(batch.clone()).unwrap();

    let reports = catalog
        .ingest_epochs_parallel(vec![batch.clone(), batch.clone(), batch])
        .unwrap();
    assert!(reports
        .iter()
        .all(|r| r.n_reingested == N_SOURCES as usize));
    assert_eq!(catalog.n_detections(), N_SOURCES as usize);
    assert_eq!(catalog.n_identities(), N_SOURCES as usize);
    catalog.verify_invariants().unwrap();
}
