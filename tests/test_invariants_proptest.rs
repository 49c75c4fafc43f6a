use metasource::{
    constants::{arcsec_to_deg, SurveyId},
    metasource_errors::MetaSourceError,
    resolver::IdentityResolver,
    sky_geometry::normalize_ra,
    sources::{DetectionKey, DetectionUpdate},
    store::CatalogStore,
};
use proptest::prelude::*;

mod common;
use common::{assert_single_primary, checked_resolver, det};

/// Small sky patches, dense enough for frequent matches and merges.
const CENTERS: [(f64, f64); 3] = [(10.0, 20.0), (359.9995, 0.0), (0.0, 89.995)];

#[derive(Debug, Clone)]
enum Op {
    Ingest {
        center: usize,
        survey: SurveyId,
        index: i64,
        dx: f64,
        dy: f64,
        likelihood: Option<f64>,
    },
    Update {
        survey: SurveyId,
        index: i64,
        likelihood: f64,
    },
    Override {
        identity_pick: usize,
        member_pick: usize,
    },
    ClearOverride {
        identity_pick: usize,
    },
    Classify {
        identity_pick: usize,
    },
    Purge {
        survey: SurveyId,
    },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (
            0..CENTERS.len(),
            1..=4u32,
            0..25i64,
            -40.0..40.0f64,
            -40.0..40.0f64,
            prop::option::of(0.0..100.0f64),
        )
            .prop_map(|(center, survey, index, dx, dy, likelihood)| Op::Ingest {
                center,
                survey,
                index,
                dx,
                dy,
                likelihood,
            }),
        1 => (1..=4u32, 0..25i64, 0.0..100.0f64)
            .prop_map(|(survey, index, likelihood)| Op::Update { survey, index, likelihood }),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(identity_pick, member_pick)| {
            Op::Override {
                identity_pick,
                member_pick,
            }
        }),
        1 => any::<usize>().prop_map(|identity_pick| Op::ClearOverride { identity_pick }),
        1 => any::<usize>().prop_map(|identity_pick| Op::Classify { identity_pick }),
        1 => (1..=4u32).prop_map(|survey| Op::Purge { survey }),
    ]
}

fn pick<T: Copy>(items: &[T], n: usize) -> Option<T> {
    if items.is_empty() {
        None
    } else {
        Some(items[n % items.len()])
    }
}

fn apply(r: &mut IdentityResolver, op: &Op) {
    match *op {
        Op::Ingest {
            center,
            survey,
            index,
            dx,
            dy,
            likelihood,
        } => {
            let (ra0, dec0) = CENTERS[center];
            let ra = normalize_ra(ra0 + arcsec_to_deg(dx));
            let dec = (dec0 + arcsec_to_deg(dy)).min(90.0);
            let mut record = det(survey, index, ra, dec);
            if let Some(likelihood) = likelihood {
                record = record.with_likelihood(likelihood);
            }
            match r.ingest_detection(record) {
                Ok(result) => {
                    let identity = r.get_identity(result.identity_id).unwrap();
                    assert!(identity.contains(result.detection_id));
                    assert_eq!(identity.group, Some(result.group_id));
                }
                Err(err) => panic!("ingestion failed: {err}"),
            }
        }
        Op::Update {
            survey,
            index,
            likelihood,
        } => {
            let key = DetectionKey::new(survey, index);
            let known = r.detection_by_key(&key).is_some();
            match r.update_detection(&key, &DetectionUpdate::new().likelihood(likelihood)) {
                Ok(_) => assert!(known),
                Err(MetaSourceError::NotFound(_)) => assert!(!known),
                Err(err) => panic!("update failed: {err}"),
            }
        }
        Op::Override {
            identity_pick,
            member_pick,
        } => {
            let Some(id) = pick(&r.identity_ids(), identity_pick) else {
                return;
            };
            let members = r.get_identity(id).unwrap().members.to_vec();
            let Some(member) = pick(&members, member_pick) else {
                return;
            };
            r.override_master(id, member).unwrap();
            assert_eq!(r.get_identity(id).unwrap().master, Some(member));
        }
        Op::ClearOverride { identity_pick } => {
            if let Some(id) = pick(&r.identity_ids(), identity_pick) {
                r.clear_master_override(id).unwrap();
                assert!(!r.get_identity(id).unwrap().master_pinned);
            }
        }
        Op::Classify { identity_pick } => {
            if let Some(id) = pick(&r.identity_ids(), identity_pick) {
                let flags = r.recompute_classification(id).unwrap();
                assert_eq!(r.recompute_classification(id).unwrap(), flags);
            }
        }
        Op::Purge { survey } => {
            r.purge_survey(survey).unwrap();
            let remaining = r
                .query_radius(10.0, 20.0, 120.0)
                .into_iter()
                .filter(|(id, _)| r.get_detection(*id).unwrap().survey() == survey)
                .count();
            assert_eq!(remaining, 0);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_invariants_hold_after_every_call(ops in prop::collection::vec(arb_op(), 1..80)) {
        let mut r = checked_resolver();
        for op in &ops {
            apply(&mut r, op);
            prop_assert!(r.verify_invariants().is_ok(), "invariants broken after {:?}", op);
            for group_id in r.group_ids() {
                assert_single_primary(&r, group_id);
            }
        }
    }

    #[test]
    fn prop_ingestion_is_idempotent(ops in prop::collection::vec(arb_op(), 1..60)) {
        let mut r = checked_resolver();
        let records: Vec<_> = ops
            .iter()
            .filter_map(|op| match *op {
                Op::Ingest { center, survey, index, dx, dy, .. } => {
                    let (ra0, dec0) = CENTERS[center];
                    Some(det(
                        survey,
                        index,
                        normalize_ra(ra0 + arcsec_to_deg(dx)),
                        (dec0 + arcsec_to_deg(dy)).min(90.0),
                    ))
                }
                _ => None,
            })
            .collect();

        r.ingest_batch(records.clone()).unwrap();
        let snapshot = r.store().clone();
        let report = r.ingest_batch(records.clone()).unwrap();

        prop_assert_eq!(report.n_reingested, records.len());
        prop_assert_eq!(r.n_detections(), snapshot.n_detections());
        prop_assert_eq!(r.identity_ids(), snapshot.identity_ids());
        prop_assert_eq!(r.group_ids(), snapshot.group_ids());
        for id in r.identity_ids() {
            prop_assert_eq!(r.get_identity(id), snapshot.identity(id));
        }
    }
}
