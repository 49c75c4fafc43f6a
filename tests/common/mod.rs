#![allow(dead_code)]

use metasource::{
    constants::{ArcSec, Degree, SurveyId},
    matching::MatchingParams,
    pre_class::PreClassParams,
    resolver::IdentityResolver,
    sources::{GroupId, NewDetection},
};

/// Positional error giving a matching radius of 9.9 arcseconds with the default parameters.
pub const POS_ERROR: ArcSec = 9.0;

/// In-memory resolver that checks every invariant after each ingestion.
pub fn checked_resolver() -> IdentityResolver {
    let params = MatchingParams::builder()
        .verify_after_ingest(true)
        .build()
        .unwrap();
    IdentityResolver::with_params(params, PreClassParams::default()).unwrap()
}

pub fn det(survey: SurveyId, index: i64, ra: Degree, dec: Degree) -> NewDetection {
    NewDetection::new(survey, index, ra, dec).with_pos_error(POS_ERROR)
}

/// Assert that exactly one identity of `group_id` carries `primary_object`, the group primary.
pub fn assert_single_primary(resolver: &IdentityResolver, group_id: GroupId) {
    let group = resolver.get_group(group_id).unwrap();
    let flagged: Vec<_> = group
        .members
        .iter()
        .filter(|id| resolver.get_identity(**id).unwrap().primary_object)
        .collect();
    assert_eq!(flagged, vec![&group.primary]);

    let largest = group
        .members
        .iter()
        .map(|id| resolver.get_identity(*id).unwrap().membership_count)
        .max()
        .unwrap();
    assert_eq!(
        resolver.get_identity(group.primary).unwrap().membership_count,
        largest
    );
}
