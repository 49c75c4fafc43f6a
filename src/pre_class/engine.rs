//! Rule cascade of the pre-classification flags.
//!
//! Every function here is pure: the same counterparts and epochs always give the same
//! flags, so recomputation is idempotent.
use std::collections::BTreeMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{SurveyId, NO_DETECTION},
    counterparts::{Counterpart, OpticalSurvey},
    pre_class::{PreClassFlags, PreClassParams, StellarFlag},
};

/// Presence and flux of an identity in one survey epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochEntry {
    pub survey: SurveyId,
    /// Within-survey index of the member detection, [`NO_DETECTION`] when undetected.
    pub survey_index: i64,
    /// Detected flux, or an upper limit when undetected.
    pub flux: Option<f64>,
}

impl EpochEntry {
    pub fn is_detected(&self) -> bool {
        self.survey_index != NO_DETECTION
    }
}

/// WISE AGN color criterion of a single source.
///
/// Return
/// ----------
/// * `None` if a magnitude is missing or not finite.
/// * `Some(w1 - w2 > threshold)` otherwise.
pub fn agn_color_flag(w1_mag: Option<f64>, w2_mag: Option<f64>, threshold: f64) -> Option<bool> {
    match (w1_mag, w2_mag) {
        (Some(w1), Some(w2)) if w1.is_finite() && w2.is_finite() => Some(w1 - w2 > threshold),
        _ => None,
    }
}

/// AGN color flag over every counterpart in the radius.
///
/// `None` when no counterpart has a defined color, `Some(false)` as soon as one defined
/// color fails the criterion, `Some(true)` when every defined color passes.
pub fn aggregate_agn_flag(counterparts: &[Counterpart<'_>], threshold: f64) -> Option<bool> {
    counterparts
        .iter()
        .filter_map(|c| agn_color_flag(c.source.w1_mag, c.source.w2_mag, threshold))
        .fold(None, |acc, flag| Some(acc.unwrap_or(true) && flag))
}

/// Stellar flag of a set of `star` classifications.
///
/// An unclassified counterpart counts as not-star; only an empty set gives
/// [`StellarFlag::NoCounterpart`].
pub fn stellar_flag<I>(stars: I) -> StellarFlag
where
    I: IntoIterator<Item = Option<bool>>,
{
    stars
        .into_iter()
        .map(|star| star.unwrap_or(false))
        .fold(StellarFlag::NoCounterpart, |acc, star| match (acc, star) {
            (StellarFlag::NoCounterpart, true) => StellarFlag::Star,
            (StellarFlag::NoCounterpart, false) => StellarFlag::NotStar,
            (StellarFlag::Star, false) | (StellarFlag::NotStar, true) => StellarFlag::Mixed,
            (acc, _) => acc,
        })
}

/// Stellar flag per optical survey present among `counterparts`.
pub fn stellar_by_survey(counterparts: &[Counterpart<'_>]) -> BTreeMap<OpticalSurvey, StellarFlag> {
    counterparts
        .iter()
        .map(|c| (c.source.key.survey, c.source.star))
        .into_group_map()
        .into_iter()
        .map(|(survey, stars)| (survey, stellar_flag(stars)))
        .collect()
}

/// Flux ratio `later / earlier`; undefined unless both fluxes are finite and `earlier > 0`.
pub fn flux_ratio(earlier: Option<f64>, later: Option<f64>) -> Option<f64> {
    match (earlier, later) {
        (Some(e), Some(l)) if e.is_finite() && l.is_finite() && e > 0.0 => Some(l / e),
        _ => None,
    }
}

/// Transient candidate predicate.
///
/// True iff for some consecutive pair `(e, e+1)` of `epochs`:
/// * the identity is undetected in `e`,
/// * the stellar flag is not [`StellarFlag::Star`],
/// * the AGN color flag is defined and false,
/// * `flux(e+1) / flux(e)` is defined and exceeds `ratio_threshold`.
///
/// A pair with a missing input is simply false.
pub fn transient_candidate(
    epochs: &[EpochEntry],
    stellar: StellarFlag,
    agn_color: Option<bool>,
    ratio_threshold: f64,
) -> bool {
    if stellar == StellarFlag::Star || agn_color != Some(false) {
        return false;
    }
    epochs.iter().tuple_windows().any(|(e, next)| {
        !e.is_detected() && flux_ratio(e.flux, next.flux).is_some_and(|r| r > ratio_threshold)
    })
}

/// Compute every flag of one identity.
///
/// Arguments
/// -----------------
/// * `counterparts`: optical sources within the master's matching radius.
/// * `epochs`: epoch summary in the order of `params.epoch_sequence`.
/// * `params`: thresholds.
pub fn classify(
    counterparts: &[Counterpart<'_>],
    epochs: &[EpochEntry],
    params: &PreClassParams,
) -> PreClassFlags {
    let stellar = stellar_flag(counterparts.iter().map(|c| c.source.star));
    let agn_color = aggregate_agn_flag(counterparts, params.agn_color_threshold);
    PreClassFlags {
        stellar,
        stellar_by_survey: stellar_by_survey(counterparts),
        agn_color,
        transient_candidate: transient_candidate(
            epochs,
            stellar,
            agn_color,
            params.transient_flux_ratio,
        ),
    }
}

#[cfg(test)]
mod pre_class_engine_test {
    use super::*;
    use crate::counterparts::OpticalSource;

    fn counterparts(sources: &[OpticalSource]) -> Vec<Counterpart<'_>> {
        sources
            .iter()
            .map(|source| Counterpart {
                source,
                separation_arcsec: 1.0,
            })
            .collect()
    }

    fn epoch(survey: SurveyId, detected: bool, flux: Option<f64>) -> EpochEntry {
        EpochEntry {
            survey,
            survey_index: if detected { 10 } else { NO_DETECTION },
            flux,
        }
    }

    #[test]
    fn test_agn_color_flag() {
        assert_eq!(agn_color_flag(Some(15.0), Some(14.1), 0.8), Some(true));
        assert_eq!(agn_color_flag(Some(15.0), Some(14.5), 0.8), Some(false));
        assert_eq!(agn_color_flag(None, Some(14.1), 0.8), None);
        assert_eq!(agn_color_flag(Some(15.0), None, 0.8), None);
        assert_eq!(agn_color_flag(Some(f64::NAN), Some(14.1), 0.8), None);
    }

    #[test]
    fn test_aggregate_agn_flag() {
        let none: Vec<OpticalSource> = vec![OpticalSource::new(OpticalSurvey::LS, 1, 0.0, 0.0)];
        assert_eq!(aggregate_agn_flag(&counterparts(&none), 0.8), None);

        let all_agn = vec![
            OpticalSource::new(OpticalSurvey::LS, 1, 0.0, 0.0).with_wise(15.0, 14.0),
            OpticalSource::new(OpticalSurvey::LS, 2, 0.0, 0.0).with_wise(16.0, 15.1),
            OpticalSource::new(OpticalSurvey::LS, 3, 0.0, 0.0),
        ];
        assert_eq!(aggregate_agn_flag(&counterparts(&all_agn), 0.8), Some(true));

        let one_fails = vec![
            OpticalSource::new(OpticalSurvey::LS, 1, 0.0, 0.0).with_wise(15.0, 14.0),
            OpticalSource::new(OpticalSurvey::LS, 2, 0.0, 0.0).with_wise(15.0, 14.9),
        ];
        assert_eq!(aggregate_agn_flag(&counterparts(&one_fails), 0.8), Some(false));
        assert_eq!(aggregate_agn_flag(&[], 0.8), None);
    }

    #[test]
    fn test_stellar_flag() {
        assert_eq!(stellar_flag([]), StellarFlag::NoCounterpart);
        assert_eq!(stellar_flag([None, None]), StellarFlag::NotStar);
        assert_eq!(stellar_flag([Some(true), Some(true)]), StellarFlag::Star);
        assert_eq!(stellar_flag([Some(true), None, Some(true)]), StellarFlag::Mixed);
        assert_eq!(stellar_flag([Some(false), None]), StellarFlag::NotStar);
        assert_eq!(stellar_flag([Some(false), Some(false)]), StellarFlag::NotStar);
        assert_eq!(stellar_flag([Some(false), Some(true), Some(false)]), StellarFlag::Mixed);
    }

    #[test]
    fn test_stellar_by_survey() {
        let sources = vec![
            OpticalSource::new(OpticalSurvey::GAIA, 1, 0.0, 0.0).with_star(true),
            OpticalSource::new(OpticalSurvey::LS, 1, 0.0, 0.0).with_star(false),
            OpticalSource::new(OpticalSurvey::LS, 2, 0.0, 0.0).with_star(true),
        ];
        let by_survey = stellar_by_survey(&counterparts(&sources));
        assert_eq!(by_survey[&OpticalSurvey::GAIA], StellarFlag::Star);
        assert_eq!(by_survey[&OpticalSurvey::LS], StellarFlag::Mixed);
        assert!(!by_survey.contains_key(&OpticalSurvey::SDSS));
    }

    #[test]
    fn test_flux_ratio() {
        assert_eq!(flux_ratio(Some(1.0), Some(8.0)), Some(8.0));
        assert_eq!(flux_ratio(Some(0.0), Some(8.0)), None);
        assert_eq!(flux_ratio(None, Some(8.0)), None);
        assert_eq!(flux_ratio(Some(1.0), None), None);
    }

    #[test]
    fn test_transient_candidate() {
        let epochs = [
            epoch(1, true, Some(1.0)),
            epoch(2, false, Some(1.0)),
            epoch(3, true, Some(8.0)),
        ];
        assert!(transient_candidate(&epochs, StellarFlag::NotStar, Some(false), 7.0));
        assert!(transient_candidate(&epochs, StellarFlag::NoCounterpart, Some(false), 7.0));
        assert!(transient_candidate(&epochs, StellarFlag::Mixed, Some(false), 7.0));
        assert!(!transient_candidate(&epochs, StellarFlag::Star, Some(false), 7.0));
        assert!(!transient_candidate(&epochs, StellarFlag::NotStar, Some(true), 7.0));
        assert!(!transient_candidate(&epochs, StellarFlag::NotStar, None, 7.0));
        assert!(!transient_candidate(&epochs, StellarFlag::NotStar, Some(false), 8.0));

        // bright in the next epoch but detected before
        let detected = [epoch(1, true, Some(1.0)), epoch(2, true, Some(10.0))];
        assert!(!transient_candidate(&detected, StellarFlag::NotStar, Some(false), 7.0));

        // missing upper limit
        let missing = [epoch(1, false, None), epoch(2, true, Some(10.0))];
        assert!(!transient_candidate(&missing, StellarFlag::NotStar, Some(false), 7.0));
    }

    #[test]
    fn test_classify_is_idempotent() {
        let sources = vec![
            OpticalSource::new(OpticalSurvey::LS, 1, 0.0, 0.0)
                .with_star(false)
                .with_wise(15.0, 14.5),
        ];
        let cps = counterparts(&sources);
        let epochs = [epoch(1, false, Some(0.5)), epoch(2, true, Some(5.0))];
        let params = PreClassParams::default();

        let flags = classify(&cps, &epochs, &params);
        assert_eq!(flags.stellar, StellarFlag::NotStar);
        assert_eq!(flags.agn_color, Some(false));
        assert!(flags.transient_candidate);
        assert_eq!(classify(&cps, &epochs, &params), flags);
    }
}
