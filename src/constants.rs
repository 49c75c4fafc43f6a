//! # Constants and type definitions for MetaSource
//!
//! This module centralizes the **unit conversions**, **sentinels**, and **common type
//! definitions** used throughout the `metasource` library.
//!
//! ## Overview
//!
//! - Angular unit conversions (degrees ↔ arcseconds)
//! - Validity bounds for equatorial coordinates
//! - Core type aliases used across the crate
//! - Hash map alias backed by [`ahash`](https://docs.rs/ahash)

use std::collections::HashMap;

use ahash::RandomState;

// -------------------------------------------------------------------------------------------------
// Unit conversions
// -------------------------------------------------------------------------------------------------

/// Number of arcseconds in one degree
pub const ARCSEC_PER_DEG: f64 = 3600.0;

/// Full circle in degrees, upper (exclusive) bound of right ascension
pub const FULL_CIRCLE_DEG: f64 = 360.0;

/// Absolute bound of declination in degrees
pub const MAX_ABS_DEC_DEG: f64 = 90.0;

/// Numerical epsilon used to pad angular search windows (degrees)
pub const ANGLE_PAD_DEG: f64 = 1e-9;

// -------------------------------------------------------------------------------------------------
// Sentinels
// -------------------------------------------------------------------------------------------------

/// Within-survey index reported for an epoch in which an identity has no detection.
pub const NO_DETECTION: i64 = -1;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Angle in degrees
pub type Degree = f64;
/// Angle in arcseconds
pub type ArcSec = f64;

/// Survey (epoch or catalog) number, e.g. `1` for eRASS1, `9` for the stacked eRASS:4
pub type SurveyId = u32;

/// Fast hash map used for every id-keyed table in the crate.
pub type FastMap<K, V> = HashMap<K, V, RandomState>;

/// Convert an angle from arcseconds to degrees.
#[inline]
pub fn arcsec_to_deg(value: ArcSec) -> Degree {
    value / ARCSEC_PER_DEG
}

/// Convert an angle from degrees to arcseconds.
#[inline]
pub fn deg_to_arcsec(value: Degree) -> ArcSec {
    value * ARCSEC_PER_DEG
}
