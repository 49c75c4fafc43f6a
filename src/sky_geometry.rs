//! # Spherical geometry on the celestial sphere
//!
//! Pure functions over equatorial positions (right ascension / declination, **degrees**):
//!
//! * [`angular_separation`] – great-circle distance with the haversine formula,
//! * [`validate_position`] – range check applied before any record is created,
//! * [`unit_vector`] / [`chord_sq_for_angle`] – Cartesian helpers used by the spatial index
//!   to compare distances without trigonometry in the inner loop,
//! * [`ra_half_width`] – right-ascension half extent of a spherical cap, used to bound
//!   the cells a radius query has to visit.
//!
//! Right ascension differences are always reduced to `[0, 180]` degrees before use, so a pair
//! of points on both sides of the RA = 0/360 seam is handled like any other pair.
use nalgebra::Vector3;

use crate::{
    constants::{Degree, ANGLE_PAD_DEG, FULL_CIRCLE_DEG, MAX_ABS_DEC_DEG},
    metasource_errors::MetaSourceError,
};

/// Check that a position lies in RA ∈ [0, 360) and DEC ∈ [-90, 90].
///
/// Non-finite values are rejected as well.
pub fn validate_position(ra: Degree, dec: Degree) -> Result<(), MetaSourceError> {
    let ra_ok = ra.is_finite() && (0.0..FULL_CIRCLE_DEG).contains(&ra);
    let dec_ok = dec.is_finite() && (-MAX_ABS_DEC_DEG..=MAX_ABS_DEC_DEG).contains(&dec);
    if ra_ok && dec_ok {
        Ok(())
    } else {
        Err(MetaSourceError::InvalidPosition { ra, dec })
    }
}

/// Absolute right-ascension difference folded into `[0, 180]` degrees.
#[inline]
pub fn ra_difference(ra1: Degree, ra2: Degree) -> Degree {
    let d = (ra2 - ra1).abs() % FULL_CIRCLE_DEG;
    if d > FULL_CIRCLE_DEG / 2.0 {
        FULL_CIRCLE_DEG - d
    } else {
        d
    }
}

/// Great-circle distance between two sky positions.
///
/// Uses the haversine formulation, which stays accurate for the arcsecond-scale
/// separations the matcher works with:
///
/// ```text
/// hav(θ) = sin²(Δδ/2) + cos δ1 · cos δ2 · sin²(Δα/2)
/// θ      = 2 · asin(√hav(θ))
/// ```
///
/// Arguments
/// -----------------
/// * `ra1`, `dec1`: first position in degrees.
/// * `ra2`, `dec2`: second position in degrees.
///
/// Return
/// ----------
/// * The separation in **degrees**, in `[0, 180]`. Symmetric in its two points and exactly `0`
///   for identical points.
///
/// See also
/// ------------
/// * [`ra_difference`] – RA folding across the 0/360 seam.
pub fn angular_separation(ra1: Degree, dec1: Degree, ra2: Degree, dec2: Degree) -> Degree {
    let d_ra = ra_difference(ra1, ra2).to_radians();
    let d_dec = (dec2 - dec1).abs().to_radians();

    let sin_half_dec = (d_dec / 2.0).sin();
    let sin_half_ra = (d_ra / 2.0).sin();
    let hav = sin_half_dec * sin_half_dec
        + dec1.to_radians().cos() * dec2.to_radians().cos() * sin_half_ra * sin_half_ra;

    (2.0 * hav.clamp(0.0, 1.0).sqrt().asin()).to_degrees()
}

/// Unit vector of a sky position in the equatorial Cartesian frame.
#[inline]
pub fn unit_vector(ra: Degree, dec: Degree) -> Vector3<f64> {
    let (sin_ra, cos_ra) = ra.to_radians().sin_cos();
    let (sin_dec, cos_dec) = dec.to_radians().sin_cos();
    Vector3::new(cos_dec * cos_ra, cos_dec * sin_ra, sin_dec)
}

/// Squared chord length between two unit vectors separated by `angle` degrees.
///
/// `|u - v|² ≤ chord_sq_for_angle(r)` is equivalent to `angle(u, v) ≤ r` for `r ∈ [0, 180]`.
#[inline]
pub fn chord_sq_for_angle(angle: Degree) -> f64 {
    let half = (angle.clamp(0.0, 180.0) / 2.0).to_radians().sin();
    4.0 * half * half
}

/// Half-width in right ascension of the spherical cap of `radius` degrees centered at `dec`.
///
/// Return
/// ----------
/// * `Some(half_width)` in degrees, padded by a small epsilon.
/// * `None` if the cap touches or contains a celestial pole, in which case every
///   right ascension is reachable.
pub fn ra_half_width(dec: Degree, radius: Degree) -> Option<Degree> {
    if dec.abs() + radius >= MAX_ABS_DEC_DEG {
        return None;
    }
    let ratio = radius.to_radians().sin() / dec.to_radians().cos();
    if ratio >= 1.0 {
        return None;
    }
    let half = ratio.asin().to_degrees() + ANGLE_PAD_DEG;
    if half >= FULL_CIRCLE_DEG / 2.0 {
        None
    } else {
        Some(half)
    }
}

/// Wrap any right ascension into `[0, 360)`.
#[inline]
pub fn normalize_ra(ra: Degree) -> Degree {
    let wrapped = ra.rem_euclid(FULL_CIRCLE_DEG);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= FULL_CIRCLE_DEG {
        0.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod sky_geometry_test {
    use super::*;
    use crate::constants::arcsec_to_deg;
    use approx::assert_relative_eq;

    #[test]
    fn test_validate_position() {
        assert!(validate_position(0.0, 0.0).is_ok());
        assert!(validate_position(359.999, -90.0).is_ok());
        assert!(validate_position(180.0, 90.0).is_ok());

        assert_eq!(
            validate_position(360.0, 0.0),
            Err(MetaSourceError::InvalidPosition { ra: 360.0, dec: 0.0 })
        );
        assert!(validate_position(-0.1, 0.0).is_err());
        assert!(validate_position(10.0, 90.5).is_err());
        assert!(validate_position(f64::NAN, 0.0).is_err());
        assert!(validate_position(10.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_identical_points_are_zero() {
        assert_eq!(angular_separation(10.0, 20.0, 10.0, 20.0), 0.0);
        assert_eq!(angular_separation(0.0, 90.0, 0.0, 90.0), 0.0);
        assert_eq!(angular_separation(359.9, -45.0, 359.9, -45.0), 0.0);
    }

    #[test]
    fn test_symmetry() {
        let pairs = [
            (10.0, 20.0, 10.0003, 20.0002),
            (359.9, 0.0, 0.1, 0.0),
            (120.0, -89.9, 300.0, -89.95),
            (0.0, 0.0, 180.0, 0.0),
        ];
        for (ra1, dec1, ra2, dec2) in pairs {
            assert_eq!(
                angular_separation(ra1, dec1, ra2, dec2),
                angular_separation(ra2, dec2, ra1, dec1)
            );
        }
    }

    #[test]
    fn test_wraparound() {
        let sep = angular_separation(359.9, 0.0, 0.1, 0.0);
        assert_relative_eq!(sep, 0.2, epsilon = 1e-9);

        let sep = angular_separation(0.05, 30.0, 359.95, 30.0);
        assert_relative_eq!(sep, 0.1 * 30.0_f64.to_radians().cos(), epsilon = 1e-6);
    }

    #[test]
    fn test_known_separations() {
        assert_relative_eq!(angular_separation(0.0, 0.0, 90.0, 0.0), 90.0, epsilon = 1e-12);
        assert_relative_eq!(angular_separation(0.0, 0.0, 180.0, 0.0), 180.0, epsilon = 1e-9);
        assert_relative_eq!(angular_separation(0.0, -90.0, 0.0, 90.0), 180.0, epsilon = 1e-9);
        // any two RAs at the pole coincide
        assert!(angular_separation(10.0, 90.0, 250.0, 90.0) < 1e-9);

        // ~0.00036 deg ~ 1.3 arcsec
        let sep = angular_separation(10.0, 20.0, 10.0003, 20.0002);
        assert!(sep < arcsec_to_deg(1.3));
        assert!(sep > arcsec_to_deg(1.0));
    }

    #[test]
    fn test_near_pole() {
        // two points 0.01 deg from the pole on opposite meridians are 0.02 deg apart
        let sep = angular_separation(0.0, 89.99, 180.0, 89.99);
        assert_relative_eq!(sep, 0.02, epsilon = 1e-9);
    }

    #[test]
    fn test_chord_matches_angle() {
        let u = unit_vector(10.0, 20.0);
        let v = unit_vector(10.01, 20.02);
        let angle = angular_separation(10.0, 20.0, 10.01, 20.02);
        assert_relative_eq!((u - v).norm_squared(), chord_sq_for_angle(angle), epsilon = 1e-15);
        assert_relative_eq!(unit_vector(123.0, -45.0).norm(), 1.0, epsilon = 1e-15);
    }

    #[test]
    fn test_ra_half_width() {
        assert!(ra_half_width(89.99, 0.02).is_none());
        assert!(ra_half_width(-89.5, 1.0).is_none());

        let half = ra_half_width(0.0, 1.0).unwrap();
        assert_relative_eq!(half, 1.0, epsilon = 1e-6);

        let half = ra_half_width(60.0, 1.0).unwrap();
        assert!(half > 1.99 && half < 2.01);
    }

    #[test]
    fn test_normalize_ra() {
        assert_eq!(normalize_ra(-0.5), 359.5);
        assert_eq!(normalize_ra(360.0), 0.0);
        assert_eq!(normalize_ra(725.0), 5.0);
        assert!(normalize_ra(-1e-20) < 360.0);
    }
}
