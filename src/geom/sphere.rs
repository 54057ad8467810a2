//! Spherical and octahedral geometry for the celestial sphere.
//!
//! Coordinates follow the mesh convention: the y axis points at the north
//! celestial pole, so `x = cos(dec) * sin(ra)`, `y = sin(dec)`,
//! `z = cos(dec) * cos(ra)`. RA 0, Dec 0 maps to `[0, 0, 1]`.

use std::f64::consts::TAU;

/// Convert (RA, Dec) in radians to a unit vector `[x, y, z]`.
pub fn radec_to_unit(ra: f64, dec: f64) -> [f64; 3] {
    let cos_dec = dec.cos();
    [cos_dec * ra.sin(), dec.sin(), cos_dec * ra.cos()]
}

/// Convert a vector to (RA, Dec) in radians.
/// RA is in `[0, 2*pi)`, Dec is in `[-pi/2, pi/2]`.
///
/// The vector need not be exactly unit length; Dec is taken from the
/// clamped y component, as nearest-neighbour pruning projects query points
/// onto splitting planes and the result is slightly off the sphere.
pub fn vector_to_radec(v: [f64; 3]) -> (f64, f64) {
    let dec = v[1].clamp(-1.0, 1.0).asin();
    let mut ra = f64::atan2(v[0], v[2]);
    if ra < 0.0 {
        ra += TAU;
    }
    (ra, dec)
}

/// Map a unit vector onto the octahedron `|x| + |y| + |z| = 1` by squaring
/// each component and keeping its sign.
///
/// The flattened mesh has planar triangle faces, so point-in-trixel tests
/// reduce to three linear edge checks.
pub fn unit_to_octahedron(v: [f64; 3]) -> [f64; 3] {
    [
        v[0].abs() * v[0],
        v[1].abs() * v[1],
        v[2].abs() * v[2],
    ]
}

/// Inverse of [`unit_to_octahedron`]: sign-preserving square root back to
/// the unit sphere, then to (RA, Dec).
///
/// Any point on the octahedron surface maps back onto the unit sphere,
/// since `x'^2 + y'^2 + z'^2 = |x| + |y| + |z| = 1`.
pub fn octahedron_to_radec(v: [f64; 3]) -> (f64, f64) {
    let unsquare = |c: f64| c.signum() * c.abs().sqrt();
    vector_to_radec([unsquare(v[0]), unsquare(v[1]), unsquare(v[2])])
}

/// Midpoint of two octahedron-mapped points.
///
/// Subdivision midpoints stay on the parent face's plane, so this is the
/// plain componentwise mean with no renormalization.
pub fn octahedron_midpoint(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        (a[0] + b[0]) / 2.0,
        (a[1] + b[1]) / 2.0,
        (a[2] + b[2]) / 2.0,
    ]
}

/// Great-circle angular separation between two sky positions, in radians.
///
/// Uses the `atan2(sqrt(x^2 + y^2), z)` form, which stays accurate for
/// very small separations where the plain `acos` of a dot product loses
/// precision.
pub fn angular_separation(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let delta = ra2 - ra1;
    let x = dec1.cos() * dec2.sin() - dec1.sin() * dec2.cos() * delta.cos();
    let y = dec2.cos() * delta.sin();
    let z = dec1.sin() * dec2.sin() + dec1.cos() * dec2.cos() * delta.cos();

    f64::atan2((x * x + y * y).sqrt(), z)
}

/// Equatorial position angle of the second position relative to the first,
/// in radians.
pub fn position_angle(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let sin_dec = dec1.sin();
    let cos_dec = dec1.cos();
    let ra_delta = ra1 - ra2;
    let cos_ra_delta = ra_delta.cos();
    let sin_pdec = dec2.sin();
    let cos_pdec = dec2.cos();

    let k = 2.0 / (1.0 + sin_pdec * ra1.sin() + cos_pdec * cos_dec * cos_ra_delta);

    let x = k * (cos_dec * ra_delta.sin());
    let y = k * (cos_pdec * sin_dec - sin_pdec * cos_dec * cos_ra_delta);

    f64::atan2(y, x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    const EPS: f64 = 1e-12;

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!(
            (a - b).abs() < tol,
            "expected {a} ~= {b} (diff = {})",
            (a - b).abs()
        );
    }

    fn assert_vec_close(a: [f64; 3], b: [f64; 3], tol: f64) {
        for i in 0..3 {
            assert_close(a[i], b[i], tol);
        }
    }

    #[test]
    fn known_positions() {
        assert_vec_close(radec_to_unit(0.0, 0.0), [0.0, 0.0, 1.0], EPS);
        assert_vec_close(radec_to_unit(FRAC_PI_2, 0.0), [1.0, 0.0, 0.0], EPS);
        assert_vec_close(radec_to_unit(0.0, FRAC_PI_2), [0.0, 1.0, 0.0], EPS);
        assert_vec_close(radec_to_unit(0.0, -FRAC_PI_2), [0.0, -1.0, 0.0], EPS);
        assert_vec_close(radec_to_unit(PI, 0.0), [0.0, 0.0, -1.0], EPS);
    }

    #[test]
    fn roundtrip_radec_unit() {
        let cases = [
            (0.0, 0.0),
            (PI, 0.0),
            (PI / 4.0, PI / 6.0),
            (3.0 * PI / 2.0, -PI / 4.0),
            (0.0, FRAC_PI_2),
            (0.0, -FRAC_PI_2),
            (1.234, 0.567),
        ];
        for (ra, dec) in cases {
            let (ra2, dec2) = vector_to_radec(radec_to_unit(ra, dec));
            assert_close(dec, dec2, EPS);
            let dra = ((ra - ra2 + PI) % TAU + TAU) % TAU - PI;
            assert_close(dra, 0.0, EPS);
        }
    }

    #[test]
    fn octahedron_points_lie_on_surface() {
        let cases = [
            (0.1, 0.2),
            (2.0, -0.7),
            (4.5, 1.2),
            (PI, 0.0),
            (0.0, FRAC_PI_2),
        ];
        for (ra, dec) in cases {
            let o = unit_to_octahedron(radec_to_unit(ra, dec));
            let l1 = o[0].abs() + o[1].abs() + o[2].abs();
            assert_close(l1, 1.0, EPS);
        }
    }

    #[test]
    fn roundtrip_radec_octahedron() {
        let cases = [(0.3, 0.4), (1.9, -0.9), (5.8, 0.05), (3.3, -1.4)];
        for (ra, dec) in cases {
            let o = unit_to_octahedron(radec_to_unit(ra, dec));
            let (ra2, dec2) = octahedron_to_radec(o);
            assert_close(ra, ra2, 1e-10);
            assert_close(dec, dec2, 1e-10);
        }
    }

    #[test]
    fn midpoint_stays_on_face() {
        // Two points in the same octant; midpoint stays on the face plane.
        let a = unit_to_octahedron(radec_to_unit(0.3, 0.4));
        let b = unit_to_octahedron(radec_to_unit(0.9, 0.7));
        let m = octahedron_midpoint(a, b);
        let l1 = m[0].abs() + m[1].abs() + m[2].abs();
        assert_close(l1, 1.0, EPS);
    }

    #[test]
    fn separation_known_angles() {
        assert_close(angular_separation(0.0, 0.0, FRAC_PI_2, 0.0), FRAC_PI_2, EPS);
        assert_close(angular_separation(0.0, 0.0, PI, 0.0), PI, EPS);
        assert_close(
            angular_separation(0.0, FRAC_PI_2, 0.0, -FRAC_PI_2),
            PI,
            EPS,
        );
        assert_close(angular_separation(1.1, 0.3, 1.1, 0.3), 0.0, EPS);
    }

    #[test]
    fn separation_small_angles() {
        // The atan2 form must not collapse tiny separations to zero.
        let d = angular_separation(1.0, 0.2, 1.0 + 1e-9, 0.2);
        assert!(d > 0.0);
        assert_close(d, 1e-9 * 0.2f64.cos(), 1e-15);
    }

    #[test]
    fn separation_symmetric() {
        let d1 = angular_separation(0.4, -0.2, 2.1, 0.9);
        let d2 = angular_separation(2.1, 0.9, 0.4, -0.2);
        assert_close(d1, d2, EPS);
    }

    #[test]
    fn position_angle_quadrants() {
        // Neighbour due east of the reference sits along +x.
        let pa = position_angle(0.0, 0.0, 0.01, 0.0);
        assert_close(pa.abs(), PI, 1e-6);

        // Neighbour due north.
        let pa = position_angle(0.0, 0.0, 0.0, 0.01);
        assert_close(pa, -FRAC_PI_2, 1e-6);
    }
}
