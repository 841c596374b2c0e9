// src/demag/analytic.rs
//
// Closed-form references used by the validation binaries and tests.
//
// Aharoni, J. Appl. Phys. 83 (1998) 3432: average demagnetising factor of a uniformly
// magnetised rectangular prism with half-sides a, b (in-plane) and c (along the axis).

use std::f64::consts::PI;

use super::tensor::{dipole_tensor, XX, XY, XZ, YY, YZ, ZZ};

/// Average N along the c axis of a prism with half-sides (a, b, c).
pub fn aharoni_nz(a: f64, b: f64, c: f64) -> f64 {
    let ab = (a * a + b * b).sqrt();
    let bc = (b * b + c * c).sqrt();
    let ac = (a * a + c * c).sqrt();
    let r = (a * a + b * b + c * c).sqrt();
    let abc = a * b * c;

    let mut s = (b * b - c * c) / (2.0 * b * c) * ((r - a) / (r + a)).ln();
    s += (a * a - c * c) / (2.0 * a * c) * ((r - b) / (r + b)).ln();
    s += b / (2.0 * c) * ((ab + a) / (ab - a)).ln();
    s += a / (2.0 * c) * ((ab + b) / (ab - b)).ln();
    s += c / (2.0 * a) * ((bc - b) / (bc + b)).ln();
    s += c / (2.0 * b) * ((ac - a) / (ac + a)).ln();
    s += 2.0 * (a * b / (c * r)).atan();
    s += (a.powi(3) + b.powi(3) - 2.0 * c.powi(3)) / (3.0 * abc);
    s += (a * a + b * b - 2.0 * c * c) / (3.0 * abc) * r;
    s += c / (a * b) * (ac + bc);
    s -= (ab.powi(3) + bc.powi(3) + ac.powi(3)) / (3.0 * abc);
    s / PI
}

/// (Nxx, Nyy, Nzz) of an lx x ly x lz prism. The three sum to 1.
pub fn prism_factors(lx: f64, ly: f64, lz: f64) -> [f64; 3] {
    let (a, b, c) = (0.5 * lx, 0.5 * ly, 0.5 * lz);
    [aharoni_nz(b, c, a), aharoni_nz(c, a, b), aharoni_nz(a, b, c)]
}

/// Field (A/m) at displacement `r` from a point dipole of moment `m * volume`.
pub fn dipole_field(m: [f64; 3], r: [f64; 3], volume: f64) -> [f64; 3] {
    let n = dipole_tensor(r, volume);
    [
        -(n[XX] * m[0] + n[XY] * m[1] + n[XZ] * m[2]),
        -(n[XY] * m[0] + n[YY] * m[1] + n[YZ] * m[2]),
        -(n[XZ] * m[0] + n[YZ] * m[1] + n[ZZ] * m[2]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_factors_are_one_third() {
        for n in prism_factors(2.0, 2.0, 2.0) {
            assert!((n - 1.0 / 3.0).abs() < 1e-12, "N = {}", n);
        }
    }

    #[test]
    fn prism_factors_sum_to_one() {
        let n = prism_factors(6.0, 4.0, 2.0);
        assert!((n[0] + n[1] + n[2] - 1.0).abs() < 1e-12);
        assert!((n[2] - 0.538_790_305_9).abs() < 1e-9, "Nzz = {}", n[2]);
        assert!(n[0] < n[1] && n[1] < n[2]);
    }

    #[test]
    fn dipole_field_on_axis() {
        // On the moment axis H = 2 m V / (4 pi r^3).
        let h = dipole_field([0.0, 0.0, 1.0], [0.0, 0.0, 2.0], 1.0);
        let expect = 2.0 / (4.0 * PI * 8.0);
        assert!((h[2] - expect).abs() < 1e-15);
        assert!(h[0].abs() < 1e-15 && h[1].abs() < 1e-15);

        // In the equatorial plane H = -m V / (4 pi r^3).
        let h = dipole_field([0.0, 0.0, 1.0], [2.0, 0.0, 0.0], 1.0);
        assert!((h[2] + 1.0 / (4.0 * PI * 8.0)).abs() < 1e-15);
    }
}
