// src/demag/tensor.rs
//
// Cell-averaged demagnetising tensor between two uniformly magnetised rectangular
// cells (Newell, Williams & Dunlop, JGR 98 (1993) 9551).
//
//   N_xx(r) = -1/(4 pi V) * sum_{i,j,k in -1,0,1} c_i c_j c_k f(x + i hx, y + j hy, z + k hz)
//   c_0 = -2, c_{+-1} = 1
//
// The other components follow by permuting axes (f for the diagonal, g for the
// off-diagonal terms). For a cube, N_xx(0) = 1/3 and the trace of N(0) is 1.
//
// Far away the 27-term second differences cancel catastrophically; beyond a caller
// supplied distance the point-dipole tensor is used instead.
//
// Component order everywhere: xx, yy, zz, xy, xz, yz.

use std::f64::consts::PI;

/// Symmetric 3x3 tensor as (xx, yy, zz, xy, xz, yz).
pub type Tensor6 = [f64; 6];

pub const XX: usize = 0;
pub const YY: usize = 1;
pub const ZZ: usize = 2;
pub const XY: usize = 3;
pub const XZ: usize = 4;
pub const YZ: usize = 5;

/// Parity of each component under x, y and z reflection (+1 even, -1 odd).
pub const PARITY: [[f64; 3]; 6] = [
    [1.0, 1.0, 1.0],
    [1.0, 1.0, 1.0],
    [1.0, 1.0, 1.0],
    [-1.0, -1.0, 1.0],
    [-1.0, 1.0, -1.0],
    [1.0, -1.0, -1.0],
];

// asinh(n/d) and atan(n/d), taking the value 0 where d vanishes: every such term
// carries a prefactor that vanishes with d.
#[inline]
fn asinh_ratio(n: f64, d: f64) -> f64 {
    if d == 0.0 {
        0.0
    } else {
        (n / d).asinh()
    }
}

#[inline]
fn atan_ratio(n: f64, d: f64) -> f64 {
    if d == 0.0 {
        0.0
    } else {
        (n / d).atan()
    }
}

/// Newell's f (diagonal components). Even in every argument.
pub fn newell_f(x: f64, y: f64, z: f64) -> f64 {
    let (x, y, z) = (x.abs(), y.abs(), z.abs());
    let (x2, y2, z2) = (x * x, y * y, z * z);
    let r = (x2 + y2 + z2).sqrt();
    if r == 0.0 {
        return 0.0;
    }

    let mut t = 0.5 * y * (z2 - x2) * asinh_ratio(y, (x2 + z2).sqrt());
    t += 0.5 * z * (y2 - x2) * asinh_ratio(z, (x2 + y2).sqrt());
    t -= x * y * z * atan_ratio(y * z, x * r);
    t += (2.0 * x2 - y2 - z2) * r / 6.0;
    t
}

/// Newell's g (off-diagonal components). Odd in x and y, even in z.
pub fn newell_g(x: f64, y: f64, z: f64) -> f64 {
    let sign = x.signum() * y.signum();
    let (x, y, z) = (x.abs(), y.abs(), z.abs());
    let (x2, y2, z2) = (x * x, y * y, z * z);
    let r = (x2 + y2 + z2).sqrt();
    if r == 0.0 {
        return 0.0;
    }

    let mut t = x * y * z * asinh_ratio(z, (x2 + y2).sqrt());
    t += y / 6.0 * (3.0 * z2 - y2) * asinh_ratio(x, (y2 + z2).sqrt());
    t += x / 6.0 * (3.0 * z2 - x2) * asinh_ratio(y, (x2 + z2).sqrt());
    t -= z * z2 / 6.0 * atan_ratio(x * y, z * r);
    t -= z * y2 / 2.0 * atan_ratio(x * z, y * r);
    t -= z * x2 / 2.0 * atan_ratio(y * z, x * r);
    t -= x * y * r / 3.0;
    sign * t
}

const STENCIL: [(f64, f64); 3] = [(-1.0, 1.0), (0.0, -2.0), (1.0, 1.0)];

/// Weighted 27-point second difference of `fun` around `p` with steps `h`.
fn second_difference(fun: fn(f64, f64, f64) -> f64, p: [f64; 3], h: [f64; 3]) -> f64 {
    let mut s = 0.0;
    for &(i, ci) in &STENCIL {
        for &(j, cj) in &STENCIL {
            for &(k, ck) in &STENCIL {
                s += ci * cj * ck * fun(p[0] + i * h[0], p[1] + j * h[1], p[2] + k * h[2]);
            }
        }
    }
    s
}

/// Newell tensor for centre-to-centre displacement `r` between cells of size `h`.
pub fn newell_tensor(r: [f64; 3], h: [f64; 3]) -> Tensor6 {
    let [x, y, z] = r;
    let [hx, hy, hz] = h;
    let pre = -1.0 / (4.0 * PI * hx * hy * hz);

    let mut n = [0.0; 6];
    n[XX] = pre * second_difference(newell_f, [x, y, z], [hx, hy, hz]);
    n[YY] = pre * second_difference(newell_f, [y, x, z], [hy, hx, hz]);
    n[ZZ] = pre * second_difference(newell_f, [z, y, x], [hz, hy, hx]);
    n[XY] = pre * second_difference(newell_g, [x, y, z], [hx, hy, hz]);
    n[XZ] = pre * second_difference(newell_g, [x, z, y], [hx, hz, hy]);
    n[YZ] = pre * second_difference(newell_g, [y, z, x], [hy, hz, hx]);
    n
}

/// Point-dipole tensor for a source of volume `volume` at displacement `r`:
/// N = -(V / 4 pi) (3 r r^T / |r|^5 - I / |r|^3).
pub fn dipole_tensor(r: [f64; 3], volume: f64) -> Tensor6 {
    let r2 = r[0] * r[0] + r[1] * r[1] + r[2] * r[2];
    if r2 == 0.0 {
        return [0.0; 6];
    }
    let rn = r2.sqrt();
    let inv3 = 1.0 / (r2 * rn);
    let inv5 = inv3 / r2;
    let pre = -volume / (4.0 * PI);

    [
        pre * (3.0 * r[0] * r[0] * inv5 - inv3),
        pre * (3.0 * r[1] * r[1] * inv5 - inv3),
        pre * (3.0 * r[2] * r[2] * inv5 - inv3),
        pre * 3.0 * r[0] * r[1] * inv5,
        pre * 3.0 * r[0] * r[2] * inv5,
        pre * 3.0 * r[1] * r[2] * inv5,
    ]
}

/// Demag tensor with the far-field switch: Newell within `far_field_cells` largest
/// cell edges, point dipole beyond.
pub fn demag_tensor(r: [f64; 3], h: [f64; 3], far_field_cells: f64) -> Tensor6 {
    let dist = (r[0] * r[0] + r[1] * r[1] + r[2] * r[2]).sqrt();
    let edge = h[0].max(h[1]).max(h[2]);
    if dist > far_field_cells * edge {
        dipole_tensor(r, h[0] * h[1] * h[2])
    } else {
        newell_tensor(r, h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_self_term_is_one_third() {
        let n = newell_tensor([0.0; 3], [2e-9, 2e-9, 2e-9]);
        for c in [XX, YY, ZZ] {
            assert!((n[c] - 1.0 / 3.0).abs() < 1e-10, "N[{}] = {}", c, n[c]);
        }
        for c in [XY, XZ, YZ] {
            assert!(n[c].abs() < 1e-12, "off-diagonal N[{}] = {}", c, n[c]);
        }
    }

    #[test]
    fn self_term_trace_is_one_for_elongated_cells() {
        let n = newell_tensor([0.0; 3], [1.0, 2.0, 3.0]);
        let trace = n[XX] + n[YY] + n[ZZ];
        assert!((trace - 1.0).abs() < 1e-9, "trace = {}", trace);
        assert!(n[XX] > n[YY] && n[YY] > n[ZZ]);
    }

    #[test]
    fn newell_approaches_dipole_far_away() {
        let h = [1.0, 1.0, 1.0];
        let r = [10.0, 7.0, 3.0];
        let n = newell_tensor(r, h);
        let d = dipole_tensor(r, 1.0);
        for c in 0..6 {
            let rel = (n[c] - d[c]).abs() / d[c].abs();
            assert!(rel < 1e-3, "component {}: newell {} dipole {}", c, n[c], d[c]);
        }
    }

    #[test]
    fn parity_table_matches_reflections() {
        let h = [1.0, 1.5, 0.5];
        let r = [2.0, 3.0, 1.5];
        let base = newell_tensor(r, h);
        for axis in 0..3 {
            let mut rr = r;
            rr[axis] = -rr[axis];
            let refl = newell_tensor(rr, h);
            for c in 0..6 {
                assert!(
                    (refl[c] - PARITY[c][axis] * base[c]).abs() < 1e-12,
                    "component {} axis {}",
                    c,
                    axis
                );
            }
        }
    }

    #[test]
    fn far_field_switch_selects_dipole() {
        let h = [1.0, 1.0, 1.0];
        let r = [5.0, 0.0, 0.0];
        assert_eq!(demag_tensor(r, h, 4.0), dipole_tensor(r, 1.0));
        assert_eq!(demag_tensor(r, h, 40.0), newell_tensor(r, h));
    }
}
