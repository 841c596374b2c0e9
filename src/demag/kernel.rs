// src/demag/kernel.rs
//
// Frequency-domain demag kernel K = -N (so H = K * M for M, H in A/m).
//
// Build:
// 1) evaluate N on the non-negative displacement octant (parallel),
// 2) per component, mirror the octant into the wrapped padded array with the
//    component's reflection parity, summing periodic images into their bins,
// 3) forward FFT, keep the independent quadrant.
//
// Displacement range per axis (image sums follow MuMax kernel ranges):
//   open:          |s| <= n - 1
//   P images:      |s| <= n * P - 1   (wrapped modulo n)
//
// Storage (symmetry reduced, all real):
//   3D/2D: kx in [0, Nx/2], ky in [0, Ny/2], kz in [0, Nz/2]. Negative ky / kz are
//          looked up by reflection; xy, xz, yz change sign with their odd axes.
//          The 2D kernel keeps xx, yy, zz, xy only (xz, yz vanish in a film).
//   Q2D:   kx in [0, Nx/2], ky in [0, Ny/2], z displacement d in [0, nz). xz and yz
//          are purely imaginary after the x/y transform; their imaginary parts are
//          stored and they are odd in d.

use rustfft::num_complex::Complex64;
use std::time::Instant;
use tracing::debug;

use super::tensor::{demag_tensor, Tensor6, PARITY, XX, XY, XZ, YY, YZ, ZZ};
use crate::convolution::backend::ComputeBackend;
use crate::convolution::dims::{ConvDims, TransformMode};
use crate::convolution::multiply::KernelMultiplication;
use crate::convolution::transform::fft3_forward;
use crate::error::{checked_len, try_alloc, ConvError, ConvResult};

/// Demag kernel for one convolution layout.
#[derive(Debug)]
pub struct DemagKernel {
    dims: ConvDims,
    extent: [usize; 3],
    far_field_cells: f64,
    comps: [Vec<f64>; 6],
}

#[inline]
fn wrap_index(s: isize, n: usize) -> usize {
    s.rem_euclid(n as isize) as usize
}

/// Reflected lookup index and sign for frequency `j` of an axis of length `n`.
#[inline]
fn mirror(j: usize, n: usize) -> (usize, f64) {
    if j > n / 2 {
        (n - j, -1.0)
    } else {
        (j, 1.0)
    }
}

#[inline]
fn signed(reflect: bool, s: usize) -> isize {
    if reflect {
        -(s as isize)
    } else {
        s as isize
    }
}

pub(crate) fn components_for(mode: TransformMode) -> &'static [usize] {
    match mode {
        TransformMode::TwoD => &[XX, YY, ZZ, XY],
        _ => &[XX, YY, ZZ, XY, XZ, YZ],
    }
}

impl DemagKernel {
    /// Build the kernel for `dims`.
    pub fn build<B: ComputeBackend>(
        dims: &ConvDims,
        far_field_cells: f64,
        backend: &B,
    ) -> ConvResult<Self> {
        let t0 = Instant::now();
        let grid = dims.grid;
        let h = grid.cell();
        let oct = dims.kernel_octant()?;

        // 1) Octant of K = -N.
        let octant_len = checked_len(&oct, "kernel octant")?;
        let mut octant: Vec<Tensor6> = try_alloc(octant_len, [0.0; 6], "kernel octant")?;
        backend.chunks(&mut octant, oct[0], |row, out| {
            let b = row % oct[1];
            let c = row / oct[1];
            for (a, v) in out.iter_mut().enumerate() {
                let r = [a as f64 * h[0], b as f64 * h[1], c as f64 * h[2]];
                let n = demag_tensor(r, h, far_field_cells);
                *v = n.map(|x| -x);
            }
        });

        let mode = dims.mode();
        let extent = dims.kernel_extent();
        let [nxp, nyp, nzp] = dims.padded;
        // Quasi-2D layers are transformed in x/y only.
        let (fft_n, layers) = match mode {
            TransformMode::Quasi2D => ([nxp, nyp, 1], grid.nz),
            _ => ([nxp, nyp, nzp], 1),
        };
        let dense_len = checked_len(&fft_n, "kernel transform buffer")?;
        let mut dense = try_alloc(dense_len, Complex64::default(), "kernel transform buffer")?;
        let mut tmp = try_alloc(dense_len, Complex64::default(), "kernel transform buffer")?;

        let stored = checked_len(&extent, "demag kernel")?;
        let mut comps: [Vec<f64>; 6] = Default::default();
        for &comp in components_for(mode) {
            comps[comp] = try_alloc(stored, 0.0, "demag kernel")?;
        }

        for &comp in components_for(mode) {
            let imaginary = mode == TransformMode::Quasi2D && (comp == XZ || comp == YZ);
            let parity = PARITY[comp];

            for layer in 0..layers {
                dense.fill(Complex64::default());

                // 2) Mirror with parity into wrapped bins.
                let (c_lo, c_hi) = match mode {
                    TransformMode::Quasi2D => (layer, layer + 1),
                    _ => (0, oct[2]),
                };
                for c in c_lo..c_hi {
                    for b in 0..oct[1] {
                        for a in 0..oct[0] {
                            let v = octant[a + oct[0] * (b + oct[1] * c)][comp];
                            if v == 0.0 {
                                continue;
                            }
                            for rx in [false, true] {
                                if rx && a == 0 {
                                    continue;
                                }
                                let ix = wrap_index(signed(rx, a), nxp);
                                for ry in [false, true] {
                                    if ry && b == 0 {
                                        continue;
                                    }
                                    let iy = wrap_index(signed(ry, b), nyp);
                                    // Quasi-2D layers are indexed by the non-negative displacement.
                                    let z_refl: &[bool] = match mode {
                                        TransformMode::Quasi2D => &[false],
                                        _ if c == 0 => &[false],
                                        _ => &[false, true],
                                    };
                                    for &rz in z_refl {
                                        let iz = match mode {
                                            TransformMode::Quasi2D => 0,
                                            _ => wrap_index(signed(rz, c), nzp),
                                        };
                                        let mut sign = 1.0;
                                        if rx {
                                            sign *= parity[0];
                                        }
                                        if ry {
                                            sign *= parity[1];
                                        }
                                        if rz {
                                            sign *= parity[2];
                                        }
                                        dense[ix + fft_n[0] * (iy + fft_n[1] * iz)].re += sign * v;
                                    }
                                }
                            }
                        }
                    }
                }

                // 3) Transform and keep the independent quadrant.
                fft3_forward(backend, &mut dense, fft_n, &mut tmp)?;

                let out = &mut comps[comp];
                let kz_count = if mode == TransformMode::Quasi2D { 1 } else { extent[2] };
                for kz in 0..kz_count {
                    let store_z = if mode == TransformMode::Quasi2D { layer } else { kz };
                    for ky in 0..extent[1] {
                        for kx in 0..extent[0] {
                            let v = dense[kx + fft_n[0] * (ky + fft_n[1] * kz)];
                            out[kx + extent[0] * (ky + extent[1] * store_z)] =
                                if imaginary { v.im } else { v.re };
                        }
                    }
                }
            }
        }

        debug!(
            padded = ?dims.padded,
            mode = ?mode,
            octant = ?oct,
            elapsed_ms = t0.elapsed().as_secs_f64() * 1e3,
            "demag kernel built"
        );

        Ok(Self {
            dims: *dims,
            extent,
            far_field_cells,
            comps,
        })
    }

    /// Rebuild from stored components (disk cache).
    pub(crate) fn from_parts(
        dims: ConvDims,
        far_field_cells: f64,
        comps: [Vec<f64>; 6],
    ) -> ConvResult<Self> {
        let extent = dims.kernel_extent();
        let stored = checked_len(&extent, "demag kernel")?;
        for &c in components_for(dims.mode()) {
            if comps[c].len() != stored {
                return Err(ConvError::DimensionMismatch(format!(
                    "stored kernel component {} has {} values, expected {}",
                    c,
                    comps[c].len(),
                    stored
                )));
            }
        }
        Ok(Self {
            dims,
            extent,
            far_field_cells,
            comps,
        })
    }

    pub fn dims(&self) -> &ConvDims {
        &self.dims
    }

    pub fn extent(&self) -> [usize; 3] {
        self.extent
    }

    pub fn far_field_cells(&self) -> f64 {
        self.far_field_cells
    }

    /// Stored values of component `c` (see `tensor::XX` ..). Empty if not stored.
    pub fn component(&self, c: usize) -> &[f64] {
        &self.comps[c]
    }

    /// Components stored for this layout, in storage order.
    pub fn stored_components(&self) -> &'static [usize] {
        components_for(self.dims.mode())
    }

    /// Kernel tensor at frequency cell (i, j, k) of a 2D/3D layout, with reflections applied.
    ///
    /// Components the layout does not store read as zero.
    #[inline]
    pub fn tensor_at(&self, i: usize, j: usize, k: usize) -> Tensor6 {
        let [_, nyp, nzp] = self.dims.padded;
        let (jj, sy) = mirror(j, nyp);
        let (kk, sz) = mirror(k, nzp);
        let idx = i + self.extent[0] * (jj + self.extent[1] * kk);
        let get = |c: usize| self.comps[c].get(idx).copied().unwrap_or(0.0);
        [
            get(XX),
            get(YY),
            get(ZZ),
            get(XY) * sy,
            get(XZ) * sz,
            get(YZ) * sy * sz,
        ]
    }
}

impl KernelMultiplication for DemagKernel {
    fn layout(&self) -> &ConvDims {
        &self.dims
    }

    #[inline]
    fn apply_cell(&self, i: usize, j: usize, k: usize, m: [Complex64; 3]) -> [Complex64; 3] {
        let t = self.tensor_at(i, j, k);
        let [mx, my, mz] = m;
        [
            mx * t[XX] + my * t[XY] + mz * t[XZ],
            mx * t[XY] + my * t[YY] + mz * t[YZ],
            mx * t[XZ] + my * t[YZ] + mz * t[ZZ],
        ]
    }

    fn apply_column(&self, i: usize, j: usize, m: [&[Complex64]; 3], h: [&mut [Complex64]; 3]) {
        let nz = self.dims.grid.nz;
        let (jj, sy) = mirror(j, self.dims.padded[1]);
        let base = i + self.extent[0] * jj;
        let layer = self.extent[0] * self.extent[1];
        let [hx, hy, hz] = h;

        for k in 0..nz {
            let mut acc = [Complex64::default(); 3];
            for kp in 0..nz {
                let (d, sd) = if k >= kp { (k - kp, 1.0) } else { (kp - k, -1.0) };
                let at = base + layer * d;
                let xx = self.comps[XX][at];
                let yy = self.comps[YY][at];
                let zz = self.comps[ZZ][at];
                let xy = self.comps[XY][at] * sy;
                let xz = Complex64::new(0.0, self.comps[XZ][at] * sd);
                let yz = Complex64::new(0.0, self.comps[YZ][at] * sy * sd);
                let (mx, my, mz) = (m[0][kp], m[1][kp], m[2][kp]);
                acc[0] += mx * xx + my * xy + mz * xz;
                acc[1] += mx * xy + my * yy + mz * yz;
                acc[2] += mx * xz + my * yz + mz * zz;
            }
            hx[k] += acc[0];
            hy[k] += acc[1];
            hz[k] += acc[2];
        }
    }
}
