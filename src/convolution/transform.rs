// src/convolution/transform.rs
//
// Forward / inverse transform pipeline.
//
// Forward:  real rows --r2c(x)--> half spectrum --fft(y)--> --fft(z, 3D only)-->
// Inverse:  --ifft(z, 3D only)--> --ifft(y)--> --c2r(x)--> real rows, scaled by 1/(Nx*Ny[*Nz])
//
// Only the logical part of the padded volume ever holds data before the forward
// transform, so the y transform runs on the first nz planes only and the x transform
// only on the first ny rows of each plane. The same holds on the way back: only the
// logical rows are needed after the inverse.
//
// y/z lines are strided in memory; they are gathered into a contiguous transpose
// buffer (one line per chunk), transformed there, then scattered back. This is the
// row/column transpose strategy, generalised to three axes.

use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use super::backend::ComputeBackend;
use super::dims::{ConvDims, TransformMode};
use crate::error::ConvResult;

const SCATTER_CHUNK: usize = 4096;

/// FFT plans for one configured layout.
pub(crate) struct TransformPlans {
    r2c: Arc<dyn RealToComplex<f64>>,
    c2r: Arc<dyn ComplexToReal<f64>>,
    y_fwd: Arc<dyn Fft<f64>>,
    y_inv: Arc<dyn Fft<f64>>,
    z: Option<(Arc<dyn Fft<f64>>, Arc<dyn Fft<f64>>)>,
}

impl TransformPlans {
    pub fn new(dims: &ConvDims) -> Self {
        let [nxp, nyp, nzp] = dims.padded;
        let mut real_planner = RealFftPlanner::<f64>::new();
        let mut planner = FftPlanner::<f64>::new();
        let z = match dims.mode() {
            TransformMode::ThreeD => Some((
                planner.plan_fft_forward(nzp),
                planner.plan_fft_inverse(nzp),
            )),
            _ => None,
        };
        Self {
            r2c: real_planner.plan_fft_forward(nxp),
            c2r: real_planner.plan_fft_inverse(nxp),
            y_fwd: planner.plan_fft_forward(nyp),
            y_inv: planner.plan_fft_inverse(nyp),
            z,
        }
    }
}

/// A family of equally spaced strided lines inside a flat buffer.
///
/// Line `l` starts at `(l % group) + (l / group) * group_stride` and its elements are
/// `stride` apart. This covers x rows, y columns (per z plane) and z columns.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LineSet {
    pub lines: usize,
    pub len: usize,
    stride: usize,
    group: usize,
    group_stride: usize,
}

impl LineSet {
    /// Contiguous rows of length `len`.
    pub fn along_x(len: usize, rows: usize) -> Self {
        Self {
            lines: rows,
            len,
            stride: 1,
            group: 1,
            group_stride: len,
        }
    }

    /// y columns of `planes` planes whose rows have `row` elements.
    pub fn along_y(row: usize, len: usize, planes: usize) -> Self {
        Self {
            lines: row * planes,
            len,
            stride: row,
            group: row,
            group_stride: row * len,
        }
    }

    /// z columns through `len` planes of `plane` elements.
    pub fn along_z(plane: usize, len: usize) -> Self {
        Self {
            lines: plane,
            len,
            stride: plane,
            group: plane,
            group_stride: plane * len,
        }
    }

    #[inline]
    fn base(&self, l: usize) -> usize {
        (l % self.group) + (l / self.group) * self.group_stride
    }

    /// (line, position) of flat index `d`.
    #[inline]
    fn locate(&self, d: usize) -> (usize, usize) {
        (
            (d / self.group_stride) * self.group + d % self.stride,
            (d % self.group_stride) / self.stride,
        )
    }

    #[inline]
    pub fn total(&self) -> usize {
        self.lines * self.len
    }
}

/// In-place 1D FFT of every line of `set` in `data`, via the transpose buffer `tmp`.
pub(crate) fn transform_lines<B: ComputeBackend>(
    backend: &B,
    data: &mut [Complex64],
    tmp: &mut [Complex64],
    set: LineSet,
    fft: &Arc<dyn Fft<f64>>,
) -> ConvResult<()> {
    if set.len <= 1 || set.lines == 0 {
        return Ok(());
    }
    let total = set.total();
    debug_assert_eq!(data.len(), total);
    debug_assert!(tmp.len() >= total);
    let tmp = &mut tmp[..total];

    // Gather + transform (one line per chunk).
    {
        let src: &[Complex64] = data;
        backend.try_chunks_init(
            tmp,
            set.len,
            || vec![Complex64::default(); fft.get_inplace_scratch_len()],
            |scratch, l, line| {
                let base = set.base(l);
                for (p, v) in line.iter_mut().enumerate() {
                    *v = src[base + p * set.stride];
                }
                fft.process_with_scratch(line, scratch);
                Ok(())
            },
        )?;
    }

    // Scatter back.
    let lines: &[Complex64] = tmp;
    backend.chunks(data, SCATTER_CHUNK, |c, out| {
        let start = c * SCATTER_CHUNK;
        for (e, v) in out.iter_mut().enumerate() {
            let (l, p) = set.locate(start + e);
            *v = lines[l * set.len + p];
        }
    });
    Ok(())
}

/// Real rows -> half spectrum along x. Padding rows and planes are zeroed.
fn forward_x<B: ComputeBackend>(
    backend: &B,
    dims: &ConvDims,
    plans: &TransformPlans,
    real: &[f64],
    spec: &mut [Complex64],
) -> ConvResult<()> {
    let nxp = dims.padded[0];
    let nyp = dims.padded[1];
    let nxc = dims.nxc();
    let (ny, nz) = (dims.grid.ny, dims.grid.nz);
    let r2c = &plans.r2c;

    backend.try_chunks_init(
        spec,
        nxc,
        || (r2c.make_input_vec(), r2c.make_scratch_vec()),
        |(row_in, scratch), r, out| {
            let (j, k) = (r % nyp, r / nyp);
            if j >= ny || k >= nz {
                out.fill(Complex64::default());
                return Ok(());
            }
            let src = (j + ny * k) * nxp;
            row_in.copy_from_slice(&real[src..src + nxp]);
            r2c.process_with_scratch(row_in, out, scratch)?;
            Ok(())
        },
    )
}

/// Half spectrum -> real rows along x, restricted to the logical rows, with normalisation.
fn inverse_x<B: ComputeBackend>(
    backend: &B,
    dims: &ConvDims,
    plans: &TransformPlans,
    spec: &[Complex64],
    real: &mut [f64],
) -> ConvResult<()> {
    let nxp = dims.padded[0];
    let nyp = dims.padded[1];
    let nxc = dims.nxc();
    let ny = dims.grid.ny;
    let norm = dims.transform_norm();
    let c2r = &plans.c2r;

    backend.try_chunks_init(
        real,
        nxp,
        || (c2r.make_input_vec(), c2r.make_scratch_vec()),
        |(row_in, scratch), r, out| {
            let (j, k) = (r % ny, r / ny);
            let src = (j + nyp * k) * nxc;
            row_in.copy_from_slice(&spec[src..src + nxc]);
            // DC (and Nyquist for even lengths) of a real signal are real; drop rounding residue.
            row_in[0].im = 0.0;
            if nxp % 2 == 0 {
                row_in[nxc - 1].im = 0.0;
            }
            c2r.process_with_scratch(row_in, out, scratch)?;
            for v in out.iter_mut() {
                *v *= norm;
            }
            Ok(())
        },
    )
}

fn y_lines(dims: &ConvDims) -> LineSet {
    LineSet::along_y(dims.nxc(), dims.padded[1], dims.grid.nz)
}

fn z_lines(dims: &ConvDims) -> LineSet {
    LineSet::along_z(dims.nxc() * dims.padded[1], dims.padded[2])
}

/// Forward transform of three real staging components into the spectrum.
pub(crate) fn forward<B: ComputeBackend>(
    backend: &B,
    dims: &ConvDims,
    plans: &TransformPlans,
    real: [&[f64]; 3],
    spec: [&mut [Complex64]; 3],
    tmp: &mut [Complex64],
) -> ConvResult<()> {
    let ys = y_lines(dims);
    for (r, s) in real.into_iter().zip(spec) {
        forward_x(backend, dims, plans, r, s)?;
        transform_lines(backend, &mut s[..ys.total()], tmp, ys, &plans.y_fwd)?;
        if let Some((z_fwd, _)) = &plans.z {
            transform_lines(backend, s, tmp, z_lines(dims), z_fwd)?;
        }
    }
    Ok(())
}

/// Inverse transform of a spectrum into the real staging components.
///
/// The spectrum is used as scratch and holds no meaningful data afterwards.
pub(crate) fn inverse<B: ComputeBackend>(
    backend: &B,
    dims: &ConvDims,
    plans: &TransformPlans,
    spec: [&mut [Complex64]; 3],
    real: [&mut [f64]; 3],
    tmp: &mut [Complex64],
) -> ConvResult<()> {
    let ys = y_lines(dims);
    for (s, r) in spec.into_iter().zip(real) {
        if let Some((_, z_inv)) = &plans.z {
            transform_lines(backend, s, tmp, z_lines(dims), z_inv)?;
        }
        transform_lines(backend, &mut s[..ys.total()], tmp, ys, &plans.y_inv)?;
        inverse_x(backend, dims, plans, s, r)?;
    }
    Ok(())
}

/// Unnormalised forward complex FFT of a dense `n[0] x n[1] x n[2]` array (x fastest).
pub(crate) fn fft3_forward<B: ComputeBackend>(
    backend: &B,
    data: &mut [Complex64],
    n: [usize; 3],
    tmp: &mut [Complex64],
) -> ConvResult<()> {
    let mut planner = FftPlanner::<f64>::new();
    let sets = [
        LineSet::along_x(n[0], n[1] * n[2]),
        LineSet::along_y(n[0], n[1], n[2]),
        LineSet::along_z(n[0] * n[1], n[2]),
    ];
    for set in sets {
        if set.len > 1 {
            let fft = planner.plan_fft_forward(set.len);
            transform_lines(backend, data, tmp, set, &fft)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convolution::backend::SerialBackend;
    use crate::grid::{Grid3D, PbcImages};

    #[test]
    fn line_sets_locate_inverts_base() {
        let sets = [
            LineSet::along_x(5, 6),
            LineSet::along_y(5, 3, 2),
            LineSet::along_z(15, 2),
        ];
        for set in sets {
            assert_eq!(set.total(), 30);
            let mut seen = vec![false; 30];
            for l in 0..set.lines {
                for p in 0..set.len {
                    let d = set.base(l) + p * set.stride;
                    assert_eq!(set.locate(d), (l, p));
                    assert!(!seen[d], "index {} visited twice", d);
                    seen[d] = true;
                }
            }
            assert!(seen.iter().all(|&v| v));
        }
    }

    fn roundtrip(grid: Grid3D, pbc: PbcImages, q2d: usize) {
        let dims = ConvDims::new(grid, true, pbc, q2d).unwrap();
        let plans = TransformPlans::new(&dims);
        let backend = SerialBackend;

        let n = dims.real_len();
        let nxp = dims.padded[0];
        let mut src: [Vec<f64>; 3] = [vec![0.0; n], vec![0.0; n], vec![0.0; n]];
        for (c, comp) in src.iter_mut().enumerate() {
            for (idx, v) in comp.iter_mut().enumerate() {
                if idx % nxp < grid.nx {
                    *v = ((idx * 7 + c * 3) % 11) as f64 - 5.0;
                }
            }
        }
        let mut spec = [
            vec![Complex64::default(); dims.spectrum_len()],
            vec![Complex64::default(); dims.spectrum_len()],
            vec![Complex64::default(); dims.spectrum_len()],
        ];
        let mut tmp = vec![Complex64::default(); dims.spectrum_len()];
        {
            let [a, b, c] = &mut spec;
            forward(
                &backend,
                &dims,
                &plans,
                [&src[0][..], &src[1][..], &src[2][..]],
                [&mut a[..], &mut b[..], &mut c[..]],
                &mut tmp,
            )
            .unwrap();
        }
        let mut back: [Vec<f64>; 3] = [vec![0.0; n], vec![0.0; n], vec![0.0; n]];
        {
            let [a, b, c] = &mut spec;
            let [x, y, z] = &mut back;
            inverse(
                &backend,
                &dims,
                &plans,
                [&mut a[..], &mut b[..], &mut c[..]],
                [&mut x[..], &mut y[..], &mut z[..]],
                &mut tmp,
            )
            .unwrap();
        }
        for c in 0..3 {
            for idx in 0..n {
                if idx % nxp < grid.nx {
                    assert!(
                        (back[c][idx] - src[c][idx]).abs() < 1e-12,
                        "component {} idx {}: {} vs {}",
                        c,
                        idx,
                        back[c][idx],
                        src[c][idx]
                    );
                }
            }
        }
    }

    #[test]
    fn forward_then_inverse_restores_logical_region() {
        roundtrip(Grid3D::new(6, 5, 1, 1.0, 1.0, 1.0), PbcImages::open(), 0);
        roundtrip(Grid3D::new(4, 3, 3, 1.0, 1.0, 1.0), PbcImages::open(), 0);
        roundtrip(Grid3D::new(5, 4, 2, 1.0, 1.0, 1.0), PbcImages::new(2, 0, 0), 0);
        roundtrip(Grid3D::new(4, 4, 3, 1.0, 1.0, 1.0), PbcImages::open(), 4);
    }
}
