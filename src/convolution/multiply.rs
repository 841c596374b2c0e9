// src/convolution/multiply.rs
//
// Kernel multiplication: point-wise 3x3 tensor contraction in the frequency domain.
//
// The pipeline is shared by every long-range interaction; what is specific to an
// interaction is the `KernelMultiplication` implementation. Regular (2D / 3D) layouts
// call `apply_cell` once per frequency cell. In quasi-2D layouts the spectrum is
// transformed in x/y only, and `apply_column` performs the remaining z convolution
// for one (kx, ky) column.

use rustfft::num_complex::Complex64;

use super::backend::ComputeBackend;
use super::buffers::{Components, Spectrum, Staging};
use super::dims::{ConvDims, TransformMode};
use crate::error::{ConvError, ConvResult};

/// Frequency-domain kernel of one physical interaction.
pub trait KernelMultiplication: Sync {
    /// Layout the kernel was built for.
    fn layout(&self) -> &ConvDims;

    /// Output at frequency cell (i, j, k) for input `m`.
    fn apply_cell(&self, i: usize, j: usize, k: usize, m: [Complex64; 3]) -> [Complex64; 3];

    /// Quasi-2D: accumulate the z convolution of column (i, j) into `h`.
    ///
    /// `m` and `h` hold the nz logical layers of that column.
    fn apply_column(&self, i: usize, j: usize, m: [&[Complex64]; 3], h: [&mut [Complex64]; 3]);
}

/// Input spectrum of one term of a multi-input multiplication.
#[derive(Clone, Copy)]
pub enum SpectrumSource<'a> {
    /// The forward spectrum of the engine doing the multiplication.
    Own,
    /// The forward spectrum of another engine with the same layout.
    Other(&'a Spectrum),
}

/// `kernel` applied to `source`.
#[derive(Clone, Copy)]
pub struct MultiplyTerm<'a> {
    pub kernel: &'a dyn KernelMultiplication,
    pub source: SpectrumSource<'a>,
}

impl<'a> MultiplyTerm<'a> {
    pub fn own(kernel: &'a dyn KernelMultiplication) -> Self {
        Self {
            kernel,
            source: SpectrumSource::Own,
        }
    }

    pub fn other(kernel: &'a dyn KernelMultiplication, spectrum: &'a Spectrum) -> Self {
        Self {
            kernel,
            source: SpectrumSource::Other(spectrum),
        }
    }
}

fn check_kernel(kernel: &dyn KernelMultiplication, dims: &ConvDims) -> ConvResult<()> {
    let k = kernel.layout();
    if k.kernel_compatible(dims) {
        Ok(())
    } else {
        Err(ConvError::DimensionMismatch(format!(
            "kernel built for {}x{}x{} (padded {:?}, q2D {}) used with {}x{}x{} (padded {:?}, q2D {})",
            k.grid.nx,
            k.grid.ny,
            k.grid.nz,
            k.padded,
            k.q2d_level,
            dims.grid.nx,
            dims.grid.ny,
            dims.grid.nz,
            dims.padded,
            dims.q2d_level
        )))
    }
}

#[inline]
fn cell_of_row(dims: &ConvDims, r: usize) -> (usize, usize) {
    let nyp = dims.padded[1];
    (r % nyp, r / nyp)
}

fn multiply_in_place<B: ComputeBackend>(
    backend: &B,
    dims: &ConvDims,
    kernel: &dyn KernelMultiplication,
    spec: [&mut [Complex64]; 3],
) {
    backend.chunks3(spec, dims.nxc(), |r, [x, y, z]| {
        let (j, k) = cell_of_row(dims, r);
        for i in 0..x.len() {
            let h = kernel.apply_cell(i, j, k, [x[i], y[i], z[i]]);
            x[i] = h[0];
            y[i] = h[1];
            z[i] = h[2];
        }
    });
}

fn multiply_into<B: ComputeBackend>(
    backend: &B,
    dims: &ConvDims,
    kernel: &dyn KernelMultiplication,
    src: [&[Complex64]; 3],
    out: [&mut [Complex64]; 3],
    accumulate: bool,
) {
    let nxc = dims.nxc();
    backend.chunks3(out, nxc, |r, [x, y, z]| {
        let (j, k) = cell_of_row(dims, r);
        let base = r * nxc;
        for i in 0..x.len() {
            let c = base + i;
            let h = kernel.apply_cell(i, j, k, [src[0][c], src[1][c], src[2][c]]);
            if accumulate {
                x[i] += h[0];
                y[i] += h[1];
                z[i] += h[2];
            } else {
                x[i] = h[0];
                y[i] = h[1];
                z[i] = h[2];
            }
        }
    });
}

/// Spectrum (plane-major) -> columns (column-major, nz per column).
fn gather_columns<B: ComputeBackend>(
    backend: &B,
    dims: &ConvDims,
    src: [&[Complex64]; 3],
    cols: [&mut [Complex64]; 3],
) {
    let nz = dims.grid.nz;
    let plane = dims.nxc() * dims.padded[1];
    backend.chunks3(cols, nz, |c, [x, y, z]| {
        for k in 0..nz {
            let s = c + plane * k;
            x[k] = src[0][s];
            y[k] = src[1][s];
            z[k] = src[2][s];
        }
    });
}

/// Columns -> spectrum.
fn scatter_columns<B: ComputeBackend>(
    backend: &B,
    dims: &ConvDims,
    cols: [&[Complex64]; 3],
    out: [&mut [Complex64]; 3],
) {
    let nz = dims.grid.nz;
    let nxc = dims.nxc();
    let plane = nxc * dims.padded[1];
    backend.chunks3(out, nxc, |r, [x, y, z]| {
        let start = r * nxc;
        let k = start / plane;
        let c0 = start % plane;
        for i in 0..x.len() {
            let s = (c0 + i) * nz + k;
            x[i] = cols[0][s];
            y[i] = cols[1][s];
            z[i] = cols[2][s];
        }
    });
}

/// Accumulate `kernel` applied to every gathered column into `out`.
fn multiply_columns<B: ComputeBackend>(
    backend: &B,
    dims: &ConvDims,
    kernel: &dyn KernelMultiplication,
    cols_in: [&[Complex64]; 3],
    cols_out: [&mut [Complex64]; 3],
) {
    let nz = dims.grid.nz;
    let nxc = dims.nxc();
    backend.chunks3(cols_out, nz, |c, h| {
        let span = c * nz..(c + 1) * nz;
        let m = [
            &cols_in[0][span.clone()],
            &cols_in[1][span.clone()],
            &cols_in[2][span],
        ];
        kernel.apply_column(c % nxc, c / nxc, m, h);
    });
}

fn source_values<'s, 'a: 's>(own: &'s Spectrum, source: SpectrumSource<'a>) -> [&'s [Complex64]; 3] {
    match source {
        SpectrumSource::Own => own.values.get(),
        SpectrumSource::Other(s) => s.values.get(),
    }
}

fn quasi_2d_columns(
    columns: &mut Option<(Components<Complex64>, Components<Complex64>)>,
) -> ConvResult<&mut (Components<Complex64>, Components<Complex64>)> {
    columns
        .as_mut()
        .ok_or_else(|| ConvError::DimensionMismatch("quasi-2D column buffers missing".into()))
}

/// One kernel applied to the engine's own forward spectrum.
pub(crate) fn multiply_single<B: ComputeBackend>(
    backend: &B,
    staging: &mut Staging,
    kernel: &dyn KernelMultiplication,
) -> ConvResult<()> {
    let Staging {
        spectrum,
        spectrum_out,
        columns,
        ..
    } = staging;
    let dims = spectrum.dims;
    check_kernel(kernel, &dims)?;

    if dims.mode() == TransformMode::Quasi2D {
        let (cols_in, cols_out) = quasi_2d_columns(columns)?;
        gather_columns(backend, &dims, spectrum.values.get(), cols_in.get_mut());
        cols_out.fill(Complex64::default());
        multiply_columns(backend, &dims, kernel, cols_in.get(), cols_out.get_mut());
        let target = spectrum_out.as_mut().unwrap_or(spectrum);
        scatter_columns(backend, &dims, cols_out.get(), target.values.get_mut());
        return Ok(());
    }

    match spectrum_out {
        Some(out) => multiply_into(
            backend,
            &dims,
            kernel,
            spectrum.values.get(),
            out.values.get_mut(),
            false,
        ),
        None => multiply_in_place(backend, &dims, kernel, spectrum.values.get_mut()),
    }
    Ok(())
}

/// Output spectrum = sum over terms of kernel * source spectrum.
///
/// Needs a separate output spectrum, so the engine must not be embedded.
pub(crate) fn multiply_multiple<B: ComputeBackend>(
    backend: &B,
    staging: &mut Staging,
    terms: &[MultiplyTerm<'_>],
) -> ConvResult<()> {
    let Staging {
        spectrum,
        spectrum_out,
        columns,
        ..
    } = staging;
    let dims = spectrum.dims;
    let out = spectrum_out.as_mut().ok_or(ConvError::EmbeddedSpectrum)?;

    // Validate everything before touching the output.
    for term in terms {
        check_kernel(term.kernel, &dims)?;
        if let SpectrumSource::Other(s) = term.source {
            if !s.dims.kernel_compatible(&dims) || s.values.len() != dims.spectrum_len() {
                return Err(ConvError::DimensionMismatch(format!(
                    "source spectrum of {}x{}x{} cannot feed a {}x{}x{} engine",
                    s.dims.grid.nx,
                    s.dims.grid.ny,
                    s.dims.grid.nz,
                    dims.grid.nx,
                    dims.grid.ny,
                    dims.grid.nz
                )));
            }
        }
    }

    let own: &Spectrum = spectrum;
    if dims.mode() == TransformMode::Quasi2D {
        let (cols_in, cols_out) = quasi_2d_columns(columns)?;
        cols_out.fill(Complex64::default());
        for term in terms {
            gather_columns(backend, &dims, source_values(own, term.source), cols_in.get_mut());
            multiply_columns(backend, &dims, term.kernel, cols_in.get(), cols_out.get_mut());
        }
        scatter_columns(backend, &dims, cols_out.get(), out.values.get_mut());
        return Ok(());
    }

    out.values.fill(Complex64::default());
    for term in terms {
        multiply_into(
            backend,
            &dims,
            term.kernel,
            source_values(own, term.source),
            out.values.get_mut(),
            true,
        );
    }
    Ok(())
}
