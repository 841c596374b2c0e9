// src/convolution/mod.rs
//
// FFT convolution engine shared by long-range interactions.
//
// Per call:
//   forward   input field(s) -> padded real rows -> spectrum
//   multiply  spectrum x kernel (interaction specific, see `KernelMultiplication`)
//   inverse   spectrum -> padded real rows
//   finish    logical region -> output field(s), optional energy
//
// `configure` sizes everything for a geometry and is the only operation that
// allocates. It must not run concurrently with a call in flight; `&mut self`
// enforces that. Engines share no mutable state, so independent engines may run
// in parallel.

pub mod backend;
pub mod buffers;
pub mod dims;
pub mod finish;
pub mod multiply;
pub mod transform;

use std::time::Instant;
use tracing::{debug, info};

use crate::config::EngineSettings;
use crate::error::{ConvError, ConvResult};
use crate::grid::{Grid3D, PbcImages};
use crate::vec3::midpoint;
use crate::vector_field::{FieldSink, FieldSource};

pub use backend::{ComputeBackend, RayonBackend, SerialBackend};
pub use buffers::{Components, Spectrum};
pub use dims::{ConvDims, TransformMode};
pub use finish::{EnergyRequest, FinishOptions};
pub use multiply::{KernelMultiplication, MultiplyTerm, SpectrumSource};

use buffers::Staging;
use transform::TransformPlans;

/// Input side of a call.
pub enum ConvInput<'a, F: FieldSource> {
    Single(&'a F),
    /// Two sub-lattices sharing one field; the cell-wise average is convolved.
    Averaged(&'a F, &'a F),
}

// Manual impls: the derives would require `F: Clone`.
impl<F: FieldSource> Clone for ConvInput<'_, F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F: FieldSource> Copy for ConvInput<'_, F> {}

impl<'a, F: FieldSource> ConvInput<'a, F> {
    pub fn grid(&self) -> &Grid3D {
        match self {
            ConvInput::Single(f) => f.grid(),
            ConvInput::Averaged(a, _) => a.grid(),
        }
    }

    /// Value fed into the convolution at `idx`, or None for an empty cell.
    ///
    /// An averaged cell is non-empty if either sub-lattice is; an empty sub-lattice
    /// contributes zero to the average.
    #[inline]
    pub fn cell(&self, idx: usize) -> Option<[f64; 3]> {
        match self {
            ConvInput::Single(f) => f.is_nonempty(idx).then(|| f.value(idx)),
            ConvInput::Averaged(a, b) => {
                let (ea, eb) = (a.is_nonempty(idx), b.is_nonempty(idx));
                if !(ea || eb) {
                    return None;
                }
                let va = if ea { a.value(idx) } else { [0.0; 3] };
                let vb = if eb { b.value(idx) } else { [0.0; 3] };
                Some(midpoint(va, vb))
            }
        }
    }

    pub fn nonempty_count(&self) -> usize {
        match self {
            ConvInput::Single(f) => f.nonempty_count(),
            ConvInput::Averaged(a, b) => (0..a.grid().n_cells())
                .filter(|&idx| a.is_nonempty(idx) || b.is_nonempty(idx))
                .count(),
        }
    }
}

/// Output side of a call.
pub enum ConvOutput<'a, G: FieldSink> {
    Single(&'a mut G),
    /// The same result written into two fields (one per sub-lattice).
    Duplicated(&'a mut G, &'a mut G),
}

impl<G: FieldSink> ConvOutput<'_, G> {
    fn grids(&self) -> [&Grid3D; 2] {
        match self {
            ConvOutput::Single(g) => [g.grid(), g.grid()],
            ConvOutput::Duplicated(a, b) => [a.grid(), b.grid()],
        }
    }
}

/// Outcome of a successful `configure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Configured {
    /// Same geometry as the last successful call; nothing was touched.
    Unchanged,
    /// Buffers and plans were (re)built.
    Reallocated,
}

struct EngineState {
    dims: ConvDims,
    plans: TransformPlans,
    staging: Staging,
}

/// FFT convolution engine for one mesh.
pub struct ConvolutionEngine<B: ComputeBackend = RayonBackend> {
    backend: B,
    q2d_max_nz: usize,
    state: Option<EngineState>,
}

impl ConvolutionEngine<RayonBackend> {
    /// Rayon-backed engine with the given tunables.
    pub fn new(settings: &EngineSettings) -> Self {
        Self::with_backend(RayonBackend::new(settings.par_threshold), settings.q2d_max_nz)
    }
}

impl<B: ComputeBackend> ConvolutionEngine<B> {
    pub fn with_backend(backend: B, q2d_max_nz: usize) -> Self {
        Self {
            backend,
            q2d_max_nz,
            state: None,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn dims(&self) -> Option<&ConvDims> {
        self.state.as_ref().map(|s| &s.dims)
    }

    pub fn is_configured(&self) -> bool {
        self.state.is_some()
    }

    /// Size the engine for a geometry.
    ///
    /// A repeat call with the same arguments returns `Unchanged` without touching
    /// buffers. On failure the previous configuration stays usable.
    pub fn configure(
        &mut self,
        grid: Grid3D,
        embedding: bool,
        pbc: PbcImages,
    ) -> ConvResult<Configured> {
        let dims = ConvDims::new(grid, embedding, pbc, self.q2d_max_nz)?;
        if let Some(state) = &self.state {
            if state.dims == dims {
                return Ok(Configured::Unchanged);
            }
        }

        let t0 = Instant::now();
        let staging = Staging::alloc(&dims)?;
        let plans = TransformPlans::new(&dims);

        info!(
            n = ?grid.counts(),
            padded = ?dims.padded,
            mode = ?dims.mode(),
            embedding,
            pbc = ?pbc.as_array(),
            bytes = dims.staging_bytes(),
            backend = self.backend.name(),
            "convolution engine configured"
        );
        debug!(elapsed_ms = t0.elapsed().as_secs_f64() * 1e3, "configure");

        self.state = Some(EngineState {
            dims,
            plans,
            staging,
        });
        Ok(Configured::Reallocated)
    }

    /// True if the engine is configured for exactly this grid and image count.
    pub fn check_dimensions(&self, grid: &Grid3D, pbc: PbcImages) -> bool {
        self.state
            .as_ref()
            .map_or(false, |s| s.dims.matches(grid, pbc))
    }

    /// Forward spectrum of the last `forward` call.
    pub fn spectrum(&self) -> Option<&Spectrum> {
        self.state.as_ref().map(|s| &s.staging.spectrum)
    }

    fn state(&self) -> ConvResult<&EngineState> {
        self.state.as_ref().ok_or(ConvError::NotConfigured)
    }

    /// Load the input into the padded staging rows and transform to the spectrum.
    pub fn forward<F: FieldSource>(&mut self, input: ConvInput<'_, F>) -> ConvResult<()> {
        let backend = &self.backend;
        let state = self.state.as_mut().ok_or(ConvError::NotConfigured)?;
        let dims = state.dims;
        debug_assert!(dims.grid.same_geometry(input.grid()));

        let nx = dims.grid.nx;
        let nxp = dims.padded[0];
        backend.chunks3(state.staging.real.get_mut(), nxp, |r, [x, y, z]| {
            let base = r * nx;
            for i in 0..nxp {
                let v = if i < nx {
                    input.cell(base + i).unwrap_or([0.0; 3])
                } else {
                    [0.0; 3]
                };
                x[i] = v[0];
                y[i] = v[1];
                z[i] = v[2];
            }
        });

        let staging = &mut state.staging;
        transform::forward(
            backend,
            &dims,
            &state.plans,
            staging.real.get(),
            staging.spectrum.values.get_mut(),
            &mut staging.lines,
        )
    }

    /// Multiply the forward spectrum by one kernel.
    ///
    /// Embedded engines overwrite the forward spectrum; otherwise the product goes to
    /// a separate output spectrum and the forward spectrum stays available.
    pub fn multiply(&mut self, kernel: &dyn KernelMultiplication) -> ConvResult<()> {
        let backend = &self.backend;
        let state = self.state.as_mut().ok_or(ConvError::NotConfigured)?;
        multiply::multiply_single(backend, &mut state.staging, kernel)
    }

    /// Output spectrum = sum of kernel x spectrum over `terms`.
    ///
    /// Sources may be other engines' forward spectra with the same layout. Needs a
    /// non-embedded engine.
    pub fn multiply_multiple(&mut self, terms: &[MultiplyTerm<'_>]) -> ConvResult<()> {
        let backend = &self.backend;
        let state = self.state.as_mut().ok_or(ConvError::NotConfigured)?;
        multiply::multiply_multiple(backend, &mut state.staging, terms)
    }

    /// Transform the multiplication output back into the real staging rows.
    pub fn inverse(&mut self) -> ConvResult<()> {
        let backend = &self.backend;
        let state = self.state.as_mut().ok_or(ConvError::NotConfigured)?;
        let dims = state.dims;
        let staging = &mut state.staging;
        let spec = match staging.spectrum_out.as_mut() {
            Some(out) => out,
            None => &mut staging.spectrum,
        };
        transform::inverse(
            backend,
            &dims,
            &state.plans,
            spec.values.get_mut(),
            staging.real.get_mut(),
            &mut staging.lines,
        )
    }

    /// Write the result into `output` and optionally reduce the energy.
    ///
    /// `input` must be the input passed to `forward`; it decides which cells count
    /// towards the energy.
    pub fn finish<F: FieldSource, G: FieldSink>(
        &self,
        input: ConvInput<'_, F>,
        output: ConvOutput<'_, G>,
        opts: FinishOptions<'_>,
    ) -> ConvResult<Option<f64>> {
        let state = self.state()?;
        for g in output.grids() {
            debug_assert!(state.dims.grid.same_geometry(g));
        }
        Ok(finish::finish(
            &self.backend,
            &state.dims,
            state.staging.real.get(),
            input,
            output,
            opts,
        ))
    }

    /// forward + multiply + inverse + finish for any call pattern.
    pub fn convolute_with<F: FieldSource, G: FieldSink>(
        &mut self,
        input: ConvInput<'_, F>,
        output: ConvOutput<'_, G>,
        kernel: &dyn KernelMultiplication,
        opts: FinishOptions<'_>,
    ) -> ConvResult<Option<f64>> {
        // Reject a mismatched kernel before any stage runs.
        let dims = self.state()?.dims;
        if !kernel.layout().kernel_compatible(&dims) {
            return Err(ConvError::DimensionMismatch(format!(
                "kernel layout {:?} does not match engine layout {:?}",
                kernel.layout().padded,
                dims.padded
            )));
        }
        self.forward(input)?;
        self.multiply(kernel)?;
        self.inverse()?;
        self.finish(input, output, opts)
    }

    /// Single input, single output.
    pub fn convolute<F: FieldSource, G: FieldSink>(
        &mut self,
        input: &F,
        output: &mut G,
        kernel: &dyn KernelMultiplication,
        opts: FinishOptions<'_>,
    ) -> ConvResult<Option<f64>> {
        self.convolute_with(
            ConvInput::Single(input),
            ConvOutput::Single(output),
            kernel,
            opts,
        )
    }

    /// Convolve the average of two inputs into one output.
    pub fn convolute_averaged_inputs<F: FieldSource, G: FieldSink>(
        &mut self,
        a: &F,
        b: &F,
        output: &mut G,
        kernel: &dyn KernelMultiplication,
        opts: FinishOptions<'_>,
    ) -> ConvResult<Option<f64>> {
        self.convolute_with(
            ConvInput::Averaged(a, b),
            ConvOutput::Single(output),
            kernel,
            opts,
        )
    }

    /// Convolve the average of two inputs and write the result into both outputs.
    pub fn convolute_averaged_inputs_duplicated_outputs<F: FieldSource, G: FieldSink>(
        &mut self,
        a: &F,
        b: &F,
        out_a: &mut G,
        out_b: &mut G,
        kernel: &dyn KernelMultiplication,
        opts: FinishOptions<'_>,
    ) -> ConvResult<Option<f64>> {
        self.convolute_with(
            ConvInput::Averaged(a, b),
            ConvOutput::Duplicated(out_a, out_b),
            kernel,
            opts,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_field::VectorField3D;
    use rustfft::num_complex::Complex64;

    /// Frequency-independent scalar kernel: the convolution reduces to scaling.
    struct ScaleKernel {
        dims: ConvDims,
        c: f64,
    }

    impl KernelMultiplication for ScaleKernel {
        fn layout(&self) -> &ConvDims {
            &self.dims
        }

        fn apply_cell(&self, _i: usize, _j: usize, _k: usize, m: [Complex64; 3]) -> [Complex64; 3] {
            [m[0] * self.c, m[1] * self.c, m[2] * self.c]
        }

        fn apply_column(&self, _i: usize, _j: usize, m: [&[Complex64]; 3], h: [&mut [Complex64]; 3]) {
            for (mc, hc) in m.into_iter().zip(h) {
                for (a, b) in mc.iter().zip(hc.iter_mut()) {
                    *b += *a * self.c;
                }
            }
        }
    }

    fn test_field(grid: Grid3D) -> VectorField3D {
        let mut f = VectorField3D::new(grid);
        for (idx, v) in f.data.iter_mut().enumerate() {
            let t = idx as f64;
            *v = [(0.3 * t).sin(), (0.7 * t).cos(), 1.0 - 0.01 * t];
        }
        f
    }

    fn check_scaling(grid: Grid3D, pbc: PbcImages, q2d: usize, embedding: bool) {
        let mut engine = ConvolutionEngine::with_backend(SerialBackend, q2d);
        assert_eq!(
            engine.configure(grid, embedding, pbc).unwrap(),
            Configured::Reallocated
        );
        let kernel = ScaleKernel {
            dims: *engine.dims().unwrap(),
            c: -2.5,
        };
        let m = test_field(grid);
        let mut h = VectorField3D::new(grid);
        engine
            .convolute(&m, &mut h, &kernel, FinishOptions::overwrite())
            .unwrap();
        for (a, b) in m.data.iter().zip(h.data.iter()) {
            for c in 0..3 {
                assert!(
                    (b[c] + 2.5 * a[c]).abs() < 1e-12,
                    "{:?}: got {} expected {}",
                    engine.dims().map(|d| d.mode()),
                    b[c],
                    -2.5 * a[c]
                );
            }
        }
    }

    #[test]
    fn scalar_kernel_scales_the_input_in_every_mode() {
        check_scaling(Grid3D::new(5, 4, 1, 1.0, 1.0, 1.0), PbcImages::open(), 0, true);
        check_scaling(Grid3D::new(4, 3, 3, 1.0, 1.0, 1.0), PbcImages::open(), 0, true);
        check_scaling(Grid3D::new(4, 3, 3, 1.0, 1.0, 1.0), PbcImages::open(), 4, true);
        check_scaling(Grid3D::new(4, 3, 3, 1.0, 1.0, 1.0), PbcImages::open(), 4, false);
        check_scaling(Grid3D::new(3, 4, 2, 1.0, 1.0, 1.0), PbcImages::new(1, 2, 0), 0, false);
    }

    #[test]
    fn calls_before_configure_fail() {
        let mut engine = ConvolutionEngine::with_backend(SerialBackend, 0);
        let grid = Grid3D::new(2, 2, 1, 1.0, 1.0, 1.0);
        let m = VectorField3D::new(grid);
        assert!(matches!(
            engine.forward(ConvInput::Single(&m)),
            Err(ConvError::NotConfigured)
        ));
        assert!(matches!(engine.inverse(), Err(ConvError::NotConfigured)));
        assert!(!engine.check_dimensions(&grid, PbcImages::open()));
    }

    #[test]
    fn multiple_inputs_need_a_separate_output_spectrum() {
        let grid = Grid3D::new(4, 4, 1, 1.0, 1.0, 1.0);
        let mut engine = ConvolutionEngine::with_backend(SerialBackend, 0);
        engine.configure(grid, true, PbcImages::open()).unwrap();
        let kernel = ScaleKernel {
            dims: *engine.dims().unwrap(),
            c: 1.0,
        };
        let r = engine.multiply_multiple(&[MultiplyTerm::own(&kernel)]);
        assert!(matches!(r, Err(ConvError::EmbeddedSpectrum)));
    }

    #[test]
    fn kernel_for_another_layout_is_rejected() {
        let mut engine = ConvolutionEngine::with_backend(SerialBackend, 0);
        engine
            .configure(Grid3D::new(4, 4, 1, 1.0, 1.0, 1.0), true, PbcImages::open())
            .unwrap();
        let other = ConvDims::new(Grid3D::new(8, 4, 1, 1.0, 1.0, 1.0), true, PbcImages::open(), 0)
            .unwrap();
        let kernel = ScaleKernel { dims: other, c: 1.0 };
        assert!(matches!(
            engine.multiply(&kernel),
            Err(ConvError::DimensionMismatch(_))
        ));
    }
}
