// src/demag/mod.rs
//
// Dipolar (demagnetising) interaction on the FFT convolution engine.
//
// `DemagConvolution` pairs one engine with the demag kernel for its layout. Kernels come
// from the process-wide `KernelCache`, so meshes with the same geometry share one.
//
//   H_demag = K * M,   K = -N (Newell tensor, lattice-summed under PBC)
//   E_demag = -mu0/2 <M . H_demag>   (average over magnetic cells)

pub mod analytic;
pub mod cache;
pub mod kernel;
pub mod tensor;

use std::sync::Arc;

use crate::config::EngineSettings;
use crate::convolution::{
    ComputeBackend, ConvDims, ConvInput, ConvOutput, Configured, ConvolutionEngine,
    FinishOptions, MultiplyTerm, RayonBackend, Spectrum,
};
use crate::error::{ConvError, ConvResult};
use crate::grid::{Grid3D, PbcImages};
use crate::vector_field::{FieldSink, FieldSource};

pub use cache::KernelCache;
pub use kernel::DemagKernel;

/// Demag field solver for one mesh.
pub struct DemagConvolution<B: ComputeBackend = RayonBackend> {
    engine: ConvolutionEngine<B>,
    q2d_max_nz: usize,
    far_field_cells: f64,
    kernel: Option<Arc<DemagKernel>>,
}

impl DemagConvolution<RayonBackend> {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            engine: ConvolutionEngine::new(settings),
            q2d_max_nz: settings.q2d_max_nz,
            far_field_cells: settings.far_field_cells,
            kernel: None,
        }
    }
}

impl<B: ComputeBackend> DemagConvolution<B> {
    pub fn with_backend(backend: B, settings: &EngineSettings) -> Self {
        Self {
            engine: ConvolutionEngine::with_backend(backend, settings.q2d_max_nz),
            q2d_max_nz: settings.q2d_max_nz,
            far_field_cells: settings.far_field_cells,
            kernel: None,
        }
    }

    /// Size the engine and fetch the kernel for a geometry.
    ///
    /// The kernel is obtained before the engine is touched, so a failed build leaves the
    /// previous configuration intact.
    pub fn configure(
        &mut self,
        grid: Grid3D,
        embedding: bool,
        pbc: PbcImages,
    ) -> ConvResult<Configured> {
        let dims = ConvDims::new(grid, embedding, pbc, self.q2d_max_nz)?;
        if let Some(k) = &self.kernel {
            if k.dims() == &dims && self.engine.dims() == Some(&dims) {
                return Ok(Configured::Unchanged);
            }
        }

        let kernel = KernelCache::global().get_or_build(&dims, self.far_field_cells, self.engine.backend())?;
        let status = self.engine.configure(grid, embedding, pbc)?;
        self.kernel = Some(kernel);
        Ok(status)
    }

    pub fn check_dimensions(&self, grid: &Grid3D, pbc: PbcImages) -> bool {
        self.kernel.is_some() && self.engine.check_dimensions(grid, pbc)
    }

    pub fn kernel(&self) -> Option<&Arc<DemagKernel>> {
        self.kernel.as_ref()
    }

    pub fn engine(&self) -> &ConvolutionEngine<B> {
        &self.engine
    }

    pub fn dims(&self) -> Option<&ConvDims> {
        self.engine.dims()
    }

    /// Forward spectrum of the last `forward` call (for multi-mesh multiplication).
    pub fn spectrum(&self) -> Option<&Spectrum> {
        self.engine.spectrum()
    }

    fn kernel_ref(&self) -> ConvResult<&DemagKernel> {
        self.kernel.as_deref().ok_or(ConvError::NotConfigured)
    }

    /// H = demag field of `m`; returns the demag energy density.
    pub fn compute_field<F: FieldSource, G: FieldSink>(
        &mut self,
        m: &F,
        h: &mut G,
    ) -> ConvResult<f64> {
        let energy = self.convolute(m, h, FinishOptions::overwrite().with_energy())?;
        Ok(energy.unwrap_or(0.0))
    }

    pub fn convolute<F: FieldSource, G: FieldSink>(
        &mut self,
        m: &F,
        h: &mut G,
        opts: FinishOptions<'_>,
    ) -> ConvResult<Option<f64>> {
        let kernel = self.kernel.as_deref().ok_or(ConvError::NotConfigured)?;
        self.engine.convolute(m, h, kernel, opts)
    }

    /// Demag field of the sub-lattice average (a + b) / 2.
    pub fn convolute_averaged_inputs<F: FieldSource, G: FieldSink>(
        &mut self,
        a: &F,
        b: &F,
        h: &mut G,
        opts: FinishOptions<'_>,
    ) -> ConvResult<Option<f64>> {
        let kernel = self.kernel.as_deref().ok_or(ConvError::NotConfigured)?;
        self.engine.convolute_averaged_inputs(a, b, h, kernel, opts)
    }

    pub fn convolute_averaged_inputs_duplicated_outputs<F: FieldSource, G: FieldSink>(
        &mut self,
        a: &F,
        b: &F,
        h_a: &mut G,
        h_b: &mut G,
        opts: FinishOptions<'_>,
    ) -> ConvResult<Option<f64>> {
        let kernel = self.kernel.as_deref().ok_or(ConvError::NotConfigured)?;
        self.engine
            .convolute_averaged_inputs_duplicated_outputs(a, b, h_a, h_b, kernel, opts)
    }

    pub fn forward<F: FieldSource>(&mut self, input: ConvInput<'_, F>) -> ConvResult<()> {
        self.engine.forward(input)
    }

    /// Multiply the forward spectrum by this mesh's demag kernel.
    pub fn multiply(&mut self) -> ConvResult<()> {
        let kernel = self.kernel.as_deref().ok_or(ConvError::NotConfigured)?;
        self.engine.multiply(kernel)
    }

    /// Sum several kernel x spectrum products into this engine's output spectrum.
    pub fn multiply_multiple(&mut self, terms: &[MultiplyTerm<'_>]) -> ConvResult<()> {
        self.engine.multiply_multiple(terms)
    }

    /// Term pairing this mesh's kernel with its own forward spectrum.
    pub fn own_term(&self) -> ConvResult<MultiplyTerm<'_>> {
        Ok(MultiplyTerm::own(self.kernel_ref()?))
    }

    pub fn inverse(&mut self) -> ConvResult<()> {
        self.engine.inverse()
    }

    pub fn finish<F: FieldSource, G: FieldSink>(
        &self,
        input: ConvInput<'_, F>,
        output: ConvOutput<'_, G>,
        opts: FinishOptions<'_>,
    ) -> ConvResult<Option<f64>> {
        self.engine.finish(input, output, opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convolution::SerialBackend;
    use crate::params::MU0;
    use crate::vector_field::VectorField3D;

    #[test]
    fn configure_is_idempotent_and_shares_kernels() {
        let settings = EngineSettings::default();
        let grid = Grid3D::new(4, 4, 2, 1e-9, 1e-9, 1e-9);
        let mut a = DemagConvolution::with_backend(SerialBackend, &settings);
        let mut b = DemagConvolution::with_backend(SerialBackend, &settings);

        assert_eq!(a.configure(grid, true, PbcImages::open()).unwrap(), Configured::Reallocated);
        assert_eq!(a.configure(grid, true, PbcImages::open()).unwrap(), Configured::Unchanged);
        b.configure(grid, true, PbcImages::open()).unwrap();
        assert!(Arc::ptr_eq(a.kernel().unwrap(), b.kernel().unwrap()));
        assert!(a.check_dimensions(&grid, PbcImages::open()));
        assert!(!a.check_dimensions(&grid, PbcImages::new(1, 0, 0)));
    }

    #[test]
    fn uniform_cube_energy_is_one_sixth_mu0_ms2() {
        let ms = 8.0e5;
        let grid = Grid3D::new(8, 8, 8, 1e-9, 1e-9, 1e-9);
        let mut demag = DemagConvolution::with_backend(SerialBackend, &EngineSettings::default());
        demag.configure(grid, true, PbcImages::open()).unwrap();

        let m = VectorField3D::uniform(grid, [0.0, 0.0, ms]);
        let mut h = VectorField3D::new(grid);
        let e = demag.compute_field(&m, &mut h).unwrap();
        let expect = MU0 * ms * ms / 6.0;
        assert!(((e - expect) / expect).abs() < 1e-2, "E = {} expected {}", e, expect);
    }

    #[test]
    fn unconfigured_solver_reports_not_configured() {
        let grid = Grid3D::new(2, 2, 1, 1.0, 1.0, 1.0);
        let mut demag = DemagConvolution::with_backend(SerialBackend, &EngineSettings::default());
        let m = VectorField3D::new(grid);
        let mut h = VectorField3D::new(grid);
        assert!(matches!(
            demag.compute_field(&m, &mut h),
            Err(ConvError::NotConfigured)
        ));
        assert!(matches!(demag.multiply(), Err(ConvError::NotConfigured)));
    }
}
