// src/convolution/finish.rs
//
// Output finisher: write the logical region of the inverse result into the caller's
// field(s) and reduce the energy.
//
// Energy density (J/m^3 for fields in A/m):
//     E = w * (-mu0/2) * sum_{non-empty} In_i . H_i / N_non-empty
// H here is the convolution result itself, independent of `clear_out`.

use tracing::debug;

use super::backend::ComputeBackend;
use super::dims::ConvDims;
use super::{ConvInput, ConvOutput};
use crate::params::MU0;
use crate::vec3::dot;
use crate::vector_field::{FieldSink, FieldSource, ScalarField3D, VectorField3D};

/// Whether and how the finish step reduces an energy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnergyRequest {
    Skip,
    Plain,
    /// Energy scaled by an external weight.
    Weighted(f64),
}

/// Flags and optional outputs of the finish step.
pub struct FinishOptions<'a> {
    /// Overwrite the output (true) or add into it (false).
    pub clear_out: bool,
    pub energy: EnergyRequest,
    /// Full-grid copy of the convolution result.
    pub aux_field: Option<&'a mut VectorField3D>,
    /// Per-cell energy density, zero in empty cells.
    pub aux_energy: Option<&'a mut ScalarField3D>,
}

impl Default for FinishOptions<'_> {
    fn default() -> Self {
        Self {
            clear_out: true,
            energy: EnergyRequest::Skip,
            aux_field: None,
            aux_energy: None,
        }
    }
}

impl<'a> FinishOptions<'a> {
    /// Overwrite the output, no energy.
    pub fn overwrite() -> Self {
        Self::default()
    }

    /// Add into the output, no energy.
    pub fn accumulate() -> Self {
        Self {
            clear_out: false,
            ..Self::default()
        }
    }

    pub fn with_energy(mut self) -> Self {
        self.energy = EnergyRequest::Plain;
        self
    }

    pub fn with_weighted_energy(mut self, weight: f64) -> Self {
        self.energy = EnergyRequest::Weighted(weight);
        self
    }

    pub fn with_aux_field(mut self, field: &'a mut VectorField3D) -> Self {
        self.aux_field = Some(field);
        self
    }

    pub fn with_aux_energy(mut self, density: &'a mut ScalarField3D) -> Self {
        self.aux_energy = Some(density);
        self
    }
}

#[inline]
fn result_at(real: &[&[f64]; 3], at: usize) -> [f64; 3] {
    [real[0][at], real[1][at], real[2][at]]
}

/// Copy (or add) the logical region of the real staging buffers into `out`.
fn write_field<B: ComputeBackend, G: FieldSink + ?Sized>(
    backend: &B,
    dims: &ConvDims,
    real: [&[f64]; 3],
    out: &mut G,
    clear_out: bool,
) {
    debug_assert!(dims.grid.same_geometry(out.grid()));
    let nx = dims.grid.nx;
    let nxp = dims.padded[0];
    backend.chunks(out.values_mut(), nx, |r, row| {
        let base = r * nxp;
        for (i, v) in row.iter_mut().enumerate() {
            let h = result_at(&real, base + i);
            if clear_out {
                *v = h;
            } else {
                v[0] += h[0];
                v[1] += h[1];
                v[2] += h[2];
            }
        }
    });
}

/// Sum of In . H over non-empty cells, reduced in row order.
fn dot_sum<B: ComputeBackend, F: FieldSource>(
    backend: &B,
    dims: &ConvDims,
    input: &ConvInput<'_, F>,
    real: [&[f64]; 3],
) -> f64 {
    let nx = dims.grid.nx;
    let nxp = dims.padded[0];
    backend.chunk_sums(dims.grid.n_cells(), nx, |cells| {
        let mut s = 0.0;
        for idx in cells {
            if let Some(m) = input.cell(idx) {
                s += dot(m, result_at(&real, (idx / nx) * nxp + idx % nx));
            }
        }
        s
    })
}

fn write_energy_density<B: ComputeBackend, F: FieldSource>(
    backend: &B,
    dims: &ConvDims,
    input: &ConvInput<'_, F>,
    real: [&[f64]; 3],
    out: &mut ScalarField3D,
) {
    debug_assert!(dims.grid.same_geometry(&out.grid));
    let nx = dims.grid.nx;
    let nxp = dims.padded[0];
    backend.chunks(&mut out.data, nx, |r, row| {
        for (i, e) in row.iter_mut().enumerate() {
            *e = match input.cell(r * nx + i) {
                Some(m) => -0.5 * MU0 * dot(m, result_at(&real, r * nxp + i)),
                None => 0.0,
            };
        }
    });
}

/// Finish step. Returns the energy when one was requested.
pub(crate) fn finish<B, F, G>(
    backend: &B,
    dims: &ConvDims,
    real: [&[f64]; 3],
    input: ConvInput<'_, F>,
    output: ConvOutput<'_, G>,
    opts: FinishOptions<'_>,
) -> Option<f64>
where
    B: ComputeBackend,
    F: FieldSource,
    G: FieldSink,
{
    match output {
        ConvOutput::Single(out) => write_field(backend, dims, real, out, opts.clear_out),
        ConvOutput::Duplicated(a, b) => {
            write_field(backend, dims, real, a, opts.clear_out);
            write_field(backend, dims, real, b, opts.clear_out);
        }
    }

    if let Some(aux) = opts.aux_field {
        write_field(backend, dims, real, aux, true);
    }
    if let Some(density) = opts.aux_energy {
        write_energy_density(backend, dims, &input, real, density);
    }

    let weight = match opts.energy {
        EnergyRequest::Skip => return None,
        EnergyRequest::Plain => 1.0,
        EnergyRequest::Weighted(w) => w,
    };
    let count = input.nonempty_count();
    if count == 0 {
        return Some(0.0);
    }
    let sum = dot_sum(backend, dims, &input, real);
    let energy = weight * (-0.5 * MU0) * sum / count as f64;
    debug!(energy, non_empty = count, weight, "convolution energy");
    Some(energy)
}
