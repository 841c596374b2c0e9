// src/vector_field.rs
//
// Vector and scalar fields sampled on a Grid3D, plus the two capabilities the
// convolution engine needs from them:
// - FieldSource: read values and the per-cell emptiness mask (input side)
// - FieldSink:   mutable access to the cell values (output side)

use crate::geometry_mask::{Mask3D, mask_count};
use crate::grid::Grid3D;

/// Read access to a vector field snapshot with an emptiness mask.
pub trait FieldSource: Sync {
    fn grid(&self) -> &Grid3D;

    /// Value at flat cell index `idx`.
    fn value(&self, idx: usize) -> [f64; 3];

    /// True if the cell holds magnetic material.
    fn is_nonempty(&self, idx: usize) -> bool;

    /// Number of non-empty cells.
    fn nonempty_count(&self) -> usize {
        (0..self.grid().n_cells())
            .filter(|&idx| self.is_nonempty(idx))
            .count()
    }
}

/// Write access to a vector field receiving convolution output.
pub trait FieldSink: Send {
    fn grid(&self) -> &Grid3D;

    /// All cell values, flat (x fastest).
    fn values_mut(&mut self) -> &mut [[f64; 3]];
}

/// Vector field on a 3D grid. Each cell stores (vx, vy, vz).
///
/// An optional mask marks non-magnetic (empty) cells; without a mask every cell
/// counts as non-empty.
#[derive(Debug, Clone)]
pub struct VectorField3D {
    pub grid: Grid3D,
    pub data: Vec<[f64; 3]>,
    mask: Option<Mask3D>,
    nonempty: usize,
}

impl VectorField3D {
    /// Create a zero field on the given grid.
    pub fn new(grid: Grid3D) -> Self {
        let n = grid.n_cells();
        Self {
            grid,
            data: vec![[0.0; 3]; n],
            mask: None,
            nonempty: n,
        }
    }

    /// Field with every cell set to `v`.
    pub fn uniform(grid: Grid3D, v: [f64; 3]) -> Self {
        let mut f = Self::new(grid);
        f.set_uniform(v[0], v[1], v[2]);
        f
    }

    /// Set all cells to the same value (vx, vy, vz).
    pub fn set_uniform(&mut self, vx: f64, vy: f64, vz: f64) {
        for cell in &mut self.data {
            *cell = [vx, vy, vz];
        }
    }

    /// Get the flat index in `data` for grid indices (i, j, k).
    #[inline]
    pub fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        self.grid.idx(i, j, k)
    }

    /// Attach a geometry mask (true = magnetic). Empty cells are zeroed.
    pub fn set_mask(&mut self, mask: Mask3D) {
        assert_eq!(
            mask.len(),
            self.data.len(),
            "mask length {} does not match field length {}",
            mask.len(),
            self.data.len()
        );
        for (v, &inside) in self.data.iter_mut().zip(mask.iter()) {
            if !inside {
                *v = [0.0; 3];
            }
        }
        self.nonempty = mask_count(&mask);
        self.mask = Some(mask);
    }

    pub fn with_mask(mut self, mask: Mask3D) -> Self {
        self.set_mask(mask);
        self
    }

    pub fn mask(&self) -> Option<&Mask3D> {
        self.mask.as_ref()
    }

    /// Spatial average over all cells.
    pub fn average(&self) -> [f64; 3] {
        let n = self.data.len().max(1) as f64;
        let mut s = [0.0; 3];
        for v in &self.data {
            s[0] += v[0];
            s[1] += v[1];
            s[2] += v[2];
        }
        [s[0] / n, s[1] / n, s[2] / n]
    }

    /// Largest absolute component difference against another field.
    pub fn max_abs_diff(&self, other: &VectorField3D) -> f64 {
        assert_eq!(self.data.len(), other.data.len());
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| {
                (a[0] - b[0])
                    .abs()
                    .max((a[1] - b[1]).abs())
                    .max((a[2] - b[2]).abs())
            })
            .fold(0.0, f64::max)
    }

    /// Largest absolute component over the field.
    pub fn max_abs(&self) -> f64 {
        self.data
            .iter()
            .map(|v| v[0].abs().max(v[1].abs()).max(v[2].abs()))
            .fold(0.0, f64::max)
    }
}

impl FieldSource for VectorField3D {
    fn grid(&self) -> &Grid3D {
        &self.grid
    }

    #[inline]
    fn value(&self, idx: usize) -> [f64; 3] {
        self.data[idx]
    }

    #[inline]
    fn is_nonempty(&self, idx: usize) -> bool {
        match &self.mask {
            Some(mask) => mask[idx],
            None => true,
        }
    }

    fn nonempty_count(&self) -> usize {
        self.nonempty
    }
}

impl FieldSink for VectorField3D {
    fn grid(&self) -> &Grid3D {
        &self.grid
    }

    fn values_mut(&mut self) -> &mut [[f64; 3]] {
        &mut self.data
    }
}

/// Scalar field on a 3D grid (used for energy-density output).
#[derive(Debug, Clone)]
pub struct ScalarField3D {
    pub grid: Grid3D,
    pub data: Vec<f64>,
}

impl ScalarField3D {
    pub fn new(grid: Grid3D) -> Self {
        let n = grid.n_cells();
        Self {
            grid,
            data: vec![0.0; n],
        }
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }
}
