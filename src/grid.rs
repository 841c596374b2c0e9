// src/grid.rs

use serde::{Deserialize, Serialize};

/// Regular 3D finite-difference grid: cell counts (nx, ny, nz) and cell size (dx, dy, dz).
///
/// `nz == 1` is a thin film and selects the 2D convolution path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Grid3D {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
}

impl Grid3D {
    /// Create a new grid with nx × ny × nz cells and spacings dx, dy, dz.
    pub fn new(nx: usize, ny: usize, nz: usize, dx: f64, dy: f64, dz: f64) -> Self {
        Self {
            nx,
            ny,
            nz,
            dx,
            dy,
            dz,
        }
    }

    /// Single-layer film (nz = 1).
    pub fn film(nx: usize, ny: usize, dx: f64, dy: f64, dz: f64) -> Self {
        Self::new(nx, ny, 1, dx, dy, dz)
    }

    /// Total number of cells.
    pub fn n_cells(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    /// Convert (i, j, k) indices to a flat index (x fastest, then y, then z).
    #[inline]
    pub fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(i < self.nx && j < self.ny && k < self.nz);
        (k * self.ny + j) * self.nx + i
    }

    /// Inverse of [`Grid3D::idx`].
    #[inline]
    pub fn ijk(&self, idx: usize) -> (usize, usize, usize) {
        let i = idx % self.nx;
        let j = (idx / self.nx) % self.ny;
        let k = idx / (self.nx * self.ny);
        (i, j, k)
    }

    #[inline]
    pub fn is_2d(&self) -> bool {
        self.nz == 1
    }

    #[inline]
    pub fn counts(&self) -> [usize; 3] {
        [self.nx, self.ny, self.nz]
    }

    #[inline]
    pub fn cell(&self) -> [f64; 3] {
        [self.dx, self.dy, self.dz]
    }

    pub fn cell_volume(&self) -> f64 {
        self.dx * self.dy * self.dz
    }

    /// Same cell counts and cell size.
    pub fn same_geometry(&self, other: &Grid3D) -> bool {
        self == other
    }
}

/// Number of periodic images summed per axis. 0 means an open boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PbcImages {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl PbcImages {
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    /// Open boundaries on every axis.
    pub fn open() -> Self {
        Self::default()
    }

    #[inline]
    pub fn as_array(&self) -> [usize; 3] {
        [self.x, self.y, self.z]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_indexing_is_consistent() {
        let g = Grid3D::new(4, 3, 2, 1.0, 1.0, 1.0);
        assert_eq!(g.idx(0, 0, 0), 0);
        assert_eq!(g.idx(1, 0, 0), 1);
        assert_eq!(g.idx(0, 1, 0), 4);
        assert_eq!(g.idx(3, 2, 0), 11);
        assert_eq!(g.idx(0, 0, 1), 12);
        assert_eq!(g.idx(3, 2, 1), 23);
        assert_eq!(g.n_cells(), 24);

        for idx in 0..g.n_cells() {
            let (i, j, k) = g.ijk(idx);
            assert_eq!(g.idx(i, j, k), idx);
        }
    }

    #[test]
    fn film_is_2d() {
        assert!(Grid3D::film(8, 8, 1e-9, 1e-9, 1e-9).is_2d());
        assert!(!Grid3D::new(8, 8, 2, 1e-9, 1e-9, 1e-9).is_2d());
    }
}
