// src/convolution/dims.rs
//
// Grid/dimension configurator.
//
// Padding rules (per axis, n = logical cells, P = periodic images):
// - open axis (P == 0):     N = 2n (linear convolution via zero-padding), N = 1 when n == 1
// - periodic axis (P > 0):  N = n  (circular convolution; images are summed into the kernel)
//
// Frequency-domain layout: the x axis is real-to-complex, so only nxc = N.x/2 + 1
// columns are stored. Index c = i + nxc * (j + N.y * k).
//
// Quasi-2D: for thin 3D meshes the z axis is not transformed; the spectrum keeps the
// nz logical layers and the kernel multiplication evaluates the z convolution directly.

use serde::Serialize;

use crate::error::{checked_len, ConvError, ConvResult};
use crate::grid::{Grid3D, PbcImages};

/// Which transform pipeline a configured engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransformMode {
    /// n.z == 1: x/y transforms only.
    TwoD,
    /// Full x/y/z transforms.
    ThreeD,
    /// x/y transforms; z folded into the kernel multiplication.
    Quasi2D,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConvDims {
    /// Logical grid (n, h).
    pub grid: Grid3D,
    pub pbc: PbcImages,
    /// Kernel multiplication happens in place on the forward spectrum.
    pub embedding: bool,
    /// Padded transform sizes N.
    pub padded: [usize; 3],
    /// Number of z layers handled by direct evaluation; 0 when quasi-2D is off.
    pub q2d_level: usize,
}

#[inline]
fn padded_len(n: usize, images: usize) -> ConvResult<usize> {
    if images > 0 || n == 1 {
        Ok(n)
    } else {
        checked_len(&[n, 2], "padded axis")
    }
}

/// Non-negative kernel displacements per axis: n, or n * P with periodic images.
#[inline]
fn octant_len(n: usize, images: usize) -> ConvResult<usize> {
    if images > 0 {
        checked_len(&[n, images], "kernel octant")
    } else {
        Ok(n)
    }
}

impl ConvDims {
    /// Compute padded dimensions and the transform mode.
    ///
    /// `q2d_max_nz` is the externally supplied quasi-2D threshold (0 disables it).
    pub fn new(
        grid: Grid3D,
        embedding: bool,
        pbc: PbcImages,
        q2d_max_nz: usize,
    ) -> ConvResult<Self> {
        if grid.nx == 0 || grid.ny == 0 || grid.nz == 0 {
            return Err(ConvError::InvalidDimensions {
                nx: grid.nx,
                ny: grid.ny,
                nz: grid.nz,
            });
        }
        let h = grid.cell();
        if h.iter().any(|&v| !(v.is_finite() && v > 0.0)) {
            return Err(ConvError::InvalidCellSize {
                dx: grid.dx,
                dy: grid.dy,
                dz: grid.dz,
            });
        }

        let padded = [
            padded_len(grid.nx, pbc.x)?,
            padded_len(grid.ny, pbc.y)?,
            padded_len(grid.nz, pbc.z)?,
        ];

        let q2d_level = if grid.nz > 1 && pbc.z == 0 && q2d_max_nz > 0 && grid.nz <= q2d_max_nz {
            grid.nz
        } else {
            0
        };

        let dims = Self {
            grid,
            pbc,
            embedding,
            padded,
            q2d_level,
        };
        dims.check_sizes()?;
        Ok(dims)
    }

    /// Every length and byte count derived from this layout fits in `usize`.
    ///
    /// The accessors below use plain arithmetic and rely on this having passed.
    fn check_sizes(&self) -> ConvResult<()> {
        checked_len(&self.grid.counts(), "cell count")?;
        checked_len(&self.padded, "kernel transform buffer")?;
        checked_len(&self.kernel_octant()?, "kernel octant")?;
        checked_len(&self.kernel_extent(), "demag kernel")?;
        self.checked_staging_bytes()?;
        Ok(())
    }

    /// Kernel displacement counts per axis (the octant the real-space tensor is evaluated on).
    pub fn kernel_octant(&self) -> ConvResult<[usize; 3]> {
        Ok([
            octant_len(self.grid.nx, self.pbc.x)?,
            octant_len(self.grid.ny, self.pbc.y)?,
            octant_len(self.grid.nz, self.pbc.z)?,
        ])
    }

    pub fn mode(&self) -> TransformMode {
        if self.grid.is_2d() {
            TransformMode::TwoD
        } else if self.q2d_level > 0 {
            TransformMode::Quasi2D
        } else {
            TransformMode::ThreeD
        }
    }

    /// Stored x columns of the half spectrum.
    #[inline]
    pub fn nxc(&self) -> usize {
        self.padded[0] / 2 + 1
    }

    /// z planes held in the frequency buffers.
    #[inline]
    pub fn spectrum_planes(&self) -> usize {
        match self.mode() {
            TransformMode::TwoD => 1,
            TransformMode::ThreeD => self.padded[2],
            TransformMode::Quasi2D => self.grid.nz,
        }
    }

    /// Complex values per component in the frequency buffers.
    #[inline]
    pub fn spectrum_len(&self) -> usize {
        self.nxc() * self.padded[1] * self.spectrum_planes()
    }

    /// Real values per component in the staging buffers: padded rows over the logical (y, z) range.
    #[inline]
    pub fn real_len(&self) -> usize {
        self.padded[0] * self.grid.ny * self.grid.nz
    }

    /// Normalisation of the unnormalised inverse transforms.
    pub fn transform_norm(&self) -> f64 {
        let nz = match self.mode() {
            TransformMode::ThreeD => self.padded[2],
            _ => 1,
        };
        1.0 / (self.padded[0] * self.padded[1] * nz) as f64
    }

    /// Extent of the stored (symmetry-reduced) kernel.
    ///
    /// x and y keep the non-negative frequency quadrant; z keeps the non-negative
    /// frequency half (3D) or the non-negative displacement layers (quasi-2D).
    pub fn kernel_extent(&self) -> [usize; 3] {
        let ez = match self.mode() {
            TransformMode::TwoD => 1,
            TransformMode::ThreeD => self.padded[2] / 2 + 1,
            TransformMode::Quasi2D => self.grid.nz,
        };
        [self.padded[0] / 2 + 1, self.padded[1] / 2 + 1, ez]
    }

    /// True if `grid` and `pbc` are the ones this layout was configured for.
    pub fn matches(&self, grid: &Grid3D, pbc: PbcImages) -> bool {
        self.grid == *grid && self.pbc == pbc
    }

    /// True if a kernel built for `other` can multiply spectra of this layout.
    pub fn kernel_compatible(&self, other: &ConvDims) -> bool {
        self.grid == other.grid
            && self.pbc == other.pbc
            && self.padded == other.padded
            && self.q2d_level == other.q2d_level
    }

    /// Bytes held by staging buffers for this layout (three components each).
    pub fn staging_bytes(&self) -> usize {
        self.checked_staging_bytes().unwrap_or(usize::MAX)
    }

    fn checked_staging_bytes(&self) -> ConvResult<usize> {
        let complex = std::mem::size_of::<f64>() * 2;
        let spectra = if self.embedding { 1 } else { 2 };
        let column_scratch = if self.q2d_level > 0 { 2 } else { 0 };
        let spectrum_len = checked_len(
            &[self.nxc(), self.padded[1], self.spectrum_planes()],
            "spectrum",
        )?;
        let real_len = checked_len(
            &[self.padded[0], self.grid.ny, self.grid.nz],
            "real staging buffer",
        )?;
        let spectra_bytes = checked_len(
            &[3 * (spectra + column_scratch) + 1, spectrum_len, complex],
            "staging buffers",
        )?;
        let real_bytes = checked_len(&[3, real_len, std::mem::size_of::<f64>()], "staging buffers")?;
        spectra_bytes
            .checked_add(real_bytes)
            .ok_or(ConvError::OutOfMemory {
                what: "staging buffers",
                bytes: usize::MAX,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(nx: usize, ny: usize, nz: usize) -> Grid3D {
        Grid3D::new(nx, ny, nz, 1e-9, 1e-9, 1e-9)
    }

    #[test]
    fn open_axes_double_and_periodic_axes_do_not() {
        let d = ConvDims::new(grid(8, 5, 3), true, PbcImages::new(0, 4, 0), 0).unwrap();
        assert_eq!(d.padded, [16, 5, 6]);
        assert_eq!(d.mode(), TransformMode::ThreeD);
        assert_eq!(d.nxc(), 9);
        assert_eq!(d.spectrum_len(), 9 * 5 * 6);
        assert_eq!(d.real_len(), 16 * 5 * 3);
        assert_eq!(d.kernel_extent(), [9, 3, 4]);
    }

    #[test]
    fn film_is_2d_regardless_of_q2d_threshold() {
        let d = ConvDims::new(grid(8, 8, 1), true, PbcImages::open(), 16).unwrap();
        assert_eq!(d.mode(), TransformMode::TwoD);
        assert_eq!(d.padded, [16, 16, 1]);
        assert_eq!(d.q2d_level, 0);
        assert_eq!(d.kernel_extent(), [9, 9, 1]);
        assert!((d.transform_norm() - 1.0 / 256.0).abs() < 1e-18);
    }

    #[test]
    fn q2d_applies_only_below_threshold_and_without_z_images() {
        let thin = ConvDims::new(grid(8, 8, 4), true, PbcImages::open(), 4).unwrap();
        assert_eq!(thin.mode(), TransformMode::Quasi2D);
        assert_eq!(thin.q2d_level, 4);
        assert_eq!(thin.spectrum_planes(), 4);
        assert_eq!(thin.kernel_extent(), [9, 9, 4]);

        let thick = ConvDims::new(grid(8, 8, 5), true, PbcImages::open(), 4).unwrap();
        assert_eq!(thick.mode(), TransformMode::ThreeD);

        let periodic_z = ConvDims::new(grid(8, 8, 4), true, PbcImages::new(0, 0, 2), 4).unwrap();
        assert_eq!(periodic_z.mode(), TransformMode::ThreeD);
    }

    #[test]
    fn rejects_degenerate_geometry() {
        assert!(matches!(
            ConvDims::new(grid(0, 4, 1), true, PbcImages::open(), 0),
            Err(ConvError::InvalidDimensions { .. })
        ));
        let bad = Grid3D::new(4, 4, 1, 1e-9, 0.0, 1e-9);
        assert!(matches!(
            ConvDims::new(bad, true, PbcImages::open(), 0),
            Err(ConvError::InvalidCellSize { .. })
        ));
    }

    #[test]
    fn oversized_layouts_are_reported_instead_of_wrapping() {
        let open = PbcImages::open();
        // 2n overflows on an open axis.
        let wide = Grid3D::new(usize::MAX / 2 + 1, 1, 1, 1e-9, 1e-9, 1e-9);
        assert!(matches!(
            ConvDims::new(wide, true, open, 0),
            Err(ConvError::OutOfMemory { what: "padded axis", .. })
        ));
        // Each axis fits; the buffer lengths do not.
        let huge = Grid3D::new(1 << 20, 1 << 20, 1 << 20, 1e-9, 1e-9, 1e-9);
        assert!(matches!(
            ConvDims::new(huge, true, open, 0),
            Err(ConvError::OutOfMemory { .. })
        ));
        // Periodic axes are not padded but the image sum range n * P overflows.
        let images = PbcImages::new(usize::MAX / 2, 0, 0);
        assert!(matches!(
            ConvDims::new(grid(4, 4, 1), true, images, 0),
            Err(ConvError::OutOfMemory { what: "kernel octant", .. })
        ));
    }

    #[test]
    fn kernel_octant_spans_the_image_sum() {
        let d = ConvDims::new(grid(4, 3, 2), true, PbcImages::new(2, 0, 0), 0).unwrap();
        assert_eq!(d.kernel_octant().unwrap(), [8, 3, 2]);
    }

    #[test]
    fn matches_is_an_equality_over_geometry_and_images() {
        let g = grid(4, 4, 2);
        let d = ConvDims::new(g, true, PbcImages::open(), 0).unwrap();
        assert!(d.matches(&g, PbcImages::open()));
        assert!(!d.matches(&g, PbcImages::new(1, 0, 0)));
        assert!(!d.matches(&grid(4, 4, 3), PbcImages::open()));
    }
}
