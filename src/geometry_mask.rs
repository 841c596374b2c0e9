// src/geometry_mask.rs
//
// Geometry / masking utilities for 3D meshes.
//
// - The mask is a boolean per cell (true = magnetic material, false = vacuum).
// - Coordinates are *centered*: (0,0,0) at the grid centre, in meters.
// - Empty cells contribute nothing to the convolution input or to the energy.

use crate::grid::Grid3D;

/// Boolean geometry mask for a 3D grid (length = nx*ny*nz).
pub type Mask3D = Vec<bool>;

/// Cell-center coordinates, centered at the grid center, in meters.
///
/// For i∈[0,nx), x = (i+0.5 - nx/2)*dx.
#[inline]
pub fn cell_center_centered(grid: &Grid3D, i: usize, j: usize, k: usize) -> [f64; 3] {
    let cx = (grid.nx as f64) * 0.5;
    let cy = (grid.ny as f64) * 0.5;
    let cz = (grid.nz as f64) * 0.5;
    [
        (i as f64 + 0.5 - cx) * grid.dx,
        (j as f64 + 0.5 - cy) * grid.dy,
        (k as f64 + 0.5 - cz) * grid.dz,
    ]
}

/// Build a mask from a predicate f([x,y,z])->bool over centered cell centers.
pub fn mask_from_fn<F>(grid: &Grid3D, f: F) -> Mask3D
where
    F: Fn([f64; 3]) -> bool,
{
    let mut mask = vec![false; grid.n_cells()];
    for k in 0..grid.nz {
        for j in 0..grid.ny {
            for i in 0..grid.nx {
                mask[grid.idx(i, j, k)] = f(cell_center_centered(grid, i, j, k));
            }
        }
    }
    mask
}

/// Full (all true) mask.
pub fn mask_full(grid: &Grid3D) -> Mask3D {
    vec![true; grid.n_cells()]
}

/// Axis-aligned box: |x-cx|<=hx, |y-cy|<=hy, |z-cz|<=hz.
pub fn mask_cuboid(grid: &Grid3D, half: [f64; 3], center: [f64; 3]) -> Mask3D {
    mask_from_fn(grid, move |p| {
        (p[0] - center[0]).abs() <= half[0]
            && (p[1] - center[1]).abs() <= half[1]
            && (p[2] - center[2]).abs() <= half[2]
    })
}

/// Ellipsoid with semi-axes (a, b, c).
pub fn mask_ellipsoid(grid: &Grid3D, semi: [f64; 3], center: [f64; 3]) -> Mask3D {
    let inv = [
        1.0 / (semi[0] * semi[0]),
        1.0 / (semi[1] * semi[1]),
        1.0 / (semi[2] * semi[2]),
    ];
    mask_from_fn(grid, move |p| {
        let d = [p[0] - center[0], p[1] - center[1], p[2] - center[2]];
        d[0] * d[0] * inv[0] + d[1] * d[1] * inv[1] + d[2] * d[2] * inv[2] <= 1.0
    })
}

/// Cylinder along z through all layers: (x-cx)^2 + (y-cy)^2 <= radius^2.
pub fn mask_cylinder(grid: &Grid3D, radius: f64, center: (f64, f64)) -> Mask3D {
    let (cx, cy) = center;
    let r2 = radius * radius;
    mask_from_fn(grid, move |p| {
        let dx = p[0] - cx;
        let dy = p[1] - cy;
        dx * dx + dy * dy <= r2
    })
}

/// Union (A ∪ B).
pub fn mask_union(a: &[bool], b: &[bool]) -> Mask3D {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(&aa, &bb)| aa || bb).collect()
}

/// Difference (A \ B).
pub fn mask_difference(a: &[bool], b: &[bool]) -> Mask3D {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(&aa, &bb)| aa && !bb).collect()
}

/// Count "true" cells.
pub fn mask_count(mask: &[bool]) -> usize {
    mask.iter().filter(|&&v| v).count()
}
