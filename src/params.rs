// src/params.rs

use std::f64::consts::PI;

/// Vacuum permeability (T·m/A).
pub const MU0: f64 = 4.0e-7 * PI;
