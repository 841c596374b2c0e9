// src/lib.rs

pub mod config;
pub mod convolution;
pub mod demag;
pub mod error;
pub mod geometry_mask;
pub mod grid;
pub mod ovf;
pub mod params;
pub mod vec3;
pub mod vector_field;
