// src/error.rs

use thiserror::Error;

/// Errors raised by the convolution engine and its kernels.
#[derive(Debug, Error)]
pub enum ConvError {
    /// A staging buffer or kernel array could not be allocated.
    #[error("out of memory allocating {what} ({bytes} bytes)")]
    OutOfMemory { what: &'static str, bytes: usize },

    #[error("invalid grid dimensions {nx}x{ny}x{nz}: every axis needs at least one cell")]
    InvalidDimensions { nx: usize, ny: usize, nz: usize },

    #[error("invalid cell size ({dx:e}, {dy:e}, {dz:e}): must be finite and positive")]
    InvalidCellSize { dx: f64, dy: f64, dz: f64 },

    #[error("convolution engine is not configured")]
    NotConfigured,

    /// A kernel or spectrum was built for a different layout than the engine's.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("multi-input multiplication needs a non-embedded engine (separate output spectrum)")]
    EmbeddedSpectrum,

    #[error("FFT failed: {0}")]
    Fft(#[from] realfft::FftError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

pub type ConvResult<T> = Result<T, ConvError>;

/// Allocate a zero-initialised vector, reporting allocation failure instead of aborting.
pub(crate) fn try_alloc<T: Clone>(len: usize, fill: T, what: &'static str) -> ConvResult<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|_| ConvError::OutOfMemory {
        what,
        bytes: len.saturating_mul(std::mem::size_of::<T>()),
    })?;
    v.resize(len, fill);
    Ok(v)
}

/// Product of `lens`, or `OutOfMemory` when it does not fit in `usize`.
pub(crate) fn checked_len(lens: &[usize], what: &'static str) -> ConvResult<usize> {
    lens.iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
        .ok_or(ConvError::OutOfMemory {
            what,
            bytes: usize::MAX,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huge_allocation_reports_out_of_memory() {
        let r = try_alloc::<u64>(usize::MAX / 4, 0, "test buffer");
        match r {
            Err(ConvError::OutOfMemory { what, .. }) => assert_eq!(what, "test buffer"),
            other => panic!("expected OutOfMemory, got {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn checked_len_reports_overflow() {
        assert_eq!(checked_len(&[3, 4, 5], "cells").unwrap(), 60);
        assert!(matches!(
            checked_len(&[usize::MAX / 2 + 1, 2], "cells"),
            Err(ConvError::OutOfMemory { what: "cells", .. })
        ));
    }
}
