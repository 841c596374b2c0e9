// src/convolution/buffers.rs
//
// Staging buffers. Sized once per configure, overwritten every call.

use rustfft::num_complex::Complex64;

use super::dims::ConvDims;
use crate::error::{try_alloc, ConvResult};

/// One flat buffer per vector component (x, y, z).
#[derive(Debug, Clone)]
pub struct Components<T> {
    data: [Vec<T>; 3],
}

impl<T: Clone> Components<T> {
    pub(crate) fn alloc(len: usize, fill: T, what: &'static str) -> ConvResult<Self> {
        Ok(Self {
            data: [
                try_alloc(len, fill.clone(), what)?,
                try_alloc(len, fill.clone(), what)?,
                try_alloc(len, fill, what)?,
            ],
        })
    }

    pub(crate) fn fill(&mut self, v: T) {
        for c in &mut self.data {
            c.fill(v.clone());
        }
    }
}

impl<T> Components<T> {
    /// Values per component.
    pub fn len(&self) -> usize {
        self.data[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.data[0].is_empty()
    }

    pub fn component(&self, c: usize) -> &[T] {
        &self.data[c]
    }

    pub fn get(&self) -> [&[T]; 3] {
        let [x, y, z] = &self.data;
        [&x[..], &y[..], &z[..]]
    }

    pub(crate) fn get_mut(&mut self) -> [&mut [T]; 3] {
        let [x, y, z] = &mut self.data;
        [&mut x[..], &mut y[..], &mut z[..]]
    }
}

/// Frequency-domain field (three components) tagged with the layout it was produced for.
#[derive(Debug, Clone)]
pub struct Spectrum {
    pub(crate) dims: ConvDims,
    pub(crate) values: Components<Complex64>,
}

impl Spectrum {
    pub(crate) fn alloc(dims: ConvDims, what: &'static str) -> ConvResult<Self> {
        Ok(Self {
            values: Components::alloc(dims.spectrum_len(), Complex64::default(), what)?,
            dims,
        })
    }

    pub fn dims(&self) -> &ConvDims {
        &self.dims
    }

    pub fn values(&self) -> &Components<Complex64> {
        &self.values
    }
}

/// Everything a configured engine allocates besides its FFT plans.
pub(crate) struct Staging {
    /// Padded real rows over the logical (y, z) range.
    pub real: Components<f64>,
    /// Forward spectrum (also the multiplication output when embedded).
    pub spectrum: Spectrum,
    /// Multiplication output of a non-embedded engine.
    pub spectrum_out: Option<Spectrum>,
    /// Quasi-2D column scratch: inputs and accumulated outputs, column-major.
    pub columns: Option<(Components<Complex64>, Components<Complex64>)>,
    /// Transpose buffer for the y/z line transforms.
    pub lines: Vec<Complex64>,
}

impl Staging {
    pub fn alloc(dims: &ConvDims) -> ConvResult<Self> {
        let real = Components::alloc(dims.real_len(), 0.0, "real staging buffer")?;
        let spectrum = Spectrum::alloc(*dims, "spectrum")?;
        let spectrum_out = if dims.embedding {
            None
        } else {
            Some(Spectrum::alloc(*dims, "output spectrum")?)
        };
        let columns = if dims.q2d_level > 0 {
            let len = dims.spectrum_len();
            Some((
                Components::alloc(len, Complex64::default(), "quasi-2D columns")?,
                Components::alloc(len, Complex64::default(), "quasi-2D columns")?,
            ))
        } else {
            None
        };
        let lines = try_alloc(dims.spectrum_len(), Complex64::default(), "transpose buffer")?;

        Ok(Self {
            real,
            spectrum,
            spectrum_out,
            columns,
            lines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Grid3D, PbcImages};

    #[test]
    fn output_spectrum_only_without_embedding() {
        let g = Grid3D::new(4, 4, 3, 1.0, 1.0, 1.0);
        let emb = ConvDims::new(g, true, PbcImages::open(), 0).unwrap();
        let sep = ConvDims::new(g, false, PbcImages::open(), 0).unwrap();
        assert!(Staging::alloc(&emb).unwrap().spectrum_out.is_none());
        let s = Staging::alloc(&sep).unwrap();
        assert_eq!(s.spectrum_out.as_ref().map(|o| o.values.len()), Some(sep.spectrum_len()));
        assert!(s.columns.is_none());
        assert_eq!(s.real.len(), 8 * 4 * 3);
    }
}
