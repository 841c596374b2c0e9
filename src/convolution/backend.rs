// src/convolution/backend.rs
//
// Execution backends for the convolution pipeline.
//
// Every stage of the pipeline is written against the small set of data-parallel
// primitives below (chunked loops, chunked loops with per-worker scratch,
// chunk-ordered reductions). A stage is a full barrier: each primitive returns only
// once every chunk has been processed.
//
// Reductions always combine per-chunk partial sums in chunk order, so the serial and
// rayon backends give bit-identical energies.

use rayon::prelude::*;
use std::ops::Range;

use crate::config::DEFAULT_PAR_THRESHOLD;
use crate::error::ConvResult;

/// Data-parallel primitives a convolution backend provides.
pub trait ComputeBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run `f(chunk_index, chunk)` over `data.chunks_mut(chunk)`.
    fn chunks<T, F>(&self, data: &mut [T], chunk: usize, f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync + Send;

    /// Fallible chunked loop with per-worker state created by `init`.
    fn try_chunks_init<T, S, I, F>(&self, data: &mut [T], chunk: usize, init: I, f: F) -> ConvResult<()>
    where
        T: Send,
        I: Fn() -> S + Sync + Send,
        F: Fn(&mut S, usize, &mut [T]) -> ConvResult<()> + Sync + Send;

    /// Three equally sized buffers chunked in lockstep.
    fn chunks3<T, F>(&self, data: [&mut [T]; 3], chunk: usize, f: F)
    where
        T: Send,
        F: Fn(usize, [&mut [T]; 3]) + Sync + Send;

    /// Sum of `f(range)` over `0..len` split into ranges of `chunk`, combined in range order.
    fn chunk_sums<F>(&self, len: usize, chunk: usize, f: F) -> f64
    where
        F: Fn(Range<usize>) -> f64 + Sync + Send;
}

#[inline]
fn chunk_ranges(len: usize, chunk: usize) -> impl Iterator<Item = Range<usize>> + Clone {
    let chunk = chunk.max(1);
    (0..len.div_ceil(chunk)).map(move |c| c * chunk..((c + 1) * chunk).min(len))
}

/// Multi-threaded CPU backend (rayon global pool).
///
/// Buffers shorter than `par_threshold` are processed sequentially; for small grids
/// the scheduling overhead outweighs the work.
#[derive(Debug, Clone, Copy)]
pub struct RayonBackend {
    pub par_threshold: usize,
}

impl RayonBackend {
    pub fn new(par_threshold: usize) -> Self {
        Self { par_threshold }
    }

    #[inline]
    fn parallel(&self, len: usize) -> bool {
        len >= self.par_threshold && rayon::current_num_threads() > 1
    }
}

impl Default for RayonBackend {
    fn default() -> Self {
        Self::new(DEFAULT_PAR_THRESHOLD)
    }
}

impl ComputeBackend for RayonBackend {
    fn name(&self) -> &'static str {
        "rayon"
    }

    fn chunks<T, F>(&self, data: &mut [T], chunk: usize, f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync + Send,
    {
        if !self.parallel(data.len()) {
            return SerialBackend.chunks(data, chunk, f);
        }
        data.par_chunks_mut(chunk.max(1))
            .enumerate()
            .for_each(|(c, d)| f(c, d));
    }

    fn try_chunks_init<T, S, I, F>(&self, data: &mut [T], chunk: usize, init: I, f: F) -> ConvResult<()>
    where
        T: Send,
        I: Fn() -> S + Sync + Send,
        F: Fn(&mut S, usize, &mut [T]) -> ConvResult<()> + Sync + Send,
    {
        if !self.parallel(data.len()) {
            return SerialBackend.try_chunks_init(data, chunk, init, f);
        }
        data.par_chunks_mut(chunk.max(1))
            .enumerate()
            .try_for_each_init(init, |s, (c, d)| f(s, c, d))
    }

    fn chunks3<T, F>(&self, data: [&mut [T]; 3], chunk: usize, f: F)
    where
        T: Send,
        F: Fn(usize, [&mut [T]; 3]) + Sync + Send,
    {
        if !self.parallel(data[0].len()) {
            return SerialBackend.chunks3(data, chunk, f);
        }
        let chunk = chunk.max(1);
        let [a, b, c] = data;
        a.par_chunks_mut(chunk)
            .zip_eq(b.par_chunks_mut(chunk))
            .zip_eq(c.par_chunks_mut(chunk))
            .enumerate()
            .for_each(|(n, ((a, b), c))| f(n, [a, b, c]));
    }

    fn chunk_sums<F>(&self, len: usize, chunk: usize, f: F) -> f64
    where
        F: Fn(Range<usize>) -> f64 + Sync + Send,
    {
        if !self.parallel(len) {
            return SerialBackend.chunk_sums(len, chunk, f);
        }
        let ranges: Vec<Range<usize>> = chunk_ranges(len, chunk).collect();
        let partials: Vec<f64> = ranges.into_par_iter().map(&f).collect();
        partials.iter().sum()
    }
}

/// Single-threaded reference backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialBackend;

impl ComputeBackend for SerialBackend {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn chunks<T, F>(&self, data: &mut [T], chunk: usize, f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync + Send,
    {
        for (c, d) in data.chunks_mut(chunk.max(1)).enumerate() {
            f(c, d);
        }
    }

    fn try_chunks_init<T, S, I, F>(&self, data: &mut [T], chunk: usize, init: I, f: F) -> ConvResult<()>
    where
        T: Send,
        I: Fn() -> S + Sync + Send,
        F: Fn(&mut S, usize, &mut [T]) -> ConvResult<()> + Sync + Send,
    {
        let mut state = init();
        for (c, d) in data.chunks_mut(chunk.max(1)).enumerate() {
            f(&mut state, c, d)?;
        }
        Ok(())
    }

    fn chunks3<T, F>(&self, data: [&mut [T]; 3], chunk: usize, f: F)
    where
        T: Send,
        F: Fn(usize, [&mut [T]; 3]) + Sync + Send,
    {
        let chunk = chunk.max(1);
        let [a, b, c] = data;
        debug_assert!(a.len() == b.len() && b.len() == c.len());
        for (n, ((a, b), c)) in a
            .chunks_mut(chunk)
            .zip(b.chunks_mut(chunk))
            .zip(c.chunks_mut(chunk))
            .enumerate()
        {
            f(n, [a, b, c]);
        }
    }

    fn chunk_sums<F>(&self, len: usize, chunk: usize, f: F) -> f64
    where
        F: Fn(Range<usize>) -> f64 + Sync + Send,
    {
        let partials: Vec<f64> = chunk_ranges(len, chunk).map(f).collect();
        partials.iter().sum()
    }
}
