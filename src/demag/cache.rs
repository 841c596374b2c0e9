// src/demag/cache.rs
//
// Kernel cache shared by every demag convolution in the process.
//
// Kernels are keyed by (n, h, pbc images, embedding, layout, far-field switch) and
// held as `Weak` references: a kernel lives as long as some convolution uses it and
// is rebuilt (or reloaded) after the last user drops it.
//
// Optional disk persistence: one binary file per key, little-endian.
//   header: magic "LLGDMAG\0", version u32, n[3] u32, pbc[3] u32, padded[3] u32,
//           q2d_level u32, h[3] f64, far_field_cells f64, n_components u32
//   body:   stored components in storage order, f64 each
// A file whose header does not match the requested layout is ignored.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use tracing::{debug, info, warn};

use super::kernel::{components_for, DemagKernel};
use crate::config::EngineSettings;
use crate::convolution::backend::ComputeBackend;
use crate::convolution::dims::ConvDims;
use crate::error::{try_alloc, ConvResult};
use crate::grid::PbcImages;

const MAGIC: [u8; 8] = *b"LLGDMAG\0";
const VERSION: u32 = 3;

/// Identity of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelKey {
    n: [usize; 3],
    h_bits: [u64; 3],
    pbc: PbcImages,
    embedding: bool,
    padded: [usize; 3],
    q2d_level: usize,
    far_field_bits: u64,
}

impl KernelKey {
    pub fn new(dims: &ConvDims, far_field_cells: f64) -> Self {
        Self {
            n: dims.grid.counts(),
            h_bits: dims.grid.cell().map(f64::to_bits),
            pbc: dims.pbc,
            embedding: dims.embedding,
            padded: dims.padded,
            q2d_level: dims.q2d_level,
            far_field_bits: far_field_cells.to_bits(),
        }
    }
}

pub struct KernelCache {
    entries: Mutex<HashMap<KernelKey, Weak<DemagKernel>>>,
    disk_dir: Option<PathBuf>,
}

impl KernelCache {
    pub fn new(disk_dir: Option<PathBuf>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            disk_dir,
        }
    }

    /// Process-wide cache. Disk persistence follows `LLG_DEMAG_CACHE_DIR`.
    pub fn global() -> &'static KernelCache {
        static CACHE: OnceLock<KernelCache> = OnceLock::new();
        CACHE.get_or_init(|| KernelCache::new(EngineSettings::from_env().kernel_cache_dir))
    }

    /// Shared kernel for `dims`, building it on a miss.
    ///
    /// The cache lock is held during a build, so concurrent requests for the same
    /// geometry build once.
    pub fn get_or_build<B: ComputeBackend>(
        &self,
        dims: &ConvDims,
        far_field_cells: f64,
        backend: &B,
    ) -> ConvResult<Arc<DemagKernel>> {
        let key = KernelKey::new(dims, far_field_cells);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(kernel) = entries.get(&key).and_then(Weak::upgrade) {
            debug!(n = ?key.n, pbc = ?dims.pbc.as_array(), "demag kernel cache hit");
            return Ok(kernel);
        }

        let kernel = match self.load(dims, far_field_cells) {
            Some(k) => k,
            None => {
                let k = DemagKernel::build(dims, far_field_cells, backend)?;
                self.store(&k);
                k
            }
        };
        let kernel = Arc::new(kernel);

        entries.retain(|_, w| w.strong_count() > 0);
        entries.insert(key, Arc::downgrade(&kernel));
        Ok(kernel)
    }

    /// Number of kernels currently alive.
    pub fn live_entries(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.values().filter(|w| w.strong_count() > 0).count()
    }

    fn path_for(&self, dims: &ConvDims, far_field_cells: f64) -> Option<PathBuf> {
        let g = dims.grid;
        let fname = format!(
            "demag_kernel_nx{}_ny{}_nz{}_pbc{}-{}-{}_q{}_dx{:.3e}_dy{:.3e}_dz{:.3e}_ff{}.bin",
            g.nx,
            g.ny,
            g.nz,
            dims.pbc.x,
            dims.pbc.y,
            dims.pbc.z,
            dims.q2d_level,
            g.dx,
            g.dy,
            g.dz,
            far_field_cells
        );
        self.disk_dir.as_ref().map(|d| d.join(fname))
    }

    fn load(&self, dims: &ConvDims, far_field_cells: f64) -> Option<DemagKernel> {
        let path = self.path_for(dims, far_field_cells)?;
        if !path.exists() {
            return None;
        }
        match read_kernel(&path, dims, far_field_cells) {
            Ok(Some(k)) => {
                info!(path = %path.display(), "demag kernel loaded from disk");
                Some(k)
            }
            Ok(None) => {
                debug!(path = %path.display(), "stale demag kernel file ignored");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read demag kernel; rebuilding");
                None
            }
        }
    }

    fn store(&self, kernel: &DemagKernel) {
        let Some(path) = self.path_for(kernel.dims(), kernel.far_field_cells()) else {
            return;
        };
        match write_kernel(&path, kernel) {
            Ok(()) => debug!(path = %path.display(), "demag kernel written"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to write demag kernel"),
        }
    }
}

fn header_fields(dims: &ConvDims) -> [u32; 10] {
    let g = dims.grid;
    [
        g.nx as u32,
        g.ny as u32,
        g.nz as u32,
        dims.pbc.x as u32,
        dims.pbc.y as u32,
        dims.pbc.z as u32,
        dims.padded[0] as u32,
        dims.padded[1] as u32,
        dims.padded[2] as u32,
        dims.q2d_level as u32,
    ]
}

fn write_kernel(path: &Path, kernel: &DemagKernel) -> ConvResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let dims = kernel.dims();
    let mut f = BufWriter::new(File::create(path)?);

    f.write_all(&MAGIC)?;
    f.write_all(&VERSION.to_le_bytes())?;
    for v in header_fields(dims) {
        f.write_all(&v.to_le_bytes())?;
    }
    for v in dims.grid.cell() {
        f.write_all(&v.to_le_bytes())?;
    }
    f.write_all(&kernel.far_field_cells().to_le_bytes())?;

    let comps = kernel.stored_components();
    f.write_all(&(comps.len() as u32).to_le_bytes())?;
    for &c in comps {
        for v in kernel.component(c) {
            f.write_all(&v.to_le_bytes())?;
        }
    }
    f.flush()?;
    Ok(())
}

/// Ok(None) if the file belongs to another layout.
fn read_kernel(path: &Path, dims: &ConvDims, far_field_cells: f64) -> ConvResult<Option<DemagKernel>> {
    let mut f = BufReader::new(File::open(path)?);
    let mut buf4 = [0u8; 4];
    let mut buf8 = [0u8; 8];

    f.read_exact(&mut buf8)?;
    if buf8 != MAGIC {
        return Ok(None);
    }
    f.read_exact(&mut buf4)?;
    if u32::from_le_bytes(buf4) != VERSION {
        return Ok(None);
    }
    for expected in header_fields(dims) {
        f.read_exact(&mut buf4)?;
        if u32::from_le_bytes(buf4) != expected {
            return Ok(None);
        }
    }
    for expected in dims.grid.cell().into_iter().chain([far_field_cells]) {
        f.read_exact(&mut buf8)?;
        if f64::from_le_bytes(buf8) != expected {
            return Ok(None);
        }
    }

    let mode_comps = components_for(dims.mode());
    f.read_exact(&mut buf4)?;
    if u32::from_le_bytes(buf4) as usize != mode_comps.len() {
        return Ok(None);
    }

    let extent = dims.kernel_extent();
    let stored = extent[0] * extent[1] * extent[2];
    let mut comps: [Vec<f64>; 6] = Default::default();
    for &c in mode_comps {
        let mut v = try_alloc(stored, 0.0, "demag kernel")?;
        for x in v.iter_mut() {
            f.read_exact(&mut buf8)?;
            *x = f64::from_le_bytes(buf8);
        }
        comps[c] = v;
    }
    DemagKernel::from_parts(*dims, far_field_cells, comps).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convolution::backend::SerialBackend;
    use crate::grid::Grid3D;

    fn dims() -> ConvDims {
        ConvDims::new(Grid3D::new(4, 3, 2, 1e-9, 1e-9, 2e-9), true, PbcImages::open(), 0).unwrap()
    }

    #[test]
    fn kernels_are_shared_while_alive() {
        let cache = KernelCache::new(None);
        let d = dims();
        let a = cache.get_or_build(&d, 40.0, &SerialBackend).unwrap();
        let b = cache.get_or_build(&d, 40.0, &SerialBackend).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.live_entries(), 1);

        let other = cache.get_or_build(&d, 20.0, &SerialBackend).unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(cache.live_entries(), 2);

        drop((a, b, other));
        assert_eq!(cache.live_entries(), 0);
    }

    #[test]
    fn disk_roundtrip_restores_identical_kernel() {
        let dir = std::env::temp_dir().join(format!("llg_demag_cache_test_{}", std::process::id()));
        let d = dims();

        let built = KernelCache::new(Some(dir.clone()))
            .get_or_build(&d, 40.0, &SerialBackend)
            .unwrap();
        let path = KernelCache::new(Some(dir.clone())).path_for(&d, 40.0).unwrap();
        assert!(path.exists());

        let loaded = read_kernel(&path, &d, 40.0).unwrap().unwrap();
        for &c in built.stored_components() {
            assert_eq!(built.component(c), loaded.component(c));
        }

        // A different geometry must not accept this file.
        let other = ConvDims::new(Grid3D::new(4, 3, 2, 1e-9, 1e-9, 1e-9), true, PbcImages::open(), 0)
            .unwrap();
        assert!(read_kernel(&path, &other, 40.0).unwrap().is_none());

        let _ = fs::remove_dir_all(&dir);
    }
}
