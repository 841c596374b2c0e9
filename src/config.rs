// src/config.rs
//
// Engine tunables and run reports.
//
// Tunables come from (in increasing priority) defaults, a JSON file, and
// LLG_DEMAG_* environment variables. Reports are written as pretty JSON next to
// the diagnostic outputs.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

use crate::error::ConvResult;
use crate::grid::{Grid3D, PbcImages};

/// Below this many complex values a stage runs sequentially even on the rayon backend.
pub const DEFAULT_PAR_THRESHOLD: usize = 32_768;

/// Distance (in largest cell edges) beyond which the point-dipole tensor replaces Newell's.
pub const DEFAULT_FAR_FIELD_CELLS: f64 = 40.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Largest nz for which the quasi-2D path replaces the z-FFT. 0 disables quasi-2D.
    pub q2d_max_nz: usize,
    /// Minimum buffer length for data-parallel execution.
    pub par_threshold: usize,
    /// Far-field switch distance for kernel evaluation.
    pub far_field_cells: f64,
    /// Directory for persisted kernels. None keeps kernels in memory only.
    pub kernel_cache_dir: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            q2d_max_nz: 0,
            par_threshold: DEFAULT_PAR_THRESHOLD,
            far_field_cells: DEFAULT_FAR_FIELD_CELLS,
            kernel_cache_dir: None,
        }
    }
}

impl EngineSettings {
    /// Defaults overridden by LLG_DEMAG_* environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Read settings from a JSON file, then apply environment overrides.
    pub fn from_json_file(path: &Path) -> ConvResult<Self> {
        let file = File::open(path)?;
        let settings: EngineSettings = serde_json::from_reader(file)?;
        Ok(settings.with_env_overrides())
    }

    pub fn with_q2d_max_nz(mut self, nz: usize) -> Self {
        self.q2d_max_nz = nz;
        self
    }

    pub fn with_par_threshold(mut self, n: usize) -> Self {
        self.par_threshold = n;
        self
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse::<usize>("LLG_DEMAG_Q2D_MAX_NZ") {
            self.q2d_max_nz = v;
        }
        if let Some(v) = env_parse::<usize>("LLG_DEMAG_FFT_PAR_THRESHOLD") {
            self.par_threshold = v;
        }
        if let Some(v) = env_parse::<f64>("LLG_DEMAG_FAR_FIELD") {
            if v.is_finite() && v > 0.0 {
                self.far_field_cells = v;
            }
        }
        if let Ok(dir) = std::env::var("LLG_DEMAG_CACHE_DIR") {
            let dir = dir.trim();
            if !dir.is_empty() {
                self.kernel_cache_dir = Some(PathBuf::from(dir));
            }
        }
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
}

/// Install the fmt subscriber for the diagnostic binaries. `RUST_LOG` overrides the
/// default `info` filter. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[derive(Serialize)]
pub struct RunReport {
    pub geometry: Grid3D,
    pub pbc: PbcImages,
    pub padded: [usize; 3],
    pub mode: String,
    pub settings: EngineSettings,
    pub results: Vec<ReportEntry>,
    pub run: RunInfo,
}

#[derive(Serialize)]
pub struct ReportEntry {
    pub label: String,
    pub value: f64,
    /// Reference value where a closed form exists.
    pub reference: Option<f64>,
}

#[derive(Serialize)]
pub struct RunInfo {
    pub binary: String,
    pub run_id: String,
}

impl RunInfo {
    /// Run id: unix seconds and process id.
    pub fn new(binary: &str) -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            binary: binary.to_string(),
            run_id: format!("{}-{}", secs, std::process::id()),
        }
    }
}

impl RunReport {
    pub fn write_to_dir(&self, out_dir: &Path) -> ConvResult<()> {
        std::fs::create_dir_all(out_dir)?;
        let file = File::create(out_dir.join("report.json"))?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let s: EngineSettings = serde_json::from_str(r#"{ "q2d_max_nz": 8 }"#).unwrap();
        assert_eq!(s.q2d_max_nz, 8);
        assert_eq!(s.par_threshold, DEFAULT_PAR_THRESHOLD);
        assert_eq!(s.far_field_cells, DEFAULT_FAR_FIELD_CELLS);
        assert!(s.kernel_cache_dir.is_none());
    }

    #[test]
    fn settings_file_roundtrip() {
        let path = std::env::temp_dir().join(format!("llg_demag_settings_{}.json", std::process::id()));
        let s = EngineSettings::default().with_q2d_max_nz(6).with_par_threshold(1024);
        std::fs::write(&path, serde_json::to_string(&s).unwrap()).unwrap();

        let read = EngineSettings::from_json_file(&path).unwrap();
        assert_eq!(read.q2d_max_nz, 6);
        assert_eq!(read.par_threshold, 1024);
        let _ = std::fs::remove_file(&path);
    }
}
