use std::path::PathBuf;

use crate::generator::BATCH_SIZE;

pub const DEFAULT_SEED: u64 = 0x5EA5_0025;

/// Runtime settings, read from `AVAILBENCH_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchConfig {
    /// Directory for the store's WAL. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    pub reports_dir: PathBuf,
    pub seed: u64,
    pub batch_size: usize,
    pub metrics_port: Option<u16>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            reports_dir: PathBuf::from("reports"),
            seed: DEFAULT_SEED,
            batch_size: BATCH_SIZE,
            metrics_port: None,
        }
    }
}

impl BenchConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("AVAILBENCH_DATA_DIR").map(PathBuf::from),
            reports_dir: lookup("AVAILBENCH_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.reports_dir),
            seed: lookup("AVAILBENCH_SEED")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.seed),
            batch_size: lookup("AVAILBENCH_BATCH_SIZE")
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.batch_size),
            metrics_port: lookup("AVAILBENCH_METRICS_PORT").and_then(|s| s.parse().ok()),
        }
    }
}
