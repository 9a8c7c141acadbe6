//! Knobs consumed by compilation, job solving and batch execution.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine options. Read-only once handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Worker pool size; `0` uses the available parallelism.
    pub workers: usize,
    pub shuffle_jobs: bool,
    /// Seed for the job shuffle; `None` draws one from the OS.
    pub shuffle_seed: Option<u64>,
    /// Per-job solve limit in milliseconds; `0` is unlimited.
    pub job_timeout_ms: u64,
    /// Batch limit in milliseconds; `0` is unlimited.
    pub max_runtime_ms: u64,
    pub simplify: bool,
    pub halt_on_job_failure: bool,
    /// Directory receiving one SMT-LIB script per solved job.
    pub dump_smt: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            workers: 0,
            shuffle_jobs: true,
            shuffle_seed: None,
            job_timeout_ms: 300_000,
            max_runtime_ms: 0,
            simplify: true,
            halt_on_job_failure: false,
            dump_smt: None,
        }
    }
}

impl EngineSettings {
    /// Single-threaded, unshuffled execution.
    pub fn sequential() -> Self {
        Self {
            workers: 1,
            shuffle_jobs: false,
            ..Self::default()
        }
    }

    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn max_runtime(&self) -> Option<Duration> {
        (self.max_runtime_ms > 0).then(|| Duration::from_millis(self.max_runtime_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limits_are_unlimited() {
        let settings = EngineSettings {
            job_timeout_ms: 0,
            max_runtime_ms: 0,
            ..EngineSettings::default()
        };
        assert_eq!(settings.max_runtime(), None);
        assert!(settings.effective_workers() >= 1);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: EngineSettings =
            serde_json::from_str(r#"{ "workers": 4, "dump_smt": "/tmp/nodal-smt" }"#).unwrap();
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.dump_smt.as_deref(), Some(std::path::Path::new("/tmp/nodal-smt")));
        assert!(settings.simplify);
        assert_eq!(settings.job_timeout_ms, 300_000);
    }
}
