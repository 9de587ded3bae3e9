// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Saved preferences for worker and coordinator processes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Config key for [`WorkerPrefs`].
pub const WORKER_KEY: &str = "worker";
/// Config key for [`CoordinatorPrefs`].
pub const COORDINATOR_KEY: &str = "coordinator";

/// Worker process settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WorkerPrefs {
    /// Unix socket to listen on; `None` uses the per-user runtime default.
    pub socket_path: Option<PathBuf>,
    /// `tracing` filter directive, e.g. `"info"` or `"rayfarm_worker=debug"`.
    pub log_filter: Option<String>,
}

/// Coordinator settings: which workers to use and how hard to try.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorPrefs {
    /// Worker socket paths, one per compute worker.
    pub workers: Vec<PathBuf>,
    /// Timeout applied to every remote call, in milliseconds.
    pub call_timeout_ms: u64,
    /// Retries of one range against the same worker before reassigning it.
    pub max_retries: u32,
}

impl Default for CoordinatorPrefs {
    fn default() -> Self {
        Self {
            workers: Vec::new(),
            call_timeout_ms: 30_000,
            max_retries: 2,
        }
    }
}

impl CoordinatorPrefs {
    /// [`Self::call_timeout_ms`] as a `Duration`.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let prefs: CoordinatorPrefs =
            serde_json::from_str(r#"{ "workers": ["/tmp/a.sock"] }"#).unwrap();
        assert_eq!(prefs.workers, vec![PathBuf::from("/tmp/a.sock")]);
        assert_eq!(prefs.max_retries, 2);
        assert_eq!(prefs.call_timeout(), Duration::from_secs(30));
    }
}
