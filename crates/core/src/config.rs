use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_usize(key: &str, default: usize) -> usize {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_opt(key).as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("1") | Some("true") | Some("yes") | Some("on") => true,
        Some("0") | Some("false") | Some("no") | Some("off") => false,
        _ => default,
    }
}

/// Scheduler and engine configuration.
///
/// Deserializable with per-field defaults, or read from `ABSINT_*`
/// environment variables via [`ScheduleConfig::from_env`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Number of worker threads for root batches. 0 = available parallelism.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Period after which the coordination loop re-checks for arbitration
    /// even without a notification.
    #[serde(default = "default_check_period_ms")]
    pub check_period_ms: u64,
    /// Wait for every branch of a multi-branch evaluation instead of joining
    /// only the branches that already finished.
    #[serde(default)]
    pub wait_for_all_branches: bool,
    /// Name prefix for pool threads.
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

fn default_worker_threads() -> usize { 0 }
fn default_check_period_ms() -> u64 { 3000 }
fn default_thread_name_prefix() -> String { "infer".to_string() }

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            check_period_ms: default_check_period_ms(),
            wait_for_all_branches: false,
            thread_name_prefix: default_thread_name_prefix(),
        }
    }
}

impl ScheduleConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            worker_threads: env_usize("ABSINT_WORKER_THREADS", default_worker_threads()),
            check_period_ms: env_u64("ABSINT_CHECK_PERIOD_MS", default_check_period_ms()),
            wait_for_all_branches: env_bool("ABSINT_WAIT_FOR_ALL_BRANCHES", false),
            thread_name_prefix: env_or("ABSINT_THREAD_NAME_PREFIX", &default_thread_name_prefix()),
        }
    }

    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }

    /// Re-check period of the coordination loop. Never zero.
    pub fn check_period(&self) -> Duration {
        Duration::from_millis(self.check_period_ms.max(1))
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Schedule config loaded:");
        tracing::info!("  workers:   {} (resolved {})", self.worker_threads, self.resolved_worker_threads());
        tracing::info!("  recheck:   {}ms", self.check_period_ms);
        tracing::info!("  branches:  wait_for_all={}", self.wait_for_all_branches);
    }

    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "worker_threads": self.worker_threads,
            "resolved_worker_threads": self.resolved_worker_threads(),
            "check_period_ms": self.check_period_ms,
            "wait_for_all_branches": self.wait_for_all_branches,
            "thread_name_prefix": self.thread_name_prefix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ScheduleConfig::default();
        assert_eq!(config.worker_threads, 0);
        assert_eq!(config.check_period_ms, 3000);
        assert!(!config.wait_for_all_branches);
        assert_eq!(config.thread_name_prefix, "infer");
        assert_eq!(config.check_period(), Duration::from_secs(3));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: ScheduleConfig =
            serde_json::from_str(r#"{ "worker_threads": 6, "wait_for_all_branches": true }"#).unwrap();
        assert_eq!(config.worker_threads, 6);
        assert!(config.wait_for_all_branches);
        assert_eq!(config.check_period_ms, 3000);
        assert_eq!(config.thread_name_prefix, "infer");
    }

    #[test]
    fn resolved_worker_threads() {
        let mut config = ScheduleConfig::default();
        // 0 means auto-detect
        assert!(config.resolved_worker_threads() > 0);

        config.worker_threads = 8;
        assert_eq!(config.resolved_worker_threads(), 8);
    }

    #[test]
    fn from_env_reads_overrides() {
        load_dotenv();
        env::set_var("ABSINT_CHECK_PERIOD_MS", "250");
        env::set_var("ABSINT_WAIT_FOR_ALL_BRANCHES", "yes");
        env::set_var("ABSINT_THREAD_NAME_PREFIX", "");

        let config = ScheduleConfig::from_env();
        assert_eq!(config.check_period_ms, 250);
        assert!(config.wait_for_all_branches);
        // Empty values fall back to the default.
        assert_eq!(config.thread_name_prefix, "infer");

        env::remove_var("ABSINT_CHECK_PERIOD_MS");
        env::remove_var("ABSINT_WAIT_FOR_ALL_BRANCHES");
        env::remove_var("ABSINT_THREAD_NAME_PREFIX");
    }

    #[test]
    fn zero_check_period_is_clamped() {
        let config = ScheduleConfig {
            check_period_ms: 0,
            ..ScheduleConfig::default()
        };
        assert_eq!(config.check_period(), Duration::from_millis(1));
    }

    #[test]
    fn summary_reports_resolved_workers() {
        let config = ScheduleConfig {
            worker_threads: 3,
            ..ScheduleConfig::default()
        };
        let summary = config.summary();
        assert_eq!(summary["worker_threads"], 3);
        assert_eq!(summary["resolved_worker_threads"], 3);
        assert_eq!(summary["thread_name_prefix"], "infer");
    }
}
