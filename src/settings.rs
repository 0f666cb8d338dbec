use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timings of the supervision policy, shared by every controller of a host.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ControllerSettings {
    /// Pause between a failed run and the next attempt.
    #[serde(with = "humantime_serde", default = "default_backoff")]
    pub backoff: Duration,
    /// Pause between the stop and start halves of a restart.
    #[serde(with = "humantime_serde", default = "default_settle_delay")]
    pub settle_delay: Duration,
    /// Upper bound on waiting for a killed child to be reaped.
    #[serde(with = "humantime_serde", default = "default_drain_delay")]
    pub drain_delay: Duration,
    /// Bytes of recent output kept per program.
    #[serde(default = "default_output_cache_size")]
    pub output_cache_size: usize,
}

fn default_backoff() -> Duration {
    Duration::from_secs(2)
}

fn default_settle_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_drain_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_output_cache_size() -> usize {
    2usize.pow(10) * 8
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            backoff: default_backoff(),
            settle_delay: default_settle_delay(),
            drain_delay: default_drain_delay(),
            output_cache_size: default_output_cache_size(),
        }
    }
}
