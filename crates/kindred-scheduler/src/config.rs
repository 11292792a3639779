use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// Longest interval or threshold a config may ask for: one year.
pub const MAX_PERIOD_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct InitiativeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Full sweep over every remembered conversation.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Silence after which a scripted identity speaks first.
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_secs: u64,
    /// Lighter pass over conversations created since the previous sweep.
    /// Zero disables it.
    #[serde(default = "default_recheck_interval")]
    pub recheck_interval_secs: u64,
}

impl Default for InitiativeConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            sweep_interval_secs: default_sweep_interval(),
            idle_threshold_secs: default_idle_threshold(),
            recheck_interval_secs: default_recheck_interval(),
        }
    }
}

impl InitiativeConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn recheck_interval(&self) -> Option<Duration> {
        (self.recheck_interval_secs > 0).then(|| Duration::from_secs(self.recheck_interval_secs))
    }

    /// Saturates at [`TimeDelta::MAX`] for values chrono cannot represent.
    pub fn idle_threshold(&self) -> TimeDelta {
        i64::try_from(self.idle_threshold_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }

    /// Names the first setting outside `1..=MAX_PERIOD_SECS` (zero is allowed
    /// for the recheck interval, which it disables).
    pub fn out_of_range(&self) -> Option<&'static str> {
        if self.sweep_interval_secs == 0 || self.sweep_interval_secs > MAX_PERIOD_SECS {
            return Some("sweep_interval_secs");
        }
        if self.idle_threshold_secs > MAX_PERIOD_SECS {
            return Some("idle_threshold_secs");
        }
        if self.recheck_interval_secs > MAX_PERIOD_SECS {
            return Some("recheck_interval_secs");
        }
        None
    }
}

fn default_true() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    30 * 60
}

fn default_idle_threshold() -> u64 {
    2 * 60 * 60
}

fn default_recheck_interval() -> u64 {
    5 * 60
}
