//! Sentinel Policy
//!
//! How often the sentinel sweeps and how long closed campaigns are kept.

use pulsar::config::{CampaignConfig, MAX_DURATION_SECS};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelPolicy {
    /// Seconds between sweeps
    ///
    /// **Default:** 60
    pub sweep_interval_s: u64,

    /// Closed campaigns are archived once they have been closed this long
    ///
    /// **Default:** 604800 (7 days)
    pub retention_s: u64,
}

impl Default for SentinelPolicy {
    fn default() -> Self {
        Self::from(&CampaignConfig::default())
    }
}

impl From<&CampaignConfig> for SentinelPolicy {
    fn from(config: &CampaignConfig) -> Self {
        Self {
            sweep_interval_s: config.sweep_interval_secs,
            retention_s: config.retention_secs,
        }
    }
}

impl SentinelPolicy {
    /// Validate the policy configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.sweep_interval_s == 0 {
            return Err("sweep_interval_s must be greater than 0".to_string());
        }
        for (name, secs) in [
            ("sweep_interval_s", self.sweep_interval_s),
            ("retention_s", self.retention_s),
        ] {
            if secs > MAX_DURATION_SECS {
                return Err(format!(
                    "{} must be at most {} seconds",
                    name, MAX_DURATION_SECS
                ));
            }
        }
        Ok(())
    }
}
