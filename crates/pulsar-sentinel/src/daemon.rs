//! Sentinel Daemon
//!
//! Background loop that expires overdue campaigns and archives closed ones.

use pulsar::config::saturating_duration;
use pulsar::QueryCampaignScheduler;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::metrics::{SweepStats, SweepStatsBuilder};
use crate::policy::SentinelPolicy;

#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("Invalid sentinel policy: {0}")]
    InvalidPolicy(String),
}

pub struct Sentinel {
    scheduler: Arc<QueryCampaignScheduler>,
    policy: SentinelPolicy,
}

impl Sentinel {
    pub fn new(
        scheduler: Arc<QueryCampaignScheduler>,
        policy: SentinelPolicy,
    ) -> Result<Self, SentinelError> {
        policy.validate().map_err(SentinelError::InvalidPolicy)?;
        Ok(Self { scheduler, policy })
    }

    pub fn policy(&self) -> &SentinelPolicy {
        &self.policy
    }

    /// Main loop - runs forever
    ///
    /// Typically spawned as a background task:
    ///
    /// ```no_run
    /// # use pulsar_sentinel::Sentinel;
    /// # fn example(sentinel: Sentinel) {
    /// tokio::spawn(async move {
    ///     sentinel.run().await;
    /// });
    /// # }
    /// ```
    pub async fn run(self) {
        self.run_until(std::future::pending()).await;
    }

    /// Sweep on every interval tick until `shutdown` resolves.
    ///
    /// Returns the number of sweeps performed.
    pub async fn run_until<F>(self, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        info!(
            sweep_interval_s = self.policy.sweep_interval_s,
            retention_s = self.policy.retention_s,
            "Sentinel active"
        );

        let mut interval = tokio::time::interval(Duration::from_secs(self.policy.sweep_interval_s));
        tokio::pin!(shutdown);
        let mut sweeps = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    self.run_sweep().await;
                    sweeps += 1;
                }
            }
        }

        info!(sweeps, "Sentinel stopped");
        sweeps
    }

    /// Execute a single sweep
    pub async fn run_sweep(&self) -> SweepStats {
        let mut builder = SweepStatsBuilder::new();

        let expired = self.scheduler.expire_overdue().await;
        builder.record_expired(expired.len());

        let retention = saturating_duration(self.policy.retention_s);
        let archived = self.scheduler.archive_closed(retention).await;
        for entry in &archived {
            debug!(
                campaign = entry.campaign.id,
                results = entry.results.len(),
                "Archived campaign"
            );
        }
        builder.record_archived(archived.len());

        builder.set_running(self.scheduler.running_count().await);
        let stats = builder.finish();

        if stats.expired > 0 {
            warn!(expired = stats.expired, "Campaigns expired during sweep");
        }
        if stats.had_effect() {
            info!("{}", stats.summary());
        } else {
            debug!("{}", stats.summary());
        }
        stats
    }
}
