//! Campaign creation, host polling and expiry.

use chrono::Duration;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::store::{CampaignRecord, CampaignStore};
use super::{
    ArchivedCampaign, Campaign, CampaignEvent, CampaignId, CampaignSpec, CampaignStatus,
    QueryResult,
};
use crate::clock::Clock;
use crate::config::{checked_duration, saturating_duration, CampaignConfig, MAX_DURATION_SECS};
use crate::error::{PulsarError, Result};
use crate::host::Host;
use crate::identity::IdentityStore;

/// Campaign queries handed to one polling host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CampaignOffer {
    pub queries: BTreeMap<CampaignId, String>,

    /// Longest accelerate window among matching, unanswered campaigns
    pub accelerate: Option<Duration>,
}

impl CampaignOffer {
    pub fn accelerate_secs(&self) -> u64 {
        self.accelerate
            .map(|d| d.num_seconds().max(0) as u64)
            .unwrap_or(0)
    }
}

pub struct QueryCampaignScheduler {
    store: Arc<CampaignStore>,
    identity: Arc<dyn IdentityStore>,
    clock: Arc<dyn Clock>,
    max_lifetime: Duration,
    default_accelerate: Duration,
}

impl QueryCampaignScheduler {
    pub fn new(
        store: Arc<CampaignStore>,
        identity: Arc<dyn IdentityStore>,
        clock: Arc<dyn Clock>,
        config: &CampaignConfig,
    ) -> Self {
        Self {
            store,
            identity,
            clock,
            max_lifetime: saturating_duration(config.max_lifetime_secs),
            default_accelerate: saturating_duration(config.default_accelerate_secs),
        }
    }

    pub fn store(&self) -> &Arc<CampaignStore> {
        &self.store
    }

    /// Launch a campaign against the hosts matching `spec.selector`.
    ///
    /// A selector matching no enrolled host yields a campaign that is
    /// already Complete.
    pub async fn create_campaign(&self, spec: CampaignSpec) -> Result<Campaign> {
        if spec.query.trim().is_empty() {
            return Err(PulsarError::InvalidRequest(
                "campaign query must not be empty".to_string(),
            ));
        }
        let accelerate = match spec.accelerate_secs {
            Some(secs) => checked_duration(secs).ok_or_else(|| {
                PulsarError::InvalidRequest(format!(
                    "accelerate_secs must be at most {}",
                    MAX_DURATION_SECS
                ))
            })?,
            None => self.default_accelerate,
        };

        let hosts = self
            .identity
            .list_hosts()
            .await
            .map_err(|e| PulsarError::UpstreamLookupFailed(e.to_string()))?;
        let expected: BTreeSet<String> = hosts
            .iter()
            .filter(|host| spec.selector.matches(host))
            .map(|host| host.identifier.clone())
            .collect();

        let now = self.clock.now();
        let accelerate_until = if accelerate > Duration::zero() {
            let until = now.checked_add_signed(accelerate).ok_or_else(|| {
                PulsarError::InvalidRequest("accelerate window out of range".to_string())
            })?;
            Some(until)
        } else {
            None
        };

        let campaign = Campaign {
            id: self.store.allocate_id(),
            query: spec.query,
            selector: spec.selector,
            status: CampaignStatus::Pending,
            created_at: now,
            updated_at: now,
            accelerate_until,
            expected_targets: expected.len(),
            version: 0,
        };
        self.store.publish(CampaignEvent::Created {
            campaign: campaign.clone(),
        });

        let no_targets = expected.is_empty();
        let mut record = CampaignRecord::new(campaign, expected);
        let next = if no_targets {
            CampaignStatus::Complete
        } else {
            CampaignStatus::Running
        };
        if let Some(event) = record.compare_and_set_status(CampaignStatus::Pending, next, now) {
            self.store.publish(event);
        }

        let campaign = record.campaign().clone();
        self.store.insert(record).await;

        info!(
            campaign = campaign.id,
            targets = campaign.expected_targets,
            status = %campaign.status,
            "Campaign created"
        );
        Ok(campaign)
    }

    /// Running campaigns this host should execute now.
    ///
    /// Each campaign is offered to a host at most once. The accelerate hint
    /// also covers campaigns offered earlier that the host has not answered.
    pub async fn get_distributed_queries(&self, host: &Host) -> CampaignOffer {
        self.expire_overdue().await;

        let now = self.clock.now();
        let mut offer = CampaignOffer::default();

        for (id, handle) in self.store.handles().await {
            let mut record = handle.lock().await;
            if record.status() != CampaignStatus::Running {
                continue;
            }
            let targeted = record.expected_hosts().contains(&host.identifier)
                || record.target(&host.identifier).is_some()
                || record.campaign().selector.matches(host);
            if !targeted || record.has_result(&host.identifier) {
                continue;
            }

            if record.offer(&host.identifier, now) {
                offer.queries.insert(id, record.campaign().query.clone());
            }
            if let Some(left) = record.accelerate_remaining(now) {
                offer.accelerate = Some(offer.accelerate.map_or(left, |cur| cur.max(left)));
            }
        }

        if !offer.queries.is_empty() {
            debug!(
                host = %host.identifier,
                campaigns = offer.queries.len(),
                "Offering campaigns"
            );
        }
        offer
    }

    /// Expire running campaigns older than the maximum lifetime
    pub async fn expire_overdue(&self) -> Vec<CampaignId> {
        let now = self.clock.now();
        let mut expired = Vec::new();

        for (id, handle) in self.store.handles().await {
            let mut record = handle.lock().await;
            if now - record.campaign().created_at < self.max_lifetime {
                continue;
            }
            if let Some(event) =
                record.compare_and_set_status(CampaignStatus::Running, CampaignStatus::Expired, now)
            {
                warn!(
                    campaign = id,
                    outstanding = record.outstanding_hosts().len(),
                    "Campaign expired before all hosts answered"
                );
                self.store.publish(event);
                expired.push(id);
            }
        }
        expired
    }

    /// Remove campaigns that have been closed for longer than `retention`.
    ///
    /// The removed campaigns are returned with their results so the caller
    /// can persist them elsewhere.
    pub async fn archive_closed(&self, retention: Duration) -> Vec<ArchivedCampaign> {
        let Some(cutoff) = self.clock.now().checked_sub_signed(retention) else {
            return Vec::new();
        };
        let archived = self.store.remove_closed_before(cutoff).await;
        if !archived.is_empty() {
            info!(count = archived.len(), "Archived closed campaigns");
        }
        archived
    }

    pub async fn campaign(&self, id: CampaignId) -> Option<Campaign> {
        self.store.snapshot(id).await
    }

    pub async fn results(&self, id: CampaignId) -> Option<Vec<QueryResult>> {
        self.store.results(id).await
    }

    pub async fn running_count(&self) -> usize {
        self.store.count_with_status(CampaignStatus::Running).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CampaignEvent> {
        self.store.subscribe()
    }
}
