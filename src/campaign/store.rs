//! In-memory campaign arena.
//!
//! Campaigns are kept in an id-indexed map; each one sits behind its own
//! lock so concurrent hosts only contend when they touch the same campaign.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};

use super::{
    ArchivedCampaign, Campaign, CampaignEvent, CampaignId, CampaignStatus, QueryResult, QueryTarget,
};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub type CampaignHandle = Arc<Mutex<CampaignRecord>>;

/// Outcome of recording a result against a campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// The host already answered; the earlier result stands
    Duplicate,
    /// The host was never handed this campaign
    NotOffered,
}

/// A campaign plus its per-host bookkeeping
#[derive(Debug, Clone)]
pub struct CampaignRecord {
    campaign: Campaign,
    expected: BTreeSet<String>,
    targets: BTreeMap<String, QueryTarget>,
    results: BTreeMap<String, QueryResult>,
}

impl CampaignRecord {
    pub fn new(campaign: Campaign, expected: BTreeSet<String>) -> Self {
        Self {
            campaign,
            expected,
            targets: BTreeMap::new(),
            results: BTreeMap::new(),
        }
    }

    pub fn campaign(&self) -> &Campaign {
        &self.campaign
    }

    pub fn status(&self) -> CampaignStatus {
        self.campaign.status
    }

    /// Hosts matched when the campaign was created
    pub fn expected_hosts(&self) -> &BTreeSet<String> {
        &self.expected
    }

    pub fn target(&self, host: &str) -> Option<&QueryTarget> {
        self.targets.get(host)
    }

    pub fn results(&self) -> impl Iterator<Item = &QueryResult> {
        self.results.values()
    }

    pub fn has_result(&self, host: &str) -> bool {
        self.results.contains_key(host)
    }

    /// Move from `expected` to `next` if the campaign is still in `expected`
    /// and the move goes forward. Returns the event to publish on success.
    pub fn compare_and_set_status(
        &mut self,
        expected: CampaignStatus,
        next: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Option<CampaignEvent> {
        if self.campaign.status != expected || !expected.can_transition_to(next) {
            return None;
        }
        self.campaign.status = next;
        self.campaign.updated_at = at;
        self.campaign.version += 1;
        Some(CampaignEvent::StatusChanged {
            id: self.campaign.id,
            from: expected,
            to: next,
            at,
        })
    }

    /// Hand the campaign to a host. Returns false if it already had it.
    pub fn offer(&mut self, host: &str, at: DateTime<Utc>) -> bool {
        if self.targets.contains_key(host) {
            return false;
        }
        self.targets.insert(
            host.to_string(),
            QueryTarget {
                host: host.to_string(),
                offered_at: at,
                responded_at: None,
            },
        );
        true
    }

    pub fn record_result(&mut self, result: QueryResult) -> RecordOutcome {
        let Some(target) = self.targets.get_mut(&result.host) else {
            return RecordOutcome::NotOffered;
        };
        if self.results.contains_key(&result.host) {
            return RecordOutcome::Duplicate;
        }
        target.responded_at = Some(result.received_at);
        self.results.insert(result.host.clone(), result);
        RecordOutcome::Recorded
    }

    /// Every host that was expected or offered has answered
    pub fn is_fully_answered(&self) -> bool {
        self.expected
            .iter()
            .chain(self.targets.keys())
            .all(|host| self.results.contains_key(host))
    }

    /// Hosts still owing an answer
    pub fn outstanding_hosts(&self) -> BTreeSet<&str> {
        self.expected
            .iter()
            .chain(self.targets.keys())
            .filter(|host| !self.results.contains_key(*host))
            .map(String::as_str)
            .collect()
    }

    /// Seconds of accelerate window left at `now`
    pub fn accelerate_remaining(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.campaign
            .accelerate_until
            .map(|until| until - now)
            .filter(|left| *left > chrono::Duration::zero())
    }
}

/// Id-indexed campaign storage with a live event feed
pub struct CampaignStore {
    next_id: AtomicU64,
    campaigns: RwLock<BTreeMap<CampaignId, CampaignHandle>>,
    events: broadcast::Sender<CampaignEvent>,
}

impl CampaignStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            next_id: AtomicU64::new(1),
            campaigns: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    pub fn allocate_id(&self) -> CampaignId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn insert(&self, record: CampaignRecord) -> CampaignHandle {
        let id = record.campaign.id;
        let handle = Arc::new(Mutex::new(record));
        self.campaigns.write().await.insert(id, handle.clone());
        handle
    }

    pub async fn get(&self, id: CampaignId) -> Option<CampaignHandle> {
        self.campaigns.read().await.get(&id).cloned()
    }

    /// All campaigns in id order
    pub async fn handles(&self) -> Vec<(CampaignId, CampaignHandle)> {
        self.campaigns
            .read()
            .await
            .iter()
            .map(|(id, handle)| (*id, handle.clone()))
            .collect()
    }

    pub async fn snapshot(&self, id: CampaignId) -> Option<Campaign> {
        let handle = self.get(id).await?;
        let record = handle.lock().await;
        Some(record.campaign.clone())
    }

    pub async fn results(&self, id: CampaignId) -> Option<Vec<QueryResult>> {
        let handle = self.get(id).await?;
        let record = handle.lock().await;
        Some(record.results.values().cloned().collect())
    }

    pub async fn len(&self) -> usize {
        self.campaigns.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.campaigns.read().await.is_empty()
    }

    pub async fn count_with_status(&self, status: CampaignStatus) -> usize {
        let mut count = 0;
        for (_, handle) in self.handles().await {
            if handle.lock().await.status() == status {
                count += 1;
            }
        }
        count
    }

    /// Remove closed campaigns last updated before `cutoff`, returning each
    /// one together with its collected results
    pub async fn remove_closed_before(&self, cutoff: DateTime<Utc>) -> Vec<ArchivedCampaign> {
        let mut stale = Vec::new();
        for (id, handle) in self.handles().await {
            let record = handle.lock().await;
            if record.status().is_closed() && record.campaign.updated_at < cutoff {
                stale.push(id);
            }
        }

        if stale.is_empty() {
            return Vec::new();
        }

        let removed: Vec<CampaignHandle> = {
            let mut campaigns = self.campaigns.write().await;
            stale
                .into_iter()
                .filter_map(|id| campaigns.remove(&id))
                .collect()
        };

        let mut archived = Vec::with_capacity(removed.len());
        for handle in removed {
            let mut record = handle.lock().await;
            let results = std::mem::take(&mut record.results);
            archived.push(ArchivedCampaign {
                campaign: record.campaign.clone(),
                results: results.into_values().collect(),
            });
        }
        archived
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CampaignEvent> {
        self.events.subscribe()
    }

    /// Publish to live subscribers. Having none is not an error.
    pub fn publish(&self, event: CampaignEvent) {
        let _ = self.events.send(event);
    }
}

impl Default for CampaignStore {
    fn default() -> Self {
        Self::new()
    }
}
