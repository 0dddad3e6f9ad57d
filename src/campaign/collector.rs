//! Campaign result ingestion.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::store::{CampaignStore, RecordOutcome};
use super::{CampaignEvent, CampaignId, CampaignStatus, QueryResult, QueryStatus, Row};
use crate::clock::Clock;
use crate::host::Host;
use crate::query_name::QueryName;

/// Why a single result entry was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// Unknown campaign, unrecognised name, or a campaign never offered to the host
    UnsolicitedResult,
    /// A collaborator needed to apply the result was unavailable
    UpstreamUnavailable,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::UnsolicitedResult => write!(f, "unsolicited_result"),
            RejectionReason::UpstreamUnavailable => write!(f, "upstream_unavailable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub query: String,
    pub reason: RejectionReason,
    pub detail: String,
}

impl Rejection {
    pub fn unsolicited(query: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            reason: RejectionReason::UnsolicitedResult,
            detail: detail.into(),
        }
    }

    pub fn upstream(query: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            reason: RejectionReason::UpstreamUnavailable,
            detail: detail.into(),
        }
    }
}

/// Per-entry outcome of one result submission.
///
/// Entries are independent: a rejected entry never prevents the others
/// from being applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionReport {
    /// Query names whose results were applied
    pub accepted: Vec<String>,

    /// Query names the host had already answered
    pub duplicates: Vec<String>,

    pub rejected: Vec<Rejection>,

    /// Campaigns this submission completed
    pub completed: Vec<CampaignId>,
}

impl SubmissionReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }

    pub fn merge(&mut self, other: SubmissionReport) {
        self.accepted.extend(other.accepted);
        self.duplicates.extend(other.duplicates);
        self.rejected.extend(other.rejected);
        self.completed.extend(other.completed);
    }
}

pub struct ResultCollector {
    store: Arc<CampaignStore>,
    clock: Arc<dyn Clock>,
}

impl ResultCollector {
    pub fn new(store: Arc<CampaignStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Record campaign results and statuses from one host.
    ///
    /// A campaign present only in `statuses` is recorded with no rows; one
    /// present only in `results` is treated as successful.
    pub async fn submit(
        &self,
        host: &Host,
        mut results: BTreeMap<CampaignId, Vec<Row>>,
        mut statuses: BTreeMap<CampaignId, QueryStatus>,
    ) -> SubmissionReport {
        let ids: BTreeSet<CampaignId> = results.keys().chain(statuses.keys()).copied().collect();
        let now = self.clock.now();
        let mut report = SubmissionReport::default();

        for id in ids {
            let name = QueryName::Campaign(id).to_string();
            let rows = results.remove(&id).unwrap_or_default();
            let status = statuses.remove(&id).unwrap_or_default();

            let Some(handle) = self.store.get(id).await else {
                warn!(host = %host.identifier, campaign = id, "Result for unknown campaign");
                report
                    .rejected
                    .push(Rejection::unsolicited(name, "unknown campaign"));
                continue;
            };

            let mut record = handle.lock().await;
            let row_count = rows.len();
            let success = status.is_success();
            let outcome = record.record_result(QueryResult {
                campaign_id: id,
                host: host.identifier.clone(),
                rows,
                status,
                received_at: now,
            });

            match outcome {
                RecordOutcome::NotOffered => {
                    warn!(
                        host = %host.identifier,
                        campaign = id,
                        "Result for campaign never offered to host"
                    );
                    report
                        .rejected
                        .push(Rejection::unsolicited(name, "campaign not offered to host"));
                }
                RecordOutcome::Duplicate => {
                    debug!(host = %host.identifier, campaign = id, "Duplicate result ignored");
                    report.duplicates.push(name);
                }
                RecordOutcome::Recorded => {
                    self.store.publish(CampaignEvent::ResultRecorded {
                        id,
                        host: host.identifier.clone(),
                        rows: row_count,
                        success,
                    });
                    report.accepted.push(name);

                    if record.is_fully_answered() {
                        if let Some(event) = record.compare_and_set_status(
                            CampaignStatus::Running,
                            CampaignStatus::Complete,
                            now,
                        ) {
                            info!(campaign = id, "Campaign complete");
                            self.store.publish(event);
                            report.completed.push(id);
                        }
                    }
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::store::CampaignRecord;
    use crate::campaign::Campaign;
    use crate::clock::ManualClock;
    use crate::host::NodeKey;
    use crate::selector::TargetSelector;
    use chrono::Utc;

    fn host(id: &str) -> Host {
        Host::new(id, NodeKey::new(format!("key-{}", id)), Utc::now())
    }

    async fn running_campaign(store: &CampaignStore, hosts: &[&str]) -> CampaignId {
        let now = Utc::now();
        let id = store.allocate_id();
        let mut record = CampaignRecord::new(
            Campaign {
                id,
                query: "SELECT 1".to_string(),
                selector: TargetSelector::hosts(hosts.iter().copied()),
                status: CampaignStatus::Running,
                created_at: now,
                updated_at: now,
                accelerate_until: None,
                expected_targets: hosts.len(),
                version: 0,
            },
            hosts.iter().map(|h| h.to_string()).collect(),
        );
        for h in hosts {
            record.offer(h, now);
        }
        store.insert(record).await;
        id
    }

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| Row::from([("n".to_string(), i.to_string())]))
            .collect()
    }

    #[tokio::test]
    async fn test_completion_after_all_hosts_answer() {
        let store = Arc::new(CampaignStore::new());
        let collector = ResultCollector::new(store.clone(), Arc::new(ManualClock::default()));
        let id = running_campaign(&store, &["h1", "h2"]).await;

        let report = collector
            .submit(&host("h1"), BTreeMap::from([(id, rows(2))]), BTreeMap::new())
            .await;
        assert_eq!(report.accepted.len(), 1);
        assert!(report.completed.is_empty());

        let report = collector
            .submit(
                &host("h2"),
                BTreeMap::new(),
                BTreeMap::from([(id, QueryStatus::failure(1, "no such table"))]),
            )
            .await;
        assert_eq!(report.completed, vec![id]);
        assert_eq!(
            store.snapshot(id).await.unwrap().status,
            CampaignStatus::Complete
        );
    }

    #[tokio::test]
    async fn test_duplicate_is_noop() {
        let store = Arc::new(CampaignStore::new());
        let collector = ResultCollector::new(store.clone(), Arc::new(ManualClock::default()));
        let id = running_campaign(&store, &["h1", "h2"]).await;

        collector
            .submit(&host("h1"), BTreeMap::from([(id, rows(2))]), BTreeMap::new())
            .await;
        let report = collector
            .submit(&host("h1"), BTreeMap::from([(id, rows(5))]), BTreeMap::new())
            .await;

        assert!(report.accepted.is_empty());
        assert_eq!(report.duplicates.len(), 1);
        let results = store.results(id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rows.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_and_unoffered_rejected_independently() {
        let store = Arc::new(CampaignStore::new());
        let collector = ResultCollector::new(store.clone(), Arc::new(ManualClock::default()));
        let id = running_campaign(&store, &["h1"]).await;
        let other = running_campaign(&store, &["h2"]).await;

        let report = collector
            .submit(
                &host("h1"),
                BTreeMap::from([(id, rows(1)), (other, rows(1)), (999, rows(1))]),
                BTreeMap::new(),
            )
            .await;

        assert_eq!(report.accepted, vec![QueryName::Campaign(id).to_string()]);
        assert_eq!(report.rejected.len(), 2);
        assert!(report
            .rejected
            .iter()
            .all(|r| r.reason == RejectionReason::UnsolicitedResult));
        assert_eq!(report.completed, vec![id]);
    }

    #[tokio::test]
    async fn test_late_result_on_expired_campaign_is_kept() {
        let store = Arc::new(CampaignStore::new());
        let collector = ResultCollector::new(store.clone(), Arc::new(ManualClock::default()));
        let id = running_campaign(&store, &["h1", "h2"]).await;
        {
            let handle = store.get(id).await.unwrap();
            let mut record = handle.lock().await;
            record.compare_and_set_status(
                CampaignStatus::Running,
                CampaignStatus::Expired,
                Utc::now(),
            );
        }

        let report = collector
            .submit(&host("h1"), BTreeMap::from([(id, rows(1))]), BTreeMap::new())
            .await;
        let report2 = collector
            .submit(&host("h2"), BTreeMap::from([(id, rows(1))]), BTreeMap::new())
            .await;

        assert_eq!(report.accepted.len(), 1);
        assert!(report2.completed.is_empty());
        assert_eq!(
            store.snapshot(id).await.unwrap().status,
            CampaignStatus::Expired
        );
        assert_eq!(store.results(id).await.unwrap().len(), 2);
    }
}
