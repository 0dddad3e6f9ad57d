//! Host detail and label refresh.
//!
//! Alongside campaign queries, hosts are periodically handed a fixed set of
//! detail queries (platform, hostname, agent version) and every applicable
//! label query. Their answers update the host record rather than a campaign.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::agent_config::{ConfigSource, LabelQuery};
use crate::campaign::{QueryStatus, Rejection, Row, SubmissionReport};
use crate::clock::Clock;
use crate::config::{saturating_duration, HostRefreshConfig};
use crate::host::{Host, HostDetailsPatch};
use crate::identity::IdentityStore;
use crate::query_name::QueryName;

/// A built-in query whose first row fills part of the host record
struct DetailQuery {
    name: &'static str,
    query: &'static str,
    ingest: fn(&Row, &mut HostDetailsPatch),
}

const DETAIL_QUERIES: &[DetailQuery] = &[
    DetailQuery {
        name: "os_version",
        query: "SELECT name, version, platform FROM os_version LIMIT 1",
        ingest: ingest_os_version,
    },
    DetailQuery {
        name: "system_info",
        query: "SELECT hostname FROM system_info LIMIT 1",
        ingest: ingest_system_info,
    },
    DetailQuery {
        name: "osquery_info",
        query: "SELECT version FROM osquery_info LIMIT 1",
        ingest: ingest_agent_info,
    },
];

fn column(row: &Row, name: &str) -> Option<String> {
    row.get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn ingest_os_version(row: &Row, patch: &mut HostDetailsPatch) {
    patch.platform = column(row, "platform");
    patch.os_version = match (column(row, "name"), column(row, "version")) {
        (Some(name), Some(version)) => Some(format!("{} {}", name, version)),
        (name, version) => name.or(version),
    };
}

fn ingest_system_info(row: &Row, patch: &mut HostDetailsPatch) {
    patch.hostname = column(row, "hostname");
}

fn ingest_agent_info(row: &Row, patch: &mut HostDetailsPatch) {
    patch.agent_version = column(row, "version");
}

/// Detail or label answer from one submission
#[derive(Debug, Clone)]
pub struct RefreshAnswer {
    pub name: String,
    pub rows: Vec<Row>,
    pub status: QueryStatus,
}

pub struct HostRefresher {
    identity: Arc<dyn IdentityStore>,
    source: Arc<dyn ConfigSource>,
    clock: Arc<dyn Clock>,
    detail_interval: Duration,
    label_interval: Duration,
    new_host_accelerate: Duration,
}

impl HostRefresher {
    pub fn new(
        identity: Arc<dyn IdentityStore>,
        source: Arc<dyn ConfigSource>,
        clock: Arc<dyn Clock>,
        config: &HostRefreshConfig,
    ) -> Self {
        Self {
            identity,
            source,
            clock,
            detail_interval: saturating_duration(config.detail_interval_secs),
            label_interval: saturating_duration(config.label_interval_secs),
            new_host_accelerate: saturating_duration(config.new_host_accelerate_secs),
        }
    }

    fn is_stale(last: Option<DateTime<Utc>>, interval: Duration, now: DateTime<Utc>) -> bool {
        last.map_or(true, |at| now - at >= interval)
    }

    /// Accelerate hint for hosts we know nothing about yet
    pub fn accelerate_for(&self, host: &Host) -> Option<Duration> {
        (host.platform().is_none() && self.new_host_accelerate > Duration::zero())
            .then_some(self.new_host_accelerate)
    }

    /// Detail and label queries due for this host, keyed by query name.
    ///
    /// A failed label lookup only drops the label queries for this check-in.
    pub async fn pending_queries(&self, host: &Host) -> BTreeMap<String, String> {
        let now = self.clock.now();
        let mut queries = BTreeMap::new();

        if Self::is_stale(host.details_updated_at, self.detail_interval, now) {
            for detail in DETAIL_QUERIES {
                queries.insert(
                    QueryName::Detail(detail.name.to_string()).to_string(),
                    detail.query.to_string(),
                );
            }
        }

        if Self::is_stale(host.labels_updated_at, self.label_interval, now) {
            match self.source.label_queries().await {
                Ok(labels) => {
                    for label in labels.into_iter().filter(|l| l.applies_to(host)) {
                        queries.insert(QueryName::Label(label.name).to_string(), label.query);
                    }
                }
                Err(e) => {
                    warn!(
                        host = %host.identifier,
                        error = %e,
                        "Label lookup failed, skipping label queries"
                    );
                }
            }
        }

        queries
    }

    /// Fold detail answers into one host update.
    ///
    /// The refresh time is only stamped when at least one answer carried a
    /// usable row.
    pub async fn ingest_details(
        &self,
        host: &Host,
        answers: Vec<RefreshAnswer>,
    ) -> SubmissionReport {
        let mut report = SubmissionReport::default();
        if answers.is_empty() {
            return report;
        }

        let mut patch = HostDetailsPatch::default();
        let mut applied = Vec::new();
        for answer in answers {
            let query_name = QueryName::Detail(answer.name.clone()).to_string();
            let Some(detail) = DETAIL_QUERIES.iter().find(|d| d.name == answer.name) else {
                report
                    .rejected
                    .push(Rejection::unsolicited(query_name, "unknown detail query"));
                continue;
            };
            if !answer.status.is_success() {
                warn!(
                    host = %host.identifier,
                    query = detail.name,
                    code = answer.status.code,
                    "Detail query failed on host"
                );
            } else if let Some(row) = answer.rows.first() {
                (detail.ingest)(row, &mut patch);
            }
            applied.push(query_name);
        }

        // Failed or empty answers leave the details stale so they are asked again
        if patch.is_empty() {
            report.accepted.extend(applied);
            return report;
        }

        match self
            .identity
            .update_host_details(&host.identifier, patch, self.clock.now())
            .await
        {
            Ok(_) => report.accepted.extend(applied),
            Err(e) => {
                error!(host = %host.identifier, error = %e, "Failed to store host details");
                report.rejected.extend(
                    applied
                        .into_iter()
                        .map(|name| Rejection::upstream(name, e.to_string())),
                );
            }
        }
        report
    }

    /// Apply label answers. Any row means membership; no rows or a failed
    /// execution means none.
    ///
    /// Only answers to label queries this host would currently be handed are
    /// applied: the label must exist, cover the host's platform and be due.
    pub async fn ingest_labels(
        &self,
        host: &Host,
        answers: Vec<RefreshAnswer>,
    ) -> SubmissionReport {
        let mut report = SubmissionReport::default();
        if answers.is_empty() {
            return report;
        }

        let known: Vec<LabelQuery> = match self.source.label_queries().await {
            Ok(labels) => labels,
            Err(e) => {
                error!(
                    host = %host.identifier,
                    error = %e,
                    "Label lookup failed, skipping label results"
                );
                report.rejected.extend(answers.into_iter().map(|a| {
                    Rejection::upstream(QueryName::Label(a.name).to_string(), e.to_string())
                }));
                return report;
            }
        };

        let due = Self::is_stale(host.labels_updated_at, self.label_interval, self.clock.now());
        let mut memberships = BTreeMap::new();
        let mut applied = Vec::new();
        for answer in answers {
            let query_name = QueryName::Label(answer.name.clone()).to_string();
            let reason = match known.iter().find(|l| l.name == answer.name) {
                None => Some("unknown label"),
                Some(label) if !label.applies_to(host) => {
                    Some("label does not cover host platform")
                }
                Some(_) if !due => Some("label refresh not due"),
                Some(_) => None,
            };
            if let Some(reason) = reason {
                debug!(
                    host = %host.identifier,
                    query = %query_name,
                    reason,
                    "Label answer ignored"
                );
                report
                    .rejected
                    .push(Rejection::unsolicited(query_name, reason));
                continue;
            }
            let member = answer.status.is_success() && !answer.rows.is_empty();
            memberships.insert(answer.name, member);
            applied.push(query_name);
        }

        if memberships.is_empty() {
            return report;
        }

        match self
            .identity
            .set_label_memberships(&host.identifier, &memberships, self.clock.now())
            .await
        {
            Ok(updated) => {
                debug!(host = %host.identifier, labels = updated.labels.len(), "Labels refreshed");
                report.accepted.extend(applied);
            }
            Err(e) => {
                error!(host = %host.identifier, error = %e, "Failed to store label memberships");
                report.rejected.extend(
                    applied
                        .into_iter()
                        .map(|name| Rejection::upstream(name, e.to_string())),
                );
            }
        }
        report
    }
}
