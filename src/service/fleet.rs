//! The concrete control plane.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::warn;

use super::{
    AgentService, DistributedQueries, DistributedQueryResults, DistributedQueryStatuses,
    RequestContext,
};
use crate::agent_config::{ConfigDistributor, ConfigDocument, ConfigSource};
use crate::campaign::{
    CampaignStore, QueryCampaignScheduler, Rejection, ResultCollector, SubmissionReport,
};
use crate::clock::{Clock, SystemClock};
use crate::config::PulsarConfig;
use crate::enrollment::{EnrollmentManager, NodeKeyGenerator, RandomKeyGenerator};
use crate::error::Result;
use crate::host::{Host, NodeKey};
use crate::identity::IdentityStore;
use crate::logs::{sink, LogIngestionPipeline, LogRecord, LogSink};
use crate::query_name::QueryName;
use crate::refresh::{HostRefresher, RefreshAnswer};

/// Wires enrollment, config, campaigns, refresh and log ingestion together
pub struct FleetService {
    enrollment: EnrollmentManager,
    distributor: ConfigDistributor,
    scheduler: Arc<QueryCampaignScheduler>,
    collector: ResultCollector,
    refresher: HostRefresher,
    logs: LogIngestionPipeline,
}

impl FleetService {
    pub fn builder(
        config: PulsarConfig,
        identity: Arc<dyn IdentityStore>,
        source: Arc<dyn ConfigSource>,
    ) -> FleetServiceBuilder {
        FleetServiceBuilder::new(config, identity, source)
    }

    /// Campaign control for operators and the sweeper
    pub fn scheduler(&self) -> Arc<QueryCampaignScheduler> {
        self.scheduler.clone()
    }
}

#[async_trait]
impl AgentService for FleetService {
    async fn enroll_agent(
        &self,
        _ctx: &RequestContext,
        enroll_secret: &str,
        host_identifier: &str,
    ) -> Result<NodeKey> {
        self.enrollment.enroll(enroll_secret, host_identifier).await
    }

    async fn authenticate_host(&self, _ctx: &RequestContext, node_key: &str) -> Result<Host> {
        self.enrollment.authenticate(node_key).await
    }

    async fn get_client_config(
        &self,
        _ctx: &RequestContext,
        host: &Host,
    ) -> Result<ConfigDocument> {
        self.distributor.get_config(host).await
    }

    async fn get_distributed_queries(
        &self,
        _ctx: &RequestContext,
        host: &Host,
    ) -> Result<DistributedQueries> {
        let mut queries = self.refresher.pending_queries(host).await;

        let offer = self.scheduler.get_distributed_queries(host).await;
        let accelerate = match (offer.accelerate, self.refresher.accelerate_for(host)) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        queries.extend(
            offer
                .queries
                .into_iter()
                .map(|(id, query)| (QueryName::Campaign(id).to_string(), query)),
        );

        Ok(DistributedQueries {
            queries,
            accelerate_secs: accelerate
                .map(|d| d.num_seconds().max(0) as u64)
                .unwrap_or(0),
        })
    }

    async fn submit_distributed_query_results(
        &self,
        _ctx: &RequestContext,
        host: &Host,
        mut results: DistributedQueryResults,
        mut statuses: DistributedQueryStatuses,
    ) -> Result<SubmissionReport> {
        let names: BTreeSet<String> = results.keys().chain(statuses.keys()).cloned().collect();

        let mut report = SubmissionReport::default();
        let mut campaign_rows = BTreeMap::new();
        let mut campaign_statuses = BTreeMap::new();
        let mut details = Vec::new();
        let mut labels = Vec::new();

        for name in names {
            let rows = results.remove(&name).unwrap_or_default();
            let status = statuses.remove(&name);
            match QueryName::parse(&name) {
                Some(QueryName::Campaign(id)) => {
                    if campaign_rows.contains_key(&id) {
                        report
                            .rejected
                            .push(Rejection::unsolicited(name, "duplicate campaign id"));
                        continue;
                    }
                    campaign_rows.insert(id, rows);
                    if let Some(status) = status {
                        campaign_statuses.insert(id, status);
                    }
                }
                Some(QueryName::Detail(detail)) => details.push(RefreshAnswer {
                    name: detail,
                    rows,
                    status: status.unwrap_or_default(),
                }),
                Some(QueryName::Label(label)) => labels.push(RefreshAnswer {
                    name: label,
                    rows,
                    status: status.unwrap_or_default(),
                }),
                None => report
                    .rejected
                    .push(Rejection::unsolicited(name, "unrecognized query name")),
            }
        }

        report.merge(
            self.collector
                .submit(host, campaign_rows, campaign_statuses)
                .await,
        );
        report.merge(self.refresher.ingest_details(host, details).await);
        report.merge(self.refresher.ingest_labels(host, labels).await);

        if !report.is_clean() {
            warn!(
                host = %host.identifier,
                rejected = report.rejected.len(),
                accepted = report.accepted.len(),
                "Some query results were rejected"
            );
        }
        Ok(report)
    }

    async fn submit_status_logs(
        &self,
        _ctx: &RequestContext,
        host: &Host,
        logs: &[LogRecord],
    ) -> Result<()> {
        self.logs.submit_status_logs(host, logs).await
    }

    async fn submit_result_logs(
        &self,
        _ctx: &RequestContext,
        host: &Host,
        logs: &[LogRecord],
    ) -> Result<()> {
        self.logs.submit_result_logs(host, logs).await
    }
}

/// Builder for [`FleetService`]; collaborators not set explicitly come from config
pub struct FleetServiceBuilder {
    config: PulsarConfig,
    identity: Arc<dyn IdentityStore>,
    source: Arc<dyn ConfigSource>,
    clock: Option<Arc<dyn Clock>>,
    keys: Option<Arc<dyn NodeKeyGenerator>>,
    status_sink: Option<Arc<dyn LogSink>>,
    result_sink: Option<Arc<dyn LogSink>>,
    campaigns: Option<Arc<CampaignStore>>,
}

impl FleetServiceBuilder {
    pub fn new(
        config: PulsarConfig,
        identity: Arc<dyn IdentityStore>,
        source: Arc<dyn ConfigSource>,
    ) -> Self {
        Self {
            config,
            identity,
            source,
            clock: None,
            keys: None,
            status_sink: None,
            result_sink: None,
            campaigns: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn key_generator(mut self, keys: Arc<dyn NodeKeyGenerator>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn status_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.status_sink = Some(sink);
        self
    }

    pub fn result_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.result_sink = Some(sink);
        self
    }

    /// Share a campaign store with other components
    pub fn campaign_store(mut self, store: Arc<CampaignStore>) -> Self {
        self.campaigns = Some(store);
        self
    }

    pub fn build(self) -> Result<FleetService> {
        self.config.validate()?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let keys = self.keys.unwrap_or_else(|| {
            Arc::new(RandomKeyGenerator::new(self.config.enrollment.node_key_bytes))
                as Arc<dyn NodeKeyGenerator>
        });
        let campaigns = self.campaigns.unwrap_or_default();

        let sinks = &self.config.log_sinks;
        let status_sink = self
            .status_sink
            .unwrap_or_else(|| sink::from_kind(&sinks.status));
        let result_sink = self
            .result_sink
            .unwrap_or_else(|| sink::from_kind(&sinks.result));

        Ok(FleetService {
            enrollment: EnrollmentManager::new(
                self.identity.clone(),
                keys,
                clock.clone(),
                &self.config.enrollment,
            ),
            distributor: ConfigDistributor::new(self.source.clone(), &self.config.agent_options),
            scheduler: Arc::new(QueryCampaignScheduler::new(
                campaigns.clone(),
                self.identity.clone(),
                clock.clone(),
                &self.config.campaigns,
            )),
            collector: ResultCollector::new(campaigns, clock.clone()),
            refresher: HostRefresher::new(
                self.identity,
                self.source,
                clock,
                &self.config.host_refresh,
            ),
            logs: LogIngestionPipeline::new(
                status_sink,
                result_sink,
                std::time::Duration::from_secs(sinks.forward_timeout_secs),
            ),
        })
    }
}
