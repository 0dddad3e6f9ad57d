//! Shared fixture: an in-process fleet wired the way an embedder would.

#![allow(dead_code)]

use pulsar::logs::{LogSink, MemorySink};
use pulsar::{
    AgentService, Clock, EnrollSecret, FleetService, Host, LoggingMiddleware, ManualClock,
    MemoryConfigSource, MemoryIdentityStore, NodeKey, PulsarConfig, QueryCampaignScheduler,
    RequestContext, Row,
};
use serde_json::value::RawValue;
use std::sync::Arc;

pub struct Fleet {
    pub service: Arc<LoggingMiddleware<FleetService>>,
    pub scheduler: Arc<QueryCampaignScheduler>,
    pub identity: Arc<MemoryIdentityStore>,
    pub source: Arc<MemoryConfigSource>,
    pub clock: ManualClock,
    pub status_logs: Arc<MemorySink>,
    pub result_logs: Arc<MemorySink>,
}

impl Fleet {
    pub fn new(secrets: impl IntoIterator<Item = EnrollSecret>) -> Self {
        Self::with_config(PulsarConfig::default(), secrets)
    }

    pub fn with_config(
        config: PulsarConfig,
        secrets: impl IntoIterator<Item = EnrollSecret>,
    ) -> Self {
        Self::with_sinks(
            config,
            secrets,
            Arc::new(MemorySink::new()),
            Arc::new(MemorySink::new()),
        )
    }

    pub fn with_sinks(
        config: PulsarConfig,
        secrets: impl IntoIterator<Item = EnrollSecret>,
        status_logs: Arc<MemorySink>,
        result_logs: Arc<MemorySink>,
    ) -> Self {
        let identity = Arc::new(MemoryIdentityStore::with_secrets(secrets));
        let source = Arc::new(MemoryConfigSource::new());
        let clock = ManualClock::default();

        let service = FleetService::builder(config, identity.clone(), source.clone())
            .clock(Arc::new(clock.clone()))
            .status_sink(status_logs.clone() as Arc<dyn LogSink>)
            .result_sink(result_logs.clone() as Arc<dyn LogSink>)
            .build()
            .expect("valid fleet config");
        let scheduler = service.scheduler();

        Self {
            service: Arc::new(LoggingMiddleware::new(service)),
            scheduler,
            identity,
            source,
            clock,
            status_logs,
            result_logs,
        }
    }

    pub async fn enroll(&self, secret: &str, identifier: &str) -> (NodeKey, Host) {
        let key = self
            .service
            .enroll_agent(&ctx(), secret, identifier)
            .await
            .expect("enrollment succeeds");
        let host = self
            .service
            .authenticate_host(&ctx(), key.as_str())
            .await
            .expect("fresh key authenticates");
        (key, host)
    }

    /// Re-read a host so label and detail changes are visible
    pub async fn refetch(&self, host: &Host) -> Host {
        use pulsar::IdentityStore;
        self.identity
            .host(&host.identifier)
            .await
            .unwrap()
            .expect("host exists")
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }
}

pub fn ctx() -> RequestContext {
    RequestContext::new().with_remote_addr("192.0.2.10:40000")
}

pub fn rows(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| Row::from([("uid".to_string(), i.to_string())]))
        .collect()
}

pub fn record(json: &str) -> Box<RawValue> {
    RawValue::from_string(json.to_string()).unwrap()
}
