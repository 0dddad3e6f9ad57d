//! The agent-facing service contract.
//!
//! [`AgentService`] is the fixed set of calls an agent makes. Transport
//! layers decode requests into these calls; cross-cutting concerns such as
//! request logging wrap an implementation rather than modify it (see
//! [`LoggingMiddleware`]).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::agent_config::ConfigDocument;
use crate::campaign::{QueryStatus, Row, SubmissionReport};
use crate::error::Result;
use crate::host::{Host, NodeKey};
use crate::logs::LogRecord;

pub mod fleet;
pub mod logging;

pub use fleet::{FleetService, FleetServiceBuilder};
pub use logging::LoggingMiddleware;

/// Rows keyed by query name
pub type DistributedQueryResults = BTreeMap<String, Vec<Row>>;

/// Execution statuses keyed by query name
pub type DistributedQueryStatuses = BTreeMap<String, QueryStatus>;

/// Per-call metadata supplied by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Peer address as seen by the transport
    pub remote_addr: Option<String>,
    pub request_id: Uuid,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            remote_addr: None,
            request_id: Uuid::new_v4(),
        }
    }

    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Queries for one check-in, keyed by query name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedQueries {
    pub queries: BTreeMap<String, String>,

    /// Seconds the agent should poll at an accelerated rate (0 = normal)
    pub accelerate_secs: u64,
}

#[async_trait]
pub trait AgentService: Send + Sync {
    /// Exchange an enroll secret for a node key
    async fn enroll_agent(
        &self,
        ctx: &RequestContext,
        enroll_secret: &str,
        host_identifier: &str,
    ) -> Result<NodeKey>;

    /// Resolve a node key to its host
    async fn authenticate_host(&self, ctx: &RequestContext, node_key: &str) -> Result<Host>;

    async fn get_client_config(&self, ctx: &RequestContext, host: &Host)
        -> Result<ConfigDocument>;

    async fn get_distributed_queries(
        &self,
        ctx: &RequestContext,
        host: &Host,
    ) -> Result<DistributedQueries>;

    /// Accepts what it can; rejected entries are reported, not raised
    async fn submit_distributed_query_results(
        &self,
        ctx: &RequestContext,
        host: &Host,
        results: DistributedQueryResults,
        statuses: DistributedQueryStatuses,
    ) -> Result<SubmissionReport>;

    async fn submit_status_logs(
        &self,
        ctx: &RequestContext,
        host: &Host,
        logs: &[LogRecord],
    ) -> Result<()>;

    async fn submit_result_logs(
        &self,
        ctx: &RequestContext,
        host: &Host,
        logs: &[LogRecord],
    ) -> Result<()>;
}
