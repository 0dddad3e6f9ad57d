//! Request logging around any [`AgentService`].
//!
//! Every call is logged with its method, the caller's address, the error if
//! any, and how long it took, and counted in [`ServiceStats`].

use async_trait::async_trait;
use std::time::Instant;
use tracing::{info, warn};

use super::{
    AgentService, DistributedQueries, DistributedQueryResults, DistributedQueryStatuses,
    RequestContext,
};
use crate::agent_config::ConfigDocument;
use crate::campaign::SubmissionReport;
use crate::error::Result;
use crate::host::{Host, NodeKey};
use crate::instrumentation::{Operation, ServiceStats};
use crate::logs::LogRecord;

pub struct LoggingMiddleware<S> {
    inner: S,
    stats: ServiceStats,
}

impl<S: AgentService> LoggingMiddleware<S> {
    pub fn new(inner: S) -> Self {
        Self::with_stats(inner, ServiceStats::new())
    }

    /// Share counters with something else (e.g. a stats endpoint)
    pub fn with_stats(inner: S, stats: ServiceStats) -> Self {
        Self { inner, stats }
    }

    pub fn stats(&self) -> &ServiceStats {
        &self.stats
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn observe<T>(
        &self,
        op: Operation,
        ctx: &RequestContext,
        started: Instant,
        result: &Result<T>,
    ) {
        let took = started.elapsed();
        let took_micros = took.as_micros() as u64;
        let took_ms = took.as_millis() as u64;
        let ip_addr = ctx.remote_addr.as_deref().unwrap_or("-");

        match result {
            Ok(_) => {
                self.stats.record_success(op, took_micros);
                info!(
                    method = op.as_str(),
                    ip_addr,
                    request_id = %ctx.request_id,
                    took_ms,
                    "request"
                );
            }
            Err(e) => {
                self.stats.record_failure(op, e, took_micros);
                warn!(
                    method = op.as_str(),
                    ip_addr,
                    request_id = %ctx.request_id,
                    err = %e,
                    category = %e.category(),
                    took_ms,
                    "request failed"
                );
            }
        }
    }
}

#[async_trait]
impl<S: AgentService> AgentService for LoggingMiddleware<S> {
    async fn enroll_agent(
        &self,
        ctx: &RequestContext,
        enroll_secret: &str,
        host_identifier: &str,
    ) -> Result<NodeKey> {
        let started = Instant::now();
        let result = self
            .inner
            .enroll_agent(ctx, enroll_secret, host_identifier)
            .await;
        self.observe(Operation::EnrollAgent, ctx, started, &result);
        result
    }

    async fn authenticate_host(&self, ctx: &RequestContext, node_key: &str) -> Result<Host> {
        let started = Instant::now();
        let result = self.inner.authenticate_host(ctx, node_key).await;
        self.observe(Operation::AuthenticateHost, ctx, started, &result);
        result
    }

    async fn get_client_config(
        &self,
        ctx: &RequestContext,
        host: &Host,
    ) -> Result<ConfigDocument> {
        let started = Instant::now();
        let result = self.inner.get_client_config(ctx, host).await;
        self.observe(Operation::GetClientConfig, ctx, started, &result);
        result
    }

    async fn get_distributed_queries(
        &self,
        ctx: &RequestContext,
        host: &Host,
    ) -> Result<DistributedQueries> {
        let started = Instant::now();
        let result = self.inner.get_distributed_queries(ctx, host).await;
        self.observe(Operation::GetDistributedQueries, ctx, started, &result);
        result
    }

    async fn submit_distributed_query_results(
        &self,
        ctx: &RequestContext,
        host: &Host,
        results: DistributedQueryResults,
        statuses: DistributedQueryStatuses,
    ) -> Result<SubmissionReport> {
        let started = Instant::now();
        let result = self
            .inner
            .submit_distributed_query_results(ctx, host, results, statuses)
            .await;
        if let Ok(report) = &result {
            self.stats.record_rejections(report.rejected.len());
        }
        self.observe(Operation::SubmitDistributedQueryResults, ctx, started, &result);
        result
    }

    async fn submit_status_logs(
        &self,
        ctx: &RequestContext,
        host: &Host,
        logs: &[LogRecord],
    ) -> Result<()> {
        let started = Instant::now();
        let result = self.inner.submit_status_logs(ctx, host, logs).await;
        self.observe(Operation::SubmitStatusLogs, ctx, started, &result);
        result
    }

    async fn submit_result_logs(
        &self,
        ctx: &RequestContext,
        host: &Host,
        logs: &[LogRecord],
    ) -> Result<()> {
        let started = Instant::now();
        let result = self.inner.submit_result_logs(ctx, host, logs).await;
        self.observe(Operation::SubmitResultLogs, ctx, started, &result);
        result
    }
}
