//! Status and result log ingestion.
//!
//! Records are opaque to the control plane: they are forwarded to the
//! configured sink byte for byte. A batch either reaches the sink in full
//! or the call fails and the agent resends the whole batch.

use serde_json::value::RawValue;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::config::LogSinksConfig;
use crate::error::{PulsarError, Result};
use crate::host::Host;

pub mod sink;

pub use sink::{DiscardSink, FilesystemSink, LogSink, MemorySink, SinkError, StdoutSink};

/// One agent log record, kept as the raw JSON the agent sent
pub type LogRecord = Box<RawValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Status,
    Result,
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogKind::Status => write!(f, "status"),
            LogKind::Result => write!(f, "result"),
        }
    }
}

pub struct LogIngestionPipeline {
    status: Arc<dyn LogSink>,
    result: Arc<dyn LogSink>,
    timeout: Duration,
}

impl LogIngestionPipeline {
    pub fn new(status: Arc<dyn LogSink>, result: Arc<dyn LogSink>, timeout: Duration) -> Self {
        Self {
            status,
            result,
            timeout,
        }
    }

    pub fn from_config(config: &LogSinksConfig) -> Self {
        Self::new(
            sink::from_kind(&config.status),
            sink::from_kind(&config.result),
            Duration::from_secs(config.forward_timeout_secs),
        )
    }

    pub async fn submit_status_logs(&self, host: &Host, records: &[LogRecord]) -> Result<()> {
        self.forward(host, LogKind::Status, records).await
    }

    pub async fn submit_result_logs(&self, host: &Host, records: &[LogRecord]) -> Result<()> {
        self.forward(host, LogKind::Result, records).await
    }

    async fn forward(&self, host: &Host, kind: LogKind, records: &[LogRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let sink = match kind {
            LogKind::Status => &self.status,
            LogKind::Result => &self.result,
        };

        match tokio::time::timeout(self.timeout, sink.write_batch(&host.identifier, records)).await
        {
            Ok(Ok(())) => {
                debug!(
                    host = %host.identifier,
                    kind = %kind,
                    records = records.len(),
                    sink = sink.name(),
                    "Forwarded log batch"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                error!(
                    host = %host.identifier,
                    kind = %kind,
                    sink = sink.name(),
                    error = %e,
                    "Log sink failed"
                );
                Err(PulsarError::LogForwardingFailed(format!("{} sink: {}", kind, e)))
            }
            Err(_) => {
                error!(
                    host = %host.identifier,
                    kind = %kind,
                    sink = sink.name(),
                    timeout_secs = self.timeout.as_secs(),
                    "Log sink timed out"
                );
                Err(PulsarError::LogForwardingFailed(format!(
                    "{} sink timed out after {:?}",
                    kind, self.timeout
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NodeKey;
    use async_trait::async_trait;
    use chrono::Utc;

    struct FailingSink;

    #[async_trait]
    impl LogSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        async fn write_batch(
            &self,
            _host: &str,
            _records: &[LogRecord],
        ) -> std::result::Result<(), SinkError> {
            Err(SinkError::Rejected("broken pipe".to_string()))
        }
    }

    struct StalledSink;

    #[async_trait]
    impl LogSink for StalledSink {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn write_batch(
            &self,
            _host: &str,
            _records: &[LogRecord],
        ) -> std::result::Result<(), SinkError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn host() -> Host {
        Host::new("h1", NodeKey::new("k1"), Utc::now())
    }

    fn records(n: usize) -> Vec<LogRecord> {
        (0..n)
            .map(|i| RawValue::from_string(format!(r#"{{"seq":{}}}"#, i)).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_routes_by_kind() {
        let status = Arc::new(MemorySink::new());
        let result = Arc::new(MemorySink::new());
        let pipeline =
            LogIngestionPipeline::new(status.clone(), result.clone(), Duration::from_secs(1));

        pipeline.submit_status_logs(&host(), &records(2)).await.unwrap();
        pipeline.submit_result_logs(&host(), &records(1)).await.unwrap();

        assert_eq!(status.records().await.len(), 2);
        assert_eq!(result.records().await.len(), 1);
        assert_eq!(status.records().await[1].1, r#"{"seq":1}"#);
    }

    #[tokio::test]
    async fn test_sink_failure_fails_batch() {
        let pipeline = LogIngestionPipeline::new(
            Arc::new(FailingSink),
            Arc::new(DiscardSink),
            Duration::from_secs(1),
        );
        let err = pipeline.submit_status_logs(&host(), &records(3)).await.unwrap_err();
        assert!(matches!(err, PulsarError::LogForwardingFailed(_)));
        assert!(err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_timeout() {
        let pipeline = LogIngestionPipeline::new(
            Arc::new(DiscardSink),
            Arc::new(StalledSink),
            Duration::from_secs(5),
        );
        let err = pipeline.submit_result_logs(&host(), &records(1)).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_empty_batch_never_reaches_sink() {
        let pipeline = LogIngestionPipeline::new(
            Arc::new(FailingSink),
            Arc::new(FailingSink),
            Duration::from_secs(1),
        );
        assert!(pipeline.submit_status_logs(&host(), &[]).await.is_ok());
    }
}
