/*!
 * Log ingestion integration tests
 *
 * Status and result logs pass through to their sinks untouched and in
 * order; sink failures surface as retryable errors.
 */

mod common;

use common::{ctx, record, Fleet};
use pulsar::config::SinkKind;
use pulsar::instrumentation::Operation;
use pulsar::{
    AgentService, EnrollSecret, FleetService, LoggingMiddleware, MemoryConfigSource,
    MemoryIdentityStore, PulsarConfig, PulsarError,
};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_logs_forwarded_verbatim_and_in_order() {
    let fleet = Fleet::new([EnrollSecret::new("s")]);
    let (_, host) = fleet.enroll("s", "h1").await;

    let status = vec![
        record(r#"{"severity":"0","message":"started"}"#),
        record(r#"{"severity":"1","message":"config refreshed",  "extra":[1,2]}"#),
    ];
    let results = vec![record(r#"{"name":"pack_logins","action":"added"}"#)];

    fleet
        .service
        .submit_status_logs(&ctx(), &host, &status)
        .await
        .unwrap();
    fleet
        .service
        .submit_result_logs(&ctx(), &host, &results)
        .await
        .unwrap();

    let stored = fleet.status_logs.records().await;
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].0, "h1");
    assert_eq!(stored[0].1, r#"{"severity":"0","message":"started"}"#);
    // Whitespace and key order survive untouched
    assert_eq!(
        stored[1].1,
        r#"{"severity":"1","message":"config refreshed",  "extra":[1,2]}"#
    );

    let stored = fleet.result_logs.records().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].1, r#"{"name":"pack_logins","action":"added"}"#);
}

#[tokio::test]
async fn test_empty_batch_accepted() {
    let fleet = Fleet::new([EnrollSecret::new("s")]);
    let (_, host) = fleet.enroll("s", "h1").await;

    fleet
        .service
        .submit_status_logs(&ctx(), &host, &[])
        .await
        .unwrap();
    assert!(fleet.status_logs.records().await.is_empty());
}

#[tokio::test]
async fn test_filesystem_sinks_from_config() {
    let dir = TempDir::new().unwrap();
    let status_path = dir.path().join("status.log");
    let result_path = dir.path().join("result.log");

    let mut config = PulsarConfig::default();
    config.log_sinks.status = SinkKind::Filesystem {
        path: status_path.clone(),
    };
    config.log_sinks.result = SinkKind::Filesystem {
        path: result_path.clone(),
    };

    let identity = Arc::new(MemoryIdentityStore::with_secrets([EnrollSecret::new("s")]));
    let service = FleetService::builder(config, identity, Arc::new(MemoryConfigSource::new()))
        .build()
        .unwrap();
    let service = LoggingMiddleware::new(service);

    let key = service.enroll_agent(&ctx(), "s", "h1").await.unwrap();
    let host = service.authenticate_host(&ctx(), key.as_str()).await.unwrap();

    service
        .submit_status_logs(&ctx(), &host, &[record(r#"{"a":1}"#)])
        .await
        .unwrap();
    service
        .submit_status_logs(&ctx(), &host, &[record(r#"{"a":2}"#), record(r#"{"a":3}"#)])
        .await
        .unwrap();
    service
        .submit_result_logs(&ctx(), &host, &[record(r#"{"r":true}"#)])
        .await
        .unwrap();

    let written = tokio::fs::read_to_string(&status_path).await.unwrap();
    assert_eq!(written, "{\"a\":1}\n{\"a\":2}\n{\"a\":3}\n");
    let written = tokio::fs::read_to_string(&result_path).await.unwrap();
    assert_eq!(written, "{\"r\":true}\n");
}

#[tokio::test]
async fn test_sink_failure_is_retryable() {
    let dir = TempDir::new().unwrap();

    // A directory cannot be opened for appending
    let mut config = PulsarConfig::default();
    config.log_sinks.result = SinkKind::Filesystem {
        path: dir.path().to_path_buf(),
    };
    config.log_sinks.status = SinkKind::Discard;

    let identity = Arc::new(MemoryIdentityStore::with_secrets([EnrollSecret::new("s")]));
    let service = FleetService::builder(config, identity, Arc::new(MemoryConfigSource::new()))
        .build()
        .unwrap();
    let service = LoggingMiddleware::new(service);

    let key = service.enroll_agent(&ctx(), "s", "h1").await.unwrap();
    let host = service.authenticate_host(&ctx(), key.as_str()).await.unwrap();

    let err = service
        .submit_result_logs(&ctx(), &host, &[record(r#"{"r":1}"#)])
        .await
        .unwrap_err();
    assert!(matches!(err, PulsarError::LogForwardingFailed(_)));
    assert!(err.is_transient());
    assert!(!err.requires_reenroll());

    // The other sink is unaffected
    service
        .submit_status_logs(&ctx(), &host, &[record(r#"{"s":1}"#)])
        .await
        .unwrap();

    let stats = service.stats().snapshot();
    assert_eq!(stats.operation(Operation::SubmitResultLogs).failures, 1);
    assert_eq!(stats.operation(Operation::SubmitStatusLogs).failures, 0);
    assert_eq!(stats.upstream_errors, 1);
}
