/*!
 * Result ingestion integration tests
 *
 * Mixed submissions of campaign, detail and label answers: partial
 * acceptance, duplicates, and the host record updates they drive.
 */

mod common;

use chrono::Duration;
use common::{ctx, rows, Fleet};
use pulsar::campaign::RejectionReason;
use pulsar::query_name::{QueryName, CAMPAIGN_QUERY_PREFIX, LABEL_QUERY_PREFIX};
use pulsar::{
    AgentService, CampaignSpec, CampaignStatus, EnrollSecret, LabelQuery, QueryStatus, Row,
    TargetSelector,
};
use std::collections::BTreeMap;

fn row(pairs: &[(&str, &str)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn detail(name: &str) -> String {
    QueryName::Detail(name.to_string()).to_string()
}

fn label(name: &str) -> String {
    QueryName::Label(name.to_string()).to_string()
}

#[tokio::test]
async fn test_bad_entries_do_not_block_good_ones() {
    let fleet = Fleet::new([EnrollSecret::new("s")]);
    let (_, host) = fleet.enroll("s", "h1").await;

    let campaign = fleet
        .scheduler
        .create_campaign(CampaignSpec::new("SELECT 1", TargetSelector::all()))
        .await
        .unwrap();
    fleet
        .service
        .get_distributed_queries(&ctx(), &host)
        .await
        .unwrap();

    let good = QueryName::Campaign(campaign.id).to_string();
    let unknown_campaign = QueryName::Campaign(campaign.id + 1000).to_string();
    let results = BTreeMap::from([
        (good.clone(), rows(3)),
        (unknown_campaign.clone(), rows(1)),
        ("something_else".to_string(), rows(1)),
        (detail("kernel_modules"), rows(1)),
    ]);

    let report = fleet
        .service
        .submit_distributed_query_results(&ctx(), &host, results, BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(report.accepted, vec![good]);
    assert_eq!(report.completed, vec![campaign.id]);
    assert_eq!(report.rejected.len(), 3);
    assert!(report
        .rejected
        .iter()
        .all(|r| r.reason == RejectionReason::UnsolicitedResult));
    assert!(report.rejected.iter().any(|r| r.query == unknown_campaign));

    let stats = fleet.service.stats().snapshot();
    assert_eq!(stats.rejected_results, 3);
    assert_eq!(stats.total_failures(), 0);
}

#[tokio::test]
async fn test_resubmission_is_a_noop() {
    let fleet = Fleet::new([EnrollSecret::new("s")]);
    let (_, h1) = fleet.enroll("s", "h1").await;
    fleet.enroll("s", "h2").await;

    let campaign = fleet
        .scheduler
        .create_campaign(CampaignSpec::new("SELECT 1", TargetSelector::all()))
        .await
        .unwrap();
    fleet
        .service
        .get_distributed_queries(&ctx(), &h1)
        .await
        .unwrap();

    let name = QueryName::Campaign(campaign.id).to_string();
    let first = fleet
        .service
        .submit_distributed_query_results(
            &ctx(),
            &h1,
            BTreeMap::from([(name.clone(), rows(2))]),
            BTreeMap::new(),
        )
        .await
        .unwrap();
    assert_eq!(first.accepted, vec![name.clone()]);

    let second = fleet
        .service
        .submit_distributed_query_results(
            &ctx(),
            &h1,
            BTreeMap::from([(name.clone(), rows(5))]),
            BTreeMap::from([(name.clone(), QueryStatus::failure(2, "retry"))]),
        )
        .await
        .unwrap();
    assert!(second.accepted.is_empty());
    assert_eq!(second.duplicates, vec![name]);
    assert!(second.is_clean());

    let results = fleet.scheduler.results(campaign.id).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].rows.len(), 2);
    assert!(results[0].status.is_success());
    // h2 is still owed an answer
    assert_eq!(
        fleet.scheduler.campaign(campaign.id).await.unwrap().status,
        CampaignStatus::Running
    );
}

#[tokio::test]
async fn test_one_answer_per_campaign_id() {
    let fleet = Fleet::new([EnrollSecret::new("s")]);
    let (_, h1) = fleet.enroll("s", "h1").await;
    fleet.enroll("s", "h2").await;

    let campaign = fleet
        .scheduler
        .create_campaign(CampaignSpec::new("SELECT 1", TargetSelector::all()))
        .await
        .unwrap();
    fleet
        .service
        .get_distributed_queries(&ctx(), &h1)
        .await
        .unwrap();

    let name = QueryName::Campaign(campaign.id).to_string();
    let padded = format!("{}0{}", CAMPAIGN_QUERY_PREFIX, campaign.id);
    let signed = format!("{}+{}", CAMPAIGN_QUERY_PREFIX, campaign.id);
    let report = fleet
        .service
        .submit_distributed_query_results(
            &ctx(),
            &h1,
            BTreeMap::from([
                (padded.clone(), rows(7)),
                (name.clone(), rows(2)),
                (signed.clone(), rows(9)),
            ]),
            BTreeMap::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.accepted, vec![name]);
    let rejected: Vec<&str> = report.rejected.iter().map(|r| r.query.as_str()).collect();
    assert_eq!(rejected.len(), 2);
    assert!(rejected.contains(&padded.as_str()));
    assert!(rejected.contains(&signed.as_str()));

    let results = fleet.scheduler.results(campaign.id).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].rows.len(), 2);
}

#[tokio::test]
async fn test_result_for_unoffered_campaign_rejected() {
    let fleet = Fleet::new([EnrollSecret::new("s")]);
    let (_, h1) = fleet.enroll("s", "h1").await;
    let (_, h2) = fleet.enroll("s", "h2").await;

    let campaign = fleet
        .scheduler
        .create_campaign(CampaignSpec::new("SELECT 1", TargetSelector::hosts(["h1"])))
        .await
        .unwrap();
    let name = QueryName::Campaign(campaign.id).to_string();

    for host in [&h1, &h2] {
        let report = fleet
            .service
            .submit_distributed_query_results(
                &ctx(),
                host,
                BTreeMap::from([(name.clone(), rows(1))]),
                BTreeMap::new(),
            )
            .await
            .unwrap();
        assert!(report.accepted.is_empty());
        assert_eq!(report.rejected[0].reason, RejectionReason::UnsolicitedResult);
    }
    assert!(fleet.scheduler.results(campaign.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_detail_answers_fill_host_record() {
    let fleet = Fleet::new([EnrollSecret::new("s")]);
    let (_, host) = fleet.enroll("s", "h1").await;

    let results = BTreeMap::from([
        (
            detail("os_version"),
            vec![row(&[
                ("name", "Ubuntu"),
                ("version", "22.04"),
                ("platform", "ubuntu"),
            ])],
        ),
        (detail("system_info"), vec![row(&[("hostname", "web-01")])]),
        (detail("osquery_info"), vec![row(&[("version", "5.10.2")])]),
    ]);
    let report = fleet
        .service
        .submit_distributed_query_results(&ctx(), &host, results, BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(report.accepted.len(), 3);
    assert!(report.is_clean());

    let host = fleet.refetch(&host).await;
    assert_eq!(host.platform(), Some("ubuntu"));
    assert_eq!(host.details.os_version, "Ubuntu 22.04");
    assert_eq!(host.details.hostname, "web-01");
    assert_eq!(host.details.agent_version, "5.10.2");
    assert_eq!(host.details_updated_at, Some(fleet.now()));

    // Fresh details: no detail queries, no new-host acceleration
    let offer = fleet
        .service
        .get_distributed_queries(&ctx(), &host)
        .await
        .unwrap();
    assert!(!offer.queries.contains_key(&detail("os_version")));
    assert_eq!(offer.accelerate_secs, 0);

    fleet.clock.advance(Duration::hours(1));
    let offer = fleet
        .service
        .get_distributed_queries(&ctx(), &host)
        .await
        .unwrap();
    assert!(offer.queries.contains_key(&detail("os_version")));
}

#[tokio::test]
async fn test_label_membership_follows_label_answers() {
    let fleet = Fleet::new([EnrollSecret::new("s")]);
    fleet
        .source
        .upsert_label_query(LabelQuery::new(
            "docker-hosts",
            "SELECT 1 FROM processes WHERE name = 'dockerd'",
        ))
        .await;
    fleet
        .source
        .upsert_label_query(
            LabelQuery::new("debian-family", "SELECT 1").for_platform("ubuntu,debian"),
        )
        .await;
    let (_, host) = fleet.enroll("s", "h1").await;

    // Platform unknown: only the unrestricted label runs
    let offer = fleet
        .service
        .get_distributed_queries(&ctx(), &host)
        .await
        .unwrap();
    let labels: Vec<&String> = offer
        .queries
        .keys()
        .filter(|n| n.starts_with(LABEL_QUERY_PREFIX))
        .collect();
    assert_eq!(labels, vec![&label("docker-hosts")]);

    let report = fleet
        .service
        .submit_distributed_query_results(
            &ctx(),
            &host,
            BTreeMap::from([
                (label("docker-hosts"), rows(1)),
                (label("made-up"), rows(1)),
            ]),
            BTreeMap::new(),
        )
        .await
        .unwrap();
    assert_eq!(report.accepted, vec![label("docker-hosts")]);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].query, label("made-up"));

    let host = fleet.refetch(&host).await;
    assert!(host.has_label("docker-hosts"));
    assert!(!host.has_label("made-up"));

    // Label-targeted campaigns now reach the host
    let campaign = fleet
        .scheduler
        .create_campaign(CampaignSpec::new(
            "SELECT * FROM docker_containers",
            TargetSelector::labels(["docker-hosts"]),
        ))
        .await
        .unwrap();
    assert_eq!(campaign.expected_targets, 1);

    // A later empty answer drops the membership
    fleet.clock.advance(Duration::hours(1));
    fleet
        .service
        .submit_distributed_query_results(
            &ctx(),
            &host,
            BTreeMap::from([(label("docker-hosts"), Vec::new())]),
            BTreeMap::new(),
        )
        .await
        .unwrap();
    assert!(!fleet.refetch(&host).await.has_label("docker-hosts"));
}

#[tokio::test]
async fn test_label_answers_limited_to_offered_labels() {
    let fleet = Fleet::new([EnrollSecret::new("s")]);
    fleet
        .source
        .upsert_label_query(LabelQuery::new("win_only", "SELECT 1").for_platform("windows"))
        .await;
    let (_, host) = fleet.enroll("s", "h1").await;

    let report = fleet
        .service
        .submit_distributed_query_results(
            &ctx(),
            &host,
            BTreeMap::from([(label("win_only"), rows(1))]),
            BTreeMap::new(),
        )
        .await
        .unwrap();
    assert!(report.accepted.is_empty());
    assert_eq!(report.rejected[0].reason, RejectionReason::UnsolicitedResult);

    let host = fleet.refetch(&host).await;
    assert!(!host.has_label("win_only"));
    assert!(host.labels_updated_at.is_none());
}

#[tokio::test]
async fn test_failed_detail_answers_are_asked_again() {
    let fleet = Fleet::new([EnrollSecret::new("s")]);
    let (_, host) = fleet.enroll("s", "h1").await;

    let report = fleet
        .service
        .submit_distributed_query_results(
            &ctx(),
            &host,
            BTreeMap::from([(detail("os_version"), Vec::new())]),
            BTreeMap::from([(detail("os_version"), QueryStatus::failure(1, "no such table"))]),
        )
        .await
        .unwrap();
    assert_eq!(report.accepted, vec![detail("os_version")]);

    let host = fleet.refetch(&host).await;
    assert!(host.details_updated_at.is_none());

    fleet.clock.advance(Duration::seconds(10));
    let offer = fleet
        .service
        .get_distributed_queries(&ctx(), &host)
        .await
        .unwrap();
    assert!(offer.queries.contains_key(&detail("os_version")));
    assert_eq!(offer.accelerate_secs, 10);
}
