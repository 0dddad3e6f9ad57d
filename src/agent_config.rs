//! Agent configuration documents.
//!
//! A host's config is the server-wide option defaults, overlaid with its
//! team's overrides, plus every enabled query pack that targets it.
//! Building one is a pure read.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::AgentOptionsConfig;
use crate::error::{PulsarError, Result};
use crate::host::Host;
use crate::identity::StoreResult;
use crate::selector::TargetSelector;

/// A query the agent runs on its own schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledQuery {
    pub query: String,

    /// Seconds between runs
    pub interval: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    /// Minimum agent version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Log full snapshots instead of differentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<bool>,

    /// Log removed rows in differentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<bool>,

    /// Percentage of hosts that should run the query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<u32>,
}

impl ScheduledQuery {
    pub fn new(query: impl Into<String>, interval: u32) -> Self {
        Self {
            query: query.into(),
            interval,
            platform: None,
            version: None,
            snapshot: None,
            removed: None,
            shard: None,
        }
    }
}

/// A named group of scheduled queries and the hosts it applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pack {
    pub name: String,

    #[serde(default)]
    pub disabled: bool,

    #[serde(default)]
    pub targets: TargetSelector,

    #[serde(default)]
    pub queries: BTreeMap<String, ScheduledQuery>,
}

impl Pack {
    pub fn new(name: impl Into<String>, targets: TargetSelector) -> Self {
        Self {
            name: name.into(),
            disabled: false,
            targets,
            queries: BTreeMap::new(),
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, query: ScheduledQuery) -> Self {
        self.queries.insert(name.into(), query);
        self
    }

    pub fn applies_to(&self, host: &Host) -> bool {
        !self.disabled && self.targets.matches(host)
    }
}

/// Query whose non-empty result means the host belongs to a label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelQuery {
    pub name: String,
    pub query: String,

    /// Comma-separated platforms the query runs on (None = all)
    #[serde(default)]
    pub platform: Option<String>,
}

impl LabelQuery {
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            platform: None,
        }
    }

    pub fn for_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    /// Platform-restricted queries wait until the host's platform is known
    pub fn applies_to(&self, host: &Host) -> bool {
        match &self.platform {
            None => true,
            Some(platforms) => host
                .platform()
                .is_some_and(|p| platforms.split(',').any(|candidate| candidate.trim() == p)),
        }
    }
}

/// Pack as rendered in a config document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackDocument {
    pub queries: BTreeMap<String, ScheduledQuery>,
}

/// The document an agent receives from `GetClientConfig`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub options: BTreeMap<String, Value>,

    #[serde(default)]
    pub packs: BTreeMap<String, PackDocument>,
}

/// Read-only source of packs, team overrides and label queries
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Option overrides for a team, if it has any
    async fn team_options(&self, team: &str) -> StoreResult<Option<BTreeMap<String, Value>>>;

    async fn packs(&self) -> StoreResult<Vec<Pack>>;

    async fn label_queries(&self) -> StoreResult<Vec<LabelQuery>>;
}

/// Process-local [`ConfigSource`]
#[derive(Default)]
pub struct MemoryConfigSource {
    team_options: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    packs: RwLock<Vec<Pack>>,
    label_queries: RwLock<Vec<LabelQuery>>,
}

impl MemoryConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a pack by name
    pub async fn upsert_pack(&self, pack: Pack) {
        let mut packs = self.packs.write().await;
        packs.retain(|p| p.name != pack.name);
        packs.push(pack);
    }

    pub async fn set_team_options(
        &self,
        team: impl Into<String>,
        options: BTreeMap<String, Value>,
    ) {
        self.team_options.write().await.insert(team.into(), options);
    }

    /// Add or replace a label query by name
    pub async fn upsert_label_query(&self, label: LabelQuery) {
        let mut labels = self.label_queries.write().await;
        labels.retain(|l| l.name != label.name);
        labels.push(label);
    }
}

#[async_trait]
impl ConfigSource for MemoryConfigSource {
    async fn team_options(&self, team: &str) -> StoreResult<Option<BTreeMap<String, Value>>> {
        Ok(self.team_options.read().await.get(team).cloned())
    }

    async fn packs(&self) -> StoreResult<Vec<Pack>> {
        Ok(self.packs.read().await.clone())
    }

    async fn label_queries(&self) -> StoreResult<Vec<LabelQuery>> {
        Ok(self.label_queries.read().await.clone())
    }
}

pub struct ConfigDistributor {
    source: Arc<dyn ConfigSource>,
    defaults: BTreeMap<String, Value>,
}

impl ConfigDistributor {
    pub fn new(source: Arc<dyn ConfigSource>, options: &AgentOptionsConfig) -> Self {
        Self {
            source,
            defaults: default_options(options),
        }
    }

    /// Assemble the config document for `host`
    pub async fn get_config(&self, host: &Host) -> Result<ConfigDocument> {
        let mut options = self.defaults.clone();
        if let Some(team) = &host.team {
            let overrides = self
                .source
                .team_options(team)
                .await
                .map_err(|e| PulsarError::UpstreamLookupFailed(e.to_string()))?;
            if let Some(overrides) = overrides {
                options.extend(overrides);
            }
        }

        let packs: BTreeMap<String, PackDocument> = self
            .source
            .packs()
            .await
            .map_err(|e| PulsarError::UpstreamLookupFailed(e.to_string()))?
            .into_iter()
            .filter(|pack| pack.applies_to(host))
            .map(|pack| {
                (
                    pack.name,
                    PackDocument {
                        queries: pack.queries,
                    },
                )
            })
            .collect();

        debug!(host = %host.identifier, packs = packs.len(), "Built agent config");
        Ok(ConfigDocument { options, packs })
    }
}

fn default_options(config: &AgentOptionsConfig) -> BTreeMap<String, Value> {
    let mut options = BTreeMap::from([
        (
            "config_refresh".to_string(),
            Value::from(config.config_refresh_secs),
        ),
        (
            "distributed_interval".to_string(),
            Value::from(config.distributed_interval_secs),
        ),
        ("distributed_plugin".to_string(), Value::from("tls")),
        ("disable_distributed".to_string(), Value::from(false)),
        (
            "logger_plugin".to_string(),
            Value::from(config.logger_plugin.clone()),
        ),
        (
            "logger_tls_period".to_string(),
            Value::from(config.logger_tls_period_secs),
        ),
    ]);
    options.extend(config.extra.clone());
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::host::NodeKey;
    use chrono::Utc;
    use serde_json::json;

    fn host(id: &str) -> Host {
        Host::new(id, NodeKey::new(format!("key-{}", id)), Utc::now())
    }

    struct BrokenSource;

    #[async_trait]
    impl ConfigSource for BrokenSource {
        async fn team_options(&self, _team: &str) -> StoreResult<Option<BTreeMap<String, Value>>> {
            Ok(None)
        }
        async fn packs(&self) -> StoreResult<Vec<Pack>> {
            Err(StoreError::Unavailable("pack table locked".to_string()))
        }
        async fn label_queries(&self) -> StoreResult<Vec<LabelQuery>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_defaults_and_extra_options() {
        let mut options = AgentOptionsConfig::default();
        options.extra.insert("host_identifier".to_string(), json!("uuid"));
        let distributor = ConfigDistributor::new(Arc::new(MemoryConfigSource::new()), &options);

        let doc = distributor.get_config(&host("h1")).await.unwrap();
        assert_eq!(doc.options["distributed_interval"], json!(10));
        assert_eq!(doc.options["logger_plugin"], json!("tls"));
        assert_eq!(doc.options["host_identifier"], json!("uuid"));
        assert!(doc.packs.is_empty());
    }

    #[tokio::test]
    async fn test_pack_targeting() {
        let source = Arc::new(MemoryConfigSource::new());
        source
            .upsert_pack(
                Pack::new("everyone", TargetSelector::all())
                    .with_query("uptime", ScheduledQuery::new("SELECT * FROM uptime", 60)),
            )
            .await;
        source
            .upsert_pack(Pack::new("linux", TargetSelector::labels(["linux"])))
            .await;
        let mut disabled = Pack::new("off", TargetSelector::all());
        disabled.disabled = true;
        source.upsert_pack(disabled).await;

        let distributor = ConfigDistributor::new(source, &AgentOptionsConfig::default());

        let plain = distributor.get_config(&host("h1")).await.unwrap();
        assert_eq!(plain.packs.keys().collect::<Vec<_>>(), vec!["everyone"]);
        assert_eq!(plain.packs["everyone"].queries["uptime"].interval, 60);

        let mut linux = host("h2");
        linux.labels.insert("linux".to_string());
        let doc = distributor.get_config(&linux).await.unwrap();
        assert_eq!(doc.packs.len(), 2);
    }

    #[tokio::test]
    async fn test_team_overrides() {
        let source = Arc::new(MemoryConfigSource::new());
        source
            .set_team_options(
                "ops",
                BTreeMap::from([("distributed_interval".to_string(), json!(3))]),
            )
            .await;
        let distributor = ConfigDistributor::new(source, &AgentOptionsConfig::default());

        let mut h = host("h1");
        h.team = Some("ops".to_string());
        let doc = distributor.get_config(&h).await.unwrap();
        assert_eq!(doc.options["distributed_interval"], json!(3));
        assert_eq!(doc.options["config_refresh"], json!(60));
    }

    #[tokio::test]
    async fn test_upstream_failure() {
        let distributor =
            ConfigDistributor::new(Arc::new(BrokenSource), &AgentOptionsConfig::default());
        let err = distributor.get_config(&host("h1")).await.unwrap_err();
        assert!(matches!(err, PulsarError::UpstreamLookupFailed(_)));
    }

    #[test]
    fn test_label_platform_filter() {
        let mut h = host("h1");
        let label = LabelQuery::new("mac", "SELECT 1").for_platform("darwin, windows");
        assert!(!label.applies_to(&h));
        h.details.platform = "darwin".to_string();
        assert!(label.applies_to(&h));
        assert!(LabelQuery::new("any", "SELECT 1").applies_to(&host("h2")));
    }

    #[test]
    fn test_scheduled_query_serialization_omits_unset() {
        let json = serde_json::to_value(ScheduledQuery::new("SELECT 1", 30)).unwrap();
        assert_eq!(json, json!({"query": "SELECT 1", "interval": 30}));
    }
}
