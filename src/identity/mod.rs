//! Identity storage contract.
//!
//! Enroll secrets and node keys are owned by an external store. The control
//! plane only consumes the lookup / issue / revoke contract defined by
//! [`IdentityStore`]; [`MemoryIdentityStore`] is the in-process implementation
//! used for embedding and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::StoreError;
use crate::host::{Host, HostDetailsPatch, NodeKey};

pub mod memory;

pub use memory::MemoryIdentityStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Shared credential presented once by an agent to join the fleet
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollSecret {
    /// The secret value itself
    pub secret: String,

    /// Display name for operators
    #[serde(default)]
    pub name: String,

    /// Team assigned to hosts enrolling with this secret
    #[serde(default)]
    pub team: Option<String>,

    /// Labels assigned to hosts enrolling with this secret
    #[serde(default)]
    pub labels: BTreeSet<String>,

    /// Secret is rejected after this instant
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// Maximum number of successful enrollments (None = unlimited)
    #[serde(default)]
    pub max_uses: Option<u32>,

    /// Successful enrollments so far
    #[serde(default)]
    pub uses: u32,
}

impl EnrollSecret {
    /// Create an unlimited, non-expiring secret
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            name: String::new(),
            team: None,
            labels: BTreeSet::new(),
            expires_at: None,
            max_uses: None,
            uses: 0,
        }
    }

    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.team = Some(team.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_max_uses(mut self, max_uses: u32) -> Self {
        self.max_uses = Some(max_uses);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_uses.is_some_and(|max| self.uses >= max)
    }
}

impl fmt::Debug for EnrollSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrollSecret")
            .field("name", &self.name)
            .field("team", &self.team)
            .field("labels", &self.labels)
            .field("expires_at", &self.expires_at)
            .field("max_uses", &self.max_uses)
            .field("uses", &self.uses)
            .finish_non_exhaustive()
    }
}

/// Everything the store needs to issue a node key atomically
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub secret: String,
    pub host_identifier: String,
    pub node_key: NodeKey,
    pub issued_at: DateTime<Utc>,
}

/// Persistent identity backend.
///
/// Implementations must make [`IdentityStore::issue_node_key`] transactional:
/// the secret usage counter, the key index and the host record change
/// together or not at all. Per-host mutations are serialized per host, never
/// behind a global lock.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Look up an enroll secret by value
    async fn lookup_secret(&self, secret: &str) -> StoreResult<Option<EnrollSecret>>;

    /// Issue `node_key` to the host, creating it or rotating its key.
    ///
    /// Fails with [`StoreError::KeyCollision`] if the key is held by any
    /// host, [`StoreError::SecretExpired`] or [`StoreError::SecretExhausted`]
    /// if the secret lapsed in the meantime, and [`StoreError::NotFound`] if
    /// the secret vanished. On failure nothing is modified.
    async fn issue_node_key(&self, request: IssueRequest) -> StoreResult<Host>;

    /// Invalidate a node key. Returns false if no host held it.
    async fn revoke_node_key(&self, node_key: &NodeKey) -> StoreResult<bool>;

    /// Resolve a node key and stamp the host's last-seen time
    async fn authenticate(
        &self,
        node_key: &NodeKey,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<Option<Host>>;

    /// Fetch a host by identifier
    async fn host(&self, identifier: &str) -> StoreResult<Option<Host>>;

    /// Snapshot of all enrolled hosts
    async fn list_hosts(&self) -> StoreResult<Vec<Host>>;

    /// Apply detail query results to a host
    async fn update_host_details(
        &self,
        identifier: &str,
        patch: HostDetailsPatch,
        at: DateTime<Utc>,
    ) -> StoreResult<Host>;

    /// Apply label membership results (label -> member) to a host
    async fn set_label_memberships(
        &self,
        identifier: &str,
        memberships: &BTreeMap<String, bool>,
        at: DateTime<Utc>,
    ) -> StoreResult<Host>;
}
