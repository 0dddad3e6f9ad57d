//! In-memory identity store.
//!
//! Hosts are arena records addressed by identifier, each behind its own lock.
//! Node keys are indexed separately; a key hit is always re-checked against
//! the host record under the host lock, so a rotation racing with an
//! authentication can never resolve a stale key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::{EnrollSecret, IdentityStore, IssueRequest, StoreResult};
use crate::error::StoreError;
use crate::host::{Host, HostDetailsPatch, NodeKey};

/// Process-local [`IdentityStore`]
#[derive(Default)]
pub struct MemoryIdentityStore {
    /// Enroll secrets by value. Also serializes key issuance.
    secrets: Mutex<HashMap<String, EnrollSecret>>,

    /// Node key -> host identifier
    keys: RwLock<HashMap<NodeKey, String>>,

    /// Host identifier -> host record
    hosts: RwLock<HashMap<String, Arc<Mutex<Host>>>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with secrets
    pub fn with_secrets(secrets: impl IntoIterator<Item = EnrollSecret>) -> Self {
        let map = secrets
            .into_iter()
            .map(|s| (s.secret.clone(), s))
            .collect::<HashMap<_, _>>();
        Self {
            secrets: Mutex::new(map),
            ..Default::default()
        }
    }

    /// Add or replace an enroll secret
    pub async fn add_secret(&self, secret: EnrollSecret) {
        let mut secrets = self.secrets.lock().await;
        secrets.insert(secret.secret.clone(), secret);
    }

    /// Remove an enroll secret; hosts already enrolled keep their keys
    pub async fn remove_secret(&self, secret: &str) -> bool {
        self.secrets.lock().await.remove(secret).is_some()
    }

    /// Number of enrolled hosts
    pub async fn host_count(&self) -> usize {
        self.hosts.read().await.len()
    }

    async fn host_record(&self, identifier: &str) -> StoreResult<Arc<Mutex<Host>>> {
        self.hosts
            .read()
            .await
            .get(identifier)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("host {}", identifier)))
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn lookup_secret(&self, secret: &str) -> StoreResult<Option<EnrollSecret>> {
        Ok(self.secrets.lock().await.get(secret).cloned())
    }

    async fn issue_node_key(&self, request: IssueRequest) -> StoreResult<Host> {
        // Lock order: secrets -> keys -> hosts -> host
        let mut secrets = self.secrets.lock().await;
        let secret = secrets
            .get_mut(&request.secret)
            .ok_or_else(|| StoreError::NotFound("enroll secret".to_string()))?;
        if secret.is_expired(request.issued_at) {
            return Err(StoreError::SecretExpired);
        }
        if secret.is_exhausted() {
            return Err(StoreError::SecretExhausted);
        }

        let mut keys = self.keys.write().await;
        if keys.contains_key(&request.node_key) {
            return Err(StoreError::KeyCollision);
        }

        let mut hosts = self.hosts.write().await;
        let host = match hosts.get(&request.host_identifier) {
            Some(record) => {
                let mut host = record.lock().await;
                keys.remove(&host.node_key);
                host.node_key = request.node_key.clone();
                host.enroll_count += 1;
                host.last_seen_at = request.issued_at;
                if secret.team.is_some() {
                    host.team = secret.team.clone();
                }
                host.labels.extend(secret.labels.iter().cloned());
                debug!(host = %host.identifier, "Rotated node key");
                host.clone()
            }
            None => {
                let mut host = Host::new(
                    request.host_identifier.clone(),
                    request.node_key.clone(),
                    request.issued_at,
                );
                host.team = secret.team.clone();
                host.labels = secret.labels.clone();
                hosts.insert(
                    request.host_identifier.clone(),
                    Arc::new(Mutex::new(host.clone())),
                );
                debug!(host = %host.identifier, "Created host record");
                host
            }
        };

        keys.insert(request.node_key, request.host_identifier);
        secret.uses += 1;

        Ok(host)
    }

    async fn revoke_node_key(&self, node_key: &NodeKey) -> StoreResult<bool> {
        let mut keys = self.keys.write().await;
        let Some(identifier) = keys.remove(node_key) else {
            return Ok(false);
        };

        if let Some(record) = self.hosts.read().await.get(&identifier) {
            let mut host = record.lock().await;
            if &host.node_key == node_key {
                host.node_key = NodeKey::default();
            }
        }
        Ok(true)
    }

    async fn authenticate(
        &self,
        node_key: &NodeKey,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<Option<Host>> {
        let identifier = match self.keys.read().await.get(node_key) {
            Some(identifier) => identifier.clone(),
            None => return Ok(None),
        };

        let record = match self.hosts.read().await.get(&identifier) {
            Some(record) => record.clone(),
            None => return Ok(None),
        };

        let mut host = record.lock().await;
        if &host.node_key != node_key {
            // Rotated between the index lookup and the host lock
            return Ok(None);
        }
        if seen_at > host.last_seen_at {
            host.last_seen_at = seen_at;
        }
        Ok(Some(host.clone()))
    }

    async fn host(&self, identifier: &str) -> StoreResult<Option<Host>> {
        let record = self.hosts.read().await.get(identifier).cloned();
        match record {
            Some(record) => Ok(Some(record.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn list_hosts(&self) -> StoreResult<Vec<Host>> {
        let records: Vec<_> = self.hosts.read().await.values().cloned().collect();
        let mut hosts = Vec::with_capacity(records.len());
        for record in records {
            hosts.push(record.lock().await.clone());
        }
        hosts.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(hosts)
    }

    async fn update_host_details(
        &self,
        identifier: &str,
        patch: HostDetailsPatch,
        at: DateTime<Utc>,
    ) -> StoreResult<Host> {
        let record = self.host_record(identifier).await?;
        let mut host = record.lock().await;
        patch.apply(&mut host.details);
        host.details_updated_at = Some(at);
        Ok(host.clone())
    }

    async fn set_label_memberships(
        &self,
        identifier: &str,
        memberships: &BTreeMap<String, bool>,
        at: DateTime<Utc>,
    ) -> StoreResult<Host> {
        let record = self.host_record(identifier).await?;
        let mut host = record.lock().await;
        for (label, member) in memberships {
            if *member {
                host.labels.insert(label.clone());
            } else {
                host.labels.remove(label);
            }
        }
        host.labels_updated_at = Some(at);
        Ok(host.clone())
    }
}
