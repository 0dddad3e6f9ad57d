//! Agent enrollment and node key authentication.
//!
//! An agent presents an enroll secret and its host identifier once, and gets
//! back a node key that it presents on every later call. Re-enrolling the
//! same identifier (agent reinstall) rotates the key; the old one stops
//! working immediately.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::EnrollmentConfig;
use crate::error::{PulsarError, Result, StoreError};
use crate::host::{Host, NodeKey};
use crate::identity::{IdentityStore, IssueRequest};

/// Source of candidate node keys
pub trait NodeKeyGenerator: Send + Sync {
    fn generate(&self) -> NodeKey;
}

/// High-entropy random keys, base64 encoded
#[derive(Debug, Clone)]
pub struct RandomKeyGenerator {
    bytes: usize,
}

impl RandomKeyGenerator {
    pub fn new(bytes: usize) -> Self {
        Self { bytes }
    }
}

impl Default for RandomKeyGenerator {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_NODE_KEY_BYTES)
    }
}

impl NodeKeyGenerator for RandomKeyGenerator {
    fn generate(&self) -> NodeKey {
        let mut buf = vec![0u8; self.bytes];
        rand::rng().fill_bytes(&mut buf);
        NodeKey::new(STANDARD.encode(&buf))
    }
}

/// Turns enroll secrets into durable host identities
pub struct EnrollmentManager {
    store: Arc<dyn IdentityStore>,
    keys: Arc<dyn NodeKeyGenerator>,
    clock: Arc<dyn Clock>,
    max_key_attempts: u32,
}

impl EnrollmentManager {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        keys: Arc<dyn NodeKeyGenerator>,
        clock: Arc<dyn Clock>,
        config: &EnrollmentConfig,
    ) -> Self {
        Self {
            store,
            keys,
            clock,
            max_key_attempts: config.max_key_attempts,
        }
    }

    /// Enroll a host and return its new node key.
    ///
    /// All validation happens before the store is asked to issue anything, so
    /// a rejected enrollment leaves no partial state behind.
    pub async fn enroll(&self, secret: &str, host_identifier: &str) -> Result<NodeKey> {
        if host_identifier.trim().is_empty() {
            return Err(PulsarError::InvalidRequest(
                "host identifier must not be empty".to_string(),
            ));
        }
        if secret.is_empty() {
            return Err(PulsarError::InvalidSecret);
        }

        let now = self.clock.now();
        let enroll_secret = self
            .store
            .lookup_secret(secret)
            .await
            .map_err(|e| PulsarError::UpstreamLookupFailed(e.to_string()))?
            .ok_or(PulsarError::InvalidSecret)?;

        if enroll_secret.is_expired(now) {
            return Err(PulsarError::SecretExpired);
        }
        if enroll_secret.is_exhausted() {
            return Err(PulsarError::SecretExhausted);
        }

        for attempt in 1..=self.max_key_attempts {
            let node_key = self.keys.generate();
            let request = IssueRequest {
                secret: secret.to_string(),
                host_identifier: host_identifier.to_string(),
                node_key: node_key.clone(),
                issued_at: self.clock.now(),
            };

            match self.store.issue_node_key(request).await {
                Ok(host) => {
                    info!(
                        host = %host.identifier,
                        enroll_count = host.enroll_count,
                        secret = %enroll_secret.name,
                        "Host enrolled"
                    );
                    return Ok(node_key);
                }
                Err(StoreError::KeyCollision) => {
                    warn!(
                        host = %host_identifier,
                        attempt,
                        "Node key collision, regenerating"
                    );
                }
                Err(StoreError::SecretExpired) => return Err(PulsarError::SecretExpired),
                Err(StoreError::SecretExhausted) => return Err(PulsarError::SecretExhausted),
                Err(StoreError::NotFound(_)) => return Err(PulsarError::InvalidSecret),
                Err(e) => return Err(PulsarError::Store(e)),
            }
        }

        Err(PulsarError::KeyGenerationExhausted {
            attempts: self.max_key_attempts,
        })
    }

    /// Resolve a node key to its host, stamping the last-seen time.
    pub async fn authenticate(&self, node_key: &str) -> Result<Host> {
        if node_key.is_empty() {
            return Err(PulsarError::InvalidNodeKey);
        }

        let host = self
            .store
            .authenticate(&NodeKey::new(node_key), self.clock.now())
            .await?
            .ok_or(PulsarError::InvalidNodeKey)?;

        debug!(host = %host.identifier, "Host authenticated");
        Ok(host)
    }
}
