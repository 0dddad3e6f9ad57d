/*!
 * Host identity records
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Server-issued secret identifying an enrolled host.
///
/// `Debug` is redacted so keys never end up in logs.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKey(String);

impl NodeKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Raw key material, for handing back to the agent
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeKey(***)")
    }
}

/// Platform metadata collected through detail queries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDetails {
    /// Platform family as reported by the agent (e.g. "ubuntu", "darwin", "windows")
    #[serde(default)]
    pub platform: String,

    /// Human-readable OS name and version
    #[serde(default)]
    pub os_version: String,

    /// Hostname reported by the agent
    #[serde(default)]
    pub hostname: String,

    /// Agent software version
    #[serde(default)]
    pub agent_version: String,
}

impl HostDetails {
    /// True until the first detail query results arrive
    pub fn is_empty(&self) -> bool {
        self.platform.is_empty() && self.hostname.is_empty()
    }
}

/// Partial update applied by detail query ingestion.
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostDetailsPatch {
    pub platform: Option<String>,
    pub os_version: Option<String>,
    pub hostname: Option<String>,
    pub agent_version: Option<String>,
}

impl HostDetailsPatch {
    pub fn is_empty(&self) -> bool {
        self.platform.is_none()
            && self.os_version.is_none()
            && self.hostname.is_none()
            && self.agent_version.is_none()
    }

    /// Apply the patch to a details record
    pub fn apply(&self, details: &mut HostDetails) {
        if let Some(platform) = &self.platform {
            details.platform = platform.clone();
        }
        if let Some(os_version) = &self.os_version {
            details.os_version = os_version.clone();
        }
        if let Some(hostname) = &self.hostname {
            details.hostname = hostname.clone();
        }
        if let Some(agent_version) = &self.agent_version {
            details.agent_version = agent_version.clone();
        }
    }
}

/// An enrolled agent.
///
/// The `identifier` is agent-supplied and never trusted for authentication;
/// only the `node_key` is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Stable agent-supplied identifier
    pub identifier: String,

    /// Current node key (rotates on re-enrollment)
    #[serde(skip)]
    pub node_key: NodeKey,

    /// When the host first enrolled
    pub enrolled_at: DateTime<Utc>,

    /// Last successful authentication
    pub last_seen_at: DateTime<Utc>,

    /// Number of times this identifier has enrolled
    pub enroll_count: u32,

    /// Team inherited from the enroll secret
    pub team: Option<String>,

    /// Label memberships (from the secret and from label queries)
    pub labels: BTreeSet<String>,

    /// Platform metadata
    pub details: HostDetails,

    /// When detail queries last reported
    pub details_updated_at: Option<DateTime<Utc>>,

    /// When label queries last reported
    pub labels_updated_at: Option<DateTime<Utc>>,
}

impl Host {
    /// Create a freshly enrolled host
    pub fn new(identifier: impl Into<String>, node_key: NodeKey, now: DateTime<Utc>) -> Self {
        Self {
            identifier: identifier.into(),
            node_key,
            enrolled_at: now,
            last_seen_at: now,
            enroll_count: 1,
            team: None,
            labels: BTreeSet::new(),
            details: HostDetails::default(),
            details_updated_at: None,
            labels_updated_at: None,
        }
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    /// Platform, if detail queries have reported one
    pub fn platform(&self) -> Option<&str> {
        if self.details.platform.is_empty() {
            None
        } else {
            Some(&self.details.platform)
        }
    }
}
