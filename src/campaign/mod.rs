//! Distributed query campaigns.
//!
//! A campaign is a one-shot query fanned out to a selected set of hosts.
//! Hosts pick it up through `GetDistributedQueries` and answer through
//! `SubmitDistributedQueryResults`; the campaign completes once every
//! targeted host has answered, or expires after its maximum lifetime.
//!
//! Status only moves forward:
//!
//! ```text
//! Pending ──> Running ──> Complete
//!    │           │
//!    └───────────┴──────> Expired
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::selector::TargetSelector;

pub mod collector;
pub mod scheduler;
pub mod store;

pub use collector::{Rejection, RejectionReason, ResultCollector, SubmissionReport};
pub use scheduler::{CampaignOffer, QueryCampaignScheduler};
pub use store::{CampaignRecord, CampaignStore, RecordOutcome};

pub type CampaignId = u64;

/// One result row: column name to value
pub type Row = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Pending,
    Running,
    Complete,
    Expired,
}

impl CampaignStatus {
    fn rank(&self) -> u8 {
        match self {
            CampaignStatus::Pending => 0,
            CampaignStatus::Running => 1,
            CampaignStatus::Complete | CampaignStatus::Expired => 2,
        }
    }

    /// Complete and Expired are terminal
    pub fn is_closed(&self) -> bool {
        matches!(self, CampaignStatus::Complete | CampaignStatus::Expired)
    }

    /// Whether `next` is a legal forward move from this status
    pub fn can_transition_to(&self, next: CampaignStatus) -> bool {
        !self.is_closed() && next.rank() > self.rank()
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CampaignStatus::Pending => "pending",
            CampaignStatus::Running => "running",
            CampaignStatus::Complete => "complete",
            CampaignStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// What an operator asks for when launching a campaign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSpec {
    pub query: String,
    pub selector: TargetSelector,

    /// Accelerate window in seconds (None = configured default)
    #[serde(default)]
    pub accelerate_secs: Option<u64>,
}

impl CampaignSpec {
    pub fn new(query: impl Into<String>, selector: TargetSelector) -> Self {
        Self {
            query: query.into(),
            selector,
            accelerate_secs: None,
        }
    }

    pub fn with_accelerate(mut self, secs: u64) -> Self {
        self.accelerate_secs = Some(secs);
        self
    }
}

/// Campaign metadata as observed by callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub query: String,
    pub selector: TargetSelector,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Hosts polling before this instant are asked to check in faster
    pub accelerate_until: Option<DateTime<Utc>>,

    /// Hosts matched at creation time
    pub expected_targets: usize,

    /// Bumped on every status change
    pub version: u64,
}

/// A host's participation in a campaign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTarget {
    pub host: String,
    pub offered_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl QueryTarget {
    pub fn has_responded(&self) -> bool {
        self.responded_at.is_some()
    }
}

/// Execution status reported by the agent for one query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStatus {
    /// 0 on success
    pub code: i32,
    #[serde(default)]
    pub message: Option<String>,
}

impl QueryStatus {
    pub fn success() -> Self {
        Self {
            code: 0,
            message: None,
        }
    }

    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

impl Default for QueryStatus {
    fn default() -> Self {
        Self::success()
    }
}

/// One host's answer to one campaign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    pub campaign_id: CampaignId,
    pub host: String,
    pub rows: Vec<Row>,
    pub status: QueryStatus,
    pub received_at: DateTime<Utc>,
}

/// A closed campaign removed from the store, handed back with its answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedCampaign {
    pub campaign: Campaign,
    /// One entry per answering host, ordered by host identifier
    pub results: Vec<QueryResult>,
}

/// Broadcast to live subscribers as campaigns progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CampaignEvent {
    Created {
        campaign: Campaign,
    },
    StatusChanged {
        id: CampaignId,
        from: CampaignStatus,
        to: CampaignStatus,
        at: DateTime<Utc>,
    },
    ResultRecorded {
        id: CampaignId,
        host: String,
        rows: usize,
        success: bool,
    },
}
