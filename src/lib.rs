/*!
 * Pulsar - fleet control plane for remote host agents
 *
 * Agents enroll once with a shared secret, then check in on an interval to:
 * - fetch their configuration (options and scheduled query packs)
 * - pick up distributed query campaigns, with accelerated check-in
 * - report query results, status logs and result logs
 *
 * Transport encoding and persistent storage are supplied by the embedder
 * through the `AgentService`, `IdentityStore` and `ConfigSource` seams.
 */

pub mod agent_config;
pub mod campaign;
pub mod clock;
pub mod config;
pub mod enrollment;
pub mod error;
pub mod host;
pub mod identity;
pub mod instrumentation;
pub mod logging;
pub mod logs;
pub mod query_name;
pub mod refresh;
pub mod selector;
pub mod service;

// Re-export commonly used types
pub use agent_config::{ConfigDocument, ConfigSource, LabelQuery, MemoryConfigSource, Pack};
pub use campaign::{
    ArchivedCampaign, Campaign, CampaignEvent, CampaignId, CampaignSpec, CampaignStatus,
    CampaignStore, QueryCampaignScheduler, QueryStatus, Row, SubmissionReport,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PulsarConfig;
pub use error::{ErrorCategory, PulsarError, Result};
pub use host::{Host, NodeKey};
pub use identity::{EnrollSecret, IdentityStore, MemoryIdentityStore};
pub use instrumentation::ServiceStats;
pub use selector::TargetSelector;
pub use service::{AgentService, FleetService, LoggingMiddleware, RequestContext};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
