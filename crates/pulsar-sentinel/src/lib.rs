//! Pulsar Sentinel: background campaign sweeper
//!
//! The scheduler already expires overdue campaigns lazily whenever a host
//! polls. The sentinel covers quiet periods: on a fixed interval it
//!
//! 1. expires running campaigns past their maximum lifetime, and
//! 2. archives closed campaigns past the retention window,
//!
//! reporting a [`SweepStats`] for every sweep.
//!
//! # Example
//!
//! ```no_run
//! use pulsar::{FleetService, MemoryConfigSource, MemoryIdentityStore, PulsarConfig};
//! use pulsar_sentinel::{Sentinel, SentinelPolicy};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PulsarConfig::default();
//! let service = FleetService::builder(
//!     config.clone(),
//!     Arc::new(MemoryIdentityStore::new()),
//!     Arc::new(MemoryConfigSource::new()),
//! )
//! .build()?;
//!
//! let sentinel = Sentinel::new(service.scheduler(), SentinelPolicy::from(&config.campaigns))?;
//! tokio::spawn(sentinel.run());
//! # Ok(())
//! # }
//! ```

pub mod daemon;
pub mod metrics;
pub mod policy;

pub use daemon::{Sentinel, SentinelError};
pub use metrics::SweepStats;
pub use policy::SentinelPolicy;
