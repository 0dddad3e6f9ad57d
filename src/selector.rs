//! Host targeting shared by campaigns and config packs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::host::Host;

/// Selects hosts explicitly, by label, by team, or all at once.
///
/// A host matches if it satisfies any of the populated criteria. An empty
/// selector matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSelector {
    /// Match every host
    #[serde(default)]
    pub all: bool,

    /// Host identifiers
    #[serde(default)]
    pub hosts: BTreeSet<String>,

    /// Label names
    #[serde(default)]
    pub labels: BTreeSet<String>,

    /// Team names
    #[serde(default)]
    pub teams: BTreeSet<String>,
}

impl TargetSelector {
    /// Selector matching every enrolled host
    pub fn all() -> Self {
        Self {
            all: true,
            ..Default::default()
        }
    }

    /// Selector over explicit host identifiers
    pub fn hosts<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Selector over label membership
    pub fn labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.teams.insert(team.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.hosts.is_empty() && self.labels.is_empty() && self.teams.is_empty()
    }

    pub fn matches(&self, host: &Host) -> bool {
        if self.all || self.hosts.contains(&host.identifier) {
            return true;
        }
        if let Some(team) = &host.team {
            if self.teams.contains(team) {
                return true;
            }
        }
        self.labels.iter().any(|label| host.has_label(label))
    }
}
