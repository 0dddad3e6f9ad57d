//! Names under which queries are handed to agents.
//!
//! Agents echo the name back with results and statuses, so the name alone
//! has to tell campaign, detail and label queries apart.

use std::fmt;

use crate::campaign::CampaignId;

pub const CAMPAIGN_QUERY_PREFIX: &str = "pulsar_distributed_query_";
pub const DETAIL_QUERY_PREFIX: &str = "pulsar_detail_query_";
pub const LABEL_QUERY_PREFIX: &str = "pulsar_label_query_";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueryName {
    /// Distributed query campaign
    Campaign(CampaignId),
    /// Host detail refresh query
    Detail(String),
    /// Label membership query
    Label(String),
}

impl QueryName {
    /// Classify a name returned by an agent. Unrecognised names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        if let Some(id) = name.strip_prefix(CAMPAIGN_QUERY_PREFIX) {
            // Only the canonical spelling, so each campaign has exactly one name
            let canonical = id == "0" || id.starts_with(|c: char| matches!(c, '1'..='9'));
            if !canonical {
                return None;
            }
            return id.parse().ok().map(QueryName::Campaign);
        }
        if let Some(detail) = name.strip_prefix(DETAIL_QUERY_PREFIX) {
            if !detail.is_empty() {
                return Some(QueryName::Detail(detail.to_string()));
            }
        }
        if let Some(label) = name.strip_prefix(LABEL_QUERY_PREFIX) {
            if !label.is_empty() {
                return Some(QueryName::Label(label.to_string()));
            }
        }
        None
    }
}

impl fmt::Display for QueryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryName::Campaign(id) => write!(f, "{}{}", CAMPAIGN_QUERY_PREFIX, id),
            QueryName::Detail(name) => write!(f, "{}{}", DETAIL_QUERY_PREFIX, name),
            QueryName::Label(name) => write!(f, "{}{}", LABEL_QUERY_PREFIX, name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_each_kind() {
        assert_eq!(
            QueryName::parse("pulsar_distributed_query_42"),
            Some(QueryName::Campaign(42))
        );
        assert_eq!(
            QueryName::parse("pulsar_detail_query_os_version"),
            Some(QueryName::Detail("os_version".to_string()))
        );
        assert_eq!(
            QueryName::parse("pulsar_label_query_linux"),
            Some(QueryName::Label("linux".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(QueryName::parse("c99"), None);
        assert_eq!(QueryName::parse("pulsar_distributed_query_abc"), None);
        assert_eq!(QueryName::parse("pulsar_distributed_query_"), None);
        assert_eq!(QueryName::parse("pulsar_label_query_"), None);
    }

    #[test]
    fn test_parse_rejects_alternate_campaign_spellings() {
        assert_eq!(QueryName::parse("pulsar_distributed_query_07"), None);
        assert_eq!(QueryName::parse("pulsar_distributed_query_+7"), None);
        assert_eq!(QueryName::parse("pulsar_distributed_query_00"), None);
        assert_eq!(
            QueryName::parse("pulsar_distributed_query_0"),
            Some(QueryName::Campaign(0))
        );
    }

    #[test]
    fn test_display_matches_parse() {
        let name = QueryName::Campaign(7);
        assert_eq!(name.to_string(), "pulsar_distributed_query_7");
        assert_eq!(QueryName::parse(&name.to_string()), Some(name));
    }
}
