/*!
 * Error types for Pulsar
 */

use std::fmt;
use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PulsarError>;

/// Call-level error returned by every control plane operation.
///
/// `Display` carries internal detail for server-side logs. Anything sent back
/// to an agent must go through [`PulsarError::client_message`] instead.
#[derive(Debug, Error)]
pub enum PulsarError {
    /// Enroll secret is unknown
    #[error("Invalid enroll secret")]
    InvalidSecret,

    /// Enroll secret is past its expiry
    #[error("Enroll secret expired")]
    SecretExpired,

    /// Enroll secret reached its usage limit
    #[error("Enroll secret exhausted")]
    SecretExhausted,

    /// Every generated node key collided with an existing one
    #[error("Node key generation exhausted after {attempts} attempts")]
    KeyGenerationExhausted { attempts: u32 },

    /// No host holds the presented node key
    #[error("Invalid node key")]
    InvalidNodeKey,

    /// A collaborator lookup (config, labels, hosts) failed
    #[error("Upstream lookup failed: {0}")]
    UpstreamLookupFailed(String),

    /// The downstream log sink rejected or timed out on a batch
    #[error("Log forwarding failed: {0}")]
    LogForwardingFailed(String),

    /// Malformed request detected before any mutation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Identity or campaign storage failure
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised by storage collaborators (`IdentityStore`, `ConfigSource`).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The node key is already held by another host
    #[error("node key collision")]
    KeyCollision,

    /// The secret was exhausted between validation and issuance
    #[error("enroll secret usage limit reached")]
    SecretExhausted,

    /// The secret expired between validation and issuance
    #[error("enroll secret expired")]
    SecretExpired,

    /// Referenced record does not exist
    #[error("record not found: {0}")]
    NotFound(String),

    /// Backend unavailable or failed
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl PulsarError {
    /// Get error category for logging and instrumentation
    pub fn category(&self) -> ErrorCategory {
        match self {
            PulsarError::InvalidSecret
            | PulsarError::SecretExpired
            | PulsarError::InvalidNodeKey => ErrorCategory::Auth,
            PulsarError::SecretExhausted | PulsarError::KeyGenerationExhausted { .. } => {
                ErrorCategory::ResourceExhausted
            }
            PulsarError::UpstreamLookupFailed(_)
            | PulsarError::LogForwardingFailed(_)
            | PulsarError::Io(_) => ErrorCategory::Upstream,
            PulsarError::Store(StoreError::SecretExpired) => ErrorCategory::Auth,
            PulsarError::Store(StoreError::NotFound(_)) => ErrorCategory::NotFound,
            PulsarError::Store(StoreError::SecretExhausted) => ErrorCategory::ResourceExhausted,
            PulsarError::Store(_) => ErrorCategory::Upstream,
            PulsarError::InvalidRequest(_) => ErrorCategory::Validation,
            PulsarError::Config(_) => ErrorCategory::Configuration,
        }
    }

    /// Check if this error is fatal (the host must not retry the same request)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Auth
                | ErrorCategory::ResourceExhausted
                | ErrorCategory::Validation
                | ErrorCategory::Configuration
        )
    }

    /// Check if this error is transient (the host should retry later)
    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Upstream
    }

    /// Coarse message safe to hand back to an agent.
    ///
    /// Storage and sink detail stays in the server logs.
    pub fn client_message(&self) -> &'static str {
        match self {
            PulsarError::InvalidSecret => "invalid enroll secret",
            PulsarError::SecretExpired => "enroll secret expired",
            PulsarError::SecretExhausted => "enroll secret exhausted",
            PulsarError::KeyGenerationExhausted { .. } => "enrollment temporarily unavailable",
            PulsarError::InvalidNodeKey => "invalid node key",
            PulsarError::UpstreamLookupFailed(_) => "upstream lookup failed",
            PulsarError::LogForwardingFailed(_) => "log forwarding failed",
            PulsarError::InvalidRequest(_) => "invalid request",
            PulsarError::Store(_) | PulsarError::Io(_) => "internal storage error",
            PulsarError::Config(_) => "server misconfigured",
        }
    }

    /// Whether the host should re-enroll after seeing this error
    pub fn requires_reenroll(&self) -> bool {
        matches!(self, PulsarError::InvalidNodeKey)
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bad secret or node key
    Auth,
    /// Unknown campaign or record
    NotFound,
    /// Key-generation collisions, secret usage exhausted
    ResourceExhausted,
    /// Sink or store unavailable
    Upstream,
    /// Malformed request
    Validation,
    /// Server configuration problems
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Auth => write!(f, "auth"),
            ErrorCategory::NotFound => write!(f, "not_found"),
            ErrorCategory::ResourceExhausted => write!(f, "resource_exhausted"),
            ErrorCategory::Upstream => write!(f, "upstream"),
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Configuration => write!(f, "configuration"),
        }
    }
}

impl From<toml::de::Error> for PulsarError {
    fn from(err: toml::de::Error) -> Self {
        PulsarError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for PulsarError {
    fn from(err: toml::ser::Error) -> Self {
        PulsarError::Config(format!("TOML serialize error: {}", err))
    }
}
