//! Core error types for doombreak-core.
//!
//! Nothing in this hierarchy is fatal to a host context: every failure
//! degrades to "policy not yet applied" and is retried implicitly on the
//! next trigger.

use thiserror::Error;

/// Top-level error type for the policy engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Shared-store errors (transient; the current trigger is skipped)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Malformed configuration entry; the entry is ignored, others still processed
    #[error("Invalid domain key '{key}': {reason}")]
    InvalidDomainKey { key: String, reason: String },

    /// The platform rejected a compiled rule set; the previous set remains installed
    #[error("Rule installation failed: {0}")]
    RuleInstallationFailed(String),

    /// Negative usage delta; rejected with no state change
    #[error("Negative usage delta of {minutes} minutes for '{domain}'")]
    NegativeUsageDelta { domain: String, minutes: i64 },

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the shared key-value store capability.
///
/// All variants are transient: callers skip the current read-modify-write
/// unit and rely on the next trigger, never retrying in a tight loop.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected a write for capacity reasons
    #[error("store quota exceeded")]
    QuotaExceeded,

    /// A stored value failed to serialize or deserialize
    #[error("malformed value for key '{key}': {message}")]
    MalformedValue { key: String, message: String },
}

/// Result type alias for EngineError
pub type Result<T, E = EngineError> = std::result::Result<T, E>;
