//! Error types for Coverline operations

use std::time::Duration;
use thiserror::Error;

/// Cache layer errors.
///
/// Remote-tier variants are internal signals: the multi-level cache logs them
/// and degrades to memory-only instead of returning them to callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Remote cache tier '{tier}' failed: {reason}")]
    Remote { tier: String, reason: String },

    #[error("Remote cache tier '{tier}' timed out after {timeout:?}")]
    Timeout { tier: String, timeout: Duration },

    #[error("Cache degraded to memory-only: {reason}")]
    Degraded { reason: String },

    #[error("Failed to serialize value for key {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Failed to deserialize value for key {key}: {reason}")]
    Deserialization { key: String, reason: String },

    #[error("Memory cache tier unavailable: {reason}")]
    MemoryUnavailable { reason: String },
}

impl CacheError {
    /// True for failures that only affect the remote tier.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            CacheError::Remote { .. } | CacheError::Timeout { .. } | CacheError::Degraded { .. }
        )
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Coverline errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoverlineError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {reason}")]
    Store { reason: String },
}

/// Result type alias for Coverline operations.
pub type CoverlineResult<T> = Result<T, CoverlineError>;
