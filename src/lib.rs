//! Sumi-Harvest: a resumable incremental record collector
//!
//! This crate walks cursor-paginated, rate-limited sources, deduplicates what it
//! fetches by stable identity, and checkpoints progress atomically so that an
//! interrupted or throttled run never loses completed work.

pub mod config;
pub mod crawler;
pub mod output;
pub mod state;
pub mod storage;
pub mod target;

use thiserror::Error;

/// Main error type for Sumi-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Target error: {0}")]
    Target(#[from] TargetError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    /// The target itself is invalid, missing, or forbidden. Sibling targets are unaffected.
    #[error("Fatal failure for target {target}: {reason}")]
    FatalTarget {
        target: String,
        reason: String,
        partial: Box<output::SessionSummary>,
    },

    /// A checkpoint could not be written; progress for this target cannot be trusted.
    #[error("Checkpoint write failed for target {target}: {source}")]
    Persistence {
        target: String,
        source: storage::StorageError,
    },

    #[error("Invalid session transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::SessionPhase,
        to: state::SessionPhase,
    },

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("No credential configured: set `credential` or export {0}")]
    MissingCredential(String),
}

/// Target identity extraction errors
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Not a post URL: {0}")]
    NotAPost(String),

    #[error("Invalid username: {0}")]
    InvalidUsername(String),
}

/// Result type alias for Sumi-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for target operations
pub type TargetResult<T> = std::result::Result<T, TargetError>;

// Re-export commonly used types
pub use config::Config;
pub use state::{Accumulator, SessionPhase, SessionState};
pub use storage::{Checkpoint, Identified, RecordKind};
pub use target::{extract_shortcode, extract_username, post_url};
