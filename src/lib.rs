//! Registry Harvester: a resumable scraper for CAPTCHA-gated registry records
//!
//! This crate partitions a space of record ids across concurrent page-session
//! workers, persists every outcome to a pair of CSV ledgers, retries failures
//! within a time-boxed second pass, and resumes cleanly after a restart.

pub mod config;
pub mod crawler;
pub mod ledger;
pub mod output;
pub mod queue;
pub mod state;

use thiserror::Error;

/// Main error type for Registry Harvester operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger::LedgerError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid item id '{value}': {reason}")]
    InvalidId { value: String, reason: String },

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

    #[error("Invalid CSS selector for {field}: {selector}")]
    InvalidSelector { field: String, selector: String },
}

/// Result type alias for Registry Harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Coordinator, RunReport};
pub use ledger::{Ledger, PersistentLedger};
pub use queue::WorkQueue;
pub use state::{FailureReason, ItemId, Outcome, Record, Schema, WorkItem};
