//! Configuration module for Registry Harvester
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! The resulting [`Config`] is read once at startup and treated as immutable.
//!
//! # Example
//!
//! ```no_run
//! use registry_harvester::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Normal workers: {}", config.workers.normal);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BrowserConfig, CaptchaConfig, Config, ExtractConfig, FieldSpec, OutputConfig, RunConfig,
    TimeoutConfig, WorkerConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
