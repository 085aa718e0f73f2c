//! Crawling: page sessions, per-item processing, workers and run coordination
//!
//! This module contains:
//! - The page session capability and its HTTP implementation
//! - CAPTCHA solving and record extraction
//! - The per-item pipeline producing an `Outcome`
//! - Normal and retry workers
//! - The coordinator driving a whole run

mod captcha;
mod coordinator;
mod extract;
mod pipeline;
mod session;
mod source;
mod worker;

pub use captcha::{
    normalize_answer, CaptchaSelectors, CaptchaSolver, CommandOcr, OcrCaptchaSolver, OcrEngine,
};
pub use coordinator::{Coordinator, PhaseEnd, RunReport};
pub use extract::{Extractor, SelectorExtractor};
pub use pipeline::Pipeline;
pub use session::{
    build_session_client, HttpPageSession, HttpSessionFactory, Node, PageSession, SessionError,
    SessionFactory,
};
pub use source::{IdSource, FIRST_DATA_ROW};
pub use worker::WorkerRole;

use crate::config::Config;
use crate::HarvestError;

/// Runs a complete harvest with the default components
///
/// This is the main entry point. It will:
/// 1. Open the CSV ledger, refusing files whose header does not match the schema
/// 2. Build the HTTP page sessions and the extraction pipeline
/// 3. Seed, process and retry the ids named by `source`
///
/// # Arguments
///
/// * `config` - The validated configuration
/// * `source` - Where the ids of this run come from
///
/// # Returns
///
/// * `Ok(RunReport)` - The run finished (possibly with unresolved ids)
/// * `Err(HarvestError)` - The run could not start or the ledger became unreadable
pub async fn harvest(config: Config, source: IdSource) -> Result<RunReport, HarvestError> {
    let coordinator = Coordinator::new(config).await?;
    coordinator.run(source).await
}
