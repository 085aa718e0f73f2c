//! Per-item processing: navigate, pass the CAPTCHA, wait, extract
//!
//! Every stage runs under its own timeout and every failure, panics included,
//! comes back as an [`Outcome::Failure`]. Nothing here touches the ledger.

use crate::config::{Config, TimeoutConfig};
use crate::crawler::captcha::{CaptchaSelectors, CaptchaSolver, CommandOcr, OcrCaptchaSolver};
use crate::crawler::extract::{Extractor, SelectorExtractor};
use crate::crawler::session::{PageSession, SessionError};
use crate::state::{FailureReason, Outcome, WorkItem};
use crate::ConfigError;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

struct CaptchaStage {
    solver: Arc<dyn CaptchaSolver>,
    selectors: CaptchaSelectors,
    max_attempts: u32,
}

/// The steps applied to every work item
pub struct Pipeline {
    extractor: Arc<dyn Extractor>,
    captcha: Option<CaptchaStage>,
    ready_selector: Option<String>,
    timeouts: TimeoutConfig,
}

impl Pipeline {
    pub fn new(extractor: Arc<dyn Extractor>, timeouts: TimeoutConfig) -> Self {
        Self {
            extractor,
            captcha: None,
            ready_selector: None,
            timeouts,
        }
    }

    pub fn with_captcha(
        mut self,
        solver: Arc<dyn CaptchaSolver>,
        selectors: CaptchaSelectors,
        max_attempts: u32,
    ) -> Self {
        self.captcha = Some(CaptchaStage {
            solver,
            selectors,
            max_attempts,
        });
        self
    }

    pub fn with_ready_selector(mut self, selector: Option<String>) -> Self {
        self.ready_selector = selector;
        self
    }

    /// Builds the selector extractor and, when enabled, the OCR CAPTCHA solver
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let extractor = SelectorExtractor::new(&config.extract, config.timeouts.selector());
        let mut pipeline = Self::new(Arc::new(extractor), config.timeouts.clone())
            .with_ready_selector(config.extract.ready_selector.clone());

        if config.captcha.enabled {
            let ocr = CommandOcr::new(
                &config.captcha.ocr_command,
                config.timeouts.selector(),
                config.captcha.expected_length,
            )
            .ok_or_else(|| ConfigError::Validation("captcha.ocr-command is empty".to_string()))?;

            pipeline = pipeline.with_captcha(
                Arc::new(OcrCaptchaSolver::new(ocr, &config.timeouts)),
                CaptchaSelectors::from(&config.captcha),
                config.captcha.max_attempts,
            );
        }

        Ok(pipeline)
    }

    /// Processes one item on the given session
    pub async fn process(&self, session: &mut dyn PageSession, item: &WorkItem) -> Outcome {
        match AssertUnwindSafe(self.stages(session, item))
            .catch_unwind()
            .await
        {
            Ok(Ok(record)) => Outcome::Success(record),
            Ok(Err(reason)) => Outcome::Failure(reason),
            Err(payload) => Outcome::Failure(FailureReason::Panicked(panic_message(payload))),
        }
    }

    async fn stages(
        &self,
        session: &mut dyn PageSession,
        item: &WorkItem,
    ) -> Result<crate::state::Record, FailureReason> {
        let navigation = self.timeouts.navigation();
        bounded(navigation, "navigation", session.goto(item.locator(), navigation))
            .await?
            .map_err(|e| FailureReason::Navigation(e.to_string()))?;

        if let Some(stage) = &self.captcha {
            let selector_timeout = self.timeouts.selector();
            let present = bounded(
                selector_timeout,
                "captcha detection",
                session.wait_for_selector(&stage.selectors.image, selector_timeout),
            )
            .await;

            match present {
                Ok(Ok(_)) => {
                    let solved = bounded(
                        self.timeouts.captcha(),
                        "captcha",
                        stage.solver.solve_and_fill(
                            session,
                            &stage.selectors,
                            item.id(),
                            stage.max_attempts,
                        ),
                    )
                    .await?;
                    if !solved {
                        return Err(FailureReason::CaptchaUnsolved);
                    }
                }
                Ok(Err(SessionError::NotFound { .. })) | Err(_) => {
                    tracing::debug!(item = %item, "No CAPTCHA on this record");
                }
                Ok(Err(e)) => return Err(FailureReason::Navigation(e.to_string())),
            }
        }

        if let Some(ready) = &self.ready_selector {
            let page_ready = self.timeouts.page_ready();
            bounded(page_ready, "page ready", session.wait_for_selector(ready, page_ready))
                .await?
                .map_err(|e| FailureReason::PageNotReady(e.to_string()))?;
        }

        let settle = self.timeouts.settle();
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        let extracted = bounded(
            self.timeouts.extraction(),
            "extraction",
            self.extractor.extract_record(session, item),
        )
        .await?
        .map_err(|e| FailureReason::Extraction(e.to_string()))?;

        match extracted {
            Some(record) if !record.is_empty() => Ok(record),
            _ => Err(FailureReason::NothingExtracted),
        }
    }
}

async fn bounded<F: Future>(
    limit: Duration,
    stage: &'static str,
    future: F,
) -> Result<F::Output, FailureReason> {
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| FailureReason::Timeout(stage))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
