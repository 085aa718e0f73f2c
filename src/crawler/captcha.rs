//! CAPTCHA solving
//!
//! A solver reads the CAPTCHA image from the current page, asks an OCR engine
//! for the answer, submits it, and reports whether the challenge went away.

use crate::config::{CaptchaConfig, TimeoutConfig};
use crate::crawler::session::{PageSession, SessionError};
use crate::state::ItemId;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Where the CAPTCHA lives on the page
#[derive(Debug, Clone)]
pub struct CaptchaSelectors {
    pub image: String,
    pub input: String,
    pub submit: String,
    pub refresh: Option<String>,
}

impl From<&CaptchaConfig> for CaptchaSelectors {
    fn from(config: &CaptchaConfig) -> Self {
        Self {
            image: config.image_selector.clone(),
            input: config.input_selector.clone(),
            submit: config.submit_selector.clone(),
            refresh: config.refresh_selector.clone(),
        }
    }
}

/// Solves the CAPTCHA gating a record page
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    /// Returns `true` only once a submitted answer made the CAPTCHA disappear
    ///
    /// Never fails: every problem counts as a failed attempt.
    async fn solve_and_fill(
        &self,
        session: &mut dyn PageSession,
        selectors: &CaptchaSelectors,
        item: &ItemId,
        max_attempts: u32,
    ) -> bool;
}

/// Turns a CAPTCHA image into a candidate answer
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// `Ok(None)` means the image was read but produced no usable answer
    async fn recognize(&self, image: &[u8]) -> anyhow::Result<Option<String>>;
}

/// OCR through an external program
///
/// The image is written to the program's stdin and the answer read from its
/// stdout, e.g. `["tesseract", "stdin", "stdout", "--psm", "8"]`.
pub struct CommandOcr {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    expected_length: Option<usize>,
}

impl CommandOcr {
    /// Returns `None` for an empty command line
    pub fn new(command: &[String], timeout: Duration, expected_length: Option<usize>) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
            expected_length,
        })
    }
}

#[async_trait]
impl OcrEngine for CommandOcr {
    async fn recognize(&self, image: &[u8]) -> anyhow::Result<Option<String>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(image).await?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow::anyhow!("{} did not finish within {:?}", self.program, self.timeout))??;

        if !output.status.success() {
            anyhow::bail!("{} exited with {}", self.program, output.status);
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        Ok(normalize_answer(&raw, self.expected_length))
    }
}

/// Keeps ASCII alphanumerics, uppercased, and enforces the expected length
pub fn normalize_answer(raw: &str, expected_length: Option<usize>) -> Option<String> {
    let answer: String = raw
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if answer.is_empty() {
        return None;
    }
    match expected_length {
        Some(len) if answer.len() != len => None,
        _ => Some(answer),
    }
}

/// Solves image CAPTCHAs on a form with an [`OcrEngine`]
pub struct OcrCaptchaSolver<O> {
    ocr: O,
    selector_timeout: Duration,
    navigation_timeout: Duration,
}

impl<O: OcrEngine> OcrCaptchaSolver<O> {
    pub fn new(ocr: O, timeouts: &TimeoutConfig) -> Self {
        Self {
            ocr,
            selector_timeout: timeouts.selector(),
            navigation_timeout: timeouts.navigation(),
        }
    }

    async fn attempt(
        &self,
        session: &mut dyn PageSession,
        selectors: &CaptchaSelectors,
    ) -> Result<bool, SessionError> {
        let image = session
            .wait_for_selector(&selectors.image, self.selector_timeout)
            .await?;
        let bytes = session.capture(&image, self.selector_timeout).await?;

        let answer = match self.ocr.recognize(&bytes).await {
            Ok(Some(answer)) => answer,
            Ok(None) => {
                tracing::debug!("OCR produced no usable answer");
                return Ok(false);
            }
            Err(e) => {
                tracing::debug!("OCR failed: {}", e);
                return Ok(false);
            }
        };

        session.fill(&selectors.input, &answer).await?;
        session
            .click(&selectors.submit, self.navigation_timeout)
            .await?;

        match session
            .wait_for_selector(&selectors.image, self.selector_timeout)
            .await
        {
            Err(SessionError::NotFound { .. }) => Ok(true),
            Ok(_) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<O: OcrEngine> CaptchaSolver for OcrCaptchaSolver<O> {
    async fn solve_and_fill(
        &self,
        session: &mut dyn PageSession,
        selectors: &CaptchaSelectors,
        item: &ItemId,
        max_attempts: u32,
    ) -> bool {
        for attempt in 1..=max_attempts {
            if attempt > 1 {
                if let Some(refresh) = &selectors.refresh {
                    if let Err(e) = session.click(refresh, self.navigation_timeout).await {
                        tracing::debug!(item = %item, "CAPTCHA refresh failed: {}", e);
                    }
                }
            }

            match self.attempt(session, selectors).await {
                Ok(true) => {
                    tracing::debug!(item = %item, "CAPTCHA solved on attempt {}", attempt);
                    return true;
                }
                Ok(false) => {
                    tracing::debug!(item = %item, "CAPTCHA attempt {}/{} rejected", attempt, max_attempts);
                }
                Err(e) => {
                    tracing::debug!(item = %item, "CAPTCHA attempt {}/{} failed: {}", attempt, max_attempts, e);
                }
            }
        }

        tracing::warn!(item = %item, "CAPTCHA unsolved after {} attempts", max_attempts);
        false
    }
}
