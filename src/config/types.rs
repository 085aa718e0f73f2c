use crate::state::IdKind;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Registry Harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub run: RunConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub captcha: CaptchaConfig,
    pub output: OutputConfig,
    pub extract: ExtractConfig,
}

/// Which ids to process and how to reach them
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Whether ids are integers or opaque string keys
    #[serde(rename = "id-kind", default)]
    pub id_kind: IdKind,

    /// First id of an inclusive integer range
    #[serde(rename = "start-id")]
    pub start_id: Option<u64>,

    /// Last id of an inclusive integer range
    #[serde(rename = "end-id")]
    pub end_id: Option<u64>,

    /// Explicit id list (alternative to the range)
    #[serde(default)]
    pub ids: Vec<String>,

    /// Record URL; `{id}` is replaced by the item id, otherwise the id is appended
    #[serde(rename = "locator-template")]
    pub locator_template: String,
}

/// Worker pool sizing and retry behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Workers draining the initial queue
    #[serde(default = "default_normal_workers")]
    pub normal: u32,

    /// Workers draining the retry queue
    #[serde(default = "default_retry_workers")]
    pub retry: u32,

    /// Flat delay before a failed retry is pushed back (milliseconds)
    #[serde(rename = "retry-backoff-ms", default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Upper bound on waiting for the retry queue to drain (seconds)
    #[serde(
        rename = "retry-phase-timeout-secs",
        default = "default_retry_phase_timeout_secs"
    )]
    pub retry_phase_timeout_secs: u64,

    /// Load unresolved failures from a previous run into the retry queue
    #[serde(rename = "preload-failures", default = "default_true")]
    pub preload_failures: bool,
}

impl WorkerConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn retry_phase_timeout(&self) -> Duration {
        Duration::from_secs(self.retry_phase_timeout_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            normal: default_normal_workers(),
            retry: default_retry_workers(),
            retry_backoff_ms: default_retry_backoff_ms(),
            retry_phase_timeout_secs: default_retry_phase_timeout_secs(),
            preload_failures: true,
        }
    }
}

/// Bounds on every external call made while processing an item (milliseconds)
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    #[serde(rename = "navigation-ms", default = "default_navigation_ms")]
    pub navigation_ms: u64,

    /// Budget for the whole CAPTCHA solve, all attempts included
    #[serde(rename = "captcha-ms", default = "default_captcha_ms")]
    pub captcha_ms: u64,

    #[serde(rename = "page-ready-ms", default = "default_page_ready_ms")]
    pub page_ready_ms: u64,

    /// Bound on a single selector wait inside the captcha solver or extractor
    #[serde(rename = "selector-ms", default = "default_selector_ms")]
    pub selector_ms: u64,

    #[serde(rename = "extraction-ms", default = "default_extraction_ms")]
    pub extraction_ms: u64,

    /// Pause after the page is ready and before extraction starts
    #[serde(rename = "settle-ms", default)]
    pub settle_ms: u64,

    /// Bound on opening or closing a worker's page session
    #[serde(rename = "session-ms", default = "default_session_ms")]
    pub session_ms: u64,
}

impl TimeoutConfig {
    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    pub fn captcha(&self) -> Duration {
        Duration::from_millis(self.captcha_ms)
    }

    pub fn page_ready(&self) -> Duration {
        Duration::from_millis(self.page_ready_ms)
    }

    pub fn selector(&self) -> Duration {
        Duration::from_millis(self.selector_ms)
    }

    pub fn extraction(&self) -> Duration {
        Duration::from_millis(self.extraction_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn session(&self) -> Duration {
        Duration::from_millis(self.session_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            navigation_ms: default_navigation_ms(),
            captcha_ms: default_captcha_ms(),
            page_ready_ms: default_page_ready_ms(),
            selector_ms: default_selector_ms(),
            extraction_ms: default_extraction_ms(),
            settle_ms: 0,
            session_ms: default_session_ms(),
        }
    }
}

/// Page session settings
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            user_agent: default_user_agent(),
        }
    }
}

/// CAPTCHA form selectors and OCR settings
#[derive(Debug, Clone, Deserialize)]
pub struct CaptchaConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(rename = "image-selector", default)]
    pub image_selector: String,

    #[serde(rename = "input-selector", default)]
    pub input_selector: String,

    #[serde(rename = "submit-selector", default)]
    pub submit_selector: String,

    #[serde(rename = "refresh-selector")]
    pub refresh_selector: Option<String>,

    #[serde(rename = "max-attempts", default = "default_captcha_attempts")]
    pub max_attempts: u32,

    /// OCR program and arguments; the image is written to its stdin
    #[serde(rename = "ocr-command", default)]
    pub ocr_command: Vec<String>,

    /// Length a recognised answer must have to be submitted
    #[serde(rename = "expected-length")]
    pub expected_length: Option<usize>,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            image_selector: String::new(),
            input_selector: String::new(),
            submit_selector: String::new(),
            refresh_selector: None,
            max_attempts: default_captcha_attempts(),
            ocr_command: Vec::new(),
            expected_length: None,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// CSV file receiving one row per successful record
    #[serde(rename = "success-path")]
    pub success_path: String,

    /// CSV file of (id, locator) rows for unresolved failures
    #[serde(rename = "failure-path")]
    pub failure_path: String,

    /// Column holding the item id in both files
    #[serde(rename = "id-column", default = "default_id_column")]
    pub id_column: String,
}

/// Field schema and the selectors that fill it
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractConfig {
    /// Selector that must be present before extraction starts
    #[serde(rename = "ready-selector")]
    pub ready_selector: Option<String>,

    /// Field stamped with the extraction time (UTC, RFC 3339)
    #[serde(rename = "timestamp-field")]
    pub timestamp_field: Option<String>,

    /// Declared fields, in column order
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

/// One declared output column
#[derive(Debug, Clone, Deserialize)]
pub struct FieldSpec {
    pub name: String,

    pub selector: String,

    /// Read this attribute instead of the element text
    pub attribute: Option<String>,
}

fn default_normal_workers() -> u32 {
    11
}

fn default_retry_workers() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    2000
}

fn default_retry_phase_timeout_secs() -> u64 {
    300
}

fn default_navigation_ms() -> u64 {
    60_000
}

fn default_captcha_ms() -> u64 {
    60_000
}

fn default_page_ready_ms() -> u64 {
    30_000
}

fn default_selector_ms() -> u64 {
    10_000
}

fn default_extraction_ms() -> u64 {
    120_000
}

fn default_session_ms() -> u64 {
    30_000
}

fn default_captcha_attempts() -> u32 {
    5
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

fn default_true() -> bool {
    true
}
