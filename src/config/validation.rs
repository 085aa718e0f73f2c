use crate::config::types::{
    CaptchaConfig, Config, ExtractConfig, OutputConfig, RunConfig, TimeoutConfig, WorkerConfig,
};
use crate::state::{IdKind, ItemId, LocatorTemplate};
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;

/// Upper bound on concurrently open page sessions
const MAX_TOTAL_WORKERS: u32 = 64;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_run_config(&config.run)?;
    validate_worker_config(&config.workers)?;
    validate_timeouts(&config.timeouts)?;
    validate_captcha_config(&config.captcha)?;
    validate_output_config(&config.output)?;
    validate_extract_config(&config.extract, &config.output.id_column)?;
    Ok(())
}

/// Validates the id source and locator template
fn validate_run_config(config: &RunConfig) -> Result<(), ConfigError> {
    let has_range = match (config.start_id, config.end_id) {
        (Some(start), Some(end)) => {
            if start > end {
                return Err(ConfigError::Validation(format!(
                    "start-id ({}) must not exceed end-id ({})",
                    start, end
                )));
            }
            true
        }
        (None, None) => false,
        _ => {
            return Err(ConfigError::Validation(
                "start-id and end-id must be given together".to_string(),
            ))
        }
    };

    if has_range && !config.ids.is_empty() {
        return Err(ConfigError::Validation(
            "use either start-id/end-id or ids, not both".to_string(),
        ));
    }

    if has_range && config.id_kind != IdKind::Integer {
        return Err(ConfigError::Validation(
            "an id range requires id-kind = \"integer\"".to_string(),
        ));
    }

    for raw in &config.ids {
        ItemId::parse(raw, config.id_kind)
            .map_err(|e| ConfigError::Validation(format!("invalid entry in ids: {}", e)))?;
    }

    let template = LocatorTemplate::new(&config.locator_template);
    let sample = match config.id_kind {
        IdKind::Integer => ItemId::Number(1),
        IdKind::Key => ItemId::Key("SAMPLE".to_string()),
    };
    template
        .locate(&sample)
        .map_err(|e| ConfigError::InvalidUrl(format!("locator-template: {}", e)))?;

    Ok(())
}

/// Validates worker pool sizes
fn validate_worker_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    if config.normal < 1 {
        return Err(ConfigError::Validation(format!(
            "workers.normal must be >= 1, got {}",
            config.normal
        )));
    }

    if config.retry < 1 {
        return Err(ConfigError::Validation(format!(
            "workers.retry must be >= 1, got {}",
            config.retry
        )));
    }

    let total = config.normal + config.retry;
    if total > MAX_TOTAL_WORKERS {
        return Err(ConfigError::Validation(format!(
            "total worker count must be <= {}, got {}",
            MAX_TOTAL_WORKERS, total
        )));
    }

    if config.retry_phase_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "retry-phase-timeout-secs must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Every external call needs a non-zero bound
fn validate_timeouts(config: &TimeoutConfig) -> Result<(), ConfigError> {
    let bounds = [
        ("navigation-ms", config.navigation_ms),
        ("captcha-ms", config.captcha_ms),
        ("page-ready-ms", config.page_ready_ms),
        ("selector-ms", config.selector_ms),
        ("extraction-ms", config.extraction_ms),
        ("session-ms", config.session_ms),
    ];

    for (name, value) in bounds {
        if value == 0 {
            return Err(ConfigError::Validation(format!("{} must be > 0", name)));
        }
    }

    Ok(())
}

/// Validates captcha settings when the solver is enabled
fn validate_captcha_config(config: &CaptchaConfig) -> Result<(), ConfigError> {
    if !config.enabled {
        return Ok(());
    }

    if config.max_attempts < 1 || config.max_attempts > 10 {
        return Err(ConfigError::Validation(format!(
            "captcha.max-attempts must be between 1 and 10, got {}",
            config.max_attempts
        )));
    }

    validate_selector("captcha.image-selector", &config.image_selector)?;
    validate_selector("captcha.input-selector", &config.input_selector)?;
    validate_selector("captcha.submit-selector", &config.submit_selector)?;
    if let Some(refresh) = &config.refresh_selector {
        validate_selector("captcha.refresh-selector", refresh)?;
    }

    if config.ocr_command.is_empty() {
        return Err(ConfigError::Validation(
            "captcha.ocr-command cannot be empty when captcha is enabled".to_string(),
        ));
    }

    if config.expected_length == Some(0) {
        return Err(ConfigError::Validation(
            "captcha.expected-length must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.success_path.is_empty() {
        return Err(ConfigError::Validation(
            "success-path cannot be empty".to_string(),
        ));
    }

    if config.failure_path.is_empty() {
        return Err(ConfigError::Validation(
            "failure-path cannot be empty".to_string(),
        ));
    }

    if config.success_path == config.failure_path {
        return Err(ConfigError::Validation(
            "success-path and failure-path must differ".to_string(),
        ));
    }

    if config.id_column.trim().is_empty() {
        return Err(ConfigError::Validation(
            "id-column cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates the declared field schema
fn validate_extract_config(config: &ExtractConfig, id_column: &str) -> Result<(), ConfigError> {
    if config.fields.is_empty() {
        return Err(ConfigError::Validation(
            "extract.fields must declare at least one field".to_string(),
        ));
    }

    if let Some(ready) = &config.ready_selector {
        validate_selector("extract.ready-selector", ready)?;
    }

    let mut seen = HashSet::new();
    seen.insert(id_column.to_string());
    if let Some(stamp) = &config.timestamp_field {
        if !seen.insert(stamp.clone()) {
            return Err(ConfigError::Validation(format!(
                "timestamp-field '{}' collides with the id column",
                stamp
            )));
        }
    }

    for field in &config.fields {
        if field.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "field names cannot be empty".to_string(),
            ));
        }

        if !seen.insert(field.name.clone()) {
            return Err(ConfigError::Validation(format!(
                "field '{}' is declared twice or collides with another column",
                field.name
            )));
        }

        validate_selector(&field.name, &field.selector)?;
    }

    Ok(())
}

fn validate_selector(field: &str, selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector).map_err(|_| ConfigError::InvalidSelector {
        field: field.to_string(),
        selector: selector.to_string(),
    })?;
    Ok(())
}
