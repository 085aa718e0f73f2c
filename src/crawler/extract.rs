//! Record extraction from a ready page

use crate::config::{ExtractConfig, FieldSpec};
use crate::crawler::session::{PageSession, SessionError};
use crate::state::{Record, WorkItem};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use std::time::Duration;

/// Produces a record from the page a session is showing
#[async_trait]
pub trait Extractor: Send + Sync {
    /// `Ok(None)` means the page held nothing worth keeping
    async fn extract_record(
        &self,
        session: &mut dyn PageSession,
        item: &WorkItem,
    ) -> anyhow::Result<Option<Record>>;
}

/// Fills each declared field from a CSS selector
///
/// A field whose element is missing stays empty; the record is dropped only
/// when every field is empty.
pub struct SelectorExtractor {
    fields: Vec<FieldSpec>,
    timestamp_field: Option<String>,
    selector_timeout: Duration,
}

impl SelectorExtractor {
    pub fn new(config: &ExtractConfig, selector_timeout: Duration) -> Self {
        Self {
            fields: config.fields.clone(),
            timestamp_field: config.timestamp_field.clone(),
            selector_timeout,
        }
    }
}

#[async_trait]
impl Extractor for SelectorExtractor {
    async fn extract_record(
        &self,
        session: &mut dyn PageSession,
        item: &WorkItem,
    ) -> anyhow::Result<Option<Record>> {
        let mut record = Record::new();

        for field in &self.fields {
            let value = match session
                .wait_for_selector(&field.selector, self.selector_timeout)
                .await
            {
                Ok(node) => match &field.attribute {
                    Some(attribute) => node.attribute(attribute).map(|v| v.trim().to_string()),
                    None => Some(session.read(&node)),
                },
                Err(SessionError::NotFound { .. }) | Err(SessionError::Timeout { .. }) => {
                    tracing::trace!(item = %item, "Field '{}' not present", field.name);
                    None
                }
                Err(e) => return Err(e.into()),
            };
            record.set(field.name.as_str(), value.filter(|v| !v.is_empty()));
        }

        if record.is_empty() {
            return Ok(None);
        }

        if let Some(stamp) = &self.timestamp_field {
            record.set(
                stamp.as_str(),
                Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
            );
        }

        Ok(Some(record))
    }
}
