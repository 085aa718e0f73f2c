//! Records, schemas and per-item outcomes

use crate::config::Config;
use crate::state::ItemId;
use std::collections::HashMap;
use std::fmt;

/// Fixed column layout of the success store
///
/// The id column always comes first, followed by the declared fields in
/// configuration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    id_column: String,
    fields: Vec<String>,
}

impl Schema {
    pub fn new(id_column: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            id_column: id_column.into(),
            fields,
        }
    }

    /// Builds the schema declared by a configuration
    ///
    /// The optional timestamp field is placed after the declared fields.
    pub fn from_config(config: &Config) -> Self {
        let mut fields: Vec<String> = config
            .extract
            .fields
            .iter()
            .map(|f| f.name.clone())
            .collect();
        if let Some(stamp) = &config.extract.timestamp_field {
            fields.push(stamp.clone());
        }
        Self::new(config.output.id_column.clone(), fields)
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Header row: id column then every declared field
    pub fn columns(&self) -> Vec<&str> {
        std::iter::once(self.id_column.as_str())
            .chain(self.fields.iter().map(String::as_str))
            .collect()
    }

    pub fn declares(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }
}

/// One extracted row, keyed by field name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    values: HashMap<String, Option<String>>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: impl Into<String>, value: Option<String>) {
        self.values.insert(field.into(), value);
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(field, Some(value.into()));
        self
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).and_then(|v| v.as_deref())
    }

    /// True when no field carries a non-blank value
    pub fn is_empty(&self) -> bool {
        self.values
            .values()
            .all(|v| v.as_deref().map_or(true, |s| s.trim().is_empty()))
    }

    /// Fields present in the record but not declared by the schema
    pub fn undeclared<'a>(&'a self, schema: &'a Schema) -> impl Iterator<Item = &'a str> + 'a {
        self.values
            .keys()
            .map(String::as_str)
            .filter(move |k| !schema.declares(k) && *k != schema.id_column())
    }

    /// Serialises the record in schema order with the id in the id column
    ///
    /// Missing fields become empty cells, so every row has the same width.
    pub fn to_row(&self, id: &ItemId, schema: &Schema) -> Vec<String> {
        std::iter::once(id.to_string())
            .chain(
                schema
                    .fields()
                    .iter()
                    .map(|f| self.get(f).unwrap_or_default().to_string()),
            )
            .collect()
    }
}

/// Why processing an item did not produce a persisted record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The page could not be loaded
    Navigation(String),

    /// The CAPTCHA stayed on the page after every attempt
    CaptchaUnsolved,

    /// The page never reached its ready state
    PageNotReady(String),

    /// A stage exceeded its time budget
    Timeout(&'static str),

    /// The extractor reported an error
    Extraction(String),

    /// The extractor returned nothing, or only blank fields
    NothingExtracted,

    /// The processing body panicked
    Panicked(String),

    /// The record was extracted but could not be written to the ledger
    Persist(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Navigation(e) => write!(f, "navigation failed: {}", e),
            Self::CaptchaUnsolved => write!(f, "captcha unsolved"),
            Self::PageNotReady(e) => write!(f, "page not ready: {}", e),
            Self::Timeout(stage) => write!(f, "{} timed out", stage),
            Self::Extraction(e) => write!(f, "extraction error: {}", e),
            Self::NothingExtracted => write!(f, "extraction returned nothing"),
            Self::Panicked(msg) => write!(f, "panicked: {}", msg),
            Self::Persist(e) => write!(f, "could not persist: {}", e),
        }
    }
}

/// Result of processing one work item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(Record),
    Failure(FailureReason),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(
            "project_id",
            vec!["project_name".to_string(), "status".to_string()],
        )
    }

    #[test]
    fn test_columns_start_with_id() {
        assert_eq!(schema().columns(), vec!["project_id", "project_name", "status"]);
    }

    #[test]
    fn test_row_fills_missing_fields() {
        let record = Record::new().with("status", "Registered");
        let row = record.to_row(&ItemId::Number(401), &schema());
        assert_eq!(row, vec!["401", "", "Registered"]);
    }

    #[test]
    fn test_row_drops_undeclared_fields() {
        let record = Record::new()
            .with("project_name", "Skyline")
            .with("unexpected", "x");
        let s = schema();
        let row = record.to_row(&ItemId::Number(1), &s);
        assert_eq!(row.len(), 3);
        assert_eq!(record.undeclared(&s).collect::<Vec<_>>(), vec!["unexpected"]);
    }

    #[test]
    fn test_is_empty() {
        assert!(Record::new().is_empty());

        let mut blank = Record::new();
        blank.set("project_name", None);
        blank.set("status", Some("  ".to_string()));
        assert!(blank.is_empty());

        assert!(!Record::new().with("status", "Lapsed").is_empty());
    }

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(FailureReason::Timeout("extraction").to_string(), "extraction timed out");
        assert_eq!(FailureReason::CaptchaUnsolved.to_string(), "captcha unsolved");
    }
}
