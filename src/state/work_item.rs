//! Work item identity and locator derivation
//!
//! A work item never changes after creation; only its ledger status does.
use crate::HarvestError;
use serde::Deserialize;
use std::fmt;
use url::Url;

/// How raw id cells are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdKind {
    /// Numeric registry ids, expandable from a range
    #[default]
    Integer,

    /// Opaque string keys (e.g. registration numbers)
    Key,
}

/// Identifier of one unit of scrape work
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemId {
    Number(u64),
    Key(String),
}

impl ItemId {
    /// Parses a raw cell according to the configured id kind
    ///
    /// Integer cells written by spreadsheet tools as `402.0` are accepted.
    pub fn parse(raw: &str, kind: IdKind) -> Result<Self, HarvestError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(HarvestError::InvalidId {
                value: raw.to_string(),
                reason: "empty".to_string(),
            });
        }

        match kind {
            IdKind::Key => Ok(Self::Key(trimmed.to_string())),
            IdKind::Integer => {
                if let Ok(n) = trimmed.parse::<u64>() {
                    return Ok(Self::Number(n));
                }
                match whole_decimal(trimmed) {
                    Some(n) => Ok(Self::Number(n)),
                    None => Err(HarvestError::InvalidId {
                        value: raw.to_string(),
                        reason: "not a non-negative integer".to_string(),
                    }),
                }
            }
        }
    }
}

/// Reads `402.0` or `402.` as 402; any non-zero fraction is rejected
fn whole_decimal(value: &str) -> Option<u64> {
    let (whole, fraction) = value.split_once('.')?;
    if fraction.bytes().all(|b| b == b'0') {
        whole.parse().ok()
    } else {
        None
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Key(k) => write!(f, "{}", k),
        }
    }
}

impl From<u64> for ItemId {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

/// Derives a record URL from an item id
#[derive(Debug, Clone)]
pub struct LocatorTemplate {
    template: String,
}

impl LocatorTemplate {
    const PLACEHOLDER: &'static str = "{id}";

    pub fn new(template: &str) -> Self {
        Self {
            template: template.to_string(),
        }
    }

    /// Substitutes `{id}`, or appends the id when the template has no placeholder
    pub fn locate(&self, id: &ItemId) -> Result<Url, url::ParseError> {
        let id = id.to_string();
        let raw = if self.template.contains(Self::PLACEHOLDER) {
            self.template.replace(Self::PLACEHOLDER, &id)
        } else {
            format!("{}{}", self.template, id)
        };
        Url::parse(&raw)
    }
}

/// One unit of scrape work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    id: ItemId,
    locator: Url,
}

impl WorkItem {
    pub fn new(id: ItemId, template: &LocatorTemplate) -> Result<Self, HarvestError> {
        let locator = template.locate(&id)?;
        Ok(Self { id, locator })
    }

    pub fn id(&self) -> &ItemId {
        &self.id
    }

    pub fn locator(&self) -> &Url {
        &self.locator
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
