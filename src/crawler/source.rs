//! Where the ids of a run come from

use crate::config::Config;
use crate::state::{IdKind, ItemId};
use crate::{ConfigError, HarvestError};
use std::collections::HashSet;
use std::path::PathBuf;

/// Spreadsheet row holding the first data row of an ids file (row 1 is the header)
pub const FIRST_DATA_ROW: usize = 2;

/// The set of ids a run starts from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdSource {
    /// Whatever the `[run]` section of the configuration names
    Configured,

    /// Inclusive integer range; only valid for integer ids
    Range { start: u64, end: u64 },

    /// Explicit list of raw ids, read according to the configured id kind
    List(Vec<String>),

    /// One column of a CSV file
    IdsFile {
        path: PathBuf,
        column: String,
        /// Spreadsheet-style row number of the first id to take
        start_row: usize,
    },

    /// No new ids: only the unresolved failures of earlier runs
    FailuresOnly,
}

impl IdSource {
    /// Resolves the ids to seed, trimmed, deduplicated and in source order
    pub async fn resolve(&self, config: &Config) -> Result<Vec<ItemId>, HarvestError> {
        let kind = config.run.id_kind;
        let ids = match self {
            Self::Configured => match (config.run.start_id, config.run.end_id) {
                (Some(start), Some(end)) => range(start, end, kind)?,
                _ if !config.run.ids.is_empty() => parse_all(&config.run.ids, kind)?,
                _ => {
                    return Err(ConfigError::Validation(
                        "no ids to process: set start-id/end-id or ids, or pass --ids-file"
                            .to_string(),
                    )
                    .into())
                }
            },
            Self::Range { start, end } => range(*start, *end, kind)?,
            Self::List(raw) => parse_all(raw, kind)?,
            Self::IdsFile {
                path,
                column,
                start_row,
            } => {
                let content = tokio::fs::read(path).await?;
                read_id_column(&content, column, *start_row, kind)?
            }
            Self::FailuresOnly => Vec::new(),
        };

        let mut seen = HashSet::new();
        Ok(ids.into_iter().filter(|id| seen.insert(id.clone())).collect())
    }

    pub fn is_failures_only(&self) -> bool {
        matches!(self, Self::FailuresOnly)
    }
}

/// Expands an inclusive range
///
/// Ranged ids are numbers; the ledger reads ids back by the configured kind.
fn range(start: u64, end: u64, kind: IdKind) -> Result<Vec<ItemId>, HarvestError> {
    if kind != IdKind::Integer {
        return Err(ConfigError::Validation(
            "an id range requires id-kind = \"integer\"".to_string(),
        )
        .into());
    }
    Ok((start..=end).map(ItemId::Number).collect())
}

fn parse_all(raw: &[String], kind: IdKind) -> Result<Vec<ItemId>, HarvestError> {
    raw.iter().map(|value| ItemId::parse(value, kind)).collect()
}

/// Reads ids from `column`, starting at spreadsheet row `start_row`
///
/// Blank cells are skipped; cells that are not valid ids are skipped with a
/// warning.
fn read_id_column(
    content: &[u8],
    column: &str,
    start_row: usize,
    kind: IdKind,
) -> Result<Vec<ItemId>, HarvestError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(content);

    let index = reader
        .headers()?
        .iter()
        .position(|h| h.trim() == column)
        .ok_or_else(|| {
            ConfigError::Validation(format!("ids file has no column named '{}'", column))
        })?;

    let skip = start_row.saturating_sub(FIRST_DATA_ROW);
    let mut ids = Vec::new();
    for (offset, row) in reader.records().enumerate().skip(skip) {
        let row = row?;
        let raw = row.get(index).unwrap_or_default().trim();
        if raw.is_empty() {
            continue;
        }
        match ItemId::parse(raw, kind) {
            Ok(id) => ids.push(id),
            Err(e) => tracing::warn!(
                "Skipping row {} of ids file: {}",
                offset + FIRST_DATA_ROW,
                e
            ),
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config(run: &str) -> Config {
        parse_config(&format!(
            r#"
[run]
locator-template = "https://registry.example.gov/view/{{id}}"
{}

[output]
success-path = "out/records.csv"
failure-path = "out/failed.csv"

[extract]
fields = [{{ name = "name", selector = "h4" }}]
"#,
            run
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_configured_range() {
        let config = config("start-id = 401\nend-id = 403");
        let ids = IdSource::Configured.resolve(&config).await.unwrap();
        assert_eq!(ids, vec![ItemId::Number(401), ItemId::Number(402), ItemId::Number(403)]);
    }

    #[tokio::test]
    async fn test_configured_list_is_deduplicated() {
        let config = config(r#"id-kind = "key"
ids = ["P-1", " P-2 ", "P-1"]"#);
        let ids = IdSource::Configured.resolve(&config).await.unwrap();
        assert_eq!(
            ids,
            vec![ItemId::Key("P-1".to_string()), ItemId::Key("P-2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_configured_without_ids_is_an_error() {
        let config = config("");
        assert!(IdSource::Configured.resolve(&config).await.is_err());
        assert!(IdSource::FailuresOnly.resolve(&config).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_range_requires_integer_ids() {
        let source = IdSource::Range { start: 401, end: 402 };

        let ids = source.resolve(&config("")).await.unwrap();
        assert_eq!(ids, vec![ItemId::Number(401), ItemId::Number(402)]);

        let keyed = config(r#"id-kind = "key""#);
        assert!(matches!(
            source.resolve(&keyed).await,
            Err(HarvestError::Config(ConfigError::Validation(_)))
        ));
    }

    #[tokio::test]
    async fn test_explicit_list_follows_id_kind() {
        let source = IdSource::List(vec!["401".to_string(), "402.0".to_string(), "401".to_string()]);
        let ids = source.resolve(&config("")).await.unwrap();
        assert_eq!(ids, vec![ItemId::Number(401), ItemId::Number(402)]);

        // The ledger reads these back as keys, so they must be keys here too
        let keyed = config(r#"id-kind = "key""#);
        let ids = source.resolve(&keyed).await.unwrap();
        assert_eq!(
            ids,
            vec![ItemId::Key("401".to_string()), ItemId::Key("402.0".to_string())]
        );

        let bad = IdSource::List(vec!["P-1".to_string()]);
        assert!(bad.resolve(&config("")).await.is_err());
    }

    #[tokio::test]
    async fn test_ids_file_column_and_start_row() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "Sr,RERA No.,Name\n1,P-10,a\n2,P-11,b\n3,,c\n4,P-12,d\n5,P-11,e\n"
        )
        .unwrap();

        let config = config(r#"id-kind = "key""#);
        let source = IdSource::IdsFile {
            path: file.path().to_path_buf(),
            column: "RERA No.".to_string(),
            start_row: 3,
        };
        let ids = source.resolve(&config).await.unwrap();
        assert_eq!(
            ids,
            vec![ItemId::Key("P-11".to_string()), ItemId::Key("P-12".to_string())]
        );
    }

    #[tokio::test]
    async fn test_ids_file_skips_bad_integers() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "id\n401\nabc\n402.0\n").unwrap();

        let config = config("");
        let source = IdSource::IdsFile {
            path: file.path().to_path_buf(),
            column: "id".to_string(),
            start_row: FIRST_DATA_ROW,
        };
        let ids = source.resolve(&config).await.unwrap();
        assert_eq!(ids, vec![ItemId::Number(401), ItemId::Number(402)]);
    }

    #[tokio::test]
    async fn test_ids_file_missing_column() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "a,b\n1,2\n").unwrap();

        let source = IdSource::IdsFile {
            path: file.path().to_path_buf(),
            column: "id".to_string(),
            start_row: FIRST_DATA_ROW,
        };
        assert!(source.resolve(&config("")).await.is_err());
    }

    #[tokio::test]
    async fn test_unreadable_ids_file_errors() {
        let source = IdSource::IdsFile {
            path: PathBuf::from("/nonexistent/ids.csv"),
            column: "id".to_string(),
            start_row: FIRST_DATA_ROW,
        };
        assert!(matches!(
            source.resolve(&config("")).await,
            Err(HarvestError::Io(_))
        ));

        let bad = IdSource::List(vec!["abc".to_string()]);
        assert!(matches!(
            bad.resolve(&config("")).await,
            Err(HarvestError::InvalidId { .. })
        ));
    }
}
