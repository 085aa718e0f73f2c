//! A single append-only CSV store guarded by its own lock

use crate::ledger::traits::{LedgerError, LedgerResult};
use crate::state::{IdKind, ItemId};
use csv::{ByteRecord, ReaderBuilder, WriterBuilder};
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

/// One CSV file whose first column holds the item id
pub(crate) struct CsvStore {
    path: PathBuf,
    header: Vec<String>,
    id_kind: IdKind,
    lock: Mutex<()>,
}

impl CsvStore {
    pub(crate) fn new(path: impl Into<PathBuf>, header: Vec<String>, id_kind: IdKind) -> Self {
        Self {
            path: path.into(),
            header,
            id_kind,
            lock: Mutex::new(()),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    fn id_column(&self) -> &str {
        &self.header[0]
    }

    /// Fails if the file exists with a header other than the configured one
    pub(crate) async fn verify_header(&self) -> LedgerResult<()> {
        let _guard = self.lock.lock().await;
        let Some(bytes) = self.read_bytes().await? else {
            return Ok(());
        };
        if bytes.is_empty() {
            return Ok(());
        }

        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .from_reader(bytes.as_slice());
        let found: Vec<String> = reader
            .headers()
            .map_err(|e| self.csv_error(e))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        if found != self.header {
            return Err(LedgerError::SchemaMismatch {
                path: self.path.clone(),
                expected: self.header.clone(),
                found,
            });
        }
        Ok(())
    }

    /// Appends one row, writing the header first if the file is new or empty
    pub(crate) async fn append(&self, row: &[String]) -> LedgerResult<()> {
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error(e))?;
            }
        }

        let existing_len = match fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(self.io_error(e)),
        };

        let mut buf = Vec::new();
        // A crash mid-append can leave the last line unterminated
        if existing_len > 0 && !self.ends_with_newline().await? {
            buf.push(b'\n');
        }
        {
            let mut writer = WriterBuilder::new().from_writer(&mut buf);
            if existing_len == 0 {
                writer
                    .write_record(&self.header)
                    .map_err(|e| self.csv_error(e))?;
            }
            writer.write_record(row).map_err(|e| self.csv_error(e))?;
            writer.flush().map_err(|e| self.io_error(e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(&buf).await.map_err(|e| self.io_error(e))?;
        file.sync_data().await.map_err(|e| self.io_error(e))?;
        Ok(())
    }

    /// Reads every parseable id, in file order
    pub(crate) async fn read_ids(&self) -> LedgerResult<Vec<ItemId>> {
        let bytes = {
            let _guard = self.lock.lock().await;
            self.read_bytes().await?
        };
        match bytes {
            Some(bytes) => Ok(self.parse_ids(&bytes)),
            None => Ok(Vec::new()),
        }
    }

    /// Rewrites the store without rows for `id`, returning how many were dropped
    ///
    /// The new content is written to a sibling temp file and renamed over the
    /// store, so a crash leaves either the old or the new file intact.
    pub(crate) async fn remove_id(&self, id: &ItemId) -> LedgerResult<usize> {
        let _guard = self.lock.lock().await;
        let Some(bytes) = self.read_bytes().await? else {
            return Ok(0);
        };

        let (content, removed) = self.filter_out(&bytes, id)?;
        if removed == 0 {
            return Ok(0);
        }

        let tmp_path = self.tmp_path();
        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(&content).await.map_err(|e| self.io_error(e))?;
        file.sync_all().await.map_err(|e| self.io_error(e))?;
        drop(file);
        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        Ok(removed)
    }

    async fn read_bytes(&self) -> LedgerResult<Option<Vec<u8>>> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    async fn ends_with_newline(&self) -> LedgerResult<bool> {
        let mut file = fs::File::open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.seek(SeekFrom::End(-1))
            .await
            .map_err(|e| self.io_error(e))?;
        let last = file.read_u8().await.map_err(|e| self.io_error(e))?;
        Ok(last == b'\n')
    }

    fn parse_ids(&self, bytes: &[u8]) -> Vec<ItemId> {
        if bytes.is_empty() {
            return Vec::new();
        }

        let mut reader = ReaderBuilder::new().flexible(true).from_reader(bytes);
        let column = match reader.byte_headers() {
            Ok(headers) => headers
                .iter()
                .position(|h| std::str::from_utf8(h).is_ok_and(|h| h.trim() == self.id_column())),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Unreadable header, skipping store: {}", e);
                return Vec::new();
            }
        };
        let Some(column) = column else {
            tracing::warn!(
                path = %self.path.display(),
                "No '{}' column found, skipping store",
                self.id_column()
            );
            return Vec::new();
        };

        let mut ids = Vec::new();
        for (index, result) in reader.byte_records().enumerate() {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), row = index + 1, "Skipping malformed row: {}", e);
                    continue;
                }
            };

            let Ok(cell) = std::str::from_utf8(record.get(column).unwrap_or_default()) else {
                tracing::warn!(path = %self.path.display(), row = index + 1, "Skipping id cell that is not UTF-8");
                continue;
            };
            if cell.trim().is_empty() {
                continue;
            }

            match ItemId::parse(cell, self.id_kind) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), row = index + 1, "Skipping id cell: {}", e);
                }
            }
        }
        ids
    }

    fn filter_out(&self, bytes: &[u8], id: &ItemId) -> LedgerResult<(Vec<u8>, usize)> {
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .has_headers(false)
            .from_reader(bytes);
        let mut out = Vec::new();
        let mut removed = 0;
        {
            let mut writer = WriterBuilder::new().flexible(true).from_writer(&mut out);
            let mut column: Option<usize> = None;

            // Rows that are not valid UTF-8 are carried over untouched
            for (index, result) in reader.byte_records().enumerate() {
                let record: ByteRecord = result.map_err(|e| self.csv_error(e))?;

                if index == 0 {
                    column = record
                        .iter()
                        .position(|h| std::str::from_utf8(h).is_ok_and(|h| h.trim() == self.id_column()));
                    writer
                        .write_record(&record)
                        .map_err(|e| self.csv_error(e))?;
                    continue;
                }

                let matches = column
                    .and_then(|c| record.get(c))
                    .and_then(|cell| std::str::from_utf8(cell).ok())
                    .and_then(|cell| ItemId::parse(cell, self.id_kind).ok())
                    .is_some_and(|parsed| &parsed == id);
                if matches {
                    removed += 1;
                } else {
                    writer
                        .write_record(&record)
                        .map_err(|e| self.csv_error(e))?;
                }
            }
            writer.flush().map_err(|e| self.io_error(e))?;
        }
        Ok((out, removed))
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn io_error(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv_error(&self, source: csv::Error) -> LedgerError {
        LedgerError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}
