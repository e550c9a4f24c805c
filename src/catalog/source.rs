//! Upstream catalog data sources.
//!
//! A source hands the refresh pipeline a stream of raw rows keyed by upstream
//! column name. Errors on individual rows travel inside the stream so the
//! pipeline can skip them; an `Err` from [`CatalogSource::rows`] itself means
//! the source could not be opened at all.

use std::collections::HashMap;
#[cfg(feature = "cli")]
use std::path::PathBuf;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use thiserror::Error;

/// A raw upstream row: column name to cell text.
pub type RawRow = HashMap<String, String>;

pub type RawRowStream = BoxStream<'static, Result<RawRow, SourceError>>;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed record: {0}")]
    Malformed(String),

    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Open the source and stream its rows.
    async fn rows(&self) -> Result<RawRowStream, SourceError>;

    /// Human-readable name for logging.
    fn describe(&self) -> String;
}

/// Rows held in memory. Used for seeding and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalogSource {
    rows: Vec<RawRow>,
}

impl StaticCatalogSource {
    pub fn new(rows: Vec<RawRow>) -> Self {
        Self { rows }
    }

    /// Build from a header line and records, as a CSV file would present them.
    pub fn from_records(headers: &[&str], records: &[&[&str]]) -> Self {
        let rows = records
            .iter()
            .map(|record| {
                headers
                    .iter()
                    .zip(record.iter())
                    .map(|(h, v)| (h.to_string(), v.to_string()))
                    .collect()
            })
            .collect();
        Self { rows }
    }
}

#[async_trait]
impl CatalogSource for StaticCatalogSource {
    async fn rows(&self) -> Result<RawRowStream, SourceError> {
        Ok(stream::iter(self.rows.clone().into_iter().map(Ok)).boxed())
    }

    fn describe(&self) -> String {
        format!("static ({} rows)", self.rows.len())
    }
}

/// Records buffered between the blocking CSV reader and the pipeline.
#[cfg(feature = "cli")]
const CSV_CHANNEL_CAPACITY: usize = 1024;

/// A provider price-list export on disk.
///
/// Price-list CSVs open with a few lines of metadata (format version,
/// publication date) before the header; `skip_lines` drops them.
#[cfg(feature = "cli")]
#[derive(Debug, Clone)]
pub struct CsvCatalogSource {
    path: PathBuf,
    skip_lines: usize,
}

#[cfg(feature = "cli")]
impl CsvCatalogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            skip_lines: 0,
        }
    }

    pub fn with_skip_lines(mut self, skip_lines: usize) -> Self {
        self.skip_lines = skip_lines;
        self
    }

    fn open(&self) -> Result<csv::Reader<std::io::BufReader<std::fs::File>>, SourceError> {
        use std::io::BufRead;

        let io_error = |source| SourceError::Io {
            path: self.path.display().to_string(),
            source,
        };
        let file = std::fs::File::open(&self.path).map_err(io_error)?;
        let mut reader = std::io::BufReader::new(file);
        let mut discard = String::new();
        for _ in 0..self.skip_lines {
            discard.clear();
            reader.read_line(&mut discard).map_err(io_error)?;
        }

        Ok(csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader))
    }
}

#[cfg(feature = "cli")]
#[async_trait]
impl CatalogSource for CsvCatalogSource {
    async fn rows(&self) -> Result<RawRowStream, SourceError> {
        let source = self.clone();
        let (opened_tx, opened_rx) = tokio::sync::oneshot::channel();
        let (tx, rx) = tokio::sync::mpsc::channel(CSV_CHANNEL_CAPACITY);

        tokio::task::spawn_blocking(move || {
            let opened = source.open().and_then(|mut reader| {
                let headers: Vec<String> = reader
                    .headers()
                    .map_err(|e| SourceError::Malformed(e.to_string()))?
                    .iter()
                    .map(str::to_string)
                    .collect();
                Ok((reader, headers))
            });
            let (mut reader, headers) = match opened {
                Ok(opened) => {
                    if opened_tx.send(Ok(())).is_err() {
                        return;
                    }
                    opened
                }
                Err(e) => {
                    let _ = opened_tx.send(Err(e));
                    return;
                }
            };

            for record in reader.records() {
                let row = record
                    .map(|record| {
                        headers
                            .iter()
                            .cloned()
                            .zip(record.iter().map(str::to_string))
                            .collect::<RawRow>()
                    })
                    .map_err(|e| SourceError::Malformed(e.to_string()));
                // Receiver dropped: the pipeline gave up on this cycle.
                if tx.blocking_send(row).is_err() {
                    break;
                }
            }
        });

        opened_rx
            .await
            .map_err(|_| SourceError::Unavailable(format!("{} reader stopped", self.describe())))??;

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|row| (row, rx))
        })
        .boxed())
    }

    fn describe(&self) -> String {
        format!("csv ({})", self.path.display())
    }
}
