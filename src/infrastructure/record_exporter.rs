//! Batch CSV export
//!
//! One file per batch, `TITLE` and `PRICE` first, then the configured
//! columns. Files are opened in append mode; the header is written only when
//! the file is created, so re-running into an existing batch extends it.

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::domain::batch::{BatchLayout, BatchPartitioner};
use crate::domain::product::Product;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Filesystem error at {path:?}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV write failed for {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl ExportError {
    pub(crate) fn filesystem(path: &Path, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// What an export pass wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub records_written: usize,
    pub records_failed: usize,
    pub files: Vec<PathBuf>,
    pub batches: BTreeSet<u32>,
}

pub struct RecordExporter {
    layout: BatchLayout,
    partitioner: BatchPartitioner,
    columns: Vec<String>,
    defaults: Map<String, Value>,
}

impl RecordExporter {
    pub fn new(
        layout: BatchLayout,
        partitioner: BatchPartitioner,
        columns: Vec<String>,
        defaults: Map<String, Value>,
    ) -> Self {
        Self {
            layout,
            partitioner,
            columns,
            defaults,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Append one row per product to its batch file, in slice order.
    ///
    /// A batch whose file cannot be written is logged and counted in
    /// `records_failed`; the remaining batches are still exported.
    pub fn export(&self, products: &[Product]) -> ExportSummary {
        let mut summary = ExportSummary::default();

        for group in products.chunk_by(|a, b| {
            self.partitioner.assign(a.sequence()) == self.partitioner.assign(b.sequence())
        }) {
            let batch = self.partitioner.assign(group[0].sequence());
            match self.write_batch(batch, group) {
                Ok(path) => {
                    summary.records_written += group.len();
                    summary.batches.insert(batch);
                    if !summary.files.contains(&path) {
                        summary.files.push(path);
                    }
                }
                Err(e) => {
                    error!("Failed to export batch {}: {}", batch, e);
                    summary.records_failed += group.len();
                }
            }
        }

        info!(
            "📄 Exported {} records into {} file(s)",
            summary.records_written,
            summary.files.len()
        );
        summary
    }

    fn write_batch(&self, batch: u32, products: &[Product]) -> Result<PathBuf, ExportError> {
        let (path, mut writer) = self.open_batch_file(batch)?;
        for product in products {
            writer
                .write_record(self.row_for(product))
                .map_err(|source| ExportError::Csv {
                    path: path.clone(),
                    source,
                })?;
            debug!("Exported '{}' to {}", product.title(), path.display());
        }
        writer.flush().map_err(|e| ExportError::filesystem(&path, e))?;
        Ok(path)
    }

    fn open_batch_file(&self, batch: u32) -> Result<(PathBuf, csv::Writer<std::fs::File>), ExportError> {
        let dir = self.layout.batch_dir(batch);
        std::fs::create_dir_all(&dir).map_err(|e| ExportError::filesystem(&dir, e))?;

        let path = self.layout.record_file(batch);
        let is_new = !path.is_file();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ExportError::filesystem(&path, e))?;

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if is_new {
            writer
                .write_record(&self.columns)
                .map_err(|source| ExportError::Csv {
                    path: path.clone(),
                    source,
                })?;
        }
        Ok((path, writer))
    }

    fn row_for(&self, product: &Product) -> Vec<String> {
        self.columns
            .iter()
            .map(|column| match column.as_str() {
                "TITLE" => product.title().to_string(),
                "PRICE" => format_price(product.price()),
                other => self.defaults.get(other).map(cell_text).unwrap_or_default(),
            })
            .collect()
    }
}

/// Whole prices are written without a fractional part.
pub fn format_price(price: f64) -> String {
    if price.fract() == 0.0 {
        format!("{price:.0}")
    } else {
        price.to_string()
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
