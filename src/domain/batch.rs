//! Batch partitioning and on-disk batch layout
//!
//! Destination marketplaces cap bulk uploads at a fixed number of items per
//! file, so accepted products are grouped into numbered batches. Batch numbers
//! are durable: a new run resumes after the highest batch directory already
//! present under the base directory.

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, error};

/// Maximum products per batch.
pub const BATCH_CAPACITY: usize = 50;

pub const DEFAULT_BATCH_PREFIX: &str = "Products Directory";
pub const DEFAULT_RECORD_PREFIX: &str = "Products";
pub const RECORD_EXTENSION: &str = "csv";

/// Maps a product's run sequence number to its batch number.
///
/// Pure given the starting number fixed at run start, so every consumer that
/// asks about the same sequence number gets the same batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPartitioner {
    starting_batch: u32,
    capacity: usize,
}

impl BatchPartitioner {
    pub fn new(starting_batch: u32, capacity: usize) -> Self {
        Self {
            starting_batch: starting_batch.max(1),
            capacity: capacity.max(1),
        }
    }

    pub fn starting_batch(&self) -> u32 {
        self.starting_batch
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// `floor(sequence / capacity) + starting_batch`
    pub fn assign(&self, sequence: usize) -> u32 {
        u32::try_from(sequence / self.capacity)
            .unwrap_or(u32::MAX)
            .saturating_add(self.starting_batch)
    }

    /// Position of `sequence` inside its batch, zero-based.
    pub fn slot(&self, sequence: usize) -> usize {
        sequence % self.capacity
    }

    /// Scan `base_dir` for directories named `<prefix> <n>` and return the
    /// next unused batch number (`1` when none exist).
    ///
    /// Returns `None` when the directory cannot be read; callers treat that as
    /// a fatal configuration problem.
    pub fn next_batch_number(base_dir: &Path, prefix: &str) -> Option<u32> {
        let pattern = match Regex::new(&format!(r"^{}.*\s(\d+)$", regex::escape(prefix))) {
            Ok(pattern) => pattern,
            Err(e) => {
                error!("Invalid batch prefix '{}': {}", prefix, e);
                return None;
            }
        };

        let entries = match std::fs::read_dir(base_dir) {
            Ok(entries) => entries,
            Err(e) => {
                error!("Failed to scan batch directories in {:?}: {}", base_dir, e);
                return None;
            }
        };

        let mut max_existing = 0u32;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    error!("Failed to read entry in {:?}: {}", base_dir, e);
                    return None;
                }
            };
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };

            if let Some(number) = pattern
                .captures(name)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
            {
                debug!("Found existing batch directory '{}'", name);
                max_existing = max_existing.max(number);
            }
        }

        Some(max_existing.saturating_add(1))
    }
}

impl Default for BatchPartitioner {
    fn default() -> Self {
        Self::new(1, BATCH_CAPACITY)
    }
}

/// Directory and file naming for batch output:
///
/// ```text
/// <base_dir>/<batch_prefix> <n>/<record_prefix><n>.csv
/// <base_dir>/<batch_prefix> <n>/<sequence + 1>/<image_index>_<basename>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLayout {
    base_dir: PathBuf,
    batch_prefix: String,
    record_prefix: String,
}

impl BatchLayout {
    pub fn new(
        base_dir: impl Into<PathBuf>,
        batch_prefix: impl Into<String>,
        record_prefix: impl Into<String>,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            batch_prefix: batch_prefix.into(),
            record_prefix: record_prefix.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn batch_prefix(&self) -> &str {
        &self.batch_prefix
    }

    pub fn batch_dir(&self, batch: u32) -> PathBuf {
        self.base_dir.join(format!("{} {}", self.batch_prefix, batch))
    }

    pub fn record_file(&self, batch: u32) -> PathBuf {
        self.batch_dir(batch)
            .join(format!("{}{}.{}", self.record_prefix, batch, RECORD_EXTENSION))
    }

    /// Per-product image folder, numbered from 1 in run order.
    pub fn product_dir(&self, batch: u32, sequence: usize) -> PathBuf {
        self.batch_dir(batch).join((sequence + 1).to_string())
    }
}
