//! End-to-end listing run
//!
//! Startup validation, then phase a (acquisition), phase b (images) and the
//! sequential CSV export. Only configuration problems and an unreachable
//! store page fail a run; everything per item is contained and counted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::crawling::{AcquisitionOrchestrator, AcquisitionStats, OrchestratorConfig, OrchestratorError};
use crate::domain::batch::{BatchLayout, BatchPartitioner};
use crate::domain::pricing::PriceTransformer;
use crate::domain::product::Product;
use crate::infrastructure::config::{ConfigError, Settings};
use crate::infrastructure::dedup_store::{DedupError, DedupStore};
use crate::infrastructure::http_client::{DocumentFetcher, FetchError, HttpClientConfig, RetryingFetcher};
use crate::infrastructure::image_fetcher::ImageFetcher;
use crate::infrastructure::parsing::{ListingParser, ParsingError, StorePageParser};
use crate::infrastructure::record_exporter::RecordExporter;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("HTTP client setup failed: {0}")]
    HttpClient(#[from] FetchError),

    #[error("Parser setup failed: {0}")]
    Parser(#[from] ParsingError),

    #[error("Dedup store unavailable: {0}")]
    Dedup(#[from] DedupError),

    #[error("Cannot create output directory {path:?}: {source}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot determine the next batch number in {base_dir:?}")]
    BatchNumberingUnavailable { base_dir: PathBuf },

    #[error(transparent)]
    Acquisition(#[from] OrchestratorError),

    #[error("Export task failed: {0}")]
    ExportTask(String),
}

/// Outcome of one run, for display and for the upload hand-off.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub store_url: String,
    /// Accepted products in sequence order
    pub products: Vec<Product>,
    pub stats: AcquisitionStats,
    pub starting_batch: u32,
    /// Batch numbers that received at least one record
    pub batches: Vec<u32>,
    pub output_dir: PathBuf,
    pub images_downloaded: usize,
    pub images_failed: usize,
    pub images_skipped: usize,
    pub records_written: usize,
    pub records_failed: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

pub struct ListingPipeline {
    settings: Settings,
    fetcher: Arc<dyn DocumentFetcher>,
    dedup: DedupStore,
    layout: BatchLayout,
    cancellation: CancellationToken,
}

impl ListingPipeline {
    /// Build a pipeline that talks HTTP through `RetryingFetcher`.
    pub async fn new(settings: Settings) -> Result<Self, PipelineError> {
        settings.validate()?;
        let cancellation = CancellationToken::new();
        let fetcher = RetryingFetcher::new(HttpClientConfig::from_settings(&settings))?
            .with_cancellation(cancellation.clone());
        Self::assemble(settings, Arc::new(fetcher), cancellation).await
    }

    /// Build a pipeline around any document source.
    pub async fn with_fetcher(
        settings: Settings,
        fetcher: Arc<dyn DocumentFetcher>,
    ) -> Result<Self, PipelineError> {
        settings.validate()?;
        Self::assemble(settings, fetcher, CancellationToken::new()).await
    }

    async fn assemble(
        settings: Settings,
        fetcher: Arc<dyn DocumentFetcher>,
        cancellation: CancellationToken,
    ) -> Result<Self, PipelineError> {
        let base_dir = settings.base_dir();
        tokio::fs::create_dir_all(&base_dir)
            .await
            .map_err(|source| PipelineError::OutputDirectory {
                path: base_dir.clone(),
                source,
            })?;

        let dedup = DedupStore::open(&PathBuf::from(&settings.database_path)).await?;
        let layout = BatchLayout::new(base_dir, &settings.batch_prefix, &settings.record_prefix);

        let pipeline = Self {
            settings,
            fetcher,
            dedup,
            layout,
            cancellation,
        };
        let starting_batch = pipeline.next_batch_number()?;
        info!(
            "🚀 Pipeline ready: output {:?}, next batch {}",
            pipeline.layout.base_dir(),
            starting_batch
        );
        Ok(pipeline)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn dedup_store(&self) -> &DedupStore {
        &self.dedup
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Stop dispatching new listing fetches and image downloads; in-flight
    /// work drains and the run returns a partial summary.
    pub fn cancel(&self) {
        info!("🛑 Cancellation requested");
        self.cancellation.cancel();
    }

    pub fn next_batch_number(&self) -> Result<u32, PipelineError> {
        BatchPartitioner::next_batch_number(self.layout.base_dir(), self.layout.batch_prefix()).ok_or_else(|| {
            PipelineError::BatchNumberingUnavailable {
                base_dir: self.layout.base_dir().to_path_buf(),
            }
        })
    }

    pub async fn run(&self, store_url: &str) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();

        // Rescanned per run so consecutive runs never share a batch
        let starting_batch = self.next_batch_number()?;
        let partitioner = BatchPartitioner::new(starting_batch, self.settings.batch_capacity);

        let orchestrator = AcquisitionOrchestrator::new(
            self.fetcher.clone(),
            ListingParser::new()?,
            StorePageParser::new()?,
            PriceTransformer::new(self.settings.pricing),
            self.dedup.clone(),
            OrchestratorConfig::from_settings(&self.settings),
        )
        .with_cancellation(self.cancellation.clone());

        info!("Starting run against {} (batch {})", store_url, starting_batch);
        let acquisition = orchestrator.run(store_url).await?;
        let products = Arc::new(acquisition.products);

        let images = ImageFetcher::new(
            self.fetcher.clone(),
            self.layout.clone(),
            partitioner,
            self.settings.image_concurrency,
        )
        .with_cancellation(self.cancellation.clone())
        .download_all(&products)
        .await;

        let exporter = RecordExporter::new(
            self.layout.clone(),
            partitioner,
            self.settings.record_columns(),
            self.settings.csv_headers.clone(),
        );
        let export_products = products.clone();
        let export = tokio::task::spawn_blocking(move || exporter.export(&export_products))
            .await
            .map_err(|e| PipelineError::ExportTask(e.to_string()))?;

        let cancelled = self.cancellation.is_cancelled();
        if cancelled {
            warn!("Run was cancelled; summary is partial");
        }

        let products = Arc::try_unwrap(products).unwrap_or_else(|shared| (*shared).clone());
        let summary = RunSummary {
            run_id: acquisition.run_id,
            store_url: store_url.to_string(),
            products,
            stats: acquisition.stats,
            starting_batch,
            batches: export.batches.into_iter().collect(),
            output_dir: self.layout.base_dir().to_path_buf(),
            images_downloaded: images.downloaded,
            images_failed: images.failed,
            images_skipped: images.skipped,
            records_written: export.records_written,
            records_failed: export.records_failed,
            cancelled,
            elapsed: started.elapsed(),
        };

        info!(
            "🎉 Run {} finished in {:?}: {} products in batches {:?}, {} images",
            summary.run_id,
            summary.elapsed,
            summary.products.len(),
            summary.batches,
            summary.images_downloaded
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn invalid_settings_fail_before_any_io() {
        let dir = tempdir().unwrap();
        let settings = Settings {
            base_dir: dir.path().join("out").to_string_lossy().into_owned(),
            database_path: dir.path().join("products.db").to_string_lossy().into_owned(),
            image_concurrency: 0,
            ..Settings::default()
        };

        let result = ListingPipeline::new(settings).await;

        assert!(matches!(result, Err(PipelineError::Configuration(_))));
        assert!(!dir.path().join("out").exists());
        assert!(!dir.path().join("products.db").exists());
    }

    #[tokio::test]
    async fn startup_creates_output_and_database() {
        let dir = tempdir().unwrap();
        let settings = Settings {
            base_dir: dir.path().join("out").to_string_lossy().into_owned(),
            database_path: dir.path().join("db").join("products.db").to_string_lossy().into_owned(),
            ..Settings::default()
        };

        let pipeline = ListingPipeline::new(settings).await.unwrap();

        assert!(dir.path().join("out").is_dir());
        assert!(dir.path().join("db").join("products.db").exists());
        assert_eq!(pipeline.next_batch_number().unwrap(), 1);
        assert_eq!(pipeline.dedup_store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn blocked_output_directory_is_fatal() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("out");
        std::fs::write(&blocker, b"file").unwrap();
        let settings = Settings {
            base_dir: blocker.to_string_lossy().into_owned(),
            database_path: dir.path().join("products.db").to_string_lossy().into_owned(),
            ..Settings::default()
        };

        assert!(matches!(
            ListingPipeline::new(settings).await,
            Err(PipelineError::OutputDirectory { .. })
        ));
    }
}
