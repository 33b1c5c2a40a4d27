//! Infrastructure layer: settings, logging, HTTP, parsing, storage and
//! on-disk output.

pub mod config;
pub mod database_connection;
pub mod dedup_store;
pub mod http_client;
pub mod image_fetcher;
pub mod logging;
pub mod parsing;
pub mod record_exporter;

pub use config::{ConfigError, LoggingConfig, Settings, SettingsManager};
pub use database_connection::DatabaseConnection;
pub use dedup_store::{DedupError, DedupStore, RecordOutcome};
pub use http_client::{
    DocumentFetcher, FetchError, FetchedDocument, HttpClientConfig, RetryPolicy, RetryingFetcher,
};
pub use image_fetcher::{ImageDownloadSummary, ImageFetcher};
pub use logging::{get_log_directory, init_logging, init_logging_with_config};
pub use parsing::{ListingParser, ParsingError, ParsingResult, StorePageParser};
pub use record_exporter::{ExportError, ExportSummary, RecordExporter};
