//! # Acquisition Orchestrator
//!
//! Fetches the store page, discovers listing links and drives
//! fetch → parse → classify → dedup → accept for each link through a
//! bounded task pool. Per-link failures are logged and counted; they never
//! abort sibling tasks or the run.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::crawling::context::{AcceptedListing, RunContext};
use crate::domain::pricing::PriceTransformer;
use crate::domain::product::{ParsedListing, Product};
use crate::infrastructure::config::{Settings, defaults};
use crate::infrastructure::dedup_store::{DedupStore, RecordOutcome};
use crate::infrastructure::http_client::{DocumentFetcher, FetchError};
use crate::infrastructure::parsing::{ListingParser, ParsingError, StorePageParser};

/// Configuration for the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Store page links beyond this many are ignored
    pub max_listings: usize,

    /// Listing fetches in flight at once
    pub concurrency: usize,

    pub require_availability: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_listings: defaults::MAX_LISTINGS,
            concurrency: defaults::FETCH_CONCURRENCY,
            require_availability: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_listings: settings.max_listings,
            concurrency: settings.fetch_concurrency,
            require_availability: settings.require_availability,
        }
    }
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Store page {url} is unreachable: {source}")]
    StorePageUnreachable {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Store page {url} returned HTTP {status}")]
    StorePageStatus { url: String, status: u16 },

    #[error("Store page could not be parsed: {0}")]
    StorePageParsing(#[from] ParsingError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    MissingTitle,
    MissingPrice,
    MissingImages,
    HasVariations,
    NotAvailable,
}

/// What happened to one listing link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingOutcome {
    Accepted,
    Rejected(RejectionReason),
    /// Already accepted by this or an earlier run
    Duplicate,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionStats {
    pub links_discovered: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub failed: usize,
    /// Links never dispatched because the run was cancelled
    pub cancelled: usize,
}

impl AcquisitionStats {
    pub fn record(&mut self, outcome: ListingOutcome) {
        match outcome {
            ListingOutcome::Accepted => self.accepted += 1,
            ListingOutcome::Rejected(_) => self.rejected += 1,
            ListingOutcome::Duplicate => self.duplicates += 1,
            ListingOutcome::Failed => self.failed += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.accepted + self.rejected + self.duplicates + self.failed
    }
}

/// Phase a result: accepted products in sequence order.
#[derive(Debug, Clone)]
pub struct Acquisition {
    pub run_id: Uuid,
    pub products: Vec<Product>,
    pub stats: AcquisitionStats,
}

/// Everything one listing task needs; shared by all tasks of a run.
struct ListingProcessor {
    fetcher: Arc<dyn DocumentFetcher>,
    parser: ListingParser,
    pricing: PriceTransformer,
    dedup: DedupStore,
    require_availability: bool,
}

impl ListingProcessor {
    async fn process(&self, context: &RunContext, link_index: usize, url: &str) -> ListingOutcome {
        let document = match self.fetcher.fetch(url).await {
            Ok(document) => document,
            Err(FetchError::Cancelled { .. }) => {
                debug!("Listing fetch cancelled: {}", url);
                return ListingOutcome::Failed;
            }
            Err(e) => {
                warn!("Request error for {}: {}", url, e);
                return ListingOutcome::Failed;
            }
        };
        if !document.is_success() {
            warn!("HTTP error {} for listing {}", document.status, url);
            return ListingOutcome::Failed;
        }

        let listing = self.parser.parse(&document.text());
        let (title, price, images) = match self.classify(listing) {
            Ok(fields) => fields,
            Err(reason) => {
                info!("Listing rejected ({:?}): {}", reason, url);
                return ListingOutcome::Rejected(reason);
            }
        };

        match self.dedup.exists(url, &title).await {
            Ok(true) => {
                debug!("Already listed in a previous run: {}", url);
                return ListingOutcome::Duplicate;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("Dedup lookup failed for {}: {}", url, e);
                return ListingOutcome::Failed;
            }
        }

        match self.dedup.record(url, &title).await {
            Ok(RecordOutcome::Inserted) => {}
            Ok(RecordOutcome::Conflict) => return ListingOutcome::Duplicate,
            Err(e) => {
                warn!("Failed to record {}: {}", url, e);
                return ListingOutcome::Failed;
            }
        }

        let accepted = context.accept(AcceptedListing {
            link_index,
            url: url.to_string(),
            title: title.clone(),
            price,
            images,
        });
        info!("✅ Scraped ({}): {} at {}", accepted, title, price);
        ListingOutcome::Accepted
    }

    /// Apply the rejection policy and price the listing.
    fn classify(&self, listing: ParsedListing) -> Result<(String, f64, Vec<String>), RejectionReason> {
        if listing.has_variations {
            return Err(RejectionReason::HasVariations);
        }
        let title = listing.title.ok_or(RejectionReason::MissingTitle)?;
        let raw_price = listing.raw_price.ok_or(RejectionReason::MissingPrice)?;
        if listing.images.is_empty() {
            return Err(RejectionReason::MissingImages);
        }
        if !listing.available {
            if self.require_availability {
                return Err(RejectionReason::NotAvailable);
            }
            debug!("Listing '{}' is not marked well stocked", title);
        }

        let price = self.pricing.transform(raw_price);
        // A zero or negative price is treated as absent
        if price <= 0.0 || !price.is_finite() {
            return Err(RejectionReason::MissingPrice);
        }
        Ok((title, price, listing.images))
    }
}

/// Main orchestrator for phase a (listing acquisition)
pub struct AcquisitionOrchestrator {
    processor: Arc<ListingProcessor>,
    store_parser: StorePageParser,
    config: OrchestratorConfig,
    cancellation: CancellationToken,
}

impl AcquisitionOrchestrator {
    pub fn new(
        fetcher: Arc<dyn DocumentFetcher>,
        listing_parser: ListingParser,
        store_parser: StorePageParser,
        pricing: PriceTransformer,
        dedup: DedupStore,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            processor: Arc::new(ListingProcessor {
                fetcher,
                parser: listing_parser,
                pricing,
                dedup,
                require_availability: config.require_availability,
            }),
            store_parser,
            config,
            cancellation: CancellationToken::new(),
        }
    }

    /// Stop dispatching new listing tasks when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Fetch the store page and return its listing links.
    pub async fn discover_links(&self, store_url: &str) -> Result<Vec<String>, OrchestratorError> {
        let document = self
            .processor
            .fetcher
            .fetch(store_url)
            .await
            .map_err(|source| OrchestratorError::StorePageUnreachable {
                url: store_url.to_string(),
                source,
            })?;
        if !document.is_success() {
            return Err(OrchestratorError::StorePageStatus {
                url: store_url.to_string(),
                status: document.status,
            });
        }

        Ok(self
            .store_parser
            .extract_links(&document.text(), store_url, self.config.max_listings)?)
    }

    /// Run phase a against `store_url` and wait for every dispatched task.
    pub async fn run(&self, store_url: &str) -> Result<Acquisition, OrchestratorError> {
        let started = Instant::now();
        let links = self.discover_links(store_url).await?;
        info!("🔍 Found {} listing links on {}", links.len(), store_url);

        let context = Arc::new(RunContext::new());
        let run_id = context.run_id();
        let mut stats = AcquisitionStats {
            links_discovered: links.len(),
            ..AcquisitionStats::default()
        };

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (link_index, url) in links.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                () = self.cancellation.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                stats.cancelled = stats.links_discovered - link_index;
                warn!("🛑 Cancelled; {} listing links not dispatched", stats.cancelled);
                break;
            };

            let processor = self.processor.clone();
            let context = context.clone();
            tasks.spawn(async move {
                let _permit = permit;
                processor.process(&context, link_index, &url).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => stats.record(outcome),
                Err(e) => {
                    warn!("Listing task panicked or was aborted: {}", e);
                    stats.failed += 1;
                }
            }
        }

        let products = context.finalize();

        info!(
            "📊 Acquisition finished in {:?}: {} links, {} accepted, {} rejected, {} duplicates, {} failed, {} cancelled",
            started.elapsed(),
            stats.links_discovered,
            stats.accepted,
            stats.rejected,
            stats.duplicates,
            stats.failed,
            stats.cancelled
        );

        Ok(Acquisition {
            run_id,
            products,
            stats,
        })
    }
}
