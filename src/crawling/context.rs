//! Run-scoped accepted-listing collection
//!
//! Owned by a single acquisition run and dropped with it. Concurrent tasks
//! append in completion order; `finalize` sorts by link position and hands
//! out the immutable sequence numbers that batch assignment is derived from.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::product::Product;

/// A listing that passed every acceptance check and was recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedListing {
    /// Position of the link on the store page
    pub link_index: usize,
    pub url: String,
    pub title: String,
    pub price: f64,
    pub images: Vec<String>,
}

#[derive(Debug)]
pub struct RunContext {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    accepted: Mutex<Vec<AcceptedListing>>,
    accepted_count: AtomicUsize,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            accepted: Mutex::new(Vec::new()),
            accepted_count: AtomicUsize::new(0),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Append an accepted listing; returns how many have been accepted so far.
    pub fn accept(&self, listing: AcceptedListing) -> usize {
        self.accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listing);
        self.accepted_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted_count.load(Ordering::SeqCst)
    }

    /// Drain accepted listings, order them by link position and assign
    /// sequence numbers `0..n`. Call once every task has finished.
    pub fn finalize(&self) -> Vec<Product> {
        let mut listings = std::mem::take(
            &mut *self.accepted.lock().unwrap_or_else(PoisonError::into_inner),
        );
        listings.sort_by_key(|listing| listing.link_index);

        let mut products = Vec::with_capacity(listings.len());
        for listing in listings {
            let sequence = products.len();
            match Product::new(listing.url, listing.title, listing.price, listing.images, sequence) {
                Ok(product) => products.push(product),
                Err(e) => warn!("Dropping accepted listing at link {}: {}", listing.link_index, e),
            }
        }
        debug!(
            "Run {} (started {}) finalized with {} products",
            self.run_id,
            self.started_at.to_rfc3339(),
            products.len()
        );
        products
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
