//! Per-product image download
//!
//! Each product gets its own task (bounded by a semaphore). Inside a task the
//! product's images are fetched one after another into
//! `<batch dir>/<sequence + 1>/<index>_<basename>`.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::batch::{BatchLayout, BatchPartitioner};
use crate::domain::product::Product;
use crate::infrastructure::http_client::DocumentFetcher;
use crate::infrastructure::record_exporter::ExportError;

/// Totals across all products of a download pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageDownloadSummary {
    pub downloaded: usize,
    pub failed: usize,
    /// Not attempted because the run was cancelled.
    pub skipped: usize,
}

impl ImageDownloadSummary {
    fn absorb(&mut self, other: ImageDownloadSummary) {
        self.downloaded += other.downloaded;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

pub struct ImageFetcher {
    fetcher: Arc<dyn DocumentFetcher>,
    layout: BatchLayout,
    partitioner: BatchPartitioner,
    concurrency: usize,
    cancellation: CancellationToken,
}

impl ImageFetcher {
    pub fn new(
        fetcher: Arc<dyn DocumentFetcher>,
        layout: BatchLayout,
        partitioner: BatchPartitioner,
        concurrency: usize,
    ) -> Self {
        Self {
            fetcher,
            layout,
            partitioner,
            concurrency: concurrency.max(1),
            cancellation: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Download images for every product and wait for all tasks to finish.
    pub async fn download_all(&self, products: &[Product]) -> ImageDownloadSummary {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut summary = ImageDownloadSummary::default();

        for product in products {
            let permit = tokio::select! {
                biased;
                () = self.cancellation.cancelled() => {
                    summary.skipped += product.image_count();
                    continue;
                }
                permit = semaphore.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else {
                summary.skipped += product.image_count();
                continue;
            };

            let batch = self.partitioner.assign(product.sequence());
            let product_dir = self.layout.product_dir(batch, product.sequence());
            let fetcher = self.fetcher.clone();
            let cancellation = self.cancellation.clone();
            let title = product.title().to_string();
            let images = product.images();

            tasks.spawn(async move {
                let _permit = permit;
                download_product_images(fetcher.as_ref(), &product_dir, &title, &images, &cancellation)
                    .await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(product_summary) => summary.absorb(product_summary),
                Err(e) => warn!("Image download task panicked or was aborted: {}", e),
            }
        }

        info!(
            "🖼️ Image download finished: {} downloaded, {} failed, {} skipped",
            summary.downloaded, summary.failed, summary.skipped
        );
        summary
    }
}

async fn download_product_images(
    fetcher: &dyn DocumentFetcher,
    product_dir: &Path,
    title: &str,
    images: &[String],
    cancellation: &CancellationToken,
) -> ImageDownloadSummary {
    let mut summary = ImageDownloadSummary::default();

    if let Err(e) = tokio::fs::create_dir_all(product_dir)
        .await
        .map_err(|e| ExportError::filesystem(product_dir, e))
    {
        warn!("Cannot create image folder for '{}': {}", title, e);
        summary.failed = images.len();
        return summary;
    }

    for (offset, url) in images.iter().enumerate() {
        if cancellation.is_cancelled() {
            summary.skipped += images.len() - offset;
            break;
        }

        let file_path = product_dir.join(image_file_name(offset + 1, url));
        match download_image(fetcher, url, &file_path).await {
            Ok(()) => {
                summary.downloaded += 1;
                debug!("Downloaded {} for product {}", file_path.display(), title);
            }
            Err(reason) => {
                summary.failed += 1;
                warn!("Error downloading image from {}: {}", url, reason);
            }
        }
    }

    summary
}

async fn download_image(fetcher: &dyn DocumentFetcher, url: &str, file_path: &Path) -> Result<(), String> {
    let document = fetcher.fetch(url).await.map_err(|e| e.to_string())?;
    if !document.is_success() {
        return Err(format!("HTTP {}", document.status));
    }
    tokio::fs::write(file_path, &document.body)
        .await
        .map_err(|e| ExportError::filesystem(file_path, e).to_string())
}

/// `<index>_<last path segment>`; the index keeps names unique per product.
pub fn image_file_name(index: usize, url: &str) -> String {
    let basename = Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .or_else(|| {
            url.split(['?', '#'])
                .next()
                .and_then(|path| path.rsplit('/').next())
                .map(str::to_string)
        })
        .unwrap_or_default();

    let sanitized: String = basename
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') { '_' } else { c })
        .collect();

    if sanitized.is_empty() {
        format!("{index}_image")
    } else {
        format!("{index}_{sanitized}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::batch::{DEFAULT_BATCH_PREFIX, DEFAULT_RECORD_PREFIX};
    use crate::infrastructure::http_client::{FetchError, FetchedDocument};
    use async_trait::async_trait;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Serves the url as the body; urls containing "broken" fail.
    struct EchoFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DocumentFetcher for EchoFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if url.contains("broken") {
                return Err(FetchError::Network {
                    url: url.to_string(),
                    message: "connection reset".to_string(),
                });
            }
            if url.contains("missing") {
                return Ok(FetchedDocument::new(url, 404, Vec::new()));
            }
            Ok(FetchedDocument::new(url, 200, url.as_bytes().to_vec()))
        }
    }

    fn product(sequence: usize, images: &[&str]) -> Product {
        Product::new(
            format!("https://shop/itm/{sequence}"),
            format!("Item {sequence}"),
            10.0,
            images.iter().map(|s| s.to_string()).collect(),
            sequence,
        )
        .unwrap()
    }

    fn fetcher_for(base: &Path, starting_batch: u32) -> (ImageFetcher, Arc<EchoFetcher>) {
        let echo = Arc::new(EchoFetcher {
            calls: AtomicUsize::new(0),
        });
        let fetcher = ImageFetcher::new(
            echo.clone(),
            BatchLayout::new(base, DEFAULT_BATCH_PREFIX, DEFAULT_RECORD_PREFIX),
            BatchPartitioner::new(starting_batch, 50),
            4,
        );
        (fetcher, echo)
    }

    #[rstest]
    #[case(1, "https://i.example.com/images/g/abc/s-l1600.jpg", "1_s-l1600.jpg")]
    #[case(2, "https://i.example.com/s-l500.webp?set_id=8", "2_s-l500.webp")]
    #[case(3, "https://i.example.com/", "3_image")]
    #[case(4, "relative/pic.png", "4_pic.png")]
    fn file_names_are_index_prefixed(#[case] index: usize, #[case] url: &str, #[case] expected: &str) {
        assert_eq!(image_file_name(index, url), expected);
    }

    #[tokio::test]
    async fn images_land_in_product_folders() {
        let dir = tempdir().unwrap();
        let (fetcher, _) = fetcher_for(dir.path(), 2);
        let products = vec![
            product(0, &["https://img/a/one.jpg", "https://img/a/two.jpg"]),
            product(51, &["https://img/b/three.jpg"]),
        ];

        let summary = fetcher.download_all(&products).await;

        assert_eq!(summary.downloaded, 3);
        assert_eq!(summary.failed, 0);
        let first = dir.path().join("Products Directory 2").join("1");
        assert_eq!(
            std::fs::read(first.join("1_one.jpg")).unwrap(),
            b"https://img/a/one.jpg"
        );
        assert!(first.join("2_two.jpg").exists());
        assert!(
            dir.path()
                .join("Products Directory 3")
                .join("52")
                .join("1_three.jpg")
                .exists()
        );
    }

    #[tokio::test]
    async fn failed_images_do_not_stop_the_rest() {
        let dir = tempdir().unwrap();
        let (fetcher, echo) = fetcher_for(dir.path(), 1);
        let products = vec![product(
            0,
            &[
                "https://img/broken/x.jpg",
                "https://img/missing/y.jpg",
                "https://img/ok/z.jpg",
            ],
        )];

        let summary = fetcher.download_all(&products).await;

        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 3);
        let folder = dir.path().join("Products Directory 1").join("1");
        assert!(folder.join("3_z.jpg").exists());
        assert!(!folder.join("2_y.jpg").exists());
    }

    #[tokio::test]
    async fn cancelled_run_downloads_nothing() {
        let dir = tempdir().unwrap();
        let token = CancellationToken::new();
        let (fetcher, echo) = fetcher_for(dir.path(), 1);
        let fetcher = fetcher.with_cancellation(token.clone());
        token.cancel();

        let summary = fetcher
            .download_all(&[product(0, &["https://img/a.jpg", "https://img/b.jpg"])])
            .await;

        assert_eq!(summary.downloaded, 0);
        assert_eq!(summary.skipped, 2);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 0);
    }
}
