//! Bounded Concurrent Copier
//!
//! Pages through a source table in a stable `(sort key, _id)` order and
//! hands every record to a delivery function running on a fixed number of
//! workers. The first delivery error stops further dispatch; workers already
//! running are drained before the error is returned.

use cmdb_store::{Datastore, Document, FindQuery, PageCursor};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::{UpgradeError, UpgradeResult};

/// Source side of a copy
#[derive(Debug, Clone)]
pub struct SourceQuery {
    /// Table to read
    pub table: String,
    /// Equality filter
    pub filter: Document,
    /// Field giving the page order; `_id` breaks ties
    pub sort_key: String,
    /// Records per page
    pub page_size: usize,
}

impl SourceQuery {
    pub fn new(table: impl Into<String>, sort_key: impl Into<String>, page_size: usize) -> Self {
        Self {
            table: table.into(),
            filter: Document::new(),
            sort_key: sort_key.into(),
            page_size,
        }
    }

    pub fn with_filter(mut self, filter: Document) -> Self {
        self.filter = filter;
        self
    }
}

/// Copy statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CopyStats {
    /// Pages read
    pub pages: u64,
    /// Records read from the source
    pub read: u64,
    /// Records delivered without error
    pub delivered: u64,
}

impl CopyStats {
    /// Accumulate another run's counts
    pub fn add(&mut self, other: &CopyStats) {
        self.pages += other.pages;
        self.read += other.read;
        self.delivered += other.delivered;
    }
}

/// Copies records with at most `workers` deliveries in flight
pub struct BoundedCopier {
    store: Arc<dyn Datastore>,
    workers: usize,
}

impl BoundedCopier {
    pub fn new(store: Arc<dyn Datastore>, workers: usize) -> Self {
        Self {
            store,
            workers: workers.max(1),
        }
    }

    /// Run `deliver` once per source record.
    ///
    /// Delivery order is unspecified. On error the destination may be
    /// partially written; callers rerun the whole copy, so `deliver` must be
    /// idempotent.
    pub async fn copy<F, Fut>(&self, source: &SourceQuery, deliver: F) -> UpgradeResult<CopyStats>
    where
        F: Fn(Document) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = UpgradeResult<()>> + Send + 'static,
    {
        let page_size = source.page_size.max(1);
        let permits = Arc::new(Semaphore::new(self.workers));
        let error_slot: Arc<Mutex<Option<UpgradeError>>> = Arc::new(Mutex::new(None));
        let delivered = Arc::new(AtomicU64::new(0));
        let deliver = Arc::new(deliver);

        let mut stats = CopyStats::default();
        let mut cursor: Option<PageCursor> = None;

        loop {
            let query = FindQuery::new(source.filter.clone())
                .sort_by(&source.sort_key)
                .after(cursor.take())
                .limit(page_size);

            let page = match self.store.find(&source.table, &query).await {
                Ok(page) => page,
                Err(e) => {
                    error!(table = %source.table, error = %e, "Failed to read source page");
                    set_first(&error_slot, e.into()).await;
                    break;
                }
            };

            stats.pages += 1;
            stats.read += page.len() as u64;
            let last_page = page.len() < page_size;
            cursor = page.last().map(|d| PageCursor::from_document(d, &source.sort_key));
            debug!(table = %source.table, page = stats.pages, records = page.len(), "Dispatching page");

            let mut tasks = JoinSet::new();
            for record in page {
                let permit = match permits.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        set_first(&error_slot, UpgradeError::WorkerPanicked(e.to_string())).await;
                        break;
                    }
                };
                if error_slot.lock().await.is_some() {
                    break;
                }

                let deliver = deliver.clone();
                let slot = error_slot.clone();
                let delivered = delivered.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    match deliver(record).await {
                        Ok(()) => {
                            delivered.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => set_first(&slot, e).await,
                    }
                });
            }

            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(table = %source.table, error = %e, "Copy worker failed");
                    set_first(&error_slot, UpgradeError::WorkerPanicked(e.to_string())).await;
                }
            }

            if last_page || error_slot.lock().await.is_some() {
                break;
            }
        }

        stats.delivered = delivered.load(Ordering::Relaxed);

        if let Some(e) = error_slot.lock().await.take() {
            error!(
                table = %source.table,
                read = stats.read,
                delivered = stats.delivered,
                error = %e,
                "Copy aborted"
            );
            return Err(e);
        }

        info!(
            table = %source.table,
            pages = stats.pages,
            read = stats.read,
            delivered = stats.delivered,
            "Copy finished"
        );
        Ok(stats)
    }
}

async fn set_first(slot: &Mutex<Option<UpgradeError>>, error: UpgradeError) {
    let mut slot = slot.lock().await;
    if slot.is_none() {
        *slot = Some(error);
    }
}
