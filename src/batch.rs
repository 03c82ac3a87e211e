//! Assembles one dataset from several capped, concurrent page requests.

use async_trait::async_trait;
use futures::future::try_join_all;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::MetricRecord;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} responded with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("{url} returned an unexpected payload: {reason}")]
    Payload { url: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("batch size must be greater than zero")]
    ZeroBatchSize,
    #[error("count query failed: {0}")]
    Count(#[source] FetchError),
    #[error("batch at offset {offset} failed: {source}")]
    Batch {
        offset: usize,
        #[source]
        source: FetchError,
    },
}

/// A paginated upstream listing with a sibling count query.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn count(&self) -> Result<usize, FetchError>;

    async fn page(&self, offset: usize, limit: usize) -> Result<Vec<MetricRecord>, FetchError>;
}

/// Offsets for one fetch session; rebuilt whenever the total changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    pub total_count: usize,
    pub batch_size: usize,
    pub offsets: Vec<usize>,
}

impl BatchPlan {
    pub fn new(total_count: usize, batch_size: usize) -> Result<Self, ReconcileError> {
        if batch_size == 0 {
            return Err(ReconcileError::ZeroBatchSize);
        }
        let batches = total_count.div_ceil(batch_size);
        let offsets = (0..batches).map(|i| i * batch_size).collect();
        Ok(Self {
            total_count,
            batch_size,
            offsets,
        })
    }

    /// Rows requested at `offset`: a full batch, or the remainder for the last one.
    pub fn limit_at(&self, offset: usize) -> usize {
        self.batch_size.min(self.total_count.saturating_sub(offset))
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Issues every batch of `plan` concurrently and concatenates the results in
/// offset order. Any failed batch fails the whole reconciliation; there is no
/// retry and no partial result.
pub async fn reconcile<S>(source: &S, plan: &BatchPlan) -> Result<Vec<MetricRecord>, ReconcileError>
where
    S: PageSource + ?Sized,
{
    if plan.is_empty() {
        debug!("nothing to fetch");
        return Ok(Vec::new());
    }

    info!(
        total = plan.total_count,
        batch_size = plan.batch_size,
        batches = plan.len(),
        "fetching batches"
    );

    let requests = plan.offsets.iter().map(|&offset| async move {
        source
            .page(offset, plan.limit_at(offset))
            .await
            .map_err(|err| ReconcileError::Batch {
                offset,
                source: err,
            })
    });

    // try_join_all yields results in input order, not completion order
    let batches = try_join_all(requests).await?;
    let records: Vec<MetricRecord> = batches.into_iter().flatten().collect();

    if records.len() != plan.total_count {
        debug!(
            expected = plan.total_count,
            received = records.len(),
            "upstream changed between count and fetch"
        );
    }
    Ok(records)
}

/// Count query followed by a batched fetch. The count is not re-checked
/// afterwards, so the result is a best-effort snapshot.
pub async fn fetch_all<S>(source: &S, batch_size: usize) -> Result<Vec<MetricRecord>, ReconcileError>
where
    S: PageSource + ?Sized,
{
    if batch_size == 0 {
        return Err(ReconcileError::ZeroBatchSize);
    }
    let total = source.count().await.map_err(ReconcileError::Count)?;
    let plan = BatchPlan::new(total, batch_size)?;
    reconcile(source, &plan).await
}
