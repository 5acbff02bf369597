pub mod listing;
pub mod process;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::CollectorError;
use crate::types::{SearchQuery, SortVariant};

pub use process::ProcessCollector;

/// One listing search for one sort variant.
#[derive(Debug, Clone)]
pub struct CollectRequest {
    pub query: SearchQuery,
    pub sort_variant: SortVariant,
    /// Run-owned directory the collector may write into.
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CollectOutcome {
    pub query_url: String,
    pub screenshot: Option<PathBuf>,
    /// JSON array of raw rows, see [`listing::RawRow`].
    pub dataset: PathBuf,
}

/// The listing search capability. Implementations may drive a browser, call
/// an HTTP API or replay fixtures; the orchestrator only sees this contract.
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;

    async fn collect(&self, req: &CollectRequest) -> Result<CollectOutcome, CollectorError>;
}
