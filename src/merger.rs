use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::dataset::{slugify, timestamped_path, write_json};
use crate::error::StageError;
use crate::types::{MergedDataset, RawDataset};

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub merged: MergedDataset,
    /// Combined file written into the output directory.
    pub reference: PathBuf,
    pub count: usize,
}

#[async_trait]
pub trait Merger: Send + Sync {
    async fn merge(
        &self,
        output_dir: &Path,
        label: &str,
        datasets: &[RawDataset],
    ) -> Result<MergeOutcome, StageError>;
}

/// Union of `datasets` keyed by listing id. The first occurrence wins and
/// later duplicates are dropped; surviving order is first-seen order.
pub fn merge_listings<'a, I>(datasets: I) -> MergedDataset
where
    I: IntoIterator<Item = &'a RawDataset>,
{
    let mut seen = HashSet::new();
    let mut listings = Vec::new();
    for ds in datasets {
        for l in &ds.listings {
            if seen.insert(l.id.as_str()) {
                listings.push(l.clone());
            }
        }
    }
    MergedDataset { listings }
}

/// Merges in process and keeps a combined JSON copy in the run's directory.
#[derive(Debug, Default)]
pub struct DatasetMerger;

#[async_trait]
impl Merger for DatasetMerger {
    async fn merge(
        &self,
        output_dir: &Path,
        label: &str,
        datasets: &[RawDataset],
    ) -> Result<MergeOutcome, StageError> {
        let input_rows: usize = datasets.iter().map(|d| d.listings.len()).sum();
        let merged = merge_listings(datasets);

        let reference = timestamped_path(output_dir, &format!("Combined_{}", slugify(label)));
        write_json(&reference, &merged.listings).await?;

        debug!(
            inputs = datasets.len(),
            input_rows,
            duplicates = input_rows - merged.len(),
            "datasets merged"
        );
        info!(count = merged.len(), path = %reference.display(), "combined dataset written");

        Ok(MergeOutcome {
            count: merged.len(),
            merged,
            reference,
        })
    }
}
