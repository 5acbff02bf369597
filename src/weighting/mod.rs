pub mod gemini;
pub mod heuristic;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::dataset::{timestamped_path, write_json};
use crate::error::StageError;
use crate::types::{Listing, MergedDataset, WeightedListing};

pub use gemini::GeminiScorer;
pub use heuristic::HeuristicScorer;

/// A relevance-scoring strategy. Returns one score per listing, in order.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn score(&self, query_text: &str, listings: &[Listing]) -> Result<Vec<f64>, StageError>;
}

#[derive(Debug, Clone)]
pub struct WeightOutcome {
    pub weighted: Vec<WeightedListing>,
    /// `<timestamp>_Weighted.json` in the output directory.
    pub reference: PathBuf,
}

/// Score every listing of `merged` and attach the result as
/// `relevance_weight`. Listings are moved through untouched; only the weight
/// is added. Scores outside [0, 1] are clamped and NaN becomes 0.
pub async fn weigh(
    scorer: &dyn RelevanceScorer,
    query_text: &str,
    merged: MergedDataset,
    output_dir: &Path,
) -> Result<WeightOutcome, StageError> {
    let scores = scorer.score(query_text, &merged.listings).await?;
    if scores.len() != merged.len() {
        return Err(StageError::Scoring(format!(
            "{} returned {} scores for {} listings",
            scorer.name(),
            scores.len(),
            merged.len()
        )));
    }

    let weighted: Vec<WeightedListing> = merged
        .listings
        .into_iter()
        .zip(scores)
        .map(|(listing, s)| WeightedListing {
            listing,
            relevance_weight: clamp_unit(s),
        })
        .collect();

    let reference = timestamped_path(output_dir, "Weighted");
    write_json(&reference, &weighted).await?;

    let avg = if weighted.is_empty() {
        0.0
    } else {
        weighted.iter().map(|w| w.relevance_weight).sum::<f64>() / weighted.len() as f64
    };
    info!(
        scorer = scorer.name(),
        count = weighted.len(),
        avg_weight = format!("{avg:.3}"),
        "listings weighted"
    );

    Ok(WeightOutcome { weighted, reference })
}

pub(crate) fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}
