pub mod advanced;
pub mod simple;
pub mod stats;

use chrono::NaiveDate;

use crate::types::{PredictionResult, PredictorVariant, WeightedListing};

pub use advanced::AdvancedPredictor;
pub use simple::SimplePredictor;

pub(crate) const NO_USABLE_LISTINGS: &str =
    "no listing had a positive price, a known listing date and a positive relevance weight";

/// A price-prediction algorithm. Pure and CPU-bound; the orchestrator runs it
/// on the blocking pool. Zero usable listings is a normal outcome and yields
/// a result with `data_points == 0`.
pub trait PricePredictor: Send + Sync {
    fn variant(&self) -> PredictorVariant;

    fn predict(
        &self,
        listings: &[WeightedListing],
        target_days: u32,
        today: NaiveDate,
    ) -> PredictionResult;
}
