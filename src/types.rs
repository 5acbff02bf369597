use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Search query
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    pub item: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub min_price: String,
}

impl SearchQuery {
    /// Item, brand, model and notes joined by single spaces, blanks skipped.
    /// This is the keyword string handed to collectors and scorers.
    pub fn search_text(&self) -> String {
        [&self.item, &self.brand, &self.model, &self.notes]
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Map a human condition label to the marketplace's layered condition code.
/// Numeric input passes through; unknown labels fall back to "brand new".
pub fn condition_code(condition: &str) -> u8 {
    let c = condition.trim();
    if let Ok(n) = c.parse::<u8>() {
        return n;
    }
    match c.to_lowercase().as_str() {
        "brand new" | "new" => 3,
        "like new" => 4,
        "well used" => 5,
        "heavily used" => 6,
        "lightly used" | "used" => 7,
        _ => 3,
    }
}

// ---------------------------------------------------------------------------
// Run options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortVariant {
    BestMatch,
    Recent,
    PriceLowToHigh,
    PriceHighToLow,
    Nearby,
}

impl SortVariant {
    /// Marketplace `sort_by` code passed to the collector.
    pub fn code(self) -> u8 {
        match self {
            SortVariant::BestMatch => 1,
            SortVariant::Recent => 3,
            SortVariant::PriceLowToHigh => 4,
            SortVariant::PriceHighToLow => 5,
            SortVariant::Nearby => 6,
        }
    }
}

impl std::fmt::Display for SortVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SortVariant::BestMatch => "best_match",
            SortVariant::Recent => "recent",
            SortVariant::PriceLowToHigh => "price_low_to_high",
            SortVariant::PriceHighToLow => "price_high_to_low",
            SortVariant::Nearby => "nearby",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedMode {
    UltraFast,
    Fast,
    Normal,
}

impl SpeedMode {
    /// Number of sort variants collected in this mode.
    pub fn variant_count(self) -> usize {
        match self {
            SpeedMode::UltraFast => 1,
            SpeedMode::Fast => 2,
            SpeedMode::Normal => 5,
        }
    }
}

impl std::str::FromStr for SpeedMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "ultra_fast" => Ok(SpeedMode::UltraFast),
            "fast" => Ok(SpeedMode::Fast),
            "normal" => Ok(SpeedMode::Normal),
            other => Err(format!(
                "Unknown speed_mode: {other}. Expected ultra_fast, fast or normal"
            )),
        }
    }
}

impl std::fmt::Display for SpeedMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpeedMode::UltraFast => write!(f, "ultra_fast"),
            SpeedMode::Fast => write!(f, "fast"),
            SpeedMode::Normal => write!(f, "normal"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightingMethod {
    Heuristic,
    #[default]
    Ai,
}

impl std::str::FromStr for WeightingMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "heuristic" => Ok(WeightingMethod::Heuristic),
            "ai" => Ok(WeightingMethod::Ai),
            other => Err(format!(
                "Unknown weighting_method: {other}. Expected heuristic or ai"
            )),
        }
    }
}

impl std::fmt::Display for WeightingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WeightingMethod::Heuristic => write!(f, "heuristic"),
            WeightingMethod::Ai => write!(f, "ai"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictorVariant {
    #[default]
    Simple,
    Advanced,
}

impl std::str::FromStr for PredictorVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simple" => Ok(PredictorVariant::Simple),
            "advanced" => Ok(PredictorVariant::Advanced),
            other => Err(format!(
                "Unknown predictor_variant: {other}. Expected simple or advanced"
            )),
        }
    }
}

impl std::fmt::Display for PredictorVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PredictorVariant::Simple => write!(f, "simple"),
            PredictorVariant::Advanced => write!(f, "advanced"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub target_days: u32,
    pub speed_mode: SpeedMode,
    pub weighting_method: WeightingMethod,
    pub predictor_variant: PredictorVariant,
}

// ---------------------------------------------------------------------------
// Listings and datasets
// ---------------------------------------------------------------------------

/// One collected item-for-sale record. Never mutated after normalisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    /// Canonical URL, or a `date|title|price` key when the row had no link.
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub price: Option<f64>,
    pub currency: String,
    pub listed_on: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub sort_variant: SortVariant,
}

impl Listing {
    /// Whole days between the listing date and `today`, if the date is known.
    pub fn age_days(&self, today: NaiveDate) -> Option<i64> {
        self.listed_on.map(|d| (today - d).num_days())
    }

    /// Title and description, as scored against the query.
    pub fn text(&self) -> String {
        match &self.description {
            Some(d) if !d.trim().is_empty() => format!("{} {}", self.title, d),
            _ => self.title.clone(),
        }
    }
}

/// Output of one collector call.
#[derive(Debug, Clone, Default)]
pub struct RawDataset {
    pub query_url: String,
    pub listings: Vec<Listing>,
}

/// Union of raw datasets; no two listings share an id, first-seen order kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedDataset {
    pub listings: Vec<Listing>,
}

impl MergedDataset {
    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedListing {
    #[serde(flatten)]
    pub listing: Listing,
    /// Relevance to the query, in [0, 1].
    pub relevance_weight: f64,
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Starting,
    Scraping,
    Merging,
    Weighting,
    Predicting,
    Succeeded,
    Failed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Starting => "starting",
            Stage::Scraping => "scraping",
            Stage::Merging => "merging",
            Stage::Weighting => "weighting",
            Stage::Predicting => "predicting",
            Stage::Succeeded => "succeeded",
            Stage::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Progress record for one live run. Replaced wholesale on every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub stage: Stage,
    pub step: usize,
    pub total: usize,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// What a progress poll sees. A missing record reads as `Completed`, whether the
/// run finished or never existed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Progress {
    Live(RunSnapshot),
    Completed { stage: &'static str },
}

impl Progress {
    pub fn completed() -> Self {
        Progress::Completed { stage: "completed" }
    }
}

// ---------------------------------------------------------------------------
// Prediction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub weighted_mean: f64,
    pub weighted_median: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeStats {
    pub min_days: i64,
    pub max_days: i64,
    pub avg_days: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predicted_price: f64,
    pub target_days: u32,
    /// Listings that survived filtering and fed the fit.
    pub data_points: usize,
    pub model_accuracy_mae: f64,
    pub price_stats: PriceStats,
    pub time_stats: TimeStats,
    pub avg_relevance: f64,
    /// 0..1, from sample size and relative price spread.
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    pub variant: PredictorVariant,
    /// False whenever `data_points == 0`; such a result is not a usable price.
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl PredictionResult {
    /// The "nothing to fit" outcome. A normal return, not an error.
    pub fn no_data(target_days: u32, variant: PredictorVariant, note: &str) -> Self {
        Self {
            predicted_price: 0.0,
            target_days,
            data_points: 0,
            model_accuracy_mae: 0.0,
            price_stats: PriceStats::default(),
            time_stats: TimeStats::default(),
            avg_relevance: 0.0,
            confidence: 0.0,
            recommendation: None,
            variant,
            valid: false,
            note: Some(note.to_string()),
        }
    }
}
