use std::path::PathBuf;

use crate::error::{AppError, Result};
use crate::types::SortVariant;

pub const SCORER_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const SCORER_MODEL: &str = "gemini-2.5-flash";

/// Ranking variants in the order the speed policy consumes them.
/// `ultra_fast` takes the first one, `fast` the first two, `normal` all five.
pub const SORT_VARIANTS: [SortVariant; 5] = [
    SortVariant::Recent,
    SortVariant::BestMatch,
    SortVariant::PriceLowToHigh,
    SortVariant::PriceHighToLow,
    SortVariant::Nearby,
];

/// Listings scored per request to the relevance-scoring service.
pub const DEFAULT_BATCH_SIZE: usize = 30;

/// Attempts per scoring batch before the batch falls back to `AI_SCORE_FLOOR`.
pub const AI_ATTEMPTS_PER_BATCH: u32 = 3;

/// The scoring service is told never to answer 0.0; anything lower is lifted to this.
pub const AI_SCORE_FLOOR: f64 = 0.01;

/// Wall-clock limit for merge, heuristic weighting and prediction (seconds).
pub const STAGE_TIMEOUT_SECS: u64 = 120;

/// Diagnostic text attached to an unhandled run failure is cut to this many chars.
pub const UNHANDLED_CONTEXT_CHARS: usize = 300;

/// Heuristic weighting thresholds.
pub mod heuristic {
    /// |z| above this marks a price outlier.
    pub const OUTLIER_Z: f64 = 2.0;
    /// Outlier scores are multiplied by this.
    pub const OUTLIER_PENALTY: f64 = 0.1;
    /// Subtracted from the keyword score for every title word not in the query.
    pub const EXTRA_WORD_PENALTY: f64 = 0.5;
    /// Score given when the query has no meaningful words left.
    pub const NEUTRAL_SCORE: f64 = 0.5;
    /// Outlier detection needs at least this many parseable prices.
    pub const MIN_PRICES_FOR_OUTLIERS: usize = 3;
}

/// Horizon discounts used when a trend cannot be fitted.
pub mod horizon_discount {
    pub const QUICK_DAYS: u32 = 15;
    pub const QUICK: f64 = 0.90;
    pub const MEDIUM_DAYS: u32 = 30;
    pub const MEDIUM: f64 = 0.95;
    pub const PATIENT: f64 = 0.98;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub api_port: u16,
    /// Root of the transient `raw/` and `processed/` areas (DATA_DIR)
    pub data_dir: PathBuf,
    /// Program followed by fixed arguments (COLLECTOR_CMD, whitespace separated)
    pub collector_cmd: Vec<String>,
    pub collector_headless: bool,
    /// Scoring credential (GOOGLE_API_KEY). `None` disables AI-assisted weighting.
    pub scorer_api_key: Option<String>,
    pub scorer_api_url: String,
    pub scorer_model: String,
    pub scorer_batch_size: usize,
    pub stage_timeout_secs: u64,
    /// Currency assumed when a price string carries no marker (DEFAULT_CURRENCY)
    pub default_currency: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let collector_cmd: Vec<String> = std::env::var("COLLECTOR_CMD")
            .unwrap_or_else(|_| "python3 scrape_cli.py".to_string())
            .split_whitespace()
            .map(|s| s.to_string())
            .collect();
        if collector_cmd.is_empty() {
            return Err(AppError::Config("COLLECTOR_CMD must not be empty".to_string()));
        }

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            data_dir: PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| ".".to_string())),
            collector_cmd,
            collector_headless: std::env::var("COLLECTOR_HEADLESS")
                .map(|v| !matches!(v.trim().to_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(true),
            scorer_api_key: std::env::var("GOOGLE_API_KEY")
                .ok()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            scorer_api_url: std::env::var("SCORER_API_URL")
                .unwrap_or_else(|_| SCORER_API_URL.to_string()),
            scorer_model: std::env::var("SCORER_MODEL").unwrap_or_else(|_| SCORER_MODEL.to_string()),
            scorer_batch_size: std::env::var("SCORER_BATCH_SIZE")
                .unwrap_or_else(|_| DEFAULT_BATCH_SIZE.to_string())
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_BATCH_SIZE),
            stage_timeout_secs: std::env::var("STAGE_TIMEOUT_SECS")
                .unwrap_or_else(|_| STAGE_TIMEOUT_SECS.to_string())
                .parse::<u64>()
                .unwrap_or(STAGE_TIMEOUT_SECS),
            default_currency: std::env::var("DEFAULT_CURRENCY").unwrap_or_else(|_| "SGD".to_string()),
        })
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.data_dir.join("raw")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.data_dir.join("processed")
    }
}
