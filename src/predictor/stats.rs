use std::cmp::Ordering;

use chrono::NaiveDate;

use crate::config::horizon_discount;
use crate::types::{PredictionResult, PredictorVariant, PriceStats, TimeStats, WeightedListing};

/// A listing reduced to what the fits need.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub price: f64,
    pub age_days: f64,
    pub weight: f64,
}

/// Keep listings with a positive price, a known non-negative age and a
/// positive weight. Input order is preserved.
pub fn usable_points(listings: &[WeightedListing], today: NaiveDate) -> Vec<Point> {
    listings
        .iter()
        .filter_map(|w| {
            let price = w.listing.price.filter(|p| p.is_finite() && *p > 0.0)?;
            let age = w.listing.age_days(today).filter(|a| *a >= 0)?;
            (w.relevance_weight > 0.0).then_some(Point {
                price,
                age_days: age as f64,
                weight: w.relevance_weight,
            })
        })
        .collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = v.len() / 2;
    if v.len() % 2 == 0 {
        (v[mid - 1] + v[mid]) / 2.0
    } else {
        v[mid]
    }
}

pub fn weighted_mean(points: &[Point]) -> f64 {
    let sw: f64 = points.iter().map(|p| p.weight).sum();
    if sw <= 0.0 {
        return mean(&points.iter().map(|p| p.price).collect::<Vec<_>>());
    }
    points.iter().map(|p| p.weight * p.price).sum::<f64>() / sw
}

/// Lowest price at which the cumulative weight reaches half the total.
pub fn weighted_median(points: &[Point]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(Ordering::Equal));
    let half = sorted.iter().map(|p| p.weight).sum::<f64>() / 2.0;
    let mut acc = 0.0;
    for p in &sorted {
        acc += p.weight;
        if acc >= half {
            return p.price;
        }
    }
    sorted[sorted.len() - 1].price
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Multiplier applied to a central price when no trend is available; the
/// shorter the horizon, the bigger the cut.
pub fn horizon_discount(target_days: u32) -> f64 {
    if target_days <= horizon_discount::QUICK_DAYS {
        horizon_discount::QUICK
    } else if target_days <= horizon_discount::MEDIUM_DAYS {
        horizon_discount::MEDIUM
    } else {
        horizon_discount::PATIENT
    }
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Confidence from sample size, reduced when prices spread widely around
/// their mean. Never below half the size-based level.
pub fn confidence(count: usize, min: f64, max: f64, mean: f64) -> f64 {
    let base = match count {
        n if n >= 10 => 0.9,
        n if n >= 5 => 0.8,
        n if n >= 3 => 0.7,
        _ => 0.6,
    };
    let spread = if mean > 0.0 { (max - min) / mean } else { 1.0 };
    base * (1.0 - spread * 0.3).max(0.5)
}

/// Assemble a valid result for a fit over `points`. `points` must not be empty.
pub fn build_result(
    variant: PredictorVariant,
    target_days: u32,
    points: &[Point],
    predicted: f64,
    mae: f64,
    note: Option<String>,
) -> PredictionResult {
    let prices: Vec<f64> = points.iter().map(|p| p.price).collect();
    let ages: Vec<f64> = points.iter().map(|p| p.age_days).collect();
    let weights: Vec<f64> = points.iter().map(|p| p.weight).collect();

    let price_stats = PriceStats {
        min: round2(prices.iter().copied().fold(f64::INFINITY, f64::min)),
        max: round2(prices.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        mean: round2(mean(&prices)),
        median: round2(median(&prices)),
        weighted_mean: round2(weighted_mean(points)),
        weighted_median: round2(weighted_median(points)),
    };
    let time_stats = TimeStats {
        min_days: ages.iter().copied().fold(f64::INFINITY, f64::min) as i64,
        max_days: ages.iter().copied().fold(f64::NEG_INFINITY, f64::max) as i64,
        avg_days: round2(mean(&ages)),
    };

    let predicted_price = round2(predicted.max(0.0));
    let confidence = round3(confidence(
        points.len(),
        price_stats.min,
        price_stats.max,
        price_stats.mean,
    ));

    PredictionResult {
        predicted_price,
        target_days,
        data_points: points.len(),
        model_accuracy_mae: round2(mae),
        price_stats,
        time_stats,
        avg_relevance: round3(mean(&weights)),
        confidence,
        recommendation: Some(format!("Price at ${predicted_price:.0} for {target_days}-day sale")),
        variant,
        valid: true,
        note,
    }
}
