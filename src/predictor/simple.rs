use chrono::NaiveDate;

use crate::predictor::stats::{build_result, horizon_discount, usable_points, weighted_mean, Point};
use crate::predictor::{PricePredictor, NO_USABLE_LISTINGS};
use crate::types::{PredictionResult, PredictorVariant, WeightedListing};

/// Relevance-weighted least-squares line of price against listing age,
/// read off at the target horizon and clamped to the observed price range.
#[derive(Debug, Default)]
pub struct SimplePredictor;

struct Line {
    intercept: f64,
    slope: f64,
}

impl Line {
    fn at(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// `None` when the ages carry no spread to fit a slope on.
fn fit_line(points: &[Point]) -> Option<Line> {
    if points.len() < 2 {
        return None;
    }
    let sw: f64 = points.iter().map(|p| p.weight).sum();
    let x_bar = points.iter().map(|p| p.weight * p.age_days).sum::<f64>() / sw;
    let y_bar = points.iter().map(|p| p.weight * p.price).sum::<f64>() / sw;
    let sxx: f64 = points.iter().map(|p| p.weight * (p.age_days - x_bar).powi(2)).sum();
    if sxx <= f64::EPSILON {
        return None;
    }
    let sxy: f64 = points
        .iter()
        .map(|p| p.weight * (p.age_days - x_bar) * (p.price - y_bar))
        .sum();
    let slope = sxy / sxx;
    Some(Line {
        intercept: y_bar - slope * x_bar,
        slope,
    })
}

fn weighted_mae(points: &[Point], predict: impl Fn(&Point) -> f64) -> f64 {
    let sw: f64 = points.iter().map(|p| p.weight).sum();
    points.iter().map(|p| p.weight * (p.price - predict(p)).abs()).sum::<f64>() / sw
}

impl PricePredictor for SimplePredictor {
    fn variant(&self) -> PredictorVariant {
        PredictorVariant::Simple
    }

    fn predict(
        &self,
        listings: &[WeightedListing],
        target_days: u32,
        today: NaiveDate,
    ) -> PredictionResult {
        let points = usable_points(listings, today);
        if points.is_empty() {
            return PredictionResult::no_data(target_days, self.variant(), NO_USABLE_LISTINGS);
        }

        match fit_line(&points) {
            Some(line) => {
                let (lo, hi) = points.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
                    (lo.min(p.price), hi.max(p.price))
                });
                let predicted = line.at(target_days as f64).clamp(lo, hi);
                let mae = weighted_mae(&points, |p| line.at(p.age_days));
                build_result(self.variant(), target_days, &points, predicted, mae, None)
            }
            None => {
                let center = weighted_mean(&points);
                let predicted = center * horizon_discount(target_days);
                let mae = weighted_mae(&points, |_| center);
                build_result(
                    self.variant(),
                    target_days,
                    &points,
                    predicted,
                    mae,
                    Some("no spread in listing age; weighted mean with horizon discount".to_string()),
                )
            }
        }
    }
}
