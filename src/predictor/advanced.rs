use std::cmp::Ordering;

use chrono::NaiveDate;

use crate::predictor::stats::{build_result, mean, std_dev, usable_points, Point};
use crate::predictor::{PricePredictor, NO_USABLE_LISTINGS};
use crate::types::{PredictionResult, PredictorVariant, WeightedListing};

/// Listings needed before a local fit is attempted.
const MIN_FIT_POINTS: usize = 3;
/// Listings needed before accuracy is measured on a hold-out.
const MIN_HOLDOUT_POINTS: usize = 10;
/// Every n-th listing is held out.
const HOLDOUT_STRIDE: usize = 5;

/// Kernel-weighted local linear regression centred on the horizon. Listings
/// whose age is close to `target_days` dominate the fit, scaled further by
/// their relevance weight.
#[derive(Debug, Default)]
pub struct AdvancedPredictor;

/// Local linear estimate of the price at age `x`, or `None` if the points
/// give nothing to fit.
fn local_fit(points: &[Point], x: f64) -> Option<f64> {
    if points.is_empty() {
        return None;
    }
    let ages: Vec<f64> = points.iter().map(|p| p.age_days).collect();
    let h = std_dev(&ages).max(1.0);

    // Kernels are shifted by the nearest point's distance so a far horizon
    // does not underflow every weight to zero. The fit is scale invariant.
    let d_min = ages
        .iter()
        .map(|a| ((a - x) / h).powi(2))
        .min_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal))?;
    let k: Vec<f64> = points
        .iter()
        .map(|p| (-0.5 * (((p.age_days - x) / h).powi(2) - d_min)).exp() * p.weight)
        .collect();

    let sw: f64 = k.iter().sum();
    if sw.is_nan() || sw <= 0.0 {
        return None;
    }
    let x_bar = points.iter().zip(&k).map(|(p, w)| w * p.age_days).sum::<f64>() / sw;
    let y_bar = points.iter().zip(&k).map(|(p, w)| w * p.price).sum::<f64>() / sw;
    let sxx: f64 = points.iter().zip(&k).map(|(p, w)| w * (p.age_days - x_bar).powi(2)).sum();
    if sxx <= f64::EPSILON {
        return Some(y_bar);
    }
    let sxy: f64 = points
        .iter()
        .zip(&k)
        .map(|(p, w)| w * (p.age_days - x_bar) * (p.price - y_bar))
        .sum();
    let slope = sxy / sxx;
    Some(y_bar + slope * (x - x_bar))
}

fn clamp_to_range(points: &[Point], v: f64) -> f64 {
    let (lo, hi) = points.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
        (lo.min(p.price), hi.max(p.price))
    });
    v.clamp(lo, hi)
}

/// Mean absolute error on every `HOLDOUT_STRIDE`-th point after fitting the rest.
fn holdout_mae(points: &[Point]) -> f64 {
    let (test, train): (Vec<(usize, &Point)>, Vec<(usize, &Point)>) = points
        .iter()
        .enumerate()
        .partition(|(i, _)| i % HOLDOUT_STRIDE == HOLDOUT_STRIDE - 1);
    let train: Vec<Point> = train.into_iter().map(|(_, p)| *p).collect();

    let errors: Vec<f64> = test
        .iter()
        .filter_map(|(_, p)| {
            local_fit(&train, p.age_days).map(|est| (p.price - clamp_to_range(&train, est)).abs())
        })
        .collect();
    mean(&errors)
}

impl PricePredictor for AdvancedPredictor {
    fn variant(&self) -> PredictorVariant {
        PredictorVariant::Advanced
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

        if points.len() < MIN_FIT_POINTS {
            // first of the top-weighted listings
            let best = points.iter().fold(points[0], |best, p| {
                if p.weight > best.weight {
                    *p
                } else {
                    best
                }
            });
            return build_result(
                self.variant(),
                target_days,
                &points,
                best.price,
                0.0,
                Some("too few listings to fit; used the most relevant listing's price".to_string()),
            );
        }

        let Some(estimate) = local_fit(&points, target_days as f64) else {
            return PredictionResult::no_data(
                target_days,
                self.variant(),
                "local fit produced no estimate",
            );
        };
        let predicted = clamp_to_range(&points, estimate);

        let (mae, note) = if points.len() >= MIN_HOLDOUT_POINTS {
            (holdout_mae(&points), None)
        } else {
            (0.0, Some("too few listings to measure accuracy".to_string()))
        };

        build_result(self.variant(), target_days, &points, predicted, mae, note)
    }
}
