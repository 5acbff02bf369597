use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::config::heuristic::{
    EXTRA_WORD_PENALTY, MIN_PRICES_FOR_OUTLIERS, NEUTRAL_SCORE, OUTLIER_PENALTY, OUTLIER_Z,
};
use crate::error::StageError;
use crate::types::Listing;
use crate::weighting::{clamp_unit, RelevanceScorer};

/// Words that say nothing about what the item is.
const IGNORE_WORDS: &[&str] = &[
    // condition and quality
    "new", "good", "brand", "well", "used", "condition", "excellent", "perfect", "great", "nice",
    "quality", "original", "authentic", "genuine", "official", "like", "mint", "pristine",
    "flawless", "immaculate", "spotless",
    // service
    "buyer", "protection", "warranty", "guarantee", "applecare", "care", "free", "delivery",
    "shipping", "postage", "courier", "express", "fast", "same", "day", "next", "overnight", "rush",
    // colours
    "black", "white", "silver", "gold", "rose", "space", "gray", "grey", "blue", "red", "green",
    "yellow", "orange", "purple", "pink", "midnight", "starlight", "product", "coral", "navy",
    "teal",
    // function words
    "the", "and", "but", "for", "with", "from", "about", "into", "over", "after", "are", "was",
    "were", "been", "being", "have", "has", "had", "does", "did", "will", "would", "could",
    "should", "may", "might", "must", "can", "this", "that", "these", "those", "you", "she", "they",
    // marketplace filler
    "still", "available", "selling", "sale", "price", "nego", "negotiable", "firm", "fixed",
    "urgent", "moving", "house", "clearance",
];

static PRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:s\$|sgd|usd|\$)\s*\d+(?:[,.]\d+)*|\d+(?:[,.]\d+)*\s*(?:\$|sgd|usd)\b")
        .expect("price pattern compiles")
});

static PUNCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("punctuation pattern compiles"));

static IGNORE: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| IGNORE_WORDS.iter().copied().collect());

/// Local keyword-overlap scorer with a price-outlier penalty. Deterministic
/// and dependency free.
#[derive(Debug, Default)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    pub fn score_all(query_text: &str, listings: &[Listing]) -> Vec<f64> {
        let query = tokens(query_text);
        let outliers = price_outliers(listings);
        listings
            .iter()
            .zip(outliers)
            .map(|(l, outlier)| {
                let s = keyword_score(&tokens(&l.text()), &query);
                clamp_unit(if outlier { s * OUTLIER_PENALTY } else { s })
            })
            .collect()
    }
}

#[async_trait]
impl RelevanceScorer for HeuristicScorer {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn score(&self, query_text: &str, listings: &[Listing]) -> Result<Vec<f64>, StageError> {
        Ok(Self::score_all(query_text, listings))
    }
}

/// Meaningful lowercase words: prices removed, punctuation folded to spaces,
/// short words and [`IGNORE_WORDS`] dropped.
pub fn tokens(text: &str) -> HashSet<String> {
    let lower = text.to_lowercase();
    let no_prices = PRICE_RE.replace_all(&lower, "");
    let plain = PUNCT_RE.replace_all(&no_prices, " ");
    plain
        .split_whitespace()
        .filter(|w| w.chars().count() > 2 && !IGNORE.contains(*w))
        .map(str::to_string)
        .collect()
}

/// Share of query words present, minus a flat penalty per unrelated word.
pub fn keyword_score(item: &HashSet<String>, query: &HashSet<String>) -> f64 {
    if query.is_empty() {
        return NEUTRAL_SCORE;
    }
    let matched = item.intersection(query).count() as f64;
    let extra = item.difference(query).count() as f64;
    (matched / query.len() as f64 - EXTRA_WORD_PENALTY * extra).clamp(0.0, 1.0)
}

/// Per-listing outlier flag: |z| above the threshold, using the sample
/// standard deviation over listings that have a price. Listings without a
/// price are never outliers.
pub fn price_outliers(listings: &[Listing]) -> Vec<bool> {
    let prices: Vec<f64> = listings.iter().filter_map(|l| l.price).collect();
    if prices.len() < MIN_PRICES_FOR_OUTLIERS {
        return vec![false; listings.len()];
    }
    let n = prices.len() as f64;
    let mean = prices.iter().sum::<f64>() / n;
    let var = prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = var.sqrt();
    if std == 0.0 {
        return vec![false; listings.len()];
    }
    listings
        .iter()
        .map(|l| l.price.is_some_and(|p| ((p - mean) / std).abs() > OUTLIER_Z))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SortVariant;

    fn listing(title: &str, price: Option<f64>) -> Listing {
        Listing {
            id: title.to_string(),
            title: title.to_string(),
            description: None,
            price,
            currency: "SGD".to_string(),
            listed_on: None,
            condition: None,
            url: None,
            sort_variant: SortVariant::Recent,
        }
    }

    fn set(words: &[&str]) -> HashSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn tokens_drop_prices_noise_and_short_words() {
        let t = tokens("BRAND NEW Baby High-Chair, S$45 nego! 2 pcs");
        assert_eq!(t, set(&["baby", "high", "chair", "pcs"]));
    }

    #[test]
    fn exact_match_scores_one() {
        let q = tokens("baby chair");
        assert_eq!(keyword_score(&tokens("Baby Chair"), &q), 1.0);
    }

    #[test]
    fn extra_words_are_penalised_hard() {
        let q = tokens("baby chair");
        // 2/2 matched, one extra word
        assert_eq!(keyword_score(&tokens("baby chair cover"), &q), 0.5);
        // two extras wipe the score out
        assert_eq!(keyword_score(&tokens("baby chair cover cushion"), &q), 0.0);
    }

    #[test]
    fn empty_query_is_neutral() {
        let q = tokens("the new");
        assert!(q.is_empty());
        assert_eq!(keyword_score(&tokens("baby chair"), &q), NEUTRAL_SCORE);
    }

    #[test]
    fn price_outlier_is_penalised() {
        let mut listings: Vec<_> = (0..9).map(|i| listing("baby chair", Some(40.0 + i as f64))).collect();
        listings.push(listing("baby chair", Some(900.0)));
        listings.push(listing("baby chair", None));

        let flags = price_outliers(&listings);
        assert_eq!(flags.iter().filter(|f| **f).count(), 1);
        assert!(flags[9]);
        assert!(!flags[10]);

        let scores = HeuristicScorer::score_all("baby chair", &listings);
        assert!((scores[9] - 0.1).abs() < 1e-12);
        assert_eq!(scores[0], 1.0);
        assert_eq!(scores[10], 1.0);
    }

    #[test]
    fn too_few_prices_means_no_outliers() {
        let listings = vec![listing("a", Some(1.0)), listing("b", Some(1000.0))];
        assert_eq!(price_outliers(&listings), vec![false, false]);
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let listings = vec![
            listing("Baby chair", Some(30.0)),
            listing("Stokke Tripp Trapp baby chair with tray and cushion", Some(250.0)),
            listing("", None),
        ];
        for s in HeuristicScorer::score_all("stokke baby chair", &listings) {
            assert!((0.0..=1.0).contains(&s));
        }
    }
}
