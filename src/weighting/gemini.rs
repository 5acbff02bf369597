use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{AI_ATTEMPTS_PER_BATCH, AI_SCORE_FLOOR};
use crate::error::StageError;
use crate::types::Listing;
use crate::weighting::RelevanceScorer;

static ARRAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[\d.,\s]+\]").expect("array pattern compiles"));

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\.?\d*").expect("number pattern compiles"));

/// AI-assisted relevance scoring against the Gemini `generateContent` API.
/// One request per batch of titles; a batch that cannot be scored after
/// [`AI_ATTEMPTS_PER_BATCH`] attempts gets [`AI_SCORE_FLOOR`] for every item.
pub struct GeminiScorer {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    batch_size: usize,
    retry_delay: Duration,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl GeminiScorer {
    pub fn new(api_key: String, base_url: String, model: String, batch_size: usize) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            batch_size: batch_size.max(1),
            retry_delay: Duration::from_secs(1),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    async fn generate(&self, prompt: &str) -> Result<String, StageError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let resp = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&GenerateRequest {
                contents: [Content { parts: [Part { text: prompt }] }],
            })
            .send()
            .await
            .map_err(|e| StageError::Scoring(format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StageError::Scoring(format!("{status}: {body}")));
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| StageError::Scoring(format!("unreadable reply: {e}")))?;
        Ok(parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .map(|p| p.text)
            .collect::<Vec<_>>()
            .join(""))
    }

    async fn score_batch(&self, query: &str, titles: &[&str], batch: usize, batches: usize) -> Vec<f64> {
        let prompt = batch_prompt(query, titles);
        for attempt in 1..=AI_ATTEMPTS_PER_BATCH {
            match self.generate(&prompt).await {
                Ok(text) => {
                    if let Some(scores) = parse_scores(&text, titles.len()) {
                        debug!(batch, batches, items = titles.len(), "batch scored");
                        return scores;
                    }
                    debug!(batch, attempt, "reply had no scores");
                }
                Err(e) if attempt == AI_ATTEMPTS_PER_BATCH => {
                    warn!(batch, attempts = attempt, "scoring failed: {e}");
                }
                Err(e) => debug!(batch, attempt, "scoring attempt failed: {e}"),
            }
            if attempt < AI_ATTEMPTS_PER_BATCH {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        warn!(batch, "falling back to floor scores");
        vec![AI_SCORE_FLOOR; titles.len()]
    }
}

#[async_trait]
impl RelevanceScorer for GeminiScorer {
    fn name(&self) -> &'static str {
        "ai"
    }

    async fn score(&self, query_text: &str, listings: &[Listing]) -> Result<Vec<f64>, StageError> {
        let batches = listings.len().div_ceil(self.batch_size);
        let mut scores = Vec::with_capacity(listings.len());
        for (i, chunk) in listings.chunks(self.batch_size).enumerate() {
            let titles: Vec<&str> = chunk.iter().map(|l| l.title.as_str()).collect();
            scores.extend(self.score_batch(query_text, &titles, i + 1, batches).await);
        }
        Ok(scores)
    }
}

fn batch_prompt(query: &str, titles: &[&str]) -> String {
    let items: String = titles
        .iter()
        .enumerate()
        .map(|(i, t)| format!("{i}: {t}\n"))
        .collect();
    format!(
        "Rate how relevant each item is to the search query on a scale of 0.01 to 1.0.\n\
         Never use 0.0 - minimum score is 0.01.\n\n\
         BE VERY HARSH: Only give high scores (0.7+) to items that are EXACTLY what the user is searching for.\n\
         Give 0.01 to accessories, covers, parts, decorations, or anything that is NOT the main item itself.\n\n\
         Examples for query \"baby chair\":\n\
         - \"Baby High Chair\" = 0.95 (exact match)\n\
         - \"Baby chair cover\" = 0.01 (accessory, not the chair)\n\
         - \"Table and chair set\" = 0.3 (includes chair but not primarily a baby chair)\n\n\
         Query: {query}\n\n\
         Items:\n{items}\n\
         Return exactly {n} scores as a JSON array, one score per item in order.\n\
         Example: [0.85, 0.01, 0.67, 0.01]",
        n = titles.len()
    )
}

/// Pull `n` scores out of a model reply: a JSON array of the right length if
/// there is one, else the first `n` numbers in the text, padded with the floor
/// when short. `None` when the reply holds no numbers at all.
fn parse_scores(text: &str, n: usize) -> Option<Vec<f64>> {
    let bound = |s: f64| s.clamp(AI_SCORE_FLOOR, 1.0);

    if let Some(m) = ARRAY_RE.find(text) {
        if let Ok(scores) = serde_json::from_str::<Vec<f64>>(m.as_str()) {
            if scores.len() == n {
                return Some(scores.into_iter().map(bound).collect());
            }
        }
    }

    let mut numbers: Vec<f64> = NUMBER_RE
        .find_iter(text)
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .take(n)
        .collect();
    if numbers.is_empty() {
        return None;
    }
    numbers.resize(n, AI_SCORE_FLOOR);
    Some(numbers.into_iter().map(bound).collect())
}
