use serde::Deserialize;

// ---------------------------------------------------------------------------
// API response types (mirror routes.rs shapes)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct StartResponse {
    pub run_id: String,
}

/// Either a live snapshot or the `{"stage":"completed"}` sentinel.
#[derive(Debug, Clone, Deserialize, Default)]
#[allow(dead_code)]
pub struct ProgressResponse {
    pub stage: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub step: usize,
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PriceStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub weighted_mean: f64,
    pub weighted_median: f64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TimeStats {
    pub min_days: i64,
    pub max_days: i64,
    pub avg_days: f64,
}

/// Success and failure bodies share `ok`; the rest depends on which it is.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RunResponse {
    pub ok: bool,
    pub predicted_price: f64,
    pub target_days: u32,
    pub data_points: usize,
    pub model_accuracy_mae: f64,
    pub price_stats: PriceStats,
    pub time_stats: TimeStats,
    pub avg_relevance: f64,
    pub confidence: f64,
    pub recommendation: Option<String>,
    pub variant: String,
    pub valid: bool,
    pub note: Option<String>,
    pub kind: Option<String>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Run submission
// ---------------------------------------------------------------------------

/// Run parameters, taken from the environment so the client needs no forms.
#[derive(Debug, Clone)]
pub struct RunForm {
    pub item: String,
    pub brand: String,
    pub model: String,
    pub notes: String,
    pub condition: String,
    pub min_price: String,
    pub target_days: String,
    pub speed_mode: String,
    pub weighting_method: String,
    pub predictor_variant: String,
}

impl RunForm {
    pub fn from_env() -> Self {
        let var = |name: &str, default: &str| std::env::var(name).unwrap_or_else(|_| default.to_string());
        Self {
            item: var("ITEM", ""),
            brand: var("BRAND", ""),
            model: var("MODEL", ""),
            notes: var("NOTES", ""),
            condition: var("CONDITION", "3"),
            min_price: var("MIN_PRICE", ""),
            target_days: var("TARGET_DAYS", "7"),
            speed_mode: var("SPEED_MODE", "fast"),
            weighting_method: var("WEIGHTING_METHOD", "ai"),
            predictor_variant: var("PREDICTOR_VARIANT", "simple"),
        }
    }

    /// The request body. Blank optional fields are left out; validation is
    /// the server's job.
    pub fn body(&self) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        let fields = [
            ("item", &self.item),
            ("brand", &self.brand),
            ("model", &self.model),
            ("notes", &self.notes),
            ("condition", &self.condition),
            ("min_price", &self.min_price),
            ("target_days", &self.target_days),
            ("speed_mode", &self.speed_mode),
            ("weighting_method", &self.weighting_method),
            ("predictor_variant", &self.predictor_variant),
        ];
        for (key, value) in fields {
            let value = value.trim();
            if !value.is_empty() {
                body.insert(key.to_string(), serde_json::Value::String(value.to_string()));
            }
        }
        serde_json::Value::Object(body)
    }

    pub fn label(&self) -> String {
        [&self.item, &self.brand, &self.model]
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Error(String),
    Connecting,
}

#[derive(Debug, Clone)]
pub enum Phase {
    Submitting,
    Running,
    Done(RunResponse),
    Failed { kind: String, message: String },
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub status: ConnectionStatus,
    pub phase: Phase,
    pub run_id: Option<String>,
    pub progress: ProgressResponse,
    pub form: RunForm,
    pub started: std::time::Instant,
    pub base_url: String,
}

impl AppState {
    pub fn new(base_url: String, form: RunForm) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            phase: Phase::Submitting,
            run_id: None,
            progress: ProgressResponse {
                stage: "starting".to_string(),
                ..Default::default()
            },
            form,
            started: std::time::Instant::now(),
            base_url,
        }
    }

    /// POST /runs. The id is known before the long execute call starts.
    pub async fn start(&mut self, client: &reqwest::Client) -> Option<String> {
        let url = format!("{}/runs", self.base_url);
        let resp = match client.post(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                self.status = ConnectionStatus::Error(format!("{e}"));
                return None;
            }
        };
        match resp.json::<StartResponse>().await {
            Ok(s) => {
                self.status = ConnectionStatus::Connected;
                self.run_id = Some(s.run_id.clone());
                self.phase = Phase::Running;
                self.started = std::time::Instant::now();
                Some(s.run_id)
            }
            Err(e) => {
                self.status = ConnectionStatus::Error(format!("parse error: {e}"));
                None
            }
        }
    }

    pub async fn poll(&mut self, client: &reqwest::Client) {
        let Some(run_id) = &self.run_id else {
            return;
        };
        if !matches!(self.phase, Phase::Running) {
            return;
        }
        let url = format!("{}/runs/{}/progress", self.base_url, run_id);
        match client.get(&url).send().await {
            Ok(resp) => match resp.json::<ProgressResponse>().await {
                Ok(p) => {
                    self.status = ConnectionStatus::Connected;
                    // the result body arrives separately; keep the last live stage on screen
                    if p.stage != "completed" {
                        self.progress = p;
                    }
                }
                Err(e) => self.status = ConnectionStatus::Error(format!("parse error: {e}")),
            },
            Err(e) => self.status = ConnectionStatus::Error(format!("{e}")),
        }
    }

    pub fn finish(&mut self, outcome: Result<RunResponse, String>) {
        self.phase = match outcome {
            Ok(r) if r.ok => Phase::Done(r),
            Ok(r) => Phase::Failed {
                kind: r.kind.unwrap_or_else(|| "error".to_string()),
                message: r.error.unwrap_or_default(),
            },
            Err(e) => Phase::Failed {
                kind: "transport".to_string(),
                message: e,
            },
        };
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Done(_) | Phase::Failed { .. })
    }
}

/// POST /runs/:id and wait for the terminal body. Error statuses still carry
/// a JSON body, so they are decoded rather than treated as transport errors.
pub async fn execute(
    client: &reqwest::Client,
    base_url: &str,
    run_id: &str,
    body: &serde_json::Value,
) -> Result<RunResponse, String> {
    let url = format!("{base_url}/runs/{run_id}");
    let resp = client.post(&url).json(body).send().await.map_err(|e| e.to_string())?;
    resp.json::<RunResponse>().await.map_err(|e| format!("parse error: {e}"))
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// Gauge position for a stage. Scraping spans most of the bar since it
/// dominates run time.
pub fn stage_ratio(stage: &str, step: usize, total: usize) -> f64 {
    match stage {
        "starting" => 0.02,
        "scraping" if total > 0 => 0.05 + 0.55 * (step.saturating_sub(1) as f64 / total as f64),
        "scraping" => 0.05,
        "merging" => 0.65,
        "weighting" => 0.75,
        "predicting" => 0.9,
        "succeeded" | "failed" | "completed" => 1.0,
        _ => 0.0,
    }
}

pub fn format_price(v: f64) -> String {
    format!("${:.2}", v)
}

pub fn format_elapsed(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

#[allow(dead_code)]
fn main() {
    // compiled standalone as a bin target; the entry point lives in src/bin/tui.rs
}
