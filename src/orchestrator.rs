use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use futures_util::FutureExt;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::collector::{CollectRequest, Collector};
use crate::config::{Config, SORT_VARIANTS};
use crate::dataset::load_raw_dataset;
use crate::error::{CollectorError, RunError, StageError};
use crate::merger::{merge_listings, Merger};
use crate::predictor::PricePredictor;
use crate::state::artifacts::RunArtifacts;
use crate::state::run_store::RunStore;
use crate::types::{
    PredictionResult, PredictorVariant, Progress, RunOptions, SearchQuery, SpeedMode, Stage,
    WeightingMethod,
};
use crate::weighting::{weigh, RelevanceScorer};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Body of a run submission. Everything is optional at the serde level so
/// that missing or malformed fields surface as a validation error rather
/// than a transport-level rejection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunRequest {
    pub item: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub notes: Option<String>,
    pub condition: Option<serde_json::Value>,
    pub min_price: Option<serde_json::Value>,
    pub target_days: Option<serde_json::Value>,
    pub speed_mode: Option<String>,
    pub weighting_method: Option<String>,
    pub predictor_variant: Option<String>,
}

fn loose_text(v: &Option<serde_json::Value>) -> String {
    match v {
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

impl RunRequest {
    pub fn validate(&self) -> Result<(SearchQuery, RunOptions), RunError> {
        let item = self.item.as_deref().map(str::trim).unwrap_or("");
        if item.is_empty() {
            return Err(RunError::Validation("item is required".to_string()));
        }

        let target_days = match &self.target_days {
            None | Some(serde_json::Value::Null) => {
                return Err(RunError::Validation("target_days is required".to_string()))
            }
            Some(serde_json::Value::Number(n)) => n.as_u64(),
            Some(serde_json::Value::String(s)) => s.trim().parse::<u64>().ok(),
            Some(_) => None,
        }
        .and_then(|d| u32::try_from(d).ok())
        .ok_or_else(|| {
            RunError::Validation("target_days must be a non-negative whole number of days".to_string())
        })?;

        let speed_mode: SpeedMode = self
            .speed_mode
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| RunError::Validation("speed_mode is required".to_string()))?
            .parse()
            .map_err(RunError::Validation)?;

        let weighting_method = match self.weighting_method.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(s) => s.parse().map_err(RunError::Validation)?,
            None => WeightingMethod::default(),
        };
        let predictor_variant = match self.predictor_variant.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(s) => s.parse().map_err(RunError::Validation)?,
            None => PredictorVariant::default(),
        };

        let text = |v: &Option<String>| v.as_deref().map(str::trim).unwrap_or("").to_string();
        let query = SearchQuery {
            item: item.to_string(),
            brand: text(&self.brand),
            model: text(&self.model),
            notes: text(&self.notes),
            condition: loose_text(&self.condition),
            min_price: loose_text(&self.min_price),
        };
        let options = RunOptions {
            target_days,
            speed_mode,
            weighting_method,
            predictor_variant,
        };
        Ok((query, options))
    }
}

// ---------------------------------------------------------------------------
// Strategies and settings
// ---------------------------------------------------------------------------

/// The interchangeable weighting and prediction implementations. The AI
/// scorer is absent when no scoring credential is configured.
#[derive(Clone)]
pub struct Strategies {
    pub heuristic: Arc<dyn RelevanceScorer>,
    pub ai: Option<Arc<dyn RelevanceScorer>>,
    pub simple: Arc<dyn PricePredictor>,
    pub advanced: Arc<dyn PricePredictor>,
}

impl Strategies {
    pub fn scorer(&self, method: WeightingMethod) -> Option<Arc<dyn RelevanceScorer>> {
        match method {
            WeightingMethod::Heuristic => Some(self.heuristic.clone()),
            WeightingMethod::Ai => self.ai.clone(),
        }
    }

    pub fn predictor(&self, variant: PredictorVariant) -> Arc<dyn PricePredictor> {
        match variant {
            PredictorVariant::Simple => self.simple.clone(),
            PredictorVariant::Advanced => self.advanced.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub raw_root: PathBuf,
    pub processed_root: PathBuf,
    pub stage_timeout: Duration,
    pub default_currency: String,
}

impl Settings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            raw_root: cfg.raw_dir(),
            processed_root: cfg.processed_dir(),
            stage_timeout: Duration::from_secs(cfg.stage_timeout_secs),
            default_currency: cfg.default_currency.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives runs through collect → merge → weigh → predict, keeps each run's
/// progress snapshot current, and cleans up after every run whatever its
/// outcome.
pub struct Orchestrator {
    store: Arc<RunStore>,
    collector: Arc<dyn Collector>,
    merger: Arc<dyn Merger>,
    strategies: Strategies,
    settings: Settings,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
}

impl Orchestrator {
    pub fn new(
        collector: Arc<dyn Collector>,
        merger: Arc<dyn Merger>,
        strategies: Strategies,
        settings: Settings,
        health: Arc<HealthState>,
        latency: Arc<LatencyStats>,
    ) -> Self {
        Self {
            store: RunStore::new(),
            collector,
            merger,
            strategies,
            settings,
            health,
            latency,
        }
    }

    /// Allocate a run id and publish a `starting` snapshot for it.
    pub fn start(&self) -> String {
        let run_id = uuid::Uuid::new_v4().to_string();
        self.store.insert(&run_id);
        info!(run_id = %run_id, "run created");
        run_id
    }

    pub fn progress(&self, run_id: &str) -> Progress {
        self.store.progress(run_id)
    }

    pub fn active_runs(&self) -> usize {
        self.store.len()
    }

    /// Start and execute in one call. The run is detached like
    /// [`Orchestrator::execute_detached`].
    pub async fn run(self: &Arc<Self>, request: &RunRequest) -> (String, Result<PredictionResult, RunError>) {
        let run_id = self.start();
        let result = self.execute_detached(&run_id, request.clone()).await;
        (run_id, result)
    }

    /// Execute on a task of its own and wait for it. Dropping the returned
    /// future stops the waiting, not the run: it still reaches a terminal
    /// stage, cleans up and removes its record.
    pub async fn execute_detached(
        self: &Arc<Self>,
        run_id: &str,
        request: RunRequest,
    ) -> Result<PredictionResult, RunError> {
        let this = Arc::clone(self);
        let run_id = run_id.to_string();
        tokio::spawn(async move { this.execute(&run_id, &request).await })
            .await
            .unwrap_or_else(|join| Err(RunError::unhandled(join)))
    }

    /// Execute one run to completion. Whatever the outcome, the run's files
    /// are deleted and its progress record removed before this returns.
    ///
    /// Only ids issued by [`Orchestrator::start`] are accepted, each exactly
    /// once. Anything else is refused before any directory is touched and
    /// leaves existing records alone.
    pub async fn execute(&self, run_id: &str, request: &RunRequest) -> Result<PredictionResult, RunError> {
        let started = Instant::now();
        if !is_issued_id(run_id) || !self.store.claim(run_id) {
            warn!(run_id, "execute refused: run id unknown or already executing");
            return Err(RunError::Validation(format!(
                "run id {run_id:?} is unknown or already executing; create a run with POST /runs first"
            )));
        }

        let result = match self.prepare(run_id, request).await {
            Ok((query, options, scorer, artifacts)) => {
                let result = AssertUnwindSafe(self.pipeline(run_id, &query, options, scorer, &artifacts))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(RunError::unhandled(panic_message(panic))));
                self.mark_terminal(run_id, &result);
                artifacts.release().await;
                result
            }
            Err(e) => {
                let result = Err(e);
                self.mark_terminal(run_id, &result);
                result
            }
        };

        self.store.remove(run_id);
        self.latency.record(started.elapsed());
        match &result {
            Ok(_) => self.health.record_success(),
            Err(_) => self.health.record_failure(),
        }
        result
    }

    /// Everything that must hold before any stage starts: a valid request,
    /// a usable weighting strategy and the run's working directories.
    async fn prepare(
        &self,
        run_id: &str,
        request: &RunRequest,
    ) -> Result<(SearchQuery, RunOptions, Arc<dyn RelevanceScorer>, RunArtifacts), RunError> {
        let (query, options) = request.validate()?;
        let scorer = self.strategies.scorer(options.weighting_method).ok_or_else(|| {
            RunError::Credential(
                "AI-assisted weighting needs GOOGLE_API_KEY; set it or use weighting_method=heuristic"
                    .to_string(),
            )
        })?;
        let artifacts = RunArtifacts::create(&self.settings.raw_root, &self.settings.processed_root, run_id)
            .await
            .map_err(RunError::unhandled)?;
        info!(
            run_id,
            item = %query.item,
            speed_mode = %options.speed_mode,
            weighting = %options.weighting_method,
            predictor = %options.predictor_variant,
            target_days = options.target_days,
            "run accepted"
        );
        Ok((query, options, scorer, artifacts))
    }

    async fn pipeline(
        &self,
        run_id: &str,
        query: &SearchQuery,
        options: RunOptions,
        scorer: Arc<dyn RelevanceScorer>,
        artifacts: &RunArtifacts,
    ) -> Result<PredictionResult, RunError> {
        let today = Local::now().date_naive();
        let variants = &SORT_VARIANTS[..options.speed_mode.variant_count()];
        let total = variants.len();

        // -- scraping --------------------------------------------------------
        let mut datasets = Vec::with_capacity(total);
        for (i, &variant) in variants.iter().enumerate() {
            self.transition(
                run_id,
                Stage::Scraping,
                i + 1,
                total,
                format!("Collecting {variant} listings ({}/{total})", i + 1),
            );
            let failed = |e: CollectorError| RunError::Collector {
                variant,
                message: e.to_string(),
            };
            let req = CollectRequest {
                query: query.clone(),
                sort_variant: variant,
                work_dir: artifacts.raw_dir().to_path_buf(),
            };
            let outcome = self.collector.collect(&req).await.map_err(failed)?;
            artifacts.track(&outcome.dataset);
            if let Some(shot) = &outcome.screenshot {
                artifacts.track(shot);
            }
            let dataset = load_raw_dataset(
                &outcome.dataset,
                &outcome.query_url,
                variant,
                today,
                &self.settings.default_currency,
            )
            .await
            .map_err(failed)?;
            datasets.push(dataset);
        }

        // -- merging ---------------------------------------------------------
        let merged = if datasets.len() == 1 {
            self.transition(run_id, Stage::Merging, total, total, "Single dataset, nothing to merge");
            merge_listings(&datasets)
        } else {
            self.transition(
                run_id,
                Stage::Merging,
                total,
                total,
                format!("Merging {} datasets", datasets.len()),
            );
            let label = query.search_text();
            let outcome = self
                .bounded(
                    Stage::Merging,
                    self.merger.merge(artifacts.processed_dir(), &label, &datasets),
                )
                .await?;
            artifacts.track(&outcome.reference);
            info!(run_id, count = outcome.count, "datasets merged");
            outcome.merged
        };

        // -- weighting -------------------------------------------------------
        self.transition(
            run_id,
            Stage::Weighting,
            total,
            total,
            format!("Weighting {} listings ({})", merged.len(), scorer.name()),
        );
        let query_text = query.search_text();
        let weighing = weigh(scorer.as_ref(), &query_text, merged, artifacts.processed_dir());
        let weighted = match options.weighting_method {
            WeightingMethod::Heuristic => self.bounded(Stage::Weighting, weighing).await?,
            WeightingMethod::Ai => weighing.await?,
        };
        artifacts.track(&weighted.reference);

        // -- predicting ------------------------------------------------------
        self.transition(
            run_id,
            Stage::Predicting,
            total,
            total,
            format!("Predicting price in {} days ({})", options.target_days, options.predictor_variant),
        );
        let predictor = self.strategies.predictor(options.predictor_variant);
        let listings = weighted.weighted;
        let target_days = options.target_days;
        let task = tokio::task::spawn_blocking(move || predictor.predict(&listings, target_days, today));
        let prediction = match tokio::time::timeout(self.settings.stage_timeout, task).await {
            Err(_) => {
                return Err(RunError::Timeout {
                    stage: Stage::Predicting,
                    secs: self.settings.stage_timeout.as_secs(),
                })
            }
            Ok(Err(join)) => return Err(RunError::unhandled(join)),
            Ok(Ok(p)) => p,
        };

        if prediction.data_points == 0 {
            let why = prediction.note.as_deref().unwrap_or("no usable listings");
            return Err(RunError::NoData {
                message: format!(
                    "No data available for prediction ({why}). Try broadening your search: \
                     fewer keywords, a wider condition or a slower speed mode."
                ),
            });
        }
        Ok(prediction)
    }

    /// Run a stage future under the stage timeout.
    async fn bounded<T>(
        &self,
        stage: Stage,
        fut: impl Future<Output = Result<T, StageError>>,
    ) -> Result<T, RunError> {
        match tokio::time::timeout(self.settings.stage_timeout, fut).await {
            Ok(r) => r.map_err(RunError::from),
            Err(_) => Err(RunError::Timeout {
                stage,
                secs: self.settings.stage_timeout.as_secs(),
            }),
        }
    }

    fn transition(&self, run_id: &str, stage: Stage, step: usize, total: usize, message: impl Into<String>) {
        let message = message.into();
        info!(run_id, stage = %stage, step, total, "{message}");
        self.store.update(run_id, stage, step, total, message);
    }

    fn mark_terminal(&self, run_id: &str, result: &Result<PredictionResult, RunError>) {
        match result {
            Ok(p) => {
                info!(
                    run_id,
                    predicted_price = p.predicted_price,
                    data_points = p.data_points,
                    mae = p.model_accuracy_mae,
                    "run succeeded"
                );
                self.store
                    .update(run_id, Stage::Succeeded, 0, 0, format!("Predicted {:.2}", p.predicted_price));
            }
            Err(e @ (RunError::Validation(_) | RunError::Credential(_))) => {
                warn!(run_id, kind = e.kind(), "run rejected: {e}");
                self.store.update(run_id, Stage::Failed, 0, 0, e.to_string());
            }
            Err(e) => {
                error!(run_id, kind = e.kind(), "run failed: {e}");
                self.store.update(run_id, Stage::Failed, 0, 0, e.to_string());
            }
        }
    }
}

/// Ids come from `start()`: hyphenated lowercase v4 UUIDs.
fn is_issued_id(run_id: &str) -> bool {
    uuid::Uuid::parse_str(run_id).is_ok_and(|id| id.hyphenated().to_string() == run_id)
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic with no message".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectOutcome;
    use crate::merger::{DatasetMerger, MergeOutcome};
    use crate::predictor::{AdvancedPredictor, SimplePredictor};
    use crate::types::{Listing, RawDataset, SortVariant, WeightedListing};
    use crate::weighting::HeuristicScorer;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Semaphore;

    // -- fakes ---------------------------------------------------------------

    /// Writes a small dataset per call. Listing ids overlap across variants.
    #[derive(Default)]
    struct FakeCollector {
        calls: Mutex<Vec<SortVariant>>,
        totals_seen: Mutex<Vec<usize>>,
        probe: Mutex<Option<Arc<RunStore>>>,
        gate: Option<Arc<Semaphore>>,
        fail_on: Option<SortVariant>,
        priceless: bool,
    }

    impl FakeCollector {
        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Collector for FakeCollector {
        fn name(&self) -> &str {
            "fake"
        }

        async fn collect(&self, req: &CollectRequest) -> Result<CollectOutcome, CollectorError> {
            self.calls.lock().unwrap().push(req.sort_variant);
            let probe = self.probe.lock().unwrap().clone();
            if let Some(store) = probe {
                let run_id = req.work_dir.file_name().unwrap().to_string_lossy().to_string();
                if let Some(s) = store.snapshot(&run_id) {
                    self.totals_seen.lock().unwrap().push(s.total);
                }
            }
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.unwrap();
            }
            if self.fail_on == Some(req.sort_variant) {
                return Err(CollectorError::Reported("blocked".to_string()));
            }

            let code = req.sort_variant.code() as usize;
            let rows: Vec<_> = (0..4)
                .map(|i| {
                    let n = code + i;
                    serde_json::json!({
                        "Date": format!("{} days ago", i * 3),
                        "Item": format!("{} {}", req.query.item, n),
                        "Item_Link": format!("https://shop.sg/p/{n}?ref={code}"),
                        "Price": if self.priceless { serde_json::json!("") } else { serde_json::json!(format!("S${}", 40 + n)) },
                    })
                })
                .collect();
            let dataset = req.work_dir.join(format!("{}.json", req.sort_variant));
            tokio::fs::write(&dataset, serde_json::to_vec(&rows).unwrap()).await.unwrap();
            Ok(CollectOutcome {
                query_url: format!("https://shop.sg/search?sort_by={code}"),
                screenshot: None,
                dataset,
            })
        }
    }

    struct CountingMerger {
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Merger for CountingMerger {
        async fn merge(
            &self,
            output_dir: &Path,
            label: &str,
            datasets: &[RawDataset],
        ) -> Result<MergeOutcome, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            DatasetMerger.merge(output_dir, label, datasets).await
        }
    }

    struct CountingScorer {
        calls: AtomicUsize,
        panics: bool,
    }

    #[async_trait]
    impl RelevanceScorer for CountingScorer {
        fn name(&self) -> &'static str {
            "ai"
        }

        async fn score(&self, _q: &str, listings: &[Listing]) -> Result<Vec<f64>, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panics {
                panic!("scorer exploded");
            }
            Ok(vec![0.9; listings.len()])
        }
    }

    struct CountingPredictor(AtomicUsize);

    impl PricePredictor for CountingPredictor {
        fn variant(&self) -> PredictorVariant {
            PredictorVariant::Simple
        }

        fn predict(&self, listings: &[WeightedListing], target_days: u32, today: NaiveDate) -> PredictionResult {
            self.0.fetch_add(1, Ordering::SeqCst);
            SimplePredictor.predict(listings, target_days, today)
        }
    }

    struct Harness {
        orch: Arc<Orchestrator>,
        collector: Arc<FakeCollector>,
        merger: Arc<CountingMerger>,
        scorer: Arc<CountingScorer>,
        predictor: Arc<CountingPredictor>,
        health: Arc<HealthState>,
        root: tempfile::TempDir,
    }

    fn harness_with(collector: FakeCollector, with_ai: bool, merge_delay: Option<Duration>) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let collector = Arc::new(collector);
        let merger = Arc::new(CountingMerger { calls: AtomicUsize::new(0), delay: merge_delay });
        let scorer = Arc::new(CountingScorer { calls: AtomicUsize::new(0), panics: false });
        let predictor = Arc::new(CountingPredictor(AtomicUsize::new(0)));
        let health = Arc::new(HealthState::new());
        let strategies = Strategies {
            heuristic: Arc::new(HeuristicScorer),
            ai: if with_ai { Some(scorer.clone() as Arc<dyn RelevanceScorer>) } else { None },
            simple: predictor.clone(),
            advanced: Arc::new(AdvancedPredictor),
        };
        let settings = Settings {
            raw_root: root.path().join("raw"),
            processed_root: root.path().join("processed"),
            stage_timeout: Duration::from_millis(500),
            default_currency: "SGD".to_string(),
        };
        let orch = Arc::new(Orchestrator::new(
            collector.clone(),
            merger.clone(),
            strategies,
            settings,
            health.clone(),
            Arc::new(LatencyStats::new()),
        ));
        Harness { orch, collector, merger, scorer, predictor, health, root }
    }

    fn harness() -> Harness {
        harness_with(FakeCollector::default(), true, None)
    }

    fn request(speed_mode: &str) -> RunRequest {
        RunRequest {
            item: Some("baby chair".to_string()),
            condition: Some(serde_json::json!("3")),
            min_price: Some(serde_json::json!("0")),
            target_days: Some(serde_json::json!(14)),
            speed_mode: Some(speed_mode.to_string()),
            ..Default::default()
        }
    }

    fn run_dirs_gone(h: &Harness, run_id: &str) -> bool {
        !h.root.path().join("raw").join(run_id).exists()
            && !h.root.path().join("processed").join(run_id).exists()
    }

    // -- tests ---------------------------------------------------------------

    #[tokio::test]
    async fn baby_chair_ultra_fast_end_to_end() {
        let h = harness();
        let run_id = h.orch.start();
        let result = h.orch.execute(&run_id, &request("ultra_fast")).await.unwrap();

        assert_eq!(h.collector.calls(), 1);
        assert_eq!(h.merger.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.scorer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.predictor.0.load(Ordering::SeqCst), 1);
        assert!(result.valid);
        assert_eq!(result.data_points, 4);
        assert!(result.predicted_price > 0.0);
        assert_eq!(result.target_days, 14);

        assert_eq!(h.orch.progress(&run_id), Progress::completed());
        assert!(run_dirs_gone(&h, &run_id));
        assert_eq!(h.health.runs_succeeded(), 1);
    }

    #[tokio::test]
    async fn speed_mode_sets_collector_calls_and_total() {
        for (mode, expected) in [("ultra_fast", 1), ("fast", 2), ("normal", 5)] {
            let h = harness();
            *h.collector.probe.lock().unwrap() = Some(h.orch.store.clone());

            let (_, result) = h.orch.run(&request(mode)).await;
            assert!(result.is_ok(), "{mode}: {result:?}");
            assert_eq!(h.collector.calls(), expected, "{mode}");
            let order = h.collector.calls.lock().unwrap().clone();
            assert_eq!(order, SORT_VARIANTS[..expected].to_vec());
            let totals = h.collector.totals_seen.lock().unwrap().clone();
            assert_eq!(totals, vec![expected; expected], "{mode}");
            let merges = if expected == 1 { 0 } else { 1 };
            assert_eq!(h.merger.calls.load(Ordering::SeqCst), merges, "{mode}");
        }
    }

    #[tokio::test]
    async fn merged_dataset_deduplicates_across_variants() {
        let h = harness_with(FakeCollector::default(), false, None);
        let mut req = request("normal");
        req.weighting_method = Some("heuristic".to_string());
        let (_, result) = h.orch.run(&req).await;
        // codes 3,1,4,5,6 each give ids code..code+3 → distinct ids 1..=9
        let r = result.unwrap();
        assert_eq!(r.data_points, 9);
    }

    #[tokio::test]
    async fn credential_failure_happens_before_collection() {
        let h = harness_with(FakeCollector::default(), false, None);
        let (run_id, result) = h.orch.run(&request("fast")).await;
        let err = result.unwrap_err();
        assert_eq!(err.kind(), "credential_error");
        assert_eq!(h.collector.calls(), 0);
        assert_eq!(h.orch.progress(&run_id), Progress::completed());
        assert_eq!(h.health.runs_failed(), 1);
    }

    #[tokio::test]
    async fn validation_rejects_missing_fields() {
        let h = harness();
        let mut no_item = request("fast");
        no_item.item = Some("  ".to_string());
        let mut no_days = request("fast");
        no_days.target_days = None;
        let mut bad_mode = request("fast");
        bad_mode.speed_mode = Some("warp".to_string());
        let mut negative = request("fast");
        negative.target_days = Some(serde_json::json!(-3));

        for req in [no_item, no_days, bad_mode, negative] {
            let (_, result) = h.orch.run(&req).await;
            assert_eq!(result.unwrap_err().kind(), "validation_error");
        }
        assert_eq!(h.collector.calls(), 0);
    }

    #[tokio::test]
    async fn collector_failure_aborts_and_cleans_up() {
        let collector = FakeCollector {
            fail_on: Some(SortVariant::BestMatch),
            ..Default::default()
        };
        let h = harness_with(collector, true, None);
        let (run_id, result) = h.orch.run(&request("normal")).await;
        match result.unwrap_err() {
            RunError::Collector { variant, .. } => assert_eq!(variant, SortVariant::BestMatch),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.collector.calls(), 2);
        assert_eq!(h.scorer.calls.load(Ordering::SeqCst), 0);
        assert!(run_dirs_gone(&h, &run_id));
    }

    #[tokio::test]
    async fn no_usable_listings_is_a_domain_failure() {
        let collector = FakeCollector { priceless: true, ..Default::default() };
        let h = harness_with(collector, true, None);
        let (run_id, result) = h.orch.run(&request("ultra_fast")).await;
        let err = result.unwrap_err();
        assert_eq!(err.kind(), "prediction_data_error");
        assert!(err.to_string().contains("broadening"));
        assert!(run_dirs_gone(&h, &run_id));
    }

    #[tokio::test]
    async fn slow_merge_times_out() {
        let h = harness_with(FakeCollector::default(), true, Some(Duration::from_secs(5)));
        let (run_id, result) = h.orch.run(&request("fast")).await;
        match result.unwrap_err() {
            RunError::Timeout { stage, .. } => assert_eq!(stage, Stage::Merging),
            other => panic!("unexpected {other:?}"),
        }
        assert!(run_dirs_gone(&h, &run_id));
    }

    #[tokio::test]
    async fn panic_in_a_stage_is_unhandled_and_cleaned_up() {
        let mut h = harness();
        let panicking = Arc::new(CountingScorer { calls: AtomicUsize::new(0), panics: true });
        let strategies = Strategies {
            heuristic: Arc::new(HeuristicScorer),
            ai: Some(panicking as Arc<dyn RelevanceScorer>),
            simple: Arc::new(SimplePredictor),
            advanced: Arc::new(AdvancedPredictor),
        };
        h.orch = Arc::new(Orchestrator::new(
            h.collector.clone(),
            h.merger.clone(),
            strategies,
            h.orch.settings.clone(),
            h.health.clone(),
            Arc::new(LatencyStats::new()),
        ));

        let (run_id, result) = h.orch.run(&request("ultra_fast")).await;
        let err = result.unwrap_err();
        assert_eq!(err.kind(), "unhandled_error");
        assert!(err.to_string().contains("scorer exploded"));
        assert!(run_dirs_gone(&h, &run_id));
        assert_eq!(h.orch.progress(&run_id), Progress::completed());
    }

    #[tokio::test]
    async fn concurrent_runs_keep_separate_snapshots() {
        let gate = Arc::new(Semaphore::new(0));
        let collector = FakeCollector { gate: Some(gate.clone()), ..Default::default() };
        let h = harness_with(collector, true, None);

        let a = h.orch.start();
        let b = h.orch.start();
        let (oa, ob) = (h.orch.clone(), h.orch.clone());
        let (ia, ib) = (a.clone(), b.clone());
        let ta = tokio::spawn(async move { oa.execute(&ia, &request("fast")).await });
        let tb = tokio::spawn(async move { ob.execute(&ib, &request("normal")).await });

        let mut both_scraping = false;
        for _ in 0..200 {
            match (h.orch.progress(&a), h.orch.progress(&b)) {
                (Progress::Live(sa), Progress::Live(sb))
                    if sa.stage == Stage::Scraping && sb.stage == Stage::Scraping =>
                {
                    assert_eq!(sa.run_id, a);
                    assert_eq!(sb.run_id, b);
                    assert_eq!(sa.total, 2);
                    assert_eq!(sb.total, 5);
                    both_scraping = true;
                    break;
                }
                _ => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
        assert!(both_scraping);
        assert_eq!(h.orch.active_runs(), 2);

        gate.add_permits(100);
        assert!(ta.await.unwrap().is_ok());
        assert!(tb.await.unwrap().is_ok());
        assert_eq!(h.orch.progress(&a), Progress::completed());
        assert_eq!(h.orch.progress(&b), Progress::completed());
        assert!(run_dirs_gone(&h, &a) && run_dirs_gone(&h, &b));
    }

    async fn wait_for_scraping(orch: &Orchestrator, run_id: &str) -> bool {
        for _ in 0..200 {
            if let Progress::Live(s) = orch.progress(run_id) {
                if s.stage == Stage::Scraping {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn unissued_run_ids_are_refused_without_touching_files() {
        let h = harness();
        let precious = h.root.path().join("precious.txt");
        tokio::fs::write(&precious, b"keep").await.unwrap();

        let unknown = uuid::Uuid::new_v4().to_string();
        for id in ["..", "%2E%2E", "/x", ".", "", unknown.as_str()] {
            let err = h.orch.execute(id, &request("ultra_fast")).await.unwrap_err();
            assert_eq!(err.kind(), "validation_error", "{id:?}");
        }

        assert!(precious.exists());
        assert_eq!(h.collector.calls(), 0);
        assert!(!h.root.path().join("raw").exists());
        assert_eq!(h.orch.active_runs(), 0);
    }

    #[tokio::test]
    async fn a_run_executes_only_once() {
        let gate = Arc::new(Semaphore::new(0));
        let collector = FakeCollector { gate: Some(gate.clone()), ..Default::default() };
        let h = harness_with(collector, true, None);

        let run_id = h.orch.start();
        let first = {
            let (orch, id) = (h.orch.clone(), run_id.clone());
            tokio::spawn(async move { orch.execute_detached(&id, request("fast")).await })
        };
        assert!(wait_for_scraping(&h.orch, &run_id).await);

        let second = h.orch.execute(&run_id, &request("fast")).await.unwrap_err();
        assert_eq!(second.kind(), "validation_error");
        match h.orch.progress(&run_id) {
            Progress::Live(s) => assert_eq!(s.stage, Stage::Scraping),
            other => panic!("first run lost its record: {other:?}"),
        }
        assert!(h.root.path().join("raw").join(&run_id).exists());

        gate.add_permits(100);
        assert!(first.await.unwrap().is_ok());
        assert_eq!(h.collector.calls(), 2);

        let late = h.orch.execute(&run_id, &request("fast")).await.unwrap_err();
        assert_eq!(late.kind(), "validation_error");
        assert_eq!(h.health.runs_succeeded(), 1);
        assert_eq!(h.health.runs_failed(), 0);
    }

    #[tokio::test]
    async fn run_completes_after_the_waiter_goes_away() {
        let gate = Arc::new(Semaphore::new(0));
        let collector = FakeCollector { gate: Some(gate.clone()), ..Default::default() };
        let h = harness_with(collector, true, None);

        let run_id = h.orch.start();
        let waiter = {
            let (orch, id) = (h.orch.clone(), run_id.clone());
            tokio::spawn(async move { orch.execute_detached(&id, request("fast")).await })
        };
        assert!(wait_for_scraping(&h.orch, &run_id).await);

        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        gate.add_permits(100);

        let mut finished = false;
        for _ in 0..400 {
            if h.orch.progress(&run_id) == Progress::completed() {
                finished = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(finished);
        assert_eq!(h.orch.active_runs(), 0);
        assert_eq!(h.collector.calls(), 2);
        assert_eq!(h.health.runs_succeeded(), 1);
        assert!(run_dirs_gone(&h, &run_id));
    }

    #[test]
    fn issued_ids_are_canonical_uuids() {
        assert!(is_issued_id(&uuid::Uuid::new_v4().to_string()));
        assert!(!is_issued_id(".."));
        assert!(!is_issued_id(&uuid::Uuid::new_v4().simple().to_string()));
        assert!(!is_issued_id(&uuid::Uuid::new_v4().to_string().to_uppercase()));
    }

    #[test]
    fn request_defaults_and_loose_fields() {
        let req: RunRequest = serde_json::from_value(serde_json::json!({
            "item": "baby chair",
            "condition": 3,
            "min_price": "0",
            "target_days": "14",
            "speed_mode": "ultra_fast"
        }))
        .unwrap();
        let (q, o) = req.validate().unwrap();
        assert_eq!(q.condition, "3");
        assert_eq!(q.min_price, "0");
        assert_eq!(o.target_days, 14);
        assert_eq!(o.weighting_method, WeightingMethod::Ai);
        assert_eq!(o.predictor_variant, PredictorVariant::Simple);
    }
}
