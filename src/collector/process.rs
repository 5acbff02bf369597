use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::collector::{CollectOutcome, CollectRequest, Collector};
use crate::error::CollectorError;
use crate::types::condition_code;

/// Runs an external scraper once per request and reads the JSON document it
/// prints on stdout. The child runs inside the run's raw directory so every
/// file it drops there is owned by that run.
pub struct ProcessCollector {
    program: String,
    base_args: Vec<String>,
    headless: bool,
}

/// Final stdout line of a collector process.
#[derive(Debug, Deserialize)]
struct CollectorReply {
    ok: bool,
    #[serde(default)]
    query_url: Option<String>,
    #[serde(default, alias = "screenshot_reference")]
    screenshot_path: Option<String>,
    #[serde(default, alias = "dataset_reference", alias = "csv_path")]
    dataset_path: Option<String>,
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

impl ProcessCollector {
    /// `cmd` is the program followed by any fixed arguments.
    pub fn new(cmd: &[String], headless: bool) -> Self {
        let (program, base_args) = match cmd.split_first() {
            Some((p, rest)) => (p.clone(), rest.to_vec()),
            None => (String::new(), Vec::new()),
        };
        Self { program, base_args, headless }
    }

    fn command(&self, req: &CollectRequest) -> Command {
        let q = &req.query;
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .arg("--item")
            .arg(q.item.trim())
            .arg("--brand")
            .arg(q.brand.trim())
            .arg("--model")
            .arg(q.model.trim())
            .arg("--notes")
            .arg(q.notes.trim())
            .arg("--condition")
            .arg(condition_code(&q.condition).to_string())
            .arg("--min_price")
            .arg(if q.min_price.trim().is_empty() { "0" } else { q.min_price.trim() })
            .arg("--sort")
            .arg(req.sort_variant.code().to_string());
        if self.headless {
            cmd.arg("--headless");
        }
        cmd.current_dir(&req.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Collector for ProcessCollector {
    fn name(&self) -> &str {
        &self.program
    }

    async fn collect(&self, req: &CollectRequest) -> Result<CollectOutcome, CollectorError> {
        let output = self
            .command(req)
            .output()
            .await
            .map_err(CollectorError::Spawn)?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            debug!(sort = %req.sort_variant, "[collector] {line}");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let reply = match parse_reply(&stdout) {
            Some(r) => r,
            None if !output.status.success() => {
                return Err(CollectorError::Exit {
                    status: output.status.to_string(),
                    detail: last_line(&stderr).unwrap_or("no output").to_string(),
                });
            }
            None => {
                return Err(CollectorError::Output(
                    last_line(&stdout).unwrap_or("empty stdout").to_string(),
                ))
            }
        };

        if !reply.ok {
            return Err(CollectorError::Reported(
                reply.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        if reply.count == Some(0) {
            return Err(CollectorError::Empty);
        }
        let dataset = reply
            .dataset_path
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| CollectorError::Output("reply has no dataset path".to_string()))?;

        let outcome = CollectOutcome {
            query_url: reply.query_url.unwrap_or_default(),
            screenshot: reply
                .screenshot_path
                .filter(|p| !p.trim().is_empty())
                .map(|p| resolve(&req.work_dir, &p)),
            dataset: resolve(&req.work_dir, &dataset),
        };
        info!(
            sort = %req.sort_variant,
            query_url = %outcome.query_url,
            count = reply.count.unwrap_or(0),
            "collector finished"
        );
        Ok(outcome)
    }
}

/// The reply is the last stdout line that parses as a JSON object; scrapers
/// tend to print progress lines before it.
fn parse_reply(stdout: &str) -> Option<CollectorReply> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .find_map(|l| serde_json::from_str::<CollectorReply>(l).ok())
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().rev().map(str::trim).find(|l| !l.is_empty())
}

fn resolve(work_dir: &Path, reported: &str) -> PathBuf {
    let p = PathBuf::from(reported.trim());
    if p.is_absolute() {
        p
    } else {
        work_dir.join(p)
    }
}
