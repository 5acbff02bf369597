//! JSON file IO for the intermediate datasets a run leaves in its working
//! directories. Every file written here belongs to exactly one run.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::collector::listing::{normalize_row, RawRow};
use crate::error::{CollectorError, StageError};
use crate::types::{RawDataset, SortVariant};

/// `<YYYYmmdd_HHMMSS>_<stem>.json` inside `dir`.
pub fn timestamped_path(dir: &Path, stem: &str) -> PathBuf {
    let ts = Local::now().format("%Y%m%d_%H%M%S");
    dir.join(format!("{ts}_{stem}.json"))
}

/// Replace anything that is not alphanumeric with `_`, trimming the ends.
/// An empty result becomes `items`.
pub fn slugify(label: &str) -> String {
    let slug: String = label
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "items".to_string()
    } else {
        slug.to_string()
    }
}

pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StageError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    debug!(path = %path.display(), "dataset written");
    Ok(())
}

pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StageError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Load a collector's dataset file and normalise its rows. Rows with no title
/// are dropped with a warning; an empty result is a collection failure.
pub async fn load_raw_dataset(
    path: &Path,
    query_url: &str,
    sort_variant: SortVariant,
    today: NaiveDate,
    default_currency: &str,
) -> Result<RawDataset, CollectorError> {
    let dataset_err = |detail: String| CollectorError::Dataset {
        path: path.display().to_string(),
        detail,
    };

    let bytes = tokio::fs::read(path).await.map_err(|e| dataset_err(e.to_string()))?;
    let rows: Vec<RawRow> =
        serde_json::from_slice(&bytes).map_err(|e| dataset_err(e.to_string()))?;

    let total = rows.len();
    let listings: Vec<_> = rows
        .iter()
        .filter_map(|r| normalize_row(r, sort_variant, today, default_currency))
        .collect();

    if listings.len() < total {
        warn!(
            path = %path.display(),
            dropped = total - listings.len(),
            "dropped rows without a title"
        );
    }
    if listings.is_empty() {
        return Err(CollectorError::Empty);
    }

    Ok(RawDataset {
        query_url: query_url.to_string(),
        listings,
    })
}
