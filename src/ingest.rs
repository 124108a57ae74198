use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::StringRecord;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{AppRecord, Platform};

pub const UNIFIED_COLUMNS: [&str; 6] = [
    "app_name",
    "category",
    "rating",
    "review_count",
    "price_usd",
    "last_updated",
];

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("{path}: missing required column '{column}'")]
    MissingColumn { column: String, path: String },
}

/// Anything that can hand over a batch of app records.
#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self) -> anyhow::Result<Vec<AppRecord>>;
}

/// The unified CSV written by `write_unified_csv` (or any export with the
/// same column names). `platform` is optional and defaults to android.
#[derive(Debug, Clone)]
pub struct UnifiedCsvSource {
    path: PathBuf,
}

impl UnifiedCsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DataSource for UnifiedCsvSource {
    fn name(&self) -> &str {
        "unified-csv"
    }

    async fn load(&self) -> anyhow::Result<Vec<AppRecord>> {
        load_unified_csv(&self.path)
    }
}

/// Kaggle-style Google Play export (`App`, `Category`, `Rating`, ...).
#[derive(Debug, Clone)]
pub struct GooglePlayCsvSource {
    path: PathBuf,
}

impl GooglePlayCsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DataSource for GooglePlayCsvSource {
    fn name(&self) -> &str {
        "google-play-csv"
    }

    async fn load(&self) -> anyhow::Result<Vec<AppRecord>> {
        load_google_play_csv(&self.path)
    }
}

/// App Store payloads previously cached by the fetcher, one JSON file per app.
#[derive(Debug, Clone)]
pub struct AppStoreCacheSource {
    cache_dir: PathBuf,
}

impl AppStoreCacheSource {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }
}

#[async_trait]
impl DataSource for AppStoreCacheSource {
    fn name(&self) -> &str {
        "app-store-cache"
    }

    async fn load(&self) -> anyhow::Result<Vec<AppRecord>> {
        load_app_store_cache(&self.cache_dir)
    }
}

/// Loads every source, normalizes the rows and concatenates them.
pub async fn unify(sources: &[&dyn DataSource]) -> anyhow::Result<Vec<AppRecord>> {
    let mut combined = Vec::new();
    for source in sources {
        let records = source
            .load()
            .await
            .with_context(|| format!("loading source {}", source.name()))?;
        let loaded = records.len();
        let kept: Vec<AppRecord> = records
            .into_iter()
            .map(AppRecord::normalized)
            .filter(|record| !record.app_name.is_empty() && !record.category.is_empty())
            .collect();
        if kept.len() < loaded {
            warn!(
                source = source.name(),
                dropped = loaded - kept.len(),
                "dropped apps without a name or category"
            );
        }
        info!(source = source.name(), rows = kept.len(), "loaded source");
        combined.extend(kept);
    }
    Ok(combined)
}

fn column_index(
    headers: &StringRecord,
    column: &str,
    path: &Path,
) -> Result<usize, DatasetError> {
    headers
        .iter()
        .position(|header| header.trim() == column)
        .ok_or_else(|| DatasetError::MissingColumn {
            column: column.to_string(),
            path: path.display().to_string(),
        })
}

fn optional_column(headers: &StringRecord, column: &str) -> Option<usize> {
    headers.iter().position(|header| header.trim() == column)
}

fn field<'r>(row: &'r StringRecord, index: Option<usize>) -> &'r str {
    index.and_then(|i| row.get(i)).unwrap_or("").trim()
}

pub fn load_unified_csv(path: &Path) -> anyhow::Result<Vec<AppRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening dataset {}", path.display()))?;
    let headers = reader.headers()?.clone();

    let mut indexes = [0usize; UNIFIED_COLUMNS.len()];
    for (slot, column) in indexes.iter_mut().zip(UNIFIED_COLUMNS) {
        *slot = column_index(&headers, column, path)?;
    }
    let [name_idx, category_idx, rating_idx, reviews_idx, price_idx, updated_idx] = indexes;
    let platform_idx = optional_column(&headers, "platform");

    let mut records = Vec::new();
    for (row_number, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("reading {}", path.display()))?;
        let category = field(&row, Some(category_idx));
        if category.is_empty() {
            warn!(path = %path.display(), row = row_number + 1, "skipping row without a category");
            continue;
        }

        let platform = match field(&row, platform_idx) {
            "" => Platform::Android,
            value => value.parse::<Platform>().unwrap_or_else(|err: String| {
                debug!(%err, "defaulting platform to android");
                Platform::Android
            }),
        };

        records.push(
            AppRecord {
                platform,
                app_name: field(&row, Some(name_idx)).to_string(),
                category: category.to_string(),
                rating: parse_rating(field(&row, Some(rating_idx))),
                review_count: parse_count(field(&row, Some(reviews_idx))),
                price_usd: parse_price(field(&row, Some(price_idx))),
                last_updated: parse_date(field(&row, Some(updated_idx))),
            }
            .normalized(),
        );
    }

    info!(path = %path.display(), rows = records.len(), "loaded unified dataset");
    Ok(records)
}

pub fn load_google_play_csv(path: &Path) -> anyhow::Result<Vec<AppRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening Google Play export {}", path.display()))?;
    let headers = reader.headers()?.clone();

    let name_idx = column_index(&headers, "App", path)?;
    let category_idx = column_index(&headers, "Category", path)?;
    let rating_idx = optional_column(&headers, "Rating");
    let reviews_idx = optional_column(&headers, "Reviews");
    let price_idx = optional_column(&headers, "Price");
    let updated_idx = optional_column(&headers, "Last Updated");

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.with_context(|| format!("reading {}", path.display()))?;
        let app_name = field(&row, Some(name_idx));
        let category = field(&row, Some(category_idx));
        if app_name.is_empty() || category.is_empty() {
            continue;
        }

        records.push(
            AppRecord {
                platform: Platform::Android,
                app_name: app_name.to_string(),
                category: category.to_string(),
                rating: parse_rating(field(&row, rating_idx)),
                review_count: parse_count(field(&row, reviews_idx)),
                price_usd: parse_price(field(&row, price_idx)),
                last_updated: parse_date(field(&row, updated_idx)),
            }
            .normalized(),
        );
    }

    let before = records.len();
    let records = dedupe_by_reviews(records);
    info!(
        path = %path.display(),
        rows = records.len(),
        duplicates = before - records.len(),
        "loaded Google Play export"
    );
    Ok(records)
}

/// Keeps one row per (app_name, category): the one with the most reviews.
pub fn dedupe_by_reviews(mut records: Vec<AppRecord>) -> Vec<AppRecord> {
    records.sort_by(|a, b| b.review_count.cmp(&a.review_count));
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert((record.app_name.clone(), record.category.clone())))
        .collect()
}

pub fn load_app_store_cache(cache_dir: &Path) -> anyhow::Result<Vec<AppRecord>> {
    if !cache_dir.exists() {
        warn!(dir = %cache_dir.display(), "App Store cache directory missing");
        return Ok(Vec::new());
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(cache_dir)
        .with_context(|| format!("listing {}", cache_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut records = Vec::new();
    for path in paths {
        let text =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let payload: JsonValue = match serde_json::from_str(&text) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(path = %path.display(), %err, "skipping unparseable cache file");
                continue;
            }
        };

        match app_store_record(&payload) {
            Some(record) => records.push(record.normalized()),
            None => warn!(path = %path.display(), "cache file has no app name or genre"),
        }
    }

    info!(dir = %cache_dir.display(), rows = records.len(), "loaded App Store cache");
    Ok(records)
}

/// Flattens one App Store lookup payload. Accepts `{"results": [..]}`,
/// `{"data": {..}}` or the bare app object.
pub fn app_store_record(payload: &JsonValue) -> Option<AppRecord> {
    let info = payload
        .get("results")
        .and_then(|results| results.get(0))
        .or_else(|| payload.get("data").filter(|data| data.is_object()))
        .unwrap_or(payload);

    let text = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| info.get(*key).and_then(JsonValue::as_str))
            .filter(|value| !value.trim().is_empty())
            .map(str::to_string)
    };
    let number = |key: &str| info.get(key).and_then(json_number);

    Some(AppRecord {
        platform: Platform::Ios,
        app_name: text(&["trackName", "name"])?,
        category: text(&["primaryGenreName", "genre"])?,
        rating: number("averageUserRating"),
        review_count: number("userRatingCount")
            .filter(|count| *count >= 0.0)
            .map(|count| count as u64)
            .unwrap_or(0),
        price_usd: number("price").unwrap_or(0.0),
        last_updated: text(&["currentVersionReleaseDate"]).and_then(|raw| parse_date(&raw)),
    })
}

fn json_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn write_unified_csv(path: &Path, records: &[AppRecord]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn parse_rating(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Review counts; anything unparseable ("3.0M", "") counts as zero.
pub fn parse_count(raw: &str) -> u64 {
    let cleaned = raw.replace(',', "");
    cleaned
        .parse::<u64>()
        .ok()
        .or_else(|| {
            cleaned
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite() && *value >= 0.0)
                .map(|value| value as u64)
        })
        .unwrap_or(0)
}

pub fn parse_price(raw: &str) -> f64 {
    let cleaned = raw.trim().replace(['$', '₹', ','], "");
    if cleaned.eq_ignore_ascii_case("free") {
        return 0.0;
    }
    let digits: String = cleaned
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse().unwrap_or(0.0)
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp.date_naive());
    }
    if let Ok(timestamp) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(timestamp.date());
    }
    ["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
}
