use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

use crate::ingest::{app_store_record, DataSource};
use crate::models::AppRecord;

pub const DEFAULT_RAPIDAPI_HOST: &str = "apple-app-store-scraper.p.rapidapi.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(20),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct AppStoreConfig {
    pub api_key: String,
    pub host: String,
    pub country: String,
    pub cache_dir: PathBuf,
    pub timeout: Duration,
    pub pacing: Duration,
    pub backoff: BackoffPolicy,
}

impl AppStoreConfig {
    pub fn new(api_key: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_key: api_key.into(),
            host: DEFAULT_RAPIDAPI_HOST.to_string(),
            country: "us".to_string(),
            cache_dir: cache_dir.into(),
            timeout: Duration::from_secs(15),
            pacing: Duration::from_millis(250),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("API key not subscribed for this API (403) for app {app_id}")]
    NotSubscribed { app_id: String },
    #[error("http status {status} for app {app_id}")]
    HttpStatus { status: u16, app_id: String },
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid JSON for app {app_id}: {source}")]
    Decode {
        app_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cache I/O for app {app_id}: {source}")]
    Cache {
        app_id: String,
        #[source]
        source: std::io::Error,
    },
}

/// RapidAPI App Store scraper client with an on-disk response cache.
#[derive(Debug)]
pub struct AppStoreClient {
    client: reqwest::Client,
    config: AppStoreConfig,
}

impl AppStoreClient {
    pub fn new(config: AppStoreConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("building reqwest client")?;
        Ok(Self { client, config })
    }

    pub fn cache_path(&self, app_id: &str) -> PathBuf {
        cache_path(&self.config.cache_dir, app_id)
    }

    /// Cached lookup: a non-empty cache file wins, otherwise the API is hit,
    /// the payload written to the cache and the next request paced.
    pub async fn cached_fetch(&self, app_id: &str) -> Result<JsonValue, FetchError> {
        let path = self.cache_path(app_id);
        if let Some(payload) = read_cache(&path, app_id).await? {
            return Ok(payload);
        }

        let payload = self.fetch_app_by_id(app_id).await?;
        tokio::fs::create_dir_all(&self.config.cache_dir)
            .await
            .map_err(|source| FetchError::Cache {
                app_id: app_id.to_string(),
                source,
            })?;
        tokio::fs::write(&path, payload.to_string())
            .await
            .map_err(|source| FetchError::Cache {
                app_id: app_id.to_string(),
                source,
            })?;
        tokio::time::sleep(self.config.pacing).await;
        Ok(payload)
    }

    pub async fn fetch_app_by_id(&self, app_id: &str) -> Result<JsonValue, FetchError> {
        let span = info_span!("app_store_fetch", app_id);
        self.fetch_with_retry(app_id).instrument(span).await
    }

    async fn fetch_with_retry(&self, app_id: &str) -> Result<JsonValue, FetchError> {
        let url = format!("https://{}/v1/appstore", self.config.host);
        let mut attempt = 0;

        loop {
            let result = self
                .client
                .get(&url)
                .header("x-rapidapi-host", &self.config.host)
                .header("x-rapidapi-key", &self.config.api_key)
                .query(&[("appid", app_id), ("country", self.config.country.as_str())])
                .send()
                .await;

            let reason = match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let body = resp.bytes().await?;
                        return serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
                            app_id: app_id.to_string(),
                            source,
                        });
                    }
                    if status == StatusCode::FORBIDDEN {
                        return Err(FetchError::NotSubscribed {
                            app_id: app_id.to_string(),
                        });
                    }
                    if classify_status(status) == RetryDisposition::NonRetryable
                        || attempt >= self.config.backoff.max_retries
                    {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            app_id: app_id.to_string(),
                        });
                    }
                    format!("status {status}")
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::NonRetryable
                        || attempt >= self.config.backoff.max_retries
                    {
                        return Err(FetchError::Request(err));
                    }
                    err.to_string()
                }
            };

            let delay = self.config.backoff.delay_for_attempt(attempt);
            warn!(
                attempt,
                %reason,
                delay_ms = delay.as_millis() as u64,
                "retrying App Store request"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Fetches each id in turn; failures are logged and skipped.
    pub async fn bulk_fetch(&self, app_ids: &[String]) -> BTreeMap<String, JsonValue> {
        let mut results = BTreeMap::new();
        for app_id in app_ids {
            match self.cached_fetch(app_id).await {
                Ok(payload) => {
                    info!(app_id = %app_id, "fetched app");
                    results.insert(app_id.clone(), payload);
                }
                Err(err) => warn!(app_id = %app_id, error = %err, "failed to fetch app"),
            }
        }
        results
    }
}

pub fn cache_path(cache_dir: &Path, app_id: &str) -> PathBuf {
    cache_dir.join(format!("{app_id}.json"))
}

async fn read_cache(path: &Path, app_id: &str) -> Result<Option<JsonValue>, FetchError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(FetchError::Cache {
                app_id: app_id.to_string(),
                source,
            })
        }
    };
    if bytes.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| FetchError::Decode {
            app_id: app_id.to_string(),
            source,
        })
}

/// Live App Store lookups for a fixed list of ids.
pub struct AppStoreApiSource {
    client: AppStoreClient,
    app_ids: Vec<String>,
}

impl AppStoreApiSource {
    pub fn new(client: AppStoreClient, app_ids: Vec<String>) -> Self {
        Self { client, app_ids }
    }
}

#[async_trait]
impl DataSource for AppStoreApiSource {
    fn name(&self) -> &str {
        "app-store-api"
    }

    async fn load(&self) -> anyhow::Result<Vec<AppRecord>> {
        let payloads = self.client.bulk_fetch(&self.app_ids).await;
        Ok(payloads
            .iter()
            .filter_map(|(app_id, payload)| {
                let record = app_store_record(payload);
                if record.is_none() {
                    warn!(app_id = %app_id, "payload has no app name or genre");
                }
                record
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(16));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(20));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(20));
    }

    #[test]
    fn rate_limits_and_server_errors_retry() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            RetryDisposition::NonRetryable
        );
    }

    #[tokio::test]
    async fn cached_payload_skips_the_network() {
        let dir = tempdir().expect("tempdir");
        let payload = serde_json::json!({ "results": [{ "trackName": "Netflix", "primaryGenreName": "Entertainment" }] });
        std::fs::write(cache_path(dir.path(), "284910350"), payload.to_string())
            .expect("seed cache");

        let mut config = AppStoreConfig::new("test-key", dir.path());
        // unroutable host: any network attempt would fail the test
        config.host = "127.0.0.1:9".to_string();
        config.backoff.max_retries = 0;
        let client = AppStoreClient::new(config).expect("client");

        let fetched = client.cached_fetch("284910350").await.expect("cache hit");
        assert_eq!(fetched, payload);
    }

    #[tokio::test]
    async fn bulk_fetch_skips_failures() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(
            cache_path(dir.path(), "1"),
            r#"{"trackName":"Go","primaryGenreName":"Games"}"#,
        )
        .expect("seed cache");
        std::fs::write(cache_path(dir.path(), "2"), "{broken").expect("seed junk");

        let mut config = AppStoreConfig::new("test-key", dir.path());
        config.host = "127.0.0.1:9".to_string();
        config.backoff.max_retries = 0;
        config.timeout = Duration::from_millis(200);
        let source = AppStoreApiSource::new(
            AppStoreClient::new(config).expect("client"),
            vec!["1".to_string(), "2".to_string()],
        );

        let records = source.load().await.expect("load");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].app_name, "Go");
    }
}
