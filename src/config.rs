use std::path::PathBuf;

use anyhow::Context;

use crate::confidence::ScoreWeights;
use crate::fetch::{AppStoreConfig, DEFAULT_RAPIDAPI_HOST};
use crate::narrative::{OpenAiConfig, DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL};

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub rapidapi_key: Option<String>,
    pub rapidapi_host: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub cache_dir: PathBuf,
    pub weights: ScoreWeights,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let defaults = ScoreWeights::default();
        let weight = |key: &str, default: f64| -> anyhow::Result<f64> {
            match non_empty(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .with_context(|| format!("{key} must be a number, got '{raw}'")),
                None => Ok(default),
            }
        };
        let weights = ScoreWeights {
            n: weight("SCORE_WEIGHT_N", defaults.n)?,
            p: weight("SCORE_WEIGHT_P", defaults.p)?,
            e: weight("SCORE_WEIGHT_E", defaults.e)?,
            freshness: weight("SCORE_WEIGHT_FRESHNESS", defaults.freshness)?,
        }
        .validate()?;

        Ok(Self {
            database_url: non_empty("DATABASE_URL"),
            rapidapi_key: non_empty("RAPIDAPI_KEY"),
            rapidapi_host: non_empty("RAPIDAPI_HOST")
                .unwrap_or_else(|| DEFAULT_RAPIDAPI_HOST.to_string()),
            openai_api_key: non_empty("OPENAI_API_KEY"),
            openai_base_url: non_empty("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            openai_model: non_empty("OPENAI_MODEL")
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            cache_dir: non_empty("APP_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/cache")),
            weights,
        })
    }

    pub fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to a Postgres instance")
    }

    pub fn app_store_config(&self, cache_dir: Option<PathBuf>) -> anyhow::Result<AppStoreConfig> {
        let key = self
            .rapidapi_key
            .as_deref()
            .context("RAPIDAPI_KEY not found in environment variables")?;
        let mut config = AppStoreConfig::new(key, cache_dir.unwrap_or_else(|| self.cache_dir.clone()));
        config.host = self.rapidapi_host.clone();
        Ok(config)
    }

    pub fn openai_config(&self) -> anyhow::Result<OpenAiConfig> {
        let key = self
            .openai_api_key
            .as_deref()
            .context("OPENAI_API_KEY not found in environment variables (use --no-narrative to skip)")?;
        let mut config = OpenAiConfig::new(key);
        config.base_url = self.openai_base_url.clone();
        config.model = self.openai_model.clone();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> anyhow::Result<Settings> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let settings = settings(&[]).expect("defaults");
        assert_eq!(settings.weights, ScoreWeights::default());
        assert_eq!(settings.rapidapi_host, DEFAULT_RAPIDAPI_HOST);
        assert_eq!(settings.openai_model, "gpt-4o-mini");
        assert_eq!(settings.cache_dir, PathBuf::from("data/cache"));
        assert!(settings.database_url().is_err());
        assert!(settings.openai_config().is_err());
    }

    #[test]
    fn weights_can_be_overridden() {
        let settings = settings(&[
            ("SCORE_WEIGHT_N", "0.4"),
            ("SCORE_WEIGHT_P", "0.1"),
            ("SCORE_WEIGHT_E", "0.3"),
            ("SCORE_WEIGHT_FRESHNESS", "0.2"),
        ])
        .expect("valid weights");
        assert_eq!(settings.weights.n, 0.4);
        assert_eq!(settings.weights.p, 0.1);
    }

    #[test]
    fn unbalanced_weights_are_rejected() {
        assert!(settings(&[("SCORE_WEIGHT_N", "0.9")]).is_err());
        assert!(settings(&[("SCORE_WEIGHT_E", "lots")]).is_err());
    }

    #[test]
    fn api_configs_pick_up_keys() {
        let settings = settings(&[
            ("RAPIDAPI_KEY", "rapid"),
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_BASE_URL", "http://localhost:8080/v1"),
            ("APP_CACHE_DIR", "/tmp/apps"),
        ])
        .expect("settings");

        let store = settings.app_store_config(None).expect("store config");
        assert_eq!(store.api_key, "rapid");
        assert_eq!(store.cache_dir, PathBuf::from("/tmp/apps"));

        let openai = settings.openai_config().expect("openai config");
        assert_eq!(openai.base_url, "http://localhost:8080/v1");
        assert_eq!(openai.api_key, "sk-test");
    }
}
