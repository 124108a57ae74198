use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "android" | "google_play" | "play" => Ok(Platform::Android),
            "ios" | "appstore" | "app_store" => Ok(Platform::Ios),
            other => Err(format!("unknown platform '{other}'")),
        }
    }
}

/// One row of the unified dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppRecord {
    pub platform: Platform,
    pub app_name: String,
    pub category: String,
    pub rating: Option<f64>,
    pub review_count: u64,
    pub price_usd: f64,
    pub last_updated: Option<NaiveDate>,
}

impl AppRecord {
    /// Applies the unified-schema rules: trimmed names, lowercased categories,
    /// ratings outside [0, 5] dropped, negative prices clamped to zero.
    pub fn normalized(mut self) -> Self {
        self.app_name = self.app_name.trim().to_string();
        self.category = self.category.trim().to_lowercase();
        self.rating = self
            .rating
            .filter(|value| value.is_finite() && (0.0..=5.0).contains(value));
        if !self.price_usd.is_finite() || self.price_usd < 0.0 {
            self.price_usd = 0.0;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub category: String,
    pub apps: usize,
    pub avg_rating: Option<f64>,
    pub median_price: f64,
    pub total_reviews: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GrowthRow {
    pub category: String,
    pub recent_count: usize,
    pub total_count: usize,
    pub recent_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignificanceResult {
    pub t_statistic: f64,
    pub p_value: f64,
    pub n_a: usize,
    pub n_b: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredNarrative {
    pub recommendations: Vec<String>,
    pub hypothesis: String,
    pub product_idea: String,
}

/// Narrative payload attached to an insight. The shape is owned by the
/// text generator; the core only distinguishes the three variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Narrative {
    Structured(StructuredNarrative),
    Raw { raw: String },
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightRecord {
    pub insight_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub category: String,
    pub metrics: CategorySummary,
    pub llm: Narrative,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightsDocument {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub insights: Vec<InsightRecord>,
}
