use std::fs;
use std::path::Path;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::analytics::{
    all_ratings, category_ratings, category_summary, modal_category, significance_of_rating_diff,
};
use crate::confidence::{cohen_d, ScoreWeights};
use crate::models::{AppRecord, InsightRecord, InsightsDocument, Narrative};
use crate::narrative::{build_prompt, NarrativeGenerator};

pub const DEFAULT_TOP_CATEGORIES: usize = 10;
const MIN_RATED_APPS: usize = 2;

/// Drives the per-category scoring loop for one run.
pub struct InsightGenerator<'a> {
    narrator: &'a dyn NarrativeGenerator,
    weights: ScoreWeights,
    top_categories: usize,
}

impl<'a> InsightGenerator<'a> {
    pub fn new(narrator: &'a dyn NarrativeGenerator) -> Self {
        Self {
            narrator,
            weights: ScoreWeights::default(),
            top_categories: DEFAULT_TOP_CATEGORIES,
        }
    }

    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_top_categories(mut self, top_categories: usize) -> Self {
        self.top_categories = top_categories;
        self
    }

    /// One insight per qualifying category, in summary order. Categories or a
    /// reference group with fewer than two ratings are skipped; narrative
    /// failures are attached as error payloads.
    pub async fn generate(&self, records: &[AppRecord], today: NaiveDate) -> Vec<InsightRecord> {
        let summaries = category_summary(records);
        let Some(reference) = modal_category(records) else {
            info!("empty dataset, no insights generated");
            return Vec::new();
        };

        let global_ratings = all_ratings(records);
        let reference_rated = category_ratings(records, &reference).len();
        info!(
            rows = records.len(),
            categories = summaries.len(),
            reference = %reference,
            "generating insights"
        );

        let mut insights = Vec::new();
        for summary in summaries.into_iter().take(self.top_categories) {
            let category = summary.category.clone();
            let ratings = category_ratings(records, &category);
            if ratings.len() < MIN_RATED_APPS {
                info!(category = %category, rated = ratings.len(), "skipping category with too few ratings");
                continue;
            }
            if reference_rated < MIN_RATED_APPS {
                info!(category = %category, reference = %reference, "skipping comparison, reference has too few ratings");
                continue;
            }

            let effect_size = cohen_d(&ratings, &global_ratings);
            let significance = significance_of_rating_diff(records, &category, &reference);
            let freshness_days = freshness_days(records, &category, today);
            let confidence = self.weights.score(
                ratings.len() as f64,
                significance.p_value,
                effect_size,
                freshness_days as f64,
            );

            let llm = match self.narrator.generate(&build_prompt(&summary)).await {
                Ok(narrative) => narrative,
                Err(err) => {
                    warn!(category = %category, error = %err, "narrative generation failed");
                    Narrative::Error {
                        error: err.to_string(),
                    }
                }
            };

            info!(
                category = %category,
                n = ratings.len(),
                p_value = significance.p_value,
                effect_size,
                freshness_days,
                confidence,
                "scored category"
            );

            insights.push(InsightRecord {
                insight_id: format!("cat_{category}"),
                kind: "category_profile".to_string(),
                category,
                metrics: summary,
                llm,
                confidence,
            });
        }

        insights
    }
}

/// Days since the newest update in the category; 0 when nothing is dated.
pub fn freshness_days(records: &[AppRecord], category: &str, today: NaiveDate) -> i64 {
    records
        .iter()
        .filter(|record| record.category == category)
        .filter_map(|record| record.last_updated)
        .max()
        .map(|latest| (today - latest).num_days())
        .unwrap_or(0)
}

pub fn build_document(insights: Vec<InsightRecord>) -> InsightsDocument {
    InsightsDocument {
        run_id: Uuid::new_v4(),
        generated_at: Utc::now(),
        insights,
    }
}

pub fn write_document(path: &Path, document: &InsightsDocument) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(document)?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

pub fn read_document(path: &Path) -> anyhow::Result<InsightsDocument> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Duration;
    use tempfile::tempdir;

    use crate::models::{Platform, StructuredNarrative};
    use crate::narrative::{DisabledNarrator, NarrativeError};

    struct ScriptedNarrator {
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedNarrator {
        fn new() -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NarrativeGenerator for ScriptedNarrator {
        async fn generate(&self, prompt: &str) -> Result<Narrative, NarrativeError> {
            let mut prompts = self.prompts.lock().expect("lock");
            prompts.push(prompt.to_string());
            if prompts.len() == 1 {
                Ok(Narrative::Structured(StructuredNarrative {
                    recommendations: vec!["Ship a widget".to_string()],
                    hypothesis: "Users want glanceable data".to_string(),
                    product_idea: "Widget pack".to_string(),
                }))
            } else {
                Err(NarrativeError::ResponseParse("quota exceeded".to_string()))
            }
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).expect("valid date")
    }

    fn app(name: &str, category: &str, rating: Option<f64>, days_old: Option<i64>) -> AppRecord {
        AppRecord {
            platform: Platform::Android,
            app_name: name.to_string(),
            category: category.to_string(),
            rating,
            review_count: 50,
            price_usd: 0.0,
            last_updated: days_old.map(|days| today() - Duration::days(days)),
        }
    }

    fn dataset() -> Vec<AppRecord> {
        vec![
            app("Chess", "games", Some(4.6), Some(3)),
            app("Go", "games", Some(4.7), Some(40)),
            app("Sudoku", "games", Some(4.4), None),
            app("Tetris", "games", Some(4.8), Some(10)),
            app("Notes", "tools", Some(3.1), None),
            app("Timer", "tools", Some(3.4), None),
            app("Clock", "tools", None, None),
            app("Solo", "weather", Some(4.0), Some(5)),
        ]
    }

    #[tokio::test]
    async fn insights_follow_summary_order_and_skip_sparse_categories() {
        let narrator = ScriptedNarrator::new();
        let insights = InsightGenerator::new(&narrator)
            .generate(&dataset(), today())
            .await;

        let ids: Vec<&str> = insights.iter().map(|i| i.insight_id.as_str()).collect();
        assert_eq!(ids, vec!["cat_games", "cat_tools"]);
        assert!(insights.iter().all(|i| i.kind == "category_profile"));
        assert!(insights
            .iter()
            .all(|i| (0.0..=1.0).contains(&i.confidence)));

        assert!(matches!(insights[0].llm, Narrative::Structured(_)));
        assert_eq!(
            insights[1].llm,
            Narrative::Error {
                error: "response parse error: quota exceeded".to_string()
            }
        );
        assert_eq!(narrator.prompts.lock().expect("lock").len(), 2);
    }

    #[tokio::test]
    async fn failing_narrator_does_not_abort_the_run() {
        let insights = InsightGenerator::new(&DisabledNarrator)
            .generate(&dataset(), today())
            .await;
        assert_eq!(insights.len(), 2);
        assert!(insights
            .iter()
            .all(|i| matches!(i.llm, Narrative::Error { .. })));
    }

    #[tokio::test]
    async fn top_categories_limit_applies_before_skipping() {
        let insights = InsightGenerator::new(&DisabledNarrator)
            .with_top_categories(1)
            .generate(&dataset(), today())
            .await;
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].category, "games");
    }

    #[tokio::test]
    async fn sparse_reference_skips_everything() {
        let records = vec![
            app("A", "tools", Some(4.0), None),
            app("B", "tools", None, None),
            app("C", "tools", None, None),
            app("D", "games", Some(4.0), None),
            app("E", "games", Some(3.0), None),
        ];
        let insights = InsightGenerator::new(&DisabledNarrator)
            .generate(&records, today())
            .await;
        assert!(insights.is_empty());
    }

    #[tokio::test]
    async fn custom_weights_flow_into_confidence() {
        let weights = ScoreWeights {
            n: 0.0,
            p: 0.0,
            e: 0.0,
            freshness: 1.0,
        };
        let insights = InsightGenerator::new(&DisabledNarrator)
            .with_weights(weights)
            .generate(&dataset(), today())
            .await;
        // games was updated 3 days ago, tools has no dates
        assert_eq!(insights[0].confidence, 0.992);
        assert_eq!(insights[1].confidence, 1.0);
    }

    #[test]
    fn freshness_uses_newest_update() {
        let records = dataset();
        assert_eq!(freshness_days(&records, "games", today()), 3);
        assert_eq!(freshness_days(&records, "tools", today()), 0);
        assert_eq!(freshness_days(&records, "missing", today()), 0);
    }

    #[tokio::test]
    async fn documents_round_trip_through_json() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("outputs").join("insights.json");
        let insights = InsightGenerator::new(&DisabledNarrator)
            .generate(&dataset(), today())
            .await;
        let document = build_document(insights);

        write_document(&path, &document).expect("write");
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(raw["insights"][0]["type"], "category_profile");
        assert_eq!(raw["insights"][0]["insight_id"], "cat_games");

        let loaded = read_document(&path).expect("read back");
        assert_eq!(loaded.insights, document.insights);
        assert_eq!(loaded.run_id, document.run_id);
    }
}
