use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::ingest::DataSource;
use crate::models::{AppRecord, InsightsDocument, Platform};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Inserts or refreshes apps keyed by (platform, app_name, category).
pub async fn upsert_apps(pool: &PgPool, records: &[AppRecord]) -> anyhow::Result<usize> {
    let mut tx = pool.begin().await?;
    let mut written = 0usize;

    for record in records {
        let result = sqlx::query(
            r#"
            INSERT INTO market_intel.apps
            (id, platform, app_name, category, rating, review_count, price_usd, last_updated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (platform, app_name, category) DO UPDATE
            SET rating = EXCLUDED.rating,
                review_count = EXCLUDED.review_count,
                price_usd = EXCLUDED.price_usd,
                last_updated = EXCLUDED.last_updated
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.platform.as_str())
        .bind(&record.app_name)
        .bind(&record.category)
        .bind(record.rating)
        .bind(i64::try_from(record.review_count).unwrap_or(i64::MAX))
        .bind(record.price_usd)
        .bind(record.last_updated)
        .execute(&mut *tx)
        .await?;

        written += result.rows_affected() as usize;
    }

    tx.commit().await?;
    Ok(written)
}

pub async fn fetch_apps(pool: &PgPool) -> anyhow::Result<Vec<AppRecord>> {
    let rows = sqlx::query(
        "SELECT platform, app_name, category, rating, review_count, price_usd, last_updated \
         FROM market_intel.apps \
         ORDER BY platform, category, app_name",
    )
    .fetch_all(pool)
    .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let platform: String = row.get("platform");
        let review_count: i64 = row.get("review_count");
        records.push(
            AppRecord {
                platform: platform.parse::<Platform>().map_err(anyhow::Error::msg)?,
                app_name: row.get("app_name"),
                category: row.get("category"),
                rating: row.get("rating"),
                review_count: u64::try_from(review_count).unwrap_or(0),
                price_usd: row.get("price_usd"),
                last_updated: row.get("last_updated"),
            }
            .normalized(),
        );
    }

    Ok(records)
}

pub async fn store_insights(pool: &PgPool, document: &InsightsDocument) -> anyhow::Result<usize> {
    let mut tx = pool.begin().await?;

    for insight in &document.insights {
        sqlx::query(
            r#"
            INSERT INTO market_intel.insights
            (run_id, insight_id, insight_type, category, metrics, narrative, confidence, generated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (run_id, insight_id) DO NOTHING
            "#,
        )
        .bind(document.run_id)
        .bind(&insight.insight_id)
        .bind(&insight.kind)
        .bind(&insight.category)
        .bind(serde_json::to_value(&insight.metrics)?)
        .bind(serde_json::to_value(&insight.llm)?)
        .bind(insight.confidence)
        .bind(document.generated_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(document.insights.len())
}

/// The `market_intel.apps` table as a dataset.
pub struct PgSource {
    pool: PgPool,
}

impl PgSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DataSource for PgSource {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn load(&self) -> anyhow::Result<Vec<AppRecord>> {
        fetch_apps(&self.pool).await
    }
}
