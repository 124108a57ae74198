use std::path::PathBuf;

use anyhow::Context;
use chrono::Local;
use clap::{ArgGroup, Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;

use app_market_insights::config::Settings;
use app_market_insights::fetch::{AppStoreApiSource, AppStoreClient};
use app_market_insights::ingest::{
    AppStoreCacheSource, DataSource, GooglePlayCsvSource, UnifiedCsvSource,
};
use app_market_insights::insights::InsightGenerator;
use app_market_insights::models::AppRecord;
use app_market_insights::narrative::{DisabledNarrator, NarrativeGenerator, OpenAiNarrator};
use app_market_insights::{analytics, db, ingest, insights, report};

#[derive(Parser)]
#[command(name = "market-insights")]
#[command(about = "App marketplace category insights with confidence scoring", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("source")
        .args(["dataset", "from_db"])
        .required(true)
        .multiple(false)
))]
struct DatasetArgs {
    /// Unified CSV produced by `unify`
    #[arg(long)]
    dataset: Option<PathBuf>,
    /// Read apps from Postgres instead of a CSV
    #[arg(long)]
    from_db: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Fetch App Store apps into the response cache
    Fetch {
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<String>,
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
    /// Merge the Google Play export and App Store apps into one CSV
    Unify {
        #[arg(long)]
        play_csv: PathBuf,
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// Look these App Store ids up (through the cache) instead of reading
        /// every cached payload
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
        #[arg(long, default_value = "outputs/clean_combined_apps.csv")]
        out: PathBuf,
        /// Also upsert the unified apps into Postgres
        #[arg(long)]
        store_db: bool,
    },
    /// Print per-category statistics
    Summary {
        #[command(flatten)]
        source: DatasetArgs,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Rank categories by recent update activity
    Growth {
        #[command(flatten)]
        source: DatasetArgs,
        #[arg(long, default_value_t = analytics::DEFAULT_GROWTH_WINDOW_DAYS)]
        window_days: i64,
    },
    /// Score categories and write the insights JSON
    Insights {
        #[command(flatten)]
        source: DatasetArgs,
        #[arg(long, default_value_t = insights::DEFAULT_TOP_CATEGORIES)]
        top: usize,
        #[arg(long, default_value = "outputs/insights.json")]
        out: PathBuf,
        /// Skip the text-generation service
        #[arg(long)]
        no_narrative: bool,
        /// Also persist the insights to Postgres
        #[arg(long)]
        store_db: bool,
    },
    /// Render a markdown report from an insights JSON
    Report {
        #[arg(long, default_value = "outputs/insights.json")]
        insights: PathBuf,
        #[arg(long, default_value = "outputs/report.md")]
        out: PathBuf,
        #[arg(long, default_value_t = report::DEFAULT_REPORT_INSIGHTS)]
        limit: usize,
    },
    /// Show one category's insight and top apps
    Show {
        #[arg(long)]
        dataset: PathBuf,
        #[arg(long, default_value = "outputs/insights.json")]
        insights: PathBuf,
        #[arg(long)]
        category: String,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn connect(settings: &Settings) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(settings.database_url()?)
        .await
        .context("failed to connect to Postgres")
}

async fn load_dataset(settings: &Settings, args: &DatasetArgs) -> anyhow::Result<Vec<AppRecord>> {
    let source: Box<dyn DataSource> = match &args.dataset {
        Some(path) => Box::new(UnifiedCsvSource::new(path)),
        None => Box::new(db::PgSource::new(connect(settings).await?)),
    };
    source
        .load()
        .await
        .with_context(|| format!("loading dataset from {}", source.name()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    match cli.command {
        Commands::InitDb => {
            let pool = connect(&settings).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Fetch { ids, cache_dir } => {
            let client = AppStoreClient::new(settings.app_store_config(cache_dir)?)?;
            let fetched = client.bulk_fetch(&ids).await;
            println!("Fetched {} of {} apps into the cache.", fetched.len(), ids.len());
        }
        Commands::Unify {
            play_csv,
            cache_dir,
            ids,
            out,
            store_db,
        } => {
            let play = GooglePlayCsvSource::new(&play_csv);
            let app_store: Box<dyn DataSource> = if ids.is_empty() {
                Box::new(AppStoreCacheSource::new(
                    cache_dir.unwrap_or_else(|| settings.cache_dir.clone()),
                ))
            } else {
                let client = AppStoreClient::new(settings.app_store_config(cache_dir)?)?;
                Box::new(AppStoreApiSource::new(client, ids))
            };
            let records = ingest::unify(&[&play, app_store.as_ref()]).await?;
            ingest::write_unified_csv(&out, &records)?;
            println!("Wrote {} apps to {}.", records.len(), out.display());

            if store_db {
                let pool = connect(&settings).await?;
                let written = db::upsert_apps(&pool, &records).await?;
                println!("Upserted {written} apps into Postgres.");
            }
        }
        Commands::Summary { source, limit } => {
            let records = load_dataset(&settings, &source).await?;
            let summaries = analytics::category_summary(&records);
            if summaries.is_empty() {
                println!("No apps in the dataset.");
                return Ok(());
            }

            println!("Top categories by app count:");
            for summary in summaries.iter().take(limit) {
                let avg_rating = summary
                    .avg_rating
                    .map(|rating| format!("{rating:.2}"))
                    .unwrap_or_else(|| "n/a".to_string());
                println!(
                    "- {}: {} apps, avg rating {}, median price {:.2}, {} reviews",
                    summary.category,
                    summary.apps,
                    avg_rating,
                    summary.median_price,
                    summary.total_reviews
                );
            }
        }
        Commands::Growth {
            source,
            window_days,
        } => {
            let records = load_dataset(&settings, &source).await?;
            let today = Local::now().date_naive();
            let rows = analytics::detect_growth(&records, today, window_days);
            print!("{}", report::render_growth(&rows, window_days));
        }
        Commands::Insights {
            source,
            top,
            out,
            no_narrative,
            store_db,
        } => {
            let records = load_dataset(&settings, &source).await?;
            let narrator: Box<dyn NarrativeGenerator> = if no_narrative {
                Box::new(DisabledNarrator)
            } else {
                Box::new(OpenAiNarrator::new(settings.openai_config()?)?)
            };

            let today = Local::now().date_naive();
            let generated = InsightGenerator::new(narrator.as_ref())
                .with_weights(settings.weights)
                .with_top_categories(top)
                .generate(&records, today)
                .await;
            let document = insights::build_document(generated);
            insights::write_document(&out, &document)?;
            info!(run_id = %document.run_id, path = %out.display(), "saved insights");
            println!(
                "Saved {} insights to {}.",
                document.insights.len(),
                out.display()
            );

            if store_db {
                let pool = connect(&settings).await?;
                let stored = db::store_insights(&pool, &document).await?;
                println!("Stored {stored} insights for run {}.", document.run_id);
            }
        }
        Commands::Report {
            insights: insights_path,
            out,
            limit,
        } => {
            let document = insights::read_document(&insights_path)?;
            let markdown = report::build_report(&document, limit);
            if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&out, markdown)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Show {
            dataset,
            insights: insights_path,
            category,
        } => {
            let records = ingest::load_unified_csv(&dataset)?;
            let document = insights::read_document(&insights_path)?;
            let category = category.trim().to_lowercase();
            let insight = document
                .insights
                .iter()
                .find(|insight| insight.category == category);
            print!("{}", report::render_category(&category, insight, &records, 10));
        }
    }

    Ok(())
}
