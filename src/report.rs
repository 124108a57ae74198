use std::fmt::Write;

use crate::models::{AppRecord, GrowthRow, InsightRecord, InsightsDocument, Narrative};

pub const DEFAULT_REPORT_INSIGHTS: usize = 6;

pub fn build_report(document: &InsightsDocument, limit: usize) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Executive Market Intelligence Report");
    let _ = writeln!(
        output,
        "Generated: {}",
        document.generated_at.format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Categories");

    if document.insights.is_empty() {
        let _ = writeln!(output, "No categories had enough rated apps for an insight.");
        return output;
    }

    for (index, insight) in document.insights.iter().take(limit).enumerate() {
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "### {}. {} (confidence: {:.3})",
            index + 1,
            insight.category,
            insight.confidence
        );
        write_metrics(&mut output, insight);
        let _ = writeln!(output);
        let _ = writeln!(output, "**Recommendations**");
        write_recommendations(&mut output, &insight.llm);
    }

    output
}

fn write_metrics(output: &mut String, insight: &InsightRecord) {
    let metrics = &insight.metrics;
    let _ = writeln!(output, "- Apps: {}", metrics.apps);
    match metrics.avg_rating {
        Some(rating) => {
            let _ = writeln!(output, "- Avg rating: {rating:.2}");
        }
        None => {
            let _ = writeln!(output, "- Avg rating: n/a");
        }
    }
    let _ = writeln!(output, "- Median price: {:.2}", metrics.median_price);
    let _ = writeln!(output, "- Total reviews: {}", metrics.total_reviews);
}

fn write_recommendations(output: &mut String, narrative: &Narrative) {
    match narrative {
        Narrative::Structured(structured) if !structured.recommendations.is_empty() => {
            for recommendation in &structured.recommendations {
                let _ = writeln!(output, "- {recommendation}");
            }
        }
        Narrative::Structured(_) => {
            let _ = writeln!(output, "- See narrative content");
        }
        Narrative::Raw { raw } => {
            let _ = writeln!(output, "- {}", raw.trim());
        }
        Narrative::Error { error } => {
            let _ = writeln!(output, "- Narrative unavailable ({error})");
        }
    }
}

pub fn render_growth(rows: &[GrowthRow], window_days: i64) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Recent activity (last {window_days} days):");
    if rows.is_empty() {
        let _ = writeln!(output, "No apps in the dataset.");
    }
    for row in rows {
        let _ = writeln!(
            output,
            "- {}: {} of {} apps updated (ratio {:.3})",
            row.category, row.recent_count, row.total_count, row.recent_ratio
        );
    }
    output
}

/// Terminal view of one category: metrics, narrative and the most reviewed apps.
pub fn render_category(
    category: &str,
    insight: Option<&InsightRecord>,
    records: &[AppRecord],
    top_apps: usize,
) -> String {
    let mut output = String::new();

    match insight {
        Some(insight) => {
            let _ = writeln!(
                output,
                "Category: {} (confidence {:.3})",
                insight.category, insight.confidence
            );
            let _ = writeln!(output);
            let _ = writeln!(output, "Metrics");
            write_metrics(&mut output, insight);
            let _ = writeln!(output);
            let _ = writeln!(output, "Narrative");
            match &insight.llm {
                Narrative::Structured(structured) => {
                    let _ = writeln!(output, "- Hypothesis: {}", structured.hypothesis);
                    let _ = writeln!(output, "- Product idea: {}", structured.product_idea);
                    write_recommendations(&mut output, &insight.llm);
                }
                other => write_recommendations(&mut output, other),
            }
        }
        None => {
            let _ = writeln!(output, "No insight for category {category}.");
        }
    }

    let mut apps: Vec<&AppRecord> = records
        .iter()
        .filter(|record| record.category == category)
        .collect();
    apps.sort_by(|a, b| b.review_count.cmp(&a.review_count));

    let _ = writeln!(output);
    let _ = writeln!(output, "Top apps");
    if apps.is_empty() {
        let _ = writeln!(output, "No apps recorded for this category.");
    }
    for app in apps.iter().take(top_apps) {
        let rating = app
            .rating
            .map(|rating| format!("{rating:.2}"))
            .unwrap_or_else(|| "n/a".to_string());
        let _ = writeln!(
            output,
            "- {} ({}) rating {} reviews {} price ${:.2}",
            app.app_name, app.platform, rating, app.review_count, app.price_usd
        );
    }

    output
}
