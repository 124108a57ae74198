//! Category insights for mobile app marketplaces: ingestion, per-category
//! statistics, confidence scoring and reporting.

pub mod analytics;
pub mod confidence;
pub mod config;
pub mod db;
pub mod fetch;
pub mod ingest;
pub mod insights;
pub mod models;
pub mod narrative;
pub mod report;
