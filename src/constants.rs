//! Artifact and table names shared by the pipeline, the database loader and the server.

// Artifact file names inside the output directory
pub const PROCESSED_FILE: &str = "processed.csv";
pub const YEARLY_FILE: &str = "yearly_production.csv";
pub const DECADE_FILE: &str = "decade_production.csv";
pub const STATS_FILE: &str = "food_production_statistics.csv";
pub const TOP_PRODUCERS_FILE: &str = "top_producers.json";
pub const RUN_REPORT_FILE: &str = "run_report.json";

/// Metrics snapshot left behind by batch commands.
pub const METRICS_SNAPSHOT_FILE: &str = "logs/cropstats.prom";

// Relational table names
pub const PROCESSED_TABLE: &str = "processed_data";
pub const YEARLY_TABLE: &str = "yearly_production";
pub const DECADE_TABLE: &str = "decade_production";
pub const STATS_TABLE: &str = "food_stats";
pub const TOP_PRODUCERS_TABLE: &str = "top_producers";
pub const PRODUCTION_COLUMNS_TABLE: &str = "production_columns";
pub const DATASET_META_TABLE: &str = "dataset_meta";
pub const PIPELINE_RUNS_TABLE: &str = "pipeline_runs";

// Column names introduced by the aggregator
pub const DECADE_COLUMN: &str = "decade";
pub const STATISTIC_COLUMN: &str = "statistic";

/// Substring that marks a column as a production metric.
pub const PRODUCTION_MARKER: &str = "production";
/// Suffix stripped from metric names in dashboard-facing payloads.
pub const PRODUCTION_SUFFIX: &str = "_Production";

pub const ENTITY_MARKER: &str = "entity";
pub const YEAR_MARKER: &str = "year";

/// Earliest year accepted by the normalizer.
pub const MIN_YEAR: i32 = 1900;

pub const DEFAULT_TOP_N: usize = 10;
pub const DEFAULT_LOWER_PERCENTILE: f64 = 0.01;
pub const DEFAULT_UPPER_PERCENTILE: f64 = 0.99;

/// Crops shown in the stacked chart when present in the dataset.
pub const STACKED_PRODUCTS: [&str; 3] = ["Maize_Production", "Rice_Production", "Wheat_Production"];

/// Strip the production suffix for display keys.
pub fn display_name(metric: &str) -> &str {
    metric.strip_suffix(PRODUCTION_SUFFIX).unwrap_or(metric)
}
