use crate::pipeline::clean::ColumnBounds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary of one pipeline run, published next to the artifacts.
///
/// `production_columns` is the allowlist the serving layer checks metric names against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub source: String,
    /// Data rows read from the source file.
    pub loaded_rows: usize,
    pub invalid_year_rows: usize,
    /// Rows entering the cleaner.
    pub original_rows: usize,
    pub final_rows: usize,
    pub duplicates_removed: usize,
    pub coercion_warnings: usize,
    pub columns_preserved: Vec<String>,
    pub entity_column: String,
    pub year_column: String,
    pub production_columns: Vec<String>,
    pub latest_year: Option<i64>,
    /// Winsorization bounds per production column that had values.
    #[serde(default)]
    pub capping_bounds: Vec<ColumnBounds>,
}
