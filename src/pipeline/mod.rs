//! Batch pipeline: load → normalize → clean → aggregate/export.
//!
//! Data flows strictly forward and the table is moved from stage to stage.
//! A run either publishes a complete artifact set with its report or fails
//! and leaves the previously published set untouched.

pub mod aggregate;
pub mod clean;
pub mod export;
pub mod loader;
pub mod normalize;
pub mod report;
pub mod table;

use crate::config::PipelineConfig;
use crate::error::Result;
use chrono::{Datelike, Utc};
use metrics::{counter, histogram};
use std::path::Path;
use tracing::{info, instrument};
use uuid::Uuid;

use aggregate::Aggregates;
use clean::Cleaner;
use export::ArtifactSet;
use normalize::{Normalizer, RoleOverrides};
use report::RunReport;
use table::Table;

/// Result of a complete pipeline run.
#[derive(Debug)]
pub struct PipelineResult {
    pub table: Table,
    pub aggregates: Aggregates,
    pub report: RunReport,
}

pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    current_year: i64,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self {
            config,
            current_year: i64::from(Utc::now().year()),
        }
    }

    /// Pin the upper bound of accepted years.
    pub fn with_current_year(mut self, year: i64) -> Self {
        self.current_year = year;
        self
    }

    /// Load, clean and aggregate `input` and publish the artifacts to `output_dir`.
    #[instrument(level = "info", skip(self), fields(input = %self.config.input.display()))]
    pub fn run(&self) -> Result<PipelineResult> {
        let started = std::time::Instant::now();
        counter!("cropstats_pipeline_runs_total").increment(1);

        let result = self.process(&self.config.input).and_then(|result| {
            let set = ArtifactSet {
                table: &result.table,
                aggregates: &result.aggregates,
                report: &result.report,
            };
            export::publish(&self.config.output_dir, &set)?;
            Ok(result)
        });

        match &result {
            Ok(r) => {
                histogram!("cropstats_pipeline_duration_seconds").record(started.elapsed().as_secs_f64());
                counter!("cropstats_rows_published_total").increment(r.report.final_rows as u64);
                info!(
                    final_rows = r.report.final_rows,
                    duplicates_removed = r.report.duplicates_removed,
                    "pipeline finished"
                );
            }
            Err(e) => {
                counter!("cropstats_pipeline_failures_total").increment(1);
                tracing::error!(error = %e, "pipeline failed");
            }
        }
        result
    }

    /// Every stage except publication.
    pub fn process(&self, input: &Path) -> Result<PipelineResult> {
        let raw = loader::load_csv(input)?;

        let overrides = RoleOverrides {
            entity: self.config.entity_column.as_deref(),
            year: self.config.year_column.as_deref(),
        };
        let normalized = Normalizer::new(overrides, self.current_year).normalize(raw)?;
        counter!("cropstats_coercion_warnings_total").increment(normalized.warnings.len() as u64);

        let original_rows = normalized.table.len();
        let cleaned = Cleaner::new(self.config.lower_percentile, self.config.upper_percentile)
            .clean(normalized.table);
        counter!("cropstats_duplicates_removed_total").increment(cleaned.duplicates_removed as u64);

        let table = cleaned.table;
        let aggregates = aggregate::aggregate(&table, self.config.top_n);

        let report = RunReport {
            run_id: Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            source: input.display().to_string(),
            loaded_rows: normalized.loaded_rows,
            invalid_year_rows: normalized.invalid_year_rows,
            original_rows,
            final_rows: table.len(),
            duplicates_removed: cleaned.duplicates_removed,
            coercion_warnings: normalized.warnings.len(),
            columns_preserved: table.columns.clone(),
            entity_column: table.entity_column().to_string(),
            year_column: table.year_column().to_string(),
            production_columns: table.production_columns(),
            latest_year: table.latest_year(),
            capping_bounds: cleaned.bounds,
        };

        Ok(PipelineResult {
            table,
            aggregates,
            report,
        })
    }
}
