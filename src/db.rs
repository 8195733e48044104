use crate::constants::{
    DATASET_META_TABLE, DECADE_COLUMN, DECADE_FILE, DECADE_TABLE, PIPELINE_RUNS_TABLE, PROCESSED_FILE,
    PROCESSED_TABLE, PRODUCTION_COLUMNS_TABLE, RUN_REPORT_FILE, STATS_FILE, STATS_TABLE,
    TOP_PRODUCERS_FILE, TOP_PRODUCERS_TABLE, YEARLY_FILE, YEARLY_TABLE,
};
use crate::error::{PipelineError, Result};
use crate::pipeline::aggregate::TopProducers;
use crate::pipeline::report::RunReport;
use chrono::Utc;
use csv::ReaderBuilder;
use metrics::counter;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, Transaction};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use tracing::{info, instrument};

/// Quote an identifier for SQLite. Callers must only pass allowlisted or
/// pipeline-produced column names.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    fn sql(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }

    fn parse(self, cell: &str) -> Option<SqlValue> {
        if cell.is_empty() {
            return Some(SqlValue::Null);
        }
        match self {
            ColumnType::Integer => cell.parse::<i64>().ok().map(SqlValue::Integer),
            ColumnType::Real => cell.parse::<f64>().ok().map(SqlValue::Real),
            ColumnType::Text => Some(SqlValue::Text(cell.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub run_id: String,
    pub processed_rows: usize,
    pub yearly_rows: usize,
    pub decade_rows: usize,
    pub top_producer_rows: usize,
}

/// Owns the SQLite connection holding the served tables.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Replace every served table with the artifacts in `dir`, in one transaction.
    #[instrument(level = "info", skip(self, dir), fields(dir = %dir.display()))]
    pub fn load_artifacts(&mut self, dir: &Path) -> Result<LoadSummary> {
        let report: RunReport = read_json(&dir.join(RUN_REPORT_FILE))?;
        let top: TopProducers = read_json(&dir.join(TOP_PRODUCERS_FILE))?;

        let is_metric = |c: &str| report.production_columns.iter().any(|p| p == c);
        let tx = self.conn.transaction()?;

        let processed_rows = load_csv_table(&tx, PROCESSED_TABLE, &dir.join(PROCESSED_FILE), |c| {
            if c == report.year_column {
                ColumnType::Integer
            } else if is_metric(c) {
                ColumnType::Real
            } else {
                ColumnType::Text
            }
        })?;
        let yearly_rows = load_csv_table(&tx, YEARLY_TABLE, &dir.join(YEARLY_FILE), |c| {
            if c == report.year_column {
                ColumnType::Integer
            } else {
                ColumnType::Real
            }
        })?;
        let decade_rows = load_csv_table(&tx, DECADE_TABLE, &dir.join(DECADE_FILE), |c| {
            if c == DECADE_COLUMN {
                ColumnType::Integer
            } else {
                ColumnType::Real
            }
        })?;
        load_csv_table(&tx, STATS_TABLE, &dir.join(STATS_FILE), |c| {
            if is_metric(c) {
                ColumnType::Real
            } else {
                ColumnType::Text
            }
        })?;
        let top_producer_rows = load_top_producers(&tx, &top)?;
        write_metadata(&tx, &report)?;

        tx.commit()?;
        counter!("cropstats_db_loads_total").increment(1);
        counter!("cropstats_db_rows_loaded_total").increment(processed_rows as u64);
        info!(
            run_id = %report.run_id,
            processed_rows,
            yearly_rows,
            decade_rows,
            top_producer_rows,
            "loaded artifacts into database"
        );
        Ok(LoadSummary {
            run_id: report.run_id,
            processed_rows,
            yearly_rows,
            decade_rows,
            top_producer_rows,
        })
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| PipelineError::load(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| PipelineError::load(path, e))
}

/// Recreate `table` from a CSV artifact; returns the number of rows inserted.
fn load_csv_table(
    tx: &Transaction<'_>,
    table: &str,
    path: &Path,
    column_type: impl Fn(&str) -> ColumnType,
) -> Result<usize> {
    let file = File::open(path).map_err(|e| PipelineError::load(path, e))?;
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(BufReader::new(file));
    let headers: Vec<String> = rdr.headers()?.iter().map(String::from).collect();
    let types: Vec<ColumnType> = headers.iter().map(|h| column_type(h)).collect();

    let column_defs: Vec<String> = headers
        .iter()
        .zip(&types)
        .map(|(h, t)| format!("{} {}", quote_ident(h), t.sql()))
        .collect();
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS {table};\nCREATE TABLE {table} ({});",
        column_defs.join(", "),
        table = quote_ident(table),
    ))?;

    let placeholders: Vec<String> = (1..=headers.len()).map(|i| format!("?{i}")).collect();
    let mut stmt = tx.prepare(&format!(
        "INSERT INTO {} VALUES ({})",
        quote_ident(table),
        placeholders.join(", ")
    ))?;

    let mut count = 0;
    for (idx, record) in rdr.records().enumerate() {
        let record = record?;
        let values = record
            .iter()
            .zip(&types)
            .zip(&headers)
            .map(|((cell, ty), header)| {
                ty.parse(cell).ok_or_else(|| {
                    PipelineError::load(
                        path,
                        format!("row {}: column {} value '{}' is not {}", idx + 1, header, cell, ty.sql()),
                    )
                })
            })
            .collect::<Result<Vec<SqlValue>>>()?;
        stmt.execute(params_from_iter(values))?;
        count += 1;
    }
    Ok(count)
}

fn load_top_producers(tx: &Transaction<'_>, top: &TopProducers) -> Result<usize> {
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS {t};
         CREATE TABLE {t} (
             crop_type  TEXT NOT NULL,
             region     TEXT NOT NULL,
             production REAL NOT NULL,
             rank       INTEGER NOT NULL
         );",
        t = quote_ident(TOP_PRODUCERS_TABLE)
    ))?;
    let mut stmt = tx.prepare(&format!(
        "INSERT INTO {} (crop_type, region, production, rank) VALUES (?1, ?2, ?3, ?4)",
        quote_ident(TOP_PRODUCERS_TABLE)
    ))?;
    let mut count = 0;
    for (crop_type, ranking) in &top.rankings {
        for (rank, (region, production)) in ranking.iter().enumerate() {
            stmt.execute(params![crop_type, region, production, rank as i64 + 1])?;
            count += 1;
        }
    }
    Ok(count)
}

fn write_metadata(tx: &Transaction<'_>, report: &RunReport) -> Result<()> {
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS {cols};
         CREATE TABLE {cols} (name TEXT PRIMARY KEY, position INTEGER NOT NULL);
         DROP TABLE IF EXISTS {meta};
         CREATE TABLE {meta} (key TEXT PRIMARY KEY, value TEXT);
         CREATE TABLE IF NOT EXISTS {runs} (
             run_id    TEXT PRIMARY KEY,
             report    TEXT NOT NULL,
             loaded_at TEXT NOT NULL
         );",
        cols = quote_ident(PRODUCTION_COLUMNS_TABLE),
        meta = quote_ident(DATASET_META_TABLE),
        runs = quote_ident(PIPELINE_RUNS_TABLE),
    ))?;

    for (position, name) in report.production_columns.iter().enumerate() {
        tx.execute(
            &format!(
                "INSERT INTO {} (name, position) VALUES (?1, ?2)",
                quote_ident(PRODUCTION_COLUMNS_TABLE)
            ),
            params![name, position as i64],
        )?;
    }

    let latest_year = report.latest_year.map(|y| y.to_string());
    let meta: [(&str, Option<&str>); 4] = [
        ("entity_column", Some(report.entity_column.as_str())),
        ("year_column", Some(report.year_column.as_str())),
        ("latest_year", latest_year.as_deref()),
        ("run_id", Some(report.run_id.as_str())),
    ];
    for (key, value) in meta {
        tx.execute(
            &format!(
                "INSERT INTO {} (key, value) VALUES (?1, ?2)",
                quote_ident(DATASET_META_TABLE)
            ),
            params![key, value],
        )?;
    }

    tx.execute(
        &format!(
            "INSERT OR REPLACE INTO {} (run_id, report, loaded_at) VALUES (?1, ?2, ?3)",
            quote_ident(PIPELINE_RUNS_TABLE)
        ),
        params![report.run_id, serde_json::to_string(report)?, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("Maize_Production"), "\"Maize_Production\"");
        assert_eq!(quote_ident("a\"; DROP TABLE x; --"), "\"a\"\"; DROP TABLE x; --\"");
    }

    #[test]
    fn empty_cells_become_null() {
        assert_eq!(ColumnType::Real.parse(""), Some(SqlValue::Null));
        assert_eq!(ColumnType::Integer.parse("1999"), Some(SqlValue::Integer(1999)));
        assert_eq!(ColumnType::Integer.parse("x"), None);
        assert_eq!(ColumnType::Text.parse("Chad"), Some(SqlValue::Text("Chad".into())));
    }
}
