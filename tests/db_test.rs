mod common;

use anyhow::Result;
use common::{run_pipeline, SAMPLE_CSV};
use cropstats::db::Database;
use cropstats::storage::{SqliteStorage, Storage};
use tempfile::tempdir;

#[test]
fn load_populates_every_table() -> Result<()> {
    let dir = tempdir()?;
    let (cfg, result) = run_pipeline(dir.path(), SAMPLE_CSV);

    let mut db = Database::open(dir.path().join("db").join("cropstats.db"))?;
    let summary = db.load_artifacts(&cfg.output_dir)?;
    assert_eq!(summary.run_id, result.report.run_id);
    assert_eq!(summary.processed_rows, 6);
    assert_eq!(summary.yearly_rows, 2);
    assert_eq!(summary.decade_rows, 2);
    // maize 4, rice 3, wheat 3
    assert_eq!(summary.top_producer_rows, 10);

    let conn = db.connection();
    let positions: Vec<String> = conn
        .prepare("SELECT name FROM production_columns ORDER BY position")?
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    assert_eq!(positions, result.report.production_columns);

    let latest: String = conn.query_row(
        "SELECT value FROM dataset_meta WHERE key = 'latest_year'",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(latest, "2020");
    Ok(())
}

#[test]
fn reloading_replaces_tables_and_keeps_run_history() -> Result<()> {
    let dir = tempdir()?;
    let (cfg, first) = run_pipeline(dir.path(), SAMPLE_CSV);
    let mut db = Database::open_in_memory()?;
    db.load_artifacts(&cfg.output_dir)?;

    let (_, second) = run_pipeline(dir.path(), SAMPLE_CSV);
    assert_ne!(first.report.run_id, second.report.run_id);
    db.load_artifacts(&cfg.output_dir)?;

    let conn = db.connection();
    let rows: i64 = conn.query_row("SELECT COUNT(*) FROM processed_data", [], |row| row.get(0))?;
    assert_eq!(rows, 6);
    let runs: i64 = conn.query_row("SELECT COUNT(*) FROM pipeline_runs", [], |row| row.get(0))?;
    assert_eq!(runs, 2);

    let storage = SqliteStorage::new(db.into_connection())?;
    assert_eq!(storage.entities()?, vec!["Afghanistan", "Brazil", "Chad", "Denmark"]);
    Ok(())
}

#[test]
fn storage_requires_loaded_metadata() -> Result<()> {
    let db = Database::open_in_memory()?;
    assert!(SqliteStorage::new(db.into_connection()).is_err());
    Ok(())
}

#[test]
fn load_from_missing_directory_fails_without_changes() -> Result<()> {
    let dir = tempdir()?;
    let mut db = Database::open_in_memory()?;
    assert!(db.load_artifacts(&dir.path().join("nothing")).is_err());
    let tables: i64 = db.connection().query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(tables, 0);
    Ok(())
}
