use crate::constants::{
    DECADE_FILE, PROCESSED_FILE, RUN_REPORT_FILE, STATISTIC_COLUMN, STATS_FILE, TOP_PRODUCERS_FILE,
    YEARLY_FILE,
};
use crate::error::{PipelineError, Result};
use crate::pipeline::aggregate::{Aggregates, BucketAggregate};
use crate::pipeline::report::RunReport;
use crate::pipeline::table::Table;
use csv::Writer;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Everything one run publishes.
pub struct ArtifactSet<'a> {
    pub table: &'a Table,
    pub aggregates: &'a Aggregates,
    pub report: &'a RunReport,
}

/// Stage every artifact, then swap the staged directory into `output_dir`.
#[instrument(level = "info", skip(set), fields(output = %output_dir.display()))]
pub fn publish(output_dir: &Path, set: &ArtifactSet<'_>) -> Result<()> {
    publish_atomically(output_dir, |staging| write_artifacts(staging, set))
}

/// Run `write` against a fresh staging directory and publish it only if it succeeds.
///
/// On failure the staging directory is removed and `output_dir` is left as it was.
pub fn publish_atomically<F>(output_dir: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let staging = sibling(output_dir, "staging")?;
    fs::create_dir_all(&staging).map_err(|e| PipelineError::write(staging.display().to_string(), e))?;

    if let Err(e) = write(&staging) {
        error!(error = %e, "artifact staging failed; previous artifacts kept");
        remove_quietly(&staging);
        return Err(e);
    }

    swap_into_place(&staging, output_dir)?;
    info!("published artifacts");
    Ok(())
}

fn swap_into_place(staging: &Path, output_dir: &Path) -> Result<()> {
    swap_with(staging, output_dir, |from, to| fs::rename(from, to))
}

/// Staging is removed on every failure path; the previous directory is restored when it was moved.
fn swap_with<R>(staging: &Path, output_dir: &Path, rename: R) -> Result<()>
where
    R: Fn(&Path, &Path) -> std::io::Result<()>,
{
    let backup = if output_dir.exists() {
        let backup = sibling(output_dir, "previous")?;
        if let Err(e) = rename(output_dir, &backup) {
            remove_quietly(staging);
            return Err(PipelineError::write(output_dir.display().to_string(), e));
        }
        Some(backup)
    } else {
        None
    };

    if let Err(e) = rename(staging, output_dir) {
        if let Some(backup) = &backup {
            if let Err(restore) = rename(backup, output_dir) {
                error!(backup = %backup.display(), error = %restore, "could not restore previous artifacts");
            }
        }
        remove_quietly(staging);
        return Err(PipelineError::write(output_dir.display().to_string(), e));
    }

    if let Some(backup) = backup {
        remove_quietly(&backup);
    }
    Ok(())
}

/// A hidden directory next to `dir`, e.g. `.processed_data.staging-<uuid>`.
fn sibling(dir: &Path, purpose: &str) -> Result<PathBuf> {
    let name = dir.file_name().ok_or_else(|| {
        PipelineError::Config(format!("output directory {} has no name", dir.display()))
    })?;
    let parent = match dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|e| PipelineError::write(parent.display().to_string(), e))?;
    Ok(parent.join(format!(
        ".{}.{}-{}",
        name.to_string_lossy(),
        purpose,
        Uuid::new_v4().simple()
    )))
}

fn remove_quietly(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        warn!(dir = %dir.display(), error = %e, "failed to remove directory");
    }
}

pub fn write_artifacts(dir: &Path, set: &ArtifactSet<'_>) -> Result<()> {
    let table = set.table;
    write_csv(
        dir,
        PROCESSED_FILE,
        &table.columns,
        table
            .rows
            .iter()
            .map(|row| row.iter().map(|v| v.to_string()).collect()),
    )?;

    write_bucket(dir, YEARLY_FILE, &set.aggregates.yearly)?;
    write_bucket(dir, DECADE_FILE, &set.aggregates.decade)?;

    let summary = &set.aggregates.summary;
    let header: Vec<String> = std::iter::once(STATISTIC_COLUMN.to_string())
        .chain(summary.metrics.iter().cloned())
        .collect();
    write_csv(
        dir,
        STATS_FILE,
        &header,
        summary.rows.iter().map(|(stat, values)| {
            std::iter::once(stat.to_string())
                .chain(values.iter().map(fmt_opt))
                .collect()
        }),
    )?;

    write_json(dir, TOP_PRODUCERS_FILE, &set.aggregates.top_producers)?;
    write_json(dir, RUN_REPORT_FILE, set.report)?;
    Ok(())
}

fn write_bucket(dir: &Path, name: &str, agg: &BucketAggregate) -> Result<()> {
    let header: Vec<String> = std::iter::once(agg.key_column.clone())
        .chain(agg.metrics.iter().cloned())
        .collect();
    write_csv(
        dir,
        name,
        &header,
        agg.rows.iter().map(|(key, values)| {
            std::iter::once(key.to_string())
                .chain(values.iter().map(fmt_opt))
                .collect()
        }),
    )
}

fn fmt_opt(v: &Option<f64>) -> String {
    v.map(|n| n.to_string()).unwrap_or_default()
}

fn write_csv<I>(dir: &Path, name: &str, header: &[String], rows: I) -> Result<()>
where
    I: Iterator<Item = Vec<String>>,
{
    let path = dir.join(name);
    let to_write_err = |e: csv::Error| PipelineError::write(name, e.into());
    let mut wtr = Writer::from_path(&path).map_err(to_write_err)?;
    wtr.write_record(header).map_err(to_write_err)?;
    for row in rows {
        wtr.write_record(&row).map_err(to_write_err)?;
    }
    wtr.flush().map_err(|e| PipelineError::write(name, e))?;
    Ok(())
}

fn write_json<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<()> {
    let path = dir.join(name);
    let file = File::create(&path).map_err(|e| PipelineError::write(name, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|e| PipelineError::write(name, e.into()))?;
    writer.flush().map_err(|e| PipelineError::write(name, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn failed_write_keeps_previous_artifacts() {
        let root = tempdir().unwrap();
        let out = root.path().join("processed_data");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("yearly_production.csv"), "old").unwrap();

        let err = publish_atomically(&out, |staging| {
            fs::write(staging.join("yearly_production.csv"), "new").unwrap();
            Err(PipelineError::write(
                "top_producers.json",
                std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            ))
        })
        .unwrap_err();

        assert!(matches!(err, PipelineError::Write { .. }));
        assert_eq!(fs::read_to_string(out.join("yearly_production.csv")).unwrap(), "old");
        let leftovers: Vec<_> = fs::read_dir(root.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1, "staging directory must be cleaned up");
    }

    #[test]
    fn successful_publish_replaces_the_whole_directory() {
        let root = tempdir().unwrap();
        let out = root.path().join("artifacts");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("stale.csv"), "old").unwrap();

        publish_atomically(&out, |staging| {
            fs::write(staging.join("fresh.csv"), "new")?;
            Ok(())
        })
        .unwrap();

        assert!(!out.join("stale.csv").exists());
        assert_eq!(fs::read_to_string(out.join("fresh.csv")).unwrap(), "new");
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 1);
    }

    #[test]
    fn publish_creates_missing_output_directory() {
        let root = tempdir().unwrap();
        let out = root.path().join("nested").join("out");
        publish_atomically(&out, |staging| {
            fs::write(staging.join("a.csv"), "x")?;
            Ok(())
        })
        .unwrap();
        assert!(out.join("a.csv").exists());
    }

    #[test]
    fn failed_move_aside_removes_staging() {
        let root = tempdir().unwrap();
        let out = root.path().join("processed_data");
        let staging = root.path().join(".processed_data.staging-test");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("processed.csv"), "old").unwrap();
        fs::create_dir_all(&staging).unwrap();

        let err = swap_with(&staging, &out, |_, _| {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "busy"))
        })
        .unwrap_err();

        assert!(matches!(err, PipelineError::Write { .. }));
        assert!(!staging.exists());
        assert_eq!(fs::read_to_string(out.join("processed.csv")).unwrap(), "old");
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 1);
    }
}
