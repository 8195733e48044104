use crate::error::{PipelineError, Result};
use crate::pipeline::table::RawTable;
use csv::ReaderBuilder;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, instrument};

/// Read a delimited file with a header row into a [`RawTable`].
#[instrument(level = "info", skip(path), fields(path = %path.as_ref().display()))]
pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<RawTable> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| PipelineError::load(path, e))?;
    let table = read_csv(file).map_err(|e| match e {
        PipelineError::Load { reason, .. } => PipelineError::load(path, reason),
        other => other,
    })?;
    info!(rows = table.rows.len(), columns = table.headers.len(), "loaded raw table");
    Ok(table)
}

/// Parse CSV from any reader. Ragged rows or a missing header make the input non-tabular.
pub fn read_csv<R: Read>(reader: R) -> Result<RawTable> {
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);

    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| PipelineError::load("<input>", e))?
        .iter()
        .map(|s| s.to_string())
        .collect();
    if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
        return Err(PipelineError::load("<input>", "missing header row"));
    }

    let mut rows = Vec::new();
    for (idx, record) in rdr.records().enumerate() {
        let record = record
            .map_err(|e| PipelineError::load("<input>", format!("record {}: {}", idx + 1, e)))?;
        rows.push(record.iter().map(|s| s.to_string()).collect());
    }

    Ok(RawTable { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn reads_header_and_rows() {
        let data = "Entity,Year,Wheat Production (tonnes)\nX,2000,100\nY,2001,\n";
        let table = read_csv(data.as_bytes()).unwrap();
        assert_eq!(table.headers, vec!["Entity", "Year", "Wheat Production (tonnes)"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1], vec!["Y", "2001", ""]);
    }

    #[test]
    fn ragged_rows_are_a_load_error() {
        let data = "Entity,Year\nX,2000,extra\n";
        let err = read_csv(data.as_bytes()).unwrap_err();
        assert!(matches!(err, PipelineError::Load { .. }));
    }

    #[test]
    fn empty_input_is_a_load_error() {
        let err = read_csv("".as_bytes()).unwrap_err();
        assert!(matches!(err, PipelineError::Load { .. }));
    }

    #[test]
    fn missing_file_reports_its_path() {
        let err = load_csv("/definitely/not/here.csv").unwrap_err();
        match err {
            PipelineError::Load { path, .. } => {
                assert_eq!(path, std::path::PathBuf::from("/definitely/not/here.csv"))
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn loads_from_disk() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, "Entity,Year\nX,2000\n").unwrap();
        let table = load_csv(tmp.path()).unwrap();
        assert_eq!(table.rows, vec![vec!["X".to_string(), "2000".to_string()]]);
    }
}
