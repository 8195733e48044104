#![allow(dead_code)]

use cropstats::config::PipelineConfig;
use cropstats::db::Database;
use cropstats::pipeline::{Pipeline, PipelineResult};
use cropstats::storage::SqliteStorage;
use std::fs;
use std::path::{Path, PathBuf};

pub const CURRENT_YEAR: i64 = 2025;

/// A small world-food-production style file with the usual problems:
/// unit suffixes, a future year, a duplicate row, a bad cell and a missing value.
pub const SAMPLE_CSV: &str = "\
Entity,Year,Maize Production (tonnes),Rice  Production (tonnes),Wheat Production (tonnes)
Afghanistan,2019,100,50,300
Afghanistan,2020,120,60,320
Brazil,2019,9000,1000,500
Brazil,2020,9500,1100,
Chad,2020,40,n/a,10
Chad,2020,40,n/a,10
Denmark,2020,0,0,4000
Testland,2050,1,1,1
Nowhere,abc,1,1,1
Oldland,1850,1,1,1
";

pub fn write_input(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("world food production.csv");
    fs::write(&path, contents).expect("write input");
    path
}

pub fn config(input: PathBuf, output_dir: PathBuf) -> PipelineConfig {
    PipelineConfig {
        input,
        output_dir,
        ..PipelineConfig::default()
    }
}

pub fn run_pipeline(dir: &Path, contents: &str) -> (PipelineConfig, PipelineResult) {
    let cfg = config(write_input(dir, contents), dir.join("processed_data"));
    let result = Pipeline::new(&cfg)
        .with_current_year(CURRENT_YEAR)
        .run()
        .expect("pipeline run");
    (cfg, result)
}

/// Process `SAMPLE_CSV`, load the artifacts into an in-memory database and open storage over it.
pub fn sample_storage(dir: &Path) -> SqliteStorage {
    let (cfg, _) = run_pipeline(dir, SAMPLE_CSV);
    let mut db = Database::open_in_memory().expect("open db");
    db.load_artifacts(&cfg.output_dir).expect("load artifacts");
    SqliteStorage::new(db.into_connection()).expect("open storage")
}
