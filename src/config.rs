use crate::constants::{DEFAULT_LOWER_PERCENTILE, DEFAULT_TOP_N, DEFAULT_UPPER_PERCENTILE};
use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    /// Explicit entity column; inferred from the header when absent.
    pub entity_column: Option<String>,
    /// Explicit year column; inferred from the header when absent.
    pub year_column: Option<String>,
    pub lower_percentile: f64,
    pub upper_percentile: f64,
    pub top_n: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("world food production.csv"),
            output_dir: PathBuf::from("processed_data"),
            entity_column: None,
            year_column: None,
            lower_percentile: DEFAULT_LOWER_PERCENTILE,
            upper_percentile: DEFAULT_UPPER_PERCENTILE,
            top_n: DEFAULT_TOP_N,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/cropstats.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            static_dir: PathBuf::from("static"),
        }
    }
}

impl Config {
    /// Load `config.toml` (or `path`), then apply `CROPSTATS_*` environment overrides.
    ///
    /// A missing default file yields the built-in defaults; a missing file that
    /// was asked for explicitly is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("CROPSTATS_INPUT") {
            self.pipeline.input = PathBuf::from(v);
        }
        if let Some(v) = lookup("CROPSTATS_OUTPUT_DIR") {
            self.pipeline.output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("CROPSTATS_DATABASE_PATH") {
            self.database.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("CROPSTATS_HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("CROPSTATS_PORT") {
            self.server.port = v
                .parse()
                .map_err(|_| PipelineError::Config(format!("CROPSTATS_PORT is not a port: {v}")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        let in_unit = |q: f64| (0.0..=1.0).contains(&q);
        if !in_unit(p.lower_percentile) || !in_unit(p.upper_percentile) {
            return Err(PipelineError::Config(
                "percentiles must lie within [0, 1]".to_string(),
            ));
        }
        if p.lower_percentile > p.upper_percentile {
            return Err(PipelineError::Config(format!(
                "lower_percentile {} exceeds upper_percentile {}",
                p.lower_percentile, p.upper_percentile
            )));
        }
        if p.top_n == 0 {
            return Err(PipelineError::Config("top_n must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [pipeline]
            input = "raw.csv"
            entity_column = "Country"

            [server]
            port = 8080
            "#,
        )
        .unwrap();

        assert_eq!(config.pipeline.input, PathBuf::from("raw.csv"));
        assert_eq!(config.pipeline.entity_column.as_deref(), Some("Country"));
        assert_eq!(config.pipeline.year_column, None);
        assert_eq!(config.pipeline.top_n, 10);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("CROPSTATS_DATABASE_PATH", "/tmp/x.db"),
            ("CROPSTATS_PORT", "9000"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.database.path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn bad_port_is_a_config_error() {
        let mut config = Config::default();
        let err = config
            .apply_env(|k| (k == "CROPSTATS_PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn inverted_percentiles_are_rejected() {
        let mut config = Config::default();
        config.pipeline.lower_percentile = 0.9;
        config.pipeline.upper_percentile = 0.1;
        assert!(config.validate().is_err());
    }
}
