use std::path::PathBuf;
use thiserror::Error;

/// Reasons the column roles of a table could not be established.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("no column matches the {role} role")]
    Missing { role: &'static str },

    #[error("several columns match the {role} role: {candidates:?}")]
    Ambiguous {
        role: &'static str,
        candidates: Vec<String>,
    },

    #[error("configured {role} column '{name}' is not present in the table")]
    UnknownConfigured { role: &'static str, name: String },

    #[error("column '{raw}' canonicalizes to an empty name")]
    EmptyColumn { raw: String },

    #[error("columns canonicalize to the same name '{0}'")]
    DuplicateColumn(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to load {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("failed to write artifact {artifact}: {source}")]
    Write {
        artifact: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PipelineError::Load {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn write(artifact: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Write {
            artifact: artifact.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
