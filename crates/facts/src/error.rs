use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FactError>;

#[derive(Error, Debug)]
pub enum FactError {
    #[error("Failed to read fact source {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Fact bundle parse error: {0}")]
    Parse(String),

    #[error("facts.schema_version {0} is not supported (expected 1)")]
    UnsupportedSchema(u32),

    #[error("Fact store unavailable: {0}")]
    Unavailable(String),
}
