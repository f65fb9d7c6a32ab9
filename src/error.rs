use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FleetError>;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("agent '{0}' is already registered")]
    DuplicateAgent(String),

    #[error("storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("fleet plan error: {0}")]
    Plan(String),

    #[error("config error: {0}")]
    Config(String),
}

impl FleetError {
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        FleetError::Storage {
            path: path.into(),
            source,
        }
    }
}
