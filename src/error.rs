use octoping_agent::config::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OctopingError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Probe error: {0}")]
    ProbeError(String),

    #[error("Target error: {0}")]
    TargetError(String),

    #[error("Metrics error: {0}")]
    MetricsError(String),

    #[error("Invalid argument {name}: {value}")]
    InvalidArgument { name: String, value: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OctopingError {
    /// Flattens an error chain into a probe error.
    pub fn probe(e: anyhow::Error) -> Self {
        Self::ProbeError(format!("{:#}", e))
    }
}

pub type Result<T> = std::result::Result<T, OctopingError>;
