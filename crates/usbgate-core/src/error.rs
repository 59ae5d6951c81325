use std::path::PathBuf;
use thiserror::Error;

/// Result alias for core operations.
pub type GateResult<T> = Result<T, GateError>;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("[UG1000] io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[UG1001] toml config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("[UG1002] yaml config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("[UG1100] configuration error: {0}")]
    InvalidConfig(String),

    #[error("[UG1200] invalid device identifier `{value}`: {reason}")]
    InvalidIdentifier { value: String, reason: String },

    #[error("[UG1300] failed to persist registry to {path}: {reason}")]
    RegistryPersist { path: PathBuf, reason: String },

    #[error("[UG2000] platform error: {0}")]
    Platform(String),

    #[error("[UG2100] enforcement hook failed: {0}")]
    Enforcement(String),
}

impl GateError {
    pub fn code(&self) -> &'static str {
        match self {
            GateError::Io(_) => "UG1000",
            GateError::Toml(_) => "UG1001",
            GateError::Yaml(_) => "UG1002",
            GateError::InvalidConfig(_) => "UG1100",
            GateError::InvalidIdentifier { .. } => "UG1200",
            GateError::RegistryPersist { .. } => "UG1300",
            GateError::Platform(_) => "UG2000",
            GateError::Enforcement(_) => "UG2100",
        }
    }
}
