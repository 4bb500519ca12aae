use thiserror::Error;

use crate::front_end::FrontEndError;

#[derive(Debug, Error)]
pub enum PbsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[cfg(feature = "config-yaml")]
    #[error("failed to parse yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("configuration key not found: {key}")]
    ConfigKeyNotFound { key: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    FrontEnd(#[from] FrontEndError),
}

pub type Result<T> = std::result::Result<T, PbsError>;
