#![forbid(unsafe_code)]

use dm_core::BitmaskError;
use dm_storage::StoreError;
use serde::Serialize;

/// Exit code when a rebuild left the database without its original table.
pub const EXIT_FATAL: u8 = 3;
pub const EXIT_USAGE: u8 = 2;
pub const EXIT_FAILURE: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid argument: {0}")]
    Usage(String),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Bitmask(#[from] BitmaskError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CliError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::Yaml(_) => "CONFIG",
            Self::Usage(_) => "USAGE",
            Self::Json(_) => "JSON",
            Self::Io(_) => "IO",
            Self::Bitmask(err) => err.code(),
            Self::Store(err) => err.code(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_fatal())
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            _ if self.is_fatal() => EXIT_FATAL,
            Self::Config(_) | Self::Usage(_) | Self::Yaml(_) | Self::Bitmask(_) => EXIT_USAGE,
            _ => EXIT_FAILURE,
        }
    }

    pub fn to_report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code(),
            message: self.to_string(),
            fatal: self.is_fatal(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub code: &'static str,
    pub message: String,
    pub fatal: bool,
}
