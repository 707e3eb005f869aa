#![forbid(unsafe_code)]

use super::engine::EngineError;
use super::rebuild::RebuildError;
use dm_core::BitmaskError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Rebuild(#[from] RebuildError),
    #[error("database file not found: {}", path.display())]
    DatabaseMissing { path: PathBuf },
    #[error("table {table} not found")]
    TableNotFound { table: String },
    #[error("table {table} already exists")]
    TableExists { table: String },
    #[error("column {column} not found in table {table}")]
    ColumnNotFound { table: String, column: String },
    #[error("publication {publication_id}: {source}")]
    Bitmask {
        publication_id: i64,
        source: BitmaskError,
    },
    #[error("noise flip probability must be within [0, 1], got {probability}")]
    InvalidNoise { probability: f64 },
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "IO",
            Self::Sql(_) => "SQLITE",
            Self::Json(_) => "JSON",
            Self::Engine(err) => err.code(),
            Self::Rebuild(err) => err.code(),
            Self::DatabaseMissing { .. } => "DATABASE_MISSING",
            Self::TableNotFound { .. } => "TABLE_NOT_FOUND",
            Self::TableExists { .. } => "TABLE_EXISTS",
            Self::ColumnNotFound { .. } => "COLUMN_NOT_FOUND",
            Self::Bitmask { source, .. } => source.code(),
            Self::InvalidNoise { .. } => "INVALID_NOISE",
            Self::InvalidInput(_) => "INVALID_INPUT",
        }
    }

    /// The database may be left without the original table; an operator must step in.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Rebuild(err) if err.is_fatal())
    }
}
