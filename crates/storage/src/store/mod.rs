#![forbid(unsafe_code)]

mod engine;
mod error;
mod export;
mod maintenance;
mod noise;
mod rebuild;
mod subscriptions;

pub use engine::{EngineError, SchemaEngine};
pub use error::StoreError;
pub use export::*;
pub use maintenance::*;
pub use noise::*;
pub use rebuild::{
    RebuildError, RebuildOptions, RebuildOutcome, RebuildStage, SwapStep, rebuild,
};
pub use subscriptions::*;

use dm_core::{RebuildPlan, TableSchema};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// An open maintenance session on one SQLite file.
///
/// The connection is closed when the value is dropped, on every exit path;
/// [`SqliteDb::close`] surfaces close errors explicitly.
#[derive(Debug)]
pub struct SqliteDb {
    conn: Connection,
    path: PathBuf,
}

impl SqliteDb {
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(StoreError::DatabaseMissing { path });
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(busy_timeout)?;
        debug!(path = %path.display(), "database opened");

        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn close(self) -> Result<(), StoreError> {
        let path = self.path;
        self.conn.close().map_err(|(_, err)| StoreError::Sql(err))?;
        debug!(path = %path.display(), "database closed");
        Ok(())
    }

    pub fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row.get::<_, String>(0)?);
        }
        Ok(out)
    }

    pub fn introspect(&self, table: &str) -> Result<TableSchema, StoreError> {
        self.conn.introspect(table).map_err(|err| match err {
            EngineError::TableNotFound { table } => StoreError::TableNotFound { table },
            other => StoreError::Engine(other),
        })
    }

    /// Reads the table schema fresh and applies `plan` to it.
    pub fn rebuild_table(
        &self,
        table: &str,
        plan: &RebuildPlan,
        options: &RebuildOptions,
    ) -> Result<RebuildOutcome, StoreError> {
        let current = self.introspect(table)?;
        Ok(rebuild(&self.conn, &current, plan, options)?)
    }

    /// Renames a column, flushing the WAL first and optionally vacuuming after.
    pub fn rename_column(
        &self,
        table: &str,
        from: &str,
        to: &str,
        options: &RebuildOptions,
        vacuum_after: bool,
    ) -> Result<RebuildOutcome, StoreError> {
        self.wal_checkpoint()?;
        let outcome = self.rebuild_table(table, &RebuildPlan::rename_column(from, to), options)?;
        info!(%table, %from, %to, path = ?outcome.path_taken, "column renamed");
        if vacuum_after {
            self.vacuum()?;
        }
        Ok(outcome)
    }

    pub fn drop_column(
        &self,
        table: &str,
        column: &str,
        options: &RebuildOptions,
    ) -> Result<RebuildOutcome, StoreError> {
        let outcome = self.rebuild_table(table, &RebuildPlan::drop_column(column), options)?;
        info!(%table, %column, "column dropped");
        Ok(outcome)
    }

    pub fn add_primary_key(
        &self,
        table: &str,
        column: &str,
        options: &RebuildOptions,
    ) -> Result<RebuildOutcome, StoreError> {
        let outcome = self.rebuild_table(table, &RebuildPlan::add_primary_key(column), options)?;
        info!(%table, %column, "primary key added");
        Ok(outcome)
    }
}
