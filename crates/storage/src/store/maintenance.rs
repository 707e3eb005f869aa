#![forbid(unsafe_code)]

use super::*;
use dm_core::sql::{clean_identifier_quotes, quote_ident};
use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

const INTEGRITY_OK: &str = "ok";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub integrity_check: String,
    pub optimized: bool,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IndexCreated {
    pub index: String,
    pub table: String,
    pub columns: Vec<String>,
}

impl SqliteDb {
    fn table_name(&self, table: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type='table' AND name=?1 COLLATE NOCASE",
                params![table],
                |row| row.get::<_, String>(0),
            )
            .optional()?)
    }

    pub fn rename_table(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let to = to.trim();
        if to.is_empty() {
            return Err(StoreError::InvalidInput("new table name must not be empty"));
        }
        let Some(current) = self.table_name(from)? else {
            return Err(StoreError::TableNotFound {
                table: from.to_string(),
            });
        };
        // A case-only rename is the same catalog entry.
        if !current.eq_ignore_ascii_case(to) && self.table_name(to)?.is_some() {
            return Err(StoreError::TableExists {
                table: to.to_string(),
            });
        }

        self.conn.execute_batch(&format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(&current),
            quote_ident(to)
        ))?;
        info!(from = %current, %to, "table renamed");
        Ok(())
    }

    /// `CREATE INDEX IF NOT EXISTS` over existing columns of an existing table.
    pub fn add_index(
        &self,
        table: &str,
        columns: &[String],
        index_name: &str,
    ) -> Result<IndexCreated, StoreError> {
        let index_name = index_name.trim();
        if index_name.is_empty() {
            return Err(StoreError::InvalidInput("index name must not be empty"));
        }
        if columns.is_empty() {
            return Err(StoreError::InvalidInput("index needs at least one column"));
        }

        let schema = self.introspect(table)?;
        let mut resolved = Vec::with_capacity(columns.len());
        for wanted in columns {
            let column = schema
                .column(wanted.trim())
                .ok_or_else(|| StoreError::ColumnNotFound {
                    table: schema.name.clone(),
                    column: wanted.clone(),
                })?;
            resolved.push(column.name.clone());
        }

        let column_list = resolved
            .iter()
            .map(|name| quote_ident(name))
            .collect::<Vec<_>>()
            .join(", ");
        self.conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({column_list})",
            quote_ident(index_name),
            quote_ident(&schema.name)
        ))?;
        info!(index = %index_name, table = %schema.name, "index ensured");

        Ok(IndexCreated {
            index: index_name.to_string(),
            table: schema.name,
            columns: resolved,
        })
    }

    pub fn wal_checkpoint(&self) -> Result<(), StoreError> {
        // Returns (busy, log, checkpointed); non-WAL databases report -1s.
        let (busy, log, checkpointed) =
            self.conn
                .query_row("PRAGMA wal_checkpoint(FULL)", [], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })?;
        debug!(busy, log, checkpointed, "wal checkpoint");
        Ok(())
    }

    pub fn vacuum(&self) -> Result<(), StoreError> {
        self.conn.execute_batch("VACUUM;")?;
        info!("vacuum complete");
        Ok(())
    }

    pub fn analyze(&self) -> Result<(), StoreError> {
        self.conn.execute_batch("ANALYZE;")?;
        info!("analyze complete");
        Ok(())
    }

    pub fn reindex_and_vacuum(&self) -> Result<(), StoreError> {
        self.conn.execute_batch("REINDEX;")?;
        self.vacuum()?;
        info!("indexes rebuilt");
        Ok(())
    }

    /// Runs `PRAGMA integrity_check` and, only when it passes, `PRAGMA optimize`.
    pub fn integrity_check_and_optimize(&self) -> Result<IntegrityReport, StoreError> {
        let integrity_check =
            self.conn
                .query_row("PRAGMA integrity_check", [], |row| row.get::<_, String>(0))?;

        if integrity_check != INTEGRITY_OK {
            warn!(result = %integrity_check, "integrity check failed");
            return Ok(IntegrityReport {
                integrity_check,
                optimized: false,
                message: "Database integrity check failed. Manual inspection required."
                    .to_string(),
            });
        }

        self.conn.execute_batch("PRAGMA optimize;")?;
        info!("integrity check passed; optimize complete");
        Ok(IntegrityReport {
            integrity_check,
            optimized: true,
            message: "Database integrity check passed, and optimization completed successfully."
                .to_string(),
        })
    }

    /// Stored `CREATE TABLE` text of every table, redundant quotes removed.
    pub fn schema_statements(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT sql FROM sqlite_master WHERE type='table' AND sql IS NOT NULL ORDER BY rowid",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let sql = row.get::<_, String>(0)?;
            let cleaned = clean_identifier_quotes(&sql).map_err(|err| {
                StoreError::Engine(EngineError::Statement {
                    message: err.to_string(),
                })
            })?;
            out.push(cleaned);
        }
        Ok(out)
    }

    /// Writes [`SqliteDb::schema_statements`] to `path`, each followed by `;` and a blank line.
    pub fn dump_schema(&self, path: &Path) -> Result<usize, StoreError> {
        let statements = self.schema_statements()?;
        let mut file = fs::File::create(path)?;
        for statement in &statements {
            write!(file, "{statement};\n\n")?;
        }
        file.flush()?;
        info!(path = %path.display(), tables = statements.len(), "schema dumped");
        Ok(statements.len())
    }
}
