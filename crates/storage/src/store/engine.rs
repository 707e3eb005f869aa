#![forbid(unsafe_code)]

use dm_core::sql::{IndexStatement, ViewStatement, quote_ident};
use dm_core::{ColumnDefinition, EngineVersion, IndexDefinition, SchemaObject, TableSchema};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("table {table} not found")]
    TableNotFound { table: String },
    #[error("stored definition of index {index} is unreadable: {message}")]
    Catalog { index: String, message: String },
    #[error("sqlite: {message}")]
    Statement { message: String },
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::TableNotFound { .. } => "TABLE_NOT_FOUND",
            Self::Catalog { .. } => "CATALOG",
            Self::Statement { .. } => "SQLITE",
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Statement {
            message: value.to_string(),
        }
    }
}

/// What the schema rebuilder needs from a database: catalog reads, statement
/// execution and the engine version for picking the native path.
pub trait SchemaEngine {
    fn introspect(&self, table: &str) -> Result<TableSchema, EngineError>;

    /// Any catalog object (table, index, view, trigger) with this name.
    fn object_exists(&self, name: &str) -> Result<bool, EngineError>;

    fn execute(&self, sql: &str) -> Result<(), EngineError>;

    fn row_count(&self, table: &str) -> Result<u64, EngineError>;

    /// Rows of `table` whose `column` is NULL.
    fn null_count(&self, table: &str, column: &str) -> Result<u64, EngineError>;

    fn engine_version(&self) -> EngineVersion;
}

impl SchemaEngine for Connection {
    fn introspect(&self, table: &str) -> Result<TableSchema, EngineError> {
        let (name, definition_text) = self
            .query_row(
                "SELECT name, sql FROM sqlite_master WHERE type='table' AND name=?1 COLLATE NOCASE",
                params![table],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?
            .ok_or_else(|| EngineError::TableNotFound {
                table: table.to_string(),
            })?;

        let mut stmt = self.prepare(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
        )?;
        let mut rows = stmt.query(params![name])?;
        let mut columns = Vec::new();
        while let Some(row) = rows.next()? {
            columns.push(ColumnDefinition {
                name: row.get::<_, String>(0)?,
                declared_type: row.get::<_, String>(1)?,
                not_null: row.get::<_, i64>(2)? != 0,
                default_value: row.get::<_, Option<String>>(3)?,
                pk_ordinal: row.get::<_, i64>(4)?.max(0) as u32,
            });
        }

        let column_names = columns
            .iter()
            .map(|col| col.name.clone())
            .collect::<Vec<_>>();

        // Auto-indexes have no stored text; they come back with the table definition.
        let mut stmt = self.prepare(
            "SELECT name, sql FROM sqlite_master \
             WHERE type='index' AND tbl_name=?1 COLLATE NOCASE AND sql IS NOT NULL \
             ORDER BY rowid",
        )?;
        let mut rows = stmt.query(params![name])?;
        let mut indexes = Vec::new();
        while let Some(row) = rows.next()? {
            let index_name = row.get::<_, String>(0)?;
            let definition_text = row.get::<_, String>(1)?;
            let parsed =
                IndexStatement::parse(&definition_text).map_err(|err| EngineError::Catalog {
                    index: index_name.clone(),
                    message: err.to_string(),
                })?;
            let referenced_columns =
                parsed.referenced_columns(column_names.iter().map(String::as_str));
            indexes.push(IndexDefinition {
                name: index_name,
                owning_table: name.clone(),
                definition_text,
                referenced_columns,
            });
        }

        let triggers = catalog_objects(
            self,
            "SELECT name, sql FROM sqlite_master \
             WHERE type='trigger' AND tbl_name=?1 COLLATE NOCASE AND sql IS NOT NULL \
             ORDER BY rowid",
            Some(&name),
        )?;

        let views = catalog_objects(
            self,
            "SELECT name, sql FROM sqlite_master \
             WHERE type='view' AND sql IS NOT NULL ORDER BY rowid",
            None,
        )?;
        let dependent_views = views
            .into_iter()
            .filter(|view| match ViewStatement::parse(&view.definition_text) {
                Ok(parsed) => parsed.reads_table(&name),
                Err(err) => {
                    debug!(view = %view.name, error = %err, "view skipped, definition not parsed");
                    false
                }
            })
            .collect();

        Ok(TableSchema {
            name,
            definition_text,
            columns,
            indexes,
            triggers,
            dependent_views,
        })
    }

    fn object_exists(&self, name: &str) -> Result<bool, EngineError> {
        Ok(self
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE name=?1 COLLATE NOCASE",
                params![name],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .is_some())
    }

    fn execute(&self, sql: &str) -> Result<(), EngineError> {
        debug!(%sql, "execute");
        self.execute_batch(sql)?;
        Ok(())
    }

    fn row_count(&self, table: &str) -> Result<u64, EngineError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count = self.query_row(&sql, [], |row| row.get::<_, i64>(0))?;
        Ok(count.max(0) as u64)
    }

    fn null_count(&self, table: &str, column: &str) -> Result<u64, EngineError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} IS NULL",
            quote_ident(table),
            quote_ident(column)
        );
        let count = self.query_row(&sql, [], |row| row.get::<_, i64>(0))?;
        Ok(count.max(0) as u64)
    }

    fn engine_version(&self) -> EngineVersion {
        EngineVersion::from_number(rusqlite::version_number())
    }
}

fn catalog_objects(
    conn: &Connection,
    sql: &str,
    table: Option<&str>,
) -> Result<Vec<SchemaObject>, EngineError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = match table {
        Some(table) => stmt.query(params![table])?,
        None => stmt.query([])?,
    };
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(SchemaObject::new(
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
        ));
    }
    Ok(out)
}
