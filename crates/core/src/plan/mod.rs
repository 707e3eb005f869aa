#![forbid(unsafe_code)]

use crate::schema::{ColumnDefinition, EngineVersion, TableSchema};
use crate::sql::{SqlError, TableStatement, quote_ident};
use serde::Serialize;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RebuildPlan {
    RenameColumn { from: String, to: String },
    DropColumn { name: String },
    AddPrimaryKey { name: String },
}

impl RebuildPlan {
    pub fn rename_column(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::RenameColumn {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn drop_column(name: impl Into<String>) -> Self {
        Self::DropColumn { name: name.into() }
    }

    pub fn add_primary_key(name: impl Into<String>) -> Self {
        Self::AddPrimaryKey { name: name.into() }
    }

    pub fn target_column(&self) -> &str {
        match self {
            Self::RenameColumn { from, .. } => from,
            Self::DropColumn { name } | Self::AddPrimaryKey { name } => name,
        }
    }
}

impl fmt::Display for RebuildPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RenameColumn { from, to } => write!(f, "rename column {from} -> {to}"),
            Self::DropColumn { name } => write!(f, "drop column {name}"),
            Self::AddPrimaryKey { name } => write!(f, "add primary key {name}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("column {column} not found in table {table}")]
    ColumnNotFound { table: String, column: String },
    #[error("cannot drop {column}: it is the only column of table {table}")]
    CannotDropOnlyColumn { table: String, column: String },
    #[error("column {column} already exists in table {table}")]
    ColumnExists { table: String, column: String },
    #[error("table {table} already has a primary key ({existing})")]
    PrimaryKeyExists { table: String, existing: String },
    #[error("invalid plan for table {table}: {message}")]
    InvalidPlan { table: String, message: &'static str },
    #[error("cannot change {column} of table {table}: it is used by `{usage}`")]
    ColumnInUse {
        table: String,
        column: String,
        usage: String,
    },
    #[error("cannot carry over the definition of table {table}: {message}")]
    UnsupportedDefinition { table: String, message: String },
}

impl PlanError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ColumnNotFound { .. } => "COLUMN_NOT_FOUND",
            Self::CannotDropOnlyColumn { .. } => "CANNOT_DROP_ONLY_COLUMN",
            Self::ColumnExists { .. } => "COLUMN_EXISTS",
            Self::PrimaryKeyExists { .. } => "PRIMARY_KEY_EXISTS",
            Self::InvalidPlan { .. } => "INVALID_PLAN",
            Self::ColumnInUse { .. } => "COLUMN_IN_USE",
            Self::UnsupportedDefinition { .. } => "UNSUPPORTED_DEFINITION",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildPath {
    Native,
    Rebuild,
}

/// Picks the execution strategy once per operation from the engine capability.
///
/// Only a column rename has a native single-statement form; drops and primary
/// key changes always go through a table rebuild.
pub fn select_path(plan: &RebuildPlan, version: EngineVersion, allow_native: bool) -> RebuildPath {
    match plan {
        RebuildPlan::RenameColumn { .. }
            if allow_native && version.supports_native_rename_column() =>
        {
            RebuildPath::Native
        }
        _ => RebuildPath::Rebuild,
    }
}

/// One column of the `INSERT INTO temp (..) SELECT .. FROM source` projection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnCopy {
    pub source: String,
    pub target: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedRebuild {
    pub table: String,
    pub temp_table: String,
    pub changed_column: String,
    pub target_columns: Vec<ColumnDefinition>,
    pub copies: Vec<ColumnCopy>,
}

impl PlannedRebuild {
    pub fn copy_sql(&self) -> String {
        let targets = self
            .copies
            .iter()
            .map(|copy| quote_ident(&copy.target))
            .collect::<Vec<_>>()
            .join(", ");
        let sources = self
            .copies
            .iter()
            .map(|copy| quote_ident(&copy.source))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({targets}) SELECT {sources} FROM {}",
            quote_ident(&self.temp_table),
            quote_ident(&self.table)
        )
    }
}

pub fn temp_table_name(table: &str) -> String {
    format!("{table}_temp")
}

pub fn plan_rebuild(schema: &TableSchema, plan: &RebuildPlan) -> Result<PlannedRebuild, PlanError> {
    let table = schema.name.clone();
    let target = plan.target_column();
    let Some(column) = schema.column(target) else {
        return Err(PlanError::ColumnNotFound {
            table,
            column: target.to_string(),
        });
    };
    let changed_column = column.name.clone();

    let (target_columns, copies) = match plan {
        RebuildPlan::RenameColumn { to, .. } => {
            let to = to.trim();
            if to.is_empty() {
                return Err(PlanError::InvalidPlan {
                    table,
                    message: "new column name must not be empty",
                });
            }
            let clash = schema
                .columns
                .iter()
                .any(|col| col.is_named(to) && !col.is_named(&changed_column));
            if clash {
                return Err(PlanError::ColumnExists {
                    table,
                    column: to.to_string(),
                });
            }
            let columns = schema
                .columns
                .iter()
                .map(|col| {
                    let mut col = col.clone();
                    if col.name == changed_column {
                        col.name = to.to_string();
                    }
                    col
                })
                .collect::<Vec<_>>();
            let copies = schema
                .columns
                .iter()
                .zip(&columns)
                .map(|(source, target)| ColumnCopy {
                    source: source.name.clone(),
                    target: target.name.clone(),
                })
                .collect();
            (columns, copies)
        }
        RebuildPlan::DropColumn { .. } => {
            if schema.columns.len() == 1 {
                return Err(PlanError::CannotDropOnlyColumn {
                    table,
                    column: changed_column,
                });
            }
            let mut columns = schema
                .columns
                .iter()
                .filter(|col| col.name != changed_column)
                .cloned()
                .collect::<Vec<_>>();
            if column.is_primary_key() {
                renumber_primary_key(&mut columns);
            }
            let copies = columns
                .iter()
                .map(|col| ColumnCopy {
                    source: col.name.clone(),
                    target: col.name.clone(),
                })
                .collect();
            (columns, copies)
        }
        RebuildPlan::AddPrimaryKey { .. } => {
            let existing = schema.primary_key();
            if !existing.is_empty() {
                return Err(PlanError::PrimaryKeyExists {
                    table,
                    existing: existing
                        .iter()
                        .map(|col| col.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                });
            }
            let columns = schema
                .columns
                .iter()
                .map(|col| {
                    let mut col = col.clone();
                    if col.name == changed_column {
                        col.pk_ordinal = 1;
                    }
                    col
                })
                .collect::<Vec<_>>();
            let copies = columns
                .iter()
                .map(|col| ColumnCopy {
                    source: col.name.clone(),
                    target: col.name.clone(),
                })
                .collect();
            (columns, copies)
        }
    };

    Ok(PlannedRebuild {
        temp_table: temp_table_name(&table),
        table,
        changed_column,
        target_columns,
        copies,
    })
}

/// `CREATE TABLE` text for the temp table of a copy rebuild.
///
/// The plan is applied to the stored definition, so UNIQUE, CHECK, COLLATE,
/// foreign keys and AUTOINCREMENT come across with the data. A definition
/// that cannot be parsed or edited rejects the plan.
pub fn temp_definition(
    schema: &TableSchema,
    plan: &RebuildPlan,
    planned: &PlannedRebuild,
) -> Result<String, PlanError> {
    let table = &schema.name;
    let column = planned.changed_column.as_str();
    let unsupported = |err: SqlError| match err {
        SqlError::ColumnInUse { column, usage } => PlanError::ColumnInUse {
            table: table.clone(),
            column,
            usage,
        },
        other => PlanError::UnsupportedDefinition {
            table: table.clone(),
            message: other.to_string(),
        },
    };

    let mut stmt = TableStatement::parse(&schema.definition_text).map_err(unsupported)?;
    let edited = match plan {
        RebuildPlan::RenameColumn { to, .. } => stmt.rename_column(column, to.trim()),
        RebuildPlan::DropColumn { .. } => stmt.drop_column(column),
        RebuildPlan::AddPrimaryKey { .. } => stmt.add_primary_key(column),
    };
    edited.map_err(unsupported)?;

    let declared = stmt.column_names().len();
    if declared != planned.target_columns.len() {
        return Err(PlanError::UnsupportedDefinition {
            table: table.clone(),
            message: format!(
                "{declared} declared column(s), catalog lists {}",
                planned.target_columns.len()
            ),
        });
    }
    stmt.set_name(&planned.temp_table);
    Ok(stmt.to_string())
}

fn renumber_primary_key(columns: &mut [ColumnDefinition]) {
    let mut order = columns
        .iter()
        .enumerate()
        .filter(|(_, col)| col.is_primary_key())
        .map(|(idx, col)| (col.pk_ordinal, idx))
        .collect::<Vec<_>>();
    order.sort();
    for (ordinal, (_, idx)) in order.into_iter().enumerate() {
        columns[idx].pk_ordinal = ordinal as u32 + 1;
    }
}
