#![forbid(unsafe_code)]

//! Table-rebuild schema evolution.
//!
//! SQLite has no in-place `DROP COLUMN` with indexes attached and no way to add
//! a primary key to an existing table, so those changes (and column renames on
//! engines older than 3.25) reconstruct the table:
//!
//! 1. validate the plan against a freshly introspected schema;
//! 2. create `<table>_temp` from the stored `CREATE TABLE` text with the change
//!    applied, so every declared constraint survives;
//! 3. copy every row with an explicit column projection;
//! 4. drop the original and rename the temp table into its place, with
//!    `legacy_alter_table` on so views reading the table are left alone;
//! 5. recreate the stored indexes and triggers and any rewritten views.
//!
//! Between the drop and the rename the original data only exists in the temp
//! table. With [`RebuildOptions::transactional`] (the default) steps 2-5 run
//! inside a savepoint, so any failure rolls the whole rebuild back. Without it
//! a failed rename is fatal and reported as such.

use super::engine::{EngineError, SchemaEngine};
use dm_core::plan::{PlannedRebuild, plan_rebuild, select_path, temp_definition};
use dm_core::sql::{
    IndexStatement, ViewStatement, quote_ident, rename_trigger_column, trigger_references_column,
};
use dm_core::{PlanError, RebuildPath, RebuildPlan, TableSchema};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info, warn};

const SAVEPOINT: &str = "dm_rebuild";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RebuildOptions {
    pub transactional: bool,
    pub allow_native: bool,
}

impl Default for RebuildOptions {
    fn default() -> Self {
        Self {
            transactional: true,
            allow_native: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RebuildOutcome {
    pub new_schema: TableSchema,
    pub path_taken: RebuildPath,
    pub recreated_indexes: Vec<String>,
    pub dropped_indexes: Vec<String>,
    pub recreated_triggers: Vec<String>,
    pub dropped_triggers: Vec<String>,
    pub rewritten_views: Vec<String>,
    pub dropped_views: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildStage {
    Validate,
    Native,
    Stage,
    Copy,
    Swap,
    Reindex,
    Restore,
    Commit,
}

impl fmt::Display for RebuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validate => "validate",
            Self::Native => "native",
            Self::Stage => "stage",
            Self::Copy => "copy",
            Self::Swap => "swap",
            Self::Reindex => "reindex",
            Self::Restore => "restore",
            Self::Commit => "commit",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStep {
    LegacyAlter,
    DropViews,
    DropOriginal,
    RenameTemp,
}

impl fmt::Display for SwapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LegacyAlter => f.write_str("legacy alter mode"),
            Self::DropViews => f.write_str("drop views"),
            Self::DropOriginal => f.write_str("drop original"),
            Self::RenameTemp => f.write_str("rename temp"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RebuildError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("introspecting {table} failed: {source}")]
    Introspect { table: String, source: EngineError },
    #[error("temp table {temp_table} for {table} already exists; clean it up before rebuilding")]
    TempNameCollision { table: String, temp_table: String },
    #[error("native alter of {table}.{column} failed: {message}")]
    NativeFailed {
        table: String,
        column: String,
        message: String,
    },
    #[error("creating {temp_table} for {table}.{column} failed: {message}")]
    StageFailed {
        table: String,
        temp_table: String,
        column: String,
        message: String,
    },
    #[error("copying rows of {table} (changing {column}) failed: {message}")]
    CopyFailed {
        table: String,
        column: String,
        message: String,
    },
    #[error(
        "swap of {table} (changing {column}) failed at {step}: {message}{}",
        swap_note(.step, .rolled_back)
    )]
    SwapFailed {
        table: String,
        temp_table: String,
        column: String,
        step: SwapStep,
        message: String,
        rolled_back: bool,
    },
    #[error("recreating index {index} on {table} failed: {message}{}", rollback_note(.rolled_back))]
    ReindexFailed {
        table: String,
        column: String,
        index: String,
        message: String,
        rolled_back: bool,
    },
    #[error("restoring {object} on {table} failed: {message}{}", rollback_note(.rolled_back))]
    RestoreFailed {
        table: String,
        column: String,
        object: String,
        message: String,
        rolled_back: bool,
    },
    #[error("committing rebuild of {table} failed: {message}{}", rollback_note(.rolled_back))]
    CommitFailed {
        table: String,
        column: String,
        message: String,
        rolled_back: bool,
    },
}

fn rollback_note(rolled_back: &bool) -> &'static str {
    if *rolled_back { " (rolled back)" } else { "" }
}

fn swap_note(step: &SwapStep, rolled_back: &bool) -> &'static str {
    match (step, rolled_back) {
        (_, true) => " (rolled back)",
        (SwapStep::RenameTemp, false) => {
            " (FATAL: original table dropped, data is in the temp table)"
        }
        (_, false) => " (original table still in place)",
    }
}

impl RebuildError {
    pub fn stage(&self) -> RebuildStage {
        match self {
            Self::Plan(_) | Self::Introspect { .. } => RebuildStage::Validate,
            Self::NativeFailed { .. } => RebuildStage::Native,
            Self::TempNameCollision { .. } | Self::StageFailed { .. } => RebuildStage::Stage,
            Self::CopyFailed { .. } => RebuildStage::Copy,
            Self::SwapFailed { .. } => RebuildStage::Swap,
            Self::ReindexFailed { .. } => RebuildStage::Reindex,
            Self::RestoreFailed { .. } => RebuildStage::Restore,
            Self::CommitFailed { .. } => RebuildStage::Commit,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Plan(err) => err.code(),
            Self::Introspect { source, .. } => source.code(),
            Self::TempNameCollision { .. } => "TEMP_NAME_COLLISION",
            Self::NativeFailed { .. } => "NATIVE_ALTER_FAILED",
            Self::StageFailed { .. } => "STAGE_FAILED",
            Self::CopyFailed { .. } => "COPY_FAILED",
            Self::SwapFailed { .. } => "SWAP_FAILED",
            Self::ReindexFailed { .. } => "REINDEX_FAILED",
            Self::RestoreFailed { .. } => "RESTORE_FAILED",
            Self::CommitFailed { .. } => "COMMIT_FAILED",
        }
    }

    /// A rename that failed after the original was dropped, and was not rolled
    /// back, leaves the data only in the temp table. Never retry these
    /// automatically.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::SwapFailed {
                step, rolled_back, ..
            } => !rolled_back && *step == SwapStep::RenameTemp,
            Self::CommitFailed { rolled_back, .. } => !rolled_back,
            _ => false,
        }
    }

    fn mark_rolled_back(&mut self) {
        match self {
            Self::SwapFailed { rolled_back, .. }
            | Self::ReindexFailed { rolled_back, .. }
            | Self::RestoreFailed { rolled_back, .. }
            | Self::CommitFailed { rolled_back, .. } => *rolled_back = true,
            _ => {}
        }
    }
}

/// Applies `plan` to the table described by `current`.
///
/// `current` must have been introspected right before the call; the caller
/// guarantees no other rebuild of the same table is in flight.
pub fn rebuild<E>(
    engine: &E,
    current: &TableSchema,
    plan: &RebuildPlan,
    options: &RebuildOptions,
) -> Result<RebuildOutcome, RebuildError>
where
    E: SchemaEngine + ?Sized,
{
    let planned = plan_rebuild(current, plan)?;
    let version = engine.engine_version();
    let path = select_path(plan, version, options.allow_native);
    info!(
        table = %current.name,
        %plan,
        %version,
        ?path,
        transactional = options.transactional,
        "schema rebuild"
    );

    let report = match (path, plan) {
        (RebuildPath::Native, RebuildPlan::RenameColumn { to, .. }) => {
            rename_natively(engine, &planned, to)?;
            RebuildReport::default()
        }
        _ => {
            let create_temp = temp_definition(current, plan, &planned)?;
            let copy = |transactional| {
                rebuild_by_copy(engine, current, plan, &planned, &create_temp, transactional)
            };
            if options.transactional {
                in_savepoint(engine, &planned, || copy(true))?
            } else {
                copy(false)?
            }
        }
    };

    let new_schema = engine
        .introspect(&current.name)
        .map_err(|source| RebuildError::Introspect {
            table: current.name.clone(),
            source,
        })?;

    info!(
        table = %new_schema.name,
        ?path,
        recreated = report.recreated_indexes.len(),
        dropped = report.dropped_indexes.len(),
        triggers = report.recreated_triggers.len(),
        views = report.rewritten_views.len(),
        "schema rebuild complete"
    );

    Ok(RebuildOutcome {
        new_schema,
        path_taken: path,
        recreated_indexes: report.recreated_indexes,
        dropped_indexes: report.dropped_indexes,
        recreated_triggers: report.recreated_triggers,
        dropped_triggers: report.dropped_triggers,
        rewritten_views: report.rewritten_views,
        dropped_views: report.dropped_views,
    })
}

fn rename_natively<E>(engine: &E, planned: &PlannedRebuild, to: &str) -> Result<(), RebuildError>
where
    E: SchemaEngine + ?Sized,
{
    let sql = format!(
        "ALTER TABLE {} RENAME COLUMN {} TO {}",
        quote_ident(&planned.table),
        quote_ident(&planned.changed_column),
        quote_ident(to.trim())
    );
    engine
        .execute(&sql)
        .map_err(|err| RebuildError::NativeFailed {
            table: planned.table.clone(),
            column: planned.changed_column.clone(),
            message: err.to_string(),
        })
}

/// Catalog objects carried over by a copy rebuild.
#[derive(Debug, Default)]
struct RebuildReport {
    recreated_indexes: Vec<String>,
    dropped_indexes: Vec<String>,
    recreated_triggers: Vec<String>,
    dropped_triggers: Vec<String>,
    rewritten_views: Vec<String>,
    dropped_views: Vec<String>,
}

/// Views and triggers to put back once the rebuilt table is in place.
#[derive(Debug, Default)]
struct Dependents {
    stale_views: Vec<String>,
    views: Vec<(String, String)>,
    triggers: Vec<(String, String)>,
}

fn in_savepoint<E, F>(
    engine: &E,
    planned: &PlannedRebuild,
    body: F,
) -> Result<RebuildReport, RebuildError>
where
    E: SchemaEngine + ?Sized,
    F: FnOnce() -> Result<RebuildReport, RebuildError>,
{
    engine
        .execute(&format!("SAVEPOINT {SAVEPOINT}"))
        .map_err(|err| RebuildError::StageFailed {
            table: planned.table.clone(),
            temp_table: planned.temp_table.clone(),
            column: planned.changed_column.clone(),
            message: err.to_string(),
        })?;

    let result = body().and_then(|report| {
        engine
            .execute(&format!("RELEASE {SAVEPOINT}"))
            .map(|()| report)
            .map_err(|err| RebuildError::CommitFailed {
                table: planned.table.clone(),
                column: planned.changed_column.clone(),
                message: err.to_string(),
                rolled_back: false,
            })
    });

    result.map_err(|mut err| {
        match engine.execute(&format!("ROLLBACK TO {SAVEPOINT}; RELEASE {SAVEPOINT}")) {
            Ok(()) => {
                err.mark_rolled_back();
                warn!(table = %planned.table, stage = %err.stage(), "rebuild rolled back");
            }
            Err(rollback) => {
                error!(
                    table = %planned.table,
                    error = %rollback,
                    "rollback of failed rebuild failed; inspect the database manually"
                );
            }
        }
        err
    })
}

fn rebuild_by_copy<E>(
    engine: &E,
    current: &TableSchema,
    plan: &RebuildPlan,
    planned: &PlannedRebuild,
    create_temp: &str,
    transactional: bool,
) -> Result<RebuildReport, RebuildError>
where
    E: SchemaEngine + ?Sized,
{
    let table = &planned.table;
    let temp = &planned.temp_table;
    let column = &planned.changed_column;

    let collision = engine
        .object_exists(temp)
        .map_err(|source| RebuildError::Introspect {
            table: table.clone(),
            source,
        })?;
    if collision {
        return Err(RebuildError::TempNameCollision {
            table: table.clone(),
            temp_table: temp.clone(),
        });
    }

    let mut report = RebuildReport::default();
    let dependents = plan_dependents(current, plan, planned, &mut report)?;

    engine
        .execute(create_temp)
        .map_err(|err| RebuildError::StageFailed {
            table: table.clone(),
            temp_table: temp.clone(),
            column: column.clone(),
            message: err.to_string(),
        })?;
    info!(%table, temp_table = %temp, "staged temp table");

    if let Err(err) = copy_rows(engine, plan, planned) {
        if !transactional {
            abandon_temp(engine, temp);
        }
        return Err(err);
    }

    if let Err(err) = swap_tables(engine, planned, &dependents) {
        if !transactional {
            if err.is_fatal() {
                error!(
                    %table,
                    temp_table = %temp,
                    "original table dropped but temp table rename failed; data remains in the temp table"
                );
            } else {
                abandon_temp(engine, temp);
            }
        }
        return Err(err);
    }
    info!(%table, "swapped rebuilt table into place");

    reinstall_indexes(engine, current, plan, planned, &mut report)?;
    restore_dependents(engine, planned, dependents, &mut report)?;
    Ok(report)
}

/// Decides up front which views and triggers survive the change and in what
/// form, so nothing is dropped before every definition has been rewritten.
fn plan_dependents(
    current: &TableSchema,
    plan: &RebuildPlan,
    planned: &PlannedRebuild,
    report: &mut RebuildReport,
) -> Result<Dependents, RebuildError> {
    let table = &planned.table;
    let column = &planned.changed_column;
    let restore_failed = |object: &str, message: String| RebuildError::RestoreFailed {
        table: table.clone(),
        column: column.clone(),
        object: object.to_string(),
        message,
        rolled_back: false,
    };
    let mut dependents = Dependents::default();

    for view in &current.dependent_views {
        let mut parsed = ViewStatement::parse(&view.definition_text)
            .map_err(|err| restore_failed(&view.name, err.to_string()))?;
        if !parsed.references_column(table, column) {
            continue;
        }
        match plan {
            RebuildPlan::RenameColumn { to, .. } => {
                parsed.rename_column(table, column, to.trim());
                dependents.stale_views.push(view.name.clone());
                dependents.views.push((view.name.clone(), parsed.to_string()));
                report.rewritten_views.push(view.name.clone());
            }
            RebuildPlan::DropColumn { .. } => {
                warn!(view = %view.name, %column, "view referenced dropped column; removed");
                dependents.stale_views.push(view.name.clone());
                report.dropped_views.push(view.name.clone());
            }
            RebuildPlan::AddPrimaryKey { .. } => {}
        }
    }

    for trigger in &current.triggers {
        let sql = &trigger.definition_text;
        let sql = match plan {
            RebuildPlan::RenameColumn { to, .. } => {
                rename_trigger_column(sql, table, column, to.trim())
                    .map_err(|err| restore_failed(&trigger.name, err.to_string()))?
            }
            RebuildPlan::DropColumn { .. } => {
                let uses_column = trigger_references_column(sql, table, column)
                    .map_err(|err| restore_failed(&trigger.name, err.to_string()))?;
                if uses_column {
                    warn!(trigger = %trigger.name, %column, "trigger referenced dropped column; not recreated");
                    report.dropped_triggers.push(trigger.name.clone());
                    continue;
                }
                sql.clone()
            }
            RebuildPlan::AddPrimaryKey { .. } => sql.clone(),
        };
        dependents.triggers.push((trigger.name.clone(), sql));
    }

    Ok(dependents)
}

// Point of no return when not transactional. `legacy_alter_table` keeps the
// rename from re-checking views that name the table while it is missing.
fn swap_tables<E>(
    engine: &E,
    planned: &PlannedRebuild,
    dependents: &Dependents,
) -> Result<(), RebuildError>
where
    E: SchemaEngine + ?Sized,
{
    let table = &planned.table;
    let temp = &planned.temp_table;
    let swap_failed = |step: SwapStep, err: EngineError| RebuildError::SwapFailed {
        table: table.clone(),
        temp_table: temp.clone(),
        column: planned.changed_column.clone(),
        step,
        message: err.to_string(),
        rolled_back: false,
    };

    engine
        .execute("PRAGMA legacy_alter_table=ON")
        .map_err(|err| swap_failed(SwapStep::LegacyAlter, err))?;

    let result = (|| -> Result<(), RebuildError> {
        for view in &dependents.stale_views {
            engine
                .execute(&format!("DROP VIEW {}", quote_ident(view)))
                .map_err(|err| swap_failed(SwapStep::DropViews, err))?;
        }
        engine
            .execute(&format!("DROP TABLE {}", quote_ident(table)))
            .map_err(|err| swap_failed(SwapStep::DropOriginal, err))?;
        engine
            .execute(&format!(
                "ALTER TABLE {} RENAME TO {}",
                quote_ident(temp),
                quote_ident(table)
            ))
            .map_err(|err| swap_failed(SwapStep::RenameTemp, err))
    })();

    if let Err(err) = engine.execute("PRAGMA legacy_alter_table=OFF") {
        warn!(%table, error = %err, "could not switch legacy_alter_table back off");
    }
    result
}

fn copy_rows<E>(engine: &E, plan: &RebuildPlan, planned: &PlannedRebuild) -> Result<(), RebuildError>
where
    E: SchemaEngine + ?Sized,
{
    let copy_failed = |message: String| RebuildError::CopyFailed {
        table: planned.table.clone(),
        column: planned.changed_column.clone(),
        message,
    };

    // An INTEGER PRIMARY KEY turns NULL into a fresh rowid instead of failing.
    if let RebuildPlan::AddPrimaryKey { .. } = plan {
        let nulls = engine
            .null_count(&planned.table, &planned.changed_column)
            .map_err(|err| copy_failed(err.to_string()))?;
        if nulls > 0 {
            return Err(copy_failed(format!(
                "{nulls} row(s) have NULL in key column {}",
                planned.changed_column
            )));
        }
    }

    engine
        .execute(&planned.copy_sql())
        .map_err(|err| copy_failed(err.to_string()))?;

    let source_rows = engine
        .row_count(&planned.table)
        .map_err(|err| copy_failed(err.to_string()))?;
    let copied_rows = engine
        .row_count(&planned.temp_table)
        .map_err(|err| copy_failed(err.to_string()))?;
    if source_rows != copied_rows {
        return Err(copy_failed(format!(
            "row count mismatch (source={source_rows}, copied={copied_rows})"
        )));
    }
    info!(table = %planned.table, rows = copied_rows, "copied rows");
    Ok(())
}

fn abandon_temp<E>(engine: &E, temp: &str)
where
    E: SchemaEngine + ?Sized,
{
    if let Err(err) = engine.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(temp))) {
        warn!(temp_table = %temp, error = %err, "could not drop abandoned temp table");
    }
}

/// Dropping a table drops its indexes, so every stored index is recreated.
/// Indexes on a dropped column are skipped and reported.
fn reinstall_indexes<E>(
    engine: &E,
    current: &TableSchema,
    plan: &RebuildPlan,
    planned: &PlannedRebuild,
    report: &mut RebuildReport,
) -> Result<(), RebuildError>
where
    E: SchemaEngine + ?Sized,
{
    let column = &planned.changed_column;

    for index in &current.indexes {
        let reindex_failed = |message: String| RebuildError::ReindexFailed {
            table: planned.table.clone(),
            column: column.clone(),
            index: index.name.clone(),
            message,
            rolled_back: false,
        };

        let touches_column = index.references(column);
        let sql = match plan {
            RebuildPlan::DropColumn { .. } if touches_column => {
                warn!(index = %index.name, %column, "index referenced dropped column; not recreated");
                report.dropped_indexes.push(index.name.clone());
                continue;
            }
            RebuildPlan::RenameColumn { to, .. } if touches_column => {
                let mut stmt = IndexStatement::parse(&index.definition_text)
                    .map_err(|err| reindex_failed(err.to_string()))?;
                stmt.rename_column(column, to.trim());
                stmt.to_string()
            }
            _ => index.definition_text.clone(),
        };

        engine
            .execute(&sql)
            .map_err(|err| reindex_failed(err.to_string()))?;
        report.recreated_indexes.push(index.name.clone());
    }

    Ok(())
}

fn restore_dependents<E>(
    engine: &E,
    planned: &PlannedRebuild,
    dependents: Dependents,
    report: &mut RebuildReport,
) -> Result<(), RebuildError>
where
    E: SchemaEngine + ?Sized,
{
    let restore_failed = |object: &str, err: EngineError| RebuildError::RestoreFailed {
        table: planned.table.clone(),
        column: planned.changed_column.clone(),
        object: object.to_string(),
        message: err.to_string(),
        rolled_back: false,
    };

    for (name, sql) in dependents.triggers {
        engine
            .execute(&sql)
            .map_err(|err| restore_failed(&name, err))?;
        report.recreated_triggers.push(name);
    }
    for (name, sql) in &dependents.views {
        engine.execute(sql).map_err(|err| restore_failed(name, err))?;
    }
    Ok(())
}
