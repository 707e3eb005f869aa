#![forbid(unsafe_code)]

//! dbmaint - maintenance CLI for SQLite subscription/publication databases.

mod cli;
mod config;
mod error;

use clap::Parser;
use cli::{BitmaskCommand, Cli, Commands};
use config::MaintConfig;
use dm_core::{Bitmask, bitmask};
use dm_storage::{NoiseConfig, RebuildOutcome, SqliteDb, inject_noise, write_json};
use error::{CliError, EXIT_USAGE};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::process::ExitCode;
use tracing::{Level, error, info};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let output_json = cli.output_json;

    if let Err(err) = setup_logging(&cli.verbosity, &cli.log_format) {
        eprintln!("Error: {err}");
        return ExitCode::from(EXIT_USAGE);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if err.is_fatal() {
                error!(code = err.code(), "{err}; the database needs manual repair");
            }
            if output_json {
                let report = json!({ "error": err.to_report() });
                println!("{report:#}");
            } else {
                eprintln!("Error: {err}");
            }
            ExitCode::from(err.exit_code())
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable.
fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().try_init().map_err(|err| err.to_string())
    } else {
        subscriber.try_init().map_err(|err| err.to_string())
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let json = cli.output_json;

    // Codec commands never touch a database.
    if let Commands::Bitmask { op } = &cli.command {
        return run_bitmask(op, json);
    }

    let config = match &cli.config {
        Some(path) => {
            let config = MaintConfig::load(path)?;
            info!(path = %path.display(), "loaded configuration");
            config
        }
        None => MaintConfig::default(),
    };
    let db = SqliteDb::open(
        config.database_path(cli.db.as_deref())?,
        config.busy_timeout(),
    )?;

    dispatch(&db, &config, cli.command, json)?;
    db.close()?;
    Ok(())
}

fn dispatch(
    db: &SqliteDb,
    config: &MaintConfig,
    command: Commands,
    json: bool,
) -> Result<(), CliError> {
    match command {
        // Handled in `run` before a database is opened.
        Commands::Bitmask { .. } => Ok(()),
        Commands::Inspect { table: Some(table) } => {
            let schema = db.introspect(&table)?;
            emit(json, &schema, |schema| {
                let mut out = format!("table {}\n", schema.name);
                for col in &schema.columns {
                    out.push_str(&format!("  {} {}", col.name, col.declared_type));
                    if col.is_primary_key() {
                        out.push_str(" PRIMARY KEY");
                    }
                    if col.not_null {
                        out.push_str(" NOT NULL");
                    }
                    if let Some(default) = &col.default_value {
                        out.push_str(&format!(" DEFAULT {default}"));
                    }
                    out.push('\n');
                }
                for index in &schema.indexes {
                    out.push_str(&format!("  index {}: {}\n", index.name, index.definition_text));
                }
                out
            })
        }
        Commands::Inspect { table: None } => {
            let tables = db.list_tables()?;
            emit(json, &tables, |tables| {
                tables.iter().map(|t| format!("{t}\n")).collect()
            })
        }
        Commands::RenameColumn {
            table,
            from,
            to,
            rebuild,
            vacuum,
        } => {
            let options = rebuild.apply(config.rebuild);
            let outcome = db.rename_column(&table, &from, &to, &options, vacuum)?;
            emit(json, &outcome, |o| {
                describe_outcome(&format!("renamed {table}.{from} to {to}"), o)
            })
        }
        Commands::DropColumn {
            table,
            column,
            rebuild,
        } => {
            let options = rebuild.apply(config.rebuild);
            let outcome = db.drop_column(&table, &column, &options)?;
            emit(json, &outcome, |o| {
                describe_outcome(&format!("dropped {table}.{column}"), o)
            })
        }
        Commands::AddPrimaryKey {
            table,
            column,
            rebuild,
        } => {
            let options = rebuild.apply(config.rebuild);
            let outcome = db.add_primary_key(&table, &column, &options)?;
            emit(json, &outcome, |o| {
                describe_outcome(&format!("{table}.{column} is now the primary key"), o)
            })
        }
        Commands::RenameTable { from, to } => {
            db.rename_table(&from, &to)?;
            emit(json, &json!({ "from": from, "to": to }), |_| {
                format!("renamed table {from} to {to}\n")
            })
        }
        Commands::AddIndex {
            table,
            name,
            columns,
        } => {
            let created = db.add_index(&table, &columns, &name)?;
            emit(json, &created, |c| {
                format!("index {} on {} ({})\n", c.index, c.table, c.columns.join(", "))
            })
        }
        Commands::Reindex => {
            db.reindex_and_vacuum()?;
            emit(json, &json!({ "reindexed": true, "vacuumed": true }), |_| {
                "reindex and vacuum complete\n".to_string()
            })
        }
        Commands::Vacuum => {
            db.vacuum()?;
            emit(json, &json!({ "vacuumed": true }), |_| {
                "vacuum complete\n".to_string()
            })
        }
        Commands::Analyze => {
            db.analyze()?;
            emit(json, &json!({ "analyzed": true }), |_| {
                "analyze complete\n".to_string()
            })
        }
        Commands::Optimize => {
            let report = db.integrity_check_and_optimize()?;
            emit(json, &report, |r| {
                format!("integrity_check: {}\n{}\n", r.integrity_check, r.message)
            })
        }
        Commands::DumpSchema { out } => {
            let tables = db.dump_schema(&out)?;
            emit(
                json,
                &json!({ "path": out.display().to_string(), "tables": tables }),
                |_| format!("wrote {tables} table definition(s) to {}\n", out.display()),
            )
        }
        Commands::ReplaceSubscriptionText { from, to } => {
            let updated = db.replace_subscription_text(&config.subscriptions, &from, &to)?;
            emit(json, &json!({ "updated": updated }), |_| {
                format!("updated {updated} subscription(s) replacing '{from}' with '{to}'\n")
            })
        }
        Commands::Subscriptions { format } => {
            let rows = db.list_subscriptions(&config.subscriptions, format.into())?;
            emit(json, &rows, |rows| {
                let mut out = format!("{} subscription(s)\n", rows.len());
                for row in rows {
                    let text = row.subscription.as_deref().unwrap_or("<null>");
                    out.push_str(&format!("{}: {text}\n", row.subscription_id));
                }
                out
            })
        }
        Commands::Export { out, noise, seed } => {
            let mut records = db.export_publications(&config.publications)?;
            let mut flipped_bits = None;
            if let Some(flip_probability) = noise {
                let report = inject_noise(
                    records,
                    &NoiseConfig {
                        flip_probability,
                        seed,
                    },
                )?;
                flipped_bits = Some(report.flipped_bits);
                records = report.records;
            }
            write_json(&out, &records)?;
            emit(
                json,
                &json!({
                    "path": out.display().to_string(),
                    "records": records.len(),
                    "flipped_bits": flipped_bits,
                }),
                |_| {
                    let mut line =
                        format!("exported {} publication(s) to {}", records.len(), out.display());
                    if let Some(flipped) = flipped_bits {
                        line.push_str(&format!(" ({flipped} bit(s) flipped)"));
                    }
                    line.push('\n');
                    line
                },
            )
        }
    }
}

fn run_bitmask(op: &BitmaskCommand, json: bool) -> Result<(), CliError> {
    let mask = match op {
        BitmaskCommand::Decode { hex } => {
            let bytes = parse_hex(hex)?;
            let ids = bitmask::decode(Some(bytes.as_slice()))?;
            Bitmask::from_ids(ids)?
        }
        BitmaskCommand::Encode { ids } => {
            let ids = ids.iter().copied().collect::<BTreeSet<u32>>();
            Bitmask::from_bytes(&bitmask::encode(&ids)?)?
        }
    };
    let hex = format!("{:016x}", mask.bits());
    let ids = mask.ids().into_iter().collect::<Vec<_>>();
    emit(json, &json!({ "hex": hex, "ids": ids }), |_| {
        let list = ids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        format!("{hex}\n{list}\n")
    })
}

/// Accepts `0x` prefixed or bare hex digits; SQL blob syntax `X'..'` too.
fn parse_hex(raw: &str) -> Result<Vec<u8>, CliError> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .or_else(|| {
            trimmed
                .strip_prefix("X'")
                .or_else(|| trimmed.strip_prefix("x'"))
                .and_then(|rest| rest.strip_suffix('\''))
        })
        .unwrap_or(trimmed);

    if digits.len() % 2 != 0 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CliError::Usage(format!(
            "'{raw}' is not an even-length hex string"
        )));
    }
    (0..digits.len())
        .step_by(2)
        .map(|idx| {
            u8::from_str_radix(&digits[idx..idx + 2], 16)
                .map_err(|err| CliError::Usage(format!("'{raw}': {err}")))
        })
        .collect()
}

fn describe_outcome(headline: &str, outcome: &RebuildOutcome) -> String {
    let path = match outcome.path_taken {
        dm_core::RebuildPath::Native => "native alter",
        dm_core::RebuildPath::Rebuild => "table rebuild",
    };
    let mut out = format!("{headline} ({path})\n");
    out.push_str(&format!(
        "columns: {}\n",
        outcome.new_schema.column_names().join(", ")
    ));
    if !outcome.recreated_indexes.is_empty() {
        out.push_str(&format!(
            "recreated indexes: {}\n",
            outcome.recreated_indexes.join(", ")
        ));
    }
    let lists = [
        ("dropped indexes", &outcome.dropped_indexes),
        ("recreated triggers", &outcome.recreated_triggers),
        ("dropped triggers", &outcome.dropped_triggers),
        ("rewritten views", &outcome.rewritten_views),
        ("dropped views", &outcome.dropped_views),
    ];
    for (label, names) in lists {
        if !names.is_empty() {
            out.push_str(&format!("{label}: {}\n", names.join(", ")));
        }
    }
    out
}

fn emit<T, F>(json: bool, value: &T, text: F) -> Result<(), CliError>
where
    T: Serialize + ?Sized,
    F: FnOnce(&T) -> String,
{
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", text(value));
    }
    Ok(())
}
