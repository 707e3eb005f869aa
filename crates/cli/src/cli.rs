#![forbid(unsafe_code)]

use clap::{Args, Parser, Subcommand, ValueEnum};
use dm_storage::{RebuildOptions, SubscriptionFormat};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dbmaint")]
#[command(about = "SQLite maintenance: schema evolution, housekeeping and publication export")]
#[command(version)]
pub struct Cli {
    /// SQLite database file to operate on
    #[arg(long, global = true, env = "DBMAINT_DB")]
    pub db: Option<PathBuf>,

    /// Path to YAML configuration file
    #[arg(short, long, global = true, env = "DBMAINT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long, global = true)]
    pub output_json: bool,

    /// Log format: text or json
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    pub log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(
        long,
        global = true,
        default_value = "info",
        value_parser = ["debug", "info", "warn", "error"]
    )]
    pub verbosity: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone, Copy, Default)]
pub struct RebuildFlags {
    /// Always copy through a temp table, even when the engine can alter in place
    #[arg(long)]
    pub force_rebuild: bool,

    /// Run the rebuild steps without a wrapping savepoint
    #[arg(long)]
    pub no_transaction: bool,
}

impl RebuildFlags {
    pub fn apply(self, mut options: RebuildOptions) -> RebuildOptions {
        if self.force_rebuild {
            options.allow_native = false;
        }
        if self.no_transaction {
            options.transactional = false;
        }
        options
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List tables, or show one table's columns and indexes
    Inspect {
        table: Option<String>,
    },

    /// Rename a column, rewriting the indexes that use it
    RenameColumn {
        table: String,
        from: String,
        to: String,

        #[command(flatten)]
        rebuild: RebuildFlags,

        /// VACUUM after the rename
        #[arg(long)]
        vacuum: bool,
    },

    /// Drop a column; indexes on it are dropped and reported
    DropColumn {
        table: String,
        column: String,

        #[command(flatten)]
        rebuild: RebuildFlags,
    },

    /// Make an existing column the table's primary key
    AddPrimaryKey {
        table: String,
        column: String,

        #[command(flatten)]
        rebuild: RebuildFlags,
    },

    /// Rename a table
    RenameTable {
        from: String,
        to: String,
    },

    /// Create an index if it does not exist yet
    AddIndex {
        table: String,
        name: String,
        #[arg(required = true)]
        columns: Vec<String>,
    },

    /// REINDEX followed by VACUUM
    Reindex,

    /// VACUUM the database
    Vacuum,

    /// Gather planner statistics (ANALYZE)
    Analyze,

    /// Integrity check, then PRAGMA optimize when it passes
    Optimize,

    /// Write every table's CREATE statement to a file
    DumpSchema {
        #[arg(long, default_value = "schema.sql")]
        out: PathBuf,
    },

    /// Replace text inside every SQL subscription
    ReplaceSubscriptionText {
        from: String,
        to: String,
    },

    /// List subscriptions in SQL or natural-language form
    Subscriptions {
        #[arg(long, value_enum, default_value_t = FormatArg::Sql)]
        format: FormatArg,
    },

    /// Export publications with decoded subscription matches as JSON
    Export {
        #[arg(long)]
        out: PathBuf,

        /// Flip each mask bit with this probability
        #[arg(long)]
        noise: Option<f64>,

        /// Seed for reproducible noise
        #[arg(long, requires = "noise")]
        seed: Option<u64>,
    },

    /// Encode or decode subscription bitmasks
    Bitmask {
        #[command(subcommand)]
        op: BitmaskCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum BitmaskCommand {
    /// Hex blob (16 digits) to the ids it contains
    Decode { hex: String },

    /// Ids in [0, 64) to a hex blob
    Encode { ids: Vec<u32> },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatArg {
    Sql,
    Nlp,
}

impl From<FormatArg> for SubscriptionFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Sql => SubscriptionFormat::Sql,
            FormatArg::Nlp => SubscriptionFormat::Nlp,
        }
    }
}
