#![forbid(unsafe_code)]

//! YAML configuration for `dbmaint`.
//!
//! Every section is optional; missing sections fall back to the layouts the
//! maintenance tooling was written against. Unknown keys are rejected so a
//! typo never silently selects a default table.

use crate::error::CliError;
use dm_storage::{PublicationLayout, RebuildOptions, SubscriptionLayout};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaintConfig {
    /// Database file; `--db` / `DBMAINT_DB` take precedence.
    pub database: Option<PathBuf>,
    pub subscriptions: SubscriptionLayout,
    pub publications: PublicationLayout,
    pub rebuild: RebuildOptions,
    pub busy_timeout_ms: u64,
}

impl Default for MaintConfig {
    fn default() -> Self {
        Self {
            database: None,
            subscriptions: SubscriptionLayout::default(),
            publications: PublicationLayout::default(),
            rebuild: RebuildOptions::default(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl MaintConfig {
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            CliError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, CliError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: MaintConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CliError> {
        let names = [
            ("subscriptions.table", &self.subscriptions.table),
            ("subscriptions.id_column", &self.subscriptions.id_column),
            ("subscriptions.sql_column", &self.subscriptions.sql_column),
            ("subscriptions.nlp_column", &self.subscriptions.nlp_column),
            ("publications.table", &self.publications.table),
            ("publications.id_column", &self.publications.id_column),
            ("publications.payload_column", &self.publications.payload_column),
            ("publications.mask_column", &self.publications.mask_column),
        ];
        for (key, value) in names {
            if value.trim().is_empty() {
                return Err(CliError::Config(format!("{key} must not be empty")));
            }
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// The command-line path wins over the config file.
    pub fn database_path(&self, cli_db: Option<&Path>) -> Result<PathBuf, CliError> {
        cli_db
            .map(Path::to_path_buf)
            .or_else(|| self.database.clone())
            .ok_or_else(|| {
                CliError::Config(
                    "no database given; pass --db, set DBMAINT_DB, or set `database` in the config file"
                        .to_string(),
                )
            })
    }
}
