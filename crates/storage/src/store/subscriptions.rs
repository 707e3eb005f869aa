#![forbid(unsafe_code)]

use super::*;
use dm_core::sql::quote_ident;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// Where subscriptions live. Each subscription has an SQL and a natural-language rendering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubscriptionLayout {
    pub table: String,
    pub id_column: String,
    pub sql_column: String,
    pub nlp_column: String,
}

impl Default for SubscriptionLayout {
    fn default() -> Self {
        Self {
            table: "subscriptions".to_string(),
            id_column: "id".to_string(),
            sql_column: "sql_subscription".to_string(),
            nlp_column: "nlp_subscription".to_string(),
        }
    }
}

impl SubscriptionLayout {
    pub fn column(&self, format: SubscriptionFormat) -> &str {
        match format {
            SubscriptionFormat::Sql => &self.sql_column,
            SubscriptionFormat::Nlp => &self.nlp_column,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionFormat {
    Sql,
    Nlp,
}

impl fmt::Display for SubscriptionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sql => f.write_str("sql"),
            Self::Nlp => f.write_str("nlp"),
        }
    }
}

impl FromStr for SubscriptionFormat {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sql" => Ok(Self::Sql),
            "nlp" => Ok(Self::Nlp),
            _ => Err(StoreError::InvalidInput(
                "subscription format must be either sql or nlp",
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubscriptionRow {
    pub subscription_id: i64,
    pub subscription: Option<String>,
}

impl SqliteDb {
    /// Replaces every occurrence of `from` with `to` in the SQL rendering of each
    /// subscription. Returns how many rows changed.
    pub fn replace_subscription_text(
        &self,
        layout: &SubscriptionLayout,
        from: &str,
        to: &str,
    ) -> Result<usize, StoreError> {
        if from.is_empty() {
            return Err(StoreError::InvalidInput(
                "text to replace must not be empty",
            ));
        }
        self.require_columns(&layout.table, &[layout.sql_column.as_str()])?;

        let column = quote_ident(&layout.sql_column);
        let sql = format!(
            "UPDATE {table} SET {column}=replace({column}, ?1, ?2) WHERE instr({column}, ?1) > 0",
            table = quote_ident(&layout.table),
        );
        let updated = self.conn.execute(&sql, params![from, to])?;
        info!(table = %layout.table, %from, %to, updated, "subscription text replaced");
        Ok(updated)
    }

    pub fn list_subscriptions(
        &self,
        layout: &SubscriptionLayout,
        format: SubscriptionFormat,
    ) -> Result<Vec<SubscriptionRow>, StoreError> {
        let column = layout.column(format);
        self.require_columns(&layout.table, &[layout.id_column.as_str(), column])?;

        let sql = format!(
            "SELECT {}, {} FROM {} ORDER BY rowid",
            quote_ident(&layout.id_column),
            quote_ident(column),
            quote_ident(&layout.table)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(SubscriptionRow {
                subscription_id: row.get(0)?,
                subscription: row.get(1)?,
            });
        }
        Ok(out)
    }

    /// Fails with a precise error when the table or one of `columns` is absent.
    pub(in crate::store) fn require_columns(
        &self,
        table: &str,
        columns: &[&str],
    ) -> Result<TableSchema, StoreError> {
        let schema = self.introspect(table)?;
        for column in columns {
            if schema.column(column).is_none() {
                return Err(StoreError::ColumnNotFound {
                    table: schema.name.clone(),
                    column: (*column).to_string(),
                });
            }
        }
        Ok(schema)
    }
}
