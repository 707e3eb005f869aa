#![forbid(unsafe_code)]

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    /// 1-based position inside the primary key, 0 when the column is not part of it.
    pub pk_ordinal: u32,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            not_null: false,
            default_value: None,
            pk_ordinal: 0,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn primary_key(mut self, ordinal: u32) -> Self {
        self.pk_ordinal = ordinal;
        self
    }

    pub fn with_default(mut self, expr: impl Into<String>) -> Self {
        self.default_value = Some(expr.into());
        self
    }

    pub fn is_primary_key(&self) -> bool {
        self.pk_ordinal > 0
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IndexDefinition {
    pub name: String,
    pub owning_table: String,
    pub definition_text: String,
    pub referenced_columns: BTreeSet<String>,
}

impl IndexDefinition {
    pub fn references(&self, column: &str) -> bool {
        self.referenced_columns
            .iter()
            .any(|name| name.eq_ignore_ascii_case(column))
    }
}

/// A trigger or view stored next to a table, kept as its `CREATE` text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SchemaObject {
    pub name: String,
    pub definition_text: String,
}

impl SchemaObject {
    pub fn new(name: impl Into<String>, definition_text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definition_text: definition_text.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub name: String,
    /// The `CREATE TABLE` statement as stored in the catalog.
    pub definition_text: String,
    pub columns: Vec<ColumnDefinition>,
    pub indexes: Vec<IndexDefinition>,
    pub triggers: Vec<SchemaObject>,
    /// Views whose queries read this table.
    pub dependent_views: Vec<SchemaObject>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|col| col.is_named(name))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|col| col.name.as_str()).collect()
    }

    pub fn primary_key(&self) -> Vec<&ColumnDefinition> {
        let mut key = self
            .columns
            .iter()
            .filter(|col| col.is_primary_key())
            .collect::<Vec<_>>();
        key.sort_by_key(|col| col.pk_ordinal);
        key
    }

    pub fn index(&self, name: &str) -> Option<&IndexDefinition> {
        self.indexes
            .iter()
            .find(|idx| idx.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EngineVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl EngineVersion {
    /// First SQLite release with `ALTER TABLE .. RENAME COLUMN`.
    pub const NATIVE_RENAME_COLUMN: EngineVersion = EngineVersion::new(3, 25, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Splits SQLite's `X*1000000 + Y*1000 + Z` version number.
    pub fn from_number(number: i32) -> Self {
        let number = number.max(0) as u32;
        Self::new(number / 1_000_000, (number / 1_000) % 1_000, number % 1_000)
    }

    pub fn supports_native_rename_column(self) -> bool {
        self >= Self::NATIVE_RENAME_COLUMN
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
