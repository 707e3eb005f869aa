#![forbid(unsafe_code)]

use super::references::{ColumnRef, ident_is};
use super::{SqlError, parse_statement};
use sqlparser::ast::{CreateIndex, Expr, Statement, visit_expressions};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::ControlFlow;

/// A stored `CREATE [UNIQUE] INDEX` statement.
///
/// Column references live in the indexed expressions and the partial-index
/// `WHERE` clause; the index name, the table name, function names, collations
/// and string literals are never touched by a rename.
#[derive(Clone, Debug)]
pub struct IndexStatement {
    index: CreateIndex,
}

impl IndexStatement {
    pub fn parse(sql: &str) -> Result<Self, SqlError> {
        match parse_statement(sql, "CREATE INDEX")? {
            Statement::CreateIndex(index) => Ok(Self { index }),
            _ => Err(SqlError::Unexpected {
                expected: "CREATE INDEX",
            }),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.index
            .name
            .as_ref()
            .and_then(|name| name.0.last())
            .map(|ident| ident.value.as_str())
    }

    pub fn table(&self) -> &str {
        self.index
            .table_name
            .0
            .last()
            .map_or("", |ident| ident.value.as_str())
    }

    pub fn is_unique(&self) -> bool {
        self.index.unique
    }

    /// Columns of `columns` that the indexed expressions or the WHERE clause refer to.
    pub fn referenced_columns<'c, I>(&self, columns: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'c str>,
    {
        let columns = columns.into_iter().collect::<Vec<_>>();
        let mut out = BTreeSet::new();
        let _ = visit_expressions(&self.index, |expr| {
            let named = match expr {
                Expr::Identifier(ident) => Some(ident),
                Expr::CompoundIdentifier(parts) => parts.last(),
                _ => None,
            };
            if let Some(ident) = named {
                if let Some(column) = columns.iter().find(|c| ident_is(ident, c)) {
                    out.insert((*column).to_string());
                }
            }
            ControlFlow::<()>::Continue(())
        });
        out
    }

    /// Replaces every reference to column `from` with `to`.
    pub fn rename_column(&mut self, from: &str, to: &str) {
        let table = self.table().to_string();
        ColumnRef::new(from)
            .qualified_by(table)
            .rename_in(&mut self.index, to);
    }
}

impl fmt::Display for IndexStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index)
    }
}
