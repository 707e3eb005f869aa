#![forbid(unsafe_code)]

use super::references::{ColumnRef, object_is};
use super::{SqlError, parse_statement};
use sqlparser::ast::{Statement, TableFactor, Visit, Visitor, visit_relations};
use std::fmt;
use std::ops::ControlFlow;

/// A stored `CREATE VIEW` statement.
#[derive(Clone, Debug)]
pub struct ViewStatement {
    statement: Statement,
}

impl ViewStatement {
    pub fn parse(sql: &str) -> Result<Self, SqlError> {
        match parse_statement(sql, "CREATE VIEW")? {
            statement @ Statement::CreateView { .. } => Ok(Self { statement }),
            _ => Err(SqlError::Unexpected {
                expected: "CREATE VIEW",
            }),
        }
    }

    pub fn name(&self) -> &str {
        match &self.statement {
            Statement::CreateView { name, .. } => {
                name.0.last().map_or("", |ident| ident.value.as_str())
            }
            _ => "",
        }
    }

    /// True when `table` appears anywhere in the view's FROM clauses.
    pub fn reads_table(&self, table: &str) -> bool {
        visit_relations(&self.statement, |relation| {
            if object_is(relation, table) {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .is_break()
    }

    pub fn references_column(&self, table: &str, column: &str) -> bool {
        self.column_ref(table, column).found_in(&self.statement)
    }

    /// Rewrites references to `table.from`, whether bare, table-qualified or
    /// behind an alias of `table`.
    pub fn rename_column(&mut self, table: &str, from: &str, to: &str) {
        let refs = self.column_ref(table, from);
        refs.rename_in(&mut self.statement, to);
    }

    fn column_ref<'a>(&self, table: &str, column: &'a str) -> ColumnRef<'a> {
        let mut aliases = TableAliases {
            table,
            found: Vec::new(),
        };
        let _ = self.statement.visit(&mut aliases);
        aliases
            .found
            .into_iter()
            .fold(ColumnRef::new(column).qualified_by(table), |refs, alias| {
                refs.qualified_by(alias)
            })
    }
}

impl fmt::Display for ViewStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.statement)
    }
}

struct TableAliases<'t> {
    table: &'t str,
    found: Vec<String>,
}

impl Visitor for TableAliases<'_> {
    type Break = ();

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<()> {
        if let TableFactor::Table {
            name,
            alias: Some(alias),
            ..
        } = factor
        {
            if object_is(name, self.table) {
                self.found.push(alias.name.value.clone());
            }
        }
        ControlFlow::Continue(())
    }
}
