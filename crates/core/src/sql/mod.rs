#![forbid(unsafe_code)]

mod clean;
mod ident;
mod index_def;
mod references;
mod table_def;
mod tokens;
mod trigger_def;
mod view_def;

pub use clean::*;
pub use ident::*;
pub use index_def::*;
pub use table_def::*;
pub use tokens::*;
pub use trigger_def::*;
pub use view_def::*;

use sqlparser::ast::Statement;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;

pub(crate) const DIALECT: SQLiteDialect = SQLiteDialect {};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SqlError {
    #[error("cannot tokenize SQL: {0}")]
    Tokenize(String),
    #[error("cannot parse SQL: {0}")]
    Parse(String),
    #[error("expected one {expected} statement")]
    Unexpected { expected: &'static str },
    #[error("column {column} is not declared in the statement")]
    ColumnNotDeclared { column: String },
    #[error("column {column} is used by `{usage}`")]
    ColumnInUse { column: String, usage: String },
}

/// Parses exactly one statement written in SQLite syntax.
pub fn parse_statement(sql: &str, expected: &'static str) -> Result<Statement, SqlError> {
    let mut statements =
        Parser::parse_sql(&DIALECT, sql).map_err(|err| SqlError::Parse(err.to_string()))?;
    match statements.pop() {
        Some(statement) if statements.is_empty() => Ok(statement),
        _ => Err(SqlError::Unexpected { expected }),
    }
}
