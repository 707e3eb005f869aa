#![forbid(unsafe_code)]

use super::references::{ColumnRef, ident_is, object_is, quoted, rename_idents};
use super::{SqlError, parse_statement};
use sqlparser::ast::{
    ColumnOption, ColumnOptionDef, CreateTable, ObjectName, Statement, TableConstraint,
};
use std::fmt;

/// A stored `CREATE TABLE` statement, edited column by column and rendered
/// back with every constraint it was declared with.
#[derive(Clone, Debug)]
pub struct TableStatement {
    table: CreateTable,
}

impl TableStatement {
    pub fn parse(sql: &str) -> Result<Self, SqlError> {
        match parse_statement(sql, "CREATE TABLE")? {
            Statement::CreateTable(table) => Ok(Self { table }),
            _ => Err(SqlError::Unexpected {
                expected: "CREATE TABLE",
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.table
            .name
            .0
            .last()
            .map_or("", |ident| ident.value.as_str())
    }

    pub fn set_name(&mut self, name: &str) {
        self.table.name = ObjectName(vec![quoted(name)]);
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.table
            .columns
            .iter()
            .map(|def| def.name.value.as_str())
            .collect()
    }

    fn position(&self, column: &str) -> Result<usize, SqlError> {
        self.table
            .columns
            .iter()
            .position(|def| ident_is(&def.name, column))
            .ok_or_else(|| SqlError::ColumnNotDeclared {
                column: column.to_string(),
            })
    }

    /// Renames the column and every reference to it: key and unique lists,
    /// CHECK and generated expressions, and foreign keys pointing back at
    /// this table.
    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<(), SqlError> {
        let idx = self.position(from)?;
        let table = self.name().to_string();
        self.table.columns[idx].name = quoted(to);

        for constraint in &mut self.table.constraints {
            match constraint {
                TableConstraint::PrimaryKey { columns, .. }
                | TableConstraint::Unique { columns, .. } => rename_idents(columns, from, to),
                TableConstraint::ForeignKey {
                    columns,
                    foreign_table,
                    referred_columns,
                    ..
                } => {
                    rename_idents(columns, from, to);
                    if object_is(foreign_table, &table) {
                        rename_idents(referred_columns, from, to);
                    }
                }
                _ => {}
            }
        }
        for def in &mut self.table.columns {
            for option in &mut def.options {
                if let ColumnOption::ForeignKey {
                    foreign_table,
                    referred_columns,
                    ..
                } = &mut option.option
                {
                    if object_is(foreign_table, &table) {
                        rename_idents(referred_columns, from, to);
                    }
                }
            }
        }

        ColumnRef::new(from)
            .qualified_by(table)
            .rename_in(&mut self.table, to);
        Ok(())
    }

    /// Removes the column. A primary key loses the column (and disappears
    /// when it was the only key column); any other constraint or expression
    /// still naming the column makes the drop fail.
    pub fn drop_column(&mut self, column: &str) -> Result<(), SqlError> {
        let idx = self.position(column)?;
        let table = self.name().to_string();
        let refs = ColumnRef::new(column).qualified_by(table.as_str());
        let in_use = |usage: String| SqlError::ColumnInUse {
            column: column.to_string(),
            usage,
        };

        for constraint in &self.table.constraints {
            let blocked = match constraint {
                TableConstraint::Unique { columns, .. } => {
                    columns.iter().any(|ident| ident_is(ident, column))
                }
                TableConstraint::ForeignKey {
                    columns,
                    foreign_table,
                    referred_columns,
                    ..
                } => {
                    columns.iter().any(|ident| ident_is(ident, column))
                        || (object_is(foreign_table, &table)
                            && referred_columns.iter().any(|ident| ident_is(ident, column)))
                }
                TableConstraint::PrimaryKey { .. } => false,
                other => refs.found_in(other),
            };
            if blocked {
                return Err(in_use(constraint.to_string()));
            }
        }
        for (_, def) in self.table.columns.iter().enumerate().filter(|(at, _)| *at != idx) {
            let self_reference = def.options.iter().any(|option| match &option.option {
                ColumnOption::ForeignKey {
                    foreign_table,
                    referred_columns,
                    ..
                } => {
                    object_is(foreign_table, &table)
                        && referred_columns.iter().any(|ident| ident_is(ident, column))
                }
                _ => false,
            });
            if self_reference || refs.found_in(def) {
                return Err(in_use(def.to_string()));
            }
        }

        self.table.columns.remove(idx);
        self.table.constraints.retain_mut(|constraint| match constraint {
            TableConstraint::PrimaryKey { columns, .. } => {
                columns.retain(|ident| !ident_is(ident, column));
                !columns.is_empty()
            }
            _ => true,
        });
        Ok(())
    }

    /// Declares the column `PRIMARY KEY` inline, so an `INTEGER` column
    /// becomes the rowid alias exactly as if the table had been created so.
    pub fn add_primary_key(&mut self, column: &str) -> Result<(), SqlError> {
        let idx = self.position(column)?;
        self.table.columns[idx].options.push(ColumnOptionDef {
            name: None,
            option: ColumnOption::Unique {
                is_primary: true,
                characteristics: None,
            },
        });
        Ok(())
    }
}

impl fmt::Display for TableStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table)
    }
}
