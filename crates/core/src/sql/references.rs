#![forbid(unsafe_code)]

use sqlparser::ast::{Expr, Ident, ObjectName, Visit, VisitMut};
use sqlparser::ast::{visit_expressions, visit_expressions_mut};
use std::ops::ControlFlow;

pub(crate) fn ident_is(ident: &Ident, name: &str) -> bool {
    ident.value.eq_ignore_ascii_case(name)
}

/// `main.t` and `t` both name table `t`.
pub(crate) fn object_is(object: &ObjectName, name: &str) -> bool {
    object.0.last().is_some_and(|ident| ident_is(ident, name))
}

pub(crate) fn quoted(name: &str) -> Ident {
    Ident::with_quote('"', name)
}

pub(crate) fn rename_idents(idents: &mut [Ident], from: &str, to: &str) {
    for ident in idents.iter_mut().filter(|ident| ident_is(ident, from)) {
        *ident = quoted(to);
    }
}

/// Matches expressions that name one column: bare, or behind one of the
/// accepted qualifiers (`t.col`, `main.t.col`, `alias.col`).
#[derive(Clone, Debug)]
pub(crate) struct ColumnRef<'a> {
    column: &'a str,
    qualifiers: Vec<String>,
}

impl<'a> ColumnRef<'a> {
    pub(crate) fn new(column: &'a str) -> Self {
        Self {
            column,
            qualifiers: Vec::new(),
        }
    }

    pub(crate) fn qualified_by(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifiers.push(qualifier.into());
        self
    }

    pub(crate) fn matches(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Identifier(ident) => ident_is(ident, self.column),
            Expr::CompoundIdentifier(parts) => match parts.as_slice() {
                [.., qualifier, name] => {
                    ident_is(name, self.column)
                        && self.qualifiers.iter().any(|q| ident_is(qualifier, q))
                }
                _ => false,
            },
            _ => false,
        }
    }

    pub(crate) fn found_in<V: Visit>(&self, node: &V) -> bool {
        visit_expressions(node, |expr| {
            if self.matches(expr) {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .is_break()
    }

    pub(crate) fn rename_in<V: VisitMut>(&self, node: &mut V, to: &str) {
        let _ = visit_expressions_mut(node, |expr| {
            if self.matches(expr) {
                match expr {
                    Expr::Identifier(ident) => *ident = quoted(to),
                    Expr::CompoundIdentifier(parts) => {
                        if let Some(last) = parts.last_mut() {
                            *last = quoted(to);
                        }
                    }
                    _ => {}
                }
            }
            ControlFlow::<()>::Continue(())
        });
    }
}
