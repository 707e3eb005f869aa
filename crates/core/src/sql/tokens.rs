#![forbid(unsafe_code)]

use super::ident::{quote_ident, quote_literal};
use super::{DIALECT, SqlError};
use sqlparser::tokenizer::{Token, Tokenizer, Word};

pub fn tokenize(sql: &str) -> Result<Vec<Token>, SqlError> {
    Tokenizer::new(&DIALECT, sql)
        .tokenize()
        .map_err(|err| SqlError::Tokenize(err.to_string()))
}

/// Token text as SQLite reads it back. The tokenizer unescapes quoted
/// identifiers and string literals, so their quotes are doubled again here.
pub fn render_token(token: &Token) -> String {
    match token {
        Token::Word(word) => render_word(word),
        Token::SingleQuotedString(value) => quote_literal(value),
        other => other.to_string(),
    }
}

pub fn render(tokens: &[Token]) -> String {
    tokens.iter().map(render_token).collect()
}

fn render_word(word: &Word) -> String {
    match word.quote_style {
        Some('"') => quote_ident(&word.value),
        Some('`') => format!("`{}`", word.value.replace('`', "``")),
        Some('[') => format!("[{}]", word.value),
        _ => word.value.clone(),
    }
}

pub(crate) fn is_trivia(token: &Token) -> bool {
    matches!(token, Token::Whitespace(_))
}

/// Positions of the non-whitespace tokens, in order.
pub(crate) fn significant(tokens: &[Token]) -> Vec<usize> {
    tokens
        .iter()
        .enumerate()
        .filter(|(_, token)| !is_trivia(token))
        .map(|(idx, _)| idx)
        .collect()
}
