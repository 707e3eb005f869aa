#![forbid(unsafe_code)]

use super::SqlError;
use super::ident::is_bare_safe;
use super::tokens::{render_token, tokenize};
use sqlparser::tokenizer::Token;

/// Drops double quotes around identifiers that parse identically without them.
///
/// Keywords and identifiers with unusual characters keep their quotes; string
/// literals, comments and everything else pass through untouched.
pub fn clean_identifier_quotes(sql: &str) -> Result<String, SqlError> {
    let tokens = tokenize(sql)?;
    let mut out = String::with_capacity(sql.len());
    for token in &tokens {
        match token {
            Token::Word(word) if word.quote_style == Some('"') && is_bare_safe(&word.value) => {
                out.push_str(&word.value)
            }
            other => out.push_str(&render_token(other)),
        }
    }
    Ok(out.trim().to_string())
}
