#![forbid(unsafe_code)]

use super::SqlError;
use super::tokens::{render, significant, tokenize};
use sqlparser::tokenizer::Token;

/// True when the trigger body (or its `UPDATE OF` list) names `column`.
pub fn trigger_references_column(sql: &str, table: &str, column: &str) -> Result<bool, SqlError> {
    let tokens = tokenize(sql)?;
    Ok(!column_positions(&tokens, table, column).is_empty())
}

/// Rewrites every reference to `from` in a `CREATE TRIGGER` statement on `table`.
pub fn rename_trigger_column(
    sql: &str,
    table: &str,
    from: &str,
    to: &str,
) -> Result<String, SqlError> {
    let mut tokens = tokenize(sql)?;
    for idx in column_positions(&tokens, table, from) {
        tokens[idx] = Token::make_word(to, Some('"'));
    }
    Ok(render(&tokens))
}

// Words spelling the column that are not function calls, not qualifiers
// themselves, and, when qualified, qualified by NEW, OLD or the table.
fn column_positions(tokens: &[Token], table: &str, column: &str) -> Vec<usize> {
    let order = significant(tokens);
    let word_is = |pos: usize, name: &str| {
        matches!(&tokens[order[pos]], Token::Word(word) if word.value.eq_ignore_ascii_case(name))
    };
    let token_at = |pos: Option<usize>| pos.and_then(|p| order.get(p)).map(|&idx| &tokens[idx]);

    (0..order.len())
        .filter(|&pos| word_is(pos, column))
        .filter(|&pos| {
            !matches!(
                token_at(Some(pos + 1)),
                Some(Token::LParen) | Some(Token::Period)
            )
        })
        .filter(|&pos| match token_at(pos.checked_sub(1)) {
            Some(Token::Period) => pos
                .checked_sub(2)
                .is_some_and(|q| word_is(q, "new") || word_is(q, "old") || word_is(q, table)),
            _ => true,
        })
        .map(|pos| order[pos])
        .collect()
}
