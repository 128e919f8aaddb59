//! SQL Statement Guard
//!
//! Lexical checks applied to planner-written SQL before it reaches SQLite.
//! A statement passes when it is a single `SELECT` or `WITH` query whose
//! values are all bound through positional `?` placeholders: string, blob and
//! numeric literals are rejected, as are numbered or named parameters.
//!
//! The guard is a first line of defence. The connection itself is read-only
//! and the prepared statement is checked with `Statement::readonly()`.

use crate::error::{ToolError, ToolResultOf};

/// A statement that passed the guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardedSql<'a> {
    /// Statement text without the trailing `;` and anything after it.
    pub body: &'a str,
    /// Number of `?` placeholders.
    pub placeholders: usize,
}

/// Check `sql` and count its placeholders.
pub fn inspect_sql(sql: &str) -> ToolResultOf<GuardedSql<'_>> {
    let bytes = sql.as_bytes();
    let mut i = 0;
    let mut placeholders = 0;
    let mut first_word: Option<&str> = None;
    let mut terminator: Option<usize> = None;
    let mut prev_ident = false;

    while i < bytes.len() {
        let c = bytes[i];

        // Comments and whitespace are allowed anywhere, including after `;`.
        if c.is_ascii_whitespace() {
            prev_ident = false;
            i += 1;
            continue;
        }
        if c == b'-' && bytes.get(i + 1) == Some(&b'-') {
            i = sql[i..].find('\n').map(|n| i + n + 1).unwrap_or(bytes.len());
            prev_ident = false;
            continue;
        }
        if c == b'/' && bytes.get(i + 1) == Some(&b'*') {
            i = sql[i + 2..]
                .find("*/")
                .map(|n| i + 2 + n + 2)
                .ok_or_else(|| ToolError::validation("unterminated block comment"))?;
            prev_ident = false;
            continue;
        }

        if terminator.is_some() {
            return Err(ToolError::validation(
                "only a single statement is allowed per query",
            ));
        }

        match c {
            b';' => {
                terminator = Some(i);
                prev_ident = false;
                i += 1;
            }
            b'\'' => {
                return Err(ToolError::validation(
                    "string literals are not allowed; bind values with ? placeholders",
                ));
            }
            b'"' | b'`' => {
                i = skip_quoted(sql, i, c as char)?;
                prev_ident = true;
            }
            b'[' => {
                i = skip_quoted(sql, i, ']')?;
                prev_ident = true;
            }
            b'?' => {
                if bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit()) {
                    return Err(ToolError::validation(
                        "numbered placeholders are not supported; use plain ?",
                    ));
                }
                placeholders += 1;
                prev_ident = false;
                i += 1;
            }
            b':' | b'@' | b'$' if bytes.get(i + 1).is_some_and(|b| is_ident_start(*b)) => {
                return Err(ToolError::validation(
                    "named parameters are not supported; use positional ? placeholders",
                ));
            }
            b'0'..=b'9' if !prev_ident => {
                return Err(ToolError::validation(
                    "numeric literals are not allowed; bind values with ? placeholders",
                ));
            }
            b'.' if !prev_ident && bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit()) => {
                return Err(ToolError::validation(
                    "numeric literals are not allowed; bind values with ? placeholders",
                ));
            }
            _ if is_ident_start(c) || (prev_ident && is_ident_char(c)) => {
                let start = i;
                while i < bytes.len() && is_ident_char(bytes[i]) {
                    i += 1;
                }
                // `x'..'` and `X'..'` are blob literals.
                if bytes.get(i) == Some(&b'\'') {
                    return Err(ToolError::validation(
                        "blob and string literals are not allowed; bind values with ? placeholders",
                    ));
                }
                if first_word.is_none() {
                    first_word = Some(&sql[start..i]);
                }
                prev_ident = true;
            }
            _ => {
                prev_ident = false;
                i += 1;
            }
        }
    }

    let keyword = first_word.ok_or_else(|| ToolError::validation("query is empty"))?;
    if !keyword.eq_ignore_ascii_case("select") && !keyword.eq_ignore_ascii_case("with") {
        return Err(ToolError::validation(format!(
            "only SELECT or WITH queries are allowed, got {}",
            keyword.to_ascii_uppercase()
        )));
    }

    let body = match terminator {
        Some(end) => &sql[..end],
        None => sql,
    };
    Ok(GuardedSql {
        body: body.trim(),
        placeholders,
    })
}

fn skip_quoted(sql: &str, start: usize, close: char) -> ToolResultOf<usize> {
    let rest = &sql[start + 1..];
    let mut offset = 0;
    while let Some(pos) = rest[offset..].find(close) {
        let end = offset + pos;
        // A doubled quote is an escaped quote inside the identifier.
        if close != ']' && rest[end + 1..].starts_with(close) {
            offset = end + 2;
            continue;
        }
        return Ok(start + 1 + end + close.len_utf8());
    }
    Err(ToolError::validation("unterminated quoted identifier"))
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

fn is_ident_char(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit() || b == b'$'
}
