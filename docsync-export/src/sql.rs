//! Read-only statement check.

use crate::error::ExportError;

/// Statements that may open a query.
const READ_VERBS: &[&str] = &["SELECT", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "WITH"];

/// Keywords that modify data or schema anywhere in the statement.
const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "REPLACE", "MERGE", "DROP", "ALTER", "CREATE", "TRUNCATE",
    "RENAME", "GRANT", "REVOKE", "CALL", "LOAD", "HANDLER", "LOCK", "SET", "INTO",
];

/// Accept a single `SELECT`/`SHOW`/`DESCRIBE`/`EXPLAIN`/`WITH` statement.
///
/// Quoted literals, identifiers and comments are ignored when looking for
/// keywords; a trailing `;` is allowed.
pub fn ensure_read_only(sql: &str) -> Result<(), ExportError> {
    let scrubbed = scrub(sql);
    let statements: Vec<&str> = scrubbed
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let statement = match statements.as_slice() {
        [] => return Err(ExportError::NotReadOnly("empty statement".into())),
        [one] => *one,
        _ => return Err(ExportError::NotReadOnly("multiple statements".into())),
    };

    let words: Vec<String> = statement
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_uppercase)
        .collect();
    let verb = words.first().map(String::as_str).unwrap_or_default();
    if !READ_VERBS.contains(&verb) {
        return Err(ExportError::NotReadOnly(format!("{verb} statement")));
    }
    if let Some(keyword) = words.iter().find(|w| WRITE_KEYWORDS.contains(&w.as_str())) {
        return Err(ExportError::NotReadOnly(format!("{keyword} inside {verb}")));
    }
    Ok(())
}

/// Blank out comments and replace quoted text with a neutral token.
fn scrub(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                skip_quoted(&mut chars, c);
                out.push_str(" _ ");
            }
            '-' if chars.peek() == Some(&'-') => {
                skip_line(&mut chars);
                out.push(' ');
            }
            '#' => {
                skip_line(&mut chars);
                out.push(' ');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = '\0';
                for c in chars.by_ref() {
                    if previous == '*' && c == '/' {
                        break;
                    }
                    previous = c;
                }
                out.push(' ');
            }
            other => out.push(other),
        }
    }
    out
}

fn skip_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, quote: char) {
    while let Some(c) = chars.next() {
        if c == '\\' && quote != '`' {
            chars.next();
            continue;
        }
        if c == quote {
            // doubled quote is an escaped quote
            if chars.peek() == Some(&quote) {
                chars.next();
                continue;
            }
            return;
        }
    }
}

fn skip_line(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    for c in chars.by_ref() {
        if c == '\n' {
            return;
        }
    }
}
