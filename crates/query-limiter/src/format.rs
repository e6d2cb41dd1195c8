//! Rendering helpers for breach reports.
//!
//! Both helpers always produce something readable: placeholders without a
//! matching bind value are left as-is, and with the `pretty` feature enabled,
//! statements that fail to parse fall back to the plain interpolation.

use crate::query::{Params, SqlValue};
use std::fmt::Write;
use std::time::Duration;

/// Render `sql` with its bind values interpolated as SQL literals.
///
/// Supports PostgreSQL style (`$1`, `$2`, ...) and format style (`%s`, with
/// `%%` as an escaped `%`) placeholders. Placeholders inside quoted literals
/// are not touched. Batch parameters render one statement per row.
pub fn format_sql(sql: &str, params: &Params) -> String {
    match params {
        Params::None => prettify(sql.to_string()),
        Params::Single(values) => prettify(interpolate(sql, values)),
        Params::Many(rows) if rows.is_empty() => prettify(sql.to_string()),
        Params::Many(rows) => rows
            .iter()
            .map(|values| prettify(interpolate(sql, values)))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn interpolate(sql: &str, values: &[SqlValue]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut next_positional = 0;
    let mut in_literal = false;
    // `%%` is an escape everywhere in format-style statements, literals included.
    let format_style = sql.contains("%s");

    while let Some(c) = chars.next() {
        if in_literal {
            out.push(c);
            match c {
                '\'' => in_literal = false,
                '%' if format_style && chars.peek() == Some(&'%') => {
                    chars.next();
                }
                _ => {}
            }
            continue;
        }

        match c {
            '\'' => {
                in_literal = true;
                out.push(c);
            }
            '$' => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    digits.push(d);
                    chars.next();
                }
                let value = digits
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|index| values.get(index));
                match value {
                    Some(value) => {
                        let _ = write!(out, "{value}");
                    }
                    None => {
                        out.push('$');
                        out.push_str(&digits);
                    }
                }
            }
            '%' => match chars.peek() {
                Some('s') => {
                    chars.next();
                    match values.get(next_positional) {
                        Some(value) => {
                            let _ = write!(out, "{value}");
                            next_positional += 1;
                        }
                        None => out.push_str("%s"),
                    }
                }
                Some('%') => {
                    chars.next();
                    out.push('%');
                }
                _ => out.push('%'),
            },
            _ => out.push(c),
        }
    }

    out
}

#[cfg(feature = "pretty")]
fn prettify(sql: String) -> String {
    use sqlparser::dialect::PostgreSqlDialect;
    use sqlparser::parser::Parser;

    match Parser::parse_sql(&PostgreSqlDialect {}, &sql) {
        Ok(statements) if !statements.is_empty() => statements
            .iter()
            .map(|statement| format!("{statement:#}"))
            .collect::<Vec<_>>()
            .join(";\n"),
        _ => sql,
    }
}

#[cfg(not(feature = "pretty"))]
fn prettify(sql: String) -> String {
    sql
}

/// Render a duration in words, down to microseconds.
///
/// Sub-second durations are reported in whole microseconds or milliseconds;
/// longer ones are rounded down to the largest whole unit.
pub fn humanize(duration: Duration) -> String {
    let secs = duration.as_secs();
    let micros = duration.subsec_micros();

    match secs {
        0 if micros < 1_000 => plural(u64::from(micros), "microsecond"),
        0 => plural(u64::from(micros / 1_000), "millisecond"),
        1 => "a second".to_string(),
        2..60 => plural(secs, "second"),
        60..120 => "a minute".to_string(),
        120..3_600 => plural(secs / 60, "minute"),
        3_600..7_200 => "an hour".to_string(),
        7_200..86_400 => plural(secs / 3_600, "hour"),
        86_400..172_800 => "a day".to_string(),
        _ => plural(secs / 86_400, "day"),
    }
}

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("{n} {unit}")
    } else {
        format!("{n} {unit}s")
    }
}
