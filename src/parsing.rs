use std::collections::HashMap;
use std::fmt::Write;

use serde::{Deserialize, Serialize};

mod parsers;
mod scanner;

use parsers::{
    closes_block_comment, dollar_quote_closer, dollar_quote_opener, is_cast_operator,
    opens_block_comment, opens_line_comment,
};
use scanner::{State, scan_identifier};

/// Positional placeholder syntax emitted for each named parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderStyle {
    /// Anonymous `?` (JDBC/ODBC style).
    #[default]
    Positional,
    /// SQLite-style numbered placeholders like `?1`.
    Sqlite,
    /// PostgreSQL-style placeholders like `$1`.
    Postgres,
}

impl PlaceholderStyle {
    fn render(self, position: usize, out: &mut String) {
        match self {
            PlaceholderStyle::Positional => out.push('?'),
            PlaceholderStyle::Sqlite => {
                let _ = write!(out, "?{position}");
            }
            PlaceholderStyle::Postgres => {
                let _ = write!(out, "${position}");
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Param(String),
}

/// SQL with `:name` placeholders split into literal text and parameter slots.
///
/// Built once per query; immutable afterwards.
///
/// ```rust
/// use sql_mapper::prelude::*;
///
/// let parsed = parse_named(
///     "select * from t where a = :a and b = :b and c = :a",
///     PlaceholderStyle::Positional,
/// );
/// assert_eq!(parsed.sql(), "select * from t where a = ? and b = ? and c = ?");
/// assert_eq!(parsed.positions("a"), Some(&[1, 3][..]));
/// ```
#[derive(Debug, Clone)]
pub struct ParsedStatement {
    original: String,
    segments: Vec<Segment>,
    positions: HashMap<String, Vec<usize>>,
    names: Vec<String>,
    style: PlaceholderStyle,
    sql: String,
}

/// Rendering of a [`ParsedStatement`] with some names widened to several slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedStatement {
    pub sql: String,
    /// First slot of each occurrence of each name.
    pub positions: HashMap<String, Vec<usize>>,
    pub slot_count: usize,
}

impl ParsedStatement {
    /// SQL as written by the caller.
    #[must_use]
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Rewritten SQL with one placeholder per occurrence.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn style(&self) -> PlaceholderStyle {
        self.style
    }

    /// Declared names in order of first appearance.
    #[must_use]
    pub fn parameter_names(&self) -> &[String] {
        &self.names
    }

    /// 1-based slots of every occurrence of `name`, in textual order.
    #[must_use]
    pub fn positions(&self, name: &str) -> Option<&[usize]> {
        self.positions.get(name).map(Vec::as_slice)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.positions.values().map(Vec::len).sum()
    }

    /// Render with `widths[name]` placeholders for each occurrence of `name` (default 1).
    ///
    /// Widened occurrences render as a comma-separated run, so `in (:ids)` becomes `in (?, ?, ?)`.
    #[must_use]
    pub fn expand(&self, widths: &HashMap<String, usize>) -> ExpandedStatement {
        let mut sql = String::with_capacity(self.sql.len() + widths.len() * 8);
        let mut positions: HashMap<String, Vec<usize>> = HashMap::with_capacity(self.names.len());
        let mut next = 1;

        for segment in &self.segments {
            match segment {
                Segment::Text(text) => sql.push_str(text),
                Segment::Param(name) => {
                    let width = widths.get(name).copied().unwrap_or(1).max(1);
                    positions.entry(name.clone()).or_default().push(next);
                    for offset in 0..width {
                        if offset > 0 {
                            sql.push_str(", ");
                        }
                        self.style.render(next + offset, &mut sql);
                    }
                    next += width;
                }
            }
        }

        ExpandedStatement {
            sql,
            positions,
            slot_count: next - 1,
        }
    }
}

/// Rewrite every `:name` outside string literals, quoted identifiers, comments and dollar-quoted
/// bodies into a positional placeholder.
///
/// `::` (a PostgreSQL cast) is left alone. Names start with a letter or `_` and continue with
/// letters, digits or `_`; anything else after a colon is ordinary text.
#[must_use]
pub fn parse_named(sql: &str, style: PlaceholderStyle) -> ParsedStatement {
    let bytes = sql.as_bytes();
    let mut segments = Vec::new();
    let mut text_start = 0;
    let mut state = State::Normal;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                b'`' => state = State::BacktickQuoted,
                _ if opens_line_comment(bytes, idx) => state = State::LineComment,
                _ if opens_block_comment(bytes, idx) => {
                    state = State::BlockComment(1);
                    idx += 1;
                }
                b'$' => {
                    if let Some((tag, advance)) = dollar_quote_opener(bytes, idx) {
                        state = State::DollarQuoted(tag);
                        idx = advance;
                    }
                }
                _ if is_cast_operator(bytes, idx) => idx += 1,
                b':' => {
                    if let Some((end, name)) = scan_identifier(bytes, idx + 1) {
                        if text_start < idx {
                            segments.push(Segment::Text(sql[text_start..idx].to_owned()));
                        }
                        segments.push(Segment::Param(name.to_owned()));
                        text_start = end;
                        idx = end;
                        continue;
                    }
                }
                _ => {}
            },
            State::SingleQuoted => {
                if b == b'\'' {
                    if bytes.get(idx + 1) == Some(&b'\'') {
                        idx += 1; // skip escaped quote
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    if bytes.get(idx + 1) == Some(&b'"') {
                        idx += 1; // skip escaped quote
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::BacktickQuoted => {
                if b == b'`' {
                    state = State::Normal;
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if opens_block_comment(bytes, idx) {
                    state = State::BlockComment(depth + 1);
                    idx += 1;
                } else if closes_block_comment(bytes, idx) {
                    if depth == 1 {
                        state = State::Normal;
                    } else {
                        state = State::BlockComment(depth - 1);
                    }
                    idx += 1;
                }
            }
            State::DollarQuoted(ref tag) => {
                if b == b'$' && dollar_quote_closer(bytes, idx, tag) {
                    let tag_len = tag.len();
                    state = State::Normal;
                    idx += tag_len + 1;
                }
            }
        }

        idx += 1;
    }

    if text_start < bytes.len() {
        segments.push(Segment::Text(sql[text_start..].to_owned()));
    }

    let mut positions: HashMap<String, Vec<usize>> = HashMap::new();
    let mut names = Vec::new();
    let mut slot = 0;
    for segment in &segments {
        if let Segment::Param(name) = segment {
            slot += 1;
            let entry = positions.entry(name.clone()).or_default();
            if entry.is_empty() {
                names.push(name.clone());
            }
            entry.push(slot);
        }
    }

    let mut parsed = ParsedStatement {
        original: sql.to_owned(),
        segments,
        positions,
        names,
        style,
        sql: String::new(),
    };
    parsed.sql = parsed.expand(&HashMap::new()).sql;
    parsed
}
