//! Filter predicates over series columns.
//!
//! A predicate constrains one column with an equality, inequality, or regex
//! condition. Predicates are immutable value objects; rewriting a plan always
//! produces new predicates rather than mutating existing ones. Equality
//! predicates are "concrete" (they pin the column to one value), regex
//! predicates are "open" (they describe a set of values resolved later by the
//! shard-key matcher).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Comparison operator applied by a [`Predicate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchOp {
    Equals,
    NotEquals,
    RegexMatch,
    RegexNotMatch,
}

impl MatchOp {
    /// Query-language symbol for this operator.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Equals => "=",
            Self::NotEquals => "!=",
            Self::RegexMatch => "=~",
            Self::RegexNotMatch => "!~",
        }
    }
}

/// One filter condition on a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub op: MatchOp,
    pub value: String,
}

impl Predicate {
    #[must_use]
    pub fn new(column: impl Into<String>, op: MatchOp, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    #[must_use]
    pub fn equals(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(column, MatchOp::Equals, value)
    }

    #[must_use]
    pub fn not_equals(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(column, MatchOp::NotEquals, value)
    }

    #[must_use]
    pub fn regex_match(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(column, MatchOp::RegexMatch, pattern)
    }

    #[must_use]
    pub fn regex_not_match(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(column, MatchOp::RegexNotMatch, pattern)
    }

    /// True when the predicate pins its column to exactly one value.
    #[must_use]
    pub fn is_concrete(&self) -> bool {
        self.op == MatchOp::Equals
    }

    /// True when the predicate carries a regex pattern.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.op, MatchOp::RegexMatch | MatchOp::RegexNotMatch)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}\"{}\"",
            self.column,
            self.op.symbol(),
            escape_value(&self.value)
        )
    }
}

/// Escapes backslashes and double quotes so a value can sit inside a quoted
/// matcher in query text.
#[must_use]
pub fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '\\' || c == '"' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Reverses [`escape_value`]: every backslash takes the following character
/// literally. A trailing lone backslash is kept as-is.
#[must_use]
pub fn unescape_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) => out.push(next),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}
