//! Label matchers.
//!
//! A [`Matcher`] pairs a label name with an operator and a pattern. Matcher
//! sets combine with logical AND via [`matches_all`]. Evaluation treats an
//! absent label as the empty string, and regex patterns are anchored to match
//! the full label value.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::labels::LabelSet;

/// The comparison operator of a matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchOperator {
    /// The label value equals the pattern (=).
    #[serde(rename = "=")]
    Equal,
    /// The label value differs from the pattern (!=).
    #[serde(rename = "!=")]
    NotEqual,
    /// The label value matches the anchored regex pattern (=~).
    #[serde(rename = "=~")]
    Regex,
    /// The label value does not match the anchored regex pattern (!~).
    #[serde(rename = "!~")]
    NotRegex,
}

impl MatchOperator {
    /// Returns the operator as its configuration symbol.
    #[must_use]
    pub const fn as_symbol(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Regex => "=~",
            Self::NotRegex => "!~",
        }
    }

    /// Returns true for the negated operators (!= and !~).
    #[must_use]
    pub const fn is_negative(&self) -> bool {
        matches!(self, Self::NotEqual | Self::NotRegex)
    }
}

impl fmt::Display for MatchOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_symbol())
    }
}

/// The serialized form of a matcher: name, operator, pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherSpec {
    /// The label name to match against.
    pub name: String,
    /// The comparison operator.
    pub op: MatchOperator,
    /// The pattern to compare with.
    pub value: String,
}

/// A single label matcher.
///
/// Regex operators compile their pattern once at construction; an invalid
/// pattern is a construction error, never a match-time failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "MatcherSpec", into = "MatcherSpec")]
pub struct Matcher {
    name: String,
    op: MatchOperator,
    value: String,
    regex: Option<Regex>,
}

impl Matcher {
    /// Creates a matcher, validating the name and compiling regex patterns.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidMatcher`] for an empty label name and
    /// [`CoreError::InvalidPattern`] for a pattern that fails to compile.
    pub fn new(
        name: impl Into<String>,
        op: MatchOperator,
        value: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let value = value.into();

        if name.is_empty() {
            return Err(CoreError::InvalidMatcher {
                name,
                reason: "label name cannot be empty".to_string(),
            });
        }

        let regex = match op {
            MatchOperator::Regex | MatchOperator::NotRegex => {
                // Anchored so the pattern must cover the whole value.
                let anchored = format!("^(?:{value})$");
                let compiled = Regex::new(&anchored).map_err(|e| CoreError::InvalidPattern {
                    pattern: value.clone(),
                    reason: e.to_string(),
                })?;
                Some(compiled)
            }
            MatchOperator::Equal | MatchOperator::NotEqual => None,
        };

        Ok(Self {
            name,
            op,
            value,
            regex,
        })
    }

    /// Creates an equality matcher.
    #[must_use]
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MatchOperator::Equal,
            value: value.into(),
            regex: None,
        }
    }

    /// Creates an inequality matcher.
    #[must_use]
    pub fn not_equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MatchOperator::NotEqual,
            value: value.into(),
            regex: None,
        }
    }

    /// Creates an anchored regex matcher.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPattern`] if the pattern fails to compile.
    pub fn regex(name: impl Into<String>, pattern: impl Into<String>) -> Result<Self> {
        Self::new(name, MatchOperator::Regex, pattern)
    }

    /// Creates a negated anchored regex matcher.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPattern`] if the pattern fails to compile.
    pub fn not_regex(name: impl Into<String>, pattern: impl Into<String>) -> Result<Self> {
        Self::new(name, MatchOperator::NotRegex, pattern)
    }

    /// Returns the label name this matcher applies to.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the operator.
    #[must_use]
    pub const fn op(&self) -> MatchOperator {
        self.op
    }

    /// Returns the pattern.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Applies the operator to a concrete label value.
    #[must_use]
    pub fn matches_value(&self, value: &str) -> bool {
        match self.op {
            MatchOperator::Equal => value == self.value,
            MatchOperator::NotEqual => value != self.value,
            // Compiled at construction; equality ops never populate `regex`.
            MatchOperator::Regex => self.regex.as_ref().is_some_and(|re| re.is_match(value)),
            MatchOperator::NotRegex => !self.regex.as_ref().is_some_and(|re| re.is_match(value)),
        }
    }

    /// Evaluates this matcher against a label set.
    ///
    /// An absent label is treated as the empty string. An empty pattern is
    /// satisfied by an absent label under the positive operators, and by a
    /// present label under the negated operators ("label absent or differs").
    #[must_use]
    pub fn matches(&self, labels: &LabelSet) -> bool {
        let value = labels.get(&self.name);

        if self.value.is_empty() {
            if self.op.is_negative() {
                if value.is_some() {
                    return true;
                }
            } else if value.is_none() {
                return true;
            }
        }

        self.matches_value(value.unwrap_or(""))
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.op == other.op && self.value == other.value
    }
}

impl Eq for Matcher {}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.op, self.value)
    }
}

impl TryFrom<MatcherSpec> for Matcher {
    type Error = CoreError;

    fn try_from(spec: MatcherSpec) -> Result<Self> {
        Self::new(spec.name, spec.op, spec.value)
    }
}

impl From<Matcher> for MatcherSpec {
    fn from(matcher: Matcher) -> Self {
        Self {
            name: matcher.name,
            op: matcher.op,
            value: matcher.value,
        }
    }
}

/// Evaluates a matcher set against a label set: all matchers must be
/// satisfied.
///
/// An empty matcher set matches everything. Pure function, safe to call
/// concurrently without synchronization.
#[must_use]
pub fn matches_all(matchers: &[Matcher], labels: &LabelSet) -> bool {
    matchers.iter().all(|m| m.matches(labels))
}
