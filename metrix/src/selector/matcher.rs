//! Literal `name{k="v"}` matching.

use std::fmt;

use crate::labels::{LabelView, escape};

/// Comparison applied by a [`LabelMatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchOp {
    /// `=`: value equals.
    Equal,
    /// `!=`: value differs (or label absent).
    NotEqual,
    /// `=*`: value matches a glob pattern.
    Glob,
    /// `!*`: value does not match a glob pattern (or label absent).
    NotGlob,
}

impl MatchOp {
    /// The operator as written in selector text.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Glob => "=*",
            Self::NotGlob => "!*",
        }
    }
}

/// One `key op "value"` condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelMatcher {
    /// Label key to inspect.
    pub key: String,
    /// Comparison.
    pub op: MatchOp,
    /// Right-hand side (a glob pattern for the glob operators).
    pub value: String,
}

impl LabelMatcher {
    /// Creates a matcher.
    pub fn new(key: impl Into<String>, op: MatchOp, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op,
            value: value.into(),
        }
    }

    /// Creates an `=` matcher.
    pub fn equal(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, MatchOp::Equal, value)
    }

    /// Tests the matcher against a label view.
    ///
    /// A missing label behaves like an empty value, so `k!="v"` holds when
    /// `k` is absent while `k="v"` requires it to be present.
    pub fn matches(&self, labels: &dyn LabelView) -> bool {
        let value = labels.get(&self.key);
        match self.op {
            MatchOp::Equal => value == Some(self.value.as_str()),
            MatchOp::NotEqual => value != Some(self.value.as_str()),
            MatchOp::Glob => value.is_some_and(|v| glob_match(&self.value, v)),
            MatchOp::NotGlob => !value.is_some_and(|v| glob_match(&self.value, v)),
        }
    }
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}\"{}\"", self.key, self.op.as_str(), escape(&self.value))
    }
}

/// Metric name pattern plus label matchers, as produced by [`parse`](super::parse).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricSelector {
    /// Metric name; `None` matches any name. May contain `*` wildcards.
    pub name: Option<String>,
    /// All must hold.
    pub matchers: Vec<LabelMatcher>,
}

impl MetricSelector {
    /// Selector for an exact metric name with no label conditions.
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            matchers: Vec::new(),
        }
    }

    /// Adds a label condition.
    #[must_use]
    pub fn with_matcher(mut self, matcher: LabelMatcher) -> Self {
        self.matchers.push(matcher);
        self
    }

    /// Tests the name pattern and every label matcher.
    pub fn matches(&self, metric: &str, labels: &dyn LabelView) -> bool {
        let name_ok = match &self.name {
            None => true,
            Some(name) if name.contains('*') => glob_match(name, metric),
            Some(name) => name == metric,
        };
        name_ok && self.matchers.iter().all(|m| m.matches(labels))
    }
}

impl fmt::Display for MetricSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            f.write_str(name)?;
        }
        if !self.matchers.is_empty() || self.name.is_none() {
            f.write_str("{")?;
            for (i, m) in self.matchers.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{m}")?;
            }
            f.write_str("}")?;
        }
        Ok(())
    }
}

/// Shell-style glob: `*` matches any run of characters, `?` exactly one.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            // Let the last star absorb one more character.
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}
