//! Selector language: boolean predicates over a metric name and its labels.
//!
//! A [`Selector`] is either a literal [`MetricSelector`] compiled from text by
//! [`parse`], or a combination of selectors:
//!
//! - [`Selector::True`] matches everything.
//! - [`not`] negates.
//! - [`and`] holds when every sub-selector holds; with none it is vacuously true.
//! - [`or`] holds when any sub-selector holds; with none it is vacuously false.
//!
//! `and` and `or` short-circuit. Label conditions are a subset predicate:
//! labels a selector does not mention are ignored.
//!
//! The read path compiles queries with this module, and label-promotion logic
//! outside the store uses it directly.
//!
//! ```rust
//! use metrix::labels::LabelSet;
//! use metrix::selector::{Selector, and, not, or, parse};
//!
//! # fn main() -> Result<(), metrix::error::ParseError> {
//! let api = parse(r#"http_requests_total{job="api"}"#)?;
//! let labels = LabelSet::from_pairs(&[("job", "db")]);
//!
//! assert!(!api.matches("http_requests_total", &labels));
//! assert!(or([api.clone(), not(api)]).matches("http_requests_total", &labels));
//! assert!(!and([Selector::True, not(Selector::True)]).matches("x", &labels));
//! # Ok(())
//! # }
//! ```

mod matcher;
mod parse;

use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;
use crate::labels::LabelView;

pub use matcher::{LabelMatcher, MatchOp, MetricSelector};
pub use parse::parse;
pub(crate) use parse::is_literal_name;

/// A compiled predicate over `(metric name, labels)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Matches everything.
    True,
    /// Matches when the inner selector does not.
    Not(Box<Selector>),
    /// Matches when all inner selectors match.
    And(Vec<Selector>),
    /// Matches when any inner selector matches.
    Or(Vec<Selector>),
    /// Literal metric name and label matchers.
    Metric(MetricSelector),
}

impl Selector {
    /// Evaluates the selector.
    pub fn matches(&self, metric: &str, labels: &dyn LabelView) -> bool {
        match self {
            Self::True => true,
            Self::Not(inner) => !inner.matches(metric, labels),
            Self::And(all) => all.iter().all(|s| s.matches(metric, labels)),
            Self::Or(any) => any.iter().any(|s| s.matches(metric, labels)),
            Self::Metric(m) => m.matches(metric, labels),
        }
    }

    /// Selector for exactly one metric name, any labels.
    pub fn metric_name(name: impl Into<String>) -> Self {
        Self::Metric(MetricSelector::name(name))
    }
}

/// Negates a selector.
pub fn not(selector: Selector) -> Selector {
    Selector::Not(Box::new(selector))
}

/// Conjunction of selectors; empty is true.
pub fn and<I: IntoIterator<Item = Selector>>(selectors: I) -> Selector {
    Selector::And(selectors.into_iter().collect())
}

/// Disjunction of selectors; empty is false.
pub fn or<I: IntoIterator<Item = Selector>>(selectors: I) -> Selector {
    Selector::Or(selectors.into_iter().collect())
}

impl std::ops::Not for Selector {
    type Output = Selector;

    fn not(self) -> Selector {
        not(self)
    }
}

impl FromStr for Selector {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

impl From<MetricSelector> for Selector {
    fn from(m: MetricSelector) -> Self {
        Self::Metric(m)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, name: &str, items: &[Selector]) -> fmt::Result {
            write!(f, "{name}(")?;
            for (i, s) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{s}")?;
            }
            f.write_str(")")
        }

        match self {
            Self::True => f.write_str("True()"),
            Self::Not(inner) => write!(f, "Not({inner})"),
            Self::And(all) => list(f, "And", all),
            Self::Or(any) => list(f, "Or", any),
            Self::Metric(m) => write!(f, "{m}"),
        }
    }
}
