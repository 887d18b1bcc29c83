//! Label model: the key/value sets that identify series instances.
//!
//! A [`LabelSet`] is immutable once built. Construction deduplicates by key
//! (the last occurrence wins) and sorts by key, so two sets with the same
//! pairs compare equal regardless of input order. The backing storage is
//! shared, which makes clones cheap and lets the same set be read from many
//! threads without synchronization.
//!
//! [`LabelView`] is the read-only projection handed to selectors and reader
//! callbacks. It is implemented by [`LabelSet`] and by the owned lookup map
//! [`Labels`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::InstrumentError;

/// Owned label map used for point lookups and serialization.
pub type Labels = BTreeMap<String, String>;

/// A single key/value pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label {
    /// Label key.
    pub key: String,
    /// Label value.
    pub value: String,
}

impl Label {
    /// Creates a new label.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Immutable, unique-by-key, key-sorted collection of labels.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "Labels", into = "Labels")]
pub struct LabelSet {
    labels: Arc<[Label]>,
}

impl LabelSet {
    /// Builds a set from labels; later duplicates of a key replace earlier ones.
    pub fn new<I>(labels: I) -> Self
    where
        I: IntoIterator<Item = Label>,
    {
        let deduped: Labels = labels.into_iter().map(|l| (l.key, l.value)).collect();
        Self::from(deduped)
    }

    /// Returns the empty set.
    pub fn empty() -> Self {
        Self {
            labels: Arc::from(Vec::new()),
        }
    }

    /// Builds a set from borrowed pairs.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self::new(pairs.iter().map(|(k, v)| Label::new(*k, *v)))
    }

    /// Looks up the value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.labels
            .binary_search_by(|l| l.key.as_str().cmp(key))
            .ok()
            .map(|i| self.labels[i].value.as_str())
    }

    /// Number of labels in the set.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns `true` if the set holds no labels.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Iterates labels in key order.
    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.labels.iter()
    }

    /// Returns a set holding both `self` and `other`; `other` wins on key conflicts.
    pub fn merge(&self, other: &LabelSet) -> LabelSet {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        Self::new(self.iter().chain(other.iter()).cloned())
    }

    /// Returns `true` if `view` holds exactly the same pairs as this set.
    pub fn same_as(&self, view: &dyn LabelView) -> bool {
        self.len() == view.len() && self.iter().all(|l| view.get(&l.key) == Some(l.value.as_str()))
    }

    /// Checks that every key is a non-reserved label name selectors can match.
    ///
    /// # Errors
    ///
    /// Returns [`InstrumentError::InvalidLabel`] for the first offending label.
    pub fn validate(&self) -> std::result::Result<(), InstrumentError> {
        for label in self.iter() {
            let reason = if label.key.is_empty() {
                "key cannot be empty"
            } else if label.key.starts_with("__") {
                "keys starting with '__' are reserved for internal use"
            } else if !is_label_key(&label.key) {
                "key must match [A-Za-z_][A-Za-z0-9_.-]*"
            } else {
                continue;
            };
            return Err(InstrumentError::InvalidLabel {
                key: label.key.clone(),
                value: label.value.clone(),
                reason: reason.to_string(),
            });
        }
        Ok(())
    }

    /// Copies the pairs into an owned map.
    pub fn to_labels(&self) -> Labels {
        self.iter()
            .map(|l| (l.key.clone(), l.value.clone()))
            .collect()
    }
}

pub(crate) fn is_label_key_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

pub(crate) fn is_label_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

fn is_label_key(key: &str) -> bool {
    let mut chars = key.chars();
    chars.next().is_some_and(is_label_key_start) && chars.all(is_label_key_char)
}

impl Default for LabelSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Labels> for LabelSet {
    fn from(map: Labels) -> Self {
        let labels: Vec<Label> = map.into_iter().map(|(k, v)| Label::new(k, v)).collect();
        Self {
            labels: Arc::from(labels),
        }
    }
}

impl From<&Labels> for LabelSet {
    fn from(map: &Labels) -> Self {
        Self::from(map.clone())
    }
}

impl From<LabelSet> for Labels {
    fn from(set: LabelSet) -> Self {
        set.to_labels()
    }
}

impl FromIterator<Label> for LabelSet {
    fn from_iter<T: IntoIterator<Item = Label>>(iter: T) -> Self {
        Self::new(iter)
    }
}

impl<'a> IntoIterator for &'a LabelSet {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for LabelSet {
    /// Renders as `{k="v",k2="v2"}`, or nothing for the empty set.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (i, label) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}=\"{}\"", label.key, escape(&label.value))?;
        }
        f.write_str("}")
    }
}

impl fmt::Debug for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|l| (&l.key, &l.value)))
            .finish()
    }
}

/// Escapes a label value for the `k="v"` text form.
pub(crate) fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

/// Read-only access to a series' labels.
pub trait LabelView {
    /// Returns the value for `key`, if present.
    fn get(&self, key: &str) -> Option<&str>;

    /// Number of labels.
    fn len(&self) -> usize;

    /// Returns `true` if there are no labels.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates `(key, value)` pairs.
    fn iter(&self) -> Box<dyn Iterator<Item = (&str, &str)> + '_>;
}

impl LabelView for LabelSet {
    fn get(&self, key: &str) -> Option<&str> {
        LabelSet::get(self, key)
    }

    fn len(&self) -> usize {
        LabelSet::len(self)
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (&str, &str)> + '_> {
        Box::new(
            self.labels
                .iter()
                .map(|l| (l.key.as_str(), l.value.as_str())),
        )
    }
}

impl LabelView for Labels {
    fn get(&self, key: &str) -> Option<&str> {
        BTreeMap::get(self, key).map(String::as_str)
    }

    fn len(&self) -> usize {
        BTreeMap::len(self)
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (&str, &str)> + '_> {
        Box::new(BTreeMap::iter(self).map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

impl LabelView for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        HashMap::get(self, key).map(String::as_str)
    }

    fn len(&self) -> usize {
        HashMap::len(self)
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (&str, &str)> + '_> {
        Box::new(HashMap::iter(self).map(|(k, v)| (k.as_str(), v.as_str())))
    }
}
