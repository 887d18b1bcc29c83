//! Read side: consistent, selector-filtered views of committed series.
//!
//! A [`Reader`] pins the committed snapshot at creation. Everything it
//! returns comes from that one snapshot, so two calls on the same reader,
//! or two readers created with no cycle committed in between, agree.
//!
//! Two visibility modes exist:
//!
//! - **filtered** (the default): only series written by the most recent
//!   successful cycle. A series whose source vanished drops out at once.
//! - **raw** ([`ReadOptions::raw`]): the latest value of every series still
//!   retained, however stale.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::SeriesKey;
use crate::backend::overlay::{Sample, Snapshot};
use crate::cycle::CycleId;
use crate::error::Result;
use crate::labels::{Label, LabelSet, LabelView};
use crate::meter::SeriesMeta;
use crate::selector::{Selector, parse};

/// Options for [`CollectorStore::read`](crate::CollectorStore::read).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    raw: bool,
}

impl ReadOptions {
    /// Only series touched by the latest successful cycle.
    pub fn filtered() -> Self {
        Self { raw: false }
    }

    /// Every retained series at its latest value.
    pub fn raw() -> Self {
        Self { raw: true }
    }

    /// Returns `true` for raw visibility.
    pub fn is_raw(&self) -> bool {
        self.raw
    }
}

/// Stable identity of a series for downstream caches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesIdentity {
    /// Canonical `name{k="v",...}` form.
    pub id: String,
    /// FNV-1a hash of `id`.
    pub hash64: u64,
}

impl SeriesIdentity {
    /// Builds the identity of `metric` with `labels`.
    pub fn new(metric: &str, labels: &LabelSet) -> Self {
        let id = format!("{metric}{labels}");
        let hash64 = fnv1a(id.as_bytes());
        Self { id, hash64 }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}

/// One visible series, borrowed from a reader's snapshot.
#[derive(Debug, Clone, Copy)]
pub struct SeriesRef<'a> {
    /// Full metric name.
    pub metric: &'a str,
    /// Series labels.
    pub labels: &'a LabelSet,
    /// Committed value.
    pub value: f64,
    /// Counter delta against the previous committed value, if one existed.
    pub delta: Option<f64>,
    /// Instrument metadata.
    pub meta: &'a SeriesMeta,
    /// The cycle that wrote this value.
    pub cycle: CycleId,
    /// Commit timestamp in nanoseconds since the Unix epoch.
    pub written_at_ns: u64,
}

impl SeriesRef<'_> {
    /// The series' stable identity.
    pub fn identity(&self) -> SeriesIdentity {
        SeriesIdentity::new(self.metric, self.labels)
    }

    fn new<'a>(key: &'a SeriesKey, sample: &'a Sample) -> SeriesRef<'a> {
        SeriesRef {
            metric: &key.metric,
            labels: &key.labels,
            value: sample.value,
            delta: sample.delta,
            meta: &sample.meta,
            cycle: sample.cycle,
            written_at_ns: sample.written_at,
        }
    }
}

/// A consistent view of committed series.
#[derive(Debug, Clone)]
pub struct Reader {
    snapshot: Arc<Snapshot>,
    raw: bool,
}

impl Reader {
    pub(crate) fn new(snapshot: Arc<Snapshot>, raw: bool) -> Self {
        Self { snapshot, raw }
    }

    /// Returns `true` if this reader sees every retained series.
    pub fn is_raw(&self) -> bool {
        self.raw
    }

    fn visible(&self) -> Box<dyn Iterator<Item = (&SeriesKey, &Sample)> + '_> {
        if self.raw {
            Box::new(self.snapshot.raw().into_iter())
        } else {
            Box::new(self.snapshot.filtered())
        }
    }

    /// Parses `query` and visits every visible series it selects.
    ///
    /// For each selected series `predicate` decides whether `visit` runs.
    /// The return value counts every selected series, including those the
    /// predicate declined. Series are visited in metric name, then label,
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`](crate::ParseError) if `query` is malformed.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use metrix::{ReadOptions, RuntimeStore};
    ///
    /// # fn main() -> Result<(), metrix::MetrixError> {
    /// let store = RuntimeStore::new();
    /// let m = store.write().stateful_meter("svc");
    /// m.with_labels(&[("job", "api")])?.gauge("up", &[])?.set(1.0);
    /// m.with_labels(&[("job", "db")])?.gauge("up", &[])?.set(0.0);
    ///
    /// let mut down = Vec::new();
    /// let observed = store.read(ReadOptions::default()).for_each_match(
    ///     "svc.up",
    ///     |labels| labels.get("job") != Some("api"),
    ///     |labels, value| down.push((labels.to_string(), value)),
    /// )?;
    /// assert_eq!(observed, 2);
    /// assert_eq!(down, [(r#"{job="db"}"#.to_string(), 0.0)]);
    /// # Ok(())
    /// # }
    /// ```
    pub fn for_each_match<P, V>(&self, query: &str, predicate: P, visit: V) -> Result<usize>
    where
        P: FnMut(&LabelSet) -> bool,
        V: FnMut(&LabelSet, f64),
    {
        let selector = parse(query)?;
        Ok(self.for_each_selected(&selector, predicate, visit))
    }

    /// Like [`Reader::for_each_match`] with an already compiled selector.
    pub fn for_each_selected<P, V>(
        &self,
        selector: &Selector,
        mut predicate: P,
        mut visit: V,
    ) -> usize
    where
        P: FnMut(&LabelSet) -> bool,
        V: FnMut(&LabelSet, f64),
    {
        let mut observed = 0;
        for (key, sample) in self.visible() {
            if !selector.matches(&key.metric, &key.labels) {
                continue;
            }
            observed += 1;
            if predicate(&key.labels) {
                visit(&key.labels, sample.value);
            }
        }
        observed
    }

    /// Visits every visible series with its full detail.
    pub fn for_each_series<F>(&self, mut visit: F)
    where
        F: FnMut(SeriesRef<'_>),
    {
        for (key, sample) in self.visible() {
            visit(SeriesRef::new(key, sample));
        }
    }

    /// Looks up the series named `metric` with exactly `labels`.
    pub fn series(&self, metric: &str, labels: &dyn LabelView) -> Option<SeriesRef<'_>> {
        let labels: LabelSet = labels.iter().map(|(k, v)| Label::new(k, v)).collect();
        let key = SeriesKey::new(Arc::from(metric), labels);
        let (key, sample) = if self.raw {
            self.snapshot.latest_entry(&key)?
        } else {
            self.snapshot.head()?.entries.get_key_value(&key)?
        };
        Some(SeriesRef::new(key, sample))
    }

    /// Committed value of one series.
    pub fn value(&self, metric: &str, labels: &dyn LabelView) -> Option<f64> {
        self.series(metric, labels).map(|s| s.value)
    }

    /// Counter delta of one series. `None` for gauges and for a counter's
    /// first sample.
    pub fn delta(&self, metric: &str, labels: &dyn LabelView) -> Option<f64> {
        self.series(metric, labels).and_then(|s| s.delta)
    }

    /// Instrument metadata of one series.
    pub fn meta(&self, metric: &str, labels: &dyn LabelView) -> Option<&SeriesMeta> {
        self.series(metric, labels).map(|s| s.meta)
    }

    /// Stable identity of one series.
    pub fn identity(&self, metric: &str, labels: &dyn LabelView) -> Option<SeriesIdentity> {
        self.series(metric, labels).map(|s| s.identity())
    }

    /// Number of visible series.
    pub fn len(&self) -> usize {
        if self.raw {
            self.snapshot.raw().len()
        } else {
            self.snapshot.head().map_or(0, |h| h.entries.len())
        }
    }

    /// Returns `true` if no series is visible.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
