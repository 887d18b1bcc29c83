//! Meters and instruments: the write side of the store.
//!
//! A meter is a namespace plus a set of labels attached to every series it
//! declares. Instruments are thin handles (an `Arc` to the backend and the
//! series identity) and are cheap to clone and share across threads.
//!
//! Two flavors exist:
//!
//! - **Stateful** instruments keep their value across cycles.
//!   [`StatefulGauge::add`] and [`StatefulCounter::add`] offset the latest
//!   committed value.
//! - **Snapshot** instruments report what a scrape saw this cycle.
//!   [`SnapshotCounter::observe_total`] records a cumulative total and the
//!   store derives the delta against the previous committed total.
//!
//! The metric name readers see is `namespace.instrument`, or just the
//! instrument name when the namespace is empty.
//!
//! # Example
//!
//! ```rust
//! use metrix::{CollectorStore, ReadOptions, with_unit};
//!
//! # fn main() -> Result<(), metrix::MetrixError> {
//! let store = CollectorStore::new();
//! let meter = store.write().snapshot_meter("nginx").with_labels(&[("instance", "local")])?;
//! let requests = meter.counter_vec("requests_total", &["code"], &[with_unit("requests")])?;
//!
//! let cc = store.cycle_controller();
//! cc.begin_cycle()?;
//! requests.with_label_values(&["200"])?.observe_total(1_000.0);
//! requests.with_label_values(&["500"])?.observe_total(3.0);
//! cc.commit_cycle_success()?;
//!
//! let reader = store.read(ReadOptions::default());
//! let mut seen = 0;
//! let observed = reader.for_each_match(r#"nginx.requests_total{code="500"}"#, |_| true, |_, v| {
//!     assert_eq!(v, 3.0);
//!     seen += 1;
//! })?;
//! assert_eq!((observed, seen), (1, 1));
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::overlay::WriteOp;
use crate::backend::{Backend, SeriesKey};
use crate::error::{InstrumentError, Result};
use crate::labels::{Label, LabelSet};
use crate::selector::is_literal_name;

/// How values of a series combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Last write wins.
    Gauge,
    /// Monotonic accumulation; committed samples carry a delta.
    Counter,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
        })
    }
}

/// Whether an instrument's value persists across cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flavor {
    /// Keeps state across cycles.
    Stateful,
    /// Reports per-cycle observations.
    Snapshot,
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stateful => "stateful",
            Self::Snapshot => "snapshot",
        })
    }
}

/// Per-instrument metadata, shared by every series the instrument writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesMeta {
    /// Gauge or counter.
    pub kind: MetricKind,
    /// Stateful or snapshot.
    pub flavor: Flavor,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Unit of measurement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Chart family hint for the emission layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_family: Option<String>,
}

impl SeriesMeta {
    /// Metadata with no description, unit or chart family.
    pub fn new(kind: MetricKind, flavor: Flavor) -> Self {
        Self {
            kind,
            flavor,
            description: None,
            unit: None,
            chart_family: None,
        }
    }

    fn with_options(mut self, opts: &[InstrumentOption]) -> Self {
        for opt in opts {
            match opt {
                InstrumentOption::Description(d) => self.description = Some(d.clone()),
                InstrumentOption::Unit(u) => self.unit = Some(u.clone()),
                InstrumentOption::ChartFamily(c) => self.chart_family = Some(c.clone()),
            }
        }
        self
    }

    pub(crate) fn describe(&self) -> String {
        format!("{} {}", self.flavor, self.kind)
    }
}

/// Optional metadata supplied when declaring an instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentOption {
    /// Sets [`SeriesMeta::description`].
    Description(String),
    /// Sets [`SeriesMeta::unit`].
    Unit(String),
    /// Sets [`SeriesMeta::chart_family`].
    ChartFamily(String),
}

/// Describes what the instrument measures.
pub fn with_description(description: impl Into<String>) -> InstrumentOption {
    InstrumentOption::Description(description.into())
}

/// Sets the unit of measurement.
pub fn with_unit(unit: impl Into<String>) -> InstrumentOption {
    InstrumentOption::Unit(unit.into())
}

/// Groups the instrument's charts under a family.
pub fn with_chart_family(family: impl Into<String>) -> InstrumentOption {
    InstrumentOption::ChartFamily(family.into())
}

/// Entry point for creating meters on a [`CollectorStore`](crate::CollectorStore).
#[derive(Debug, Clone)]
pub struct Writer {
    backend: Arc<Backend>,
}

impl Writer {
    pub(crate) fn new(backend: Arc<Backend>) -> Self {
        Self { backend }
    }

    /// A meter for instruments that keep state across cycles.
    pub fn stateful_meter(&self, namespace: &str) -> StatefulMeter {
        StatefulMeter {
            core: MeterCore::new(Arc::clone(&self.backend), namespace),
        }
    }

    /// A meter for per-cycle observations.
    pub fn snapshot_meter(&self, namespace: &str) -> SnapshotMeter {
        SnapshotMeter {
            core: MeterCore::new(Arc::clone(&self.backend), namespace),
        }
    }
}

/// Entry point for creating meters on a [`RuntimeStore`](crate::RuntimeStore).
///
/// Only stateful meters are offered: there are no cycles to scope
/// snapshot observations to.
#[derive(Debug, Clone)]
pub struct RuntimeWriter {
    backend: Arc<Backend>,
}

impl RuntimeWriter {
    pub(crate) fn new(backend: Arc<Backend>) -> Self {
        Self { backend }
    }

    /// A meter whose writes are committed immediately.
    pub fn stateful_meter(&self, namespace: &str) -> StatefulMeter {
        StatefulMeter {
            core: MeterCore::new(Arc::clone(&self.backend), namespace),
        }
    }
}

#[derive(Debug, Clone)]
struct MeterCore {
    backend: Arc<Backend>,
    namespace: Arc<str>,
    labels: LabelSet,
}

impl MeterCore {
    fn new(backend: Arc<Backend>, namespace: &str) -> Self {
        Self {
            backend,
            namespace: Arc::from(namespace),
            labels: LabelSet::empty(),
        }
    }

    fn with_labels(&self, pairs: &[(&str, &str)]) -> Result<Self> {
        let added = label_set(pairs)?;
        Ok(Self {
            backend: Arc::clone(&self.backend),
            namespace: Arc::clone(&self.namespace),
            labels: self.labels.merge(&added),
        })
    }

    fn metric_name(&self, name: &str) -> Result<String> {
        validate_name(name)?;
        if self.namespace.is_empty() {
            return Ok(name.to_string());
        }
        validate_name(&self.namespace)?;
        Ok(format!("{}.{name}", self.namespace))
    }

    fn declare(
        &self,
        name: &str,
        kind: MetricKind,
        flavor: Flavor,
        opts: &[InstrumentOption],
    ) -> Result<Family> {
        let metric = self.metric_name(name)?;
        let meta = SeriesMeta::new(kind, flavor).with_options(opts);
        let (metric, meta) = self.backend.declare(&metric, meta)?;
        Ok(Family {
            backend: Arc::clone(&self.backend),
            metric,
            labels: self.labels.clone(),
            meta,
        })
    }

    fn declare_vec<I>(
        &self,
        name: &str,
        label_keys: &[&str],
        kind: MetricKind,
        flavor: Flavor,
        opts: &[InstrumentOption],
        bind: fn(Family) -> I,
    ) -> Result<InstrumentVec<I>> {
        for key in label_keys {
            LabelSet::new([Label::new(*key, "")]).validate()?;
        }
        let family = self.declare(name, kind, flavor, opts)?;
        Ok(InstrumentVec {
            family,
            keys: label_keys.iter().map(|k| (*k).to_string()).collect(),
            bind,
        })
    }
}

/// Builds a validated label set.
fn label_set(pairs: &[(&str, &str)]) -> Result<LabelSet> {
    let labels = LabelSet::from_pairs(pairs);
    labels.validate()?;
    Ok(labels)
}

fn validate_name(name: &str) -> std::result::Result<(), InstrumentError> {
    let reason = if name.is_empty() {
        "name cannot be empty"
    } else if !is_literal_name(name) {
        "name must match [A-Za-z_:][A-Za-z0-9_:.-]*"
    } else {
        return Ok(());
    };
    Err(InstrumentError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

/// One declared instrument bound to a label set.
#[derive(Debug, Clone)]
struct Family {
    backend: Arc<Backend>,
    metric: Arc<str>,
    labels: LabelSet,
    meta: Arc<SeriesMeta>,
}

impl Family {
    fn key(&self, labels: LabelSet) -> SeriesKey {
        SeriesKey::new(Arc::clone(&self.metric), labels)
    }

    fn write(&self, op: WriteOp) {
        self.backend.write(self.key(self.labels.clone()), &self.meta, op);
    }

    /// Writes to the series identified by the family labels plus `extra`.
    fn write_with(&self, extra: &LabelSet, op: WriteOp) {
        let key = self.key(self.labels.merge(extra));
        if let Err(e) = extra.validate() {
            self.backend.reject(&key, &e.to_string());
            return;
        }
        self.backend.write(key, &self.meta, op);
    }

    fn rebind(&self, labels: LabelSet) -> Family {
        Family {
            backend: Arc::clone(&self.backend),
            metric: Arc::clone(&self.metric),
            labels,
            meta: Arc::clone(&self.meta),
        }
    }
}

impl PartialEq for Family {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.backend, &other.backend)
            && self.metric == other.metric
            && self.labels == other.labels
    }
}

impl Eq for Family {}

macro_rules! handle_accessors {
    ($ty:ty) => {
        impl $ty {
            /// Full metric name.
            pub fn name(&self) -> &str {
                &self.family.metric
            }

            /// Labels every write carries.
            pub fn labels(&self) -> &LabelSet {
                &self.family.labels
            }

            /// Declared metadata.
            pub fn meta(&self) -> &SeriesMeta {
                &self.family.meta
            }
        }
    };
}

/// Meter for instruments that keep state across cycles.
#[derive(Debug, Clone)]
pub struct StatefulMeter {
    core: MeterCore,
}

impl StatefulMeter {
    /// The namespace prefixed to every instrument name.
    pub fn namespace(&self) -> &str {
        &self.core.namespace
    }

    /// Labels attached to every series this meter declares.
    pub fn labels(&self) -> &LabelSet {
        &self.core.labels
    }

    /// Derives a meter carrying these labels in addition to the parent's.
    ///
    /// # Errors
    ///
    /// Returns [`InstrumentError::InvalidLabel`] for an empty, reserved or malformed key.
    pub fn with_labels(&self, pairs: &[(&str, &str)]) -> Result<Self> {
        Ok(Self {
            core: self.core.with_labels(pairs)?,
        })
    }

    /// Builds a validated [`LabelSet`].
    ///
    /// # Errors
    ///
    /// Returns [`InstrumentError::InvalidLabel`] for an empty, reserved or malformed key.
    pub fn label_set(&self, pairs: &[(&str, &str)]) -> Result<LabelSet> {
        label_set(pairs)
    }

    /// Declares a gauge.
    ///
    /// # Errors
    ///
    /// Returns [`InstrumentError::InvalidName`] for an unusable name or
    /// [`InstrumentError::KindMismatch`] if the name is taken by a different
    /// kind or flavor.
    pub fn gauge(&self, name: &str, opts: &[InstrumentOption]) -> Result<StatefulGauge> {
        let family = self.core.declare(name, MetricKind::Gauge, Flavor::Stateful, opts)?;
        Ok(StatefulGauge { family })
    }

    /// Declares a counter.
    ///
    /// # Errors
    ///
    /// See [`StatefulMeter::gauge`].
    pub fn counter(&self, name: &str, opts: &[InstrumentOption]) -> Result<StatefulCounter> {
        let family = self.core.declare(name, MetricKind::Counter, Flavor::Stateful, opts)?;
        Ok(StatefulCounter { family })
    }

    /// Declares a gauge with a dynamic label dimension.
    ///
    /// # Errors
    ///
    /// As [`StatefulMeter::gauge`], plus [`InstrumentError::InvalidLabel`]
    /// for an invalid label key.
    pub fn gauge_vec(
        &self,
        name: &str,
        label_keys: &[&str],
        opts: &[InstrumentOption],
    ) -> Result<StatefulGaugeVec> {
        self.core
            .declare_vec(name, label_keys, MetricKind::Gauge, Flavor::Stateful, opts, |family| {
                StatefulGauge { family }
            })
    }

    /// Declares a counter with a dynamic label dimension.
    ///
    /// # Errors
    ///
    /// See [`StatefulMeter::gauge_vec`].
    pub fn counter_vec(
        &self,
        name: &str,
        label_keys: &[&str],
        opts: &[InstrumentOption],
    ) -> Result<StatefulCounterVec> {
        self.core
            .declare_vec(name, label_keys, MetricKind::Counter, Flavor::Stateful, opts, |family| {
                StatefulCounter { family }
            })
    }
}

/// Meter for per-cycle observations.
#[derive(Debug, Clone)]
pub struct SnapshotMeter {
    core: MeterCore,
}

impl SnapshotMeter {
    /// The namespace prefixed to every instrument name.
    pub fn namespace(&self) -> &str {
        &self.core.namespace
    }

    /// Labels attached to every series this meter declares.
    pub fn labels(&self) -> &LabelSet {
        &self.core.labels
    }

    /// Derives a meter carrying these labels in addition to the parent's.
    ///
    /// # Errors
    ///
    /// Returns [`InstrumentError::InvalidLabel`] for an empty, reserved or malformed key.
    pub fn with_labels(&self, pairs: &[(&str, &str)]) -> Result<Self> {
        Ok(Self {
            core: self.core.with_labels(pairs)?,
        })
    }

    /// Builds a validated [`LabelSet`] for [`SnapshotGauge::observe_with`]
    /// and [`SnapshotCounter::observe_total_with`].
    ///
    /// # Errors
    ///
    /// Returns [`InstrumentError::InvalidLabel`] for an empty, reserved or malformed key.
    pub fn label_set(&self, pairs: &[(&str, &str)]) -> Result<LabelSet> {
        label_set(pairs)
    }

    /// Declares a gauge.
    ///
    /// # Errors
    ///
    /// Returns [`InstrumentError::InvalidName`] for an unusable name or
    /// [`InstrumentError::KindMismatch`] if the name is taken by a different
    /// kind or flavor.
    pub fn gauge(&self, name: &str, opts: &[InstrumentOption]) -> Result<SnapshotGauge> {
        let family = self.core.declare(name, MetricKind::Gauge, Flavor::Snapshot, opts)?;
        Ok(SnapshotGauge { family })
    }

    /// Declares a counter fed with cumulative totals.
    ///
    /// # Errors
    ///
    /// See [`SnapshotMeter::gauge`].
    pub fn counter(&self, name: &str, opts: &[InstrumentOption]) -> Result<SnapshotCounter> {
        let family = self.core.declare(name, MetricKind::Counter, Flavor::Snapshot, opts)?;
        Ok(SnapshotCounter { family })
    }

    /// Declares a gauge with a dynamic label dimension.
    ///
    /// # Errors
    ///
    /// As [`SnapshotMeter::gauge`], plus [`InstrumentError::InvalidLabel`]
    /// for an invalid label key.
    pub fn gauge_vec(
        &self,
        name: &str,
        label_keys: &[&str],
        opts: &[InstrumentOption],
    ) -> Result<SnapshotGaugeVec> {
        self.core
            .declare_vec(name, label_keys, MetricKind::Gauge, Flavor::Snapshot, opts, |family| {
                SnapshotGauge { family }
            })
    }

    /// Declares a counter with a dynamic label dimension.
    ///
    /// # Errors
    ///
    /// See [`SnapshotMeter::gauge_vec`].
    pub fn counter_vec(
        &self,
        name: &str,
        label_keys: &[&str],
        opts: &[InstrumentOption],
    ) -> Result<SnapshotCounterVec> {
        self.core
            .declare_vec(name, label_keys, MetricKind::Counter, Flavor::Snapshot, opts, |family| {
                SnapshotCounter { family }
            })
    }
}

/// Gauge whose value persists across cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatefulGauge {
    family: Family,
}

impl StatefulGauge {
    /// Sets the value.
    pub fn set(&self, value: f64) {
        self.family.write(WriteOp::Set(value));
    }

    /// Moves the value up or down from the latest committed value.
    pub fn add(&self, delta: f64) {
        self.family.write(WriteOp::Add(delta));
    }
}

handle_accessors!(StatefulGauge);

/// Monotonic counter accumulating across cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatefulCounter {
    family: Family,
}

impl StatefulCounter {
    /// Adds a non-negative amount. Negative amounts are rejected.
    pub fn add(&self, delta: f64) {
        if delta < 0.0 {
            let key = self.family.key(self.family.labels.clone());
            self.family.backend.reject(&key, "counter cannot decrease");
            return;
        }
        self.family.write(WriteOp::Add(delta));
    }
}

handle_accessors!(StatefulCounter);

/// Gauge reporting a value observed this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotGauge {
    family: Family,
}

impl SnapshotGauge {
    /// Records the value for this cycle.
    pub fn observe(&self, value: f64) {
        self.family.write(WriteOp::Set(value));
    }

    /// Records the value for the series with `labels` added.
    pub fn observe_with(&self, value: f64, labels: &LabelSet) {
        self.family.write_with(labels, WriteOp::Set(value));
    }
}

handle_accessors!(SnapshotGauge);

/// Counter fed with cumulative totals read from a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotCounter {
    family: Family,
}

impl SnapshotCounter {
    /// Records the cumulative total seen this cycle.
    pub fn observe_total(&self, total: f64) {
        self.family.write(WriteOp::Set(total));
    }

    /// Records the cumulative total for the series with `labels` added.
    pub fn observe_total_with(&self, total: f64, labels: &LabelSet) {
        self.family.write_with(labels, WriteOp::Set(total));
    }
}

handle_accessors!(SnapshotCounter);

/// An instrument with a dynamic label dimension.
///
/// [`InstrumentVec::with_label_values`] resolves one combination of values
/// to a plain instrument handle.
#[derive(Debug, Clone)]
pub struct InstrumentVec<I> {
    family: Family,
    keys: Arc<[String]>,
    bind: fn(Family) -> I,
}

impl<I> InstrumentVec<I> {
    /// Full metric name.
    pub fn name(&self) -> &str {
        &self.family.metric
    }

    /// The label keys values are supplied for, in order.
    pub fn label_keys(&self) -> &[String] {
        &self.keys
    }

    /// Returns the instrument for one combination of label values.
    ///
    /// # Errors
    ///
    /// Returns [`InstrumentError::LabelArity`] if `values` does not have one
    /// entry per label key.
    pub fn with_label_values(&self, values: &[&str]) -> Result<I> {
        if values.len() != self.keys.len() {
            return Err(InstrumentError::LabelArity {
                name: self.family.metric.to_string(),
                expected: self.keys.len(),
                got: values.len(),
            }
            .into());
        }
        let dynamic: LabelSet = self
            .keys
            .iter()
            .zip(values)
            .map(|(k, v)| Label::new(k.as_str(), *v))
            .collect();
        Ok((self.bind)(self.family.rebind(self.family.labels.merge(&dynamic))))
    }
}

/// [`StatefulGauge`] with a dynamic label dimension.
pub type StatefulGaugeVec = InstrumentVec<StatefulGauge>;
/// [`StatefulCounter`] with a dynamic label dimension.
pub type StatefulCounterVec = InstrumentVec<StatefulCounter>;
/// [`SnapshotGauge`] with a dynamic label dimension.
pub type SnapshotGaugeVec = InstrumentVec<SnapshotGauge>;
/// [`SnapshotCounter`] with a dynamic label dimension.
pub type SnapshotCounterVec = InstrumentVec<SnapshotCounter>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MetrixError;
    use crate::reader::ReadOptions;
    use crate::store::{CollectorStore, RuntimeStore};

    #[test]
    fn test_metric_names() {
        let store = RuntimeStore::new();
        let w = store.write();
        assert_eq!(w.stateful_meter("svc").gauge("load", &[]).unwrap().name(), "svc.load");
        assert_eq!(w.stateful_meter("").gauge("load", &[]).unwrap().name(), "load");
    }

    #[test]
    fn test_invalid_names_rejected() {
        let store = RuntimeStore::new();
        let m = store.write().stateful_meter("svc");
        let bad_names = [
            "", "a b", "a*", "a{b}", "a\"b", "a,b", "a=b", "9p", "disk/io", "a?", "a+b", "naïve",
        ];
        for bad in bad_names {
            assert!(
                matches!(
                    m.gauge(bad, &[]),
                    Err(MetrixError::Instrument(InstrumentError::InvalidName { .. }))
                ),
                "{bad:?}"
            );
        }
        for bad_ns in ["my svc", "9p"] {
            assert!(store.write().stateful_meter(bad_ns).gauge("load", &[]).is_err(), "{bad_ns:?}");
        }
    }

    #[test]
    fn test_invalid_labels_rejected() {
        let store = RuntimeStore::new();
        let m = store.write().stateful_meter("svc");
        assert!(matches!(
            m.with_labels(&[("__name__", "x")]),
            Err(MetrixError::Instrument(InstrumentError::InvalidLabel { .. }))
        ));
        assert!(m.label_set(&[("", "x")]).is_err());
        assert!(m.gauge_vec("load", &["__id"], &[]).is_err());
    }

    #[test]
    fn test_redeclaration_equal_handles_and_conflicts() {
        let store = CollectorStore::new();
        let m = store.write().stateful_meter("svc");

        let a = m.gauge("load", &[]).unwrap();
        let b = m.gauge("load", &[]).unwrap();
        assert_eq!(a, b);

        let labeled = m.with_labels(&[("zone", "a")]).unwrap().gauge("load", &[]).unwrap();
        assert_ne!(a, labeled);

        assert!(matches!(
            m.counter("load", &[]),
            Err(MetrixError::Instrument(InstrumentError::KindMismatch { .. }))
        ));
        assert!(matches!(
            store.write().snapshot_meter("svc").gauge("load", &[]),
            Err(MetrixError::Instrument(InstrumentError::KindMismatch { .. }))
        ));
    }

    #[test]
    fn test_options_populate_meta() {
        let store = RuntimeStore::new();
        let g = store
            .write()
            .stateful_meter("svc")
            .gauge(
                "load",
                &[
                    with_description("Run queue length"),
                    with_unit("tasks"),
                    with_chart_family("cpu"),
                ],
            )
            .unwrap();
        let meta = g.meta();
        assert_eq!(meta.kind, MetricKind::Gauge);
        assert_eq!(meta.flavor, Flavor::Stateful);
        assert_eq!(meta.description.as_deref(), Some("Run queue length"));
        assert_eq!(meta.unit.as_deref(), Some("tasks"));
        assert_eq!(meta.chart_family.as_deref(), Some("cpu"));
    }

    #[test]
    fn test_with_labels_inherits_and_overrides() {
        let store = RuntimeStore::new();
        let parent = store
            .write()
            .stateful_meter("svc")
            .with_labels(&[("a", "1"), ("b", "1")])
            .unwrap();
        let child = parent.with_labels(&[("b", "2"), ("c", "3")]).unwrap();
        assert_eq!(child.labels(), &LabelSet::from_pairs(&[("a", "1"), ("b", "2"), ("c", "3")]));
        assert_eq!(parent.labels().len(), 2);
    }

    #[test]
    fn test_vec_arity_and_labels() {
        let store = RuntimeStore::new();
        let m = store.write().stateful_meter("svc").with_labels(&[("host", "h1")]).unwrap();
        let v = m.counter_vec("jobs_total", &["queue", "state"], &[]).unwrap();
        assert_eq!(v.label_keys(), ["queue", "state"]);

        match v.with_label_values(&["a"]) {
            Err(MetrixError::Instrument(InstrumentError::LabelArity { expected, got, .. })) => {
                assert_eq!((expected, got), (2, 1));
            }
            other => panic!("expected LabelArity, got {other:?}"),
        }

        let c = v.with_label_values(&["a", "done"]).unwrap();
        let expected = LabelSet::from_pairs(&[("host", "h1"), ("queue", "a"), ("state", "done")]);
        assert_eq!(c.labels(), &expected);
        assert_eq!(c, v.with_label_values(&["a", "done"]).unwrap());
    }

    #[test]
    fn test_stateful_counter_accumulates_and_rejects_decrease() {
        let store = RuntimeStore::new();
        let c = store.write().stateful_meter("svc").counter("events_total", &[]).unwrap();
        c.add(2.0);
        c.add(3.0);
        c.add(-1.0);

        let reader = store.read(ReadOptions::raw());
        assert_eq!(reader.value("svc.events_total", &LabelSet::empty()), Some(5.0));
        assert_eq!(reader.delta("svc.events_total", &LabelSet::empty()), Some(3.0));
        assert_eq!(store.stats().rejected_writes, 1);
    }

    #[test]
    fn test_stateful_gauge_set_and_add_across_cycles() {
        let store = CollectorStore::new();
        let cc = store.cycle_controller();
        let g = store.write().stateful_meter("svc").gauge("inflight", &[]).unwrap();

        cc.begin_cycle().unwrap();
        g.set(10.0);
        g.add(2.0);
        cc.commit_cycle_success().unwrap();

        cc.begin_cycle().unwrap();
        g.add(-4.0);
        cc.commit_cycle_success().unwrap();

        let reader = store.read(ReadOptions::default());
        assert_eq!(reader.value("svc.inflight", &LabelSet::empty()), Some(8.0));
        assert_eq!(reader.delta("svc.inflight", &LabelSet::empty()), None);
    }

    #[test]
    fn test_snapshot_counter_delta_and_observe_with() {
        let store = CollectorStore::new();
        let cc = store.cycle_controller();
        let m = store.write().snapshot_meter("nginx");
        let total = m.counter("requests_total", &[]).unwrap();
        let conns = m.gauge("connections", &[]).unwrap();
        let reading = m.label_set(&[("state", "reading")]).unwrap();

        cc.begin_cycle().unwrap();
        total.observe_total(100.0);
        conns.observe_with(4.0, &reading);
        cc.commit_cycle_success().unwrap();

        cc.begin_cycle().unwrap();
        total.observe_total(130.0);
        conns.observe_with(6.0, &reading);
        conns.observe_with(1.0, &LabelSet::from_pairs(&[("__bad", "x")]));
        cc.commit_cycle_success().unwrap();

        let reader = store.read(ReadOptions::default());
        assert_eq!(reader.value("nginx.requests_total", &LabelSet::empty()), Some(130.0));
        assert_eq!(reader.delta("nginx.requests_total", &LabelSet::empty()), Some(30.0));
        assert_eq!(reader.value("nginx.connections", &reading), Some(6.0));
        assert_eq!(reader.len(), 2);
        assert_eq!(store.stats().rejected_writes, 1);
    }
}
