//! Storage backend: overlay stack, base layer and instrument registry.
//!
//! # Design
//!
//! The backend owns all series storage. Writers record into a sharded open
//! overlay; a successful commit resolves the buffered writes against the
//! latest committed values and publishes them as a new immutable
//! [`Snapshot`] whose head overlay is the committed cycle. Readers clone an
//! `Arc<Snapshot>` and never block writers or commits.
//!
//! # Lock order
//!
//! ```text
//! cycle (Mutex) -> open (RwLock) -> shard (Mutex)
//! cycle (Mutex) -> committed (RwLock)
//! registry (RwLock)               leaf, never held while taking another
//! ```
//!
//! Writers take `open.read()` and then a single shard mutex. Commit takes
//! `open.write()`, which waits for in-flight writers, and releases it before
//! swapping the committed snapshot. Readers take `committed.read()` only long
//! enough to clone the `Arc`.

pub(crate) mod compaction;
pub(crate) mod overlay;

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::clock::Clock;
use crate::config::StoreConfig;
use crate::cycle::{Cycle, CycleId, CycleStatus};
use crate::error::{CycleError, InstrumentError};
use crate::labels::LabelSet;
use crate::meter::SeriesMeta;

use self::overlay::{OpenOverlay, Overlay, Snapshot, WriteOp};

/// Identity of one series: full metric name plus labels.
///
/// Ordering is by metric name, then labels, which is the iteration order
/// readers observe.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct SeriesKey {
    pub(crate) metric: Arc<str>,
    pub(crate) labels: LabelSet,
}

impl SeriesKey {
    pub(crate) fn new(metric: Arc<str>, labels: LabelSet) -> Self {
        Self { metric, labels }
    }
}

/// How writes become visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommitMode {
    /// Writes wait for an explicit cycle commit.
    Cycled,
    /// Every write is committed as its own cycle.
    Immediate,
}

/// Point-in-time counters describing the store itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// The cycle currently accepting writes.
    pub open_cycle: Option<CycleId>,
    /// The most recent successfully committed cycle.
    pub last_committed_cycle: Option<CycleId>,
    /// Committed overlays not yet folded into the base.
    pub overlay_depth: usize,
    /// Entries across those overlays.
    pub overlay_writes: usize,
    /// Series in the base layer.
    pub base_series: usize,
    /// Compaction passes run so far.
    pub compactions: u64,
    /// Writes dropped because no cycle was open or the value was invalid.
    pub rejected_writes: u64,
}

#[derive(Debug, Default)]
struct CycleState {
    last_id: Option<CycleId>,
    current: Option<Cycle>,
    last_committed: Option<CycleId>,
}

/// Shared storage behind a store and all of its meters.
#[derive(Debug)]
pub(crate) struct Backend {
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    mode: CommitMode,
    cycle: Mutex<CycleState>,
    open: RwLock<OpenOverlay>,
    committed: RwLock<Arc<Snapshot>>,
    registry: RwLock<HashMap<Arc<str>, Arc<SeriesMeta>>>,
    compactions: AtomicU64,
    rejected_writes: AtomicU64,
}

impl Backend {
    /// Creates an empty backend. The config must already be validated.
    pub(crate) fn new(config: StoreConfig, clock: Arc<dyn Clock>, mode: CommitMode) -> Self {
        Self {
            config,
            clock,
            mode,
            cycle: Mutex::new(CycleState::default()),
            open: RwLock::new(OpenOverlay::new()),
            committed: RwLock::new(Arc::new(Snapshot::default())),
            registry: RwLock::new(HashMap::new()),
            compactions: AtomicU64::new(0),
            rejected_writes: AtomicU64::new(0),
        }
    }

    pub(crate) fn mode(&self) -> CommitMode {
        self.mode
    }

    pub(crate) fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The committed state as of now.
    pub(crate) fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.committed.read())
    }

    pub(crate) fn begin_cycle(&self) -> Result<CycleId, CycleError> {
        let mut state = self.cycle.lock();
        self.begin_locked(&mut state)
    }

    pub(crate) fn commit_cycle(&self, success: bool) -> Result<CycleId, CycleError> {
        let mut state = self.cycle.lock();
        self.commit_locked(&mut state, success)
    }

    pub(crate) fn current_cycle(&self) -> Option<Cycle> {
        self.cycle.lock().current
    }

    fn begin_locked(&self, state: &mut CycleState) -> Result<CycleId, CycleError> {
        if let Some(Cycle {
            id,
            status: CycleStatus::Open,
        }) = state.current
        {
            return Err(CycleError::AlreadyOpen { open: id });
        }

        self.compact_if_needed();

        let id = state.last_id.map_or(CycleId(1), CycleId::next);
        self.open.write().cycle = Some(id);
        state.last_id = Some(id);
        state.current = Some(Cycle {
            id,
            status: CycleStatus::Open,
        });
        trace!(cycle = %id, "cycle opened");
        Ok(id)
    }

    fn commit_locked(&self, state: &mut CycleState, success: bool) -> Result<CycleId, CycleError> {
        let id = match state.current {
            Some(Cycle {
                id,
                status: CycleStatus::Open,
            }) => id,
            _ => return Err(CycleError::NotOpen),
        };

        let pending = {
            let mut open = self.open.write();
            open.cycle = None;
            open.drain()
        };

        if success {
            let now = self.clock.now_ns();
            let previous = self.snapshot();
            let entries = pending
                .into_iter()
                .map(|(key, write)| {
                    let sample = write.resolve(previous.latest(&key), id, now);
                    (key, sample)
                })
                .collect();
            let next = previous.push(Overlay {
                cycle: id,
                committed_at: now,
                entries,
            });
            *self.committed.write() = Arc::new(next);
            state.last_committed = Some(id);
            trace!(cycle = %id, "cycle committed");

            self.compact_if_needed();
        } else {
            trace!(cycle = %id, discarded = pending.len(), "cycle failed");
        }

        state.current = Some(Cycle {
            id,
            status: if success {
                CycleStatus::CommittedSuccess
            } else {
                CycleStatus::CommittedFailure
            },
        });
        Ok(id)
    }

    /// Runs a compaction pass if the overlay stack exceeds its policy.
    ///
    /// Callers hold the cycle lock, so the snapshot cannot change between
    /// reading it and swapping in the compacted one.
    fn compact_if_needed(&self) {
        let current = self.snapshot();
        // The head is never merged, so its entries do not count against the budget.
        let mergeable_writes =
            current.overlay_writes - current.head().map_or(0, |h| h.entries.len());
        if !self
            .config
            .compaction
            .exceeded(current.overlays.len(), mergeable_writes)
        {
            return;
        }

        let now = self.clock.now_ns();
        let (compacted, report) = compaction::compact(&current, &self.config.retention, now);
        *self.committed.write() = Arc::new(compacted);
        self.compactions.fetch_add(1, Ordering::Relaxed);

        debug!(
            head = ?current.head().map(|h| h.cycle),
            oldest_merged_at = ?current.overlays.last().map(|o| o.committed_at),
            merged = report.merged_overlays,
            expired = report.expired,
            evicted = report.evicted,
            retained = report.retained,
            "compacted overlays"
        );
    }

    /// Records a write, or rejects it.
    ///
    /// In [`CommitMode::Cycled`] the write lands in the open cycle and is
    /// rejected when none is open. In [`CommitMode::Immediate`] it is
    /// committed as a cycle of its own before returning.
    pub(crate) fn write(&self, key: SeriesKey, meta: &Arc<SeriesMeta>, op: WriteOp) {
        if let Err(reason) = check_write(op) {
            self.reject(&key, reason);
            return;
        }

        match self.mode {
            CommitMode::Cycled => {
                let open = self.open.read();
                if open.cycle.is_none() {
                    drop(open);
                    self.reject(&key, "no open cycle");
                    return;
                }
                open.stage(key, meta, op);
            }
            CommitMode::Immediate => {
                let mut state = self.cycle.lock();
                if let Err(e) = self.begin_locked(&mut state) {
                    drop(state);
                    self.reject(&key, &e.to_string());
                    return;
                }
                self.open.read().stage(key, meta, op);
                if let Err(e) = self.commit_locked(&mut state, true) {
                    warn!(error = %e, "immediate commit failed");
                }
            }
        }
    }

    /// Counts and logs a dropped write.
    pub(crate) fn reject(&self, key: &SeriesKey, reason: &str) {
        self.rejected_writes.fetch_add(1, Ordering::Relaxed);
        debug!(metric = %key.metric, labels = %key.labels, reason, "write rejected");
    }

    /// Registers an instrument's metadata under its full metric name.
    ///
    /// Redeclaring with the same kind and flavor returns the first
    /// declaration's metadata.
    pub(crate) fn declare(
        &self,
        metric: &str,
        meta: SeriesMeta,
    ) -> Result<(Arc<str>, Arc<SeriesMeta>), InstrumentError> {
        let mut registry = self.registry.write();
        match registry.entry(Arc::from(metric)) {
            Entry::Occupied(existing) => {
                let current = existing.get();
                if current.kind != meta.kind || current.flavor != meta.flavor {
                    let existing_desc = current.describe();
                    let requested = meta.describe();
                    warn!(
                        metric,
                        existing = %existing_desc,
                        requested = %requested,
                        "instrument redeclared with a different kind"
                    );
                    return Err(InstrumentError::KindMismatch {
                        name: metric.to_string(),
                        existing: existing_desc,
                        requested,
                    });
                }
                Ok((Arc::clone(existing.key()), Arc::clone(current)))
            }
            Entry::Vacant(slot) => {
                let name = Arc::clone(slot.key());
                let meta = Arc::clone(slot.insert(Arc::new(meta)));
                Ok((name, meta))
            }
        }
    }

    pub(crate) fn stats(&self) -> StoreStats {
        let state = self.cycle.lock();
        let snapshot = self.snapshot();
        StoreStats {
            open_cycle: state
                .current
                .filter(|c| c.status == CycleStatus::Open)
                .map(|c| c.id),
            last_committed_cycle: state.last_committed,
            overlay_depth: snapshot.overlays.len(),
            overlay_writes: snapshot.overlay_writes,
            base_series: snapshot.base.len(),
            compactions: self.compactions.load(Ordering::Relaxed),
            rejected_writes: self.rejected_writes.load(Ordering::Relaxed),
        }
    }
}

fn check_write(op: WriteOp) -> Result<(), &'static str> {
    match op {
        WriteOp::Set(v) | WriteOp::Add(v) if !v.is_finite() => Err("value is not finite"),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use crate::config::{CompactionPolicy, RetentionPolicy};
    use crate::meter::{Flavor, MetricKind};

    fn backend(mode: CommitMode) -> Backend {
        Backend::new(StoreConfig::default(), Arc::new(SystemClock), mode)
    }

    fn key(metric: &str) -> SeriesKey {
        SeriesKey::new(Arc::from(metric), LabelSet::empty())
    }

    fn gauge() -> Arc<SeriesMeta> {
        Arc::new(SeriesMeta::new(MetricKind::Gauge, Flavor::Stateful))
    }

    fn latest(b: &Backend, metric: &str) -> Option<f64> {
        b.snapshot().latest(&key(metric)).map(|s| s.value)
    }

    #[test]
    fn test_commit_publishes_head() {
        let b = backend(CommitMode::Cycled);
        let meta = gauge();

        b.begin_cycle().unwrap();
        b.write(key("a"), &meta, WriteOp::Set(1.0));
        assert_eq!(latest(&b, "a"), None);
        let id = b.commit_cycle(true).unwrap();

        let snap = b.snapshot();
        assert_eq!(snap.head().map(|h| h.cycle), Some(id));
        assert_eq!(latest(&b, "a"), Some(1.0));
    }

    #[test]
    fn test_failed_cycle_leaves_state_untouched() {
        let b = backend(CommitMode::Cycled);
        let meta = gauge();

        b.begin_cycle().unwrap();
        b.write(key("a"), &meta, WriteOp::Set(1.0));
        b.commit_cycle(true).unwrap();
        let before = b.snapshot();

        b.begin_cycle().unwrap();
        b.write(key("a"), &meta, WriteOp::Set(99.0));
        b.write(key("b"), &meta, WriteOp::Set(2.0));
        b.commit_cycle(false).unwrap();

        assert!(Arc::ptr_eq(&before, &b.snapshot()));
        assert_eq!(latest(&b, "a"), Some(1.0));
        assert_eq!(latest(&b, "b"), None);

        // Nothing from the failed cycle leaks into the next one.
        b.begin_cycle().unwrap();
        b.commit_cycle(true).unwrap();
        assert_eq!(latest(&b, "b"), None);
    }

    #[test]
    fn test_out_of_cycle_and_invalid_writes_rejected() {
        let b = backend(CommitMode::Cycled);
        let meta = gauge();

        b.write(key("a"), &meta, WriteOp::Set(1.0));
        b.begin_cycle().unwrap();
        b.write(key("a"), &meta, WriteOp::Set(f64::NAN));
        b.write(key("a"), &meta, WriteOp::Add(f64::INFINITY));
        b.commit_cycle(true).unwrap();

        assert_eq!(b.stats().rejected_writes, 3);
        assert_eq!(latest(&b, "a"), None);
    }

    #[test]
    fn test_immediate_mode_commits_each_write() {
        let b = backend(CommitMode::Immediate);
        let meta = gauge();

        b.write(key("a"), &meta, WriteOp::Set(1.0));
        assert_eq!(latest(&b, "a"), Some(1.0));
        b.write(key("a"), &meta, WriteOp::Add(2.0));
        assert_eq!(latest(&b, "a"), Some(3.0));

        let stats = b.stats();
        assert_eq!(stats.open_cycle, None);
        assert_eq!(stats.last_committed_cycle, Some(CycleId(2)));
        assert_eq!(stats.rejected_writes, 0);
    }

    #[test]
    fn test_write_budget_ignores_head_overlay() {
        let config = StoreConfig {
            retention: RetentionPolicy {
                ttl: Duration::ZERO,
                max_series: 0,
            },
            compaction: CompactionPolicy {
                max_overlay_depth: 8,
                max_overlay_writes: 10,
            },
        };
        let b = Backend::new(config, Arc::new(ManualClock::new(0)), CommitMode::Cycled);
        let meta = gauge();

        for _ in 0..5 {
            b.begin_cycle().unwrap();
            for i in 0..20 {
                b.write(key(&format!("s{i}")), &meta, WriteOp::Set(1.0));
            }
            b.commit_cycle(true).unwrap();
        }

        // Cycles 2..=5 each leave a 20-entry overlay behind the head; begins never compact.
        let stats = b.stats();
        assert_eq!(stats.compactions, 4);
        assert_eq!(stats.overlay_depth, 1);
        assert_eq!(stats.overlay_writes, 20);
    }

    #[test]
    fn test_compaction_triggered_by_depth() {
        let config = StoreConfig {
            retention: RetentionPolicy {
                ttl: Duration::ZERO,
                max_series: 0,
            },
            compaction: CompactionPolicy {
                max_overlay_depth: 2,
                max_overlay_writes: 1_000,
            },
        };
        let b = Backend::new(config, Arc::new(ManualClock::new(0)), CommitMode::Cycled);
        let meta = gauge();

        for (name, value) in [("a", 0.0), ("b", 1.0), ("c", 2.0)] {
            b.begin_cycle().unwrap();
            b.write(key(name), &meta, WriteOp::Set(value));
            b.commit_cycle(true).unwrap();
        }

        let stats = b.stats();
        assert_eq!(stats.compactions, 1);
        assert_eq!(stats.overlay_depth, 1);
        assert_eq!(stats.base_series, 2);
        assert_eq!(latest(&b, "a"), Some(0.0));
        assert_eq!(latest(&b, "c"), Some(2.0));
    }

    #[test]
    fn test_declare_conflicts() {
        let b = backend(CommitMode::Cycled);
        let stateful_gauge = SeriesMeta::new(MetricKind::Gauge, Flavor::Stateful);
        let (name, first) = b.declare("svc.load", stateful_gauge.clone()).unwrap();
        assert_eq!(&*name, "svc.load");

        let (_, again) = b.declare("svc.load", stateful_gauge).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let err = b
            .declare("svc.load", SeriesMeta::new(MetricKind::Counter, Flavor::Stateful))
            .unwrap_err();
        assert!(matches!(err, InstrumentError::KindMismatch { .. }));

        let err = b
            .declare("svc.load", SeriesMeta::new(MetricKind::Gauge, Flavor::Snapshot))
            .unwrap_err();
        assert!(matches!(err, InstrumentError::KindMismatch { .. }));
    }

    #[test]
    fn test_concurrent_writers_lose_nothing() {
        let b = Arc::new(backend(CommitMode::Cycled));
        let meta = gauge();
        b.begin_cycle().unwrap();

        std::thread::scope(|s| {
            for t in 0..8 {
                let b = Arc::clone(&b);
                let meta = Arc::clone(&meta);
                s.spawn(move || {
                    for i in 0..100 {
                        let (writer, index) = (t.to_string(), i.to_string());
                        let labels = LabelSet::from_pairs(&[
                            ("writer", writer.as_str()),
                            ("i", index.as_str()),
                        ]);
                        b.write(SeriesKey::new(Arc::from("m"), labels), &meta, WriteOp::Set(1.0));
                    }
                });
            }
        });

        b.commit_cycle(true).unwrap();
        assert_eq!(b.snapshot().filtered().count(), 800);
    }
}
