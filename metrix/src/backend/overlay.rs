//! Overlay layers: the open write buffer and the committed, immutable stack.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, RandomState};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cycle::CycleId;
use crate::meter::{MetricKind, SeriesMeta};

use super::SeriesKey;

/// Number of independently locked shards in the open overlay.
const SHARDS: usize = 16;

/// A write as recorded by an instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum WriteOp {
    /// Replace the value.
    Set(f64),
    /// Offset the latest committed value.
    Add(f64),
}

impl WriteOp {
    /// Folds a later write in the same cycle into this one.
    fn fold(self, later: WriteOp) -> WriteOp {
        match (self, later) {
            (_, WriteOp::Set(v)) => WriteOp::Set(v),
            (WriteOp::Set(v), WriteOp::Add(d)) => WriteOp::Set(v + d),
            (WriteOp::Add(a), WriteOp::Add(d)) => WriteOp::Add(a + d),
        }
    }
}

/// A buffered write waiting for its cycle to commit.
#[derive(Debug, Clone)]
pub(crate) struct Pending {
    pub(crate) meta: Arc<SeriesMeta>,
    pub(crate) op: WriteOp,
}

impl Pending {
    /// Resolves against the latest committed sample of the same series.
    ///
    /// Counters carry a delta only when a previous sample exists.
    pub(crate) fn resolve(self, prev: Option<&Sample>, cycle: CycleId, now_ns: u64) -> Sample {
        let prev_value = prev.map(|p| p.value);
        let value = match self.op {
            WriteOp::Set(v) => v,
            WriteOp::Add(d) => prev_value.unwrap_or(0.0) + d,
        };
        let delta = match self.meta.kind {
            MetricKind::Counter => prev_value.map(|p| value - p),
            MetricKind::Gauge => None,
        };
        Sample {
            value,
            delta,
            meta: self.meta,
            cycle,
            written_at: now_ns,
        }
    }
}

/// The per-cycle write buffer.
///
/// Writers hold the enclosing `RwLock` for reading and lock exactly one
/// shard. Commit holds it for writing, which excludes all writers, and
/// drains the shards without further locking.
#[derive(Debug)]
pub(crate) struct OpenOverlay {
    /// The cycle accepting writes, if any.
    pub(crate) cycle: Option<CycleId>,
    shards: Box<[Mutex<HashMap<SeriesKey, Pending>>]>,
    hasher: RandomState,
}

impl OpenOverlay {
    pub(crate) fn new() -> Self {
        Self {
            cycle: None,
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    /// Buffers a write. Writes to one series are ordered by the shard lock.
    pub(crate) fn stage(&self, key: SeriesKey, meta: &Arc<SeriesMeta>, op: WriteOp) {
        #[allow(clippy::cast_possible_truncation)] // Only the low bits select a shard
        let index = (self.hasher.hash_one(&key) as usize) % self.shards.len();
        let mut shard = self.shards[index].lock();
        match shard.entry(key) {
            Entry::Occupied(mut slot) => {
                let pending = slot.get_mut();
                pending.op = pending.op.fold(op);
            }
            Entry::Vacant(slot) => {
                slot.insert(Pending {
                    meta: Arc::clone(meta),
                    op,
                });
            }
        }
    }

    /// Removes and returns everything buffered, sorted by series key.
    pub(crate) fn drain(&mut self) -> BTreeMap<SeriesKey, Pending> {
        let mut all = BTreeMap::new();
        for shard in self.shards.iter_mut() {
            all.extend(shard.get_mut().drain());
        }
        all
    }

    /// Number of distinct series buffered.
    #[cfg(test)]
    pub(crate) fn len(&mut self) -> usize {
        self.shards.iter_mut().map(|s| s.get_mut().len()).sum()
    }
}

/// A committed, resolved value.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Sample {
    pub(crate) value: f64,
    /// Counter only: value minus the previous committed value.
    pub(crate) delta: Option<f64>,
    pub(crate) meta: Arc<SeriesMeta>,
    /// The cycle that produced this value.
    pub(crate) cycle: CycleId,
    /// Commit timestamp in nanoseconds.
    pub(crate) written_at: u64,
}

/// The writes of one successfully committed cycle. Immutable once built.
#[derive(Debug)]
pub(crate) struct Overlay {
    pub(crate) cycle: CycleId,
    pub(crate) committed_at: u64,
    pub(crate) entries: BTreeMap<SeriesKey, Sample>,
}

/// Everything readers can see: a base layer plus the committed overlays.
///
/// Snapshots are never mutated. Commit and compaction build a new one and
/// swap it in, so a reader holding an `Arc<Snapshot>` sees either the full
/// pre-state or the full post-state.
#[derive(Debug, Default)]
pub(crate) struct Snapshot {
    pub(crate) base: Arc<BTreeMap<SeriesKey, Sample>>,
    /// Newest first. The first entry is the head: the latest successful cycle.
    pub(crate) overlays: Vec<Arc<Overlay>>,
    /// Total entries across `overlays`.
    pub(crate) overlay_writes: usize,
}

impl Snapshot {
    /// The most recent successful cycle's overlay.
    pub(crate) fn head(&self) -> Option<&Overlay> {
        self.overlays.first().map(AsRef::as_ref)
    }

    /// The freshest committed sample for `key` in any layer.
    pub(crate) fn latest(&self, key: &SeriesKey) -> Option<&Sample> {
        self.latest_entry(key).map(|(_, sample)| sample)
    }

    /// Like [`Snapshot::latest`], also returning the stored key.
    pub(crate) fn latest_entry(&self, key: &SeriesKey) -> Option<(&SeriesKey, &Sample)> {
        self.overlays
            .iter()
            .find_map(|o| o.entries.get_key_value(key))
            .or_else(|| self.base.get_key_value(key))
    }

    /// Returns a new snapshot with `overlay` pushed as the head.
    pub(crate) fn push(&self, overlay: Overlay) -> Snapshot {
        let mut overlays = Vec::with_capacity(self.overlays.len() + 1);
        let overlay_writes = self.overlay_writes + overlay.entries.len();
        overlays.push(Arc::new(overlay));
        overlays.extend(self.overlays.iter().cloned());
        Snapshot {
            base: Arc::clone(&self.base),
            overlays,
            overlay_writes,
        }
    }

    /// Series touched by the head overlay, in key order.
    pub(crate) fn filtered(&self) -> impl Iterator<Item = (&SeriesKey, &Sample)> {
        self.head().into_iter().flat_map(|h| h.entries.iter())
    }

    /// Every retained series at its freshest value, in key order.
    pub(crate) fn raw(&self) -> BTreeMap<&SeriesKey, &Sample> {
        let mut merged: BTreeMap<&SeriesKey, &Sample> = self.base.iter().collect();
        for overlay in self.overlays.iter().rev() {
            merged.extend(overlay.entries.iter());
        }
        merged
    }
}
