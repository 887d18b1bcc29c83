//! Retention and compaction.
//!
//! Compaction folds every overlay except the head into the base layer, then
//! applies the retention policy to the base:
//!
//! 1. Entries last written before `now - ttl` are dropped (`ttl == 0`
//!    disables this step).
//! 2. If the base and the head together still hold more than `max_series`
//!    distinct series (`0` means unlimited), the least recently written base
//!    entries are dropped until the cap holds. Series in the head overlay are
//!    never dropped by the cap.
//!
//! The head overlay survives untouched so filtered reads keep working.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::RetentionPolicy;

use super::SeriesKey;
use super::overlay::{Sample, Snapshot};

/// What a compaction pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CompactionReport {
    /// Overlays folded into the base.
    pub(crate) merged_overlays: usize,
    /// Base entries dropped for exceeding the TTL.
    pub(crate) expired: usize,
    /// Base entries dropped to satisfy `max_series`.
    pub(crate) evicted: usize,
    /// Distinct series retained afterwards (base and head combined).
    pub(crate) retained: usize,
}

/// Builds the compacted successor of `snapshot`.
pub(crate) fn compact(
    snapshot: &Snapshot,
    retention: &RetentionPolicy,
    now_ns: u64,
) -> (Snapshot, CompactionReport) {
    let mut report = CompactionReport::default();
    let mut base: BTreeMap<SeriesKey, Sample> = (*snapshot.base).clone();

    for overlay in snapshot.overlays.iter().skip(1).rev() {
        base.extend(overlay.entries.iter().map(|(k, s)| (k.clone(), s.clone())));
        report.merged_overlays += 1;
    }

    if !retention.ttl.is_zero() {
        let ttl_ns = u64::try_from(retention.ttl.as_nanos()).unwrap_or(u64::MAX);
        let cutoff = now_ns.saturating_sub(ttl_ns);
        let before = base.len();
        base.retain(|_, sample| sample.written_at >= cutoff);
        report.expired = before - base.len();
    }

    let head = snapshot.overlays.first();
    let in_head = |key: &SeriesKey| head.is_some_and(|h| h.entries.contains_key(key));
    let head_only = head.map_or(0, |h| h.entries.keys().filter(|k| !base.contains_key(*k)).count());
    let mut retained = base.len() + head_only;

    if retention.max_series > 0 && retained > retention.max_series {
        let mut candidates: Vec<(u64, SeriesKey)> = base
            .iter()
            .filter(|(key, _)| !in_head(*key))
            .map(|(key, sample)| (sample.written_at, key.clone()))
            .collect();
        candidates.sort();

        for (_, key) in candidates {
            if retained <= retention.max_series {
                break;
            }
            base.remove(&key);
            retained -= 1;
            report.evicted += 1;
        }
    }
    report.retained = retained;

    let overlays: Vec<_> = head.cloned().into_iter().collect();
    let overlay_writes = overlays.iter().map(|o| o.entries.len()).sum();
    let compacted = Snapshot {
        base: Arc::new(base),
        overlays,
        overlay_writes,
    };
    (compacted, report)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::overlay::Overlay;
    use crate::cycle::CycleId;
    use crate::labels::LabelSet;
    use crate::meter::{Flavor, MetricKind, SeriesMeta};

    const SEC: u64 = 1_000_000_000;

    fn key(metric: &str) -> SeriesKey {
        SeriesKey::new(Arc::from(metric), LabelSet::empty())
    }

    fn overlay(cycle: u64, at: u64, names: &[&str]) -> Overlay {
        let meta = Arc::new(SeriesMeta::new(MetricKind::Gauge, Flavor::Stateful));
        let entries = names
            .iter()
            .map(|n| {
                let sample = Sample {
                    value: 1.0,
                    delta: None,
                    meta: Arc::clone(&meta),
                    cycle: CycleId(cycle),
                    written_at: at,
                };
                (key(n), sample)
            })
            .collect();
        Overlay {
            cycle: CycleId(cycle),
            committed_at: at,
            entries,
        }
    }

    fn stack(overlays: Vec<Overlay>) -> Snapshot {
        overlays.into_iter().fold(Snapshot::default(), |s, o| s.push(o))
    }

    fn retention(ttl_secs: u64, max_series: usize) -> RetentionPolicy {
        RetentionPolicy {
            ttl: Duration::from_secs(ttl_secs),
            max_series,
        }
    }

    fn base_keys(snapshot: &Snapshot) -> Vec<&str> {
        snapshot.base.keys().map(|k| k.metric.as_ref()).collect()
    }

    #[test]
    fn test_merges_all_but_head() {
        let snap = stack(vec![
            overlay(1, SEC, &["a", "b"]),
            overlay(2, 2 * SEC, &["a"]),
            overlay(3, 3 * SEC, &["c"]),
        ]);

        let (compacted, report) = compact(&snap, &retention(0, 0), 3 * SEC);

        assert_eq!(report.merged_overlays, 2);
        assert_eq!(report.retained, 3);
        assert_eq!(base_keys(&compacted), ["a", "b"]);
        assert_eq!(compacted.base[&key("a")].cycle, CycleId(2));
        assert_eq!(compacted.overlays.len(), 1);
        assert_eq!(compacted.head().map(|h| h.cycle), Some(CycleId(3)));
        assert_eq!(compacted.overlay_writes, 1);
    }

    #[test]
    fn test_ttl_expires_idle_base_entries() {
        let snap = stack(vec![overlay(1, 0, &["stale"]), overlay(2, 6 * SEC, &["trigger"])]);

        let (compacted, report) = compact(&snap, &retention(5, 0), 6 * SEC);

        assert_eq!(report.expired, 1);
        assert!(compacted.latest(&key("stale")).is_none());
        assert!(compacted.latest(&key("trigger")).is_some());
    }

    #[test]
    fn test_zero_ttl_keeps_everything() {
        let snap = stack(vec![overlay(1, 0, &["old"]), overlay(2, 1_000 * SEC, &["new"])]);
        let (compacted, report) = compact(&snap, &retention(0, 0), 1_000 * SEC);
        assert_eq!(report.expired, 0);
        assert!(compacted.latest(&key("old")).is_some());
    }

    #[test]
    fn test_max_series_evicts_least_recent_but_never_head() {
        let snap = stack(vec![
            overlay(1, SEC, &["oldest"]),
            overlay(2, 2 * SEC, &["middle"]),
            overlay(3, 3 * SEC, &["newer"]),
            overlay(4, 4 * SEC, &["head1", "head2"]),
        ]);

        let (compacted, report) = compact(&snap, &retention(0, 3), 4 * SEC);
        assert_eq!(report.evicted, 2);
        assert_eq!(report.retained, 3);
        assert_eq!(base_keys(&compacted), ["newer"]);

        // A cap below the head size empties the base but keeps the head.
        let (compacted, report) = compact(&snap, &retention(0, 1), 4 * SEC);
        assert_eq!(report.retained, 2);
        assert!(compacted.base.is_empty());
        assert!(compacted.latest(&key("head1")).is_some());
        assert!(compacted.latest(&key("head2")).is_some());
    }

    #[test]
    fn test_head_shadowed_base_counts_once() {
        let snap = stack(vec![overlay(1, SEC, &["a"]), overlay(2, 2 * SEC, &["a"])]);
        let (_, report) = compact(&snap, &retention(0, 1), 2 * SEC);
        assert_eq!(report.retained, 1);
        assert_eq!(report.evicted, 0);
    }

    #[test]
    fn test_source_snapshot_untouched() {
        let snap = stack(vec![overlay(1, 0, &["a"]), overlay(2, 10 * SEC, &["b"])]);
        let _ = compact(&snap, &retention(5, 0), 10 * SEC);
        assert_eq!(snap.overlays.len(), 2);
        assert!(snap.latest(&key("a")).is_some());
    }
}
