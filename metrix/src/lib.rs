//! # metrix
//!
//! Cycle-consistent, in-process metrics store for collector frameworks.
//!
//! metrix buffers numeric observations from many concurrently running
//! data-collection jobs, reconciles them into labeled series once per
//! collection cycle, and exposes a consistent, selector-filtered read view
//! to whatever emits the data downstream.
//!
//! ## Key Properties
//!
//! - Cycle-based consistency: a reader never sees half of a cycle
//! - Failed cycles leave no trace
//! - Overlay-based storage with incremental compaction bounding memory
//! - TTL and series-cap retention
//! - A small selector language (`name{k="v",k2!*"glob*"}`) shared by the read
//!   path and label-promotion logic
//!
//! ## Quick Start
//!
//! ```rust
//! use metrix::{CollectorStore, Labels, ReadOptions};
//!
//! # fn main() -> Result<(), metrix::MetrixError> {
//! let store = CollectorStore::new();
//! let meter = store.write().snapshot_meter("app");
//! let load = meter.gauge_vec("load", &["id"], &[])?;
//!
//! let cc = store.cycle_controller();
//!
//! cc.begin_cycle()?;
//! load.with_label_values(&["a"])?.observe(10.0);
//! load.with_label_values(&["b"])?.observe(20.0);
//! cc.commit_cycle_success()?;
//!
//! cc.begin_cycle()?;
//! load.with_label_values(&["a"])?.observe(30.0);
//! cc.commit_cycle_success()?;
//!
//! // Filtered reads see only what the latest cycle wrote.
//! let mut values = Vec::new();
//! store.read(ReadOptions::default()).for_each_match("app.load", |_| true, |_, v| values.push(v))?;
//! assert_eq!(values, [30.0]);
//!
//! // Raw reads see every retained series.
//! let b = Labels::from([("id".to_string(), "b".to_string())]);
//! assert_eq!(store.read(ReadOptions::raw()).value("app.load", &b), Some(20.0));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`CollectorStore`] / [`RuntimeStore`]: top-level handles
//! - [`CycleController`]: begin / commit-success / commit-failure
//! - [`StatefulMeter`] / [`SnapshotMeter`]: instrument factories
//! - [`Reader`]: pinned, filtered or raw view of committed series
//! - [`Selector`]: compiled series predicate
//!
//! ## Modules
//!
//! - [`labels`]: label sets and the read-only label view
//! - [`selector`]: selector language
//! - [`cycle`]: cycle state machine
//! - [`meter`]: meters and instruments
//! - [`reader`]: read API
//! - [`seeded`]: zero-seeded instruments
//! - [`store`]: store façades
//! - [`config`]: retention and compaction tunables
//! - [`clock`]: time source
//! - [`error`]: error types

mod backend;
pub mod clock;
pub mod config;
pub mod cycle;
pub mod error;
pub mod labels;
pub mod meter;
pub mod reader;
pub mod seeded;
pub mod selector;
pub mod store;

// Re-export primary API types at crate root for convenience.
pub use backend::StoreStats;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CompactionPolicy, RetentionPolicy, StoreConfig};
pub use cycle::{Cycle, CycleController, CycleId, CycleStatus};
pub use error::{ConfigError, CycleError, InstrumentError, MetrixError, ParseError, Result};
pub use labels::{Label, LabelSet, LabelView, Labels};
pub use meter::{
    Flavor, InstrumentOption, InstrumentVec, MetricKind, RuntimeWriter, SeriesMeta,
    SnapshotCounter, SnapshotCounterVec, SnapshotGauge, SnapshotGaugeVec, SnapshotMeter,
    StatefulCounter, StatefulCounterVec, StatefulGauge, StatefulGaugeVec, StatefulMeter, Writer,
    with_chart_family, with_description, with_unit,
};
pub use reader::{ReadOptions, Reader, SeriesIdentity, SeriesRef};
pub use seeded::{seeded_counter, seeded_gauge};
pub use selector::{Selector, parse};
pub use store::{CollectorStore, RuntimeStore};
