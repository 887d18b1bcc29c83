//! Cycle state machine: `Idle -> Open -> {Success, Failure} -> Idle`.
//!
//! A cycle is the unit of consistency. Writes made while a cycle is open are
//! buffered in an overlay and become visible to readers only when the cycle
//! commits successfully. A failed commit discards them.
//!
//! # Example
//!
//! ```rust
//! use metrix::{CollectorStore, Labels, ReadOptions};
//!
//! # fn main() -> Result<(), metrix::MetrixError> {
//! let store = CollectorStore::new();
//! let cc = store.cycle_controller();
//! let load = store.write().snapshot_meter("svc").gauge("load", &[])?;
//!
//! cc.begin_cycle()?;
//! load.observe(1.5);
//! cc.commit_cycle_success()?;
//!
//! let reader = store.read(ReadOptions::default());
//! assert_eq!(reader.value("svc.load", &Labels::new()), Some(1.5));
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::error::Result;

/// Monotonically increasing cycle identifier, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleId(pub u64);

impl CycleId {
    /// The raw sequence number.
    pub fn get(self) -> u64 {
        self.0
    }

    pub(crate) fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a cycle is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// Accepting writes.
    Open,
    /// Committed; its writes are visible.
    CommittedSuccess,
    /// Abandoned; its writes were discarded.
    CommittedFailure,
}

/// A cycle id together with its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    /// The cycle.
    pub id: CycleId,
    /// Its status.
    pub status: CycleStatus,
}

/// Drives cycle transitions for a [`CollectorStore`](crate::CollectorStore).
///
/// One coordinator thread is expected to own the controller while any
/// number of writer threads record observations into the open cycle.
/// Cloning is cheap; clones drive the same store.
#[derive(Debug, Clone)]
pub struct CycleController {
    backend: Arc<Backend>,
}

impl CycleController {
    pub(crate) fn new(backend: Arc<Backend>) -> Self {
        Self { backend }
    }

    /// Opens a new cycle.
    ///
    /// Compaction runs first if the overlay stack has outgrown its policy.
    ///
    /// # Errors
    ///
    /// Returns [`CycleError::AlreadyOpen`](crate::CycleError::AlreadyOpen) if a
    /// cycle is already open. State is unchanged.
    pub fn begin_cycle(&self) -> Result<CycleId> {
        Ok(self.backend.begin_cycle()?)
    }

    /// Commits the open cycle, publishing its writes atomically.
    ///
    /// # Errors
    ///
    /// Returns [`CycleError::NotOpen`](crate::CycleError::NotOpen) if no cycle
    /// is open.
    pub fn commit_cycle_success(&self) -> Result<CycleId> {
        Ok(self.backend.commit_cycle(true)?)
    }

    /// Abandons the open cycle. None of its writes will ever be visible.
    ///
    /// # Errors
    ///
    /// Returns [`CycleError::NotOpen`](crate::CycleError::NotOpen) if no cycle
    /// is open.
    pub fn commit_cycle_failure(&self) -> Result<CycleId> {
        Ok(self.backend.commit_cycle(false)?)
    }

    /// The open cycle, or the most recently finished one.
    pub fn current(&self) -> Option<Cycle> {
        self.backend.current_cycle()
    }

    /// Returns `true` while a cycle is open.
    pub fn is_open(&self) -> bool {
        self.current().is_some_and(|c| c.status == CycleStatus::Open)
    }
}
