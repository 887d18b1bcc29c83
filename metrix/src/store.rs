//! Store façades: the entry points collectors and the emission layer hold.
//!
//! - [`CollectorStore`] groups writes into cycles driven by a
//!   [`CycleController`]. Writes outside an open cycle are rejected.
//! - [`RuntimeStore`] has no cycles. Every write is committed immediately,
//!   and filtered and raw reads are the same view. It suits
//!   framework-internal metrics that have no scrape loop.
//!
//! Both share the same backend, retention and compaction machinery, and
//! both are cheap to clone: clones refer to the same storage.

use std::sync::Arc;

use crate::backend::{Backend, CommitMode, StoreStats};
use crate::clock::{Clock, SystemClock};
use crate::config::StoreConfig;
use crate::cycle::CycleController;
use crate::error::Result;
use crate::meter::{RuntimeWriter, Writer};
use crate::reader::{ReadOptions, Reader};

fn backend(config: StoreConfig, clock: Arc<dyn Clock>, mode: CommitMode) -> Result<Arc<Backend>> {
    config.validate()?;
    Ok(Arc::new(Backend::new(config, clock, mode)))
}

/// Cycle-based store for data-collection jobs.
#[derive(Debug, Clone)]
pub struct CollectorStore {
    backend: Arc<Backend>,
}

impl CollectorStore {
    /// Creates a store with the default configuration and the system clock.
    pub fn new() -> Self {
        Self {
            backend: Arc::new(Backend::new(
                StoreConfig::default(),
                Arc::new(SystemClock),
                CommitMode::Cycled,
            )),
        }
    }

    /// Creates a store with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`](crate::ConfigError) if the configuration is invalid.
    pub fn with_config(config: StoreConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a store with the given configuration and time source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`](crate::ConfigError) if the configuration is invalid.
    pub fn with_clock(config: StoreConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            backend: backend(config, clock, CommitMode::Cycled)?,
        })
    }

    /// Meter factory for collectors.
    pub fn write(&self) -> Writer {
        Writer::new(Arc::clone(&self.backend))
    }

    /// Controller driving this store's cycles.
    pub fn cycle_controller(&self) -> CycleController {
        CycleController::new(Arc::clone(&self.backend))
    }

    /// A reader pinned to the state committed so far.
    pub fn read(&self, opts: ReadOptions) -> Reader {
        Reader::new(self.backend.snapshot(), opts.is_raw())
    }

    /// Counters describing the store itself.
    pub fn stats(&self) -> StoreStats {
        self.backend.stats()
    }

    /// The configuration the store was built with.
    pub fn config(&self) -> &StoreConfig {
        self.backend.config()
    }
}

impl Default for CollectorStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Cycle-less store; every write is visible as soon as it returns.
#[derive(Debug, Clone)]
pub struct RuntimeStore {
    backend: Arc<Backend>,
}

impl RuntimeStore {
    /// Creates a store with the default configuration and the system clock.
    pub fn new() -> Self {
        Self {
            backend: Arc::new(Backend::new(
                StoreConfig::default(),
                Arc::new(SystemClock),
                CommitMode::Immediate,
            )),
        }
    }

    /// Creates a store with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`](crate::ConfigError) if the configuration is invalid.
    pub fn with_config(config: StoreConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a store with the given configuration and time source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`](crate::ConfigError) if the configuration is invalid.
    pub fn with_clock(config: StoreConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            backend: backend(config, clock, CommitMode::Immediate)?,
        })
    }

    /// Meter factory. Only stateful meters are available.
    pub fn write(&self) -> RuntimeWriter {
        RuntimeWriter::new(Arc::clone(&self.backend))
    }

    /// A reader pinned to the state committed so far.
    ///
    /// Every series is written by its own cycle, so filtered visibility
    /// would only ever show the last write; both options return the raw
    /// view.
    pub fn read(&self, _opts: ReadOptions) -> Reader {
        debug_assert_eq!(self.backend.mode(), CommitMode::Immediate);
        Reader::new(self.backend.snapshot(), true)
    }

    /// Counters describing the store itself.
    pub fn stats(&self) -> StoreStats {
        self.backend.stats()
    }

    /// The configuration the store was built with.
    pub fn config(&self) -> &StoreConfig {
        self.backend.config()
    }
}

impl Default for RuntimeStore {
    fn default() -> Self {
        Self::new()
    }
}
