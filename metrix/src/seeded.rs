//! Instruments that exist with a committed zero from the moment they are declared.
//!
//! Useful for operational metrics that should be charted before anything
//! happens (error counters, queue depths). On a [`RuntimeStore`](crate::RuntimeStore)
//! the zero is visible immediately; on a [`CollectorStore`](crate::CollectorStore)
//! the seed is recorded only if a cycle is open.

use crate::error::Result;
use crate::meter::{InstrumentOption, StatefulCounter, StatefulGauge, StatefulMeter};

/// Declares a stateful gauge and sets it to zero.
///
/// # Errors
///
/// See [`StatefulMeter::gauge`].
pub fn seeded_gauge(
    meter: &StatefulMeter,
    name: &str,
    opts: &[InstrumentOption],
) -> Result<StatefulGauge> {
    let gauge = meter.gauge(name, opts)?;
    gauge.set(0.0);
    Ok(gauge)
}

/// Declares a stateful counter and adds zero to it.
///
/// The series becomes visible with value zero. Having no previous sample,
/// it reports no delta until the next increment.
///
/// # Errors
///
/// See [`StatefulMeter::counter`].
pub fn seeded_counter(
    meter: &StatefulMeter,
    name: &str,
    opts: &[InstrumentOption],
) -> Result<StatefulCounter> {
    let counter = meter.counter(name, opts)?;
    counter.add(0.0);
    Ok(counter)
}
