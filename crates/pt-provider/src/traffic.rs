//! Traffic accounting
//!
//! The engine reports byte deltas over a channel; a dedicated collector
//! thread folds them into the session's [`TrafficCounters`]. The `stats`
//! control message reads the same counters.

use crossbeam_channel::Receiver;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tracing::{debug, info};

/// Bytes moved since the previous notification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficDelta {
    pub up: u64,
    pub down: u64,
}

impl TrafficDelta {
    pub fn new(up: u64, down: u64) -> Self {
        Self { up, down }
    }
}

/// Cumulative totals for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficSnapshot {
    /// Bytes sent through the tunnel
    pub upload: u64,
    /// Bytes received through the tunnel
    pub download: u64,
}

/// Renders as `<upload>,<download>`, the `stats` reply format.
impl fmt::Display for TrafficSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.upload, self.download)
    }
}

/// Session byte counters.
///
/// Totals only grow during a session; [`reset`](Self::reset) is reserved for
/// session start.
#[derive(Debug, Default)]
pub struct TrafficCounters {
    totals: Mutex<TrafficSnapshot>,
}

impl TrafficCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a delta to the totals
    pub fn record(&self, delta: TrafficDelta) {
        let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        totals.upload = totals.upload.saturating_add(delta.up);
        totals.download = totals.download.saturating_add(delta.down);
    }

    /// Read both totals under the same lock
    pub fn snapshot(&self) -> TrafficSnapshot {
        *self.totals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Zero the totals
    pub fn reset(&self) {
        *self.totals.lock().unwrap_or_else(PoisonError::into_inner) = TrafficSnapshot::default();
    }
}

/// Spawn the collector thread.
///
/// Runs until every sender for `rx` has been dropped.
pub fn spawn_collector(
    counters: Arc<TrafficCounters>,
    rx: Receiver<TrafficDelta>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("traffic-collector".to_string())
        .spawn(move || {
            debug!("Traffic collector started");
            for delta in rx.iter() {
                counters.record(delta);
            }
            info!("Traffic collector stopped at {}", counters.snapshot());
        })
}
