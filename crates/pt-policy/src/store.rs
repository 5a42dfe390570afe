//! Policy Store
//!
//! Single source of truth for split-tunnel decisions within one tunnel
//! session. Updates build a complete new [`SplitTunnelPolicy`] and swap it
//! in under the write lock; readers clone the `Arc` and answer from that
//! snapshot, so a query never mixes an old mode with a new app set.

use crate::policy::{RoutingMode, SplitTunnelPolicy};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Current policy plus the number of updates applied so far
struct Slot {
    policy: Arc<SplitTunnelPolicy>,
    revision: u64,
}

/// Thread-safe holder of the active split-tunnel policy
pub struct PolicyStore {
    slot: RwLock<Slot>,
}

impl PolicyStore {
    /// Create a store in `Disabled` mode
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(Slot {
                policy: Arc::new(SplitTunnelPolicy::disabled()),
                revision: 0,
            }),
        }
    }

    /// Replace mode and apps in one step.
    ///
    /// Entries are trimmed, blanks dropped and duplicates merged. Returns the
    /// snapshot that was installed.
    pub fn set_policy<I, S>(&self, mode: RoutingMode, entries: I) -> Arc<SplitTunnelPolicy>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let policy = Arc::new(SplitTunnelPolicy::new(mode, entries));

        let revision = {
            // A panicking writer can only have left a whole snapshot behind.
            let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
            slot.policy = Arc::clone(&policy);
            slot.revision += 1;
            slot.revision
        };

        info!(
            "Split tunnel policy r{}: mode={}, apps={}",
            revision,
            policy.mode(),
            policy.apps().len()
        );
        policy
    }

    /// Reset to the default all-routed policy
    pub fn clear(&self) -> Arc<SplitTunnelPolicy> {
        self.set_policy(RoutingMode::Disabled, std::iter::empty::<&str>())
    }

    /// Check if an app's traffic goes through the tunnel
    pub fn is_routed(&self, app: &str) -> bool {
        let routed = self.snapshot().is_routed(app);
        debug!("Routing query for {}: {}", app, routed);
        routed
    }

    /// Current policy
    pub fn snapshot(&self) -> Arc<SplitTunnelPolicy> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&slot.policy)
    }

    /// Current mode
    pub fn mode(&self) -> RoutingMode {
        self.snapshot().mode()
    }

    /// Number of updates applied since creation
    pub fn revision(&self) -> u64 {
        self.slot.read().unwrap_or_else(PoisonError::into_inner).revision
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}
