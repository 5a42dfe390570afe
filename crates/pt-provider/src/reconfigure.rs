//! Reconfiguration Sequence
//!
//! After a policy change the session:
//!
//! 1. Reloads the engine and waits for it (bounded by the reload timeout)
//! 2. Writes the current policy into the platform configuration
//! 3. Logs the outcome
//!
//! A failed reload is returned to the caller, since the new policy may not
//! be live. A failed platform write is logged and swallowed; routing then
//! degrades to the platform's previous (or default all-routed) behavior.
//!
//! Sequences are serialized per session: the platform configuration lives
//! behind an async mutex that is held for the whole sequence, so a second
//! request waits for the first to finish instead of interleaving with it.

use crate::engine::{EngineError, TunnelEngine};
use crate::platform::{
    self, PlatformCapabilities, PlatformError, PlatformVpnConfig, ProtocolSettings,
};
use pt_policy::PolicyStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Runs reconfiguration sequences for one session
pub struct Reconfigurator {
    engine: Arc<dyn TunnelEngine>,
    /// `None` when the host did not hand over a tunnel-provider configuration
    platform: Mutex<Option<Box<dyn PlatformVpnConfig>>>,
    capabilities: Arc<dyn PlatformCapabilities>,
    reload_timeout: Duration,
}

impl Reconfigurator {
    pub fn new(
        engine: Arc<dyn TunnelEngine>,
        platform: Option<Box<dyn PlatformVpnConfig>>,
        capabilities: Arc<dyn PlatformCapabilities>,
        reload_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            platform: Mutex::new(platform),
            capabilities,
            reload_timeout,
        }
    }

    /// Reload the engine, then push the store's current policy to the platform
    pub async fn reconfigure(&self, policy: &PolicyStore) -> Result<(), EngineError> {
        let mut platform = self.platform.lock().await;

        let requested = policy.snapshot();
        info!(
            "Updating split tunneling configuration: mode={}, apps={}",
            requested.mode(),
            requested.apps().len()
        );

        match tokio::time::timeout(self.reload_timeout, self.engine.reload()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Engine reload failed: {}", e);
                return Err(e);
            }
            Err(_) => {
                error!("Engine reload timed out after {:?}", self.reload_timeout);
                return Err(EngineError::Timeout(self.reload_timeout));
            }
        }

        // Re-read: a later update may have landed while the engine reloaded
        let current = policy.snapshot();
        let result = match platform.as_deref_mut() {
            Some(config) => platform::apply_policy(config, self.capabilities.as_ref(), &current),
            None => Err(PlatformError::NotTunnelProvider),
        };

        match result {
            Ok(()) => info!("Successfully updated split tunneling configuration"),
            Err(e) => warn!("Failed to update split tunneling configuration: {}", e),
        }
        Ok(())
    }

    /// Clear per-app routing on the platform without touching the engine
    pub async fn reset(&self) -> Result<(), PlatformError> {
        let mut platform = self.platform.lock().await;
        match platform.as_deref_mut() {
            Some(config) => platform::reset_app_routing(config, self.capabilities.as_ref()),
            None => Err(PlatformError::NotTunnelProvider),
        }
    }

    /// Current platform per-app settings, if a configuration is attached
    pub async fn platform_settings(&self) -> Option<ProtocolSettings> {
        self.platform.lock().await.as_ref().map(|config| config.settings())
    }
}
