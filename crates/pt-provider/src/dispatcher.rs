//! Control Channel Dispatcher
//!
//! Turns startup options and control messages into policy-store updates
//! and queries, and runs the reconfiguration sequence after updates that
//! must reach the live tunnel.

use crate::engine::EngineError;
use crate::options::StartupOptions;
use crate::protocol::{ControlMessage, Reply};
use crate::reconfigure::Reconfigurator;
use crate::traffic::TrafficCounters;
use pt_policy::{PolicyStore, RoutingMode};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Entry point for host stimuli during a session
pub struct Dispatcher {
    policy: Arc<PolicyStore>,
    traffic: Arc<TrafficCounters>,
    reconfigurator: Arc<Reconfigurator>,
}

impl Dispatcher {
    pub fn new(
        policy: Arc<PolicyStore>,
        traffic: Arc<TrafficCounters>,
        reconfigurator: Arc<Reconfigurator>,
    ) -> Self {
        Self {
            policy,
            traffic,
            reconfigurator,
        }
    }

    /// Apply the split-tunnel part of the startup options.
    ///
    /// Only an engine failure is reported; the options themselves cannot be
    /// rejected.
    pub async fn apply_startup_options(&self, options: &StartupOptions) -> Result<(), EngineError> {
        let Some(request) = options.split_tunnel_request() else {
            return Ok(());
        };

        info!(
            "Startup split tunneling: mode={}, apps={}",
            request.mode,
            request.apps.len()
        );
        self.policy.set_policy(request.mode, &request.apps);
        self.reconfigurator.reconfigure(&self.policy).await
    }

    /// Handle a raw control message.
    ///
    /// `None` means no reply: the message was not understood, or the engine
    /// failed and the change cannot be confirmed.
    pub async fn handle_message(&self, data: &[u8]) -> Option<Vec<u8>> {
        let message = match ControlMessage::parse(data) {
            Ok(message) => message,
            Err(e) => {
                debug!("Ignoring control message: {}", e);
                return None;
            }
        };

        match self.dispatch(message).await {
            Ok(reply) => Some(reply.to_bytes()),
            Err(e) => {
                error!("Control command failed: {}", e);
                None
            }
        }
    }

    /// Execute a parsed control message
    pub async fn dispatch(&self, message: ControlMessage) -> Result<Reply, EngineError> {
        match message {
            ControlMessage::Stats => Ok(Reply::Stats(self.traffic.snapshot())),

            ControlMessage::EnableSplitTunnel { apps } => {
                info!("Enabling split tunneling for {} apps", apps.len());
                self.policy.set_policy(RoutingMode::Include, &apps);
                self.reconfigurator.reconfigure(&self.policy).await?;
                Ok(Reply::Ok)
            }

            ControlMessage::DisableSplitTunnel => {
                info!("Disabling split tunneling");
                self.policy.clear();
                if let Err(e) = self.reconfigurator.reset().await {
                    warn!("Failed to reset app-based routing: {}", e);
                }
                Ok(Reply::Ok)
            }

            ControlMessage::IsRouted { app } => Ok(Reply::Routed(self.policy.is_routed(&app))),
        }
    }
}
