//! Packet tunnel provider with per-app split tunneling
//!
//! Runs inside the tunnel extension. Takes split-tunnel settings from the
//! startup options and from control messages sent by the host app, keeps
//! them in a [`pt_policy::PolicyStore`], and pushes every change to the
//! tunnel engine and the platform VPN configuration.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    Tunnel Extension                       │
//! │                                                           │
//! │  host app ──▶ ┌────────────┐    ┌──────────────┐          │
//! │  (messages)   │ Dispatcher │───▶│ PolicyStore  │          │
//! │               └─────┬──────┘    └──────────────┘          │
//! │                     │                                     │
//! │                     ▼                                     │
//! │              ┌──────────────┐   ┌──────────────────────┐  │
//! │              │Reconfigurator│──▶│ platform VPN config  │  │
//! │              └──────┬───────┘   └──────────────────────┘  │
//! │                     ▼                                     │
//! │              ┌──────────────┐  deltas  ┌──────────────┐   │
//! │              │ TunnelEngine │─────────▶│  collector   │   │
//! │              └──────────────┘          └──────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Features
//!
//! - **Include / exclude routing**: per-app decisions from one snapshot
//! - **Serialized reloads**: one engine reload at a time, bounded by a timeout
//! - **Best-effort platform sync**: capability-gated, validated as a batch
//! - **Traffic counters**: fed by a dedicated collector thread

mod config;
mod dispatcher;
mod engine;
mod options;
mod platform;
mod protocol;
mod reconfigure;
mod session;
mod traffic;

pub use config::{ProviderConfig, ConfigFormat, ConfigError};
pub use dispatcher::Dispatcher;
pub use engine::{TunnelEngine, EngineError, SimulatedEngine};
pub use options::{
    StartupOptions, SplitTunnelRequest, PER_APP_PROXY_ENABLED, PER_APP_PROXY_MODE,
    PER_APP_PROXY_LIST, PROXY_LIST_SEPARATOR,
};
pub use platform::{
    AppBoundId, ProtocolSettings, PlatformVpnConfig, ProtocolConfiguration,
    PlatformCapabilities, StaticCapabilities, PlatformVersion, PlatformError,
    apply_policy, reset_app_routing, MIN_PER_APP_ROUTING_MAJOR,
};
pub use protocol::{ControlMessage, Reply, MessageError, ENABLE_LIST_SEPARATOR};
pub use reconfigure::Reconfigurator;
pub use session::{TunnelSession, SessionState, SessionError};
pub use traffic::{TrafficDelta, TrafficSnapshot, TrafficCounters, spawn_collector};
