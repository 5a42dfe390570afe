//! Platform VPN configuration
//!
//! Per-app routing is ultimately enforced by the host platform through the
//! tunnel-provider protocol configuration: an "included apps" list, an
//! "excluded apps" list and an "include all networks" flag. This module
//! maps a [`SplitTunnelPolicy`] onto that configuration.
//!
//! # Mapping
//!
//! | Policy     | Effect |
//! |------------|--------|
//! | `Include`  | included ← apps, include-all-networks cleared |
//! | `Exclude`  | excluded ← apps |
//! | `Disabled` | included and excluded cleared |
//!
//! Identifiers are validated as a batch first. One bad identifier abandons
//! the whole call and leaves the configuration as it was.

use pt_policy::{AppId, RoutingMode, SplitTunnelPolicy};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Oldest platform major version with per-app routing
pub const MIN_PER_APP_ROUTING_MAJOR: u32 = 15;

/// Bundle identifier accepted by the platform
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppBoundId(String);

impl AppBoundId {
    /// Validate a bundle identifier: non-empty ASCII letters, digits, `-` and `.`
    pub fn parse(raw: &str) -> Result<Self, PlatformError> {
        let valid = !raw.is_empty()
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.');

        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(PlatformError::Validation(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppBoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of the per-app fields of a protocol configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolSettings {
    pub included_app_ids: Vec<AppBoundId>,
    pub excluded_app_ids: Vec<AppBoundId>,
    pub include_all_networks: bool,
}

/// Host-owned tunnel-provider protocol configuration
pub trait PlatformVpnConfig: Send {
    /// Current per-app fields
    fn settings(&self) -> ProtocolSettings;

    fn set_included_app_ids(&mut self, ids: Vec<AppBoundId>);

    fn set_excluded_app_ids(&mut self, ids: Vec<AppBoundId>);

    fn set_include_all_networks(&mut self, enabled: bool);

    /// Turn an app identifier into a platform identifier
    fn validate(&self, app: &AppId) -> Result<AppBoundId, PlatformError> {
        AppBoundId::parse(app.as_str())
    }
}

/// In-memory protocol configuration.
///
/// Stands in for the host object in the harness and in tests.
#[derive(Debug, Clone, Default)]
pub struct ProtocolConfiguration {
    settings: ProtocolSettings,
}

impl ProtocolConfiguration {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlatformVpnConfig for ProtocolConfiguration {
    fn settings(&self) -> ProtocolSettings {
        self.settings.clone()
    }

    fn set_included_app_ids(&mut self, ids: Vec<AppBoundId>) {
        self.settings.included_app_ids = ids;
    }

    fn set_excluded_app_ids(&mut self, ids: Vec<AppBoundId>) {
        self.settings.excluded_app_ids = ids;
    }

    fn set_include_all_networks(&mut self, enabled: bool) {
        self.settings.include_all_networks = enabled;
    }
}

/// Capability probe for the running platform
pub trait PlatformCapabilities: Send + Sync {
    fn supports_per_app_routing(&self) -> bool;
}

/// Capability probe with a fixed answer
#[derive(Debug, Clone, Copy)]
pub struct StaticCapabilities {
    pub per_app_routing: bool,
}

impl StaticCapabilities {
    pub fn new(per_app_routing: bool) -> Self {
        Self { per_app_routing }
    }
}

impl PlatformCapabilities for StaticCapabilities {
    fn supports_per_app_routing(&self) -> bool {
        self.per_app_routing
    }
}

/// Platform OS version (`major.minor`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PlatformVersion {
    pub major: u32,
    pub minor: u32,
}

impl PlatformVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for PlatformVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for PlatformVersion {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PlatformError::InvalidVersion(s.to_string());
        let mut parts = s.trim().split('.');

        let major = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let minor = match parts.next() {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => 0,
        };

        Ok(Self { major, minor })
    }
}

impl PlatformCapabilities for PlatformVersion {
    fn supports_per_app_routing(&self) -> bool {
        self.major >= MIN_PER_APP_ROUTING_MAJOR
    }
}

/// Platform configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("Invalid app identifier: {0:?}")]
    Validation(String),

    #[error("Platform does not support per-app routing")]
    Unsupported,

    #[error("No tunnel-provider protocol configuration")]
    NotTunnelProvider,

    #[error("Invalid platform version: {0:?}")]
    InvalidVersion(String),
}

/// Validate every app, failing on the first bad one
fn validate_batch(
    config: &dyn PlatformVpnConfig,
    policy: &SplitTunnelPolicy,
) -> Result<Vec<AppBoundId>, PlatformError> {
    policy.apps().iter().map(|app| config.validate(app)).collect()
}

/// Write a policy into the protocol configuration.
///
/// Exclude mode writes only the excluded list: an included list left by an
/// earlier Include stays on the configuration until a reset or Disabled
/// policy clears it.
pub fn apply_policy(
    config: &mut dyn PlatformVpnConfig,
    capabilities: &dyn PlatformCapabilities,
    policy: &SplitTunnelPolicy,
) -> Result<(), PlatformError> {
    info!(
        "Setting up app-based routing for {} apps in {} mode",
        policy.apps().len(),
        policy.mode()
    );

    match policy.mode() {
        RoutingMode::Disabled => reset_app_routing(config, capabilities),
        RoutingMode::Include => {
            if !capabilities.supports_per_app_routing() {
                return Err(PlatformError::Unsupported);
            }
            let ids = validate_batch(config, policy)?;
            let count = ids.len();
            config.set_include_all_networks(false);
            config.set_included_app_ids(ids);
            debug!("Set {} included app IDs", count);
            Ok(())
        }
        RoutingMode::Exclude => {
            if !capabilities.supports_per_app_routing() {
                return Err(PlatformError::Unsupported);
            }
            let ids = validate_batch(config, policy)?;
            let count = ids.len();
            config.set_excluded_app_ids(ids);
            debug!("Set {} excluded app IDs", count);
            Ok(())
        }
    }
}

/// Clear both per-app lists
pub fn reset_app_routing(
    config: &mut dyn PlatformVpnConfig,
    capabilities: &dyn PlatformCapabilities,
) -> Result<(), PlatformError> {
    info!("Resetting app-based routing to default");

    if !capabilities.supports_per_app_routing() {
        warn!("Cannot reset app routing: platform lacks per-app routing");
        return Err(PlatformError::Unsupported);
    }
    config.set_included_app_ids(Vec::new());
    config.set_excluded_app_ids(Vec::new());
    Ok(())
}
