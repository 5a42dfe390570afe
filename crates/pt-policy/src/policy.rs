//! Routing mode and policy value

use crate::app_id::{AppId, collect_apps};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Split-tunnel mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Everything goes through the tunnel
    #[default]
    Disabled,
    /// Only listed apps go through the tunnel
    Include,
    /// Everything except listed apps goes through the tunnel
    Exclude,
}

impl RoutingMode {
    /// Check if per-app routing is in effect
    pub fn is_split(&self) -> bool {
        !matches!(self, RoutingMode::Disabled)
    }

    /// Lowercase name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            RoutingMode::Disabled => "disabled",
            RoutingMode::Include => "include",
            RoutingMode::Exclude => "exclude",
        }
    }
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A mode together with the apps it applies to.
///
/// With `Disabled`, `apps` is always empty: the store never keeps a stale
/// list behind a disabled mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitTunnelPolicy {
    mode: RoutingMode,
    apps: BTreeSet<AppId>,
}

impl SplitTunnelPolicy {
    /// Build a policy from raw entries (trimmed, blanks dropped, deduplicated)
    pub fn new<I, S>(mode: RoutingMode, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let apps = match mode {
            RoutingMode::Disabled => BTreeSet::new(),
            RoutingMode::Include | RoutingMode::Exclude => collect_apps(entries),
        };
        Self { mode, apps }
    }

    /// Default all-routed policy
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Current mode
    pub fn mode(&self) -> RoutingMode {
        self.mode
    }

    /// Apps the mode applies to
    pub fn apps(&self) -> &BTreeSet<AppId> {
        &self.apps
    }

    /// Decide whether an app's traffic goes through the tunnel
    pub fn is_routed(&self, app: &str) -> bool {
        let listed = self.apps.contains(app.trim());
        match (self.mode, listed) {
            (RoutingMode::Disabled, _) => true,
            (RoutingMode::Include, listed) => listed,
            (RoutingMode::Exclude, listed) => !listed,
        }
    }
}
