//! Startup options
//!
//! The host passes a string map when it starts the tunnel. Three keys
//! configure split tunneling:
//!
//! - `PerAppProxyEnabled`: `yes` / `true` (any case) turns it on
//! - `PerAppProxyMode`: `include` (any case) selects include mode, anything
//!   else exclude mode
//! - `PerAppProxyList`: comma-separated app identifiers

use pt_policy::{AppId, RoutingMode, parse_app_list};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

pub const PER_APP_PROXY_ENABLED: &str = "PerAppProxyEnabled";
pub const PER_APP_PROXY_MODE: &str = "PerAppProxyMode";
pub const PER_APP_PROXY_LIST: &str = "PerAppProxyList";

/// Separator between apps in `PerAppProxyList`
pub const PROXY_LIST_SEPARATOR: char = ',';

/// Options map delivered with tunnel start
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StartupOptions(BTreeMap<String, String>);

impl StartupOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check if the options turn split tunneling on
    pub fn split_tunnel_enabled(&self) -> bool {
        self.get(PER_APP_PROXY_ENABLED)
            .map(|v| v.eq_ignore_ascii_case("yes") || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// Mode requested by the options (exclude unless `include` is given)
    pub fn routing_mode(&self) -> RoutingMode {
        match self.get(PER_APP_PROXY_MODE) {
            Some(mode) if mode.eq_ignore_ascii_case("include") => RoutingMode::Include,
            _ => RoutingMode::Exclude,
        }
    }

    /// Policy the options ask for, if any.
    ///
    /// `None` when split tunneling is off, or on without an app list; the
    /// session then keeps its default all-routed policy.
    pub fn split_tunnel_request(&self) -> Option<SplitTunnelRequest> {
        if !self.split_tunnel_enabled() {
            debug!("Per-app proxy disabled in startup options");
            return None;
        }

        let Some(list) = self.get(PER_APP_PROXY_LIST) else {
            info!("Per-app proxy enabled without {}, keeping default routing", PER_APP_PROXY_LIST);
            return None;
        };

        Some(SplitTunnelRequest {
            mode: self.routing_mode(),
            apps: parse_app_list(list, PROXY_LIST_SEPARATOR),
        })
    }
}

impl<K, V> FromIterator<(K, V)> for StartupOptions
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Split-tunnel policy requested at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitTunnelRequest {
    pub mode: RoutingMode,
    pub apps: BTreeSet<AppId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enabled_values() {
        for value in ["yes", "YES", "True", "true"] {
            let options = StartupOptions::from_iter([(PER_APP_PROXY_ENABLED, value)]);
            assert!(options.split_tunnel_enabled(), "{value}");
        }
        for value in ["no", "1", "", "enabled"] {
            let options = StartupOptions::from_iter([(PER_APP_PROXY_ENABLED, value)]);
            assert!(!options.split_tunnel_enabled(), "{value}");
        }
        assert!(!StartupOptions::new().split_tunnel_enabled());
    }

    #[test]
    fn test_mode_defaults_to_exclude() {
        let options = StartupOptions::new();
        assert_eq!(options.routing_mode(), RoutingMode::Exclude);

        let options = StartupOptions::from_iter([(PER_APP_PROXY_MODE, "INCLUDE")]);
        assert_eq!(options.routing_mode(), RoutingMode::Include);

        let options = StartupOptions::from_iter([(PER_APP_PROXY_MODE, "bogus")]);
        assert_eq!(options.routing_mode(), RoutingMode::Exclude);
    }

    #[test]
    fn test_request_include() {
        let options = StartupOptions::from_iter([
            (PER_APP_PROXY_ENABLED, "YES"),
            (PER_APP_PROXY_MODE, "include"),
            (PER_APP_PROXY_LIST, "com.a, com.b"),
        ]);

        let request = options.split_tunnel_request().unwrap();
        assert_eq!(request.mode, RoutingMode::Include);
        let names: Vec<&str> = request.apps.iter().map(AppId::as_str).collect();
        assert_eq!(names, ["com.a", "com.b"]);
    }

    #[test]
    fn test_disabled_skips_other_keys() {
        let options = StartupOptions::from_iter([
            (PER_APP_PROXY_ENABLED, "no"),
            (PER_APP_PROXY_MODE, "include"),
            (PER_APP_PROXY_LIST, "com.a"),
        ]);
        assert!(options.split_tunnel_request().is_none());
    }

    #[test]
    fn test_enabled_without_list() {
        let options = StartupOptions::from_iter([(PER_APP_PROXY_ENABLED, "true")]);
        assert!(options.split_tunnel_request().is_none());
    }

    #[test]
    fn test_enabled_with_empty_list() {
        let options = StartupOptions::from_iter([
            (PER_APP_PROXY_ENABLED, "true"),
            (PER_APP_PROXY_LIST, " , "),
        ]);

        let request = options.split_tunnel_request().unwrap();
        assert_eq!(request.mode, RoutingMode::Exclude);
        assert!(request.apps.is_empty());
    }

    #[test]
    fn test_deserialize_from_json() {
        let options: StartupOptions = serde_json::from_str(
            r#"{"PerAppProxyEnabled": "yes", "PerAppProxyList": "com.a"}"#,
        )
        .unwrap();
        assert_eq!(options.get(PER_APP_PROXY_LIST), Some("com.a"));
        assert!(options.split_tunnel_enabled());
    }
}
