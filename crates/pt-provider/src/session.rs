//! Tunnel Session
//!
//! Owns everything that lives for one run of the tunnel: the policy store,
//! the traffic counters and collector, the engine handle and the platform
//! configuration. The host drives it through three calls.
//!
//! # Usage
//!
//! ```rust,ignore
//! let session = TunnelSession::new(engine, Some(platform), capabilities, timeout);
//! session.start(&options).await?;
//!
//! // Control channel
//! let reply = session.handle_app_message(b"split_tunnel:is_routed:com.example").await;
//!
//! session.stop().await;
//! ```

use crate::config::{ConfigError, ProviderConfig};
use crate::dispatcher::Dispatcher;
use crate::engine::{EngineError, TunnelEngine};
use crate::options::StartupOptions;
use crate::platform::{
    PlatformCapabilities, PlatformVpnConfig, ProtocolConfiguration, ProtocolSettings,
};
use crate::protocol::ControlMessage;
use crate::reconfigure::Reconfigurator;
use crate::traffic::{self, TrafficCounters, TrafficSnapshot};
use pt_policy::{PolicyStore, SplitTunnelPolicy};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not started, or stopped
    Stopped,
    /// Engine coming up, startup options being applied
    Starting,
    /// Serving control messages
    Running,
    /// Start failed
    Failed,
}

impl SessionState {
    /// Check if the session serves control messages
    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Running)
    }

    /// Check if a start is underway or done
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Running)
    }
}

/// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session already running")]
    AlreadyRunning,

    #[error("Session not running")]
    NotRunning,

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to spawn traffic collector: {0}")]
    Collector(#[from] std::io::Error),
}

/// One run of the tunnel, from start to stop
pub struct TunnelSession {
    engine: Arc<dyn TunnelEngine>,
    policy: Arc<PolicyStore>,
    traffic: Arc<TrafficCounters>,
    reconfigurator: Arc<Reconfigurator>,
    dispatcher: Dispatcher,
    state: RwLock<SessionState>,
    /// Held for the whole of `start` and `stop`
    lifecycle: Mutex<()>,
    collector: Mutex<Option<JoinHandle<()>>>,
    started_at: RwLock<Option<Instant>>,
}

impl TunnelSession {
    /// Create a stopped session.
    ///
    /// `platform` is `None` when the host has no tunnel-provider protocol
    /// configuration; platform updates are then skipped and logged.
    pub fn new(
        engine: Arc<dyn TunnelEngine>,
        platform: Option<Box<dyn PlatformVpnConfig>>,
        capabilities: Arc<dyn PlatformCapabilities>,
        reload_timeout: Duration,
    ) -> Self {
        let policy = Arc::new(PolicyStore::new());
        let traffic = Arc::new(TrafficCounters::new());
        let reconfigurator = Arc::new(Reconfigurator::new(
            Arc::clone(&engine),
            platform,
            capabilities,
            reload_timeout,
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&policy),
            Arc::clone(&traffic),
            Arc::clone(&reconfigurator),
        );

        Self {
            engine,
            policy,
            traffic,
            reconfigurator,
            dispatcher,
            state: RwLock::new(SessionState::Stopped),
            lifecycle: Mutex::new(()),
            collector: Mutex::new(None),
            started_at: RwLock::new(None),
        }
    }

    /// Create a session from a provider config with an in-memory platform
    /// configuration
    pub fn from_config(
        engine: Arc<dyn TunnelEngine>,
        config: &ProviderConfig,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self::new(
            engine,
            Some(Box::new(ProtocolConfiguration::new())),
            config.capabilities()?,
            config.reload_timeout(),
        ))
    }

    /// Get current state
    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Check if the session is running
    pub async fn is_running(&self) -> bool {
        self.state().await.is_running()
    }

    /// Start the session.
    ///
    /// Resets counters and policy, brings the engine up and applies the
    /// split-tunnel startup options. An engine failure leaves the session
    /// `Failed` with the engine stopped. A concurrent `stop` waits for the
    /// start to finish.
    pub async fn start(&self, options: &StartupOptions) -> Result<(), SessionError> {
        let _lifecycle = self.lifecycle.lock().await;
        {
            let mut state = self.state.write().await;
            if state.is_active() {
                return Err(SessionError::AlreadyRunning);
            }
            *state = SessionState::Starting;
        }
        info!("Starting tunnel session");

        self.traffic.reset();
        self.policy.clear();

        let (tx, rx) = crossbeam_channel::unbounded();
        let collector = match traffic::spawn_collector(Arc::clone(&self.traffic), rx) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Traffic collector failed to start: {}", e);
                *self.state.write().await = SessionState::Failed;
                return Err(SessionError::Collector(e));
            }
        };
        *self.collector.lock().await = Some(collector);

        if let Err(e) = self.engine.start(tx).await {
            error!("Engine failed to start: {}", e);
            // The engine may have kept the sender before failing
            self.engine.stop().await;
            self.fail().await;
            return Err(e.into());
        }

        if let Err(e) = self.dispatcher.apply_startup_options(options).await {
            error!("Startup split tunneling failed: {}", e);
            self.engine.stop().await;
            self.fail().await;
            return Err(e.into());
        }

        *self.started_at.write().await = Some(Instant::now());
        *self.state.write().await = SessionState::Running;
        info!("Tunnel session running ({})", self.status().await);
        Ok(())
    }

    /// Stop the session and discard its policy
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        {
            let mut state = self.state.write().await;
            if *state == SessionState::Stopped {
                debug!("Tunnel session already stopped");
                return;
            }
            *state = SessionState::Stopped;
        }
        info!("Stopping tunnel session");

        self.engine.stop().await;
        self.policy.clear();
        self.join_collector().await;
        *self.started_at.write().await = None;

        info!("Tunnel session stopped at {}", self.traffic.snapshot());
    }

    /// Handle a control message from the host app.
    ///
    /// Returns the reply bytes, or `None` when there is nothing to reply.
    /// While the session is starting only `stats` and `is_routed` are
    /// answered; a stopped or failed session answers nothing.
    pub async fn handle_app_message(&self, data: &[u8]) -> Option<Vec<u8>> {
        match self.state().await {
            SessionState::Running => self.dispatcher.handle_message(data).await,
            SessionState::Starting => self.handle_query(data).await,
            SessionState::Stopped | SessionState::Failed => {
                warn!("Control message received while session is not running");
                None
            }
        }
    }

    async fn handle_query(&self, data: &[u8]) -> Option<Vec<u8>> {
        match ControlMessage::parse(data) {
            Ok(message @ (ControlMessage::Stats | ControlMessage::IsRouted { .. })) => self
                .dispatcher
                .dispatch(message)
                .await
                .ok()
                .map(|reply| reply.to_bytes()),
            Ok(_) => {
                warn!("Policy change received while session is starting");
                None
            }
            Err(e) => {
                debug!("Ignoring control message: {}", e);
                None
            }
        }
    }

    /// Check if an app's traffic goes through the tunnel
    pub fn is_routed(&self, app: &str) -> bool {
        self.policy.is_routed(app)
    }

    /// Current split-tunnel policy
    pub fn policy(&self) -> Arc<SplitTunnelPolicy> {
        self.policy.snapshot()
    }

    /// Current traffic totals
    pub fn traffic(&self) -> TrafficSnapshot {
        self.traffic.snapshot()
    }

    /// Shared counters, for an external traffic source
    pub fn traffic_counters(&self) -> Arc<TrafficCounters> {
        Arc::clone(&self.traffic)
    }

    /// Per-app fields of the platform configuration
    pub async fn platform_settings(&self) -> Option<ProtocolSettings> {
        self.reconfigurator.platform_settings().await
    }

    /// Time since the session started running
    pub async fn uptime(&self) -> Option<Duration> {
        self.started_at.read().await.map(|t| t.elapsed())
    }

    /// Format status for display
    pub async fn status(&self) -> String {
        let state = self.state().await;
        let policy = self.policy.snapshot();

        format!(
            "Session: {:?} | Split tunnel: {} ({} apps) | Traffic: {}",
            state,
            policy.mode(),
            policy.apps().len(),
            self.traffic.snapshot()
        )
    }

    async fn fail(&self) {
        *self.state.write().await = SessionState::Failed;
        self.join_collector().await;
    }

    /// Wait for the collector thread once the engine has dropped its sender
    async fn join_collector(&self) {
        let Some(handle) = self.collector.lock().await.take() else {
            return;
        };

        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(())) => debug!("Traffic collector joined"),
            Ok(Err(_)) => warn!("Traffic collector panicked"),
            Err(e) => warn!("Failed to join traffic collector: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SimulatedEngine;
    use crate::platform::StaticCapabilities;
    use pt_policy::RoutingMode;

    fn session_with(engine: &Arc<SimulatedEngine>) -> TunnelSession {
        TunnelSession::new(
            Arc::clone(engine) as Arc<dyn TunnelEngine>,
            Some(Box::new(ProtocolConfiguration::new())),
            Arc::new(StaticCapabilities::new(true)),
            Duration::from_secs(5),
        )
    }

    async fn send(session: &TunnelSession, text: &str) -> Option<String> {
        session
            .handle_app_message(text.as_bytes())
            .await
            .map(|bytes| String::from_utf8(bytes).unwrap())
    }

    #[test]
    fn test_session_state() {
        assert!(SessionState::Running.is_running());
        assert!(SessionState::Starting.is_active());
        assert!(!SessionState::Failed.is_active());
        assert!(!SessionState::Stopped.is_running());
    }

    #[tokio::test]
    async fn test_startup_include_policy() {
        let engine = Arc::new(SimulatedEngine::default());
        let session = session_with(&engine);
        let options = StartupOptions::from_iter([
            ("PerAppProxyEnabled", "YES"),
            ("PerAppProxyMode", "include"),
            ("PerAppProxyList", "com.a, com.b"),
        ]);

        session.start(&options).await.unwrap();

        assert_eq!(session.state().await, SessionState::Running);
        assert!(session.is_routed("com.a"));
        assert!(!session.is_routed("com.c"));
        let settings = session.platform_settings().await.unwrap();
        assert_eq!(settings.included_app_ids.len(), 2);

        session.stop().await;
    }

    #[tokio::test]
    async fn test_control_round() {
        let engine = Arc::new(SimulatedEngine::default());
        let session = session_with(&engine);
        session.start(&StartupOptions::new()).await.unwrap();

        assert_eq!(
            send(&session, "split_tunnel:enable:com.x;com.y").await.as_deref(),
            Some("OK")
        );
        assert_eq!(session.policy().mode(), RoutingMode::Include);
        assert_eq!(
            send(&session, "split_tunnel:is_routed:com.x").await.as_deref(),
            Some("YES")
        );
        assert_eq!(
            send(&session, "split_tunnel:is_routed:com.z").await.as_deref(),
            Some("NO")
        );

        assert_eq!(
            send(&session, "split_tunnel:disable:ignored").await.as_deref(),
            Some("OK")
        );
        assert_eq!(
            send(&session, "split_tunnel:is_routed:com.z").await.as_deref(),
            Some("YES")
        );

        session.stop().await;
    }

    #[tokio::test]
    async fn test_stats_follow_engine_traffic() {
        let engine = Arc::new(SimulatedEngine::default());
        let session = session_with(&engine);
        session.start(&StartupOptions::new()).await.unwrap();

        assert!(engine.emit(100, 2000));
        assert!(engine.emit(23, 45));

        // The collector thread applies deltas asynchronously
        let deadline = Instant::now() + Duration::from_secs(1);
        while session.traffic().download < 2045 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(send(&session, "stats").await.as_deref(), Some("123,2045"));

        session.stop().await;
        // Totals survive stop and reset on the next start
        assert_eq!(session.traffic().upload, 123);
        session.start(&StartupOptions::new()).await.unwrap();
        assert_eq!(send(&session, "stats").await.as_deref(), Some("0,0"));
        session.stop().await;
    }

    #[tokio::test]
    async fn test_messages_ignored_when_stopped() {
        let engine = Arc::new(SimulatedEngine::default());
        let session = session_with(&engine);

        assert_eq!(send(&session, "stats").await, None);
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let engine = Arc::new(SimulatedEngine::default());
        let session = session_with(&engine);
        session.start(&StartupOptions::new()).await.unwrap();

        assert!(matches!(
            session.start(&StartupOptions::new()).await,
            Err(SessionError::AlreadyRunning)
        ));
        session.stop().await;
    }

    #[tokio::test]
    async fn test_stop_discards_policy() {
        let engine = Arc::new(SimulatedEngine::default());
        let session = session_with(&engine);
        let options = StartupOptions::from_iter([
            ("PerAppProxyEnabled", "true"),
            ("PerAppProxyList", "com.a"),
        ]);
        session.start(&options).await.unwrap();
        assert!(!session.is_routed("com.a"));

        session.stop().await;

        assert_eq!(session.state().await, SessionState::Stopped);
        assert_eq!(session.policy().mode(), RoutingMode::Disabled);
        assert!(session.is_routed("com.a"));
        assert!(!engine.is_running());
        assert!(session.uptime().await.is_none());
    }

    #[tokio::test]
    async fn test_startup_reload_failure() {
        let engine = Arc::new(SimulatedEngine::default());
        engine.set_fail_reloads(true);
        let session = session_with(&engine);
        let options = StartupOptions::from_iter([
            ("PerAppProxyEnabled", "yes"),
            ("PerAppProxyList", "com.a"),
        ]);

        let result = session.start(&options).await;

        assert!(matches!(
            result,
            Err(SessionError::Engine(EngineError::ReloadFailed(_)))
        ));
        assert_eq!(session.state().await, SessionState::Failed);
        assert!(!engine.is_running());

        // A failed session can be started again
        engine.set_fail_reloads(false);
        session.start(&options).await.unwrap();
        assert!(session.is_running().await);
        session.stop().await;
    }

    #[tokio::test]
    async fn test_from_config() {
        let engine = Arc::new(SimulatedEngine::default());
        let mut config = ProviderConfig::default();
        config.platform_version = Some("14.0".into());
        config.startup_options.insert("PerAppProxyEnabled", "yes");
        config.startup_options.insert("PerAppProxyList", "com.a");

        let session = TunnelSession::from_config(engine, &config).unwrap();
        session.start(&config.startup_options).await.unwrap();

        // Policy applies even where the platform cannot enforce it
        assert!(!session.is_routed("com.a"));
        let settings = session.platform_settings().await.unwrap();
        assert!(settings.excluded_app_ids.is_empty());
        assert!(session.status().await.contains("exclude (1 apps)"));

        session.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enables_serialize_reloads() {
        let engine = Arc::new(SimulatedEngine::new(Duration::from_millis(20)));
        let session = Arc::new(session_with(&engine));
        session.start(&StartupOptions::new()).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..3 {
            let session = Arc::clone(&session);
            tasks.push(tokio::spawn(async move {
                let msg = format!("split_tunnel:enable:com.app{i}");
                session.handle_app_message(msg.as_bytes()).await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().as_deref(), Some(&b"OK"[..]));
        }

        assert_eq!(engine.reload_count(), 3);
        assert_eq!(engine.max_concurrent_reloads(), 1);
        session.stop().await;
    }

    fn startup_include(app: &str) -> StartupOptions {
        StartupOptions::from_iter([
            ("PerAppProxyEnabled", "yes"),
            ("PerAppProxyMode", "include"),
            ("PerAppProxyList", app),
        ])
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_during_slow_start() {
        let engine = Arc::new(SimulatedEngine::new(Duration::from_millis(200)));
        let session = Arc::new(session_with(&engine));

        let starting = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.start(&startup_include("com.a")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.stop().await;

        starting.await.unwrap().unwrap();
        assert_eq!(session.state().await, SessionState::Stopped);
        assert!(!engine.is_running());
        assert!(session.uptime().await.is_none());
        assert_eq!(send(&session, "split_tunnel:enable:com.b").await, None);

        // The session comes back cleanly after the interrupted run
        session.start(&StartupOptions::new()).await.unwrap();
        assert_eq!(
            send(&session, "split_tunnel:enable:com.b").await.as_deref(),
            Some("OK")
        );
        session.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_queries_answered_while_starting() {
        let engine = Arc::new(SimulatedEngine::new(Duration::from_millis(200)));
        let session = Arc::new(session_with(&engine));

        let starting = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.start(&startup_include("com.a")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(session.state().await, SessionState::Starting);
        assert_eq!(send(&session, "stats").await.as_deref(), Some("0,0"));
        assert_eq!(
            send(&session, "split_tunnel:is_routed:com.b").await.as_deref(),
            Some("NO")
        );
        assert_eq!(send(&session, "split_tunnel:enable:com.b").await, None);
        assert_eq!(send(&session, "split_tunnel:disable:x").await, None);

        starting.await.unwrap().unwrap();
        assert!(session.is_routed("com.a"));
        assert!(!session.is_routed("com.b"));
        session.stop().await;
    }

    /// Engine that holds on to the traffic sender and then refuses to start
    #[derive(Default)]
    struct KeepsSenderEngine {
        traffic: std::sync::Mutex<Option<crossbeam_channel::Sender<crate::traffic::TrafficDelta>>>,
    }

    #[async_trait::async_trait]
    impl TunnelEngine for KeepsSenderEngine {
        async fn start(
            &self,
            traffic: crossbeam_channel::Sender<crate::traffic::TrafficDelta>,
        ) -> Result<(), EngineError> {
            *self.traffic.lock().unwrap() = Some(traffic);
            Err(EngineError::StartFailed("no route to server".into()))
        }

        async fn reload(&self) -> Result<(), EngineError> {
            Err(EngineError::NotRunning)
        }

        async fn stop(&self) {
            self.traffic.lock().unwrap().take();
        }
    }

    #[tokio::test]
    async fn test_engine_start_failure_releases_collector() {
        let engine = Arc::new(KeepsSenderEngine::default());
        let session = TunnelSession::new(
            Arc::clone(&engine) as Arc<dyn TunnelEngine>,
            Some(Box::new(ProtocolConfiguration::new())),
            Arc::new(StaticCapabilities::new(true)),
            Duration::from_secs(5),
        );

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            session.start(&StartupOptions::new()),
        )
        .await
        .expect("start should not hang on the collector");

        assert!(matches!(
            result,
            Err(SessionError::Engine(EngineError::StartFailed(_)))
        ));
        assert_eq!(session.state().await, SessionState::Failed);
        assert!(engine.traffic.lock().unwrap().is_none());
    }
}
