//! Tunnel Engine
//!
//! The engine owns the actual connection; this crate only starts, reloads
//! and stops it. While running, the engine reports traffic as
//! [`TrafficDelta`]s on the sender it was started with.

use crate::traffic::TrafficDelta;
use async_trait::async_trait;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tunneling engine driven by the session
#[async_trait]
pub trait TunnelEngine: Send + Sync {
    /// Bring the connection up. Traffic deltas go to `traffic` until `stop`.
    async fn start(&self, traffic: Sender<TrafficDelta>) -> Result<(), EngineError>;

    /// Restart the active connection; completes once it is back up
    async fn reload(&self) -> Result<(), EngineError>;

    /// Tear the connection down and release the traffic sender
    async fn stop(&self);
}

/// Engine errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Engine not running")]
    NotRunning,

    #[error("Engine failed to start: {0}")]
    StartFailed(String),

    #[error("Engine reload failed: {0}")]
    ReloadFailed(String),

    #[error("Engine reload timed out after {0:?}")]
    Timeout(Duration),
}

/// In-process engine used by the host harness and tests.
///
/// Reloads take a fixed delay and can be made to fail. It also records
/// how many reloads overlapped, which should never exceed one.
pub struct SimulatedEngine {
    reload_delay: Duration,
    fail_reloads: AtomicBool,
    running: AtomicBool,
    reloads: AtomicU64,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    traffic: Mutex<Option<Sender<TrafficDelta>>>,
}

impl SimulatedEngine {
    /// Create an engine whose reloads take `reload_delay`
    pub fn new(reload_delay: Duration) -> Self {
        Self {
            reload_delay,
            fail_reloads: AtomicBool::new(false),
            running: AtomicBool::new(false),
            reloads: AtomicU64::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
            traffic: Mutex::new(None),
        }
    }

    /// Make subsequent reloads fail (or succeed again)
    pub fn set_fail_reloads(&self, fail: bool) {
        self.fail_reloads.store(fail, Ordering::SeqCst);
    }

    /// Check if the engine is up
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Successful reloads so far
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::SeqCst)
    }

    /// Highest number of reloads seen running at once
    pub fn max_concurrent_reloads(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Report traffic as if it had crossed the tunnel.
    ///
    /// Returns false when the engine is stopped or nobody is listening.
    pub fn emit(&self, up: u64, down: u64) -> bool {
        let traffic = self.traffic.lock().unwrap_or_else(PoisonError::into_inner);
        match traffic.as_ref() {
            Some(tx) => tx.send(TrafficDelta::new(up, down)).is_ok(),
            None => false,
        }
    }
}

/// Decrements the in-flight count even if the reload future is dropped
struct InFlight<'a>(&'a AtomicU32);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[async_trait]
impl TunnelEngine for SimulatedEngine {
    async fn start(&self, traffic: Sender<TrafficDelta>) -> Result<(), EngineError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::StartFailed("already running".into()));
        }
        *self.traffic.lock().unwrap_or_else(PoisonError::into_inner) = Some(traffic);
        info!("Simulated engine started");
        Ok(())
    }

    async fn reload(&self) -> Result<(), EngineError> {
        if !self.is_running() {
            return Err(EngineError::NotRunning);
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);
        debug!("Simulated engine reloading ({:?})", self.reload_delay);

        if !self.reload_delay.is_zero() {
            tokio::time::sleep(self.reload_delay).await;
        }

        if self.fail_reloads.load(Ordering::SeqCst) {
            warn!("Simulated engine reload failed");
            return Err(EngineError::ReloadFailed("simulated failure".into()));
        }

        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        // Dropping the sender lets the collector thread exit
        self.traffic.lock().unwrap_or_else(PoisonError::into_inner).take();
        info!("Simulated engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[tokio::test]
    async fn test_reload_requires_start() {
        let engine = SimulatedEngine::default();
        assert_eq!(engine.reload().await, Err(EngineError::NotRunning));
    }

    #[tokio::test]
    async fn test_start_reload_stop() {
        let engine = SimulatedEngine::default();
        let (tx, rx) = unbounded();

        engine.start(tx).await.unwrap();
        assert!(engine.is_running());

        engine.reload().await.unwrap();
        assert_eq!(engine.reload_count(), 1);

        assert!(engine.emit(4, 2));
        assert_eq!(rx.try_recv().unwrap(), TrafficDelta::new(4, 2));

        engine.stop().await;
        assert!(!engine.is_running());
        assert!(!engine.emit(1, 1));
        // Sender gone, channel disconnected
        assert!(rx.recv().is_err());
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let engine = SimulatedEngine::default();
        let (tx, _rx) = unbounded();
        engine.start(tx.clone()).await.unwrap();

        assert!(matches!(
            engine.start(tx).await,
            Err(EngineError::StartFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_failing_reload() {
        let engine = SimulatedEngine::default();
        let (tx, _rx) = unbounded();
        engine.start(tx).await.unwrap();

        engine.set_fail_reloads(true);
        assert!(matches!(
            engine.reload().await,
            Err(EngineError::ReloadFailed(_))
        ));
        assert_eq!(engine.reload_count(), 0);

        engine.set_fail_reloads(false);
        assert!(engine.reload().await.is_ok());
    }
}
