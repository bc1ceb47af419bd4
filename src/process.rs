//! Supervised renderer process with lifecycle metadata.
//!
//! [`RendererProcess`] wraps one running [`Engine`] with the generation
//! number the supervisor assigned it and its launch time.
//!
//! # Architecture
//!
//! ```text
//! RendererProcess
//! ├── generation: u64 (increments on every relaunch)
//! ├── engine: Arc<dyn Engine> (shared with the monitor thread)
//! ├── last_ping: Arc<Mutex<Instant>> (health tracking)
//! └── launched_at: Instant (uptime)
//! ```
//!
//! # Internal Use
//!
//! Owned exclusively by the [`RendererSupervisor`](crate::RendererSupervisor).
//! Callers only see [`ProcessInfo`] snapshots.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::engine::{CrashNotifier, Engine, EngineLauncher};
use crate::error::{EngineError, EngineStage};
use crate::traits::Healthcheck;

/// A launched, smoke-tested engine process.
///
/// # Lifecycle
///
/// ```text
/// EngineLauncher::launch()
///       │
///       ▼
/// RendererProcess::start()  ──→  Smoke test (open session, close session)
///       │
///       ▼
/// Ready (sessions handed out)
///       │
///       ├──→ Health Check (ping) ──→ Pass/Fail
///       │
///       └──→ Crash / shutdown ──→ shutdown() closes the engine
/// ```
#[derive(Clone)]
pub(crate) struct RendererProcess {
    generation: u64,
    engine: Arc<dyn Engine>,
    last_ping: Arc<Mutex<Instant>>,
    launched_at: Instant,
}

impl RendererProcess {
    /// Launch an engine and verify it can open and close a session.
    ///
    /// Blocking. The engine is closed again if the smoke test fails, so a
    /// failed start never leaves a process behind.
    pub(crate) fn start(
        launcher: &dyn EngineLauncher,
        notifier: CrashNotifier,
    ) -> Result<Self, EngineError> {
        let generation = notifier.generation();
        let launched_at = Instant::now();

        let engine = launcher.launch(notifier)?;

        log::debug!("🔍 Smoke testing renderer generation {}...", generation);
        if let Err(e) = smoke_test(engine.as_ref()) {
            log::error!("❌ Renderer generation {} failed smoke test: {}", generation, e);
            if let Err(close_err) = engine.close() {
                log::warn!("⚠️ Failed to close renderer after smoke test failure: {}", close_err);
            }
            return Err(e);
        }
        log::debug!("✅ Renderer generation {} passed smoke test", generation);

        Ok(Self {
            generation,
            engine,
            last_ping: Arc::new(Mutex::new(Instant::now())),
            launched_at,
        })
    }

    #[inline]
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub(crate) fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    #[inline]
    pub(crate) fn uptime(&self) -> Duration {
        self.launched_at.elapsed()
    }

    pub(crate) fn last_ping(&self) -> Instant {
        *self.last_ping.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close the engine, logging (not returning) any error.
    pub(crate) fn shutdown(&self) {
        log::info!(
            "🛑 Closing renderer generation {} (uptime {:?})",
            self.generation,
            self.uptime()
        );
        if let Err(e) = self.engine.close() {
            log::warn!("⚠️ Renderer generation {} did not close cleanly: {}", self.generation, e);
        }
    }

    pub(crate) fn info(&self) -> ProcessInfo {
        ProcessInfo {
            generation: self.generation,
            uptime: self.uptime(),
            since_last_ping: self.last_ping().elapsed(),
        }
    }
}

impl Healthcheck for RendererProcess {
    fn ping(&self) -> Result<(), EngineError> {
        log::trace!("🏓 Pinging renderer generation {}...", self.generation);
        self.engine.ping()?;
        *self.last_ping.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        Ok(())
    }
}

impl std::fmt::Debug for RendererProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererProcess")
            .field("generation", &self.generation)
            .field("uptime", &self.uptime())
            .finish()
    }
}

/// Open and immediately close a throwaway session.
fn smoke_test(engine: &dyn Engine) -> Result<(), EngineError> {
    let session = engine.open_session().map_err(|e| match e {
        EngineError::Protocol { message, .. } => EngineError::protocol(EngineStage::SmokeTest, message),
        EngineError::Disconnected { message, .. } => EngineError::disconnected(EngineStage::SmokeTest, message),
        other => other,
    })?;
    session.close()
}

/// Snapshot of the live renderer process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ProcessInfo {
    /// Starts at 1 and increments with every relaunch.
    pub generation: u64,

    /// Time since launch.
    pub uptime: Duration,

    /// Time since the last successful health ping (or launch).
    pub since_last_ping: Duration,
}

// ============================================================================
// Unit Tests
// ============================================================================
