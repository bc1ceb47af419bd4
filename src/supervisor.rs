//! Renderer lifecycle supervision.
//!
//! [`RendererSupervisor`] owns the single live renderer process: it
//! launches and smoke-tests it, hands out sessions while it is `Ready`,
//! and relaunches it when it crashes.
//!
//! # State Machine
//!
//! ```text
//!                 start()
//! Uninitialized ─────────▶ Starting ──── launch + smoke test ok ───▶ Ready
//!                              │                                   │   ▲
//!                              │ failed                      crash │   │ relaunch ok
//!                              ▼                                   ▼   │
//!                           Failed ◀──── attempts exhausted ─── Restarting
//!
//! shutdown(): any state ─▶ Stopped
//! ```
//!
//! # Crash Detection
//!
//! Crash events arrive on one channel from three sources:
//!
//! 1. The engine itself, through its [`CrashNotifier`]
//! 2. The health monitor thread, after `max_ping_failures` failed pings
//! 3. [`open_session`](RendererSupervisor::open_session) seeing the engine
//!    disconnected
//!
//! A single event-loop task consumes them and drives the state machine.
//! Every event names the process generation it is about; events about a
//! process that was already replaced are ignored.
//!
//! # Crash Loops
//!
//! Consecutive crashes are capped like relaunch attempts. A process that
//! stayed up for `health_check_interval` resets the count. Crash `n` in a
//! row waits `restart_backoff * (n - 1)` before relaunching; crash
//! `max_restart_attempts + 1` enters `Failed`.
//!
//! # Example
//!
//! ```rust,ignore
//! use html2pdf_gate::{ChromeLauncher, RenderConfig, RendererSupervisor};
//!
//! let supervisor = RendererSupervisor::builder()
//!     .config(RenderConfig::default())
//!     .launcher(Box::new(ChromeLauncher::with_defaults()))
//!     .build()?;
//!
//! supervisor.start().await?;
//! assert!(supervisor.is_ready());
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::RenderConfig;
use crate::engine::{CrashNotifier, EngineEvent, EngineLauncher};
use crate::error::{EngineError, EngineStage, RenderError, Result};
use crate::monitor::{HealthMonitor, ProcessSlot};
use crate::process::{ProcessInfo, RendererProcess};
use crate::session::LeasedSession;

/// Lifecycle state of the supervised renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum RendererState {
    /// `start()` has not been called.
    Uninitialized,
    /// Launching and smoke-testing the first process.
    Starting,
    /// Sessions are being handed out.
    Ready,
    /// The process crashed; a replacement is being launched.
    Restarting,
    /// The renderer could not be (re)started. Terminal.
    Failed,
    /// `shutdown()` was called. Terminal.
    Stopped,
}

impl RendererState {
    /// `true` for states that never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }
}

impl std::fmt::Display for RendererState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Restarting => "restarting",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

// ============================================================================
// SupervisorInner
// ============================================================================

/// State shared between the supervisor handle and its event loop.
struct SupervisorInner {
    launcher: Arc<dyn EngineLauncher>,
    config: RenderConfig,

    /// The live process; `None` unless `Ready`.
    process: ProcessSlot,

    state_tx: watch::Sender<RendererState>,

    /// Crash events from engines, the monitor and session opens.
    events_tx: mpsc::UnboundedSender<EngineEvent>,

    next_generation: AtomicU64,
    shutting_down: AtomicBool,

    /// Crashes since the last process that stayed up for a full
    /// `health_check_interval`.
    consecutive_crashes: AtomicU32,

    /// Serialises start, restart and shutdown.
    lifecycle: tokio::sync::Mutex<()>,
}

impl SupervisorInner {
    fn state(&self) -> RendererState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: RendererState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            log::info!("🔄 Renderer state: {} → {}", previous, state);
        }
    }

    fn current_process(&self) -> Option<RendererProcess> {
        self.process
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_process(&self) -> Option<RendererProcess> {
        self.process
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn install_process(&self, process: RendererProcess) {
        *self.process.lock().unwrap_or_else(PoisonError::into_inner) = Some(process);
    }

    /// Launch and smoke-test a new process within `launch_timeout`.
    async fn launch_process(&self) -> std::result::Result<RendererProcess, EngineError> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let notifier = CrashNotifier::new(generation, self.events_tx.clone());
        let launcher = Arc::clone(&self.launcher);
        let timeout = self.config.launch_timeout;

        log::info!("🚀 Launching renderer generation {}...", generation);

        let mut task = tokio::task::spawn_blocking(move || RendererProcess::start(launcher.as_ref(), notifier));

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(EngineError::Internal(format!("launch task failed: {}", join_err))),
            Err(_) => {
                log::error!(
                    "❌ Renderer generation {} did not start within {:?}",
                    generation,
                    timeout
                );
                // The launch keeps running; make sure a late success is torn down.
                tokio::spawn(async move {
                    if let Ok(Ok(process)) = task.await {
                        log::warn!(
                            "⚠️ Renderer generation {} finished launching after timeout, closing it",
                            process.generation()
                        );
                        let _ = tokio::task::spawn_blocking(move || process.shutdown()).await;
                    }
                });
                Err(EngineError::Timeout {
                    stage: EngineStage::Launch,
                    after: timeout,
                })
            }
        }
    }

    /// Close a process on the blocking pool and wait for it.
    async fn teardown(process: RendererProcess) {
        if let Err(e) = tokio::task::spawn_blocking(move || process.shutdown()).await {
            log::warn!("⚠️ Renderer teardown task failed: {}", e);
        }
    }

    /// React to a crash event. Runs on the event-loop task.
    async fn handle_event(&self, event: EngineEvent) {
        let EngineEvent::Crashed { generation, reason } = event;
        let _lifecycle = self.lifecycle.lock().await;

        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        let current = self.current_process().map(|p| p.generation());
        if self.state() != RendererState::Ready || current != Some(generation) {
            log::debug!(
                "Ignoring crash report for generation {} (state: {}, current: {:?})",
                generation,
                self.state(),
                current
            );
            return;
        }

        log::error!("💥 Renderer generation {} crashed: {}", generation, reason);
        self.set_state(RendererState::Restarting);

        if let Some(process) = self.take_process() {
            if process.uptime() >= self.config.health_check_interval {
                self.consecutive_crashes.store(0, Ordering::SeqCst);
            }
            Self::teardown(process).await;
        }

        let crashes = self.consecutive_crashes.fetch_add(1, Ordering::SeqCst) + 1;
        if crashes > self.config.max_restart_attempts {
            log::error!(
                "❌ Renderer crashed {} times in a row without stabilising, giving up",
                crashes
            );
            self.set_state(RendererState::Failed);
            return;
        }

        self.restart(crashes).await;
    }

    /// Relaunch with capped attempts. Caller holds the lifecycle lock.
    ///
    /// The first crash in a row relaunches immediately; crash `n` waits
    /// `restart_backoff * (n - 1)` first.
    async fn restart(&self, crashes: u32) {
        let max_attempts = self.config.max_restart_attempts;

        if crashes > 1 {
            let backoff = self.config.restart_backoff * (crashes - 1);
            log::info!("⏳ Crash {} in a row, waiting {:?} before relaunching", crashes, backoff);
            tokio::time::sleep(backoff).await;
        }

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let backoff = self.config.restart_backoff * (attempt - 1);
                log::info!("⏳ Waiting {:?} before relaunch attempt {}/{}", backoff, attempt, max_attempts);
                tokio::time::sleep(backoff).await;
            }
            if self.shutting_down.load(Ordering::SeqCst) {
                return;
            }

            match self.launch_process().await {
                Ok(process) => {
                    log::info!(
                        "✅ Renderer generation {} ready after {} attempt(s)",
                        process.generation(),
                        attempt
                    );
                    self.install_process(process);
                    self.set_state(RendererState::Ready);
                    return;
                }
                Err(e) => {
                    log::warn!("⚠️ Relaunch attempt {}/{} failed: {}", attempt, max_attempts, e);
                }
            }
        }

        log::error!(
            "❌ Renderer could not be relaunched after {} attempt(s), giving up",
            max_attempts
        );
        self.set_state(RendererState::Failed);
    }
}

/// Consume crash events until the supervisor goes away.
async fn event_loop(inner: Weak<SupervisorInner>, mut events: mpsc::UnboundedReceiver<EngineEvent>) {
    log::debug!("🔁 Supervisor event loop started");
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_event(event).await;
    }
    log::debug!("🔁 Supervisor event loop exiting");
}

// ============================================================================
// RendererSupervisor
// ============================================================================

/// Owner of the renderer process lifecycle.
///
/// Share it behind an [`Arc`]; all methods take `&self`.
///
/// # Guarantees
///
/// - At most one live process: the crashed process is closed before its
///   replacement is launched
/// - [`open_session`](Self::open_session) never waits for a restart; it
///   fails immediately with [`EngineError::NotReady`]
/// - Consecutive relaunch attempts and consecutive crashes are both capped
///   by [`max_restart_attempts`](RenderConfig::max_restart_attempts); a
///   process that stays up for `health_check_interval` resets the crash count
pub struct RendererSupervisor {
    inner: Arc<SupervisorInner>,

    /// Taken by `start()` to spawn the event loop.
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,

    event_loop: Mutex<Option<JoinHandle<()>>>,

    monitor: Mutex<Option<HealthMonitor>>,

    enable_health_monitor: bool,
}

impl RendererSupervisor {
    /// Create a builder.
    pub fn builder() -> RendererSupervisorBuilder {
        RendererSupervisorBuilder::new()
    }

    /// Launch the renderer and verify it with a smoke test.
    ///
    /// On success the supervisor is `Ready`, the event loop and the health
    /// monitor are running. Calling `start()` on a `Ready` supervisor is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// [`RenderError::LaunchFailure`] if the engine cannot be launched or
    /// fails its smoke test within `launch_timeout`. The supervisor is then
    /// `Failed` for good; nothing in this crate can run without a renderer,
    /// so the host process should terminate.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        match self.inner.state() {
            RendererState::Uninitialized => {}
            RendererState::Ready | RendererState::Restarting => return Ok(()),
            RendererState::Failed => {
                return Err(RenderError::LaunchFailure(EngineError::Launch(
                    "renderer previously failed to start".to_string(),
                )));
            }
            RendererState::Stopped => {
                return Err(RenderError::ServiceUnavailable("renderer was shut down".to_string()));
            }
            RendererState::Starting => {
                return Err(RenderError::Configuration("start() already in progress".to_string()));
            }
        }

        self.inner.set_state(RendererState::Starting);

        let process = match self.inner.launch_process().await {
            Ok(process) => process,
            Err(e) => {
                log::error!("❌ Renderer failed to start: {}", e);
                self.inner.set_state(RendererState::Failed);
                return Err(RenderError::LaunchFailure(e));
            }
        };

        log::info!("✅ Renderer generation {} ready", process.generation());
        self.inner.install_process(process);

        if let Some(events) = self
            .events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let handle = tokio::spawn(event_loop(Arc::downgrade(&self.inner), events));
            *self.event_loop.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }

        if self.enable_health_monitor {
            let monitor = HealthMonitor::start(
                Arc::clone(&self.inner.process),
                self.inner.events_tx.clone(),
                self.inner.config.health_check_interval,
                self.inner.config.max_ping_failures,
            );
            *self.monitor.lock().unwrap_or_else(PoisonError::into_inner) = Some(monitor);
        }

        self.inner.set_state(RendererState::Ready);
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RendererState {
        self.inner.state()
    }

    /// `true` only while `Ready`.
    pub fn is_ready(&self) -> bool {
        self.inner.state() == RendererState::Ready
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<RendererState> {
        self.inner.state_tx.subscribe()
    }

    /// Resolve once the supervisor enters `Failed`.
    ///
    /// Hosts select on this to terminate when the renderer is gone for
    /// good. Never resolves after a clean shutdown.
    pub async fn wait_for_failure(&self) {
        let mut rx = self.subscribe();
        loop {
            match *rx.borrow_and_update() {
                RendererState::Failed => return,
                RendererState::Stopped => break,
                _ => {}
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
        std::future::pending::<()>().await
    }

    /// Generation and uptime of the live process, if any.
    pub fn process_info(&self) -> Option<ProcessInfo> {
        self.inner.current_process().map(|p| p.info())
    }

    /// The configuration the supervisor was built with.
    pub fn config(&self) -> &RenderConfig {
        &self.inner.config
    }

    /// Open a session on the live process.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotReady`] unless `Ready` (no waiting)
    /// - Whatever the engine reports; a
    ///   [`Disconnected`](EngineError::Disconnected) error is also treated
    ///   as a crash of the current generation
    pub async fn open_session(&self) -> std::result::Result<LeasedSession, EngineError> {
        if self.inner.state() != RendererState::Ready {
            return Err(EngineError::NotReady);
        }
        let process = self.inner.current_process().ok_or(EngineError::NotReady)?;
        let generation = process.generation();

        // Wrapped inside the blocking task so a session that completes after
        // the caller gave up is still closed by the lease's Drop.
        let engine = Arc::clone(process.engine());
        let opened = tokio::task::spawn_blocking(move || {
            engine
                .open_session()
                .map(|session| LeasedSession::new(session, generation))
        })
        .await
        .map_err(|e| EngineError::Internal(format!("open session task failed: {}", e)))?;

        if let Err(e) = &opened {
            if e.is_disconnect() {
                self.report_crash(generation, e.to_string());
            }
        }
        opened
    }

    /// Report that the process of `generation` is gone.
    pub(crate) fn report_crash(&self, generation: u64, reason: String) {
        let _ = self
            .inner
            .events_tx
            .send(EngineEvent::Crashed { generation, reason });
    }

    /// Stop monitoring, close the live process and enter `Stopped`.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            log::debug!("Supervisor already shut down");
            return;
        }
        log::info!("🛑 Shutting down renderer supervisor...");

        let monitor = self.monitor.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut monitor) = monitor {
            monitor.stop_async().await;
        }

        let _lifecycle = self.inner.lifecycle.lock().await;

        if let Some(handle) = self.event_loop.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }

        if let Some(process) = self.inner.take_process() {
            SupervisorInner::teardown(process).await;
        }
        self.inner.set_state(RendererState::Stopped);
        log::info!("✅ Renderer supervisor shut down");
    }

    fn shutdown_sync(&mut self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        if let Some(mut monitor) = self.monitor.lock().unwrap_or_else(PoisonError::into_inner).take() {
            monitor.stop();
        }
        if let Some(handle) = self.event_loop.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
        if let Some(process) = self.inner.take_process() {
            process.shutdown();
        }
        self.inner.set_state(RendererState::Stopped);
    }
}

impl Drop for RendererSupervisor {
    fn drop(&mut self) {
        if !self.inner.shutting_down.load(Ordering::SeqCst) {
            log::warn!("⚠️ RendererSupervisor dropped without explicit shutdown - cleaning up");
            self.shutdown_sync();
        }
    }
}

impl std::fmt::Debug for RendererSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererSupervisor")
            .field("state", &self.state())
            .field("process", &self.process_info())
            .finish()
    }
}

// ============================================================================
// RendererSupervisorBuilder
// ============================================================================

/// Builder for [`RendererSupervisor`].
///
/// # Example
///
/// ```rust,ignore
/// let supervisor = RendererSupervisor::builder()
///     .launcher(Box::new(ChromeLauncher::with_defaults()))
///     .enable_health_monitor(true)
///     .build()?;
/// ```
pub struct RendererSupervisorBuilder {
    config: Option<RenderConfig>,
    launcher: Option<Arc<dyn EngineLauncher>>,
    enable_health_monitor: bool,
}

impl RendererSupervisorBuilder {
    /// Create a builder with defaults (health monitor on).
    pub fn new() -> Self {
        Self {
            config: None,
            launcher: None,
            enable_health_monitor: true,
        }
    }

    /// Set configuration (defaults to [`RenderConfig::default`]).
    pub fn config(mut self, config: RenderConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the engine launcher (required).
    pub fn launcher(mut self, launcher: Box<dyn EngineLauncher>) -> Self {
        self.launcher = Some(Arc::from(launcher));
        self
    }

    /// Enable or disable the health monitor thread.
    pub fn enable_health_monitor(mut self, enable: bool) -> Self {
        self.enable_health_monitor = enable;
        self
    }

    /// Build the supervisor. It starts `Uninitialized`; call
    /// [`start`](RendererSupervisor::start).
    ///
    /// # Errors
    ///
    /// [`RenderError::Configuration`] if no launcher was provided.
    pub fn build(self) -> Result<RendererSupervisor> {
        let launcher = self
            .launcher
            .ok_or_else(|| RenderError::Configuration("No engine launcher provided".to_string()))?;
        let config = self.config.unwrap_or_default();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(RendererState::Uninitialized);

        let inner = Arc::new(SupervisorInner {
            launcher,
            config,
            process: Arc::new(Mutex::new(None)),
            state_tx,
            events_tx,
            next_generation: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
            consecutive_crashes: AtomicU32::new(0),
            lifecycle: tokio::sync::Mutex::new(()),
        });

        Ok(RendererSupervisor {
            inner,
            events_rx: Mutex::new(Some(events_rx)),
            event_loop: Mutex::new(None),
            monitor: Mutex::new(None),
            enable_health_monitor: self.enable_health_monitor,
        })
    }
}

impl Default for RendererSupervisorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::RenderConfigBuilder;
    use crate::engine::mock::MockLauncher;

    const TEST_POLL: Duration = Duration::from_millis(5);

    fn fast_config() -> RenderConfig {
        RenderConfigBuilder::new()
            .launch_timeout(Duration::from_secs(2))
            .restart_backoff(Duration::from_millis(10))
            .max_restart_attempts(2)
            .build()
            .unwrap()
    }

    fn supervisor(launcher: &MockLauncher) -> RendererSupervisor {
        RendererSupervisor::builder()
            .config(fast_config())
            .launcher(Box::new(launcher.clone()))
            .enable_health_monitor(false)
            .build()
            .unwrap()
    }

    async fn wait_for_state(supervisor: &RendererSupervisor, state: RendererState) {
        let mut rx = supervisor.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
            .await
            .expect("state not reached in time")
            .expect("supervisor dropped");
    }

    #[test]
    fn test_builder_missing_launcher() {
        let result = RendererSupervisor::builder().build();
        assert!(matches!(result, Err(RenderError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_start_reaches_ready() {
        let launcher = MockLauncher::new();
        let supervisor = supervisor(&launcher);

        assert_eq!(supervisor.state(), RendererState::Uninitialized);
        assert!(!supervisor.is_ready());

        supervisor.start().await.unwrap();

        assert!(supervisor.is_ready());
        assert_eq!(supervisor.process_info().unwrap().generation, 1);
        // smoke test opened and closed one session
        assert_eq!(launcher.sessions_opened(), 1);
        assert_eq!(launcher.open_sessions(), 0);

        // idempotent
        supervisor.start().await.unwrap();
        assert_eq!(launcher.launch_count(), 1);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_open_session_before_start_is_not_ready() {
        let launcher = MockLauncher::new();
        let supervisor = supervisor(&launcher);

        let result = supervisor.open_session().await;
        assert!(matches!(result, Err(EngineError::NotReady)));
        assert_eq!(launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn test_launch_failure_is_terminal() {
        let launcher = MockLauncher::new();
        launcher.fail_launches(1);
        let supervisor = supervisor(&launcher);

        let result = supervisor.start().await;
        assert!(matches!(result, Err(RenderError::LaunchFailure(_))));
        assert_eq!(supervisor.state(), RendererState::Failed);

        // stays failed, no relaunch
        assert!(supervisor.start().await.is_err());
        assert_eq!(launcher.launch_count(), 1);

        tokio::time::timeout(Duration::from_secs(1), supervisor.wait_for_failure())
            .await
            .expect("wait_for_failure should resolve");
    }

    #[tokio::test]
    async fn test_smoke_test_failure_is_launch_failure() {
        let launcher = MockLauncher::new();
        launcher.fail_smoke_tests(1);
        let supervisor = supervisor(&launcher);

        match supervisor.start().await {
            Err(RenderError::LaunchFailure(e)) => assert_eq!(e.stage(), Some(EngineStage::SmokeTest)),
            other => panic!("expected LaunchFailure, got {:?}", other),
        }
        assert_eq!(launcher.engine_close_count(), 1);
    }

    #[tokio::test]
    async fn test_launch_timeout() {
        let launcher = MockLauncher::new();
        launcher.launch_delay(Duration::from_millis(300));
        let supervisor = RendererSupervisor::builder()
            .config(
                RenderConfigBuilder::new()
                    .launch_timeout(Duration::from_millis(50))
                    .build()
                    .unwrap(),
            )
            .launcher(Box::new(launcher.clone()))
            .enable_health_monitor(false)
            .build()
            .unwrap();

        match supervisor.start().await {
            Err(RenderError::LaunchFailure(EngineError::Timeout { stage, .. })) => {
                assert_eq!(stage, EngineStage::Launch)
            }
            other => panic!("expected launch timeout, got {:?}", other),
        }

        // the late process gets closed once it finishes launching
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(launcher.engine_close_count(), 1);
    }

    #[tokio::test]
    async fn test_crash_triggers_restart() {
        let launcher = MockLauncher::new();
        let supervisor = supervisor(&launcher);
        supervisor.start().await.unwrap();

        launcher.launch_delay(Duration::from_millis(100));
        assert!(launcher.crash());

        wait_for_state(&supervisor, RendererState::Restarting).await;
        assert!(!supervisor.is_ready());
        assert!(matches!(supervisor.open_session().await, Err(EngineError::NotReady)));

        wait_for_state(&supervisor, RendererState::Ready).await;
        assert_eq!(supervisor.process_info().unwrap().generation, 2);
        assert_eq!(launcher.launch_count(), 2);
        // the crashed engine was closed before the new one launched
        assert_eq!(launcher.engine_close_count(), 1);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_stale_crash_is_ignored() {
        let launcher = MockLauncher::new();
        let supervisor = supervisor(&launcher);
        supervisor.start().await.unwrap();

        supervisor.report_crash(99, "not the current generation".to_string());
        tokio::time::sleep(TEST_POLL * 10).await;

        assert!(supervisor.is_ready());
        assert_eq!(launcher.launch_count(), 1);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_exhaustion_fails() {
        let launcher = MockLauncher::new();
        let supervisor = supervisor(&launcher);
        supervisor.start().await.unwrap();

        launcher.fail_launches(10);
        launcher.crash();

        wait_for_state(&supervisor, RendererState::Failed).await;
        // 1 initial + max_restart_attempts (2)
        assert_eq!(launcher.launch_count(), 3);
        assert!(supervisor.process_info().is_none());
    }

    async fn wait_for_generation(supervisor: &RendererSupervisor, generation: u64) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let current = supervisor.process_info().map(|info| info.generation);
            if supervisor.is_ready() && current == Some(generation) {
                return;
            }
            assert!(tokio::time::Instant::now() < deadline, "generation {} never became ready", generation);
            tokio::time::sleep(TEST_POLL).await;
        }
    }

    #[tokio::test]
    async fn test_crash_loop_gives_up() {
        let launcher = MockLauncher::new();
        let supervisor = supervisor(&launcher);
        supervisor.start().await.unwrap();
        let started = tokio::time::Instant::now();

        // every relaunch succeeds but the engine keeps dying right away
        for generation in 2..=3 {
            assert!(launcher.crash());
            wait_for_generation(&supervisor, generation).await;
        }
        // second crash in a row waited one backoff step
        assert!(started.elapsed() >= Duration::from_millis(10));

        assert!(launcher.crash());
        wait_for_state(&supervisor, RendererState::Failed).await;

        assert_eq!(launcher.launch_count(), 3);
        assert_eq!(launcher.engine_close_count(), 3);
        assert!(supervisor.process_info().is_none());
        assert!(matches!(supervisor.open_session().await, Err(EngineError::NotReady)));
        tokio::time::timeout(Duration::from_secs(1), supervisor.wait_for_failure())
            .await
            .expect("wait_for_failure should resolve");
    }

    #[tokio::test]
    async fn test_stable_process_resets_crash_count() {
        let launcher = MockLauncher::new();
        let supervisor = RendererSupervisor::builder()
            .config(
                RenderConfigBuilder::new()
                    .launch_timeout(Duration::from_secs(2))
                    .restart_backoff(Duration::from_millis(10))
                    .max_restart_attempts(1)
                    .health_check_interval(Duration::from_millis(50))
                    .build()
                    .unwrap(),
            )
            .launcher(Box::new(launcher.clone()))
            .enable_health_monitor(false)
            .build()
            .unwrap();
        supervisor.start().await.unwrap();

        assert!(launcher.crash());
        wait_for_generation(&supervisor, 2).await;

        // outlive the stability window before crashing again
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(launcher.crash());
        wait_for_generation(&supervisor, 3).await;
        assert_eq!(launcher.launch_count(), 3);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnected_open_session_reports_crash() {
        let launcher = MockLauncher::new();
        let supervisor = supervisor(&launcher);
        supervisor.start().await.unwrap();

        launcher.kill_silently();
        let error = supervisor.open_session().await.unwrap_err();
        assert!(error.is_disconnect());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while launcher.launch_count() < 2 {
            assert!(tokio::time::Instant::now() < deadline, "no relaunch");
            tokio::time::sleep(TEST_POLL).await;
        }
        wait_for_state(&supervisor, RendererState::Ready).await;
        assert_eq!(supervisor.process_info().unwrap().generation, 2);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_health_monitor_detects_silent_death() {
        let launcher = MockLauncher::new();
        let supervisor = RendererSupervisor::builder()
            .config(
                RenderConfigBuilder::new()
                    .health_check_interval(Duration::from_millis(10))
                    .max_ping_failures(2)
                    .restart_backoff(Duration::from_millis(10))
                    .build()
                    .unwrap(),
            )
            .launcher(Box::new(launcher.clone()))
            .build()
            .unwrap();
        supervisor.start().await.unwrap();

        launcher.kill_silently();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while launcher.launch_count() < 2 || !supervisor.is_ready() {
            assert!(tokio::time::Instant::now() < deadline, "monitor never triggered restart");
            tokio::time::sleep(TEST_POLL).await;
        }
        assert_eq!(supervisor.process_info().unwrap().generation, 2);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_engine() {
        let launcher = MockLauncher::new();
        let supervisor = supervisor(&launcher);
        supervisor.start().await.unwrap();

        supervisor.shutdown().await;

        assert_eq!(supervisor.state(), RendererState::Stopped);
        assert_eq!(launcher.engine_close_count(), 1);
        assert!(matches!(supervisor.open_session().await, Err(EngineError::NotReady)));

        // second shutdown is a no-op
        supervisor.shutdown().await;
        assert_eq!(launcher.engine_close_count(), 1);
    }

    #[tokio::test]
    async fn test_drop_closes_engine() {
        let launcher = MockLauncher::new();
        {
            let supervisor = supervisor(&launcher);
            supervisor.start().await.unwrap();
        }
        assert_eq!(launcher.engine_close_count(), 1);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(RendererState::Restarting.to_string(), "restarting");
        assert!(RendererState::Failed.is_terminal());
        assert!(!RendererState::Ready.is_terminal());
    }
}
