//! Scriptable mock engine for testing.
//!
//! [`MockLauncher`] stands in for Chrome so that the admission, supervisor
//! and retry paths can be exercised without a browser installed. Faults,
//! delays and crashes are scripted through the launcher; because clones
//! share state, a test keeps one clone for scripting and assertions after
//! moving another into the service.
//!
//! # Feature Flag
//!
//! This module is only available when:
//! - The `test-utils` feature is enabled, OR
//! - During testing (`#[cfg(test)]`)
//!
//! # Example
//!
//! ```rust,ignore
//! use html2pdf_gate::engine::mock::{Fault, MockLauncher};
//! use html2pdf_gate::EngineStage;
//!
//! let launcher = MockLauncher::new();
//! launcher.fail_next(EngineStage::Render, Fault::Protocol);
//!
//! let service = RenderService::builder()
//!     .launcher(Box::new(launcher.clone()))
//!     .build()?;
//!
//! // first render attempt fails, the retry succeeds
//! assert_eq!(launcher.render_count(), 1);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::{CrashNotifier, Engine, EngineLauncher, EngineSession};
use crate::error::{EngineError, EngineStage};
use crate::traits::Healthcheck;

/// Kind of failure a scripted fault produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// [`EngineError::Protocol`] (retryable).
    Protocol,
    /// [`EngineError::Disconnected`] (retryable).
    Disconnected,
    /// [`EngineError::Content`] (fatal).
    Content,
}

impl Fault {
    fn into_error(self, stage: EngineStage) -> EngineError {
        match self {
            Self::Protocol => EngineError::protocol(stage, "injected protocol fault"),
            Self::Disconnected => EngineError::disconnected(stage, "injected disconnect"),
            Self::Content => EngineError::content(stage, "injected content fault"),
        }
    }
}

#[derive(Default)]
struct MockState {
    // scripting
    failing_launches: AtomicU32,
    failing_smoke_tests: AtomicU32,
    faults: Mutex<VecDeque<(EngineStage, Fault)>>,
    persistent_fault: Mutex<Option<(EngineStage, Fault)>>,
    launch_delay_ms: AtomicU64,
    load_delay_ms: AtomicU64,
    render_delay_ms: AtomicU64,
    ready_after_polls: AtomicU32,
    unhealthy: AtomicBool,

    // counters
    launches: AtomicUsize,
    engine_closes: AtomicUsize,
    sessions_opened: AtomicUsize,
    sessions_closed: AtomicUsize,
    live_sessions: AtomicUsize,
    peak_sessions: AtomicUsize,
    renders: AtomicUsize,
    pings: AtomicUsize,

    current: Mutex<Option<Arc<MockEngine>>>,
}

impl MockState {
    /// Consume the first scripted fault for `stage`, if any.
    fn take_fault(&self, stage: EngineStage) -> Option<EngineError> {
        let persistent = *self.persistent_fault.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((s, fault)) = persistent {
            if s == stage {
                return Some(fault.into_error(stage));
            }
        }

        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        let index = faults.iter().position(|(s, _)| *s == stage)?;
        faults.remove(index).map(|(_, fault)| {
            log::debug!("MockEngine: injecting {:?} fault at {}", fault, stage);
            fault.into_error(stage)
        })
    }

    fn delay(millis: &AtomicU64) {
        let millis = millis.load(Ordering::SeqCst);
        if millis > 0 {
            std::thread::sleep(Duration::from_millis(millis));
        }
    }
}

// ============================================================================
// MockLauncher
// ============================================================================

/// Launcher for [`MockEngine`]s with a shared fault script.
///
/// Cloning is cheap; all clones script and observe the same engines.
#[derive(Clone, Default)]
pub struct MockLauncher {
    state: Arc<MockState>,
}

impl MockLauncher {
    /// A launcher whose engines always succeed instantly.
    pub fn new() -> Self {
        Self::default()
    }

    // ---- scripting --------------------------------------------------------

    /// Make the next `n` launches fail.
    pub fn fail_launches(&self, n: u32) -> &Self {
        self.state.failing_launches.store(n, Ordering::SeqCst);
        self
    }

    /// Make the smoke test of the next `n` launched engines fail.
    pub fn fail_smoke_tests(&self, n: u32) -> &Self {
        self.state.failing_smoke_tests.store(n, Ordering::SeqCst);
        self
    }

    /// Fail the next operation at `stage` once.
    pub fn fail_next(&self, stage: EngineStage, fault: Fault) -> &Self {
        self.fail_next_n(stage, fault, 1)
    }

    /// Fail the next `n` operations at `stage`.
    pub fn fail_next_n(&self, stage: EngineStage, fault: Fault, n: usize) -> &Self {
        let mut faults = self.state.faults.lock().unwrap_or_else(PoisonError::into_inner);
        faults.extend(std::iter::repeat_n((stage, fault), n));
        self
    }

    /// Fail every operation at `stage` until [`clear_faults`](Self::clear_faults).
    pub fn fail_always(&self, stage: EngineStage, fault: Fault) -> &Self {
        *self
            .state
            .persistent_fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((stage, fault));
        self
    }

    /// Drop all scripted session faults.
    pub fn clear_faults(&self) -> &Self {
        self.state
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self
            .state
            .persistent_fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self
    }

    /// Block every launch for `delay`.
    pub fn launch_delay(&self, delay: Duration) -> &Self {
        self.state
            .launch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    /// Block every document load for `delay`.
    pub fn load_delay(&self, delay: Duration) -> &Self {
        self.state
            .load_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    /// Block every render for `delay`.
    pub fn render_delay(&self, delay: Duration) -> &Self {
        self.state
            .render_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    /// Report "not ready" for the first `polls` readiness checks of each session.
    pub fn ready_after_polls(&self, polls: u32) -> &Self {
        self.state.ready_after_polls.store(polls, Ordering::SeqCst);
        self
    }

    /// Make health pings fail (or succeed again).
    pub fn set_unhealthy(&self, unhealthy: bool) -> &Self {
        self.state.unhealthy.store(unhealthy, Ordering::SeqCst);
        self
    }

    /// Kill the current engine and send a crash notification.
    ///
    /// Returns `false` if there is no engine or nobody was listening.
    pub fn crash(&self) -> bool {
        match self.current_engine() {
            Some(engine) => {
                engine.dead.store(true, Ordering::SeqCst);
                engine.notifier.notify("simulated crash")
            }
            None => false,
        }
    }

    /// Kill the current engine without notifying anyone.
    ///
    /// Only the health monitor can notice.
    pub fn kill_silently(&self) {
        if let Some(engine) = self.current_engine() {
            engine.dead.store(true, Ordering::SeqCst);
        }
    }

    fn current_engine(&self) -> Option<Arc<MockEngine>> {
        self.state
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ---- observation -----------------------------------------------------

    /// Launch attempts, successful or not.
    pub fn launch_count(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    /// Engines closed.
    pub fn engine_close_count(&self) -> usize {
        self.state.engine_closes.load(Ordering::SeqCst)
    }

    /// Sessions opened, including smoke tests.
    pub fn sessions_opened(&self) -> usize {
        self.state.sessions_opened.load(Ordering::SeqCst)
    }

    /// Sessions closed, including smoke tests.
    pub fn sessions_closed(&self) -> usize {
        self.state.sessions_closed.load(Ordering::SeqCst)
    }

    /// Sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.state.live_sessions.load(Ordering::SeqCst)
    }

    /// Highest number of sessions open at the same time.
    pub fn peak_sessions(&self) -> usize {
        self.state.peak_sessions.load(Ordering::SeqCst)
    }

    /// Successful renders.
    pub fn render_count(&self) -> usize {
        self.state.renders.load(Ordering::SeqCst)
    }

    /// Health pings received.
    pub fn ping_count(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }
}

impl EngineLauncher for MockLauncher {
    fn launch(&self, notifier: CrashNotifier) -> Result<Arc<dyn Engine>, EngineError> {
        let count = self.state.launches.fetch_add(1, Ordering::SeqCst);
        MockState::delay(&self.state.launch_delay_ms);

        let should_fail = self
            .state
            .failing_launches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            log::debug!("MockLauncher: failing launch #{}", count + 1);
            return Err(EngineError::Launch("simulated launch failure".to_string()));
        }

        let fail_smoke_test = self
            .state
            .failing_smoke_tests
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        log::debug!(
            "MockLauncher: launched engine generation {} (launch #{})",
            notifier.generation(),
            count + 1
        );

        let engine = Arc::new(MockEngine {
            state: Arc::clone(&self.state),
            notifier,
            dead: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
            fail_smoke_test: AtomicBool::new(fail_smoke_test),
            next_session_id: AtomicU64::new(1),
        });

        *self
            .state
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&engine));

        Ok(engine)
    }
}

impl std::fmt::Debug for MockLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLauncher")
            .field("launches", &self.launch_count())
            .field("sessions_opened", &self.sessions_opened())
            .field("open_sessions", &self.open_sessions())
            .field("renders", &self.render_count())
            .finish()
    }
}

// ============================================================================
// MockEngine
// ============================================================================

/// One simulated engine process.
pub struct MockEngine {
    state: Arc<MockState>,
    notifier: CrashNotifier,
    /// Shared with every session so in-flight calls see a crash.
    dead: Arc<AtomicBool>,
    closed: AtomicBool,
    /// The first session of this engine is the supervisor's smoke test.
    fail_smoke_test: AtomicBool,
    next_session_id: AtomicU64,
}

impl MockEngine {
    fn check_alive(&self, stage: EngineStage) -> Result<(), EngineError> {
        if self.dead.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::disconnected(stage, "mock engine is gone"));
        }
        Ok(())
    }
}

impl Healthcheck for MockEngine {
    fn ping(&self) -> Result<(), EngineError> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        self.check_alive(EngineStage::HealthCheck)?;
        if self.state.unhealthy.load(Ordering::SeqCst) {
            return Err(EngineError::protocol(EngineStage::HealthCheck, "mock engine unhealthy"));
        }
        Ok(())
    }
}

impl Engine for MockEngine {
    fn open_session(&self) -> Result<Arc<dyn EngineSession>, EngineError> {
        self.check_alive(EngineStage::OpenSession)?;

        if self.fail_smoke_test.swap(false, Ordering::SeqCst) {
            return Err(EngineError::protocol(EngineStage::SmokeTest, "simulated smoke test failure"));
        }
        if let Some(error) = self.state.take_fault(EngineStage::OpenSession) {
            return Err(error);
        }

        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        self.state.sessions_opened.fetch_add(1, Ordering::SeqCst);
        let live = self.state.live_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_sessions.fetch_max(live, Ordering::SeqCst);

        Ok(Arc::new(MockSession {
            id,
            state: Arc::clone(&self.state),
            engine_dead: Arc::clone(&self.dead),
            document: Mutex::new(None),
            polls: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }))
    }

    fn close(&self) -> Result<(), EngineError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.engine_closes.fetch_add(1, Ordering::SeqCst);
            log::debug!("MockEngine: generation {} closed", self.notifier.generation());
        }
        Ok(())
    }
}

// ============================================================================
// MockSession
// ============================================================================

/// One simulated document context.
pub struct MockSession {
    id: u64,
    state: Arc<MockState>,
    engine_dead: Arc<AtomicBool>,
    document: Mutex<Option<String>>,
    polls: AtomicU32,
    closed: AtomicBool,
}

impl MockSession {
    fn check_engine(&self, stage: EngineStage) -> Result<(), EngineError> {
        if self.engine_dead.load(Ordering::SeqCst) {
            return Err(EngineError::disconnected(stage, "mock engine crashed"));
        }
        Ok(())
    }
}

impl EngineSession for MockSession {
    fn id(&self) -> u64 {
        self.id
    }

    fn load(&self, document: &str) -> Result<(), EngineError> {
        if let Some(error) = self.state.take_fault(EngineStage::Load) {
            return Err(error);
        }
        MockState::delay(&self.state.load_delay_ms);
        self.check_engine(EngineStage::Load)?;
        *self.document.lock().unwrap_or_else(PoisonError::into_inner) = Some(document.to_string());
        Ok(())
    }

    fn is_ready(&self) -> Result<bool, EngineError> {
        if let Some(error) = self.state.take_fault(EngineStage::WaitReady) {
            return Err(error);
        }
        self.check_engine(EngineStage::WaitReady)?;
        let polls = self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(polls >= self.state.ready_after_polls.load(Ordering::SeqCst))
    }

    fn render(&self) -> Result<Vec<u8>, EngineError> {
        if let Some(error) = self.state.take_fault(EngineStage::Render) {
            return Err(error);
        }
        MockState::delay(&self.state.render_delay_ms);
        self.check_engine(EngineStage::Render)?;

        let document = self.document.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(document) = document.as_deref() else {
            return Err(EngineError::content(EngineStage::Render, "no document loaded"));
        };

        self.state.renders.fetch_add(1, Ordering::SeqCst);
        Ok(format!("%PDF-1.7\n% mock render of {} bytes\n%%EOF\n", document.len()).into_bytes())
    }

    fn close(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.state.sessions_closed.fetch_add(1, Ordering::SeqCst);
        self.state.live_sessions.fetch_sub(1, Ordering::SeqCst);

        match self.state.take_fault(EngineStage::Close) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn launch(launcher: &MockLauncher) -> Arc<dyn Engine> {
        launcher.launch(CrashNotifier::detached(1)).unwrap()
    }

    #[test]
    fn test_render_produces_pdf_signature() {
        let launcher = MockLauncher::new();
        let engine = launch(&launcher);

        let session = engine.open_session().unwrap();
        session.load("<p>hello</p>").unwrap();
        assert!(session.is_ready().unwrap());
        let bytes = session.render().unwrap();
        session.close().unwrap();

        assert!(bytes.starts_with(b"%PDF-"));
        assert_eq!(launcher.render_count(), 1);
        assert_eq!(launcher.open_sessions(), 0);
    }

    #[test]
    fn test_fail_launches() {
        let launcher = MockLauncher::new();
        launcher.fail_launches(2);

        assert!(launcher.launch(CrashNotifier::detached(1)).is_err());
        assert!(launcher.launch(CrashNotifier::detached(2)).is_err());
        assert!(launcher.launch(CrashNotifier::detached(3)).is_ok());
        assert_eq!(launcher.launch_count(), 3);
    }

    #[test]
    fn test_smoke_test_failure_hits_first_session_only() {
        let launcher = MockLauncher::new();
        launcher.fail_smoke_tests(1);
        let engine = launch(&launcher);

        assert!(engine.open_session().is_err());
        assert!(engine.open_session().is_ok());
    }

    #[test]
    fn test_scripted_fault_is_consumed_once() {
        let launcher = MockLauncher::new();
        launcher.fail_next(EngineStage::Render, Fault::Protocol);
        let engine = launch(&launcher);

        let session = engine.open_session().unwrap();
        session.load("x").unwrap();
        assert!(matches!(session.render(), Err(EngineError::Protocol { .. })));
        assert!(session.render().is_ok());
    }

    #[test]
    fn test_persistent_fault() {
        let launcher = MockLauncher::new();
        launcher.fail_always(EngineStage::Load, Fault::Content);
        let engine = launch(&launcher);

        let session = engine.open_session().unwrap();
        assert!(session.load("x").is_err());
        assert!(session.load("x").is_err());

        launcher.clear_faults();
        assert!(session.load("x").is_ok());
    }

    #[test]
    fn test_ready_after_polls() {
        let launcher = MockLauncher::new();
        launcher.ready_after_polls(2);
        let engine = launch(&launcher);

        let session = engine.open_session().unwrap();
        assert!(!session.is_ready().unwrap());
        assert!(!session.is_ready().unwrap());
        assert!(session.is_ready().unwrap());
    }

    #[test]
    fn test_crash_kills_engine() {
        let launcher = MockLauncher::new();
        let engine = launch(&launcher);
        assert!(engine.ping().is_ok());

        // detached notifier: nobody listens
        assert!(!launcher.crash());
        assert!(engine.ping().unwrap_err().is_disconnect());
        match engine.open_session() {
            Err(e) => assert!(e.is_disconnect()),
            Ok(_) => panic!("dead engine must not open sessions"),
        }
    }

    #[test]
    fn test_crash_fails_in_flight_session() {
        let launcher = MockLauncher::new();
        let engine = launch(&launcher);

        let session = engine.open_session().unwrap();
        session.load("<p>x</p>").unwrap();
        launcher.kill_silently();

        assert!(session.is_ready().unwrap_err().is_disconnect());
        let error = session.render().unwrap_err();
        assert!(error.is_disconnect());
        assert_eq!(error.stage(), Some(EngineStage::Render));
        assert_eq!(launcher.render_count(), 0);

        // close still succeeds so the lease is released
        session.close().unwrap();
        assert_eq!(launcher.open_sessions(), 0);
    }

    #[test]
    fn test_peak_sessions() {
        let launcher = MockLauncher::new();
        let engine = launch(&launcher);

        let a = engine.open_session().unwrap();
        let b = engine.open_session().unwrap();
        a.close().unwrap();
        a.close().unwrap();
        b.close().unwrap();

        assert_eq!(launcher.peak_sessions(), 2);
        assert_eq!(launcher.sessions_closed(), 2);
        assert_eq!(launcher.open_sessions(), 0);
    }
}
