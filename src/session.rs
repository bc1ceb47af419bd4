//! Per-request render driver.
//!
//! [`RenderSession`] runs one [`RenderRequest`] through the pipeline:
//!
//! ```text
//! validate ─▶ acquire slot ─▶ ✓ ─▶ open session ─▶ load ─▶ ✓ ─▶ wait ready ─▶ render ─▶ ✓ ─▶ PDF
//!                                        ▲                                             │
//!                                        └──── retryable fault: close, backoff ◀───────┘
//!
//! ✓ = cancellation checkpoint
//! ```
//!
//! # Deadlines
//!
//! Load and wait-ready share one envelope of
//! [`load_timeout`](RenderConfig::load_timeout); render has its own
//! [`render_timeout`](RenderConfig::render_timeout). Engine calls are
//! blocking and run on the blocking pool; an expired deadline abandons the
//! call (its result is discarded) and fails the request.
//!
//! # Cleanup
//!
//! On every exit path the engine session is closed first, then the slot is
//! released. A close error is logged and never replaces the request's own
//! result. If the request future itself is dropped, the [`LeasedSession`]
//! and [`Slot`](crate::Slot) guards perform the same releases on drop.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::admission::AdmissionController;
use crate::config::RenderConfig;
use crate::engine::EngineSession;
use crate::error::{EngineError, EngineStage, RenderError, Result};
use crate::request::{CancellationObserver, PdfDocument, RenderRequest};
use crate::retry::RetryPolicy;
use crate::supervisor::RendererSupervisor;

/// Upper bound on waiting for an engine session to close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// LeasedSession
// ============================================================================

/// An engine session handed out by the supervisor.
///
/// Carries the generation of the process it belongs to. Close it with
/// [`close`](Self::close); if it is dropped instead, the close is
/// scheduled on the blocking pool (or run inline outside a runtime).
pub struct LeasedSession {
    session: Arc<dyn EngineSession>,
    generation: u64,
    closed: bool,
}

impl LeasedSession {
    pub(crate) fn new(session: Arc<dyn EngineSession>, generation: u64) -> Self {
        Self {
            session,
            generation,
            closed: false,
        }
    }

    /// Generation of the renderer process hosting this session.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Engine-assigned session id.
    pub fn id(&self) -> u64 {
        self.session.id()
    }

    /// Shared handle for blocking calls.
    pub(crate) fn engine_session(&self) -> Arc<dyn EngineSession> {
        Arc::clone(&self.session)
    }

    /// Close the session, logging (not returning) any error.
    pub async fn close(mut self) {
        self.closed = true;
        let session = Arc::clone(&self.session);
        let id = session.id();

        let task = tokio::task::spawn_blocking(move || session.close());
        match tokio::time::timeout(CLOSE_TIMEOUT, task).await {
            Ok(Ok(Ok(()))) => log::trace!("Session {} closed", id),
            Ok(Ok(Err(e))) => log::warn!("⚠️ Failed to close session {} (continuing anyway): {}", id, e),
            Ok(Err(e)) => log::warn!("⚠️ Session {} close task failed: {}", id, e),
            Err(_) => log::warn!("⚠️ Session {} did not close within {:?}", id, CLOSE_TIMEOUT),
        }
    }
}

fn close_quietly(session: &dyn EngineSession) {
    if let Err(e) = session.close() {
        log::warn!("⚠️ Failed to close session {} (continuing anyway): {}", session.id(), e);
    }
}

impl Drop for LeasedSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let session = Arc::clone(&self.session);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || close_quietly(session.as_ref()));
            }
            Err(_) => close_quietly(session.as_ref()),
        }
    }
}

impl std::fmt::Debug for LeasedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeasedSession")
            .field("id", &self.session.id())
            .field("generation", &self.generation)
            .field("closed", &self.closed)
            .finish()
    }
}

// ============================================================================
// RenderSession
// ============================================================================

/// Why an attempt ended without bytes.
enum AttemptError {
    /// Engine failure, subject to the retry policy.
    Engine(EngineError),
    /// Terminal outcome that bypasses the retry policy.
    Abort(RenderError),
}

impl From<EngineError> for AttemptError {
    fn from(error: EngineError) -> Self {
        Self::Engine(error)
    }
}

impl From<RenderError> for AttemptError {
    fn from(error: RenderError) -> Self {
        Self::Abort(error)
    }
}

/// Drives one request against shared admission and supervisor state.
///
/// Usually reached through [`RenderService::submit`](crate::RenderService::submit).
#[derive(Debug)]
pub struct RenderSession<'a> {
    admission: &'a AdmissionController,
    supervisor: &'a RendererSupervisor,
    config: &'a RenderConfig,
    policy: RetryPolicy,
}

impl<'a> RenderSession<'a> {
    /// Create a driver using `config`'s deadlines and retry settings.
    pub fn new(
        admission: &'a AdmissionController,
        supervisor: &'a RendererSupervisor,
        config: &'a RenderConfig,
    ) -> Self {
        Self {
            admission,
            supervisor,
            config,
            policy: RetryPolicy::from_config(config),
        }
    }

    /// Render `request` to a PDF.
    ///
    /// # Errors
    ///
    /// - [`RenderError::InvalidInput`]: missing or blank document (no slot taken)
    /// - [`RenderError::ClientDisconnected`]: the observer fired at a checkpoint
    /// - [`RenderError::ServiceUnavailable`]: the supervisor was not `Ready`
    /// - [`RenderError::FatalEngineFault`]: fatal engine error or retries exhausted
    pub async fn run(&self, request: &RenderRequest) -> Result<PdfDocument> {
        let document = request.validated_document()?;
        let observer = request.observer();

        let slot = self.admission.acquire().await;
        log::debug!("🎫 Request {} admitted ({} bytes)", slot.id(), document.len());

        checkpoint(observer, "admission")?;

        let mut attempt: u32 = 0;
        let result = loop {
            attempt += 1;

            match self.attempt(document, observer).await {
                Ok(bytes) => break Ok(bytes),
                Err(AttemptError::Abort(e)) => break Err(e),
                Err(AttemptError::Engine(e)) if self.policy.should_retry(&e, attempt) => {
                    log::warn!(
                        "⚠️ Request {} attempt {}/{} failed, retrying in {:?}: {}",
                        slot.id(),
                        attempt,
                        self.policy.max_attempts(),
                        self.policy.backoff(),
                        e
                    );
                    tokio::time::sleep(self.policy.backoff()).await;
                    checkpoint(observer, "retry backoff")?;
                }
                Err(AttemptError::Engine(e)) => {
                    log::error!("❌ Request {} failed after {} attempt(s): {}", slot.id(), attempt, e);
                    break Err(self.policy.give_up(attempt, e));
                }
            }
        };

        // slot released on drop, after the session was closed in attempt()
        drop(slot);

        let bytes = result?;
        log::info!(
            "✅ PDF generated successfully ({} bytes input → {} bytes output, {} attempt(s))",
            document.len(),
            bytes.len(),
            attempt
        );
        Ok(PdfDocument::new(bytes, request.filename_or_default()))
    }

    /// One attempt with a fresh engine session.
    async fn attempt(
        &self,
        document: &str,
        observer: &CancellationObserver,
    ) -> std::result::Result<Vec<u8>, AttemptError> {
        let session = self.supervisor.open_session().await.map_err(|e| match e {
            EngineError::NotReady => AttemptError::Abort(RenderError::ServiceUnavailable(format!(
                "renderer is {}",
                self.supervisor.state()
            ))),
            other => AttemptError::Engine(other),
        })?;

        let result = self.drive(&session, document, observer).await;
        session.close().await;
        result
    }

    /// Load, wait for readiness and render inside an open session.
    async fn drive(
        &self,
        session: &LeasedSession,
        document: &str,
        observer: &CancellationObserver,
    ) -> std::result::Result<Vec<u8>, AttemptError> {
        let load_timeout = self.config.load_timeout;
        let deadline = Instant::now() + load_timeout;

        let engine = session.engine_session();
        let owned = document.to_owned();
        call_until(deadline, EngineStage::Load, load_timeout, move || engine.load(&owned)).await?;

        checkpoint(observer, "load")?;

        let interval = self.config.ready_poll_interval;
        loop {
            // A poll issued at the deadline still gets one interval to answer.
            let poll_deadline = deadline.max(Instant::now() + interval);
            let engine = session.engine_session();
            if call_until(poll_deadline, EngineStage::WaitReady, load_timeout, move || engine.is_ready()).await? {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(EngineError::Timeout {
                    stage: EngineStage::WaitReady,
                    after: load_timeout,
                }
                .into());
            }
            tokio::time::sleep(deadline.saturating_duration_since(now).min(interval)).await;
        }

        let render_timeout = self.config.render_timeout;
        let engine = session.engine_session();
        let bytes = call_until(
            Instant::now() + render_timeout,
            EngineStage::Render,
            render_timeout,
            move || engine.render(),
        )
        .await?;

        checkpoint(observer, "render")?;
        Ok(bytes)
    }
}

/// Abort with [`RenderError::ClientDisconnected`] if the client is gone.
fn checkpoint(observer: &CancellationObserver, after: &str) -> Result<()> {
    if observer.is_disconnected() {
        log::debug!("🔌 Client gone after {}, abandoning request", after);
        return Err(RenderError::ClientDisconnected);
    }
    Ok(())
}

/// Run a blocking engine call with a hard deadline.
///
/// `envelope` is the configured limit reported in the timeout error.
async fn call_until<T, F>(
    deadline: Instant,
    stage: EngineStage,
    envelope: Duration,
    call: F,
) -> std::result::Result<T, EngineError>
where
    F: FnOnce() -> std::result::Result<T, EngineError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout_at(deadline, tokio::task::spawn_blocking(call)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(EngineError::Internal(format!("{} task failed: {}", stage, join_err))),
        Err(_) => {
            log::warn!("⏰ Renderer {} exceeded {:?}", stage, envelope);
            Err(EngineError::Timeout {
                stage,
                after: envelope,
            })
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
