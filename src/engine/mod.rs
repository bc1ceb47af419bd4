//! Renderer engine abstraction.
//!
//! The engine is an opaque, external, stateful process (headless Chrome in
//! production). This module defines the capability the rest of the crate
//! drives it through:
//!
//! - [`EngineLauncher`] starts a new engine process.
//! - [`Engine`] is one running process: open sessions, close the process,
//!   answer health pings.
//! - [`EngineSession`] is one isolated document context (a browser tab).
//! - [`CrashNotifier`] lets the engine report, asynchronously, that the
//!   process died.
//!
//! # Available Engines
//!
//! | Launcher | Description |
//! |----------|-------------|
//! | [`ChromeLauncher`] | Headless Chrome/Chromium via `headless_chrome` |
//! | [`mock::MockLauncher`] | Scriptable engine for tests (feature-gated) |
//!
//! # Blocking Calls
//!
//! All trait methods are blocking. The supervisor and render session call
//! them through `tokio::task::spawn_blocking` and enforce deadlines on the
//! calling side, so an implementation never needs its own timeout logic.
//! A call that overruns its deadline keeps running on the blocking pool;
//! its result is discarded.
//!
//! # Custom Engine
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use html2pdf_gate::engine::{CrashNotifier, Engine, EngineLauncher};
//! use html2pdf_gate::EngineError;
//!
//! struct MyLauncher;
//!
//! impl EngineLauncher for MyLauncher {
//!     fn launch(&self, notifier: CrashNotifier) -> Result<Arc<dyn Engine>, EngineError> {
//!         // start the process, keep `notifier` to report crashes
//!         todo!()
//!     }
//! }
//! ```

mod chrome;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use chrome::{ChromeEngine, ChromeLauncher, ChromeSession, create_chrome_options};

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::EngineError;
use crate::traits::Healthcheck;

/// Starts engine processes.
///
/// # Thread Safety
///
/// `Send + Sync` because the supervisor relaunches from a background task.
pub trait EngineLauncher: Send + Sync {
    /// Launch a new engine process.
    ///
    /// `notifier` is tagged with the generation of the process being
    /// launched. The engine keeps it and calls
    /// [`CrashNotifier::notify`] if the process dies on its own.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Launch`] if the process cannot be started.
    fn launch(&self, notifier: CrashNotifier) -> Result<Arc<dyn Engine>, EngineError>;
}

/// One running engine process.
///
/// The process may host many sessions at once; how many is bounded by the
/// admission controller, not by the engine.
pub trait Engine: Healthcheck {
    /// Open a new isolated session.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Disconnected`] if the process is gone
    /// - [`EngineError::Protocol`] for transient failures
    fn open_session(&self) -> Result<Arc<dyn EngineSession>, EngineError>;

    /// Shut the process down. Idempotent.
    fn close(&self) -> Result<(), EngineError>;
}

/// A single document context inside an engine process.
///
/// Methods take `&self` so the session can be shared with blocking tasks
/// while the owner keeps a handle for cleanup.
pub trait EngineSession: Send + Sync {
    /// Identifier for log correlation.
    fn id(&self) -> u64;

    /// Load a markup document and wait for the initial navigation.
    fn load(&self, document: &str) -> Result<(), EngineError>;

    /// Whether the loaded document reports itself ready to print.
    ///
    /// Polled by the render session until `true` or the load deadline.
    fn is_ready(&self) -> Result<bool, EngineError>;

    /// Print the loaded document to PDF bytes.
    fn render(&self) -> Result<Vec<u8>, EngineError>;

    /// Release the session. Idempotent.
    fn close(&self) -> Result<(), EngineError>;
}

// ============================================================================
// Crash notification
// ============================================================================

/// Events flowing from engines to their supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The process of the given generation is gone.
    Crashed {
        /// Generation of the process that crashed.
        generation: u64,
        /// Human-readable cause.
        reason: String,
    },
}

impl EngineEvent {
    /// Generation of the process the event is about.
    pub fn generation(&self) -> u64 {
        match self {
            Self::Crashed { generation, .. } => *generation,
        }
    }
}

/// Handle an engine uses to report that its process died.
///
/// Every notification carries the generation the notifier was created
/// for; the supervisor ignores notifications about processes it has
/// already replaced.
#[derive(Debug, Clone)]
pub struct CrashNotifier {
    generation: u64,
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl CrashNotifier {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { generation, tx }
    }

    /// A notifier nobody listens to, for driving engines directly in tests.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn detached(generation: u64) -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { generation, tx }
    }

    /// Generation of the process this notifier belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report a crash. Returns `false` if the supervisor is gone.
    pub fn notify<S: Into<String>>(&self, reason: S) -> bool {
        let reason = reason.into();
        log::warn!(
            "💥 Renderer generation {} reported crash: {}",
            self.generation,
            reason
        );
        self.tx
            .send(EngineEvent::Crashed {
                generation: self.generation,
                reason,
            })
            .is_ok()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notifier_tags_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notifier = CrashNotifier::new(7, tx);

        assert!(notifier.notify("socket closed"));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.generation(), 7);
        assert_eq!(
            event,
            EngineEvent::Crashed {
                generation: 7,
                reason: "socket closed".to_string()
            }
        );
    }

    #[test]
    fn test_notifier_without_listener() {
        let notifier = CrashNotifier::detached(1);
        assert!(!notifier.notify("nobody listens"));
        assert_eq!(notifier.generation(), 1);
    }
}
