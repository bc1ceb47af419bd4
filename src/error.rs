//! Error types for the render gate.
//!
//! Two layers of errors exist:
//!
//! - [`EngineError`] is what the renderer engine (Chrome, or a mock) reports.
//!   The [`RetryPolicy`](crate::RetryPolicy) classifies these as retryable or
//!   fatal.
//! - [`RenderError`] is what callers of
//!   [`RenderService::submit`](crate::RenderService::submit) see. Each variant
//!   maps to a transport status via [`RenderError::status_code`].
//!
//! # Example
//!
//! ```rust
//! use html2pdf_gate::{RenderError, Result};
//!
//! fn render() -> Result<Vec<u8>> {
//!     Err(RenderError::InvalidInput("document is empty".to_string()))
//! }
//!
//! match render() {
//!     Ok(pdf) => println!("Generated {} bytes", pdf.len()),
//!     Err(e) if e.is_silent() => {} // client is gone, nothing to send
//!     Err(e) => eprintln!("{} ({})", e, e.status_code()),
//! }
//! ```

use std::fmt;
use std::time::Duration;

/// The step of the render pipeline an [`EngineError`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineStage {
    /// Launching the engine process.
    Launch,
    /// Opening and closing a throwaway session after launch.
    SmokeTest,
    /// Opening a per-request session.
    OpenSession,
    /// Loading the document into a session.
    Load,
    /// Waiting for the document's asynchronous readiness signal.
    WaitReady,
    /// Printing the session to PDF bytes.
    Render,
    /// Closing a session or the engine.
    Close,
    /// Periodic liveness ping.
    HealthCheck,
}

impl fmt::Display for EngineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Launch => "launch",
            Self::SmokeTest => "smoke test",
            Self::OpenSession => "open session",
            Self::Load => "load",
            Self::WaitReady => "wait ready",
            Self::Render => "render",
            Self::Close => "close",
            Self::HealthCheck => "health check",
        };
        f.write_str(name)
    }
}

/// Failures reported by the renderer engine.
///
/// Only [`Protocol`](Self::Protocol) and [`Disconnected`](Self::Disconnected)
/// are considered transient by the default
/// [`RetryPolicy`](crate::RetryPolicy). Everything else is fatal for the
/// request that hit it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// Transient session or DevTools protocol fault.
    ///
    /// Typical when a session was half-created or the engine is briefly
    /// overloaded. A fresh session usually succeeds.
    #[error("Protocol fault during {stage}: {message}")]
    Protocol {
        /// Pipeline step that failed.
        stage: EngineStage,
        /// Engine-provided description.
        message: String,
    },

    /// The connection to the engine process was lost.
    #[error("Renderer disconnected during {stage}: {message}")]
    Disconnected {
        /// Pipeline step that failed.
        stage: EngineStage,
        /// Engine-provided description.
        message: String,
    },

    /// A deadline enforced by the caller expired.
    #[error("Renderer {stage} timed out after {after:?}")]
    Timeout {
        /// Pipeline step that exceeded its deadline.
        stage: EngineStage,
        /// The deadline that was exceeded.
        after: Duration,
    },

    /// The document itself could not be loaded or printed.
    #[error("Content error during {stage}: {message}")]
    Content {
        /// Pipeline step that failed.
        stage: EngineStage,
        /// Engine-provided description.
        message: String,
    },

    /// The supervisor has no `Ready` process to hand out sessions from.
    #[error("Renderer is not ready")]
    NotReady,

    /// The engine process could not be started.
    #[error("Failed to launch renderer: {0}")]
    Launch(String),

    /// Anything else (panicked blocking task, poisoned state, ...).
    #[error("Internal renderer error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Shorthand for [`EngineError::Protocol`].
    pub fn protocol<S: Into<String>>(stage: EngineStage, message: S) -> Self {
        Self::Protocol {
            stage,
            message: message.into(),
        }
    }

    /// Shorthand for [`EngineError::Disconnected`].
    pub fn disconnected<S: Into<String>>(stage: EngineStage, message: S) -> Self {
        Self::Disconnected {
            stage,
            message: message.into(),
        }
    }

    /// Shorthand for [`EngineError::Content`].
    pub fn content<S: Into<String>>(stage: EngineStage, message: S) -> Self {
        Self::Content {
            stage,
            message: message.into(),
        }
    }

    /// The pipeline step this error is attributed to, if any.
    pub fn stage(&self) -> Option<EngineStage> {
        match self {
            Self::Protocol { stage, .. }
            | Self::Disconnected { stage, .. }
            | Self::Timeout { stage, .. }
            | Self::Content { stage, .. } => Some(*stage),
            Self::Launch(_) => Some(EngineStage::Launch),
            Self::NotReady | Self::Internal(_) => None,
        }
    }

    /// Whether the error means the engine process itself is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}

/// Errors surfaced to callers of the render gate.
///
/// # Example
///
/// ```rust
/// use html2pdf_gate::RenderError;
///
/// let error = RenderError::ServiceUnavailable("renderer restarting".to_string());
/// assert_eq!(error.status_code(), 503);
/// assert_eq!(error.error_code(), "SERVICE_UNAVAILABLE");
/// ```
#[derive(Debug, Clone, thiserror::Error)]
pub enum RenderError {
    /// No usable document was supplied. The caller must fix the request.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The supervisor is not `Ready` (starting, restarting or failed).
    ///
    /// Terminal for this request; the caller may try again later.
    #[error("Renderer unavailable: {0}")]
    ServiceUnavailable(String),

    /// The engine failed with a fatal error, or retryable faults exhausted
    /// the retry budget. `source` is the last underlying failure.
    #[error("Render failed after {attempts} attempt(s): {source}")]
    FatalEngineFault {
        /// Number of attempts made, including the first.
        attempts: u32,
        /// The failure that ended the request.
        #[source]
        source: EngineError,
    },

    /// The engine could not be launched or failed its smoke test.
    ///
    /// Nothing in this crate can work without a renderer; the hosting
    /// process should treat this as fatal and halt.
    #[error("Renderer launch failed: {0}")]
    LaunchFailure(#[source] EngineError),

    /// The client went away. Not a failure: resources were released and no
    /// response should be attempted.
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Invalid configuration provided.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RenderError {
    /// HTTP-style status code for transports.
    ///
    /// | Variant | Status |
    /// |---------|--------|
    /// | `InvalidInput` | 400 |
    /// | `ServiceUnavailable` | 503 |
    /// | `FatalEngineFault` | 500 |
    /// | `LaunchFailure` | 500 |
    /// | `Configuration` | 500 |
    /// | `ClientDisconnected` | 499 (for logs only, nothing is sent) |
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::ServiceUnavailable(_) => 503,
            Self::FatalEngineFault { .. } | Self::LaunchFailure(_) | Self::Configuration(_) => 500,
            Self::ClientDisconnected => 499,
        }
    }

    /// Stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::FatalEngineFault { .. } => "RENDER_FAILED",
            Self::LaunchFailure(_) => "LAUNCH_FAILURE",
            Self::ClientDisconnected => "CLIENT_DISCONNECTED",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }

    /// `true` when no response should be attempted at all.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::ClientDisconnected)
    }

    /// The underlying engine failure, when there is one.
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            Self::FatalEngineFault { source, .. } | Self::LaunchFailure(source) => Some(source),
            _ => None,
        }
    }
}

/// Convenience conversion from [`String`] to [`RenderError::Configuration`].
impl From<String> for RenderError {
    fn from(msg: String) -> Self {
        RenderError::Configuration(msg)
    }
}

/// Convenience conversion from `&str` to [`RenderError::Configuration`].
impl From<&str> for RenderError {
    fn from(msg: &str) -> Self {
        RenderError::Configuration(msg.to_string())
    }
}

/// Result type alias using [`RenderError`].
pub type Result<T> = std::result::Result<T, RenderError>;

// ============================================================================
// Unit Tests
// ============================================================================
