//! # html2pdf-gate
//!
//! Admission control and crash-resilient supervision for a shared headless
//! Chrome renderer that turns HTML documents into PDFs.
//!
//! Rendering itself is delegated to the browser. This crate manages the
//! browser as a scarce, crash-prone resource under concurrent load:
//!
//! ## Features
//!
//! - **Bounded Concurrency**: at most `capacity` render sessions at once,
//!   excess requests wait in a strict FIFO queue
//! - **Crash Recovery**: a supervisor relaunches the renderer after a crash,
//!   with capped attempts and backoff
//! - **Health Monitoring**: background thread pings the renderer to catch
//!   silent hangs
//! - **Bounded Retries**: transient protocol faults are retried with a fresh
//!   session; everything else fails fast
//! - **Hard Deadlines**: load, readiness and render are bounded by the caller
//! - **Cancellation Checkpoints**: no work is wasted on clients that already
//!   disconnected
//! - **RAII Cleanup**: slots and engine sessions are released on every path
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │         Your Transport (HTTP, queue, ...)   │
//! └─────────────────┬───────────────────────────┘
//!                   │ submit(RenderRequest)
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │              RenderService                  │
//! │ ┌─────────────────────────────────────────┐ │
//! │ │   AdmissionController                   │ │
//! │ │   [slot] [slot] [slot]  queue: ▢ ▢ ▢    │ │
//! │ └─────────────────────────────────────────┘ │
//! │ ┌─────────────────────────────────────────┐ │
//! │ │   RenderSession (per request)           │ │
//! │ │   open → load → ready → render → close  │ │
//! │ └─────────────────────────────────────────┘ │
//! │ ┌─────────────────────────────────────────┐ │
//! │ │   RendererSupervisor                    │ │
//! │ │   state machine + health monitor        │ │
//! │ └─────────────────────────────────────────┘ │
//! └─────────────────┬───────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │        Headless Chrome (one process)        │
//! │     (managed by headless_chrome crate)      │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use html2pdf_gate::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = RenderService::builder()
//!         .config(RenderConfigBuilder::new().capacity(4).build()?)
//!         .launcher(Box::new(ChromeLauncher::with_defaults()))
//!         .build()?;
//!
//!     // Launch + smoke test; fails hard if Chrome cannot start
//!     service.start().await?;
//!
//!     let pdf = service
//!         .submit(RenderRequest::new("<h1>Invoice</h1>").with_filename("invoice.pdf"))
//!         .await?;
//!     assert_eq!(pdf.content_type(), "application/pdf");
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Configuration
//!
//! With the `env-config` feature (default), the service can be built from
//! environment variables, optionally loaded from an `app.env` file:
//!
//! ```rust,no_run
//! use html2pdf_gate::init_render_service;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = init_render_service().await?;
//!     // service is Arc<RenderService>, ready for handlers
//!     Ok(())
//! }
//! ```
//!
//! See [`config::env`] for the variable names.
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `env-config` | Environment-based configuration (default) |
//! | `serde` | `Serialize` for stats and state snapshots |
//! | `test-utils` | Enable the mock engine for testing |
//!
//! ## Error Handling
//!
//! [`RenderService::submit`] returns [`Result<PdfDocument>`](Result). Map
//! errors with [`RenderError::status_code`]; skip the response entirely
//! when [`RenderError::is_silent`]:
//!
//! ```rust,ignore
//! match service.submit(request).await {
//!     Ok(pdf) => respond(200, pdf),
//!     Err(e) if e.is_silent() => {} // client disconnected
//!     Err(e) => respond(e.status_code(), e.to_string()),
//! }
//! ```
//!
//! ## Host Termination
//!
//! The crate cannot do anything without a renderer. When the supervisor
//! gives up it enters [`RendererState::Failed`]; hosts should exit:
//!
//! ```rust,ignore
//! tokio::select! {
//!     _ = server => {}
//!     _ = service.supervisor().wait_for_failure() => std::process::exit(1),
//! }
//! ```
//!
//! ## Testing
//!
//! For testing without Chrome, enable the `test-utils` feature and use
//! [`MockLauncher`](engine::mock::MockLauncher):
//!
//! ```rust,ignore
//! use html2pdf_gate::engine::mock::{Fault, MockLauncher};
//!
//! let launcher = MockLauncher::new();
//! launcher.fail_next(EngineStage::Render, Fault::Protocol);
//!
//! let service = RenderService::builder()
//!     .launcher(Box::new(launcher.clone()))
//!     .enable_health_monitor(false)
//!     .build()?;
//! ```

#![doc(html_root_url = "https://docs.rs/html2pdf-gate/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// Modules
// ============================================================================

pub mod admission;
pub mod config;
pub mod engine;
pub mod error;
pub mod prelude;
pub mod process;
pub mod request;
pub mod retry;
pub mod service;
pub mod session;
pub mod slot;
pub mod stats;
pub mod supervisor;
pub mod traits;

// Internal modules (not publicly exposed)
pub(crate) mod monitor;

// ============================================================================
// Re-exports (Public API)
// ============================================================================

pub use admission::AdmissionController;
pub use config::{RenderConfig, RenderConfigBuilder};
pub use engine::{
    ChromeLauncher, CrashNotifier, Engine, EngineEvent, EngineLauncher, EngineSession, create_chrome_options,
};
pub use error::{EngineError, EngineStage, RenderError, Result};
pub use process::ProcessInfo;
pub use request::{CancellationObserver, DisconnectOnDrop, PdfDocument, RenderRequest};
pub use retry::{FaultClass, RetryPolicy};
pub use service::{RenderService, RenderServiceBuilder};
pub use session::{LeasedSession, RenderSession};
pub use slot::Slot;
pub use stats::AdmissionStats;
pub use supervisor::{RendererState, RendererSupervisor, RendererSupervisorBuilder};
pub use traits::Healthcheck;

// Feature-gated re-exports
#[cfg(feature = "env-config")]
pub use config::env::{chrome_path_from_env, from_env};

#[cfg(feature = "env-config")]
pub use service::init_render_service;

// ============================================================================
// Convenience type aliases
// ============================================================================

/// Shared render service type for transports.
///
/// ```rust,ignore
/// use html2pdf_gate::SharedRenderService;
///
/// let service: SharedRenderService = render_service.into_shared();
/// ```
pub type SharedRenderService = std::sync::Arc<RenderService>;
