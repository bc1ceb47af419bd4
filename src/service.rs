//! Render service: the entry point transports call.
//!
//! [`RenderService`] bundles the admission controller, the renderer
//! supervisor and the configuration, and exposes the two operations a
//! transport needs:
//!
//! - [`submit`](RenderService::submit): render one request
//! - [`is_ready`](RenderService::is_ready): readiness for health endpoints
//!
//! # Mapping Results to Responses
//!
//! | Result | Response |
//! |--------|----------|
//! | `Ok(PdfDocument)` | 200, `Content-Type: application/pdf`, attachment |
//! | `InvalidInput` | 400 |
//! | `ServiceUnavailable` | 503 |
//! | `FatalEngineFault` | 500 with the cause text |
//! | `ClientDisconnected` | nothing (client is gone) |
//!
//! # Example
//!
//! ```rust,ignore
//! use html2pdf_gate::{RenderRequest, init_render_service};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     env_logger::init();
//!
//!     let service = init_render_service().await?;
//!
//!     let pdf = service.submit(RenderRequest::new("<h1>Hello</h1>")).await?;
//!     std::fs::write(&pdf.filename, &pdf.data)?;
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use crate::admission::AdmissionController;
use crate::config::RenderConfig;
use crate::engine::EngineLauncher;
use crate::error::{RenderError, Result};
use crate::request::{PdfDocument, RenderRequest};
use crate::session::RenderSession;
use crate::stats::AdmissionStats;
use crate::supervisor::RendererSupervisor;

/// Shared render service.
///
/// Create once at startup and share behind an [`Arc`].
pub struct RenderService {
    admission: AdmissionController,
    supervisor: Arc<RendererSupervisor>,
    config: RenderConfig,
}

impl RenderService {
    /// Create a builder.
    pub fn builder() -> RenderServiceBuilder {
        RenderServiceBuilder::new()
    }

    /// Start the renderer. See [`RendererSupervisor::start`].
    ///
    /// # Errors
    ///
    /// [`RenderError::LaunchFailure`] if the renderer cannot start; the
    /// host should terminate.
    pub async fn start(&self) -> Result<()> {
        self.supervisor.start().await
    }

    /// Render a request to PDF.
    ///
    /// Suspends while the admission queue is full. See
    /// [`RenderSession::run`] for the pipeline and errors.
    pub async fn submit(&self, request: RenderRequest) -> Result<PdfDocument> {
        let session = RenderSession::new(&self.admission, &self.supervisor, &self.config);
        let result = session.run(&request).await;

        if let Err(e) = &result {
            match e {
                RenderError::ClientDisconnected => log::debug!("🔌 Request abandoned by client"),
                RenderError::InvalidInput(_) => log::debug!("Rejected request: {}", e),
                _ => log::warn!("⚠️ Render request failed ({}): {}", e.error_code(), e),
            }
        }
        result
    }

    /// `true` while the renderer is `Ready`.
    pub fn is_ready(&self) -> bool {
        self.supervisor.is_ready()
    }

    /// Current admission counts.
    pub fn admission_stats(&self) -> AdmissionStats {
        self.admission.stats()
    }

    /// The admission controller.
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// The renderer supervisor.
    pub fn supervisor(&self) -> &Arc<RendererSupervisor> {
        &self.supervisor
    }

    /// The active configuration.
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Shut the renderer down. Requests submitted afterwards fail with
    /// [`RenderError::ServiceUnavailable`].
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }

    /// Convert into `Arc` for sharing between handlers.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl std::fmt::Debug for RenderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderService")
            .field("admission", &self.admission.stats())
            .field("supervisor", &self.supervisor)
            .finish()
    }
}

// ============================================================================
// RenderServiceBuilder
// ============================================================================

/// Builder for [`RenderService`].
///
/// Either a launcher or a pre-built supervisor is required.
///
/// # Example
///
/// ```rust,ignore
/// use html2pdf_gate::{ChromeLauncher, RenderConfigBuilder, RenderService};
///
/// let service = RenderService::builder()
///     .config(RenderConfigBuilder::new().capacity(4).build()?)
///     .launcher(Box::new(ChromeLauncher::with_defaults()))
///     .build()?;
/// service.start().await?;
/// ```
pub struct RenderServiceBuilder {
    config: Option<RenderConfig>,
    launcher: Option<Box<dyn EngineLauncher>>,
    supervisor: Option<Arc<RendererSupervisor>>,
    enable_health_monitor: bool,
}

impl RenderServiceBuilder {
    /// Create a builder with defaults.
    pub fn new() -> Self {
        Self {
            config: None,
            launcher: None,
            supervisor: None,
            enable_health_monitor: true,
        }
    }

    /// Set configuration (defaults to [`RenderConfig::default`], or the
    /// supervisor's configuration when one is provided).
    pub fn config(mut self, config: RenderConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Engine launcher for a new supervisor.
    pub fn launcher(mut self, launcher: Box<dyn EngineLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Use an existing supervisor instead of creating one.
    pub fn supervisor(mut self, supervisor: Arc<RendererSupervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    /// Enable or disable the health monitor of a new supervisor.
    pub fn enable_health_monitor(mut self, enable: bool) -> Self {
        self.enable_health_monitor = enable;
        self
    }

    /// Build the service. The renderer is not started yet.
    ///
    /// # Errors
    ///
    /// [`RenderError::Configuration`] if neither a launcher nor a
    /// supervisor was provided.
    pub fn build(self) -> Result<RenderService> {
        let (supervisor, config) = match (self.supervisor, self.launcher) {
            (Some(supervisor), _) => {
                let config = self.config.unwrap_or_else(|| supervisor.config().clone());
                (supervisor, config)
            }
            (None, Some(launcher)) => {
                let config = self.config.unwrap_or_default();
                let supervisor = RendererSupervisor::builder()
                    .config(config.clone())
                    .launcher(launcher)
                    .enable_health_monitor(self.enable_health_monitor)
                    .build()?;
                (Arc::new(supervisor), config)
            }
            (None, None) => {
                return Err(RenderError::Configuration(
                    "No engine launcher or supervisor provided".to_string(),
                ));
            }
        };

        log::debug!("🔧 Render service built (capacity {})", config.capacity);

        Ok(RenderService {
            admission: AdmissionController::new(config.capacity),
            supervisor,
            config,
        })
    }
}

impl Default for RenderServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Environment Initialization (feature-gated)
// ============================================================================

/// Build and start a Chrome-backed service from environment variables.
///
/// Reads configuration with [`config::env::from_env`](crate::config::env::from_env)
/// and the optional `CHROME_PATH`.
///
/// # Errors
///
/// - [`RenderError::Configuration`] for invalid configuration
/// - [`RenderError::LaunchFailure`] if Chrome cannot be started; the host
///   should terminate
#[cfg(feature = "env-config")]
pub async fn init_render_service() -> Result<Arc<RenderService>> {
    use crate::config::env::{chrome_path_from_env, from_env};
    use crate::engine::ChromeLauncher;

    log::info!("🚀 Initializing render service from environment...");

    let config = from_env()?;

    let launcher = match chrome_path_from_env() {
        Some(path) => {
            log::info!("🔧 Using custom Chrome path: {}", path);
            ChromeLauncher::with_path(path)
        }
        None => {
            log::info!("🔧 Using auto-detected Chrome browser");
            ChromeLauncher::with_defaults()
        }
    };

    // Stray CDP calls never outlive the longest request deadline.
    let launcher = launcher.operation_timeout(config.load_timeout.max(config.render_timeout));

    let service = RenderService::builder()
        .config(config)
        .launcher(Box::new(launcher))
        .build()?;

    service.start().await.map_err(|e| {
        log::error!("❌ Failed to start renderer: {}", e);
        e
    })?;

    log::info!(
        "✅ Render service ready - capacity: {}",
        service.admission_stats().capacity
    );

    Ok(service.into_shared())
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockLauncher;

    #[test]
    fn test_builder_requires_engine() {
        let result = RenderService::builder().build();
        assert!(matches!(result, Err(RenderError::Configuration(_))));
    }

    #[test]
    fn test_builder_uses_supervisor_config() {
        let config = crate::RenderConfigBuilder::new().capacity(7).build().unwrap();
        let supervisor = RendererSupervisor::builder()
            .config(config)
            .launcher(Box::new(MockLauncher::new()))
            .build()
            .unwrap();

        let service = RenderService::builder()
            .supervisor(Arc::new(supervisor))
            .build()
            .unwrap();

        assert_eq!(service.admission_stats().capacity, 7);
        assert!(!service.is_ready());
    }

    #[tokio::test]
    async fn test_submit_round_trip() {
        let launcher = MockLauncher::new();
        let service = RenderService::builder()
            .launcher(Box::new(launcher.clone()))
            .enable_health_monitor(false)
            .build()
            .unwrap();
        service.start().await.unwrap();
        assert!(service.is_ready());

        let pdf = service
            .submit(RenderRequest::new("<h1>Invoice</h1>").with_filename("invoice.pdf"))
            .await
            .unwrap();

        assert!(pdf.is_pdf());
        assert_eq!(pdf.content_disposition(), "attachment; filename=\"invoice.pdf\"");
        assert_eq!(launcher.render_count(), 1);

        service.shutdown().await;
        assert!(!service.is_ready());
    }
}
