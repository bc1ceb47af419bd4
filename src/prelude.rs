//! Convenient imports for common usage patterns.
//!
//! ```rust,ignore
//! use html2pdf_gate::prelude::*;
//! ```
//!
//! This imports:
//!
//! - [`RenderService`] / [`RenderServiceBuilder`] - Entry point
//! - [`RenderConfig`] / [`RenderConfigBuilder`] - Configuration
//! - [`RenderRequest`] / [`CancellationObserver`] / [`PdfDocument`] - Request and response
//! - [`RenderError`] / [`EngineError`] / [`EngineStage`] / [`Result`] - Errors
//! - [`RendererSupervisor`] / [`RendererState`] - Renderer lifecycle
//! - [`AdmissionStats`] - Admission snapshot
//! - [`EngineLauncher`] / [`ChromeLauncher`] - Engines
//! - [`Healthcheck`] - Health check trait
//! - [`SharedRenderService`] - Type alias for a shared service

pub use crate::SharedRenderService;
pub use crate::config::{RenderConfig, RenderConfigBuilder};
pub use crate::engine::{ChromeLauncher, EngineLauncher};
pub use crate::error::{EngineError, EngineStage, RenderError, Result};
pub use crate::request::{CancellationObserver, PdfDocument, RenderRequest};
pub use crate::service::{RenderService, RenderServiceBuilder};
pub use crate::stats::AdmissionStats;
pub use crate::supervisor::{RendererState, RendererSupervisor};
pub use crate::traits::Healthcheck;

// Feature-gated exports
#[cfg(feature = "env-config")]
pub use crate::config::env::{chrome_path_from_env, from_env};

#[cfg(feature = "env-config")]
pub use crate::service::init_render_service;

pub use std::sync::Arc;
