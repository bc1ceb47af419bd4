//! Traits shared by renderer implementations.
//!
//! - [`Healthcheck`]: cheap liveness probe used by the supervisor's health
//!   monitor to notice a renderer that died without saying so.
//!
//! # Implementing Custom Health Checks
//!
//! ```rust,ignore
//! use html2pdf_gate::{EngineError, EngineStage, Healthcheck};
//!
//! struct MyRenderer;
//!
//! impl Healthcheck for MyRenderer {
//!     fn ping(&self) -> Result<(), EngineError> {
//!         // open and close something cheap
//!         Ok(())
//!     }
//! }
//! ```

mod healthcheck;

pub use healthcheck::Healthcheck;
