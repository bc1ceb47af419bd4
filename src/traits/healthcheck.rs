//! Health check trait for renderer engines.
//!
//! The supervisor's monitor thread pings the running engine at
//! [`health_check_interval`](crate::RenderConfig::health_check_interval).
//! After [`max_ping_failures`](crate::RenderConfig::max_ping_failures)
//! consecutive failures the engine is treated as crashed and restarted.
//!
//! ```text
//! Monitor Thread
//!       │
//!       ├─── ping() ──→ Engine (gen 1) ──→ ✓ OK
//!       ├─── ping() ──→ Engine (gen 1) ──→ ✗ Failed (count: 1)
//!       ├─── ping() ──→ Engine (gen 1) ──→ ✗ Failed (count: 2)
//!       └─── ping() ──→ Engine (gen 1) ──→ ✗ Failed (count: 3) ──→ crash event
//! ```

use crate::error::EngineError;

/// Trait for renderer-like objects that support health checking.
///
/// # Thread Safety
///
/// `Send + Sync` is required because pings run on the monitor thread while
/// sessions are served from the async runtime's blocking pool.
///
/// # Implementation Guidelines
///
/// - **Keep it fast**: pings run periodically for the life of the process
/// - **Don't hold locks**: release any locks before performing I/O
/// - **Clean up**: close anything opened by the probe
pub trait Healthcheck: Send + Sync {
    /// Perform a health check.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] (usually
    /// [`Disconnected`](EngineError::Disconnected) or
    /// [`Protocol`](EngineError::Protocol) at
    /// [`EngineStage::HealthCheck`](crate::EngineStage::HealthCheck)) when
    /// the engine is unresponsive.
    fn ping(&self) -> Result<(), EngineError>;
}
