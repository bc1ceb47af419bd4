//! Retry classification for engine failures.
//!
//! Only faults consistent with a momentarily unstable engine (a half-dead
//! session, a dropped protocol message) are worth another attempt with a
//! fresh session. Timeouts, content errors and an unavailable renderer are
//! not.
//!
//! | [`EngineError`] | [`FaultClass`] |
//! |-----------------|----------------|
//! | `Protocol` | `Retryable` |
//! | `Disconnected` | `Retryable` |
//! | `Timeout` | `Fatal` |
//! | `Content` | `Fatal` |
//! | `NotReady` | `Fatal` |
//! | `Launch` | `Fatal` |
//! | `Internal` | `Fatal` |
//!
//! Backoff is a fixed delay: the expected cause resolves quickly or not at
//! all, so growing the delay buys nothing.

use std::time::Duration;

use crate::config::RenderConfig;
use crate::error::{EngineError, RenderError};

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Transient; retry with a fresh session while budget remains.
    Retryable,
    /// Surface immediately.
    Fatal,
}

/// Bounded, fixed-backoff retry policy.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use html2pdf_gate::{EngineError, EngineStage, RetryPolicy};
///
/// let policy = RetryPolicy::new(2, Duration::from_millis(500));
/// let fault = EngineError::protocol(EngineStage::Render, "session closed");
///
/// assert!(policy.should_retry(&fault, 1));
/// assert!(policy.should_retry(&fault, 2));
/// assert!(!policy.should_retry(&fault, 3)); // budget spent
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    budget: u32,
    backoff: Duration,
}

impl RetryPolicy {
    /// `budget` extra attempts after the first, `backoff` between attempts.
    pub fn new(budget: u32, backoff: Duration) -> Self {
        Self { budget, backoff }
    }

    /// Policy from [`RenderConfig::retry_budget`] and
    /// [`RenderConfig::retry_backoff`].
    pub fn from_config(config: &RenderConfig) -> Self {
        Self::new(config.retry_budget, config.retry_backoff)
    }

    /// Extra attempts allowed after the first.
    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Delay before each retry.
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.budget.saturating_add(1)
    }

    /// Classify an engine failure.
    pub fn classify(error: &EngineError) -> FaultClass {
        match error {
            EngineError::Protocol { .. } | EngineError::Disconnected { .. } => FaultClass::Retryable,
            EngineError::Timeout { .. }
            | EngineError::Content { .. }
            | EngineError::NotReady
            | EngineError::Launch(_)
            | EngineError::Internal(_) => FaultClass::Fatal,
        }
    }

    /// Whether attempt number `attempt` (1-based), which failed with
    /// `error`, should be followed by another.
    pub fn should_retry(&self, error: &EngineError, attempt: u32) -> bool {
        Self::classify(error) == FaultClass::Retryable && attempt < self.max_attempts()
    }

    /// The error surfaced when a request gives up after `attempts`.
    pub fn give_up(&self, attempts: u32, error: EngineError) -> RenderError {
        RenderError::FatalEngineFault {
            attempts,
            source: error,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RenderConfig::default())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineStage;

    #[test]
    fn test_classification() {
        let retryable = [
            EngineError::protocol(EngineStage::Load, "x"),
            EngineError::disconnected(EngineStage::Render, "x"),
        ];
        for error in &retryable {
            assert_eq!(RetryPolicy::classify(error), FaultClass::Retryable, "{}", error);
        }

        let fatal = [
            EngineError::Timeout {
                stage: EngineStage::Render,
                after: Duration::from_secs(30),
            },
            EngineError::content(EngineStage::Load, "x"),
            EngineError::NotReady,
            EngineError::Launch("x".to_string()),
            EngineError::Internal("x".to_string()),
        ];
        for error in &fatal {
            assert_eq!(RetryPolicy::classify(error), FaultClass::Fatal, "{}", error);
        }
    }

    #[test]
    fn test_budget_bounds_attempts() {
        let policy = RetryPolicy::new(1, Duration::ZERO);
        let fault = EngineError::protocol(EngineStage::OpenSession, "x");

        assert_eq!(policy.max_attempts(), 2);
        assert!(policy.should_retry(&fault, 1));
        assert!(!policy.should_retry(&fault, 2));
    }

    #[test]
    fn test_zero_budget_never_retries() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        let fault = EngineError::disconnected(EngineStage::Load, "x");
        assert!(!policy.should_retry(&fault, 1));
    }

    #[test]
    fn test_fatal_is_never_retried() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let fault = EngineError::content(EngineStage::Render, "x");
        assert!(!policy.should_retry(&fault, 1));
    }

    #[test]
    fn test_defaults_from_config() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.budget(), 2);
        assert_eq!(policy.backoff(), Duration::from_millis(500));
    }

    #[test]
    fn test_give_up_keeps_cause() {
        let policy = RetryPolicy::default();
        let error = policy.give_up(3, EngineError::protocol(EngineStage::Render, "gone"));
        match error {
            RenderError::FatalEngineFault { attempts, source } => {
                assert_eq!(attempts, 3);
                assert_eq!(source.stage(), Some(EngineStage::Render));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
