//! Configuration for admission, timeouts, retries and renderer supervision.
//!
//! This module provides [`RenderConfig`] and [`RenderConfigBuilder`].
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use html2pdf_gate::RenderConfigBuilder;
//!
//! let config = RenderConfigBuilder::new()
//!     .capacity(8)
//!     .render_timeout(Duration::from_secs(45))
//!     .build()
//!     .expect("Invalid configuration");
//!
//! assert_eq!(config.capacity, 8);
//! assert_eq!(config.retry_budget, 2);
//! ```
//!
//! # Environment Configuration
//!
//! When the `env-config` feature is enabled, configuration can be loaded
//! from environment variables and an optional `app.env` file. See
//! [`mod@env`] for the variable names.

use std::time::Duration;

/// Configuration for the render gate.
///
/// | Field | Default | Description |
/// |-------|---------|-------------|
/// | `capacity` | 5 | Concurrent render sessions |
/// | `load_timeout` | 30s | Load + wait-ready deadline |
/// | `render_timeout` | 30s | PDF generation deadline |
/// | `ready_poll_interval` | 100ms | Readiness polling cadence |
/// | `retry_budget` | 2 | Extra attempts for transient faults |
/// | `retry_backoff` | 500ms | Fixed delay between attempts |
/// | `launch_timeout` | 60s | Launch + smoke test deadline |
/// | `max_restart_attempts` | 3 | Relaunches before giving up |
/// | `restart_backoff` | 1s | Base delay between relaunches |
/// | `health_check_interval` | 15s | Liveness ping cadence |
/// | `max_ping_failures` | 3 | Failed pings treated as a crash |
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Maximum number of render sessions running at once.
    ///
    /// Requests beyond this are queued in arrival order. This is the only
    /// bound on how many sessions the shared Chrome process hosts.
    pub capacity: usize,

    /// Deadline for loading a document and waiting for it to settle.
    ///
    /// Load and wait-ready share this one envelope.
    pub load_timeout: Duration,

    /// Deadline for printing a loaded document to PDF.
    pub render_timeout: Duration,

    /// How often the document readiness signal is polled.
    pub ready_poll_interval: Duration,

    /// Extra attempts allowed after a retryable engine fault.
    pub retry_budget: u32,

    /// Fixed delay before each retry.
    pub retry_backoff: Duration,

    /// Deadline for launching the engine and completing the smoke test.
    pub launch_timeout: Duration,

    /// Consecutive failed relaunch attempts after a crash before the
    /// supervisor gives up and enters `Failed`. Also caps consecutive
    /// crashes: a process that dies within `health_check_interval` of its
    /// launch does not reset the count.
    pub max_restart_attempts: u32,

    /// Base delay between relaunch attempts. The first relaunch is
    /// immediate; attempt `k` waits `restart_backoff * (k - 1)`. The same
    /// scale applies to consecutive crashes.
    pub restart_backoff: Duration,

    /// Interval between liveness pings of the running engine.
    pub health_check_interval: Duration,

    /// Consecutive failed pings after which the engine is treated as crashed.
    pub max_ping_failures: u32,
}

impl Default for RenderConfig {
    /// Production defaults.
    ///
    /// ```rust
    /// use html2pdf_gate::RenderConfig;
    /// use std::time::Duration;
    ///
    /// let config = RenderConfig::default();
    /// assert_eq!(config.capacity, 5);
    /// assert_eq!(config.retry_budget, 2);
    /// assert_eq!(config.retry_backoff, Duration::from_millis(500));
    /// ```
    fn default() -> Self {
        Self {
            capacity: 5,
            load_timeout: Duration::from_secs(30),
            render_timeout: Duration::from_secs(30),
            ready_poll_interval: Duration::from_millis(100),
            retry_budget: 2,
            retry_backoff: Duration::from_millis(500),
            launch_timeout: Duration::from_secs(60),
            max_restart_attempts: 3,
            restart_backoff: Duration::from_secs(1),
            health_check_interval: Duration::from_secs(15),
            max_ping_failures: 3,
        }
    }
}

/// Builder for [`RenderConfig`] with validation.
///
/// # Validation
///
/// The [`build()`](Self::build) method checks:
/// - `capacity` must be greater than 0
/// - `load_timeout`, `render_timeout`, `launch_timeout`,
///   `ready_poll_interval` and `health_check_interval` must be non-zero
/// - `ready_poll_interval` must not exceed `load_timeout`
/// - `max_ping_failures` must be greater than 0
pub struct RenderConfigBuilder {
    config: RenderConfig,
}

impl RenderConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            config: RenderConfig::default(),
        }
    }

    /// Set admission capacity (must be > 0).
    ///
    /// ```rust
    /// use html2pdf_gate::RenderConfigBuilder;
    ///
    /// let config = RenderConfigBuilder::new().capacity(2).build().unwrap();
    /// assert_eq!(config.capacity, 2);
    /// ```
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Set the load + wait-ready deadline.
    pub fn load_timeout(mut self, timeout: Duration) -> Self {
        self.config.load_timeout = timeout;
        self
    }

    /// Set the PDF generation deadline.
    pub fn render_timeout(mut self, timeout: Duration) -> Self {
        self.config.render_timeout = timeout;
        self
    }

    /// Set the readiness polling cadence.
    pub fn ready_poll_interval(mut self, interval: Duration) -> Self {
        self.config.ready_poll_interval = interval;
        self
    }

    /// Set the number of extra attempts for retryable faults.
    ///
    /// ```rust
    /// use html2pdf_gate::RenderConfigBuilder;
    ///
    /// let config = RenderConfigBuilder::new().retry_budget(0).build().unwrap();
    /// assert_eq!(config.retry_budget, 0);
    /// ```
    pub fn retry_budget(mut self, budget: u32) -> Self {
        self.config.retry_budget = budget;
        self
    }

    /// Set the fixed delay between attempts.
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.retry_backoff = backoff;
        self
    }

    /// Set the launch + smoke test deadline.
    pub fn launch_timeout(mut self, timeout: Duration) -> Self {
        self.config.launch_timeout = timeout;
        self
    }

    /// Set how many consecutive relaunches are tried after a crash.
    pub fn max_restart_attempts(mut self, attempts: u32) -> Self {
        self.config.max_restart_attempts = attempts;
        self
    }

    /// Set the base delay between relaunch attempts.
    pub fn restart_backoff(mut self, backoff: Duration) -> Self {
        self.config.restart_backoff = backoff;
        self
    }

    /// Set the liveness ping cadence.
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.config.health_check_interval = interval;
        self
    }

    /// Set consecutive ping failures treated as a crash.
    pub fn max_ping_failures(mut self, failures: u32) -> Self {
        self.config.max_ping_failures = failures;
        self
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated constraint.
    ///
    /// ```rust
    /// use html2pdf_gate::RenderConfigBuilder;
    ///
    /// assert!(RenderConfigBuilder::new().capacity(0).build().is_err());
    /// assert!(RenderConfigBuilder::new().capacity(3).build().is_ok());
    /// ```
    pub fn build(self) -> std::result::Result<RenderConfig, String> {
        let config = self.config;

        if config.capacity == 0 {
            return Err("capacity must be greater than 0".to_string());
        }

        for (name, value) in [
            ("load_timeout", config.load_timeout),
            ("render_timeout", config.render_timeout),
            ("launch_timeout", config.launch_timeout),
            ("ready_poll_interval", config.ready_poll_interval),
            ("health_check_interval", config.health_check_interval),
        ] {
            if value.is_zero() {
                return Err(format!("{} must be greater than 0", name));
            }
        }

        if config.ready_poll_interval > config.load_timeout {
            return Err("ready_poll_interval cannot exceed load_timeout".to_string());
        }

        if config.max_ping_failures == 0 {
            return Err("max_ping_failures must be greater than 0".to_string());
        }

        Ok(config)
    }
}

impl Default for RenderConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Environment Configuration (feature-gated)
// ============================================================================

/// Environment-based configuration loading.
///
/// Only available with the `env-config` feature. Variables are read after an
/// optional `app.env` file in the current directory has been loaded.
///
/// | Variable | Type | Default |
/// |----------|------|---------|
/// | `RENDER_CAPACITY` | usize | 5 |
/// | `RENDER_LOAD_TIMEOUT_SECONDS` | u64 | 30 |
/// | `RENDER_TIMEOUT_SECONDS` | u64 | 30 |
/// | `RENDER_READY_POLL_MS` | u64 | 100 |
/// | `RENDER_RETRY_BUDGET` | u32 | 2 |
/// | `RENDER_RETRY_BACKOFF_MS` | u64 | 500 |
/// | `RENDERER_LAUNCH_TIMEOUT_SECONDS` | u64 | 60 |
/// | `RENDERER_MAX_RESTARTS` | u32 | 3 |
/// | `RENDERER_RESTART_BACKOFF_MS` | u64 | 1000 |
/// | `RENDERER_PING_INTERVAL_SECONDS` | u64 | 15 |
/// | `RENDERER_MAX_PING_FAILURES` | u32 | 3 |
/// | `CHROME_PATH` | String | auto |
///
/// # Example `app.env` File
///
/// ```text
/// RENDER_CAPACITY=4
/// RENDER_TIMEOUT_SECONDS=45
/// RENDERER_MAX_RESTARTS=5
/// # CHROME_PATH=/usr/bin/chromium
/// ```
#[cfg(feature = "env-config")]
pub mod env {
    use std::str::FromStr;

    use super::*;
    use crate::error::RenderError;

    /// Default environment file name.
    pub const ENV_FILE_NAME: &str = "app.env";

    /// Load environment variables from `app.env`.
    pub fn load_env_file() -> Result<std::path::PathBuf, dotenvy::Error> {
        dotenvy::from_filename(ENV_FILE_NAME)
    }

    fn var_or<T: FromStr>(name: &str, default: T) -> T {
        std::env::var(name)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to the defaults of
    /// [`RenderConfig::default`].
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Configuration`] if the resulting values fail
    /// validation.
    pub fn from_env() -> Result<RenderConfig, RenderError> {
        match load_env_file() {
            Ok(path) => log::info!("📄 Loaded configuration from: {:?}", path),
            Err(e) => log::debug!(
                "📄 No {} file found or failed to load: {} (using environment variables and defaults)",
                ENV_FILE_NAME,
                e
            ),
        }

        let defaults = RenderConfig::default();

        let capacity = var_or("RENDER_CAPACITY", defaults.capacity);
        let load_timeout_secs = var_or("RENDER_LOAD_TIMEOUT_SECONDS", defaults.load_timeout.as_secs());
        let render_timeout_secs = var_or("RENDER_TIMEOUT_SECONDS", defaults.render_timeout.as_secs());
        let ready_poll_ms = var_or(
            "RENDER_READY_POLL_MS",
            defaults.ready_poll_interval.as_millis() as u64,
        );
        let retry_budget = var_or("RENDER_RETRY_BUDGET", defaults.retry_budget);
        let retry_backoff_ms = var_or(
            "RENDER_RETRY_BACKOFF_MS",
            defaults.retry_backoff.as_millis() as u64,
        );
        let launch_timeout_secs = var_or(
            "RENDERER_LAUNCH_TIMEOUT_SECONDS",
            defaults.launch_timeout.as_secs(),
        );
        let max_restarts = var_or("RENDERER_MAX_RESTARTS", defaults.max_restart_attempts);
        let restart_backoff_ms = var_or(
            "RENDERER_RESTART_BACKOFF_MS",
            defaults.restart_backoff.as_millis() as u64,
        );
        let ping_interval_secs = var_or(
            "RENDERER_PING_INTERVAL_SECONDS",
            defaults.health_check_interval.as_secs(),
        );
        let max_ping_failures = var_or("RENDERER_MAX_PING_FAILURES", defaults.max_ping_failures);

        log::info!("🔧 Loading render configuration from environment:");
        log::info!("   - Capacity: {}", capacity);
        log::info!("   - Load timeout: {}s", load_timeout_secs);
        log::info!("   - Render timeout: {}s", render_timeout_secs);
        log::info!("   - Retry budget: {} (backoff {}ms)", retry_budget, retry_backoff_ms);
        log::info!("   - Launch timeout: {}s", launch_timeout_secs);
        log::info!("   - Max restarts: {} (backoff {}ms)", max_restarts, restart_backoff_ms);
        log::info!(
            "   - Health check: every {}s, {} failures tolerated",
            ping_interval_secs,
            max_ping_failures
        );

        RenderConfigBuilder::new()
            .capacity(capacity)
            .load_timeout(Duration::from_secs(load_timeout_secs))
            .render_timeout(Duration::from_secs(render_timeout_secs))
            .ready_poll_interval(Duration::from_millis(ready_poll_ms))
            .retry_budget(retry_budget)
            .retry_backoff(Duration::from_millis(retry_backoff_ms))
            .launch_timeout(Duration::from_secs(launch_timeout_secs))
            .max_restart_attempts(max_restarts)
            .restart_backoff(Duration::from_millis(restart_backoff_ms))
            .health_check_interval(Duration::from_secs(ping_interval_secs))
            .max_ping_failures(max_ping_failures)
            .build()
            .map_err(RenderError::Configuration)
    }

    /// Get the Chrome binary path from `CHROME_PATH`.
    ///
    /// Call [`from_env`] or [`load_env_file`] first if the path lives in
    /// `app.env`.
    pub fn chrome_path_from_env() -> Option<String> {
        std::env::var("CHROME_PATH").ok().filter(|p| !p.trim().is_empty())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = RenderConfigBuilder::new()
            .capacity(10)
            .load_timeout(Duration::from_secs(20))
            .render_timeout(Duration::from_secs(40))
            .retry_budget(1)
            .retry_backoff(Duration::from_millis(50))
            .build()
            .unwrap();

        assert_eq!(config.capacity, 10);
        assert_eq!(config.load_timeout.as_secs(), 20);
        assert_eq!(config.render_timeout.as_secs(), 40);
        assert_eq!(config.retry_budget, 1);
        assert_eq!(config.retry_backoff.as_millis(), 50);
    }

    #[test]
    fn test_config_rejects_zero_capacity() {
        let err = RenderConfigBuilder::new().capacity(0).build().unwrap_err();
        assert!(
            err.contains("capacity must be greater than 0"),
            "Expected validation error message, got: {}",
            err
        );
    }

    #[test]
    fn test_config_rejects_zero_timeouts() {
        let err = RenderConfigBuilder::new()
            .render_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.contains("render_timeout"), "got: {}", err);

        let err = RenderConfigBuilder::new()
            .health_check_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.contains("health_check_interval"), "got: {}", err);
    }

    #[test]
    fn test_config_poll_interval_bounded_by_load_timeout() {
        let result = RenderConfigBuilder::new()
            .load_timeout(Duration::from_millis(50))
            .ready_poll_interval(Duration::from_millis(100))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_rejects_zero_ping_failures() {
        assert!(RenderConfigBuilder::new().max_ping_failures(0).build().is_err());
    }

    #[test]
    fn test_config_defaults() {
        let config = RenderConfig::default();

        assert_eq!(config.capacity, 5);
        assert_eq!(config.retry_budget, 2, "two extra attempts beyond the first");
        assert_eq!(config.retry_backoff, Duration::from_millis(500));
        assert_eq!(config.load_timeout, Duration::from_secs(30));
        assert_eq!(config.render_timeout, Duration::from_secs(30));
        assert_eq!(config.launch_timeout, Duration::from_secs(60));
        assert_eq!(config.max_restart_attempts, 3);
        assert_eq!(config.health_check_interval, Duration::from_secs(15));
        assert_eq!(config.max_ping_failures, 3);
    }

    #[test]
    fn test_zero_restart_attempts_allowed() {
        let config = RenderConfigBuilder::new()
            .max_restart_attempts(0)
            .build()
            .unwrap();
        assert_eq!(config.max_restart_attempts, 0);
    }

    #[test]
    fn test_builder_default() {
        let builder: RenderConfigBuilder = Default::default();
        let config = builder.build().unwrap();
        assert_eq!(config.capacity, RenderConfig::default().capacity);
    }
}
