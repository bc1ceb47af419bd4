//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::time::Duration;

use html2pdf_gate::engine::mock::MockLauncher;
use html2pdf_gate::prelude::*;

/// Route crate logs to the test harness (`RUST_LOG=debug cargo test`).
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Short timeouts so failure paths finish quickly.
pub fn fast_config() -> RenderConfigBuilder {
    RenderConfigBuilder::new()
        .capacity(2)
        .load_timeout(Duration::from_secs(2))
        .render_timeout(Duration::from_secs(2))
        .ready_poll_interval(Duration::from_millis(10))
        .retry_budget(1)
        .retry_backoff(Duration::from_millis(10))
        .launch_timeout(Duration::from_secs(2))
        .max_restart_attempts(3)
        .restart_backoff(Duration::from_millis(20))
        .health_check_interval(Duration::from_secs(60))
}

/// Build a service on top of a clone of `launcher`, without starting it.
pub fn build_service(launcher: &MockLauncher, config: RenderConfig, health_monitor: bool) -> RenderService {
    RenderService::builder()
        .config(config)
        .launcher(Box::new(launcher.clone()))
        .enable_health_monitor(health_monitor)
        .build()
        .expect("service builds")
}

/// Build and start a service with the monitor disabled.
pub async fn started_service(launcher: &MockLauncher, config: RenderConfig) -> RenderService {
    let service = build_service(launcher, config, false);
    service.start().await.expect("mock renderer starts");
    service
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Fail the test if `future` does not finish within `timeout`.
pub async fn within<T>(timeout: Duration, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(timeout, future)
        .await
        .expect("operation should complete in time")
}
