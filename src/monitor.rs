//! Background health monitor for the live renderer process.
//!
//! Engines report most crashes themselves through their
//! [`CrashNotifier`](crate::engine::CrashNotifier). The monitor covers the
//! remaining case: a process that hangs or dies silently. It pings the
//! current process every `health_check_interval` and, after
//! `max_ping_failures` consecutive failures, posts a crash event on the
//! supervisor's event channel.
//!
//! # Threading
//!
//! Pings are blocking calls, so the monitor runs on a dedicated OS thread
//! rather than a Tokio task. It waits on a condvar instead of sleeping so
//! that shutdown wakes it immediately.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::engine::EngineEvent;
use crate::process::RendererProcess;
use crate::traits::Healthcheck;

/// How long shutdown waits for the monitor thread to exit.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Slot holding the supervisor's current process (`None` while restarting).
pub(crate) type ProcessSlot = Arc<Mutex<Option<RendererProcess>>>;

/// Handle to the monitor thread.
pub(crate) struct HealthMonitor {
    shutdown_signal: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Spawn the monitor thread.
    pub(crate) fn start(
        process: ProcessSlot,
        events: mpsc::UnboundedSender<EngineEvent>,
        interval: Duration,
        max_failures: u32,
    ) -> Self {
        let shutdown_signal = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = Arc::clone(&shutdown_signal);

        log::info!(
            "💓 Starting health monitor (interval: {:?}, max failures: {})",
            interval,
            max_failures
        );

        let handle = thread::Builder::new()
            .name("renderer-health".to_string())
            .spawn(move || run(process, events, signal, interval, max_failures));

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                // Crash notifications from the engine still work without it.
                log::error!("❌ Failed to spawn health monitor thread: {}", e);
                None
            }
        };

        Self {
            shutdown_signal,
            handle,
        }
    }

    fn signal_shutdown(&self) {
        let (lock, cvar) = &*self.shutdown_signal;
        let mut shutdown = lock.lock().unwrap_or_else(PoisonError::into_inner);
        *shutdown = true;
        cvar.notify_all();
    }

    /// Stop the thread and wait (bounded) for it to exit.
    pub(crate) async fn stop_async(&mut self) {
        self.signal_shutdown();

        let Some(handle) = self.handle.take() else {
            return;
        };

        let join_task = tokio::task::spawn_blocking(move || handle.join());
        match tokio::time::timeout(JOIN_TIMEOUT, join_task).await {
            Ok(Ok(Ok(()))) => log::info!("💓 Health monitor stopped cleanly"),
            Ok(Ok(Err(_))) => log::error!("❌ Health monitor thread panicked"),
            Ok(Err(_)) => log::error!("❌ Health monitor join task panicked"),
            Err(_) => log::error!("❌ Health monitor didn't exit within {:?}", JOIN_TIMEOUT),
        }
    }

    /// Stop the thread without a runtime; used from `Drop`.
    pub(crate) fn stop(&mut self) {
        self.signal_shutdown();

        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(()) => log::debug!("💓 Health monitor stopped"),
                Err(_) => log::error!("❌ Health monitor thread panicked"),
            }
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

fn run(
    process: ProcessSlot,
    events: mpsc::UnboundedSender<EngineEvent>,
    signal: Arc<(Mutex<bool>, Condvar)>,
    interval: Duration,
    max_failures: u32,
) {
    log::debug!("💓 Health monitor thread started");

    // (generation, consecutive failures)
    let mut failures: Option<(u64, u32)> = None;

    loop {
        let (lock, cvar) = &*signal;
        // Returns early only when the shutdown flag is set.
        let shutdown = {
            let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            let (guard, _) = cvar
                .wait_timeout_while(guard, interval, |shutdown| !*shutdown)
                .unwrap_or_else(PoisonError::into_inner);
            *guard
        };

        if shutdown || events.is_closed() {
            break;
        }

        // Snapshot without holding the lock across the ping.
        let Some(current) = process.lock().unwrap_or_else(PoisonError::into_inner).clone() else {
            log::trace!("💓 No live renderer, skipping ping");
            continue;
        };
        let generation = current.generation();

        match current.ping() {
            Ok(()) => {
                if failures.take().is_some() {
                    log::debug!("💓 Renderer generation {} healthy again", generation);
                }
            }
            Err(e) => {
                let count = match failures {
                    Some((g, n)) if g == generation => n + 1,
                    _ => 1,
                };
                failures = Some((generation, count));

                log::warn!(
                    "⚠️ Renderer generation {} ping failed ({}/{}): {}",
                    generation,
                    count,
                    max_failures,
                    e
                );

                if count >= max_failures {
                    log::error!(
                        "❌ Renderer generation {} exceeded max ping failures, reporting crash",
                        generation
                    );
                    failures = None;
                    let _ = events.send(EngineEvent::Crashed {
                        generation,
                        reason: format!("{} consecutive health checks failed: {}", count, e),
                    });
                }
            }
        }
    }

    log::debug!("💓 Health monitor thread exiting");
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CrashNotifier;
    use crate::engine::mock::MockLauncher;

    fn live_process(launcher: &MockLauncher, generation: u64) -> ProcessSlot {
        let process = RendererProcess::start(launcher, CrashNotifier::detached(generation)).unwrap();
        Arc::new(Mutex::new(Some(process)))
    }

    #[test]
    fn test_reports_crash_after_max_failures() {
        let launcher = MockLauncher::new();
        let slot = live_process(&launcher, 4);
        let (tx, mut rx) = mpsc::unbounded_channel();

        launcher.set_unhealthy(true);
        let mut monitor = HealthMonitor::start(slot, tx, Duration::from_millis(10), 3);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let event = loop {
            if let Ok(event) = rx.try_recv() {
                break event;
            }
            assert!(std::time::Instant::now() < deadline, "no crash reported");
            thread::sleep(Duration::from_millis(5));
        };
        monitor.stop();

        assert_eq!(event.generation(), 4);
        assert!(launcher.ping_count() >= 3);
    }

    #[test]
    fn test_healthy_process_is_not_reported() {
        let launcher = MockLauncher::new();
        let slot = live_process(&launcher, 1);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut monitor = HealthMonitor::start(slot, tx, Duration::from_millis(5), 1);
        thread::sleep(Duration::from_millis(60));
        monitor.stop();

        assert!(rx.try_recv().is_err());
        assert!(launcher.ping_count() > 0);
    }

    #[test]
    fn test_stop_wakes_thread_immediately() {
        let launcher = MockLauncher::new();
        let slot = live_process(&launcher, 1);
        let (tx, _rx) = mpsc::unbounded_channel();

        let mut monitor = HealthMonitor::start(slot, tx, Duration::from_secs(3600), 3);
        let started = std::time::Instant::now();
        monitor.stop();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(launcher.ping_count(), 0);
    }

    #[test]
    fn test_empty_slot_is_skipped() {
        let slot: ProcessSlot = Arc::new(Mutex::new(None));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut monitor = HealthMonitor::start(slot, tx, Duration::from_millis(5), 1);
        thread::sleep(Duration::from_millis(30));
        monitor.stop();

        assert!(rx.try_recv().is_err());
    }
}
