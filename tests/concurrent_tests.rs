//! Concurrency tests for admission and the render pipeline.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{fast_config, init_logging, started_service, wait_until};
use html2pdf_gate::AdmissionController;
use html2pdf_gate::engine::mock::{Fault, MockLauncher};
use html2pdf_gate::prelude::*;
use tokio::task::JoinSet;

/// Many concurrent submits never exceed capacity and all complete.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submits_respect_capacity() {
    init_logging();
    let launcher = MockLauncher::new();
    launcher.render_delay(Duration::from_millis(20));
    let service = started_service(&launcher, fast_config().capacity(3).build().unwrap())
        .await
        .into_shared();

    let mut tasks = JoinSet::new();
    for i in 0..20 {
        let service = Arc::clone(&service);
        tasks.spawn(async move { service.submit(RenderRequest::new(format!("<p>request {i}</p>"))).await });
    }

    while let Some(result) = tasks.join_next().await {
        let pdf = result.expect("task should not panic").expect("render should succeed");
        assert!(pdf.is_pdf());
    }

    assert_eq!(launcher.render_count(), 20);
    assert!(launcher.peak_sessions() <= 3, "peak {} over capacity", launcher.peak_sessions());
    assert_eq!(launcher.open_sessions(), 0);
    assert!(service.admission_stats().is_idle());

    service.shutdown().await;
}

/// Observed admission counts stay within capacity under contention.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_admission_stats_never_exceed_capacity() {
    let admission = Arc::new(AdmissionController::new(2));
    let mut stats_rx = admission.subscribe();

    let watcher = tokio::spawn(async move {
        let mut peak = 0;
        while stats_rx.changed().await.is_ok() {
            let stats = *stats_rx.borrow_and_update();
            assert!(stats.active <= stats.capacity);
            peak = peak.max(stats.active);
        }
        peak
    });

    let mut tasks = JoinSet::new();
    for _ in 0..50 {
        let admission = Arc::clone(&admission);
        tasks.spawn(async move {
            let _slot = admission.acquire().await;
            tokio::task::yield_now().await;
        });
    }
    while let Some(result) = tasks.join_next().await {
        assert!(result.is_ok(), "Task should complete without panic");
    }

    assert!(admission.stats().is_idle());
    drop(admission);
    let peak = watcher.await.unwrap();
    assert!(peak <= 2);
}

/// Waiters are granted slots in the order they arrived.
#[tokio::test]
async fn test_fifo_grant_order() {
    let admission = Arc::new(AdmissionController::new(1));
    let order = Arc::new(Mutex::new(Vec::new()));

    let held = admission.acquire().await;

    let mut tasks = JoinSet::new();
    for i in 0..5 {
        let waiter = Arc::clone(&admission);
        let order = Arc::clone(&order);
        tasks.spawn(async move {
            let _slot = waiter.acquire().await;
            order.lock().unwrap().push(i);
            tokio::time::sleep(Duration::from_millis(2)).await;
        });
        // enqueue one at a time so arrival order is deterministic
        assert!(wait_until(Duration::from_secs(5), || admission.stats().queued == i + 1).await);
    }

    drop(held);
    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

/// Cancelled waiters in the middle of the queue do not disturb the rest.
#[tokio::test]
async fn test_cancelled_waiter_skipped() {
    let admission = Arc::new(AdmissionController::new(1));
    let order = Arc::new(Mutex::new(Vec::new()));
    let held = admission.acquire().await;

    let mut handles = Vec::new();
    for i in 0..3 {
        let waiter = Arc::clone(&admission);
        let order = Arc::clone(&order);
        handles.push(tokio::spawn(async move {
            let _slot = waiter.acquire().await;
            order.lock().unwrap().push(i);
        }));
        assert!(wait_until(Duration::from_secs(5), || admission.stats().queued == i + 1).await);
    }

    handles[1].abort();
    assert!(wait_until(Duration::from_secs(5), || admission.stats().queued == 2).await);

    drop(held);
    for (i, handle) in handles.into_iter().enumerate() {
        if i != 1 {
            handle.await.unwrap();
        }
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 2]);
    assert!(admission.stats().is_idle());
}

/// Transient faults spread over concurrent requests are absorbed by retries.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_retries() {
    let launcher = MockLauncher::new();
    let config = fast_config().capacity(4).retry_budget(3).build().unwrap();
    let service = started_service(&launcher, config).await.into_shared();

    launcher.fail_next_n(EngineStage::Render, Fault::Protocol, 3);

    let mut tasks = JoinSet::new();
    for i in 0..10 {
        let service = Arc::clone(&service);
        tasks.spawn(async move { service.submit(RenderRequest::new(format!("<p>{i}</p>"))).await });
    }
    while let Some(result) = tasks.join_next().await {
        assert!(result.unwrap().is_ok());
    }

    assert_eq!(launcher.render_count(), 10);
    assert_eq!(launcher.open_sessions(), 0);

    service.shutdown().await;
}

/// A crash under load leaks neither slots nor sessions.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_crash_under_load_releases_resources() {
    init_logging();
    let launcher = MockLauncher::new();
    launcher.render_delay(Duration::from_millis(10));
    let service = started_service(&launcher, fast_config().capacity(3).build().unwrap())
        .await
        .into_shared();

    let mut tasks = JoinSet::new();
    for i in 0..15 {
        let service = Arc::clone(&service);
        tasks.spawn(async move { service.submit(RenderRequest::new(format!("<p>{i}</p>"))).await });
    }

    tokio::time::sleep(Duration::from_millis(15)).await;
    launcher.crash();

    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(pdf) => assert!(pdf.is_pdf()),
            Err(e) => assert!(
                matches!(e, RenderError::ServiceUnavailable(_) | RenderError::FatalEngineFault { .. }),
                "unexpected error: {e:?}"
            ),
        }
    }

    assert!(service.admission_stats().is_idle());
    assert!(wait_until(Duration::from_secs(5), || launcher.open_sessions() == 0).await);
    assert!(wait_until(Duration::from_secs(5), || service.is_ready()).await);

    service.shutdown().await;
}
