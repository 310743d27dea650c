// tests/integration/run_test.rs

use super::test_helpers::{TestServer, eventually, test_config};
use cmmd::core::CmmdError;
use cmmd::core::runner::RunResult;
use cmmd::core::slot::{SlotPolicy, SlotState};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[tokio::test(flavor = "multi_thread")]
async fn test_smoke_run_three_iterations() {
    let latency = Duration::from_millis(100);
    let server = TestServer::ok(test_config(), latency).await;
    let mut client = server.connect().await;

    let started = Instant::now();
    let lines = client.run("/scripts/smoke.cmm", 3).await;
    let elapsed = started.elapsed();

    assert_eq!(lines, vec!["[1] PASS:ok", "[2] PASS:ok", "[3] PASS:ok"]);
    assert!(elapsed >= latency * 3, "finished too early: {elapsed:?}");
    assert!(elapsed < latency * 3 + Duration::from_secs(2), "too slow: {elapsed:?}");
    assert_eq!(server.calls(), 3);

    let slot = &server.handle.state().slot;
    assert!(slot.state().is_idle());
    assert_eq!(slot.counters(), (3, 3));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fault_on_second_call_continues() {
    let server = TestServer::start(test_config(), Duration::ZERO, |call, _| match call {
        2 => Err(CmmdError::OperationFault("controller connection lost".into())),
        _ => Ok(RunResult::success("ok")),
    })
    .await;
    let mut client = server.connect().await;

    assert_eq!(
        client.run("/scripts/smoke.cmm", 3).await,
        vec![
            "[1] PASS:ok",
            "[2] FAIL:controller connection lost",
            "[3] PASS:ok"
        ]
    );
    assert_eq!(server.calls(), 3);
    assert!(server.handle.state().slot.state().is_idle());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_runner_failure_and_fail_keyword() {
    let server = TestServer::start(test_config(), Duration::ZERO, |call, _| match call {
        1 => Ok(RunResult::failure("probe collision")),
        _ => Ok(RunResult::success("")
            .with_raw_messages(vec!["Step 4: TESTSTEPFAIL circle out of tolerance".into()])),
    })
    .await;
    let mut client = server.connect().await;

    let lines = client.run("part.cmm", 2).await;
    assert_eq!(lines[0], "[1] FAIL:probe collision");
    assert_eq!(
        lines[1],
        "[2] FAIL:failure reported: Step 4: TESTSTEPFAIL circle out of tolerance"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_runner_panic_is_reported_and_slot_freed() {
    let server = TestServer::start(test_config(), Duration::ZERO, |call, _| {
        if call == 1 {
            panic!("driver exploded");
        }
        Ok(RunResult::success("ok"))
    })
    .await;
    let mut client = server.connect().await;

    let lines = client.run("a.cmm", 2).await;
    assert_eq!(lines[0], "[1] FAIL:runner crashed: driver exploded");
    assert_eq!(lines[1], "[2] PASS:ok");
    assert!(server.handle.state().slot.state().is_idle());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_script_path_is_passed_to_runner() {
    let server = TestServer::start(test_config(), Duration::ZERO, |_, script| {
        Ok(RunResult::success(format!("ran {script}")))
    })
    .await;
    let mut client = server.connect().await;

    assert_eq!(
        client.run("C:\\cmm\\probe test.cmm", 1).await,
        vec!["[1] PASS:ran C:\\cmm\\probe test.cmm"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_timeout_abandons_wait_but_keeps_slot() {
    let mut config = test_config();
    config.session.run_timeout = Duration::from_millis(100);
    let latency = Duration::from_millis(500);
    let server = TestServer::ok(config, latency).await;
    let mut first = server.connect().await;

    let lines = first.run("slow.cmm", 1).await;
    assert_eq!(lines, vec!["[1] FAIL:Timeout: script did not complete within 100ms"]);

    // The orphaned call still occupies the controller.
    assert!(matches!(
        server.handle.state().slot.state(),
        SlotState::Busy {
            abandoned: true,
            ..
        }
    ));

    // A second client queues behind the orphan before its own run starts.
    let mut second = server.connect().await;
    let started = Instant::now();
    let lines = second.run("next.cmm", 1).await;
    assert_eq!(lines, vec!["[1] FAIL:Timeout: script did not complete within 100ms"]);
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(server.calls(), 2);

    let slot = server.handle.state().slot.clone();
    assert!(eventually(Duration::from_secs(3), || slot.state().is_idle()).await);
    let (granted, released) = slot.counters();
    assert_eq!(granted, released);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_timed_out_iteration_does_not_block_next_iteration() {
    let mut config = test_config();
    config.session.run_timeout = Duration::from_millis(150);
    let server = TestServer::start(config, Duration::ZERO, |call, _| {
        if call == 1 {
            std::thread::sleep(Duration::from_millis(400));
        }
        Ok(RunResult::success("ok"))
    })
    .await;
    let mut client = server.connect().await;

    // Iteration 2 waits for the abandoned iteration 1 instead of failing as reentrant.
    let lines = client.run("a.cmm", 2).await;
    assert!(lines[0].starts_with("[1] FAIL:Timeout"));
    assert_eq!(lines[1], "[2] PASS:ok");
    assert_eq!(server.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_clients_are_serialized() {
    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));
    let (inside_c, max_c) = (inside.clone(), max_inside.clone());
    let server = TestServer::start(test_config(), Duration::ZERO, move |_, _| {
        let now = inside_c.fetch_add(1, Ordering::SeqCst) + 1;
        max_c.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        inside_c.fetch_sub(1, Ordering::SeqCst);
        Ok(RunResult::success("ok"))
    })
    .await;

    let mut tasks = Vec::new();
    for i in 0..5 {
        let mut client = server.connect().await;
        tasks.push(tokio::spawn(async move {
            client.run(&format!("client{i}.cmm"), 4).await
        }));
    }
    for task in tasks {
        let lines = task.await.unwrap();
        assert_eq!(lines.len(), 4);
        assert!(lines.iter().all(|l| l.contains("PASS:ok")), "{lines:?}");
    }

    assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    assert_eq!(server.calls(), 20);
    let slot = &server.handle.state().slot;
    assert!(slot.state().is_idle());
    assert_eq!(slot.counters(), (20, 20));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fail_fast_policy_reports_busy() {
    let mut config = test_config();
    config.session.policy = SlotPolicy::FailFast;
    let server = TestServer::ok(config, Duration::from_millis(400)).await;

    let mut first = server.connect().await;
    first.send_line("RUN_CMM|long.cmm|1").await;
    let slot = server.handle.state().slot.clone();
    assert!(eventually(Duration::from_secs(2), || !slot.state().is_idle()).await);

    let mut second = server.connect().await;
    assert_eq!(second.run("other.cmm", 1).await, vec!["[1] FAIL:controller busy"]);
    assert_eq!(first.read_report().await, vec!["[1] PASS:ok"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_acquire_timeout_reports_fail() {
    let mut config = test_config();
    config.session.acquire_timeout = Duration::from_millis(50);
    let server = TestServer::ok(config, Duration::from_millis(400)).await;

    let mut first = server.connect().await;
    first.send_line("RUN_CMM|long.cmm|1").await;
    let slot = server.handle.state().slot.clone();
    assert!(eventually(Duration::from_secs(2), || !slot.state().is_idle()).await);

    let mut second = server.connect().await;
    let lines = second.run("other.cmm", 1).await;
    assert!(
        lines[0].starts_with("[1] FAIL:timed out after 50ms waiting for controller"),
        "{lines:?}"
    );
    assert_eq!(first.read_report().await, vec!["[1] PASS:ok"]);
}
