// tests/integration/protocol_test.rs

use super::test_helpers::{TestServer, test_config};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn test_ping_pong() {
    let server = TestServer::ok(test_config(), Duration::ZERO).await;
    let mut client = server.connect().await;

    assert_eq!(client.request("PING").await, "PONG");
    assert_eq!(client.request("ping").await, "PONG");
    assert!(server.handle.state().slot.state().is_idle());
    assert_eq!(server.handle.state().slot.counters(), (0, 0));
    assert_eq!(server.calls(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_run_keeps_connection_open() {
    let server = TestServer::ok(test_config(), Duration::ZERO).await;
    let mut client = server.connect().await;

    assert_eq!(
        client.request("RUN_CMM|onlyonefield").await,
        "ERROR: Invalid RUN_CMM command"
    );
    assert_eq!(
        client.request("RUN_CMM|a.cmm|zero").await,
        "ERROR: Invalid count"
    );
    assert_eq!(client.request("RUN_CMM|a.cmm|0").await, "ERROR: Invalid count");
    assert_eq!(client.request("PING").await, "PONG");
    assert_eq!(server.handle.state().slot.counters(), (0, 0));
    assert_eq!(server.calls(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_command() {
    let server = TestServer::ok(test_config(), Duration::ZERO).await;
    let mut client = server.connect().await;

    assert_eq!(client.request("HELLO").await, "ERROR: Unknown command");
    assert_eq!(client.request("PING").await, "PONG");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_count_above_max_repeat() {
    let mut config = test_config();
    config.max_repeat = 5;
    let server = TestServer::ok(config, Duration::ZERO).await;
    let mut client = server.connect().await;

    let reply = client.request("RUN_CMM|a.cmm|6").await;
    assert!(reply.starts_with("ERROR: "), "unexpected reply {reply:?}");
    assert_eq!(server.calls(), 0);
    assert_eq!(client.run("a.cmm", 5).await.len(), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_blank_lines_are_ignored() {
    let server = TestServer::ok(test_config(), Duration::ZERO).await;
    let mut client = server.connect().await;

    client.send_raw(b"\n\r\n   \nPING\n").await;
    assert_eq!(client.read_line().await.as_deref(), Some("PONG"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_partial_line_across_writes() {
    let server = TestServer::ok(test_config(), Duration::ZERO).await;
    let mut client = server.connect().await;

    client.send_raw(b"RUN_CMM|/scr").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.send_raw(b"ipts/a.cmm|").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.send_raw(b"2\r\n").await;

    assert_eq!(client.read_report().await, vec!["[1] PASS:ok", "[2] PASS:ok"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pipelined_commands_answered_in_order() {
    let server = TestServer::ok(test_config(), Duration::from_millis(20)).await;
    let mut client = server.connect().await;

    client.send_raw(b"PING\nRUN_CMM|a.cmm|1\nPING\n").await;
    assert_eq!(client.read_line().await.as_deref(), Some("PONG"));
    assert_eq!(client.read_report().await, vec!["[1] PASS:ok"]);
    assert_eq!(client.read_line().await.as_deref(), Some("PONG"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_non_utf8_bytes_do_not_break_the_connection() {
    let server = TestServer::ok(test_config(), Duration::ZERO).await;
    let mut client = server.connect().await;

    client.send_raw(b"\xff\xfe\xfd\n").await;
    assert_eq!(
        client.read_line().await.as_deref(),
        Some("ERROR: Unknown command")
    );
    assert_eq!(client.request("PING").await, "PONG");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_line_too_long_closes_connection() {
    let mut config = test_config();
    config.max_line_length = 32;
    let server = TestServer::ok(config, Duration::ZERO).await;
    let mut client = server.connect().await;

    let mut line = vec![b'x'; 100];
    line.push(b'\n');
    client.send_raw(&line).await;
    assert_eq!(
        client.read_line().await.as_deref(),
        Some("ERROR: line too long")
    );
    assert_eq!(client.read_line().await, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_multiline_runner_message_is_folded() {
    let server = TestServer::start(test_config(), Duration::ZERO, |_, _| {
        Ok(cmmd::core::runner::RunResult::success("line one\nline two"))
    })
    .await;
    let mut client = server.connect().await;

    assert_eq!(
        client.run("a.cmm", 1).await,
        vec!["[1] PASS:line one | line two"]
    );
}
