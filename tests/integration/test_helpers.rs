// tests/integration/test_helpers.rs

//! Test helpers for driving a real server over loopback TCP.

use cmmd::config::Config;
use cmmd::core::CmmdError;
use cmmd::core::runner::{OperationRunner, RunResult};
use cmmd::server::{self, ServerHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Generous upper bound for any single reply in tests.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// A config bound to an ephemeral loopback port.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.port = 0;
    config.shutdown_grace = Duration::from_secs(2);
    config
}

/// A running server plus the runner statistics the test needs.
pub struct TestServer {
    pub handle: ServerHandle,
    pub calls: Arc<AtomicUsize>,
}

impl TestServer {
    /// Starts a server whose runner sleeps `latency` and then answers with `respond(call_number, script)`.
    pub async fn start<F>(config: Config, latency: Duration, respond: F) -> Self
    where
        F: Fn(usize, &str) -> Result<RunResult, CmmdError> + Send + Sync + 'static,
    {
        init_tracing();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let runner = move |script: &str| -> Result<RunResult, CmmdError> {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if !latency.is_zero() {
                std::thread::sleep(latency);
            }
            respond(call, script)
        };
        let handle = server::start(config, Arc::new(runner) as Arc<dyn OperationRunner>)
            .await
            .expect("server should start");
        Self { handle, calls }
    }

    /// Starts a server with a runner that always succeeds with "ok".
    pub async fn ok(config: Config, latency: Duration) -> Self {
        Self::start(config, latency, |_, _| Ok(RunResult::success("ok"))).await
    }

    pub fn addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn connect(&self) -> TestClient {
        TestClient::connect(self.addr()).await
    }
}

/// A line-oriented client.
pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
        }
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("write");
        self.writer.flush().await.expect("flush");
    }

    pub async fn send_line(&mut self, line: &str) {
        self.send_raw(format!("{line}\n").as_bytes()).await;
    }

    /// Reads one line without its terminator. `None` on EOF.
    pub async fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let n = tokio::time::timeout(REPLY_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("reply timed out")
            .expect("read");
        if n == 0 {
            return None;
        }
        Some(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Reads result lines up to and excluding the sentinel.
    pub async fn read_report(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await.expect("connection closed mid-report");
            if line == "<<EOT>>" {
                return lines;
            }
            lines.push(line);
        }
    }

    pub async fn request(&mut self, line: &str) -> String {
        self.send_line(line).await;
        self.read_line().await.expect("connection closed")
    }

    pub async fn run(&mut self, path: &str, count: u32) -> Vec<String> {
        self.send_line(&format!("RUN_CMM|{path}|{count}")).await;
        self.read_report().await
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
