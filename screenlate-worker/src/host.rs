//! Subprocess lifecycle
//!
//! `WorkerHost` owns exactly one stage subprocess: it spawns the program,
//! performs the init/ready handshake, pumps requests over stdin and reads
//! responses on a dedicated reader thread that feeds a bounded queue. Pipe
//! breaks, protocol desync and request timeouts all mark the worker crashed;
//! the host restarts it (replaying the last init) up to a bounded number of
//! times with a short fixed backoff.

use crate::protocol::{HostMessage, WorkerMessage};
use crate::{Result, WorkerError};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError};
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::time::{Duration, Instant};

/// Environment variable a frozen launcher sets to its extraction directory
pub const BUNDLE_DIR_ENV: &str = "SCREENLATE_BUNDLE_DIR";

/// Configuration for one worker subprocess
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Stage name for logs ("capture", "ocr", "translation")
    pub name: String,

    /// Program and arguments; the program goes through frozen-aware resolution
    pub command: Vec<String>,

    /// Deadline for the `ready` handshake after init
    pub ready_timeout: Duration,

    /// Per-request response deadline
    pub request_timeout: Duration,

    /// Restarts allowed before the stage is declared dead
    pub max_restarts: u32,

    /// Fixed delay before each restart
    pub restart_backoff: Duration,

    /// Bound of the reader-thread response queue
    pub queue_size: usize,
}

impl WorkerConfig {
    /// Defaults for a named stage
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            ready_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            max_restarts: 3,
            restart_backoff: Duration::from_millis(500),
            queue_size: 32,
        }
    }
}

/// Worker lifecycle states; only the host transitions between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    NotStarted,
    Ready,
    Processing,
    Crashed,
}

/// Per-worker counters
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct WorkerMetrics {
    pub requests: u64,
    pub errors: u64,
    pub restarts: u32,
    pub crashes: u32,
}

struct Connection {
    child: Child,
    stdin: ChildStdin,
    responses: Receiver<WorkerMessage>,
    reader: Option<std::thread::JoinHandle<()>>,
}

/// Host for one stage subprocess
pub struct WorkerHost {
    config: WorkerConfig,
    connection: Option<Connection>,
    state: WorkerState,
    last_init: Option<Value>,
    metrics: WorkerMetrics,
}

/// Resolve a worker program with awareness of frozen distributions
///
/// Absolute paths and paths that exist as given are used unchanged. Bare
/// names are probed first in the bundle extraction directory (if the
/// launcher exported one), then next to the current executable, and finally
/// left to normal PATH lookup.
pub fn resolve_program(program: &str) -> PathBuf {
    let direct = Path::new(program);
    if direct.is_absolute() || direct.exists() {
        return direct.to_path_buf();
    }

    if let Ok(bundle_dir) = std::env::var(BUNDLE_DIR_ENV) {
        let candidate = Path::new(&bundle_dir).join(program);
        if candidate.exists() {
            return candidate;
        }
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let candidate = exe_dir.join(program);
            if candidate.exists() {
                return candidate;
            }
        }
    }

    direct.to_path_buf()
}

impl WorkerHost {
    /// Create a host; the subprocess is not spawned until [`start`]
    ///
    /// [`start`]: WorkerHost::start
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            connection: None,
            state: WorkerState::NotStarted,
            last_init: None,
            metrics: WorkerMetrics::default(),
        }
    }

    /// Stage name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Counter snapshot
    pub fn metrics(&self) -> WorkerMetrics {
        self.metrics
    }

    fn spawn(&mut self) -> Result<Connection> {
        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| WorkerError::SpawnFailed {
                name: self.config.name.clone(),
                reason: "empty command".into(),
            })?;
        let program = resolve_program(program);

        tracing::info!(
            "Spawning {} worker: {} {:?}",
            self.config.name,
            program.display(),
            args
        );

        let mut child = Command::new(&program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| WorkerError::SpawnFailed {
                name: self.config.name.clone(),
                reason: e.to_string(),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| WorkerError::SpawnFailed {
            name: self.config.name.clone(),
            reason: "no stdin pipe".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| WorkerError::SpawnFailed {
            name: self.config.name.clone(),
            reason: "no stdout pipe".into(),
        })?;

        let (tx, rx) = bounded(self.config.queue_size);
        let worker_name = self.config.name.clone();
        let reader = std::thread::Builder::new()
            .name(format!("{worker_name}-reader"))
            .spawn(move || {
                let reader = BufReader::new(stdout);
                for line in reader.lines() {
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            tracing::warn!("{} worker pipe read failed: {}", worker_name, e);
                            break;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match WorkerMessage::parse_line(&line) {
                        Ok(Some(msg)) => {
                            if tx.send(msg).is_err() {
                                break;
                            }
                        }
                        Ok(None) => {} // unknown type, skipped
                        Err(e) => {
                            tracing::warn!("{} worker protocol desync: {}", worker_name, e);
                            break;
                        }
                    }
                }
                tracing::debug!("{} worker reader thread exiting", worker_name);
            })?;

        tracing::info!(
            "{} worker spawned (pid {})",
            self.config.name,
            child.id()
        );

        Ok(Connection {
            child,
            stdin,
            responses: rx,
            reader: Some(reader),
        })
    }

    fn send(&mut self, message: &HostMessage) -> Result<()> {
        let line = message.to_line()?;
        let conn = self
            .connection
            .as_mut()
            .ok_or_else(|| WorkerError::NotRunning {
                name: self.config.name.clone(),
            })?;
        conn.stdin.write_all(line.as_bytes()).map_err(|e| {
            tracing::warn!("{} worker stdin write failed: {}", self.config.name, e);
            WorkerError::Crashed {
                name: self.config.name.clone(),
            }
        })?;
        conn.stdin.flush().map_err(|_| WorkerError::Crashed {
            name: self.config.name.clone(),
        })
    }

    fn await_ready(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.config.ready_timeout;
        let conn = self
            .connection
            .as_ref()
            .ok_or_else(|| WorkerError::NotRunning {
                name: self.config.name.clone(),
            })?;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(WorkerError::ReadyTimeout {
                    name: self.config.name.clone(),
                    timeout_ms: self.config.ready_timeout.as_millis() as u64,
                });
            }
            match conn.responses.recv_timeout(remaining) {
                Ok(WorkerMessage::Ready) => return Ok(()),
                Ok(other) => {
                    tracing::debug!(
                        "{} worker sent {:?} before ready; skipping",
                        self.config.name,
                        other
                    );
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(WorkerError::ReadyTimeout {
                        name: self.config.name.clone(),
                        timeout_ms: self.config.ready_timeout.as_millis() as u64,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(WorkerError::Crashed {
                        name: self.config.name.clone(),
                    });
                }
            }
        }
    }

    /// Spawn the subprocess and complete the init/ready handshake
    ///
    /// A worker that does not answer `ready` within the deadline is killed
    /// and counted as a failed init.
    pub fn start(&mut self, init_config: Value) -> Result<()> {
        self.last_init = Some(init_config.clone());
        let connection = self.spawn()?;
        self.connection = Some(connection);

        self.send(&HostMessage::Init {
            config: init_config,
        })?;
        match self.await_ready() {
            Ok(()) => {
                self.state = WorkerState::Ready;
                tracing::info!("{} worker ready", self.config.name);
                Ok(())
            }
            Err(e) => {
                tracing::error!("{} worker failed init: {}", self.config.name, e);
                self.kill_connection();
                self.state = WorkerState::Crashed;
                self.metrics.crashes += 1;
                Err(e)
            }
        }
    }

    fn mark_crashed(&mut self) {
        self.state = WorkerState::Crashed;
        self.metrics.crashes += 1;
        self.kill_connection();
    }

    /// Send one request and block for its response
    ///
    /// A crashed worker is restarted (with init replay) before the request
    /// is sent. Timeouts and pipe breaks mark the worker crashed; the next
    /// call triggers the restart path.
    pub fn request(&mut self, data: Value) -> Result<Value> {
        match self.state {
            WorkerState::Ready => {}
            WorkerState::Crashed => self.restart()?,
            WorkerState::NotStarted => {
                return Err(WorkerError::NotRunning {
                    name: self.config.name.clone(),
                })
            }
            WorkerState::Processing => {
                // A previous request never completed; treat as desync
                self.mark_crashed();
                self.restart()?;
            }
        }

        self.metrics.requests += 1;
        self.state = WorkerState::Processing;
        if let Err(e) = self.send(&HostMessage::Process { data }) {
            self.mark_crashed();
            self.metrics.errors += 1;
            return Err(e);
        }

        let conn = match self.connection.as_ref() {
            Some(conn) => conn,
            None => {
                self.state = WorkerState::Crashed;
                return Err(WorkerError::Crashed {
                    name: self.config.name.clone(),
                });
            }
        };
        match conn.responses.recv_timeout(self.config.request_timeout) {
            Ok(WorkerMessage::Result { data }) => {
                self.state = WorkerState::Ready;
                Ok(data)
            }
            Ok(WorkerMessage::Error { error }) => {
                self.state = WorkerState::Ready;
                self.metrics.errors += 1;
                Err(WorkerError::Remote {
                    name: self.config.name.clone(),
                    message: error,
                })
            }
            Ok(WorkerMessage::Ready) => {
                // Out-of-order handshake; stream is not trustworthy anymore
                self.metrics.errors += 1;
                self.mark_crashed();
                Err(WorkerError::Crashed {
                    name: self.config.name.clone(),
                })
            }
            Err(RecvTimeoutError::Timeout) => {
                self.metrics.errors += 1;
                self.mark_crashed();
                Err(WorkerError::RequestTimeout {
                    name: self.config.name.clone(),
                    timeout_ms: self.config.request_timeout.as_millis() as u64,
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.metrics.errors += 1;
                self.mark_crashed();
                Err(WorkerError::Crashed {
                    name: self.config.name.clone(),
                })
            }
        }
    }

    /// Restart a crashed worker, replaying the last init
    pub fn restart(&mut self) -> Result<()> {
        if self.metrics.restarts >= self.config.max_restarts {
            return Err(WorkerError::RestartLimit {
                name: self.config.name.clone(),
                max_restarts: self.config.max_restarts,
            });
        }
        self.metrics.restarts += 1;
        tracing::warn!(
            "Restarting {} worker (attempt {}/{})",
            self.config.name,
            self.metrics.restarts,
            self.config.max_restarts
        );

        self.kill_connection();
        std::thread::sleep(self.config.restart_backoff);

        let init = self
            .last_init
            .clone()
            .ok_or_else(|| WorkerError::NotRunning {
                name: self.config.name.clone(),
            })?;
        let connection = self.spawn()?;
        self.connection = Some(connection);
        self.send(&HostMessage::Init { config: init })?;
        self.await_ready()?;
        self.state = WorkerState::Ready;
        tracing::info!("{} worker restarted and ready", self.config.name);
        Ok(())
    }

    fn kill_connection(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            let _ = conn.child.kill();
            let _ = conn.child.wait();
            if let Some(reader) = conn.reader.take() {
                let _ = reader.join();
            }
        }
    }

    /// Graceful shutdown: ask, wait, terminate, wait, kill
    pub fn shutdown(&mut self) {
        if self.connection.is_none() {
            self.state = WorkerState::NotStarted;
            return;
        }
        let _ = self.send(&HostMessage::Shutdown);

        if let Some(mut conn) = self.connection.take() {
            if !wait_with_timeout(&mut conn.child, Duration::from_secs(5)) {
                tracing::warn!(
                    "{} worker ignored shutdown; terminating",
                    self.config.name
                );
                let _ = conn.child.kill();
                if !wait_with_timeout(&mut conn.child, Duration::from_secs(2)) {
                    let _ = conn.child.kill();
                    let _ = conn.child.wait();
                }
            }
            if let Some(reader) = conn.reader.take() {
                let _ = reader.join();
            }
        }
        self.state = WorkerState::NotStarted;
        tracing::info!("{} worker shut down", self.config.name);
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => {
                if Instant::now() >= deadline {
                    return false;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(_) => return true,
        }
    }
}

impl Drop for WorkerHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Shell one-liner worker that speaks the protocol
    fn echo_worker(name: &str) -> WorkerConfig {
        // Answers init with ready, then echoes every process line back as a result
        let script = r#"
import sys, json
for line in sys.stdin:
    msg = json.loads(line)
    if msg["type"] == "init":
        print(json.dumps({"type": "ready"}), flush=True)
    elif msg["type"] == "process":
        print(json.dumps({"type": "result", "data": msg["data"]}), flush=True)
    elif msg["type"] == "shutdown":
        break
"#;
        let mut config = WorkerConfig::new(
            name,
            vec!["python3".to_string(), "-c".to_string(), script.to_string()],
        );
        config.request_timeout = Duration::from_secs(5);
        config
    }

    fn python_available() -> bool {
        Command::new("python3")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_resolve_program_absolute_unchanged() {
        let path = if cfg!(windows) { "C:\\x\\worker.exe" } else { "/x/worker" };
        assert_eq!(resolve_program(path), PathBuf::from(path));
    }

    #[test]
    fn test_resolve_program_prefers_bundle_dir() {
        let dir = std::env::temp_dir().join(format!("screenlate-bundle-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let target = dir.join("fake-worker");
        std::fs::write(&target, b"").unwrap();

        std::env::set_var(BUNDLE_DIR_ENV, &dir);
        let resolved = resolve_program("fake-worker");
        std::env::remove_var(BUNDLE_DIR_ENV);

        assert_eq!(resolved, target);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_request_before_start_fails() {
        let mut host = WorkerHost::new(WorkerConfig::new("idle", vec!["true".into()]));
        assert!(matches!(
            host.request(json!({})),
            Err(WorkerError::NotRunning { .. })
        ));
        assert_eq!(host.state(), WorkerState::NotStarted);
    }

    #[test]
    fn test_echo_worker_round_trip() {
        if !python_available() {
            eprintln!("python3 not available; skipping");
            return;
        }
        let mut host = WorkerHost::new(echo_worker("echo"));
        host.start(json!({"language": "en"})).unwrap();
        assert_eq!(host.state(), WorkerState::Ready);

        let out = host.request(json!({"text": "hello"})).unwrap();
        assert_eq!(out, json!({"text": "hello"}));
        assert_eq!(host.metrics().requests, 1);

        host.shutdown();
        assert_eq!(host.state(), WorkerState::NotStarted);
    }

    #[test]
    fn test_crash_recovery_replays_init() {
        if !python_available() {
            eprintln!("python3 not available; skipping");
            return;
        }
        let mut host = WorkerHost::new(echo_worker("crashy"));
        host.start(json!({"model": "small"})).unwrap();

        // Kill the live subprocess behind the host's back
        if let Some(conn) = host.connection.as_mut() {
            let _ = conn.child.kill();
            let _ = conn.child.wait();
        }

        // First call finds the broken pipe and crashes the worker...
        let first = host.request(json!({"n": 1}));
        assert!(first.is_err());
        assert_eq!(host.state(), WorkerState::Crashed);

        // ...the next one restarts it, replays init, and succeeds
        let second = host.request(json!({"n": 2})).unwrap();
        assert_eq!(second, json!({"n": 2}));
        assert_eq!(host.metrics().restarts, 1);
        assert_eq!(host.state(), WorkerState::Ready);

        host.shutdown();
    }

    #[test]
    fn test_restart_limit() {
        let mut config = WorkerConfig::new(
            "never-ready",
            vec!["this-program-does-not-exist-screenlate".to_string()],
        );
        config.max_restarts = 2;
        config.restart_backoff = Duration::from_millis(1);
        let mut host = WorkerHost::new(config);

        assert!(host.start(json!({})).is_err());
        host.state = WorkerState::Crashed;

        let mut last = None;
        for _ in 0..4 {
            last = Some(host.request(json!({})));
        }
        assert!(matches!(
            last,
            Some(Err(WorkerError::RestartLimit { max_restarts: 2, .. }))
        ));
    }
}
