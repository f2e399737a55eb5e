//! Process Runner
//!
//! Spawns a worker, collects its output line by line and races process exit
//! against a wall-clock deadline. The deadline branch is polled first, so a
//! worker that exits at the same instant the timer fires is still reported as
//! timed out and killed.
//!
//! Output is read as raw bytes and decoded lossily, so a worker printing
//! invalid UTF-8 is still read to completion. Only the most recent
//! `capture_limit` bytes of each stream are kept.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use crate::domain::{FailureCause, ProcessOutcome, WorkerInvocation};
use crate::ports::WorkerPort;

/// How long to wait for a killed worker to be reaped
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// Bytes of output kept per stream
pub const DEFAULT_CAPTURE_LIMIT: usize = 256 * 1024;

/// How long to keep reading pipes after the worker is gone
const DRAIN_GRACE: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8 * 1024;

/// Unterminated output longer than this is emitted as its own line
const MAX_LINE_BYTES: usize = 16 * 1024;

/// Accumulates one output stream of a child process
struct StreamCapture<R> {
    reader: Option<R>,
    pending: Vec<u8>,
    captured: String,
    truncated: usize,
    limit: usize,
    label: &'static str,
}

impl<R: AsyncRead + Unpin + Send + 'static> StreamCapture<R> {
    fn new(reader: Option<R>, label: &'static str, limit: usize) -> Self {
        Self {
            reader,
            pending: Vec::new(),
            captured: String::new(),
            truncated: 0,
            limit,
            label,
        }
    }

    fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Read one chunk. Cancel safe: an interrupted read consumes nothing.
    async fn pump(&mut self) {
        let Some(reader) = self.reader.as_mut() else {
            return;
        };

        let mut chunk = [0u8; READ_CHUNK];
        match reader.read(&mut chunk).await {
            Ok(0) => {
                self.flush_pending();
                self.reader = None;
            }
            Ok(n) => self.ingest(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                warn!("Failed reading worker {}: {}, discarding the rest", self.label, e);
                self.flush_pending();
                // Keep the pipe drained so the worker never sees it close early
                if let Some(mut reader) = self.reader.take() {
                    tokio::spawn(async move {
                        let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                    });
                }
            }
        }
    }

    async fn drain(&mut self) {
        while self.is_open() {
            self.pump().await;
        }
    }

    fn ingest(&mut self, mut bytes: &[u8]) {
        while let Some(pos) = bytes.iter().position(|b| *b == b'\n') {
            self.pending.extend_from_slice(&bytes[..pos]);
            self.emit_line();
            bytes = &bytes[pos + 1..];
        }
        self.pending.extend_from_slice(bytes);
        if self.pending.len() >= MAX_LINE_BYTES {
            self.emit_line();
        }
    }

    fn flush_pending(&mut self) {
        if !self.pending.is_empty() {
            self.emit_line();
        }
    }

    fn emit_line(&mut self) {
        if self.pending.last() == Some(&b'\r') {
            self.pending.pop();
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();

        debug!(stream = self.label, "worker: {}", line);
        self.captured.push_str(&line);
        self.captured.push('\n');

        // Trim in batches so each line costs amortized constant time
        if self.captured.len() > self.limit.saturating_mul(2) {
            self.trim_to_limit();
        }
    }

    fn trim_to_limit(&mut self) {
        if self.captured.len() <= self.limit {
            return;
        }
        let mut cut = self.captured.len() - self.limit;
        while !self.captured.is_char_boundary(cut) {
            cut += 1;
        }
        self.captured.drain(..cut);
        self.truncated += cut;
    }

    fn into_captured(mut self) -> String {
        self.flush_pending();
        self.trim_to_limit();
        if self.truncated == 0 {
            return self.captured;
        }
        warn!(
            "Worker {} exceeded {} bytes, dropped {} earlier bytes",
            self.label, self.limit, self.truncated
        );
        format!(
            "[{} earlier bytes truncated]\n{}",
            self.truncated, self.captured
        )
    }
}

/// How the select loop ended
enum Exit {
    Exited(std::io::Result<ExitStatus>),
    DeadlineReached,
}

/// Runs worker commands as child processes
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    kill_grace: Duration,
    capture_limit: usize,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            kill_grace: DEFAULT_KILL_GRACE,
            capture_limit: DEFAULT_CAPTURE_LIMIT,
        }
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how long to wait for a killed worker to exit
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Set how many bytes of stdout and of stderr to keep
    pub fn with_capture_limit(mut self, limit: usize) -> Self {
        self.capture_limit = limit;
        self
    }

    /// Run a worker to a terminal outcome
    pub async fn run(&self, invocation: &WorkerInvocation, timeout: Duration) -> ProcessOutcome {
        info!(
            "Starting {} worker: {}",
            invocation.worker(),
            invocation.command_line()
        );

        let mut command = Command::new(invocation.program());
        command
            .args(invocation.arguments())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to start {} worker: {}", invocation.worker(), e);
                return ProcessOutcome::spawn_failure(e.to_string());
            }
        };

        let mut stdout = StreamCapture::new(child.stdout.take(), "stdout", self.capture_limit);
        let mut stderr = StreamCapture::new(child.stderr.take(), "stderr", self.capture_limit);

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let exit = loop {
            tokio::select! {
                biased;
                _ = &mut deadline => break Exit::DeadlineReached,
                status = child.wait() => break Exit::Exited(status),
                _ = stdout.pump(), if stdout.is_open() => {}
                _ = stderr.pump(), if stderr.is_open() => {}
            }
        };

        if let Exit::DeadlineReached = exit {
            warn!(
                "{} worker exceeded {}s, terminating",
                invocation.worker(),
                timeout.as_secs()
            );
            self.terminate(&mut child).await;
        }

        // Pipes close once the worker is gone; bound the wait in case a
        // grandchild still holds them open.
        let drained = tokio::time::timeout(DRAIN_GRACE, async {
            tokio::join!(stdout.drain(), stderr.drain());
        })
        .await;
        if drained.is_err() {
            warn!("Worker output still open after exit, discarding remainder");
        }

        let stdout = stdout.into_captured();
        let stderr = stderr.into_captured();

        match exit {
            Exit::DeadlineReached => ProcessOutcome::TimedOut {
                after: timeout,
                stdout,
                stderr,
            },
            Exit::Exited(Ok(status)) => match status.code() {
                Some(0) => {
                    info!("{} worker finished successfully", invocation.worker());
                    ProcessOutcome::Success { stdout, stderr }
                }
                Some(code) => {
                    warn!("{} worker exited with code {}", invocation.worker(), code);
                    ProcessOutcome::Failure {
                        cause: FailureCause::ExitCode(code),
                        stdout,
                        stderr,
                    }
                }
                None => {
                    warn!("{} worker terminated by signal", invocation.worker());
                    ProcessOutcome::Failure {
                        cause: FailureCause::Terminated,
                        stdout,
                        stderr,
                    }
                }
            },
            Exit::Exited(Err(e)) => {
                error!("Failed waiting on {} worker: {}", invocation.worker(), e);
                ProcessOutcome::Failure {
                    cause: FailureCause::Wait(e.to_string()),
                    stdout,
                    stderr,
                }
            }
        }
    }

    /// Kill the worker and reap it within the grace period
    async fn terminate(&self, child: &mut Child) {
        if let Err(e) = child.start_kill() {
            warn!("Failed to signal worker: {}", e);
        }

        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(Ok(status)) => debug!("Terminated worker reaped: {}", status),
            Ok(Err(e)) => warn!("Failed to reap terminated worker: {}", e),
            Err(_) => error!(
                "Worker did not exit within {}s of being killed",
                self.kill_grace.as_secs()
            ),
        }
    }
}

#[async_trait]
impl WorkerPort for ProcessRunner {
    async fn invoke(&self, invocation: &WorkerInvocation, timeout: Duration) -> ProcessOutcome {
        self.run(invocation, timeout).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::{route, DispatchFailureKind, TradeInstruction, WorkerSettings};
    use std::path::{Path, PathBuf};
    use std::time::Instant;
    use tempfile::TempDir;

    /// Route a level-0 instruction to `script` run through `sh`
    fn invocation_for(script: &Path) -> WorkerInvocation {
        let settings = WorkerSettings {
            interpreter: "sh".to_string(),
            initial_buy_script: script.to_path_buf(),
            data_dir: script.parent().unwrap().to_path_buf(),
            ..Default::default()
        };
        let instruction = TradeInstruction::new("10", 0, "tok").unwrap();
        route(&instruction, &settings)
    }

    fn write_script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn process_alive(pid: &str) -> bool {
        std::process::Command::new("kill")
            .args(["-0", pid])
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_success_captures_stdout() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "ok.sh", "echo OK\n");

        let outcome = ProcessRunner::new()
            .run(&invocation_for(&script), Duration::from_secs(10))
            .await;

        assert!(outcome.is_success());
        assert!(outcome.stdout().contains("OK"));
    }

    #[tokio::test]
    async fn test_worker_receives_arguments() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "args.sh", "echo \"$1 $2 $3 $4\"\n");

        let outcome = ProcessRunner::new()
            .run(&invocation_for(&script), Duration::from_secs(10))
            .await;

        assert_eq!(outcome.stdout().trim(), "tok 10 --market-name BTC");
    }

    #[tokio::test]
    async fn test_nonzero_exit_captures_stderr() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "bad.sh", "echo started\necho 'bad arg' >&2\nexit 1\n");

        let outcome = ProcessRunner::new()
            .run(&invocation_for(&script), Duration::from_secs(10))
            .await;

        match &outcome {
            ProcessOutcome::Failure { cause, stdout, stderr } => {
                assert_eq!(cause, &FailureCause::ExitCode(1));
                assert!(stdout.contains("started"));
                assert!(stderr.contains("bad arg"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(outcome.detail().unwrap().contains("bad arg"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_without_stderr() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "quiet.sh", "exit 3\n");

        let outcome = ProcessRunner::new()
            .run(&invocation_for(&script), Duration::from_secs(10))
            .await;

        assert_eq!(outcome.detail().unwrap(), "exit code 3");
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_failure() {
        let settings = WorkerSettings {
            interpreter: "/nonexistent/interpreter-for-tests".to_string(),
            ..Default::default()
        };
        let instruction = TradeInstruction::new("10", 0, "tok").unwrap();
        let invocation = route(&instruction, &settings);

        let outcome = ProcessRunner::new()
            .run(&invocation, Duration::from_secs(10))
            .await;

        assert_eq!(outcome.failure_kind(), Some(DispatchFailureKind::SpawnFailure));
        assert!(outcome.stdout().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_kills_worker() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("worker.pid");
        let body = format!(
            "echo $$ > {}\necho working\nexec sleep 30\n",
            pid_file.display()
        );
        let script = write_script(&dir, "slow.sh", &body);

        let started = Instant::now();
        let outcome = ProcessRunner::new()
            .run(&invocation_for(&script), Duration::from_millis(500))
            .await;

        assert!(started.elapsed() < Duration::from_secs(10));
        match &outcome {
            ProcessOutcome::TimedOut { after, stdout, .. } => {
                assert_eq!(*after, Duration::from_millis(500));
                assert!(stdout.contains("working"));
            }
            other => panic!("expected timeout, got {:?}", other),
        }

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        assert!(!process_alive(pid.trim()), "worker {} still running", pid.trim());
    }

    #[tokio::test]
    async fn test_large_output_does_not_block() {
        let dir = TempDir::new().unwrap();
        let script = write_script(
            &dir,
            "chatty.sh",
            "i=0\nwhile [ $i -lt 5000 ]; do echo \"line $i padding padding padding\"; echo \"err $i\" >&2; i=$((i+1)); done\n",
        );

        let outcome = ProcessRunner::new()
            .run(&invocation_for(&script), Duration::from_secs(30))
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.stdout().lines().count(), 5000);
        assert_eq!(outcome.stderr().lines().count(), 5000);
    }

    #[tokio::test]
    async fn test_invalid_utf8_output_still_succeeds() {
        let dir = TempDir::new().unwrap();
        let script = write_script(
            &dir,
            "latin1.sh",
            "printf 'caf\\351\\n'\nprintf '\\377\\376 raw\\n' >&2\nsleep 0.3\ni=0\nwhile [ $i -lt 2000 ]; do echo \"line $i\"; i=$((i+1)); done\necho OK\nexit 0\n",
        );

        let outcome = ProcessRunner::new()
            .run(&invocation_for(&script), Duration::from_secs(30))
            .await;

        assert!(outcome.is_success(), "worker exited 0 but got {:?}", outcome.failure_kind());
        assert!(outcome.stdout().starts_with("caf\u{FFFD}\n"));
        assert!(outcome.stdout().contains("line 1999"));
        assert!(outcome.stdout().trim_end().ends_with("OK"));
        assert!(outcome.stderr().contains("raw"));
    }

    #[tokio::test]
    async fn test_capture_keeps_most_recent_output() {
        let dir = TempDir::new().unwrap();
        let script = write_script(
            &dir,
            "flood.sh",
            "i=0\nwhile [ $i -lt 5000 ]; do echo \"line $i\"; i=$((i+1)); done\n",
        );

        let outcome = ProcessRunner::new()
            .with_capture_limit(1024)
            .run(&invocation_for(&script), Duration::from_secs(30))
            .await;

        assert!(outcome.is_success());
        let stdout = outcome.stdout();
        assert!(stdout.starts_with('['));
        assert!(stdout.lines().next().unwrap().contains("earlier bytes truncated"));
        assert!(stdout.trim_end().ends_with("line 4999"));
        assert!(!stdout.contains("line 0\n"));
        // Limit plus the truncation marker line
        assert!(stdout.len() <= 1024 + 64);
    }

    #[tokio::test]
    async fn test_unterminated_output_is_kept() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "partial.sh", "printf 'no newline'\n");

        let outcome = ProcessRunner::new()
            .run(&invocation_for(&script), Duration::from_secs(10))
            .await;

        assert_eq!(outcome.stdout(), "no newline\n");
    }
}
