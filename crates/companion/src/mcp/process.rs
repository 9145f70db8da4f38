// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child process supervision for tool servers.
//!
//! Every child runs in its own process group on unix so that stopping a
//! server also stops whatever it spawned (`npx` wrappers, shells). A
//! dedicated task owns the `Child` and reaps it as soon as it exits.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{watch, Notify};
use tracing::{debug, warn};

use crate::mcp::transport::BoxFuture;

/// Time a child gets to exit after SIGTERM before it is killed.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// Start/stop/liveness for a supervised process.
pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> Option<u32>;
    fn is_alive(&self) -> bool;
    /// Terminate the process (gracefully, then forcibly) and reap it.
    fn stop(&self) -> BoxFuture<'_, ()>;
}

/// A spawned child plus its piped standard streams.
pub struct Spawned {
    pub process: ChildProcess,
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

/// A supervised child process.
pub struct ChildProcess {
    label: String,
    pid: Option<u32>,
    exit: watch::Receiver<Option<Option<i32>>>,
    kill: Arc<Notify>,
}

impl ChildProcess {
    /// Spawn `program args...` with all three standard streams piped.
    pub fn spawn(label: &str, program: &str, args: &[String]) -> std::io::Result<Spawned> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn()?;
        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (exit_tx, exit_rx) = watch::channel(None);
        let kill = Arc::new(Notify::new());
        let kill_rx = Arc::clone(&kill);
        let task_label = label.to_owned();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx.notified() => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            let code = match status {
                Ok(s) => s.code(),
                Err(e) => {
                    warn!(server = %task_label, err = %e, "failed to wait on server process");
                    None
                }
            };
            debug!(server = %task_label, ?code, "server process exited");
            let _ = exit_tx.send(Some(code));
        });

        debug!(server = %label, ?pid, program, "spawned server process");
        Ok(Spawned {
            process: Self { label: label.to_owned(), pid, exit: exit_rx, kill },
            stdin,
            stdout,
            stderr,
        })
    }

    /// Exit code once the process has exited and been reaped.
    pub fn exit_code(&self) -> Option<Option<i32>> {
        *self.exit.borrow()
    }

    /// Wait until the process has exited and been reaped.
    pub async fn wait(&self) {
        let mut rx = self.exit.clone();
        let _ = rx.wait_for(Option::is_some).await;
    }

    async fn terminate(&self) {
        if !self.is_alive() {
            return;
        }
        self.signal(false);
        if tokio::time::timeout(STOP_GRACE, self.wait()).await.is_ok() {
            return;
        }
        warn!(server = %self.label, pid = ?self.pid, "server ignored SIGTERM, killing");
        self.signal(true);
        self.kill.notify_one();
        if tokio::time::timeout(STOP_GRACE, self.wait()).await.is_err() {
            warn!(server = %self.label, pid = ?self.pid, "server process did not exit after kill");
        }
    }

    #[cfg(unix)]
    fn signal(&self, force: bool) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else { return };
        let sig = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        if let Err(e) = killpg(Pid::from_raw(pid as i32), sig) {
            debug!(server = %self.label, pid, err = %e, "killpg failed");
        }
    }

    #[cfg(not(unix))]
    fn signal(&self, _force: bool) {
        self.kill.notify_one();
    }
}

impl ProcessHandle for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_alive(&self) -> bool {
        self.exit.borrow().is_none()
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.terminate())
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        // Dropped without `stop`, e.g. by a cancelled startup.
        if self.is_alive() {
            self.signal(true);
            self.kill.notify_one();
        }
    }
}

/// Read `reader` to EOF, passing each line to `on_line` without its line
/// terminator. Invalid UTF-8 is replaced rather than ending the stream, so
/// the pipe stays drained for the life of the child.
pub async fn read_lines_lossy<R, F>(reader: R, mut on_line: F) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        on_line(line.trim_end_matches(['\n', '\r']).to_owned());
    }
}

/// Check whether a process with the given PID is alive.
#[cfg(unix)]
pub fn is_pid_alive(pid: u32) -> bool {
    use nix::sys::signal;
    use nix::unistd::Pid;

    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
