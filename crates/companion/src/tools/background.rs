// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `run_background`: long-running processes that outlive a tool call.
//!
//! Only processes started here can be stopped here. Each runs in its own
//! process group so stopping it also takes its children.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::Context;
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::system::dangerous_pattern;
use super::{optional_str, optional_u64, required_str, CoreTool};
use crate::mcp::transport::BoxFuture;

pub const PORT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);
const PORT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const STOP_GRACE: Duration = Duration::from_secs(5);
const KILL_GRACE: Duration = Duration::from_secs(3);

struct Tracked {
    command: String,
    dir: Option<String>,
    port: Option<u16>,
    started: Instant,
    /// `Some(code)` once the reaper has collected the exit status.
    exit: watch::Receiver<Option<i32>>,
}

#[derive(Default)]
pub struct RunBackground {
    processes: Mutex<BTreeMap<u32, Tracked>>,
}

enum PortWait {
    Ready,
    Exited(i32),
    TimedOut,
}

impl RunBackground {
    async fn start(&self, args: &Value) -> anyhow::Result<String> {
        let command = required_str(args, "command")?;
        if let Some(pattern) = dangerous_pattern(command) {
            anyhow::bail!("command blocked: contains dangerous pattern: {pattern}");
        }
        let dir = optional_str(args, "working_dir");
        let port = optional_u64(args, "wait_port")
            .map(u16::try_from)
            .transpose()
            .map_err(|_| anyhow::anyhow!("wait_port must be a TCP port number"))?;

        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().context("failed to start process")?;
        let pid = child.id().context("process exited before it could be tracked")?;
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code().unwrap_or(-1),
                Err(e) => {
                    warn!(pid, err = %e, "waiting on background process failed");
                    -1
                }
            };
            debug!(pid, code, "background process exited");
            exit_tx.send_replace(Some(code));
        });
        info!(pid, command, "background process started");

        self.processes.lock().insert(
            pid,
            Tracked {
                command: command.to_owned(),
                dir: dir.map(str::to_owned),
                port,
                started: Instant::now(),
                exit: exit_rx.clone(),
            },
        );

        let mut out = String::from("Process started successfully.\n");
        let _ = writeln!(out, "PID: {pid}");
        let _ = writeln!(out, "Command: {command}");
        if let Some(port) = port {
            let _ = writeln!(out, "Waiting for port {port}...");
            match wait_for_port(port, exit_rx, PORT_WAIT_TIMEOUT).await {
                PortWait::Ready => {
                    let _ = writeln!(out, "Port {port} is ready; server is accepting connections.");
                }
                PortWait::Exited(code) => {
                    let _ = writeln!(
                        out,
                        "WARNING: Process exited (code {code}) before port {port} became available."
                    );
                    out.push_str(
                        "The server may have failed to start. Check logs or run the command manually.\n",
                    );
                }
                PortWait::TimedOut => {
                    let _ = writeln!(
                        out,
                        "WARNING: Port {port} did not become available within {}s.",
                        PORT_WAIT_TIMEOUT.as_secs()
                    );
                    let _ = writeln!(
                        out,
                        "The process is still running (PID {pid}). It may need more time to \
                         start, or it may be listening on a different port."
                    );
                }
            }
        }
        Ok(out)
    }

    async fn stop(&self, pid: u32) -> anyhow::Result<String> {
        let exit = self.processes.lock().get(&pid).map(|t| t.exit.clone());
        let Some(mut exit) = exit else {
            anyhow::bail!(
                "process {pid} was not started by run_background; use execute_bash to stop it"
            );
        };
        let exit_code = *exit.borrow();
        if let Some(code) = exit_code {
            self.processes.lock().remove(&pid);
            return Ok(format!("Process {pid} has already exited (code {code})."));
        }

        signal_group(pid, Signal::Term);
        if tokio::time::timeout(STOP_GRACE, exited(&mut exit)).await.is_err() {
            debug!(pid, "background process ignored SIGTERM");
            signal_group(pid, Signal::Kill);
            if tokio::time::timeout(KILL_GRACE, exited(&mut exit)).await.is_err() {
                warn!(pid, "background process still running after SIGKILL");
            }
        }
        // Leftover children in the group.
        signal_group(pid, Signal::Kill);
        self.processes.lock().remove(&pid);
        info!(pid, "background process stopped");
        Ok(format!("Process {pid} stopped."))
    }

    fn list(&self) -> String {
        let processes = self.processes.lock();
        if processes.is_empty() {
            return "No tracked background processes.".to_owned();
        }
        let mut out = format!("Tracked background processes ({}):\n\n", processes.len());
        for (pid, tracked) in processes.iter() {
            let status = match *tracked.exit.borrow() {
                Some(code) => format!("exited (code {code})"),
                None => "running".to_owned(),
            };
            let _ = writeln!(out, "  PID: {pid}");
            let _ = writeln!(out, "  Command: {}", tracked.command);
            let _ = writeln!(out, "  Status: {status}");
            let _ = writeln!(out, "  Uptime: {}", format_uptime(tracked.started.elapsed()));
            if let Some(port) = tracked.port {
                let _ = writeln!(out, "  Port: {port}");
            }
            if let Some(ref dir) = tracked.dir {
                let _ = writeln!(out, "  Dir: {dir}");
            }
            out.push('\n');
        }
        out
    }

    /// Stop every tracked process.
    pub async fn stop_all(&self) {
        let pids: Vec<u32> = self.processes.lock().keys().copied().collect();
        for result in join_all(pids.iter().map(|pid| self.stop(*pid))).await {
            if let Err(e) = result {
                warn!(err = %e, "stopping background process failed");
            }
        }
    }
}

async fn exited(exit: &mut watch::Receiver<Option<i32>>) {
    // The reaper publishes the code before dropping its sender.
    let _ = exit.wait_for(Option::is_some).await;
}

async fn wait_for_port(
    port: u16,
    mut exit: watch::Receiver<Option<i32>>,
    timeout: Duration,
) -> PortWait {
    let deadline = Instant::now() + timeout;
    loop {
        let exited = *exit.borrow_and_update();
        if let Some(code) = exited {
            return PortWait::Exited(code);
        }
        let connect = tokio::net::TcpStream::connect(("127.0.0.1", port));
        if let Ok(Ok(_)) = tokio::time::timeout(Duration::from_secs(1), connect).await {
            return PortWait::Ready;
        }
        if Instant::now() >= deadline {
            return PortWait::TimedOut;
        }
        tokio::select! {
            _ = tokio::time::sleep(PORT_POLL_INTERVAL) => {}
            _ = exit.changed() => {}
        }
    }
}

/// `1h2m3s` style, whole seconds.
fn format_uptime(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (h, m, s) = (secs / 3600, secs % 3600 / 60, secs % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}

#[derive(Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) {
    use nix::sys::signal::{killpg, Signal as Sig};
    use nix::unistd::Pid;

    let sig = match signal {
        Signal::Term => Sig::SIGTERM,
        Signal::Kill => Sig::SIGKILL,
    };
    if let Err(e) = killpg(Pid::from_raw(pid as i32), sig) {
        debug!(pid, ?sig, err = %e, "killpg failed");
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: Signal) {}

impl CoreTool for RunBackground {
    fn name(&self) -> &'static str {
        "run_background"
    }

    fn description(&self) -> &'static str {
        "Manage long-running background processes such as dev servers, watchers or build \
         daemons. action=start runs a command in the background and, with wait_port, waits \
         up to 60 seconds for that port to accept connections. action=stop sends SIGTERM to \
         a process started here, then SIGKILL after 5 seconds. action=list shows tracked \
         processes with their status and uptime."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["start", "stop", "list"], "description": "What to do." },
                "command": { "type": "string", "description": "Shell command to run (start)." },
                "working_dir": { "type": "string", "description": "Directory to run the command in (start)." },
                "wait_port": { "type": "integer", "description": "Wait until this local TCP port accepts connections (start)." },
                "pid": { "type": "integer", "description": "Process to stop (stop)." },
            },
            "required": ["action"],
        })
    }

    fn execute<'a>(&'a self, args: &'a Value) -> BoxFuture<'a, anyhow::Result<String>> {
        Box::pin(async move {
            match required_str(args, "action")? {
                "start" => self.start(args).await,
                "stop" => {
                    let pid = optional_u64(args, "pid")
                        .context("pid is required for stop action")?;
                    let pid = u32::try_from(pid).context("pid out of range")?;
                    self.stop(pid).await
                }
                "list" => Ok(self.list()),
                other => anyhow::bail!("unknown action: {other} (use start, stop, or list)"),
            }
        })
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.stop_all())
    }
}

#[cfg(test)]
#[path = "background_tests.rs"]
mod tests;
