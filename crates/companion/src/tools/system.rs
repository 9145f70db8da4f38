// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host tools: `execute_bash` and `get_device_info`.

use std::fmt::Write as _;
use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{
    optional_str, optional_u64, required_str, truncate_smartly, CoreTool, OUTPUT_LIMIT_CHARS,
};
use crate::mcp::transport::BoxFuture;

pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(2 * 60);
pub const MAX_EXEC_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Shell fragments refused outright. Matching ignores case and runs of
/// whitespace.
pub const DANGEROUS_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "rm -rf ~",
    "mkfs.",
    "dd if=/dev/zero",
    "dd if=/dev/random",
    "dd if=/dev/urandom",
    ":(){ :|:& };:",
    "chmod -R 000",
    "chmod -R 777 /",
    "> /dev/sda",
    "mv / ",
    "wget -O- | sh",
    "curl | sh",
    "curl | bash",
];

/// The first dangerous pattern `command` contains, if any.
pub fn dangerous_pattern(command: &str) -> Option<&'static str> {
    let normalize = |s: &str| s.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ");
    let command = normalize(command);
    DANGEROUS_PATTERNS.iter().copied().find(|p| command.contains(&normalize(p)))
}

// ── execute_bash ────────────────────────────────────────────────────────

pub struct ExecuteBash {
    default_timeout: Duration,
}

impl Default for ExecuteBash {
    fn default() -> Self {
        Self { default_timeout: DEFAULT_EXEC_TIMEOUT }
    }
}

impl ExecuteBash {
    fn timeout_for(&self, args: &Value) -> Duration {
        optional_u64(args, "timeout_ms")
            .map_or(self.default_timeout, |ms| Duration::from_millis(ms).min(MAX_EXEC_TIMEOUT))
    }

    async fn run(&self, args: &Value) -> anyhow::Result<String> {
        let command = required_str(args, "command")?;
        if let Some(pattern) = dangerous_pattern(command) {
            anyhow::bail!("command blocked: contains dangerous pattern: {pattern}");
        }
        let timeout = self.timeout_for(args);

        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = optional_str(args, "working_dir") {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn()?;
        let pid = child.id();
        debug!(?pid, ?timeout, "execute_bash started");

        let mut out = String::new();
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                let code = output.status.code().unwrap_or(-1);
                let _ = writeln!(out, "EXIT_CODE: {code}");
                append_streams(&mut out, &output.stdout, &output.stderr);
            }
            Err(_) => {
                // The dropped future already killed bash; take its children too.
                kill_group(pid);
                let _ = writeln!(out, "EXIT_CODE: -1");
                let _ = writeln!(out, "TIMEOUT: Command timed out after {timeout:?}");
                out.push_str("\n(no output)");
            }
        }
        Ok(out)
    }
}

fn append_streams(out: &mut String, stdout: &[u8], stderr: &[u8]) {
    if !stdout.is_empty() {
        out.push_str("\nSTDOUT:\n");
        out.push_str(&truncate_smartly(&String::from_utf8_lossy(stdout), OUTPUT_LIMIT_CHARS));
    }
    if !stderr.is_empty() {
        out.push_str("\nSTDERR:\n");
        out.push_str(&truncate_smartly(&String::from_utf8_lossy(stderr), OUTPUT_LIMIT_CHARS));
    }
    if stdout.is_empty() && stderr.is_empty() {
        out.push_str("\n(no output)");
    }
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!(pid, err = %e, "killpg after timeout failed");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

impl CoreTool for ExecuteBash {
    fn name(&self) -> &'static str {
        "execute_bash"
    }

    fn description(&self) -> &'static str {
        "Execute a command on the local machine via `bash -c`. Returns EXIT_CODE, STDOUT \
         and STDERR sections; exit code -1 means the command timed out. Destructive \
         patterns (rm -rf /, fork bombs, disk wipes) are blocked. Output is capped at 30K \
         characters keeping head and tail. Default timeout 2 minutes, max 10 minutes."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The command to run with bash -c." },
                "working_dir": { "type": "string", "description": "Working directory for the command." },
                "timeout_ms": { "type": "integer", "description": "Timeout in milliseconds. Default 120000, max 600000." },
            },
            "required": ["command"],
        })
    }

    fn execute<'a>(&'a self, args: &'a Value) -> BoxFuture<'a, anyhow::Result<String>> {
        Box::pin(self.run(args))
    }
}

// ── get_device_info ─────────────────────────────────────────────────────

pub struct DeviceInfo;

impl DeviceInfo {
    pub fn report() -> String {
        let mut out = String::new();
        let host = hostname().unwrap_or_else(|| "(unknown)".into());
        let _ = writeln!(out, "Hostname:      {host}");
        let _ = writeln!(out, "OS:            {}", std::env::consts::OS);
        let _ = writeln!(out, "Architecture:  {}", std::env::consts::ARCH);
        if let Some((user, home)) = current_user() {
            let _ = writeln!(out, "Username:      {user}");
            let _ = writeln!(out, "Home:          {home}");
        }
        if let Ok(sudo_user) = std::env::var("SUDO_USER") {
            let _ = writeln!(out, "Sudo User:     {sudo_user} (running as root via sudo)");
        }
        let _ = writeln!(out, "Elevated:      {}", is_elevated());
        if let Ok(cwd) = std::env::current_dir() {
            let _ = writeln!(out, "Working Dir:   {}", cwd.display());
        }
        if let Ok(shell) = std::env::var("SHELL") {
            let _ = writeln!(out, "Shell:         {shell}");
        }
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
        let _ = writeln!(out, "CPU Cores:     {cores}");
        out
    }
}

impl CoreTool for DeviceInfo {
    fn name(&self) -> &'static str {
        "get_device_info"
    }

    fn description(&self) -> &'static str {
        "Describe the device this companion runs on: hostname, OS, architecture, user, \
         home and working directory, shell, CPU cores, and whether it runs elevated."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {}, "required": [] })
    }

    fn execute<'a>(&'a self, _args: &'a Value) -> BoxFuture<'a, anyhow::Result<String>> {
        Box::pin(async { Ok(Self::report()) })
    }
}

#[cfg(unix)]
fn hostname() -> Option<String> {
    match nix::unistd::gethostname() {
        Ok(name) => Some(name.to_string_lossy().into_owned()),
        Err(e) => {
            warn!(err = %e, "gethostname failed");
            None
        }
    }
}

#[cfg(not(unix))]
fn hostname() -> Option<String> {
    std::env::var("COMPUTERNAME").ok()
}

#[cfg(unix)]
fn current_user() -> Option<(String, String)> {
    let user = nix::unistd::User::from_uid(nix::unistd::getuid()).ok().flatten()?;
    Some((user.name, user.dir.display().to_string()))
}

#[cfg(not(unix))]
fn current_user() -> Option<(String, String)> {
    Some((std::env::var("USERNAME").ok()?, std::env::var("USERPROFILE").unwrap_or_default()))
}

#[cfg(unix)]
fn is_elevated() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
fn is_elevated() -> bool {
    false
}

#[cfg(test)]
#[path = "system_tests.rs"]
mod tests;
