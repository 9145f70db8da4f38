// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
#[cfg(unix)]
use crate::mcp::process::is_pid_alive;

fn started_pid(output: &str) -> anyhow::Result<u32> {
    let line = output
        .lines()
        .find_map(|l| l.strip_prefix("PID: "))
        .ok_or_else(|| anyhow::anyhow!("no PID in {output:?}"))?;
    Ok(line.trim().parse()?)
}

async fn wait_until_exited(tool: &RunBackground, pid: u32) -> anyhow::Result<()> {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        let exited = tool.processes.lock().get(&pid).is_some_and(|t| t.exit.borrow().is_some());
        if exited {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    anyhow::bail!("process {pid} never exited")
}

#[yare::parameterized(
    seconds = { 42, "42s" },
    minutes = { 125, "2m5s" },
    hours = { 3723, "1h2m3s" },
)]
fn uptime_format(secs: u64, expected: &str) {
    assert_eq!(format_uptime(Duration::from_secs(secs)), expected);
}

#[cfg(unix)]
#[tokio::test]
async fn start_list_stop() -> anyhow::Result<()> {
    let tool = RunBackground::default();
    let out = tool.execute(&json!({ "action": "start", "command": "sleep 30" })).await?;
    assert!(out.starts_with("Process started successfully.\n"), "{out}");
    let pid = started_pid(&out)?;
    assert!(is_pid_alive(pid));

    let listing = tool.execute(&json!({ "action": "list" })).await?;
    assert!(listing.starts_with("Tracked background processes (1):"), "{listing}");
    assert!(listing.contains("Command: sleep 30"), "{listing}");
    assert!(listing.contains("Status: running"), "{listing}");

    let out = tool.execute(&json!({ "action": "stop", "pid": pid })).await?;
    assert_eq!(out, format!("Process {pid} stopped."));
    assert!(!is_pid_alive(pid));
    assert_eq!(tool.execute(&json!({ "action": "list" })).await?, "No tracked background processes.");
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn stopping_an_exited_process_reports_its_code() -> anyhow::Result<()> {
    let tool = RunBackground::default();
    let out = tool.execute(&json!({ "action": "start", "command": "exit 3" })).await?;
    let pid = started_pid(&out)?;
    wait_until_exited(&tool, pid).await?;

    let listing = tool.execute(&json!({ "action": "list" })).await?;
    assert!(listing.contains("Status: exited (code 3)"), "{listing}");
    let out = tool.execute(&json!({ "action": "stop", "pid": pid })).await?;
    assert_eq!(out, format!("Process {pid} has already exited (code 3)."));
    Ok(())
}

#[tokio::test]
async fn refuses_untracked_and_dangerous() {
    let tool = RunBackground::default();
    assert!(tool.execute(&json!({ "action": "stop", "pid": 1 })).await.is_err());
    assert!(tool.execute(&json!({ "action": "stop" })).await.is_err());
    assert!(tool.execute(&json!({ "action": "start", "command": "rm -rf /" })).await.is_err());
    assert!(tool.execute(&json!({ "action": "restart" })).await.is_err());
}

#[cfg(unix)]
#[tokio::test]
async fn waits_for_a_listening_port() -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let tool = RunBackground::default();

    let out = tool
        .execute(&json!({ "action": "start", "command": "sleep 30", "wait_port": port }))
        .await?;
    assert!(out.contains(&format!("Port {port} is ready")), "{out}");
    assert!(tool.list().contains(&format!("Port: {port}")));
    tool.stop_all().await;
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn port_wait_ends_when_the_process_exits() -> anyhow::Result<()> {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?.port()
    };
    let tool = RunBackground::default();
    let out = tool
        .execute(&json!({ "action": "start", "command": "exit 2", "wait_port": port }))
        .await?;
    assert!(
        out.contains(&format!("WARNING: Process exited (code 2) before port {port}")),
        "{out}"
    );
    Ok(())
}

/// Gone or a zombie waiting on a parent that never reaps.
#[cfg(target_os = "linux")]
fn is_dead(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat.rsplit(')').next().is_some_and(|rest| rest.trim_start().starts_with('Z')),
        Err(_) => true,
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn shutdown_stops_group_children() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let child_pid_file = dir.path().join("child.pid");
    let command = format!("sleep 30 & echo $! > {}; wait", child_pid_file.display());
    let tool = RunBackground::default();
    let out = tool.execute(&json!({ "action": "start", "command": command })).await?;
    let pid = started_pid(&out)?;

    let deadline = Instant::now() + Duration::from_secs(10);
    let child_pid: u32 = loop {
        if let Ok(text) = std::fs::read_to_string(&child_pid_file) {
            if let Ok(pid) = text.trim().parse() {
                break pid;
            }
        }
        anyhow::ensure!(Instant::now() < deadline, "child pid never written");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    tool.shutdown().await;
    assert!(!is_pid_alive(pid));
    let deadline = Instant::now() + Duration::from_secs(5);
    while !is_dead(child_pid) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(is_dead(child_pid));
    assert!(tool.processes.lock().is_empty());
    Ok(())
}
