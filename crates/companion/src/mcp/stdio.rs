// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Line-delimited JSON-RPC over a child's stdin/stdout.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tracing::debug;

use crate::credential::ToolServerSpec;
use crate::error::McpError;
use crate::mcp::process::{read_lines_lossy, ChildProcess, ProcessHandle};
use crate::mcp::transport::{BoxFuture, McpTransport, PendingCalls};

/// Lines of stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

pub struct StdioTransport {
    process: ChildProcess,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    pending: Arc<PendingCalls>,
}

impl StdioTransport {
    /// Launch the server and start routing its stdout into `pending`.
    pub fn spawn(spec: &ToolServerSpec, pending: Arc<PendingCalls>) -> Result<Self, McpError> {
        let program = spec
            .program()
            .ok_or_else(|| McpError::Protocol(format!("server {} has no command", spec.name)))?;
        let spawned = ChildProcess::spawn(&spec.name, program, &spec.args)?;

        let stdout = spawned.stdout.ok_or(McpError::Closed)?;
        let reader_pending = Arc::clone(&pending);
        let label = spec.name.clone();
        tokio::spawn(async move {
            let read = read_lines_lossy(stdout, |line| {
                let line = line.trim();
                if !line.is_empty() {
                    reader_pending.dispatch(line);
                }
            })
            .await;
            if let Err(e) = read {
                debug!(server = %label, err = %e, "stdout read failed");
            }
            debug!(server = %label, "server stdout closed");
            reader_pending.fail_all(McpError::Closed);
        });

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        if let Some(stderr) = spawned.stderr {
            let tail = Arc::clone(&stderr_tail);
            let label = spec.name.clone();
            tokio::spawn(async move {
                let read = read_lines_lossy(stderr, |line| {
                    debug!(server = %label, "stderr: {line}");
                    let mut buf = tail.lock();
                    if buf.len() == STDERR_TAIL_LINES {
                        buf.pop_front();
                    }
                    buf.push_back(line);
                })
                .await;
                if let Err(e) = read {
                    debug!(server = %label, err = %e, "stderr read failed");
                }
            });
        }

        Ok(Self {
            process: spawned.process,
            stdin: tokio::sync::Mutex::new(spawned.stdin),
            stderr_tail,
            pending,
        })
    }

    /// Most recent stderr output, newest last.
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail.lock().iter().cloned().collect::<Vec<_>>().join("\n")
    }

    async fn write_line(&self, message: String) -> Result<(), McpError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(McpError::Closed)?;
        stdin.write_all(message.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn close(&self) {
        // Closing stdin is the polite way to ask an MCP server to exit.
        drop(self.stdin.lock().await.take());
        self.process.stop().await;
        self.pending.fail_all(McpError::Closed);
    }
}

impl McpTransport for StdioTransport {
    fn send(&self, message: String) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(self.write_line(message))
    }

    fn is_alive(&self) -> bool {
        self.process.is_alive()
    }

    fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.close())
    }

    fn diagnostics(&self) -> String {
        self.stderr_tail()
    }
}
