// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport seam shared by stdio and SSE servers.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::McpError;
use crate::mcp::protocol::JsonRpcMessage;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outbound half of an MCP server connection.
///
/// Inbound messages are routed by the transport's own reader task into the
/// [`PendingCalls`] it was created with.
pub trait McpTransport: Send + Sync {
    /// Deliver one serialized JSON-RPC message to the server.
    fn send(&self, message: String) -> BoxFuture<'_, Result<(), McpError>>;

    /// False once the server process or stream has gone away.
    fn is_alive(&self) -> bool;

    fn pid(&self) -> Option<u32>;

    /// Close the connection and stop any owned process.
    fn shutdown(&self) -> BoxFuture<'_, ()>;

    /// Recent diagnostic output (stderr) for error reports.
    fn diagnostics(&self) -> String {
        String::new()
    }
}

type Waiter = oneshot::Sender<Result<Value, McpError>>;

/// Requests awaiting a response, keyed by JSON-RPC id.
#[derive(Default)]
pub struct PendingCalls {
    next_id: AtomicU64,
    waiters: Mutex<HashMap<u64, Waiter>>,
    closed: AtomicBool,
}

impl PendingCalls {
    /// Allocate an id and a receiver for its response.
    pub fn register(&self) -> Result<(u64, oneshot::Receiver<Result<Value, McpError>>), McpError> {
        let mut waiters = self.waiters.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(McpError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        waiters.insert(id, tx);
        Ok((id, rx))
    }

    /// Drop the waiter for `id` (send failed or caller gave up).
    pub fn cancel(&self, id: u64) {
        self.waiters.lock().remove(&id);
    }

    pub fn complete(&self, id: u64, result: Result<Value, McpError>) {
        let waiter = self.waiters.lock().remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => debug!(id, "response for unknown request id"),
        }
    }

    /// Route one raw inbound message. Non-JSON text and messages that are
    /// not responses are skipped.
    pub fn dispatch(&self, raw: &str) {
        let msg: JsonRpcMessage = match serde_json::from_str(raw) {
            Ok(m) => m,
            Err(_) => {
                debug!(line = %raw, "skipping non-JSON server output");
                return;
            }
        };
        match msg.response_id() {
            Some(id) => self.complete(id, msg.into_result()),
            None => debug!(method = ?msg.method, "ignoring server-initiated message"),
        }
    }

    /// Fail every outstanding request and refuse new ones.
    pub fn fail_all(&self, err: McpError) {
        let drained: Vec<Waiter> = {
            let mut waiters = self.waiters.lock();
            self.closed.store(true, Ordering::Release);
            waiters.drain().map(|(_, tx)| tx).collect()
        };
        for tx in drained {
            let _ = tx.send(Err(err.clone()));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
