// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicBool, Ordering};

use super::*;
use crate::mcp::transport::BoxFuture;

/// In-process server: answers each request on a spawned task, after the
/// call's `delay_ms` argument when given.
struct Loopback {
    pending: Arc<PendingCalls>,
    fail_sends: AtomicBool,
}

impl Loopback {
    fn new(pending: Arc<PendingCalls>) -> Self {
        Self { pending, fail_sends: AtomicBool::new(false) }
    }

    fn respond(request: &Value) -> Option<(u64, Value, u64)> {
        let id = request.get("id")?.as_u64()?;
        let method = request.get("method")?.as_str()?;
        let (result, delay) = match method {
            "initialize" => {
                (json!({"protocolVersion": "2024-11-05", "serverInfo": {"name": "loop"}}), 0)
            }
            "tools/list" => (json!({"tools": [{"name": "echo", "description": "Echo"}]}), 0),
            "tools/call" => {
                let args = &request["params"]["arguments"];
                let delay = args["delay_ms"].as_u64().unwrap_or(0);
                let text = args["text"].as_str().unwrap_or_default().to_owned();
                (json!({"content": [{"type": "text", "text": text}]}), delay)
            }
            _ => return None,
        };
        Some((id, json!({"jsonrpc": "2.0", "id": id, "result": result}), delay))
    }
}

impl McpTransport for Loopback {
    fn send(&self, message: String) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(async move {
            if self.fail_sends.load(Ordering::Relaxed) {
                return Err(McpError::Io("broken pipe".into()));
            }
            let request: Value = serde_json::from_str(&message)?;
            if let Some((_id, response, delay)) = Self::respond(&request) {
                let pending = Arc::clone(&self.pending);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    pending.dispatch(&response.to_string());
                });
            }
            Ok(())
        })
    }

    fn is_alive(&self) -> bool {
        !self.pending.is_closed()
    }

    fn pid(&self) -> Option<u32> {
        None
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.pending.fail_all(McpError::Closed) })
    }
}

fn loopback_client() -> (McpClient, Arc<PendingCalls>) {
    let pending = Arc::new(PendingCalls::default());
    let transport = Box::new(Loopback::new(Arc::clone(&pending)));
    (McpClient::with_transport("loop", transport, Arc::clone(&pending)), pending)
}

#[tokio::test]
async fn initialize_returns_tools() -> anyhow::Result<()> {
    let (client, _) = loopback_client();
    let tools = client.initialize().await?;
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");
    Ok(())
}

#[tokio::test]
async fn concurrent_calls_resolve_independently() -> anyhow::Result<()> {
    let (client, _) = loopback_client();

    let slow = client.call_tool("echo", json!({"text": "slow", "delay_ms": 100}));
    let fast = client.call_tool("echo", json!({"text": "fast"}));
    let (slow, fast) = tokio::join!(slow, fast);

    assert_eq!(slow?.text, "slow");
    assert_eq!(fast?.text, "fast");
    Ok(())
}

#[tokio::test]
async fn send_failure_does_not_leak_pending_entry() {
    let pending = Arc::new(PendingCalls::default());
    let transport = Loopback::new(Arc::clone(&pending));
    transport.fail_sends.store(true, Ordering::Relaxed);
    let client = McpClient::with_transport("loop", Box::new(transport), Arc::clone(&pending));

    let result = client.request("tools/list", None).await;
    assert!(matches!(result, Err(McpError::Io(_))));
    assert!(pending.is_empty());
}

#[tokio::test]
async fn shutdown_fails_later_requests() {
    let (client, _) = loopback_client();
    client.shutdown().await;
    assert!(!client.is_alive());
    assert_eq!(client.request("tools/list", None).await, Err(McpError::Closed));
}

#[tokio::test]
async fn unknown_method_times_out_only_that_call() -> anyhow::Result<()> {
    let (client, pending) = loopback_client();
    let stuck = tokio::time::timeout(Duration::from_millis(50), client.request("nope", None)).await;
    assert!(stuck.is_err());

    assert!(pending.is_empty());
    assert_eq!(client.call_tool("echo", json!({"text": "ok"})).await?.text, "ok");
    Ok(())
}
