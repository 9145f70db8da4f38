// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC client for one MCP server.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use crate::credential::{ToolServerSpec, TransportType};
use crate::error::McpError;
use crate::mcp::protocol::{
    self, JsonRpcNotification, JsonRpcRequest, McpTool, ToolOutput,
};
use crate::mcp::sse::SseTransport;
use crate::mcp::stdio::StdioTransport;
use crate::mcp::transport::{McpTransport, PendingCalls};

/// Bound on the initialize + tools/list handshake.
pub const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// A connected MCP server. Requests may be issued concurrently; responses
/// are matched to callers by id.
pub struct McpClient {
    name: String,
    transport: Box<dyn McpTransport>,
    pending: Arc<PendingCalls>,
}

impl McpClient {
    /// Open the transport named by `spec.transport_type`.
    pub async fn connect(spec: &ToolServerSpec) -> Result<Self, McpError> {
        let pending = Arc::new(PendingCalls::default());
        let transport: Box<dyn McpTransport> = match spec.transport_type {
            TransportType::Stdio => Box::new(StdioTransport::spawn(spec, Arc::clone(&pending))?),
            TransportType::Sse => {
                Box::new(SseTransport::connect(spec, Arc::clone(&pending)).await?)
            }
        };
        Ok(Self::with_transport(&spec.name, transport, pending))
    }

    pub fn with_transport(
        name: &str,
        transport: Box<dyn McpTransport>,
        pending: Arc<PendingCalls>,
    ) -> Self {
        Self { name: name.to_owned(), transport, pending }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_alive() && !self.pending.is_closed()
    }

    pub fn pid(&self) -> Option<u32> {
        self.transport.pid()
    }

    pub fn diagnostics(&self) -> String {
        self.transport.diagnostics()
    }

    /// Issue a request and wait for its response.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let (id, rx) = self.pending.register()?;
        let _guard = CancelOnDrop { pending: &self.pending, id };
        let message = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        self.transport.send(message).await?;
        rx.await.map_err(|_| McpError::Closed)?
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let message = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.transport.send(message).await
    }

    /// Run the MCP handshake and return the server's tools.
    pub async fn initialize(&self) -> Result<Vec<McpTool>, McpError> {
        let handshake = async {
            let info = self.request("initialize", Some(protocol::initialize_params())).await?;
            debug!(
                server = %self.name,
                server_info = %info.get("serverInfo").cloned().unwrap_or_default(),
                "initialized"
            );
            self.notify("notifications/initialized", None).await?;
            self.list_tools().await
        };
        tokio::time::timeout(INIT_TIMEOUT, handshake)
            .await
            .map_err(|_| McpError::Timeout(INIT_TIMEOUT))?
    }

    pub async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        let result = self.request("tools/list", Some(json!({}))).await?;
        protocol::parse_tools(result)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, McpError> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self.request("tools/call", Some(params)).await?;
        Ok(protocol::call_output(result))
    }

    /// Close the transport and stop the server process.
    pub async fn shutdown(&self) {
        self.transport.shutdown().await;
    }
}

/// Forgets a request's waiter when the caller stops waiting for it.
struct CancelOnDrop<'a> {
    pending: &'a PendingCalls,
    id: u64,
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        self.pending.cancel(self.id);
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
