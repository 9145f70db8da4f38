// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor for running MCP servers and the tool-name routing table.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::credential::{ToolServerSpec, TransportType};
use crate::error::{McpError, RegistryError};
use crate::mcp::client::McpClient;
use crate::mcp::protocol::McpTool;
use crate::tools::ToolDefinition;

/// A started server and the tools it reported during the handshake.
pub struct RunningServer {
    spec: ToolServerSpec,
    client: McpClient,
    tools: Vec<McpTool>,
}

impl RunningServer {
    pub fn spec(&self) -> &ToolServerSpec {
        &self.spec
    }

    pub fn tools(&self) -> &[McpTool] {
        &self.tools
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    pub fn pid(&self) -> Option<u32> {
        self.client.pid()
    }

    pub fn is_alive(&self) -> bool {
        self.client.is_alive()
    }
}

/// Point-in-time view of one running server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub name: String,
    #[serde(rename = "type")]
    pub transport_type: TransportType,
    pub tool_count: usize,
    pub pid: Option<u32>,
    pub alive: bool,
}

#[derive(Default)]
struct Servers {
    running: IndexMap<String, Arc<RunningServer>>,
    /// Tool name to owning server. When two servers expose the same tool,
    /// the one started first keeps it.
    tool_index: HashMap<String, String>,
}

impl Servers {
    fn reindex(&mut self) {
        self.tool_index.clear();
        for (server, running) in &self.running {
            for tool in &running.tools {
                if let Some(owner) = self.tool_index.get(&tool.name) {
                    debug!(
                        tool = %tool.name,
                        owner = %owner,
                        shadowed = %server,
                        "duplicate tool name"
                    );
                    continue;
                }
                self.tool_index.insert(tool.name.clone(), server.clone());
            }
        }
    }
}

/// Owns every running MCP server.
///
/// The server map and tool index change together under one write lock.
/// Start and stop additionally serialize on `lifecycle` so that two starts
/// of the same name can never both spawn a process.
#[derive(Default)]
pub struct ServerRegistry {
    servers: RwLock<Servers>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl ServerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Start `spec`, replacing any server already running under its name.
    /// Returns the number of tools discovered.
    pub async fn start_server(&self, spec: &ToolServerSpec) -> Result<usize, RegistryError> {
        self.start_server_with_context(&CancellationToken::new(), spec).await
    }

    /// Like [`start_server`](Self::start_server), but gives up when `cancel`
    /// fires. A cancelled start leaves no process behind and does not touch
    /// the registry.
    pub async fn start_server_with_context(
        &self,
        cancel: &CancellationToken,
        spec: &ToolServerSpec,
    ) -> Result<usize, RegistryError> {
        let cancelled = || RegistryError::Cancelled(spec.name.clone());
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        let _lifecycle = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            guard = self.lifecycle.lock() => guard,
        };

        if let Some(previous) = self.detach(&spec.name) {
            info!(server = %spec.name, "replacing running server");
            previous.client.shutdown().await;
        }

        info!(server = %spec.name, transport = %spec.transport_type, "starting MCP server");
        let start_failed = |e: McpError, diagnostics: String| {
            let mut detail = e.to_string();
            if !diagnostics.is_empty() {
                detail.push('\n');
                detail.push_str(&diagnostics);
            }
            RegistryError::StartFailed { name: spec.name.clone(), detail }
        };

        // Dropping a half-open client on cancellation kills its process.
        let client = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            client = McpClient::connect(spec) => {
                client.map_err(|e| start_failed(e, String::new()))?
            }
        };
        let handshake = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            tools = client.initialize() => Some(tools),
        };
        let tools = match handshake {
            Some(Ok(tools)) => tools,
            Some(Err(e)) => {
                let diagnostics = client.diagnostics();
                client.shutdown().await;
                return Err(start_failed(e, diagnostics));
            }
            None => {
                client.shutdown().await;
                return Err(cancelled());
            }
        };

        let count = tools.len();
        info!(server = %spec.name, tools = count, pid = ?client.pid(), "MCP server started");
        for tool in &tools {
            debug!(server = %spec.name, tool = %tool.name, "discovered tool");
        }

        let running = Arc::new(RunningServer { spec: spec.clone(), client, tools });
        let mut servers = self.servers.write();
        servers.running.insert(spec.name.clone(), running);
        servers.reindex();
        Ok(count)
    }

    /// Stop the named server. Returns false when it was not running.
    pub async fn stop_server(&self, name: &str) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        match self.detach(name) {
            Some(running) => {
                info!(server = %name, "stopping MCP server");
                running.client.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Stop every server and wait for all of them to be reaped.
    pub async fn stop_all(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let drained: Vec<Arc<RunningServer>> = {
            let mut servers = self.servers.write();
            servers.tool_index.clear();
            servers.running.drain(..).map(|(_, s)| s).collect()
        };
        if drained.is_empty() {
            return;
        }
        info!(count = drained.len(), "stopping all MCP servers");
        futures_util::future::join_all(drained.iter().map(|s| s.client.shutdown())).await;
    }

    /// Stop and start a running server with the settings it was started with.
    pub async fn restart_server(&self, name: &str) -> Result<usize, RegistryError> {
        let spec = self
            .servers
            .read()
            .running
            .get(name)
            .map(|s| s.spec.clone())
            .ok_or_else(|| RegistryError::ServerNotFound(name.to_owned()))?;
        self.start_server(&spec).await
    }

    /// Forward a tool call to the server that owns `tool`.
    ///
    /// No timeout is applied: a stuck server stalls only this call.
    pub async fn execute_tool(
        &self,
        tool: &str,
        arguments: Value,
    ) -> Result<String, RegistryError> {
        let server = {
            let servers = self.servers.read();
            let owner = servers
                .tool_index
                .get(tool)
                .ok_or_else(|| RegistryError::ToolNotFound(tool.to_owned()))?;
            servers
                .running
                .get(owner)
                .cloned()
                .ok_or_else(|| RegistryError::ServerNotFound(owner.clone()))?
        };

        debug!(server = %server.spec.name, tool, "executing tool");
        let output = server.client.call_tool(tool, arguments).await.map_err(|e| {
            warn!(server = %server.spec.name, tool, err = %e, "tool call failed");
            RegistryError::ExecutionFailed(e.to_string())
        })?;
        if output.is_error {
            return Err(RegistryError::ExecutionFailed(output.text));
        }
        Ok(output.text)
    }

    // ── Introspection ───────────────────────────────────────────────────

    pub fn get_server_for_tool(&self, tool: &str) -> Option<String> {
        self.servers.read().tool_index.get(tool).cloned()
    }

    /// Every routable tool, in server start order.
    pub fn get_all_tools(&self) -> Vec<ToolDefinition> {
        let servers = self.servers.read();
        let mut tools = Vec::with_capacity(servers.tool_index.len());
        for (name, running) in &servers.running {
            for tool in &running.tools {
                if servers.tool_index.get(&tool.name) == Some(name) {
                    tools.push(ToolDefinition::from_mcp(tool, name));
                }
            }
        }
        tools
    }

    pub fn get_server_tool_count(&self, name: &str) -> usize {
        self.servers.read().running.get(name).map_or(0, |s| s.tool_count())
    }

    pub fn get_server_count(&self) -> usize {
        self.servers.read().running.len()
    }

    /// Number of routable tools, after duplicate names are resolved.
    pub fn get_tool_count(&self) -> usize {
        self.servers.read().tool_index.len()
    }

    pub fn server_names(&self) -> Vec<String> {
        self.servers.read().running.keys().cloned().collect()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.servers.read().running.contains_key(name)
    }

    pub fn statuses(&self) -> Vec<ServerStatus> {
        self.servers
            .read()
            .running
            .values()
            .map(|s| ServerStatus {
                name: s.spec.name.clone(),
                transport_type: s.spec.transport_type,
                tool_count: s.tool_count(),
                pid: s.pid(),
                alive: s.is_alive(),
            })
            .collect()
    }

    fn detach(&self, name: &str) -> Option<Arc<RunningServer>> {
        let mut servers = self.servers.write();
        let removed = servers.running.shift_remove(name)?;
        servers.reindex();
        Some(removed)
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
