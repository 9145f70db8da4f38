// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Built-in tools in front of the MCP server registry.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use super::{core_tools, CoreTool, ToolDefinition, CORE_OWNER};
use crate::error::RegistryError;
use crate::mcp::ServerRegistry;

/// Executes a tool by name: built-ins first, then MCP servers.
///
/// A server tool whose name matches a built-in is shadowed: it is never
/// executed and never advertised.
pub struct UnifiedRegistry {
    core: IndexMap<&'static str, Box<dyn CoreTool>>,
    servers: Arc<ServerRegistry>,
}

impl UnifiedRegistry {
    pub fn new(servers: Arc<ServerRegistry>) -> Self {
        Self::with_core_tools(servers, core_tools())
    }

    pub fn with_core_tools(servers: Arc<ServerRegistry>, tools: Vec<Box<dyn CoreTool>>) -> Self {
        let core = tools.into_iter().map(|t| (t.name(), t)).collect();
        Self { core, servers }
    }

    pub fn servers(&self) -> &Arc<ServerRegistry> {
        &self.servers
    }

    pub fn is_core_tool(&self, name: &str) -> bool {
        self.core.contains_key(name)
    }

    pub fn core_tool_count(&self) -> usize {
        self.core.len()
    }

    /// Built-in tool definitions keyed by name.
    pub fn get_core_tool_defs_as_map(&self) -> IndexMap<String, ToolDefinition> {
        self.core
            .iter()
            .map(|(name, tool)| ((*name).to_owned(), ToolDefinition::from_core(tool.as_ref())))
            .collect()
    }

    /// Everything to advertise to the peer: built-ins, then server tools
    /// that are not shadowed.
    pub fn registration_tools(&self) -> Vec<ToolDefinition> {
        let mut tools: Vec<ToolDefinition> =
            self.get_core_tool_defs_as_map().into_values().collect();
        let server_tools = self.servers.get_all_tools();
        tools.extend(server_tools.into_iter().filter(|t| !self.is_core_tool(&t.name)));
        tools
    }

    /// Server that would run `name`: `core`, an MCP server name, or None.
    pub fn owner_of(&self, name: &str) -> Option<String> {
        if self.is_core_tool(name) {
            return Some(CORE_OWNER.to_owned());
        }
        self.servers.get_server_for_tool(name)
    }

    pub async fn execute(&self, name: &str, arguments: Value) -> Result<String, RegistryError> {
        if let Some(tool) = self.core.get(name) {
            debug!(tool = name, "executing core tool");
            return tool
                .execute(&arguments)
                .await
                .map_err(|e| RegistryError::ExecutionFailed(format!("{e:#}")));
        }
        self.servers.execute_tool(name, arguments).await
    }

    /// Let every built-in release what it keeps running, such as
    /// background processes.
    pub async fn shutdown_core_tools(&self) {
        futures_util::future::join_all(self.core.values().map(|t| t.shutdown())).await;
    }
}

#[cfg(test)]
#[path = "unified_tests.rs"]
mod tests;
