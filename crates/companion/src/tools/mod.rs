// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Built-in tools and the registry that merges them with MCP server tools.

pub mod background;
pub mod edit;
pub mod fs;
pub mod http;
pub mod search;
pub mod system;
pub mod unified;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mcp::protocol::McpTool;
use crate::mcp::transport::BoxFuture;

pub use unified::UnifiedRegistry;

/// Owner label reported for built-in tools.
pub const CORE_OWNER: &str = "core";

/// Output above this many characters is cut down to a head and a tail.
pub const OUTPUT_LIMIT_CHARS: usize = 30_000;

/// Directories skipped by recursive listings and searches.
pub(crate) const IGNORED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    "__pycache__",
    ".pycache",
    "vendor",
    ".venv",
    "venv",
    ".next",
    ".nuxt",
    ".svelte-kit",
    ".turbo",
    ".cache",
    ".parcel-cache",
    "coverage",
    ".nyc_output",
    ".tox",
    ".eggs",
    "target",
    "out",
    ".terraform",
    ".angular",
    "bower_components",
    ".idea",
    ".vscode",
];

/// One entry of the tool registration payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parameters: Value,
    /// Owning MCP server; absent for built-in tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

impl ToolDefinition {
    pub fn from_mcp(tool: &McpTool, server: &str) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.input_schema.clone(),
            server_name: Some(server.to_owned()),
        }
    }

    pub fn from_core(tool: &dyn CoreTool) -> Self {
        Self {
            name: tool.name().to_owned(),
            description: tool.description().to_owned(),
            parameters: tool.parameters(),
            server_name: None,
        }
    }

    pub fn owner(&self) -> &str {
        self.server_name.as_deref().unwrap_or(CORE_OWNER)
    }
}

/// A tool implemented in-process.
pub trait CoreTool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;
    fn execute<'a>(&'a self, args: &'a Value) -> BoxFuture<'a, anyhow::Result<String>>;
    /// Release anything the tool keeps running between calls.
    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// The fixed set of built-in tools.
pub fn core_tools() -> Vec<Box<dyn CoreTool>> {
    vec![
        Box::new(system::ExecuteBash::default()),
        Box::new(fs::ReadFile),
        Box::new(fs::WriteFile),
        Box::new(edit::StringReplace),
        Box::new(search::FindFiles),
        Box::new(search::Grep),
        Box::new(fs::ListDirectory),
        Box::new(system::DeviceInfo),
        Box::new(background::RunBackground::default()),
        Box::new(http::HttpRequest::default()),
    ]
}

// ── Argument helpers ────────────────────────────────────────────────────

fn required_str<'a>(args: &'a Value, key: &str) -> anyhow::Result<&'a str> {
    match args.get(key).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => anyhow::bail!("{key} is required"),
    }
}

fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Positive integer argument. JSON numbers from the peer may arrive as floats.
fn optional_u64(args: &Value, key: &str) -> Option<u64> {
    let value = args.get(key)?;
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 1.0).map(|f| f as u64))
        .filter(|n| *n > 0)
}

fn optional_bool(args: &Value, key: &str) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Keep the first 60% and the tail of `output` when it exceeds `limit`
/// characters, with a notice of how much was dropped in between.
pub fn truncate_smartly(output: &str, limit: usize) -> String {
    let total = output.chars().count();
    if total <= limit {
        return output.to_owned();
    }
    let head = limit * 60 / 100;
    let tail = limit.saturating_sub(head + 80);
    let omitted = total - head - tail;

    let head_end = output.char_indices().nth(head).map_or(output.len(), |(i, _)| i);
    let tail_start =
        output.char_indices().nth(total - tail).map_or(output.len(), |(i, _)| i);
    format!(
        "{}\n\n... [{omitted} characters omitted] ...\n\n{}",
        &output[..head_end],
        &output[tail_start..]
    )
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
