// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC 2.0 framing and MCP message shapes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::McpError;

/// MCP protocol revision announced in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Fallback result text for tools that return no content.
pub const EMPTY_RESULT_TEXT: &str = "Tool executed successfully";

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<Value>) -> Self {
        Self { jsonrpc: "2.0", id, method, params }
    }
}

#[derive(Debug, Serialize)]
pub struct JsonRpcNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> JsonRpcNotification<'a> {
    pub fn new(method: &'a str, params: Option<Value>) -> Self {
        Self { jsonrpc: "2.0", method, params }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Any inbound JSON-RPC message. Requests and notifications from the
/// server carry `method`; responses carry `result` or `error`.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcMessage {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcMessage {
    /// The id of a response to one of our requests. Our ids are integers,
    /// but some servers echo them back as strings.
    pub fn response_id(&self) -> Option<u64> {
        if self.method.is_some() {
            return None;
        }
        match self.id.as_ref()? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<Value, McpError> {
        if let Some(err) = self.error {
            return Err(McpError::Rpc { code: err.code, message: err.message });
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// A tool advertised by an MCP server via `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "empty_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "companion",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

/// Parse a `tools/list` result.
pub fn parse_tools(result: Value) -> Result<Vec<McpTool>, McpError> {
    #[derive(Deserialize)]
    struct ToolsList {
        #[serde(default)]
        tools: Vec<McpTool>,
    }
    let list: ToolsList = serde_json::from_value(result)?;
    Ok(list.tools)
}

/// Text output of a `tools/call`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

/// Reduce a `tools/call` result to its first text item.
///
/// Empty content yields the JSON of the whole result, or
/// [`EMPTY_RESULT_TEXT`] when that is empty as well.
pub fn call_output(result: Value) -> ToolOutput {
    let is_error = result.get("isError").and_then(Value::as_bool).unwrap_or(false);
    let first_text = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .map(|item| match item.get("text").and_then(Value::as_str) {
            Some(text) => text.to_owned(),
            None => item.to_string(),
        });

    let text = match first_text {
        Some(text) => text,
        None if result.is_null() || result.as_object().is_some_and(|o| o.is_empty()) => {
            EMPTY_RESULT_TEXT.to_owned()
        }
        None => result.to_string(),
    };
    ToolOutput { text, is_error }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
