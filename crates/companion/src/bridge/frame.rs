// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bridge wire frames: JSON objects of the form `{"type": ..., "payload": ...}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::credential::{ToolServerSpec, TransportType};
use crate::tools::ToolDefinition;

// -- Outbound ----------------------------------------------------------------

/// Frames sent by the companion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Outbound {
    RegisterTools(Registration),
    ToolResult(ToolResult),
    Heartbeat { timestamp: u64 },
    ServerCommandAck(ServerCommandAck),
    Disconnect {},
}

impl Outbound {
    pub fn to_json(&self) -> String {
        // Outbound frames contain only strings, numbers and JSON values.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// The full tool set declared to the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub client_id: String,
    pub client_version: String,
    pub platform: String,
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub servers: Vec<ServerSummary>,
}

/// Configured server metadata sent alongside the tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSummary {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(rename = "type", default)]
    pub transport_type: TransportType,
    pub enabled: bool,
}

impl From<&ToolServerSpec> for ServerSummary {
    fn from(spec: &ToolServerSpec) -> Self {
        Self {
            name: spec.name.clone(),
            description: spec.description.clone(),
            command: spec.program().unwrap_or_default().to_owned(),
            args: spec.args.clone(),
            transport_type: spec.transport_type,
            enabled: spec.enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub success: bool,
    pub result: String,
    pub error: String,
}

impl ToolResult {
    pub fn ok(call_id: &str, result: String) -> Self {
        Self { call_id: call_id.to_owned(), success: true, result, error: String::new() }
    }

    pub fn failed(call_id: &str, error: String) -> Self {
        Self { call_id: call_id.to_owned(), success: false, result: String::new(), error }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCommandAck {
    pub request_id: String,
    pub success: bool,
    pub error: String,
}

// -- Inbound -----------------------------------------------------------------

/// Frames received from the peer.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Ack(Ack),
    ToolCall(ToolCall),
    Error { message: String },
    ServerCommand(ServerCommand),
    /// The peer lost track of this client's tools and asks for a fresh
    /// registration.
    RequestSync,
    /// A frame type this client does not handle.
    Unknown(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tools_registered: u64,
}

/// A pending call pushed by the peer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
    /// Peer-side timeout in seconds; informational.
    #[serde(default)]
    pub timeout: u64,
}

/// A server management request from the web UI.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerCommand {
    pub request_id: String,
    pub action: ServerAction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerAction {
    Add(AddServer),
    Remove { name: String },
    Toggle { name: String, enabled: bool },
}

impl ServerAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Add(_) => "add_server",
            Self::Remove { .. } => "remove_server",
            Self::Toggle { .. } => "toggle_server",
        }
    }

    pub fn server_name(&self) -> &str {
        match self {
            Self::Add(add) => &add.name,
            Self::Remove { name } | Self::Toggle { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddServer {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(rename = "type", default)]
    pub transport_type: TransportType,
    #[serde(default)]
    pub url: String,
}

impl AddServer {
    pub fn into_spec(self) -> ToolServerSpec {
        ToolServerSpec {
            name: self.name,
            path: String::new(),
            command: self.command,
            args: self.args,
            url: self.url,
            transport_type: self.transport_type,
            description: self.description,
            enabled: true,
        }
    }
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
struct NamePayload {
    #[serde(default)]
    request_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    enabled: bool,
}

impl Inbound {
    /// Decode one text frame. Unknown types decode to [`Inbound::Unknown`];
    /// a known type with a malformed payload is an error.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawFrame = serde_json::from_str(text)?;
        let payload = raw.payload;
        Ok(match raw.kind.as_str() {
            "ack" if payload.is_null() => Self::Ack(Ack::default()),
            "ack" => Self::Ack(serde_json::from_value(payload)?),
            "tool_call" => Self::ToolCall(serde_json::from_value(payload)?),
            "error" => {
                let message = payload.get("message").and_then(Value::as_str).unwrap_or_default();
                Self::Error { message: message.to_owned() }
            }
            "add_server" => {
                let request_id = payload
                    .get("request_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                let add: AddServer = serde_json::from_value(payload)?;
                Self::ServerCommand(ServerCommand { request_id, action: ServerAction::Add(add) })
            }
            "remove_server" => {
                let p: NamePayload = serde_json::from_value(payload)?;
                Self::ServerCommand(ServerCommand {
                    request_id: p.request_id,
                    action: ServerAction::Remove { name: p.name },
                })
            }
            "toggle_server" => {
                let p: NamePayload = serde_json::from_value(payload)?;
                Self::ServerCommand(ServerCommand {
                    request_id: p.request_id,
                    action: ServerAction::Toggle { name: p.name, enabled: p.enabled },
                })
            }
            "request_sync" => Self::RequestSync,
            _ => Self::Unknown(raw.kind),
        })
    }
}

/// True when an inbound error message means the token was not accepted.
pub fn is_auth_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["authentication", "unauthorized", "token"].iter().any(|w| lower.contains(w))
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
