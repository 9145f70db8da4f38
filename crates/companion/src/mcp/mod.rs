// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MCP tool servers: transports, the JSON-RPC client, and the registry that
//! supervises running servers.

pub mod client;
pub mod process;
pub mod protocol;
pub mod registry;
pub mod sse;
pub mod stdio;
pub mod transport;

pub use protocol::McpTool;
pub use registry::{RunningServer, ServerRegistry, ServerStatus};
