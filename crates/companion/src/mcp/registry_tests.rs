// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::*;
use crate::mcp::transport::{BoxFuture, McpTransport, PendingCalls};

/// Transport whose server never answers; enough for index bookkeeping.
struct Silent(Arc<PendingCalls>);

impl McpTransport for Silent {
    fn send(&self, _message: String) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(async { Ok(()) })
    }

    fn is_alive(&self) -> bool {
        !self.0.is_closed()
    }

    fn pid(&self) -> Option<u32> {
        None
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.0.fail_all(McpError::Closed) })
    }
}

fn tool(name: &str) -> McpTool {
    McpTool { name: name.to_owned(), description: String::new(), input_schema: json!({}) }
}

fn running(name: &str, tools: &[&str]) -> Arc<RunningServer> {
    let pending = Arc::new(PendingCalls::default());
    let client = McpClient::with_transport(name, Box::new(Silent(Arc::clone(&pending))), pending);
    Arc::new(RunningServer {
        spec: ToolServerSpec::stdio(name, "true", &[]),
        client,
        tools: tools.iter().map(|t| tool(t)).collect(),
    })
}

fn registry_with(servers: &[(&str, &[&str])]) -> ServerRegistry {
    let registry = ServerRegistry::default();
    {
        let mut inner = registry.servers.write();
        for (name, tools) in servers {
            inner.running.insert((*name).to_owned(), running(name, tools));
        }
        inner.reindex();
    }
    registry
}

#[test]
fn tools_route_to_their_server() {
    let registry = registry_with(&[
        ("filesystem", &["read_file", "write_file"]),
        ("git", &["git_status"]),
    ]);
    assert_eq!(registry.get_server_for_tool("write_file").as_deref(), Some("filesystem"));
    assert_eq!(registry.get_server_for_tool("git_status").as_deref(), Some("git"));
    assert_eq!(registry.get_server_for_tool("nope"), None);
    assert_eq!(registry.get_server_count(), 2);
    assert_eq!(registry.get_tool_count(), 3);
    assert_eq!(registry.get_server_tool_count("filesystem"), 2);
    assert_eq!(registry.get_server_tool_count("missing"), 0);
}

#[test]
fn duplicate_tool_name_belongs_to_first_server() {
    let registry = registry_with(&[("a", &["search", "only_a"]), ("b", &["search", "only_b"])]);

    assert_eq!(registry.get_server_for_tool("search").as_deref(), Some("a"));
    assert_eq!(registry.get_tool_count(), 3);

    let tools = registry.get_all_tools();
    let names: Vec<_> =
        tools.iter().map(|t| (t.name.as_str(), t.server_name.as_deref())).collect();
    assert_eq!(names, vec![("search", Some("a")), ("only_a", Some("a")), ("only_b", Some("b"))]);
}

#[tokio::test]
async fn stopping_owner_hands_duplicate_to_next_server() {
    let registry = registry_with(&[("a", &["search"]), ("b", &["search"])]);

    assert!(registry.stop_server("a").await);
    assert_eq!(registry.get_server_for_tool("search").as_deref(), Some("b"));
    assert!(!registry.stop_server("a").await);
}

#[tokio::test]
async fn unknown_tool_is_tool_not_found() {
    let registry = registry_with(&[("filesystem", &["read_file"])]);
    let result = registry.execute_tool("launch_rockets", json!({})).await;
    assert_eq!(result, Err(RegistryError::ToolNotFound("launch_rockets".into())));
}

#[tokio::test]
async fn stop_all_empties_registry() {
    let registry = registry_with(&[("a", &["x"]), ("b", &["y"])]);
    registry.stop_all().await;
    assert_eq!(registry.get_server_count(), 0);
    assert_eq!(registry.get_tool_count(), 0);
    assert!(registry.get_all_tools().is_empty());
}

#[tokio::test]
async fn restart_unknown_server_fails() {
    let registry = ServerRegistry::default();
    let result = registry.restart_server("ghost").await;
    assert_eq!(result, Err(RegistryError::ServerNotFound("ghost".into())));
}

#[tokio::test]
async fn cancelled_start_registers_nothing() {
    let registry = ServerRegistry::default();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let spec = ToolServerSpec::stdio("never", "sleep", &["30"]);
    let result = registry.start_server_with_context(&cancel, &spec).await;
    assert_eq!(result, Err(RegistryError::Cancelled("never".into())));
    assert_eq!(registry.get_server_count(), 0);
}

#[tokio::test]
async fn start_failure_names_the_server() {
    let registry = ServerRegistry::default();
    let spec = ToolServerSpec::stdio("broken", "/definitely/not/a/real/binary", &[]);
    match registry.start_server(&spec).await {
        Err(RegistryError::StartFailed { name, .. }) => assert_eq!(name, "broken"),
        other => panic!("expected StartFailed, got {other:?}"),
    }
    assert!(!registry.is_running("broken"));
}
