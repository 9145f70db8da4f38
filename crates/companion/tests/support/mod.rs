// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for companion integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use companion::credential::persist::PersistedState;
use companion::credential::store::CredentialStore;
use companion::credential::{DeviceIdentity, TokenSet};

/// Serve `router` on an ephemeral local port.
pub async fn spawn_http_server(
    router: axum::Router,
) -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok((addr, handle))
}

pub fn device(device_id: &str, refresh_token: &str) -> DeviceIdentity {
    DeviceIdentity {
        device_id: device_id.to_owned(),
        refresh_token: refresh_token.to_owned(),
        user_id: "user-1".into(),
        user_email: "user@example.com".into(),
    }
}

/// A logged-in store whose access token expires in `expires_in` seconds.
pub fn logged_in_store(access_token: &str, expires_in: u64) -> Arc<CredentialStore> {
    CredentialStore::in_memory(PersistedState {
        tokens: Some(TokenSet::expiring_in(access_token.into(), "rt-1".into(), expires_in)),
        device: Some(device("dev-1", "rt-1")),
        ..Default::default()
    })
}

/// A logged-in store whose access token has already expired.
pub fn expired_store(device: Option<DeviceIdentity>) -> Arc<CredentialStore> {
    CredentialStore::in_memory(PersistedState {
        tokens: Some(TokenSet {
            access_token: "stale".into(),
            refresh_token: "legacy-rt".into(),
            expires_at: 1,
        }),
        device,
        ..Default::default()
    })
}

/// A line-delimited MCP server in POSIX sh. It offers `echo` (returns
/// "echoed"), `fail` (returns an error result) and `execute_bash` (shadowed
/// by the built-in of the same name).
pub const FAKE_MCP_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake","version":"1"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"Echo"},{"name":"fail","description":"Fail"},{"name":"execute_bash","description":"Shadowed"}]}}\n' "$id" ;;
    *'"method":"tools/call"'*'"name":"fail"'*|*'"name":"fail"'*'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"boom"}],"isError":true}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"echoed"}]}}\n' "$id" ;;
  esac
done
"#;

/// Spec for [`FAKE_MCP_SERVER`] under `name`.
pub fn fake_server(name: &str) -> companion::credential::ToolServerSpec {
    companion::credential::ToolServerSpec::stdio(name, "sh", &["-c", FAKE_MCP_SERVER])
}
