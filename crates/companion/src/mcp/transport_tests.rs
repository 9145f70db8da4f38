// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn dispatch_routes_by_id() -> anyhow::Result<()> {
    let pending = PendingCalls::default();
    let (first, rx1) = pending.register()?;
    let (second, rx2) = pending.register()?;
    assert_ne!(first, second);

    pending.dispatch(&format!(r#"{{"jsonrpc":"2.0","id":{second},"result":{{"n":2}}}}"#));
    pending.dispatch(&format!(r#"{{"jsonrpc":"2.0","id":{first},"result":{{"n":1}}}}"#));

    assert_eq!(rx1.await?, Ok(serde_json::json!({"n": 1})));
    assert_eq!(rx2.await?, Ok(serde_json::json!({"n": 2})));
    assert!(pending.is_empty());
    Ok(())
}

#[test]
fn dispatch_skips_noise() -> anyhow::Result<()> {
    let pending = PendingCalls::default();
    let (_id, _rx) = pending.register()?;
    pending.dispatch("npm WARN deprecated something");
    pending.dispatch(r#"{"jsonrpc":"2.0","method":"notifications/message","params":{}}"#);
    pending.dispatch(r#"{"jsonrpc":"2.0","id":999,"result":{}}"#);
    assert_eq!(pending.len(), 1);
    Ok(())
}

#[tokio::test]
async fn fail_all_rejects_outstanding_and_future_requests() -> anyhow::Result<()> {
    let pending = PendingCalls::default();
    let (_id, rx) = pending.register()?;

    pending.fail_all(McpError::Closed);
    assert_eq!(rx.await?, Err(McpError::Closed));
    assert!(pending.is_closed());
    assert!(matches!(pending.register(), Err(McpError::Closed)));
    Ok(())
}

#[test]
fn cancel_forgets_waiter() -> anyhow::Result<()> {
    let pending = PendingCalls::default();
    let (id, _rx) = pending.register()?;
    pending.cancel(id);
    assert!(pending.is_empty());
    Ok(())
}
