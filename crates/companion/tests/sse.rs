// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MCP over SSE against an in-process axum server.

mod support;

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{self, Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use companion::credential::{ToolServerSpec, TransportType};
use companion::mcp::ServerRegistry;

use support::spawn_http_server;

#[derive(Default)]
struct Peer {
    /// Answer POSTs in the response body instead of on the stream.
    inline: bool,
    stream: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

fn answer(request: &Value) -> Option<Value> {
    let id = request.get("id")?.clone();
    let result = match request["method"].as_str().unwrap_or_default() {
        "initialize" => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "serverInfo": { "name": "remote", "version": "1" },
        }),
        "tools/list" => json!({ "tools": [{ "name": "remote_echo", "description": "Echo" }] }),
        "tools/call" => {
            let text = request["params"]["arguments"]["text"].as_str().unwrap_or_default();
            json!({ "content": [{ "type": "text", "text": format!("remote: {text}") }] })
        }
        _ => json!({}),
    };
    Some(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

async fn events(
    State(peer): State<Arc<Peer>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    *peer.stream.lock() = Some(tx);
    let endpoint = stream::once(async {
        Ok::<_, Infallible>(Event::default().event("endpoint").data("/messages?session=1"))
    });
    let messages = stream::unfold(rx, |mut rx| async move {
        let msg = rx.recv().await?;
        Some((Ok(Event::default().event("message").data(msg)), rx))
    });
    Sse::new(endpoint.chain(messages))
}

async fn messages(State(peer): State<Arc<Peer>>, Json(request): Json<Value>) -> Response {
    let Some(reply) = answer(&request) else {
        return StatusCode::ACCEPTED.into_response();
    };
    if peer.inline {
        return Json(reply).into_response();
    }
    if let Some(tx) = peer.stream.lock().as_ref() {
        let _ = tx.send(reply.to_string());
    }
    StatusCode::ACCEPTED.into_response()
}

async fn serve(peer: Arc<Peer>) -> anyhow::Result<String> {
    let router = Router::new()
        .route("/sse", get(events))
        .route("/messages", post(messages))
        .with_state(peer);
    let (addr, _handle) = spawn_http_server(router).await?;
    Ok(format!("http://{addr}/sse"))
}

fn sse_spec(url: &str) -> ToolServerSpec {
    ToolServerSpec {
        name: "remote".into(),
        path: String::new(),
        command: String::new(),
        args: vec![],
        url: url.to_owned(),
        transport_type: TransportType::Sse,
        description: String::new(),
        enabled: true,
    }
}

#[tokio::test]
async fn responses_on_the_event_stream() -> anyhow::Result<()> {
    let url = serve(Arc::new(Peer::default())).await?;
    let registry = ServerRegistry::new();

    assert_eq!(registry.start_server(&sse_spec(&url)).await?, 1);
    assert_eq!(registry.get_server_for_tool("remote_echo").as_deref(), Some("remote"));
    let out = registry.execute_tool("remote_echo", json!({ "text": "hi" })).await?;
    assert_eq!(out, "remote: hi");

    registry.stop_all().await;
    Ok(())
}

#[tokio::test]
async fn inline_json_responses() -> anyhow::Result<()> {
    let url = serve(Arc::new(Peer { inline: true, ..Default::default() })).await?;
    let registry = ServerRegistry::new();

    assert_eq!(registry.start_server(&sse_spec(&url)).await?, 1);
    let out = registry.execute_tool("remote_echo", json!({ "text": "inline" })).await?;
    assert_eq!(out, "remote: inline");

    registry.stop_all().await;
    Ok(())
}

#[tokio::test]
async fn missing_url_fails_to_start() {
    let registry = ServerRegistry::new();
    assert!(registry.start_server(&sse_spec("")).await.is_err());
    assert_eq!(registry.get_server_count(), 0);
}
