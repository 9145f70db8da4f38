// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device authorization, token refresh and device management against an
//! in-process HTTP peer.

mod support;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};

use companion::credential::device_code::DeviceAuthenticator;
use companion::credential::devices::DeviceClient;
use companion::credential::persist::PersistedState;
use companion::credential::refresh::TokenLifecycleManager;
use companion::credential::store::CredentialStore;
use companion::error::AuthError;

use support::{device, expired_store, spawn_http_server};

#[derive(Default)]
struct Peer {
    polls: AtomicU32,
    refreshes: AtomicU32,
    legacy_refreshes: AtomicU32,
    revoke_grant: bool,
    bodies: Mutex<Vec<Value>>,
}

async fn device_code(State(peer): State<Arc<Peer>>, Json(body): Json<Value>) -> Json<Value> {
    peer.bodies.lock().push(body);
    Json(json!({
        "device_code": "dc-1",
        "user_code": "ABCD1234",
        "verification_uri": "https://example.com/device",
        "expires_in": 60,
        "interval": 1,
    }))
}

async fn device_token(State(peer): State<Arc<Peer>>) -> (StatusCode, Json<Value>) {
    peer.polls.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::OK,
        Json(json!({
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "token_type": "Bearer",
            "expires_in": 3600,
            "device_id": "dev-1",
            "user": { "id": "user-1", "email": "user@example.com" },
        })),
    )
}

async fn device_refresh(
    State(peer): State<Arc<Peer>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    peer.bodies.lock().push(body);
    if peer.revoke_grant {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid_grant" })));
    }
    let n = peer.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
    tokio::time::sleep(Duration::from_millis(100)).await;
    (
        StatusCode::OK,
        Json(json!({
            "access_token": format!("at-{}", n + 1),
            "refresh_token": format!("rt-{}", n + 1),
            "expires_in": 3600,
        })),
    )
}

async fn legacy_refresh(State(peer): State<Arc<Peer>>) -> Json<Value> {
    peer.legacy_refreshes.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "access_token": "legacy-at", "expires_in": 3600 }))
}

fn router(peer: Arc<Peer>) -> Router {
    Router::new()
        .route("/api/device/code", post(device_code))
        .route("/api/device/token", get(device_token))
        .route("/api/device/refresh", post(device_refresh))
        .route("/api/auth/refresh", post(legacy_refresh))
        .with_state(peer)
}

async fn serve(peer: Arc<Peer>) -> anyhow::Result<String> {
    let (addr, _handle) = spawn_http_server(router(peer)).await?;
    Ok(format!("http://{addr}/api"))
}

#[tokio::test]
async fn device_login_persists_identity() -> anyhow::Result<()> {
    let peer = Arc::new(Peer::default());
    let api = serve(Arc::clone(&peer)).await?;
    let store = CredentialStore::in_memory(PersistedState::default());

    let auth =
        DeviceAuthenticator::new(&api, Arc::clone(&store)).with_browser(false).login().await?;
    assert_eq!(auth.device.device_id, "dev-1");
    assert_eq!(auth.device.user_email, "user@example.com");
    assert_eq!(peer.polls.load(Ordering::SeqCst), 1);

    assert!(store.is_logged_in());
    let saved = store.device().ok_or_else(|| anyhow::anyhow!("device not saved"))?;
    assert_eq!(saved.refresh_token, "rt-1");
    assert_eq!(store.tokens().map(|t| t.access_token), Some("at-1".to_owned()));

    let bodies = peer.bodies.lock();
    assert_eq!(bodies[0]["client_id"], "clara_companion");
    Ok(())
}

#[tokio::test]
async fn concurrent_refreshes_share_one_request() -> anyhow::Result<()> {
    let peer = Arc::new(Peer::default());
    let api = serve(Arc::clone(&peer)).await?;
    let store = expired_store(Some(device("dev-1", "rt-1")));
    let tokens = Arc::new(TokenLifecycleManager::new(&api, Arc::clone(&store)));

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let tokens = Arc::clone(&tokens);
        tasks.push(tokio::spawn(async move { tokens.ensure_fresh().await }));
    }
    let mut seen = Vec::new();
    for task in tasks {
        seen.push(task.await??.access_token);
    }

    assert_eq!(peer.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(tokens.refresh_count(), 1);
    assert!(seen.iter().all(|t| t == "at-2"), "tokens: {seen:?}");
    assert_eq!(store.device().map(|d| d.refresh_token), Some("rt-2".to_owned()));

    let bodies = peer.bodies.lock();
    assert_eq!(bodies[0]["device_id"], "dev-1");
    assert_eq!(bodies[0]["refresh_token"], "rt-1");
    Ok(())
}

#[tokio::test]
async fn invalid_grant_means_device_revoked() -> anyhow::Result<()> {
    let peer = Arc::new(Peer { revoke_grant: true, ..Default::default() });
    let api = serve(peer).await?;
    let tokens = TokenLifecycleManager::new(&api, expired_store(Some(device("dev-1", "rt-1"))));

    let err = tokens.ensure_fresh().await.err();
    assert_eq!(err, Some(AuthError::DeviceRevoked));
    assert!(err.is_some_and(|e| e.is_terminal()));
    Ok(())
}

#[tokio::test]
async fn legacy_refresh_without_device_identity() -> anyhow::Result<()> {
    let peer = Arc::new(Peer::default());
    let api = serve(Arc::clone(&peer)).await?;
    let store = expired_store(None);
    let tokens = TokenLifecycleManager::new(&api, Arc::clone(&store));

    let fresh = tokens.ensure_fresh().await?;
    assert_eq!(fresh.access_token, "legacy-at");
    assert_eq!(fresh.refresh_token, "legacy-rt");
    assert_eq!(peer.legacy_refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(peer.refreshes.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn force_refresh_skips_when_token_already_rotated() -> anyhow::Result<()> {
    let peer = Arc::new(Peer::default());
    let api = serve(Arc::clone(&peer)).await?;
    let tokens = Arc::new(TokenLifecycleManager::new(
        &api,
        expired_store(Some(device("dev-1", "rt-1"))),
    ));

    let a = tokio::spawn({
        let tokens = Arc::clone(&tokens);
        async move { tokens.force_refresh().await }
    });
    let b = tokio::spawn({
        let tokens = Arc::clone(&tokens);
        async move { tokens.force_refresh().await }
    });
    let (a, b) = (a.await??, b.await??);
    assert_eq!(a.access_token, b.access_token);
    assert_eq!(peer.refreshes.load(Ordering::SeqCst), 1);
    Ok(())
}

// -- Device management -------------------------------------------------------

#[derive(Default)]
struct Devices {
    calls: Mutex<Vec<String>>,
}

fn bearer(headers: &HeaderMap) -> String {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}

async fn list_devices(State(s): State<Arc<Devices>>, headers: HeaderMap) -> Json<Value> {
    s.calls.lock().push(format!("list {}", bearer(&headers)));
    Json(json!({
        "devices": [
            { "device_id": "dev-1", "name": "laptop", "platform": "linux",
              "is_active": true, "is_current": true },
            { "device_id": "dev-2", "platform": "darwin" },
        ]
    }))
}

async fn rename_device(
    State(s): State<Arc<Devices>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    let name = body["name"].as_str().unwrap_or_default();
    s.calls.lock().push(format!("rename {id} {name}"));
    StatusCode::OK
}

async fn revoke_device(State(s): State<Arc<Devices>>, Path(id): Path<String>) -> StatusCode {
    s.calls.lock().push(format!("revoke {id}"));
    if id == "missing" {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    }
}

fn devices_router(state: Arc<Devices>) -> Router {
    Router::new()
        .route("/api/devices", get(list_devices))
        .route("/api/devices/{id}", put(rename_device).delete(revoke_device))
        .with_state(state)
}

#[tokio::test]
async fn device_client_round_trip() -> anyhow::Result<()> {
    let state = Arc::new(Devices::default());
    let (addr, _handle) = spawn_http_server(devices_router(Arc::clone(&state))).await?;
    let client = DeviceClient::new(&format!("http://{addr}/api"), "at-1");

    let devices = client.list().await?;
    assert_eq!(devices.len(), 2);
    assert!(devices[0].is_current);
    assert_eq!(devices[1].platform, "darwin");
    assert!(!devices[1].is_active);

    client.rename("dev-2", "desktop").await?;
    client.revoke("dev-2").await?;
    assert!(client.revoke("missing").await.is_err());

    let calls = state.calls.lock().clone();
    assert_eq!(
        calls,
        ["list Bearer at-1", "rename dev-2 desktop", "revoke dev-2", "revoke missing"]
    );
    Ok(())
}
