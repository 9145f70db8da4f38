// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Headless runtime: supervise tool servers and serve the bridge until a
//! shutdown signal arrives.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bridge::frame::{ServerAction, ServerSummary};
use crate::bridge::{
    BridgeConfig, ConnectionBridge, Registration, ServerCommand, ToolCall, ToolResult,
};
use crate::credential::oauth;
use crate::credential::refresh::TokenLifecycleManager;
use crate::credential::store::CredentialStore;
use crate::credential::{TokenSet, ToolServerSpec};
use crate::error::{AuthError, BridgeError};
use crate::events::{ActivityEvent, ActivityLog};
use crate::mcp::transport::BoxFuture;
use crate::mcp::ServerRegistry;
use crate::tools::UnifiedRegistry;

/// Upper bound on stopping servers and closing the bridge at shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// State the bridge handlers work on. Holds no reference to the bridge
/// itself; handlers receive it as an argument.
struct Services {
    store: Arc<CredentialStore>,
    tools: UnifiedRegistry,
    activity: Arc<ActivityLog>,
    client_id: String,
    shutdown: CancellationToken,
    /// Server commands apply one at a time.
    commands: tokio::sync::Mutex<()>,
}

impl Services {
    fn registration(&self) -> Registration {
        Registration {
            client_id: self.client_id.clone(),
            client_version: oauth::client_version().to_owned(),
            platform: oauth::platform(),
            tools: self.tools.registration_tools(),
            servers: self.store.servers().iter().map(ServerSummary::from).collect(),
        }
    }

    async fn register(&self, bridge: ConnectionBridge) -> Result<(), BridgeError> {
        let registration = self.registration();
        let tools = registration.tools.len();
        bridge.register_tools(registration).await?;
        self.activity.record(ActivityEvent::Registered { tools });
        Ok(())
    }

    async fn handle_tool_call(&self, bridge: ConnectionBridge, call: ToolCall) {
        let owner = self.tools.owner_of(&call.tool_name).unwrap_or_else(|| "unknown".to_owned());
        info!(call_id = %call.call_id, tool = %call.tool_name, %owner, "tool call");
        self.activity.record(ActivityEvent::ToolCall {
            call_id: call.call_id.clone(),
            tool: call.tool_name.clone(),
            owner,
        });

        let started = Instant::now();
        let outcome = self.tools.execute(&call.tool_name, call.arguments).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(text) => ToolResult::ok(&call.call_id, text),
            Err(e) => {
                warn!(
                    call_id = %call.call_id,
                    tool = %call.tool_name,
                    err = %e,
                    "tool call failed"
                );
                ToolResult::failed(&call.call_id, e.to_string())
            }
        };
        self.activity.record(ActivityEvent::ToolResult {
            call_id: call.call_id.clone(),
            tool: call.tool_name,
            success: result.success,
            duration_ms,
            error: (!result.success).then(|| result.error.clone()),
        });
        if let Err(e) = bridge.send_tool_result(result).await {
            warn!(call_id = %call.call_id, err = %e, "tool result not delivered");
        }
    }

    async fn apply(&self, cmd: ServerCommand) -> anyhow::Result<()> {
        let _serial = self.commands.lock().await;
        match cmd.action {
            ServerAction::Add(add) => self.add_server(add.into_spec()).await,
            ServerAction::Remove { name } => self.remove_server(&name).await,
            ServerAction::Toggle { name, enabled } => self.toggle_server(&name, enabled).await,
        }
    }

    /// Start first, persist second: a spec whose startup failed or was
    /// cancelled is never saved.
    async fn add_server(&self, spec: ToolServerSpec) -> anyhow::Result<()> {
        if self.store.server(&spec.name).is_some() {
            anyhow::bail!("server {} already exists", spec.name);
        }
        let servers = self.tools.servers();
        let count = servers.start_server_with_context(&self.shutdown, &spec).await?;
        if let Err(e) = self.store.add_server(spec.clone()) {
            servers.stop_server(&spec.name).await;
            return Err(e);
        }
        self.record_server(&spec.name, "added", format!("{count} tools"));
        Ok(())
    }

    async fn remove_server(&self, name: &str) -> anyhow::Result<()> {
        let stopped = self.tools.servers().stop_server(name).await;
        let removed = self.store.remove_server(name)?;
        if !stopped && removed.is_none() {
            anyhow::bail!("server not found: {name}");
        }
        self.record_server(name, "removed", String::new());
        Ok(())
    }

    async fn toggle_server(&self, name: &str, enabled: bool) -> anyhow::Result<()> {
        let spec =
            self.store.server(name).ok_or_else(|| anyhow::anyhow!("server not found: {name}"))?;
        let servers = self.tools.servers();
        if enabled {
            let count = servers.start_server_with_context(&self.shutdown, &spec).await?;
            self.store.set_enabled(name, true)?;
            self.record_server(name, "enabled", format!("{count} tools"));
        } else {
            servers.stop_server(name).await;
            self.store.set_enabled(name, false)?;
            self.record_server(name, "disabled", String::new());
        }
        Ok(())
    }

    fn record_server(&self, name: &str, action: &str, detail: String) {
        info!(server = name, action, %detail, "server updated");
        self.activity.record(ActivityEvent::Server {
            name: name.to_owned(),
            action: action.to_owned(),
            detail,
        });
    }
}

/// The running companion.
pub struct Daemon {
    services: Arc<Services>,
    bridge: ConnectionBridge,
}

impl Daemon {
    /// Build the daemon and wire the bridge handlers.
    pub fn new(
        store: Arc<CredentialStore>,
        tokens: Arc<TokenLifecycleManager>,
        config: BridgeConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let services = Arc::new(Services {
            store,
            tools: UnifiedRegistry::new(ServerRegistry::new()),
            activity: Arc::new(ActivityLog::new()),
            client_id: format!("daemon-{}", std::process::id()),
            shutdown,
            commands: tokio::sync::Mutex::new(()),
        });
        let bridge = ConnectionBridge::new(config, tokens);

        let svc = Arc::clone(&services);
        bridge.set_tool_call_handler(Arc::new(
            move |bridge: ConnectionBridge, call: ToolCall| -> BoxFuture<'static, ()> {
                let svc = Arc::clone(&svc);
                Box::pin(async move { svc.handle_tool_call(bridge, call).await })
            },
        ));

        let svc = Arc::clone(&services);
        bridge.set_reconnect_handler(Arc::new(
            move |bridge: ConnectionBridge| -> BoxFuture<'static, Result<(), BridgeError>> {
                let svc = Arc::clone(&svc);
                Box::pin(async move { svc.register(bridge).await })
            },
        ));

        let svc = Arc::clone(&services);
        bridge.set_server_command_handler(Arc::new(
            move |_bridge: ConnectionBridge,
                  cmd: ServerCommand|
                  -> BoxFuture<'static, Result<(), String>> {
                let svc = Arc::clone(&svc);
                Box::pin(async move { svc.apply(cmd).await.map_err(|e| format!("{e:#}")) })
            },
        ));

        let svc = Arc::clone(&services);
        bridge.set_disconnect_handler(Arc::new(move || {
            warn!(servers = svc.tools.servers().get_server_count(), "lost connection to peer");
        }));

        bridge.set_token_refresh_handler(Arc::new(|tokens: &TokenSet| {
            info!(expires_at = tokens.expires_at, "bridge token rotated");
        }));

        Self { services, bridge }
    }

    pub fn bridge(&self) -> &ConnectionBridge {
        &self.bridge
    }

    pub fn tools(&self) -> &UnifiedRegistry {
        &self.services.tools
    }

    pub fn activity(&self) -> &Arc<ActivityLog> {
        &self.services.activity
    }

    pub fn client_id(&self) -> &str {
        &self.services.client_id
    }

    /// Start every enabled server. A failing server is logged and skipped.
    /// Returns how many started.
    pub async fn start_servers(&self) -> usize {
        let servers = self.services.tools.servers();
        let mut started = 0;
        for spec in self.services.store.enabled_servers() {
            match servers.start_server_with_context(&self.services.shutdown, &spec).await {
                Ok(count) => {
                    started += 1;
                    self.services.record_server(&spec.name, "started", format!("{count} tools"));
                }
                Err(e) => {
                    warn!(server = %spec.name, err = %e, "server failed to start");
                    self.services.record_server(&spec.name, "failed", e.to_string());
                }
            }
        }
        started
    }

    /// Serve until the shutdown token fires or the bridge gives up.
    pub async fn run(&self) -> anyhow::Result<()> {
        self.start_servers().await;
        info!(
            client_id = %self.services.client_id,
            core_tools = self.services.tools.core_tool_count(),
            server_tools = self.services.tools.servers().get_tool_count(),
            "companion ready"
        );

        let watcher = self.spawn_state_watcher();
        let result = tokio::select! {
            r = self.bridge.connect_with_retry() => r.map_err(anyhow::Error::from),
            _ = self.services.shutdown.cancelled() => Ok(()),
        };
        self.shutdown().await;
        watcher.abort();
        result
    }

    /// Stop servers and close the bridge, forcing release after the grace
    /// period.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.services.shutdown.cancel();
        let drain = async {
            self.bridge.close().await;
            self.services.tools.servers().stop_all().await;
            self.services.tools.shutdown_core_tools().await;
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!(grace = ?SHUTDOWN_GRACE, "shutdown grace period elapsed, forcing exit");
        }
    }

    fn spawn_state_watcher(&self) -> tokio::task::JoinHandle<()> {
        let mut rx = self.bridge.subscribe_state();
        let activity = Arc::clone(&self.services.activity);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = *rx.borrow_and_update();
                info!(%state, "bridge state");
                activity.record(ActivityEvent::Connection { state });
            }
        })
    }
}

/// `companion start`: load credentials, refresh, serve until SIGINT/SIGTERM.
pub async fn run(cli: &crate::config::Cli) -> anyhow::Result<()> {
    let store = cli.open_store()?;
    if !store.is_logged_in() {
        return Err(AuthError::NotLoggedIn.into());
    }
    let api_base = cli.api_base(&store);
    let backend_url = cli.backend_url(&store);
    let tokens = Arc::new(TokenLifecycleManager::new(&api_base, Arc::clone(&store)));

    match tokens.ensure_fresh().await {
        Ok(_) => {}
        Err(e) if e.is_terminal() => return Err(e.into()),
        // The bridge retries the refresh before every attempt.
        Err(e) => warn!(err = %e, "token refresh failed, continuing"),
    }

    let shutdown = CancellationToken::new();
    let daemon = Daemon::new(store, tokens, BridgeConfig::new(&backend_url), shutdown.clone());
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.cancel();
    });
    daemon.run().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).ok();
    let mut sigint = signal(SignalKind::interrupt()).ok();
    tokio::select! {
        _ = async {
            match sigterm {
                Some(ref mut s) => s.recv().await,
                None => std::future::pending().await,
            }
        } => info!("received SIGTERM"),
        _ = async {
            match sigint {
                Some(ref mut s) => s.recv().await,
                None => std::future::pending().await,
            }
        } => info!("received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("received Ctrl-C");
    }
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
