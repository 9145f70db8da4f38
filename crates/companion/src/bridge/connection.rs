// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The bridge connection: one reader task and one writer task per socket,
//! plus the reconnect loop that drives them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::frame::{is_auth_error, Inbound, Outbound, ServerCommandAck};
use super::{
    Ack, Backoff, BridgeConfig, ConnectionState, DisconnectHandler, ReconnectHandler, Registration,
    ServerCommand, ServerCommandHandler, ToolCall, ToolCallHandler, ToolResult,
};
use crate::credential::epoch_secs;
use crate::credential::refresh::{RefreshListener, TokenLifecycleManager};
use crate::credential::TokenSet;
use crate::error::BridgeError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OUTBOUND_QUEUE: usize = 256;

/// Close codes the peer sends when it stops accepting the token.
const AUTH_CLOSE_CODES: [u16; 2] = [1008, 4001];

#[derive(Default)]
struct Handlers {
    tool_call: Option<ToolCallHandler>,
    reconnect: Option<ReconnectHandler>,
    disconnect: Option<DisconnectHandler>,
    server_command: Option<ServerCommandHandler>,
}

struct Inner {
    config: BridgeConfig,
    tokens: Arc<TokenLifecycleManager>,
    state: watch::Sender<ConnectionState>,
    handlers: RwLock<Handlers>,
    current: Mutex<Option<Arc<Connection>>>,
    /// Set when the peer rejected the token; the next attempt refreshes
    /// regardless of expiry.
    force_refresh: AtomicBool,
    closing: AtomicBool,
    shutdown: CancellationToken,
    next_id: AtomicU64,
}

/// One live socket.
struct PendingAck {
    id: u64,
    tx: oneshot::Sender<Result<Ack, BridgeError>>,
}

struct Connection {
    id: u64,
    out: mpsc::Sender<Message>,
    /// Registrations awaiting an `ack`, oldest first. The peer answers
    /// them in the order they were sent.
    acks: Mutex<VecDeque<PendingAck>>,
    /// Stops both tasks. Child of the bridge shutdown token.
    cancel: CancellationToken,
    /// Cancelled once the reader has finished tearing down.
    lost: CancellationToken,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    async fn send(&self, frame: Outbound) -> Result<(), BridgeError> {
        if self.cancel.is_cancelled() {
            return Err(BridgeError::Closed);
        }
        self.out.send(Message::text(frame.to_json())).await.map_err(|_| BridgeError::Closed)
    }

    /// Answer the oldest pending registration.
    fn resolve_ack(&self, result: Result<Ack, BridgeError>) -> bool {
        let pending = self.acks.lock().pop_front();
        match pending {
            Some(p) => p.tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Drop the registration `id` without answering it.
    fn forget_ack(&self, id: u64) {
        self.acks.lock().retain(|p| p.id != id);
    }

    fn close_acks(&self) {
        let pending: Vec<PendingAck> = self.acks.lock().drain(..).collect();
        for p in pending {
            let _ = p.tx.send(Err(BridgeError::Closed));
        }
    }
}

/// Handle to the bridge. Clones share the same connection.
#[derive(Clone)]
pub struct ConnectionBridge {
    inner: Arc<Inner>,
}

impl ConnectionBridge {
    pub fn new(config: BridgeConfig, tokens: Arc<TokenLifecycleManager>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                tokens,
                state,
                handlers: RwLock::new(Handlers::default()),
                current: Mutex::new(None),
                force_refresh: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn tokens(&self) -> &Arc<TokenLifecycleManager> {
        &self.inner.tokens
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    // -- Handlers ------------------------------------------------------------

    pub fn set_tool_call_handler(&self, handler: ToolCallHandler) {
        self.inner.handlers.write().tool_call = Some(handler);
    }

    pub fn set_reconnect_handler(&self, handler: ReconnectHandler) {
        self.inner.handlers.write().reconnect = Some(handler);
    }

    pub fn set_disconnect_handler(&self, handler: DisconnectHandler) {
        self.inner.handlers.write().disconnect = Some(handler);
    }

    pub fn set_server_command_handler(&self, handler: ServerCommandHandler) {
        self.inner.handlers.write().server_command = Some(handler);
    }

    /// Observe every token refresh, whoever triggered it.
    pub fn set_token_refresh_handler(&self, listener: RefreshListener) {
        self.inner.tokens.set_refresh_listener(listener);
    }

    // -- Connecting ----------------------------------------------------------

    /// One connection attempt: refresh the token if needed, open the socket
    /// and start its reader and writer. Does not register tools.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(BridgeError::Closed);
        }
        self.set_state(ConnectionState::Connecting);
        let tokens = self.fresh_tokens().await?;
        let url = bridge_url(&self.inner.config.url, &tokens.access_token)?;
        crate::install_crypto_provider();

        let timeout = self.inner.config.connect_timeout;
        let ws = match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url)).await {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(tungstenite::Error::Http(resp)))
                if matches!(resp.status().as_u16(), 401 | 403) =>
            {
                self.inner.force_refresh.store(true, Ordering::SeqCst);
                return Err(BridgeError::Unauthorized);
            }
            Ok(Err(e)) => return Err(BridgeError::Connect(e.to_string())),
            Err(_) => return Err(BridgeError::Connect(format!("timed out after {timeout:?}"))),
        };
        info!(url = %self.inner.config.url, "bridge connected");
        self.attach(ws);
        Ok(())
    }

    async fn fresh_tokens(&self) -> Result<TokenSet, BridgeError> {
        let forced = self.inner.force_refresh.swap(false, Ordering::SeqCst);
        let result = if forced {
            debug!("refreshing token rejected by the peer");
            self.inner.tokens.force_refresh().await
        } else {
            self.inner.tokens.ensure_fresh().await
        };
        result.map_err(|e| {
            if forced && !e.is_terminal() {
                self.inner.force_refresh.store(true, Ordering::SeqCst);
            }
            BridgeError::Auth(e)
        })
    }

    fn attach(&self, ws: WsStream) {
        let (sink, stream) = ws.split();
        let (out, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let conn = Arc::new(Connection {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            out,
            acks: Mutex::new(VecDeque::new()),
            cancel: self.inner.shutdown.child_token(),
            lost: CancellationToken::new(),
            writer: Mutex::new(None),
        });

        let writer = tokio::spawn(run_writer(
            sink,
            rx,
            conn.cancel.clone(),
            Arc::clone(&self.inner.tokens),
            self.inner.config.heartbeat_interval,
            self.inner.config.ping_interval,
        ));
        *conn.writer.lock() = Some(writer);

        let previous = self.inner.current.lock().replace(Arc::clone(&conn));
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        tokio::spawn(self.clone().run_reader(conn, stream));
    }

    fn current(&self) -> Option<Arc<Connection>> {
        self.inner.current.lock().clone()
    }

    /// Keep a connection up until [`close`](Self::close): connect, run the
    /// reconnect handler, wait for the socket to drop, back off, repeat.
    ///
    /// Returns `Ok` after `close`, or the error that made further attempts
    /// pointless (the token cannot be refreshed).
    pub async fn connect_with_retry(&self) -> Result<(), BridgeError> {
        let config = &self.inner.config;
        let mut backoff = Backoff::new(config.backoff_initial, config.backoff_max);

        loop {
            if self.inner.shutdown.is_cancelled() {
                return Ok(());
            }
            match self.establish().await {
                Ok(conn) => {
                    backoff.reset();
                    tokio::select! {
                        _ = conn.lost.cancelled() => {}
                        _ = self.inner.shutdown.cancelled() => return Ok(()),
                    }
                }
                Err(e) if e.is_terminal() => {
                    error!(err = %e, "bridge giving up");
                    self.set_state(ConnectionState::Error);
                    return Err(e);
                }
                Err(e) => {
                    if self.inner.shutdown.is_cancelled() {
                        return Ok(());
                    }
                    warn!(err = %e, retry_in = ?backoff.current(), "bridge connect failed");
                    self.set_state(ConnectionState::Reconnecting);
                }
            }

            let delay = backoff.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.inner.shutdown.cancelled() => return Ok(()),
            }
        }
    }

    /// Connect and hand the new socket to the reconnect handler. The state
    /// only becomes `connected` once a registration was acknowledged.
    async fn establish(&self) -> Result<Arc<Connection>, BridgeError> {
        self.connect().await?;
        let conn = self.current().ok_or(BridgeError::Closed)?;

        let handler = self.inner.handlers.read().reconnect.clone();
        match handler {
            Some(handler) => {
                if let Err(e) = handler(self.clone()).await {
                    conn.cancel.cancel();
                    return Err(e);
                }
            }
            None => self.set_state(ConnectionState::Connected),
        }
        Ok(conn)
    }

    // -- Sending -------------------------------------------------------------

    /// Declare the tool set and wait for the peer's `ack`.
    ///
    /// A registration that is not acknowledged within the configured ack
    /// timeout fails with [`BridgeError::AckTimeout`].
    pub async fn register_tools(&self, registration: Registration) -> Result<Ack, BridgeError> {
        let conn = self.current().ok_or(BridgeError::Closed)?;
        let tool_count = registration.tools.len();

        let (tx, rx) = oneshot::channel();
        let ack_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        conn.acks.lock().push_back(PendingAck { id: ack_id, tx });
        if let Err(e) = conn.send(Outbound::RegisterTools(registration)).await {
            conn.forget_ack(ack_id);
            return Err(e);
        }

        let timeout = self.inner.config.ack_timeout;
        let ack = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(BridgeError::Closed),
            Err(_) => {
                conn.forget_ack(ack_id);
                return Err(BridgeError::AckTimeout(timeout));
            }
        };

        info!(
            tools = tool_count,
            registered = ack.tools_registered,
            status = %ack.status,
            "tools registered"
        );
        if !conn.cancel.is_cancelled() {
            self.set_state(ConnectionState::Connected);
        }
        Ok(ack)
    }

    pub async fn send_tool_result(&self, result: ToolResult) -> Result<(), BridgeError> {
        let conn = self.current().ok_or(BridgeError::Closed)?;
        debug!(call_id = %result.call_id, success = result.success, "sending tool result");
        conn.send(Outbound::ToolResult(result)).await
    }

    pub async fn send_server_command_ack(
        &self,
        request_id: &str,
        outcome: Result<(), String>,
    ) -> Result<(), BridgeError> {
        let conn = self.current().ok_or(BridgeError::Closed)?;
        let (success, error) = match outcome {
            Ok(()) => (true, String::new()),
            Err(e) => (false, e),
        };
        let ack = ServerCommandAck { request_id: request_id.to_owned(), success, error };
        conn.send(Outbound::ServerCommandAck(ack)).await
    }

    /// Orderly shutdown: send `disconnect`, stop both tasks and flush the
    /// writer within the close timeout. Idempotent.
    pub async fn close(&self) {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        let conn = self.inner.current.lock().take();
        if let Some(conn) = &conn {
            if let Err(e) = conn.send(Outbound::Disconnect {}).await {
                debug!(err = %e, "disconnect frame not sent");
            }
        }
        self.inner.shutdown.cancel();

        if let Some(conn) = conn {
            conn.close_acks();
            let writer = conn.writer.lock().take();
            if let Some(writer) = writer {
                if tokio::time::timeout(self.inner.config.close_timeout, writer).await.is_err() {
                    debug!("bridge writer did not flush in time");
                }
            }
            conn.lost.cancel();
        }
        self.set_state(ConnectionState::Disconnected);
        info!("bridge closed");
    }

    // -- Receiving -----------------------------------------------------------

    async fn run_reader(self, conn: Arc<Connection>, mut stream: SplitStream<WsStream>) {
        loop {
            let msg = tokio::select! {
                _ = conn.cancel.cancelled() => break,
                msg = stream.next() => msg,
            };
            match msg {
                Some(Ok(Message::Text(text))) => self.handle_text(&conn, text.as_str()),
                Some(Ok(Message::Close(frame))) => {
                    if let Some(frame) = frame {
                        let code = u16::from(frame.code);
                        if AUTH_CLOSE_CODES.contains(&code) {
                            self.inner.force_refresh.store(true, Ordering::SeqCst);
                        }
                        info!(code, reason = %frame.reason.as_str(), "bridge closed by peer");
                    }
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(err = %e, "bridge read failed");
                    break;
                }
                None => break,
            }
        }
        self.connection_lost(&conn);
    }

    fn handle_text(&self, conn: &Arc<Connection>, text: &str) {
        let frame = match Inbound::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(err = %e, "malformed bridge frame");
                return;
            }
        };
        match frame {
            Inbound::Ack(ack) => {
                if !conn.resolve_ack(Ok(ack)) {
                    debug!("ack without a pending registration");
                }
            }
            Inbound::Error { message } => {
                warn!(%message, "error from peer");
                if is_auth_error(&message) {
                    self.inner.force_refresh.store(true, Ordering::SeqCst);
                }
                conn.resolve_ack(Err(BridgeError::Rejected(message)));
            }
            Inbound::ToolCall(call) => self.dispatch_tool_call(call),
            Inbound::ServerCommand(cmd) => self.dispatch_server_command(cmd),
            Inbound::RequestSync => self.resync(),
            Inbound::Unknown(kind) => debug!(%kind, "ignoring bridge frame"),
        }
    }

    fn dispatch_tool_call(&self, call: ToolCall) {
        debug!(call_id = %call.call_id, tool = %call.tool_name, "tool call received");
        let handler = self.inner.handlers.read().tool_call.clone();
        let bridge = self.clone();
        tokio::spawn(async move {
            match handler {
                Some(handler) => handler(bridge, call).await,
                None => {
                    let result =
                        ToolResult::failed(&call.call_id, "no tool handler configured".into());
                    if let Err(e) = bridge.send_tool_result(result).await {
                        debug!(err = %e, "tool result not sent");
                    }
                }
            }
        });
    }

    fn dispatch_server_command(&self, cmd: ServerCommand) {
        info!(
            action = cmd.action.kind(),
            server = cmd.action.server_name(),
            "server command received"
        );
        let handler = self.inner.handlers.read().server_command.clone();
        let bridge = self.clone();
        tokio::spawn(async move {
            let request_id = cmd.request_id.clone();
            let outcome = match handler {
                Some(handler) => handler(bridge.clone(), cmd).await,
                None => Err("server command handler not configured".to_owned()),
            };
            let applied = match &outcome {
                Ok(()) => true,
                Err(e) => {
                    warn!(request_id = %request_id, err = %e, "server command failed");
                    false
                }
            };
            if let Err(e) = bridge.send_server_command_ack(&request_id, outcome).await {
                debug!(err = %e, "server command ack not sent");
            }
            // The tool set changed; tell the peer.
            if applied {
                bridge.resync();
            }
        });
    }

    fn resync(&self) {
        let handler = self.inner.handlers.read().reconnect.clone();
        let Some(handler) = handler else {
            debug!("re-sync requested but no reconnect handler is set");
            return;
        };
        let bridge = self.clone();
        tokio::spawn(async move {
            if let Err(e) = handler(bridge).await {
                warn!(err = %e, "re-sync registration failed");
            }
        });
    }

    fn connection_lost(&self, conn: &Arc<Connection>) {
        conn.cancel.cancel();
        conn.close_acks();

        let was_current = {
            let mut current = self.inner.current.lock();
            match current.as_ref() {
                Some(c) if c.id == conn.id => {
                    *current = None;
                    true
                }
                _ => false,
            }
        };
        if was_current && !self.inner.shutdown.is_cancelled() {
            warn!("bridge connection lost");
            self.set_state(ConnectionState::Reconnecting);
            let handler = self.inner.handlers.read().disconnect.clone();
            if let Some(handler) = handler {
                handler();
            }
        }
        conn.lost.cancel();
    }

    fn set_state(&self, next: ConnectionState) {
        self.inner.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            debug!(from = %state, to = %next, "bridge state");
            *state = next;
            true
        });
    }
}

async fn run_writer(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
    tokens: Arc<TokenLifecycleManager>,
    heartbeat_every: Duration,
    ping_every: Duration,
) {
    let start = tokio::time::Instant::now();
    let mut heartbeat = tokio::time::interval_at(start + heartbeat_every, heartbeat_every);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ping = tokio::time::interval_at(start + ping_every, ping_every);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let msg = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
            _ = heartbeat.tick() => {
                refresh_if_due(&tokens);
                Message::text(Outbound::Heartbeat { timestamp: epoch_secs() }.to_json())
            }
            _ = ping.tick() => Message::Ping(Default::default()),
        };
        if let Err(e) = sink.send(msg).await {
            debug!(err = %e, "bridge write failed");
            cancel.cancel();
            return;
        }
    }

    // Flush frames queued before the cancel, e.g. `disconnect`.
    while let Ok(msg) = rx.try_recv() {
        if sink.send(msg).await.is_err() {
            return;
        }
    }
    let _ = sink.close().await;
}

/// Refresh in the background when the token is inside the expiry buffer,
/// so the next reconnect does not have to.
fn refresh_if_due(tokens: &Arc<TokenLifecycleManager>) {
    if !tokens.needs_refresh() {
        return;
    }
    let tokens = Arc::clone(tokens);
    tokio::spawn(async move {
        if let Err(e) = tokens.ensure_fresh().await {
            warn!(err = %e, "preemptive token refresh failed");
        }
    });
}

/// The socket URL with the access token as `?token=`.
pub fn bridge_url(base: &str, access_token: &str) -> Result<String, BridgeError> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| BridgeError::Connect(format!("invalid bridge url {base}: {e}")))?;
    url.query_pairs_mut().append_pair("token", access_token);
    Ok(url.into())
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
