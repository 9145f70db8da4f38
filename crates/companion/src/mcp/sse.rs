// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Legacy MCP HTTP+SSE transport.
//!
//! The client opens `GET <url>` as an event stream. The server's first
//! `endpoint` event names the URL that JSON-RPC messages are POSTed to;
//! responses come back as `message` events on the stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::credential::ToolServerSpec;
use crate::error::McpError;
use crate::mcp::process::{read_lines_lossy, ChildProcess, ProcessHandle};
use crate::mcp::transport::{BoxFuture, McpTransport, PendingCalls};

/// Budget for reaching the stream and receiving the `endpoint` event.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_RETRY: Duration = Duration::from_millis(200);

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` parser.
#[derive(Debug, Default)]
pub struct SseEventParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseEventParser {
    /// Feed a chunk; returns every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let text = String::from_utf8_lossy(&line).into_owned();
            self.line(&text, &mut events);
        }
        events
    }

    /// Flush a trailing unterminated line and any pending event.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let text = String::from_utf8_lossy(&rest).into_owned();
            self.line(text.trim_end_matches('\r'), &mut events);
        }
        self.dispatch(&mut events);
        events
    }

    fn line(&mut self, line: &str, out: &mut Vec<SseEvent>) {
        if line.is_empty() {
            self.dispatch(out);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            _ => {}
        }
    }

    fn dispatch(&mut self, out: &mut Vec<SseEvent>) {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return;
        }
        out.push(SseEvent {
            event: event.unwrap_or_else(|| "message".to_owned()),
            data: std::mem::take(&mut self.data).join("\n"),
        });
    }
}

pub fn is_event_stream(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|v| v.eq_ignore_ascii_case("text/event-stream"))
}

pub struct SseTransport {
    client: reqwest::Client,
    endpoint: Url,
    process: Option<ChildProcess>,
    stream_alive: Arc<AtomicBool>,
    cancel: CancellationToken,
    pending: Arc<PendingCalls>,
}

impl SseTransport {
    /// Launch the server process (if one is configured), open the event
    /// stream, and wait for the POST endpoint.
    pub async fn connect(
        spec: &ToolServerSpec,
        pending: Arc<PendingCalls>,
    ) -> Result<Self, McpError> {
        if spec.url.is_empty() {
            return Err(McpError::Protocol(format!("sse server {} has no url", spec.name)));
        }
        let base = Url::parse(&spec.url)
            .map_err(|e| McpError::Protocol(format!("invalid url {}: {e}", spec.url)))?;

        let process = match spec.program() {
            Some(program) => {
                let spawned = ChildProcess::spawn(&spec.name, program, &spec.args)?;
                if let Some(out) = spawned.stdout {
                    drain_to_log(&spec.name, "stdout", out);
                }
                if let Some(err) = spawned.stderr {
                    drain_to_log(&spec.name, "stderr", err);
                }
                Some(spawned.process)
            }
            None => None,
        };

        match open_stream(&spec.name, &base, &pending).await {
            Ok((client, endpoint, resp, parser)) => {
                let stream_alive = Arc::new(AtomicBool::new(true));
                let cancel = CancellationToken::new();
                spawn_reader(
                    spec.name.clone(),
                    resp,
                    parser,
                    Arc::clone(&pending),
                    Arc::clone(&stream_alive),
                    cancel.clone(),
                );
                Ok(Self { client, endpoint, process, stream_alive, cancel, pending })
            }
            Err(e) => {
                if let Some(ref p) = process {
                    p.stop().await;
                }
                Err(e)
            }
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn post(&self, message: String) -> Result<(), McpError> {
        let resp = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(message)
            .send()
            .await?
            .error_for_status()?;

        // Some servers answer inline instead of on the stream.
        let inline_json = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));
        if inline_json {
            let body = resp.text().await?;
            if !body.trim().is_empty() {
                self.pending.dispatch(body.trim());
            }
        }
        Ok(())
    }

    async fn close(&self) {
        self.cancel.cancel();
        if let Some(ref p) = self.process {
            p.stop().await;
        }
        self.pending.fail_all(McpError::Closed);
    }
}

impl McpTransport for SseTransport {
    fn send(&self, message: String) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(self.post(message))
    }

    fn is_alive(&self) -> bool {
        self.stream_alive.load(Ordering::Acquire)
            && self.process.as_ref().is_none_or(|p| p.is_alive())
    }

    fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.pid())
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.close())
    }
}

type OpenedStream = (reqwest::Client, Url, reqwest::Response, SseEventParser);

async fn open_stream(
    name: &str,
    base: &Url,
    pending: &PendingCalls,
) -> Result<OpenedStream, McpError> {
    let client = crate::stream_client();
    let deadline = tokio::time::Instant::now() + CONNECT_TIMEOUT;

    // The server may still be starting up; retry until the deadline.
    let mut resp = loop {
        let attempt = client
            .get(base.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        match attempt {
            Ok(r) => break r,
            Err(e) if tokio::time::Instant::now() < deadline => {
                debug!(server = %name, err = %e, "sse stream not ready, retrying");
                tokio::time::sleep(CONNECT_RETRY).await;
            }
            Err(e) => return Err(e.into()),
        }
    };

    let content_type =
        resp.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or_default();
    if !is_event_stream(content_type) {
        return Err(McpError::Protocol(format!("expected text/event-stream, got {content_type:?}")));
    }

    let mut parser = SseEventParser::default();
    let wait_endpoint = async {
        loop {
            let chunk = match resp.chunk().await? {
                Some(c) => c,
                None => return Err(McpError::Closed),
            };
            let mut endpoint = None;
            for ev in parser.push(&chunk) {
                match ev.event.as_str() {
                    "endpoint" if endpoint.is_none() => {
                        let url = base.join(ev.data.trim()).map_err(|e| {
                            McpError::Protocol(format!("invalid endpoint {:?}: {e}", ev.data))
                        })?;
                        endpoint = Some(url);
                    }
                    "message" => pending.dispatch(&ev.data),
                    _ => {}
                }
            }
            if let Some(url) = endpoint {
                return Ok(url);
            }
        }
    };
    let endpoint = tokio::time::timeout(CONNECT_TIMEOUT, wait_endpoint)
        .await
        .map_err(|_| McpError::Timeout(CONNECT_TIMEOUT))??;
    debug!(server = %name, endpoint = %endpoint, "sse endpoint received");
    Ok((client, endpoint, resp, parser))
}

fn spawn_reader(
    name: String,
    resp: reqwest::Response,
    mut parser: SseEventParser,
    pending: Arc<PendingCalls>,
    alive: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut stream = resp.bytes_stream();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        for ev in parser.push(&bytes) {
                            if ev.event == "message" {
                                pending.dispatch(&ev.data);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        debug!(server = %name, err = %e, "sse stream error");
                        break;
                    }
                    None => {
                        for ev in parser.finish() {
                            if ev.event == "message" {
                                pending.dispatch(&ev.data);
                            }
                        }
                        break;
                    }
                },
            }
        }
        debug!(server = %name, "sse stream closed");
        alive.store(false, Ordering::Release);
        pending.fail_all(McpError::Closed);
    });
}

fn drain_to_log<R>(name: &str, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let name = name.to_owned();
    tokio::spawn(async move {
        let read = read_lines_lossy(reader, |line| debug!(server = %name, stream, "{line}")).await;
        if let Err(e) = read {
            debug!(server = %name, stream, err = %e, "read failed");
        }
    });
}

#[cfg(test)]
#[path = "sse_tests.rs"]
mod tests;
