// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `http_request`: one HTTP call, status, selected headers and body.

use std::error::Error as _;
use std::fmt::Write as _;
use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;

use super::{optional_bool, optional_str, optional_u64, required_str, truncate_smartly};
use super::{CoreTool, OUTPUT_LIMIT_CHARS};
use crate::mcp::transport::BoxFuture;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

const METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// Response headers worth showing.
const SHOWN_HEADERS: &[&str] = &[
    "content-type",
    "content-length",
    "location",
    "set-cookie",
    "x-request-id",
    "x-powered-by",
    "server",
    "cache-control",
    "access-control-allow-origin",
];

pub struct HttpRequest {
    max_body_bytes: usize,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self { max_body_bytes: DEFAULT_MAX_BODY_BYTES }
    }
}

impl HttpRequest {
    async fn send(&self, args: &Value) -> anyhow::Result<String> {
        let url = required_str(args, "url")?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("url must start with http:// or https://");
        }
        let method = optional_str(args, "method").unwrap_or("GET").to_uppercase();
        if !METHODS.contains(&method.as_str()) {
            anyhow::bail!("unsupported method {method} (use one of {})", METHODS.join(", "));
        }
        let method = Method::from_bytes(method.as_bytes())?;
        let timeout = optional_u64(args, "timeout_ms")
            .map_or(DEFAULT_REQUEST_TIMEOUT, |ms| Duration::from_millis(ms).min(MAX_REQUEST_TIMEOUT));

        crate::install_crypto_provider();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("companion/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(optional_bool(args, "insecure"))
            .build()
            .context("failed to build http client")?;

        let mut request = client.request(method.clone(), url);
        if let Some(headers) = args.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                let Some(value) = value.as_str() else { continue };
                let name = HeaderName::from_bytes(name.as_bytes())
                    .with_context(|| format!("invalid header name {name:?}"))?;
                let value = HeaderValue::from_str(value)
                    .with_context(|| format!("invalid value for header {name}"))?;
                request = request.header(name, value);
            }
        }
        if let Some(body) = optional_str(args, "body") {
            request = request.body(body.to_owned());
        }

        debug!(%method, url, ?timeout, "http_request");
        let mut response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => anyhow::bail!("request timed out after {timeout:?}"),
            Err(e) => {
                return match classify(&e) {
                    Some(Unreachable::Refused) => Ok(format!(
                        "Connection refused at {url}: the server is not running or not \
                         listening on this port."
                    )),
                    Some(Unreachable::Dns) => Ok(format!(
                        "DNS lookup failed for {url}: the hostname could not be resolved."
                    )),
                    None => Err(anyhow::Error::new(e).context("request failed")),
                };
            }
        };

        let status = response.status();
        let mut out = format!(
            "HTTP {} {}\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or_default()
        );
        let mut shown = 0;
        for name in SHOWN_HEADERS {
            let Some(value) = response.headers().get(*name) else { continue };
            if shown == 0 {
                out.push_str("\nHeaders:\n");
            }
            let _ = writeln!(out, "  {name}: {}", value.to_str().unwrap_or("<binary>"));
            shown += 1;
        }
        if method == Method::HEAD {
            return Ok(out);
        }

        let mut body = Vec::new();
        let mut total = 0usize;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    total = total.saturating_add(chunk.len());
                    let room = self.max_body_bytes.saturating_sub(body.len());
                    body.extend_from_slice(&chunk[..chunk.len().min(room)]);
                    if total > self.max_body_bytes {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) if e.is_timeout() => {
                    anyhow::bail!("request timed out after {timeout:?} reading the body")
                }
                Err(e) => {
                    let _ = write!(out, "\nBody: (error reading: {e})");
                    return Ok(out);
                }
            }
        }
        if body.is_empty() {
            out.push_str("\nBody: (empty)");
            return Ok(out);
        }
        let text = String::from_utf8_lossy(&body);
        let clipped = truncate_smartly(&text, OUTPUT_LIMIT_CHARS);
        out.push_str("\nBody:\n");
        out.push_str(&clipped);
        if total > self.max_body_bytes || clipped.len() != text.len() {
            let more = if total > self.max_body_bytes { "more than " } else { "" };
            let _ = write!(out, "\n\n(body truncated; original size: {more}{total} bytes)");
        }
        Ok(out)
    }
}

enum Unreachable {
    Refused,
    Dns,
}

/// Failures that mean "nothing answered" rather than a broken request.
fn classify(err: &reqwest::Error) -> Option<Unreachable> {
    let mut source = err.source();
    while let Some(e) = source {
        let refused = e
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io| io.kind() == std::io::ErrorKind::ConnectionRefused);
        if refused {
            return Some(Unreachable::Refused);
        }
        if e.to_string().contains("dns error") {
            return Some(Unreachable::Dns);
        }
        source = e.source();
    }
    None
}

impl CoreTool for HttpRequest {
    fn name(&self) -> &'static str {
        "http_request"
    }

    fn description(&self) -> &'static str {
        "Make an HTTP request and return the status, selected response headers and body. \
         Useful for testing APIs and checking that a local server responds. Supports GET, \
         POST, PUT, DELETE, PATCH, HEAD and OPTIONS with custom headers and a request body. \
         Timeout defaults to 30 seconds (max 120); bodies are capped at 1MB."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "Full URL including http:// or https://." },
                "method": { "type": "string", "enum": METHODS, "description": "HTTP method. Default GET." },
                "headers": { "type": "object", "description": "Request headers as name/value pairs." },
                "body": { "type": "string", "description": "Request body." },
                "timeout_ms": { "type": "integer", "description": "Timeout in milliseconds. Default 30000, max 120000." },
                "insecure": { "type": "boolean", "description": "Skip TLS certificate verification." },
            },
            "required": ["url"],
        })
    }

    fn execute<'a>(&'a self, args: &'a Value) -> BoxFuture<'a, anyhow::Result<String>> {
        Box::pin(self.send(args))
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
