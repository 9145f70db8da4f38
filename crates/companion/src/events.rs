// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Activity log: recent tool calls and connection events for presentation.
//!
//! The daemon records into an [`ActivityLog`]; anything rendering status
//! (log lines today, a dashboard tomorrow) reads the recent history and
//! subscribes for live events.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::bridge::ConnectionState;
use crate::credential::epoch_secs;

/// Entries kept in the ring.
pub const ACTIVITY_CAPACITY: usize = 100;

// -- Event types -------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityEvent {
    /// A tool call arrived from the peer.
    ToolCall { call_id: String, tool: String, owner: String },
    /// A tool call finished.
    ToolResult {
        call_id: String,
        tool: String,
        success: bool,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// The bridge changed state.
    Connection { state: ConnectionState },
    /// Tools were (re-)registered with the peer.
    Registered { tools: usize },
    /// A server was started, stopped or failed.
    Server { name: String, action: String, detail: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityEntry {
    /// Epoch seconds.
    pub at: u64,
    #[serde(flatten)]
    pub event: ActivityEvent,
}

// -- Log ---------------------------------------------------------------------

/// Bounded history plus a broadcast channel for live subscribers.
pub struct ActivityLog {
    ring: Mutex<VecDeque<ActivityEntry>>,
    capacity: usize,
    event_tx: broadcast::Sender<ActivityEntry>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::with_capacity(ACTIVITY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let capacity = capacity.max(1);
        Self { ring: Mutex::new(VecDeque::with_capacity(capacity)), capacity, event_tx }
    }

    pub fn record(&self, event: ActivityEvent) {
        let entry = ActivityEntry { at: epoch_secs(), event };
        {
            let mut ring = self.ring.lock();
            if ring.len() == self.capacity {
                ring.pop_front();
            }
            ring.push_back(entry.clone());
        }
        // No subscribers is fine.
        let _ = self.event_tx.send(entry);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActivityEntry> {
        self.event_tx.subscribe()
    }

    /// Oldest first.
    pub fn recent(&self) -> Vec<ActivityEntry> {
        self.ring.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
