// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn registered(n: usize) -> ActivityEvent {
    ActivityEvent::Registered { tools: n }
}

#[test]
fn ring_drops_oldest() {
    let log = ActivityLog::with_capacity(3);
    for n in 0..5 {
        log.record(registered(n));
    }
    let tools: Vec<ActivityEvent> = log.recent().into_iter().map(|e| e.event).collect();
    assert_eq!(tools, vec![registered(2), registered(3), registered(4)]);
}

#[test]
fn default_capacity_is_bounded() {
    let log = ActivityLog::new();
    for n in 0..(ACTIVITY_CAPACITY + 20) {
        log.record(registered(n));
    }
    assert_eq!(log.len(), ACTIVITY_CAPACITY);
}

#[tokio::test]
async fn subscribers_see_live_events() -> anyhow::Result<()> {
    let log = ActivityLog::new();
    let mut rx = log.subscribe();
    log.record(ActivityEvent::Connection { state: ConnectionState::Connected });
    let entry = rx.recv().await?;
    assert_eq!(entry.event, ActivityEvent::Connection { state: ConnectionState::Connected });
    Ok(())
}

#[test]
fn entries_serialize_flat() -> anyhow::Result<()> {
    let entry = ActivityEntry {
        at: 7,
        event: ActivityEvent::ToolResult {
            call_id: "c1".into(),
            tool: "read_file".into(),
            success: false,
            duration_ms: 12,
            error: Some("boom".into()),
        },
    };
    let value = serde_json::to_value(&entry)?;
    assert_eq!(value["type"], "tool_result");
    assert_eq!(value["at"], 7);
    assert_eq!(value["error"], "boom");
    Ok(())
}
