// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::credential::oauth::TokenUser;

fn pending() -> DeviceTokenResponse {
    DeviceTokenResponse { error: "authorization_pending".into(), ..Default::default() }
}

fn error(code: &str, description: &str) -> DeviceTokenResponse {
    DeviceTokenResponse {
        error: code.into(),
        error_description: description.into(),
        ..Default::default()
    }
}

fn granted() -> DeviceTokenResponse {
    DeviceTokenResponse {
        access_token: "at".into(),
        refresh_token: "rt".into(),
        token_type: "Bearer".into(),
        expires_in: 900,
        device_id: "dev-1".into(),
        user: Some(TokenUser { id: "u1".into(), email: "u@example.com".into() }),
        ..Default::default()
    }
}

// ── classify ──────────────────────────────────────────────────────────

#[yare::parameterized(
    still_pending = { pending(), PollResponse::Pending },
    empty_body = { DeviceTokenResponse::default(), PollResponse::Pending },
    slow_down = { error("slow_down", ""), PollResponse::SlowDown },
    expired = { error("expired_token", ""), PollResponse::Expired },
    denied = { error("access_denied", "user said no"), PollResponse::Denied },
    other_with_description = { error("server_error", "db down"), PollResponse::Failed("db down".into()) },
    other_bare = { error("invalid_client", ""), PollResponse::Failed("invalid_client".into()) },
)]
fn classify_token_responses(resp: DeviceTokenResponse, expected: PollResponse) {
    assert_eq!(PollResponse::classify(resp), expected);
}

#[test]
fn classify_access_token_is_authorized() {
    assert!(matches!(PollResponse::classify(granted()), PollResponse::Authorized(_)));
}

// ── PollState ─────────────────────────────────────────────────────────

#[test]
fn interval_has_rfc_floor() {
    let state = PollState::new(1, 600, Instant::now());
    assert_eq!(state.interval(), MIN_POLL_INTERVAL);
    let state = PollState::new(8, 600, Instant::now());
    assert_eq!(state.interval(), Duration::from_secs(8));
}

#[test]
fn oversized_peer_values_are_clamped() {
    let now = Instant::now();
    let mut state = PollState::new(u64::MAX, u64::MAX, now);
    assert_eq!(state.interval(), MAX_POLL_INTERVAL);
    assert_eq!(state.deadline(), now + MAX_CODE_LIFETIME);
    assert_eq!(state.advance(PollResponse::SlowDown), PollOutcome::Continue);
    assert_eq!(state.interval(), MAX_POLL_INTERVAL);
}

#[test]
fn slow_down_adds_increment() {
    let mut state = PollState::new(5, 600, Instant::now());
    assert_eq!(state.advance(PollResponse::SlowDown), PollOutcome::Continue);
    assert_eq!(state.interval(), Duration::from_secs(10));
    assert_eq!(state.advance(PollResponse::Pending), PollOutcome::Continue);
    assert_eq!(state.interval(), Duration::from_secs(10));
    assert_eq!(state.polls(), 2);
}

#[yare::parameterized(
    expired = { PollResponse::Expired, AuthError::Expired },
    denied = { PollResponse::Denied, AuthError::Denied },
    failed = { PollResponse::Failed("nope".into()), AuthError::Failed("nope".into()) },
)]
fn terminal_responses_fail(response: PollResponse, expected: AuthError) {
    let mut state = PollState::new(5, 600, Instant::now());
    assert_eq!(state.advance(response), PollOutcome::Failed(expected));
}

#[test]
fn deadline_is_relative_to_start() {
    let now = Instant::now();
    let state = PollState::new(5, 600, now);
    assert!(!state.is_expired(now + Duration::from_secs(599)));
    assert!(state.is_expired(now + Duration::from_secs(600)));
}

proptest::proptest! {
    #[test]
    fn slow_down_interval_is_monotonic_and_floored(
        initial in 0u64..30,
        script in proptest::collection::vec(proptest::bool::ANY, 0..40),
    ) {
        let mut state = PollState::new(initial, 600, Instant::now());
        let mut prev = state.interval();
        proptest::prop_assert!(prev >= MIN_POLL_INTERVAL);
        for slow in script {
            let response = if slow { PollResponse::SlowDown } else { PollResponse::Pending };
            state.advance(response);
            proptest::prop_assert!(state.interval() >= prev);
            proptest::prop_assert!(state.interval() >= MIN_POLL_INTERVAL);
            proptest::prop_assert!(state.interval() <= MAX_POLL_INTERVAL);
            prev = state.interval();
        }
    }
}

// ── poll_with ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn pending_three_times_then_token_succeeds_on_fourth_poll() -> anyhow::Result<()> {
    let start = Instant::now();
    let state = PollState::new(5, 600, start);
    let mut calls = 0u32;

    let token = poll_with(state, || {
        calls += 1;
        let n = calls;
        async move {
            if n < 4 {
                Ok(pending())
            } else {
                Ok(granted())
            }
        }
    })
    .await?;

    assert_eq!(calls, 4);
    assert_eq!(token.access_token, "at");
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(15), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(600), "elapsed {elapsed:?}");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn slow_down_stretches_the_wait() -> anyhow::Result<()> {
    let start = Instant::now();
    let state = PollState::new(5, 600, start);
    let mut calls = 0u32;

    poll_with(state, || {
        calls += 1;
        let n = calls;
        async move {
            match n {
                1 => Ok(error("slow_down", "")),
                _ => Ok(granted()),
            }
        }
    })
    .await?;

    // 5s before the first poll, then 10s after slow_down.
    assert_eq!(start.elapsed(), Duration::from_secs(15));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn deadline_passing_fails_with_expired() {
    let state = PollState::new(5, 12, Instant::now());
    let result = poll_with(state, || async { Ok(pending()) }).await;
    assert_eq!(result, Err(AuthError::Expired));
}

#[tokio::test(start_paused = true)]
async fn network_errors_keep_polling() -> anyhow::Result<()> {
    let state = PollState::new(5, 600, Instant::now());
    let mut calls = 0u32;

    poll_with(state, || {
        calls += 1;
        let n = calls;
        async move {
            if n == 1 {
                Err(AuthError::Network("connection reset".into()))
            } else {
                Ok(granted())
            }
        }
    })
    .await?;

    assert_eq!(calls, 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn access_denied_stops_polling() {
    let state = PollState::new(5, 600, Instant::now());
    let mut calls = 0u32;
    let result = poll_with(state, || {
        calls += 1;
        async { Ok(error("access_denied", "")) }
    })
    .await;
    assert_eq!(result, Err(AuthError::Denied));
    assert_eq!(calls, 1);
}

// ── Authorization ─────────────────────────────────────────────────────

#[test]
fn authorization_expiry_matches_expires_in() {
    let before = crate::credential::epoch_secs();
    let auth = Authorization::from_response(granted());
    assert!(auth.tokens.expires_at >= before + 900);
    assert!(auth.tokens.expires_at <= crate::credential::epoch_secs() + 900);
    assert_eq!(auth.device.device_id, "dev-1");
    assert_eq!(auth.device.refresh_token, "rt");
    assert_eq!(auth.device.user_email, "u@example.com");
}

// ── presentation ──────────────────────────────────────────────────────

#[yare::parameterized(
    eight = { "ABCD1234", "ABCD-1234" },
    short = { "ABC", "ABC" },
    dashed = { "ABCD-1234", "ABCD-1234" },
)]
fn user_code_formatting(input: &str, expected: &str) {
    assert_eq!(format_user_code(input), expected);
}

#[test]
fn present_prefers_complete_uri() -> anyhow::Result<()> {
    let code = DeviceCodeResponse {
        device_code: "dc".into(),
        user_code: "ABCD1234".into(),
        verification_uri: "https://example.com/device".into(),
        verification_uri_complete: "https://example.com/device?code=ABCD1234".into(),
        expires_in: 600,
        interval: 5,
    };
    let mut out = Vec::new();
    present(&code, &mut out)?;
    let text = String::from_utf8(out)?;
    assert!(text.contains("https://example.com/device?code=ABCD1234"));
    assert!(text.contains("ABCD-1234"));
    assert!(text.contains("10:00"));
    Ok(())
}
