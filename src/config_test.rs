use super::*;

// =============================================================================
// env_parse
// =============================================================================

#[test]
fn env_parse_missing_returns_default() {
    let val: u64 = env_parse("__AGENTBOARD_TEST_MISSING__", 42);
    assert_eq!(val, 42);
}

#[test]
fn env_parse_present_valid() {
    unsafe { std::env::set_var("__AGENTBOARD_TEST_VALID__", "99") };
    let val: u32 = env_parse("__AGENTBOARD_TEST_VALID__", 0);
    assert_eq!(val, 99);
    unsafe { std::env::remove_var("__AGENTBOARD_TEST_VALID__") };
}

#[test]
fn env_parse_present_invalid_returns_default() {
    unsafe { std::env::set_var("__AGENTBOARD_TEST_INVALID__", "soon") };
    let val: u64 = env_parse("__AGENTBOARD_TEST_INVALID__", 7);
    assert_eq!(val, 7);
    unsafe { std::env::remove_var("__AGENTBOARD_TEST_INVALID__") };
}

// =============================================================================
// ws_url
// =============================================================================

#[test]
fn ws_url_from_http() {
    assert_eq!(ws_url("http://localhost:8000").unwrap(), "ws://localhost:8000/ws");
}

#[test]
fn ws_url_from_https_strips_trailing_slash() {
    assert_eq!(ws_url("https://agents.example.com/").unwrap(), "wss://agents.example.com/ws");
}

#[test]
fn ws_url_rejects_other_schemes() {
    let err = ws_url("ftp://agents").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidBaseUrl(_)));
    assert_eq!(err.error_code(), "E_CONFIG_BASE_URL");
}

// =============================================================================
// ReconnectPolicy
// =============================================================================

#[test]
fn reconnect_policy_defaults() {
    let policy = ReconnectPolicy::default();
    assert_eq!(policy.base_delay, Duration::from_millis(3_000));
    assert_eq!(policy.max_delay, Duration::from_millis(30_000));
    assert_eq!(policy.max_attempts, 5);
}

#[test]
fn reconnect_delays_double_then_cap() {
    let policy = ReconnectPolicy::default();
    let delays: Vec<u128> = (0..6).map(|a| policy.delay_for(a).as_millis()).collect();
    assert_eq!(delays, vec![3_000, 6_000, 12_000, 24_000, 30_000, 30_000]);
}

#[test]
fn reconnect_delays_are_non_decreasing() {
    let policy = ReconnectPolicy {
        base_delay: Duration::from_millis(7),
        max_delay: Duration::from_millis(500),
        max_attempts: 64,
    };
    let mut previous = Duration::ZERO;
    for attempt in 0..64 {
        let delay = policy.delay_for(attempt);
        assert!(delay >= previous, "attempt {attempt} went backwards");
        assert!(delay <= policy.max_delay);
        previous = delay;
    }
}

#[test]
fn reconnect_delay_huge_attempt_does_not_overflow() {
    let policy = ReconnectPolicy::default();
    assert_eq!(policy.delay_for(u32::MAX), policy.max_delay);
}

// =============================================================================
// SyncConfig
// =============================================================================

#[test]
fn sync_config_new_derives_stream_url() {
    let config = SyncConfig::new("http://127.0.0.1:9000/").unwrap();
    assert_eq!(config.base_url, "http://127.0.0.1:9000");
    assert_eq!(config.stream.url, "ws://127.0.0.1:9000/ws");
    assert_eq!(config.stream.heartbeat_interval, Duration::from_secs(30));
    assert_eq!(config.request_timeout, Duration::from_secs(30));
    assert_eq!(config.layout_path, PathBuf::from(DEFAULT_LAYOUT_PATH));
}

#[test]
fn sync_config_new_rejects_bad_url() {
    assert!(SyncConfig::new("localhost:8000").is_err());
}

#[test]
fn sync_config_from_env_floors_zero_heartbeat() {
    unsafe { std::env::set_var("AGENTBOARD_HEARTBEAT_MS", "0") };
    let config = SyncConfig::from_env().unwrap();
    unsafe { std::env::remove_var("AGENTBOARD_HEARTBEAT_MS") };
    assert_eq!(config.stream.heartbeat_interval, MIN_HEARTBEAT);
}

// =============================================================================
// StreamConfig heartbeat
// =============================================================================

#[test]
fn heartbeat_period_is_never_zero() {
    let mut stream = StreamConfig::new("ws://127.0.0.1:1/ws");
    stream.heartbeat_interval = Duration::ZERO;
    assert_eq!(stream.heartbeat_period(), MIN_HEARTBEAT);
    assert_eq!(stream.heartbeat_deadline(), MIN_HEARTBEAT * 2);
}

#[test]
fn heartbeat_deadline_spans_two_periods() {
    let stream = StreamConfig::new("ws://127.0.0.1:1/ws");
    assert_eq!(stream.heartbeat_period(), Duration::from_secs(30));
    assert_eq!(stream.heartbeat_deadline(), Duration::from_secs(60));
}
