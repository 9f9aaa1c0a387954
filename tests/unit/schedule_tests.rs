//! Unit tests for the active-hours window.

use std::time::Duration;

use chrono::{TimeZone, Utc};

use outreach_queue::config::GlobalConfig;
use outreach_queue::dispatcher::next_active_delay;

fn window(toml: &str) -> GlobalConfig {
    GlobalConfig::from_toml_str(toml).expect("config")
}

fn at(hour: u32, minute: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 1, hour, minute, 0)
        .single()
        .expect("instant")
}

const DAYTIME: &str = "[dispatcher]\nactive_hours_start = 6\nactive_hours_end = 22\n";

#[test]
fn no_window_never_waits() {
    let config = window("");
    assert_eq!(next_active_delay(at(3, 0), &config), None);
}

#[test]
fn inside_window_runs_now() {
    let config = window(DAYTIME);
    assert_eq!(next_active_delay(at(12, 0), &config), None);
    assert_eq!(next_active_delay(at(6, 0), &config), None);
    assert_eq!(next_active_delay(at(21, 59), &config), None);
}

#[test]
fn before_window_waits_until_opening() {
    let config = window(DAYTIME);
    assert_eq!(
        next_active_delay(at(3, 0), &config),
        Some(Duration::from_secs(3 * 3600))
    );
    assert_eq!(
        next_active_delay(at(5, 30), &config),
        Some(Duration::from_secs(30 * 60))
    );
}

#[test]
fn after_window_waits_until_next_morning() {
    let config = window(DAYTIME);
    assert_eq!(
        next_active_delay(at(23, 0), &config),
        Some(Duration::from_secs(7 * 3600))
    );
    assert_eq!(
        next_active_delay(at(22, 0), &config),
        Some(Duration::from_secs(8 * 3600))
    );
}

#[test]
fn window_uses_local_offset() {
    let config = window(
        "utc_offset_minutes = 120\n[dispatcher]\nactive_hours_start = 6\nactive_hours_end = 22\n",
    );
    // 03:00 UTC is 05:00 local.
    assert_eq!(
        next_active_delay(at(3, 0), &config),
        Some(Duration::from_secs(3600))
    );
    // 20:30 UTC is 22:30 local.
    assert_eq!(
        next_active_delay(at(20, 30), &config),
        Some(Duration::from_secs(7 * 3600 + 30 * 60))
    );
}
