//! Tick alignment and freshness gating. Ticks are computed so the result
//! is always strictly greater than
//! `after`, skipping the exact-match point.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};

/// Next instant `>= now` aligned to `(anchor_sec, interval_sec)` counted from
/// midnight UTC of `now`'s calendar day. Shared by both the main sender tick
/// (`anchorOffsetSec`) and the resend worker (`resendAnchorOffsetSec`) —
/// same formula, different parameters.
pub fn next_aligned_tick(now: DateTime<Utc>, anchor_sec: i64, interval_sec: i64) -> DateTime<Utc> {
    let midnight = Utc.with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0).unwrap();
    let elapsed = (now - midnight).num_seconds();
    let k = (elapsed - anchor_sec).div_euclid(interval_sec);
    let next_elapsed = k * interval_sec + anchor_sec + interval_sec;
    midnight + Duration::seconds(next_elapsed)
}

/// A snapshot is "fresh" iff sampled within `fresh_window_sec` of `tick`.
pub fn is_fresh(sampling_ts: i64, tick: DateTime<Utc>, fresh_window_sec: i64) -> bool {
    (tick.timestamp() - sampling_ts).abs() <= fresh_window_sec
}

/// A stale snapshot may still be used as a "last-known" fallback iff
/// `ttl_sec > 0` and it falls within that TTL of `tick`.
pub fn within_last_known_ttl(sampling_ts: i64, tick: DateTime<Utc>, ttl_sec: i64) -> bool {
    ttl_sec > 0 && (tick.timestamp() - sampling_ts) <= ttl_sec && sampling_ts <= tick.timestamp()
}

/// Resend worker health gate: skip the cycle
/// ("cloud is unhealthy; don't burn retries") if `last_post_ok_within_sec >
/// 0` and the last successful POST is missing or older than that window.
pub fn resend_gate_blocked(last_post_ok_at: Option<DateTime<Utc>>, now: DateTime<Utc>, last_post_ok_within_sec: i64) -> bool {
    if last_post_ok_within_sec <= 0 {
        return false;
    }
    match last_post_ok_at {
        None => true,
        Some(t) => (now - t).num_seconds() > last_post_ok_within_sec,
    }
}
