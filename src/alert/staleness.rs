/// Tank reading staleness detection.
///
/// Transmitters push on a fixed cadence, so a tank whose last accepted
/// reading is older than the staleness window has almost certainly lost
/// its sensor or its link. Fleet summaries report such a tank as offline
/// regardless of the status label stored with its last reading — the label
/// describes the transmitter's view at send time, not the link's health now.
///
/// # Clock injection
/// Functions take a `now: DateTime<Utc>` parameter rather than calling
/// `Utc::now()` internally, keeping staleness deterministic in tests.

use chrono::{DateTime, Duration, Utc};

/// Status label reported for a tank whose readings have gone stale.
pub const OFFLINE_STATUS: &str = "offline";

/// Returns `true` if `last_update` is older than `window_secs` relative
/// to `now`.
///
/// Staleness is strictly greater than the window:
///   age > window  →  stale
///   age == window →  not stale
pub fn is_stale_at(last_update: DateTime<Utc>, window_secs: i64, now: DateTime<Utc>) -> bool {
    now - last_update > Duration::seconds(window_secs)
}

/// Derives the externally reported status for a tank: the stored label
/// while fresh, `"offline"` once stale.
pub fn derive_status(
    stored: &str,
    last_update: DateTime<Utc>,
    window_secs: i64,
    now: DateTime<Utc>,
) -> String {
    if is_stale_at(last_update, window_secs, now) {
        OFFLINE_STATUS.to_string()
    } else {
        stored.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
