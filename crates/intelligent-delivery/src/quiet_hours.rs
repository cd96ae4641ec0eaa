//! Quiet hours: suppresses sends during a daily do-not-disturb window.

use campaign_core::types::QuietHoursWindow;
use chrono::NaiveTime;

/// Whether `now` falls inside `window`. Both bounds are inclusive and `now`
/// is compared with its seconds, so 17:00:45 is past a window ending 17:00.
///
/// A window whose start is after its end wraps past midnight. A window with
/// equal bounds covers only that instant.
pub fn is_quiet_hours(window: &QuietHoursWindow, now: NaiveTime) -> bool {
    if window.wraps_midnight() {
        now >= window.start || now <= window.end
    } else {
        now >= window.start && now <= window.end
    }
}
