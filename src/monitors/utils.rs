use chrono::{DateTime, Duration, Utc};

use crate::db::enums::CheckInStatus;
use crate::monitors::validators::ValidatedMonitorConfig;

pub const MAX_SLUG_LENGTH: usize = 50;

/// Sanity ceiling for stored durations, in milliseconds.
pub const MAX_DURATION_MS: i64 = i32::MAX as i64;

/// Applied when a config carries no max_runtime, in minutes.
pub const DEFAULT_MAX_RUNTIME_MINUTES: u32 = 30;

/// Lowercases, collapses non-alphanumeric runs to single dashes, and clamps
/// to [`MAX_SLUG_LENGTH`].
pub fn slugify(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug.truncate(MAX_SLUG_LENGTH);
    slug.trim_matches('-').to_string()
}

/// A missing duration is valid ("unknown"); a present one must be
/// non-negative and below the sanity ceiling.
pub fn valid_duration(duration: Option<i64>) -> bool {
    match duration {
        None => true,
        Some(ms) => (0..=MAX_DURATION_MS).contains(&ms),
    }
}

/// Wire durations are fractional seconds; storage is whole milliseconds.
pub fn duration_secs_to_ms(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}

/// Timeout deadline for a check-in entering `status` at `reference`. Only
/// in-progress check-ins carry a deadline; terminal rows never time out.
pub fn timeout_at(
    config: Option<&ValidatedMonitorConfig>,
    status: CheckInStatus,
    reference: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if status != CheckInStatus::InProgress {
        return None;
    }
    let max_runtime = config
        .and_then(|c| c.max_runtime)
        .unwrap_or(DEFAULT_MAX_RUNTIME_MINUTES);
    Some(reference + Duration::minutes(i64::from(max_runtime)))
}

/// Next expected check-in after `last_checkin`: the schedule's next
/// occurrence plus the configured margin. `None` when the stored schedule
/// does not evaluate.
pub fn next_scheduled_checkin(
    config: &ValidatedMonitorConfig,
    last_checkin: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let schedule = config.schedule().ok()?;
    let next = schedule.next_occurrence(last_checkin)?;
    let margin = i64::from(config.checkin_margin.unwrap_or(0));
    Some(next + Duration::minutes(margin))
}
