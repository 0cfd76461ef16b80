//! Display helpers for message lists and contact previews.

use chrono::{DateTime, TimeZone};
use std::fmt::Display;

/// Default length of a last-message preview in the contact list.
pub const PREVIEW_LENGTH: usize = 50;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Format a message timestamp relative to `now`: the time of day within the
/// last 24 hours, "Yesterday", a weekday within a week, otherwise a date.
pub fn format_message_time<Tz>(timestamp_ms: u64, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let Some(sent) = now.timezone().timestamp_millis_opt(timestamp_ms as i64).single() else {
        return String::new();
    };

    let days = (now.timestamp_millis() - timestamp_ms as i64).div_euclid(DAY_MS);
    match days {
        // Future timestamps (sender clock ahead of ours) show as a time of day
        i64::MIN..=0 => sent.format("%H:%M").to_string(),
        1 => "Yesterday".to_string(),
        2..=6 => sent.format("%a").to_string(),
        _ => sent.format("%m/%d/%Y").to_string(),
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut with "...".
pub fn truncate_message(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
