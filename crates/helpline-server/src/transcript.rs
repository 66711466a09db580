//! Plain-text rendering of a finished chat.

use std::fmt::Display;

use chrono::TimeZone;
use helpline_shared::constants::FILE_PLACEHOLDER;
use helpline_shared::ChatEntry;

/// US-locale date/time shape, e.g. `3/9/2024, 2:05:07 PM`.
const LOCAL_TIME_FORMAT: &str = "%-m/%-d/%Y, %-I:%M:%S %p";

/// Render `entries` one per line as `[ROLE] content (local time)`.
///
/// The output is what support staff read in the transcript email; keep the
/// bracket, case and ordering shape stable.
pub fn format_transcript<Tz>(entries: &[ChatEntry], tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    entries
        .iter()
        .map(|entry| format_line(entry, tz))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_line<Tz>(entry: &ChatEntry, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let local = entry.timestamp().with_timezone(tz);
    format!(
        "[{}] {} ({})",
        entry.role().as_str().to_uppercase(),
        content(entry),
        local.format(LOCAL_TIME_FORMAT)
    )
}

fn content(entry: &ChatEntry) -> &str {
    let body = match entry {
        ChatEntry::Text(m) => m.text.as_str(),
        ChatEntry::File(f) => f.name.as_str(),
    };
    if body.is_empty() {
        FILE_PLACEHOLDER
    } else {
        body
    }
}
