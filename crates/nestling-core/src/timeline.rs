//! Timestamp resolution and timeline-event derivation.
//!
//! Extracted events carry time in three competing shapes: the verbatim
//! string the parent said, a persisted ISO instant, and a loose free-text
//! time from the transcript. This module collapses them into one
//! `(timestamp, label)` pair under a strict priority order. The label is
//! for display only; the timestamp is for sort order only, and the two may
//! disagree in clock time when a verbatim string wins.

use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, TimeZone, Timelike};
use regex::Regex;
use uuid::Uuid;

use nestling_schema::{ExtractedEvent, Metrics, TimelineEvent};

use crate::describe::synthesize_description;

/// A sortable instant plus a displayable label. The timestamp is always a
/// valid RFC 3339 string and the label is always non-empty, even when every
/// input was absent or unparseable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTime {
    pub timestamp: String,
    pub label: String,
}

/// Loose 12-hour grammar: digits, optional colon+digits, optional meridiem
/// with or without periods/spaces. Unanchored, so "around 10 a.m." matches.
fn loose_time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([0-9]{1,2})(?::([0-9]{1,2}))?(?:\s*([ap])\.?\s*m\.?)?").expect("static regex")
    })
}

/// Strict 24-hour `HH:MM`.
fn strict_time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9]{1,2}):([0-9]{1,2})$").expect("static regex"))
}

fn short_label(hour24: u32, minute: u32) -> String {
    let period = if hour24 >= 12 { "PM" } else { "AM" };
    let hour12 = match hour24 % 12 {
        0 => 12,
        h => h,
    };
    format!("{hour12}:{minute:02} {period}")
}

fn parse_start_time(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).ok()
}

/// Attempt the two free-text grammars against `text`, building the instant
/// on `now`'s date. Returns `None` when neither grammar yields a valid time.
fn parse_free_text<Tz: TimeZone>(text: &str, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let lowered = text.to_lowercase();

    let (hour24, minute) = if let Some(caps) = loose_time_re().captures(&lowered) {
        let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
        let minute: u32 = caps
            .get(2)
            .map(|m| m.as_str().parse().ok())
            .unwrap_or(Some(0))?;
        let meridiem = caps.get(3).map(|m| m.as_str());
        if hour > 23 || minute > 59 {
            return None;
        }
        let hour24 = match meridiem {
            // Standard 12-hour wraparound: 12 AM is hour 0, 12 PM stays 12.
            Some("p") if hour < 12 => hour + 12,
            Some("a") if hour == 12 => 0,
            _ => hour,
        };
        (hour24, minute)
    } else if let Some(caps) = strict_time_re().captures(&lowered) {
        let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
        let minute: u32 = caps.get(2)?.as_str().parse().ok()?;
        if hour > 23 || minute > 59 {
            return None;
        }
        (hour, minute)
    } else {
        return None;
    };

    now.clone()
        .with_hour(hour24)?
        .with_minute(minute)?
        .with_second(0)?
        .with_nanosecond(0)
}

/// Resolve an event's sort timestamp and display label.
///
/// Priority order:
/// 1. verbatim original time string from metadata (label), with
///    `start_time` parsed for sort order only;
/// 2. persisted `start_time`;
/// 3. free-text `event_time` through the two grammars;
/// 4. `now`.
///
/// Parse failures are logged and resolved by falling further down the
/// chain; this never fails.
pub fn resolve_event_time<Tz: TimeZone>(event: &ExtractedEvent, now: DateTime<Tz>) -> ResolvedTime
where
    Tz::Offset: std::fmt::Display,
{
    if let Some(original) = event.original_time_string() {
        let timestamp = event
            .start_time
            .as_deref()
            .and_then(parse_start_time)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| now.to_rfc3339());
        return ResolvedTime {
            timestamp,
            label: original.to_string(),
        };
    }

    if let Some(raw) = event.start_time.as_deref() {
        if let Some(dt) = parse_start_time(raw) {
            let local = dt.with_timezone(&now.timezone());
            return ResolvedTime {
                timestamp: dt.to_rfc3339(),
                label: short_label(local.hour(), local.minute()),
            };
        }
        tracing::warn!(start_time = raw, "unparseable start_time, falling back");
    }

    if let Some(text) = event.free_text_time() {
        if let Some(dt) = parse_free_text(text, &now) {
            return ResolvedTime {
                timestamp: dt.to_rfc3339(),
                label: short_label(dt.hour(), dt.minute()),
            };
        }
        tracing::warn!(
            event_time = text,
            "unrecognized time format, using current time"
        );
    }

    ResolvedTime {
        timestamp: now.to_rfc3339(),
        label: short_label(now.hour(), now.minute()),
    }
}

/// Derive the displayable timeline event from an extracted one.
///
/// Events without a server row id get a fresh uuid; the caller's merge step
/// relies on ids being unique within the displayed list.
pub fn to_timeline_event<Tz: TimeZone>(event: &ExtractedEvent, now: DateTime<Tz>) -> TimelineEvent
where
    Tz::Offset: std::fmt::Display,
{
    let resolved = resolve_event_time(event, now);
    let metrics = Metrics::from_raw(event.event_type, event.metrics.as_ref());
    let description = synthesize_description(event.event_type, &metrics, event.summary.as_deref());
    TimelineEvent {
        id: event
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        kind: event.event_type,
        time: resolved.label,
        timestamp: Some(resolved.timestamp),
        full_narrative: Some(
            event
                .text_snippet
                .clone()
                .unwrap_or_else(|| description.clone()),
        ),
        has_details: event.text_snippet.is_some(),
        related_patterns: Vec::new(),
        description,
        is_new: true,
    }
}
