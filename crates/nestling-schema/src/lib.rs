use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod auth;

pub use auth::{Session, User, UserMetadata};

/// Kind of baby-care event the extractor recognizes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Feeding,
    Sleep,
    Diaper,
    Milestone,
    Measurement,
    Bath,
    Medication,
    Activity,
    Note,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feeding => "feeding",
            Self::Sleep => "sleep",
            Self::Diaper => "diaper",
            Self::Milestone => "milestone",
            Self::Measurement => "measurement",
            Self::Bath => "bath",
            Self::Medication => "medication",
            Self::Activity => "activity",
            Self::Note => "note",
        }
    }

    /// Whether the timeline has a dedicated card for this kind.
    /// Everything else degrades to a generic "{type} event" card.
    pub fn is_renderable(&self) -> bool {
        matches!(
            self,
            Self::Feeding | Self::Sleep | Self::Diaper | Self::Milestone
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured event produced by the extraction function.
///
/// Immutable once produced; the extractor enforces no uniqueness, so
/// duplicate detection belongs to whoever merges these into a display list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEvent {
    /// Server row id, present once the event has been persisted.
    #[serde(default)]
    pub id: Option<String>,
    pub event_type: EventType,
    /// Free-text time from the transcript ("10 a.m.", "14:30").
    #[serde(default)]
    pub event_time: Option<String>,
    /// ISO-8601 datetime from the persisted record.
    #[serde(default)]
    pub start_time: Option<String>,
    /// Loosely-typed metrics bag as it arrives on the wire.
    /// Use [`Metrics::from_raw`] for the typed view.
    #[serde(default)]
    pub metrics: Option<serde_json::Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
    /// Verbatim quoted source text.
    #[serde(default)]
    pub text_snippet: Option<String>,
    /// 0-100.
    #[serde(default)]
    pub confidence_score: Option<u8>,
    #[serde(default)]
    pub diary_entry_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub metadata: Option<EventMetadata>,
}

/// Extractor-side metadata carried alongside a persisted event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMetadata {
    /// The time expression exactly as the parent said it.
    #[serde(default)]
    pub original_time_string: Option<String>,
    #[serde(default)]
    pub event_time: Option<String>,
    #[serde(default)]
    pub confidence_score: Option<u8>,
    #[serde(default)]
    pub text_snippet: Option<String>,
}

impl ExtractedEvent {
    /// Free-text time with the metadata copy taking precedence, matching
    /// the extractor's habit of duplicating `event_time` into metadata.
    pub fn free_text_time(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.event_time.as_deref())
            .or(self.event_time.as_deref())
    }

    pub fn original_time_string(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.original_time_string.as_deref())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiaperKind {
    Wet,
    Dirty,
    Both,
    Dry,
}

impl DiaperKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wet => "wet",
            Self::Dirty => "dirty",
            Self::Both => "both",
            Self::Dry => "dry",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "wet" => Some(Self::Wet),
            "dirty" => Some(Self::Dirty),
            "both" => Some(Self::Both),
            "dry" => Some(Self::Dry),
            _ => None,
        }
    }
}

impl std::fmt::Display for DiaperKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feeding amount as reported by the extractor: a number means millilitres,
/// anything else is kept verbatim ("4oz").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeedingAmount {
    Millilitres(f64),
    Text(String),
}

impl std::fmt::Display for FeedingAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Millilitres(ml) => write!(f, "{ml}ml"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Typed view over the extractor's metrics bag, keyed by event type.
///
/// Bags for types without a dedicated shape, and bags that fail to match the
/// expected shape, land in `Unrecognized` so nothing is lost on round trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metrics {
    Feeding { amount: Option<FeedingAmount> },
    Sleep { minutes: Option<i64> },
    Diaper { kind: Option<DiaperKind> },
    Unrecognized(serde_json::Value),
}

impl Metrics {
    pub fn from_raw(kind: EventType, raw: Option<&serde_json::Value>) -> Self {
        let bag = raw.and_then(|v| v.as_object());
        match kind {
            EventType::Feeding => Self::Feeding {
                amount: bag.and_then(|b| b.get("amount")).and_then(|v| {
                    if let Some(n) = v.as_f64() {
                        Some(FeedingAmount::Millilitres(n))
                    } else {
                        v.as_str().map(|s| FeedingAmount::Text(s.to_string()))
                    }
                }),
            },
            EventType::Sleep => Self::Sleep {
                minutes: bag
                    .and_then(|b| b.get("duration"))
                    .and_then(|v| v.as_f64())
                    .map(|m| m.round() as i64),
            },
            EventType::Diaper => Self::Diaper {
                kind: bag
                    .and_then(|b| b.get("diaper_type"))
                    .and_then(|v| v.as_str())
                    .and_then(DiaperKind::parse),
            },
            _ => Self::Unrecognized(raw.cloned().unwrap_or(serde_json::Value::Null)),
        }
    }
}

/// The entity the timeline renders and the local cache persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Unique within a displayed list; merge keeps the newest copy per id.
    pub id: String,
    pub kind: EventType,
    /// Human-readable label ("10:00 AM"). Not necessarily sortable.
    pub time: String,
    /// RFC 3339 instant used only for sort ordering.
    #[serde(default)]
    pub timestamp: Option<String>,
    pub description: String,
    #[serde(default)]
    pub full_narrative: Option<String>,
    #[serde(default)]
    pub related_patterns: Vec<String>,
    #[serde(default)]
    pub has_details: bool,
    /// Transient entrance-animation flag; cleared after the display window
    /// and never re-triggered for the same cached record.
    #[serde(default)]
    pub is_new: bool,
}

/// Persisted raw transcript of one recording session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiaryEntry {
    pub id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub raw_text: String,
    #[serde(default)]
    pub audio_file_id: Option<String>,
    /// Recording length in seconds.
    #[serde(default)]
    pub duration: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Response of the transcription function. Either `success` with events and
/// the diary entry, or an error message plus the stage that failed; callers
/// treat any non-success body and a transport error identically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscribeResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub events: Vec<ExtractedEvent>,
    #[serde(default)]
    pub diary_entry: Option<DiaryEntry>,
    #[serde(default)]
    pub transcription: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, rename = "failedStep")]
    pub failed_step: Option<String>,
}

/// Response of the invitation function. The code is displayed verbatim and
/// never retried automatically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InviteResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Baby profile row, scoped to a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baby {
    #[serde(default)]
    pub id: Option<String>,
    pub tenant_id: String,
    pub name: String,
    #[serde(default)]
    pub birthdate: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Caregiver invitation row. Codes are generated server-side, eight
/// uppercase alphanumerics, and expire after seven days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    #[serde(default)]
    pub id: Option<String>,
    pub email: String,
    pub role: String,
    pub code: String,
    pub tenant_id: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_type_wire_names_are_snake_case() {
        let json = serde_json::to_string(&EventType::Feeding).unwrap();
        assert_eq!(json, "\"feeding\"");
        let parsed: EventType = serde_json::from_str("\"diaper\"").unwrap();
        assert_eq!(parsed, EventType::Diaper);
    }

    #[test]
    fn renderable_kinds() {
        assert!(EventType::Feeding.is_renderable());
        assert!(EventType::Milestone.is_renderable());
        assert!(!EventType::Measurement.is_renderable());
        assert!(!EventType::Note.is_renderable());
    }

    #[test]
    fn extracted_event_minimal_json_defaults() {
        // Old extractor payloads carry only type and summary.
        let raw = r#"{
            "event_type": "feeding",
            "summary": "Bottle at ten"
        }"#;
        let ev: ExtractedEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(ev.event_type, EventType::Feeding);
        assert_eq!(ev.summary.as_deref(), Some("Bottle at ten"));
        assert!(ev.id.is_none());
        assert!(ev.metrics.is_none());
        assert!(ev.tags.is_empty());
        assert!(ev.metadata.is_none());
    }

    #[test]
    fn free_text_time_prefers_metadata_copy() {
        let ev = ExtractedEvent {
            id: None,
            event_type: EventType::Sleep,
            event_time: Some("14:30".into()),
            start_time: None,
            metrics: None,
            tags: vec![],
            summary: None,
            text_snippet: None,
            confidence_score: None,
            diary_entry_id: None,
            created_at: None,
            metadata: Some(EventMetadata {
                event_time: Some("2:30 pm".into()),
                ..Default::default()
            }),
        };
        assert_eq!(ev.free_text_time(), Some("2:30 pm"));
    }

    #[test]
    fn metrics_from_raw_feeding_number_and_text() {
        let m = Metrics::from_raw(EventType::Feeding, Some(&json!({ "amount": 4 })));
        assert_eq!(
            m,
            Metrics::Feeding {
                amount: Some(FeedingAmount::Millilitres(4.0))
            }
        );

        let m = Metrics::from_raw(EventType::Feeding, Some(&json!({ "amount": "4oz" })));
        assert_eq!(
            m,
            Metrics::Feeding {
                amount: Some(FeedingAmount::Text("4oz".into()))
            }
        );

        let m = Metrics::from_raw(EventType::Feeding, None);
        assert_eq!(m, Metrics::Feeding { amount: None });
    }

    #[test]
    fn metrics_from_raw_sleep_rounds_minutes() {
        let m = Metrics::from_raw(EventType::Sleep, Some(&json!({ "duration": 79.6 })));
        assert_eq!(m, Metrics::Sleep { minutes: Some(80) });
    }

    #[test]
    fn metrics_from_raw_diaper_unknown_kind_degrades() {
        let m = Metrics::from_raw(EventType::Diaper, Some(&json!({ "diaper_type": "wet" })));
        assert_eq!(
            m,
            Metrics::Diaper {
                kind: Some(DiaperKind::Wet)
            }
        );
        let m = Metrics::from_raw(EventType::Diaper, Some(&json!({ "diaper_type": "soggy" })));
        assert_eq!(m, Metrics::Diaper { kind: None });
    }

    #[test]
    fn metrics_from_raw_other_types_keep_the_bag() {
        let bag = json!({ "weight": 6.2, "height": 61 });
        let m = Metrics::from_raw(EventType::Measurement, Some(&bag));
        assert_eq!(m, Metrics::Unrecognized(bag));
    }

    #[test]
    fn feeding_amount_display() {
        assert_eq!(FeedingAmount::Millilitres(4.0).to_string(), "4ml");
        assert_eq!(FeedingAmount::Millilitres(4.5).to_string(), "4.5ml");
        assert_eq!(FeedingAmount::Text("4oz".into()).to_string(), "4oz");
    }

    #[test]
    fn transcribe_response_error_body() {
        let raw = r#"{
            "success": false,
            "error": "Transcription failed",
            "failedStep": "transcription"
        }"#;
        let resp: TranscribeResponse = serde_json::from_str(raw).unwrap();
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("Transcription failed"));
        assert_eq!(resp.failed_step.as_deref(), Some("transcription"));
        assert!(resp.events.is_empty());
    }

    #[test]
    fn transcribe_response_success_roundtrip() {
        let resp = TranscribeResponse {
            success: true,
            events: vec![ExtractedEvent {
                id: Some("evt-1".into()),
                event_type: EventType::Feeding,
                event_time: Some("10 a.m.".into()),
                start_time: None,
                metrics: Some(json!({ "amount": 4 })),
                tags: vec!["bottle".into()],
                summary: Some("Bottle feeding at 10".into()),
                text_snippet: Some("gave her a bottle around 10".into()),
                confidence_score: Some(92),
                diary_entry_id: None,
                created_at: None,
                metadata: None,
            }],
            transcription: Some("gave her a bottle around 10 a.m.".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&resp).unwrap();
        let de: TranscribeResponse = serde_json::from_str(&json).unwrap();
        assert!(de.success);
        assert_eq!(de.events.len(), 1);
        assert_eq!(de.events[0].id.as_deref(), Some("evt-1"));
        assert_eq!(de.events[0].confidence_score, Some(92));
    }

    #[test]
    fn timeline_event_backward_compat() {
        // Records cached before sort timestamps existed still load.
        let raw = r#"{
            "id": "1",
            "kind": "feeding",
            "time": "2:30 PM",
            "description": "Bottle feeding, 4oz formula"
        }"#;
        let ev: TimelineEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(ev.timestamp, None);
        assert!(!ev.has_details);
        assert!(!ev.is_new);
        assert!(ev.related_patterns.is_empty());
    }
}
