//! Short human-readable descriptions for timeline cards.

use nestling_schema::{EventType, Metrics};

fn sleep_duration_text(minutes: i64) -> String {
    let hours = minutes / 60;
    let rest = minutes % 60;
    if hours > 0 {
        let hour_word = if hours > 1 { "hours" } else { "hour" };
        if rest > 0 {
            format!("{hours} {hour_word} {rest} minutes")
        } else {
            format!("{hours} {hour_word}")
        }
    } else {
        format!("{rest} minutes")
    }
}

/// Derive a card description from the event type and metrics. An
/// extractor-provided summary always wins over synthesized text; the
/// result is always non-empty.
pub fn synthesize_description(
    kind: EventType,
    metrics: &Metrics,
    summary: Option<&str>,
) -> String {
    if let Some(s) = summary {
        if !s.is_empty() {
            return s.to_string();
        }
    }

    match (kind, metrics) {
        (
            EventType::Feeding,
            Metrics::Feeding {
                amount: Some(amount),
            },
        ) => {
            format!("Bottle feeding, {amount} formula")
        }
        (EventType::Feeding, _) => "Feeding time".to_string(),
        (
            EventType::Sleep,
            Metrics::Sleep {
                minutes: Some(minutes),
            },
        ) => {
            format!("Nap time, slept for {}", sleep_duration_text(*minutes))
        }
        (EventType::Sleep, _) => "Sleep time".to_string(),
        (EventType::Diaper, Metrics::Diaper { kind: Some(kind) }) => {
            format!("{kind} diaper, changed")
        }
        (EventType::Diaper, _) => "Diaper change".to_string(),
        (EventType::Milestone, _) => "New milestone".to_string(),
        (other, _) => format!("{other} event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nestling_schema::{DiaperKind, FeedingAmount};
    use serde_json::json;

    #[test]
    fn summary_always_wins() {
        let metrics = Metrics::from_raw(EventType::Feeding, Some(&json!({ "amount": 4 })));
        let desc = synthesize_description(EventType::Feeding, &metrics, Some("Big morning bottle"));
        assert_eq!(desc, "Big morning bottle");
    }

    #[test]
    fn empty_summary_is_treated_as_absent() {
        let metrics = Metrics::Feeding { amount: None };
        let desc = synthesize_description(EventType::Feeding, &metrics, Some(""));
        assert_eq!(desc, "Feeding time");
    }

    #[test]
    fn feeding_with_numeric_amount() {
        let metrics = Metrics::Feeding {
            amount: Some(FeedingAmount::Millilitres(4.0)),
        };
        let desc = synthesize_description(EventType::Feeding, &metrics, None);
        assert!(desc.contains("4"));
        assert!(desc.contains("formula"));
        assert_eq!(desc, "Bottle feeding, 4ml formula");
    }

    #[test]
    fn feeding_with_text_amount_keeps_it_verbatim() {
        let metrics = Metrics::Feeding {
            amount: Some(FeedingAmount::Text("4oz".into())),
        };
        assert_eq!(
            synthesize_description(EventType::Feeding, &metrics, None),
            "Bottle feeding, 4oz formula"
        );
    }

    #[test]
    fn sleep_duration_clauses() {
        let desc = synthesize_description(
            EventType::Sleep,
            &Metrics::Sleep { minutes: Some(80) },
            None,
        );
        assert!(desc.contains("1 hour"));
        assert!(desc.contains("20 minutes"));

        assert_eq!(
            synthesize_description(EventType::Sleep, &Metrics::Sleep { minutes: Some(45) }, None),
            "Nap time, slept for 45 minutes"
        );
        assert_eq!(
            synthesize_description(
                EventType::Sleep,
                &Metrics::Sleep {
                    minutes: Some(120)
                },
                None
            ),
            "Nap time, slept for 2 hours"
        );
        assert_eq!(
            synthesize_description(EventType::Sleep, &Metrics::Sleep { minutes: None }, None),
            "Sleep time"
        );
    }

    #[test]
    fn diaper_variants() {
        assert_eq!(
            synthesize_description(
                EventType::Diaper,
                &Metrics::Diaper {
                    kind: Some(DiaperKind::Wet)
                },
                None
            ),
            "wet diaper, changed"
        );
        assert_eq!(
            synthesize_description(EventType::Diaper, &Metrics::Diaper { kind: None }, None),
            "Diaper change"
        );
    }

    #[test]
    fn milestone_and_unrecognized_types() {
        assert_eq!(
            synthesize_description(
                EventType::Milestone,
                &Metrics::Unrecognized(serde_json::Value::Null),
                None
            ),
            "New milestone"
        );
        assert_eq!(
            synthesize_description(
                EventType::Bath,
                &Metrics::Unrecognized(serde_json::Value::Null),
                None
            ),
            "bath event"
        );
    }

    #[test]
    fn never_empty() {
        for kind in [
            EventType::Feeding,
            EventType::Sleep,
            EventType::Diaper,
            EventType::Milestone,
            EventType::Measurement,
            EventType::Bath,
            EventType::Medication,
            EventType::Activity,
            EventType::Note,
        ] {
            let metrics = Metrics::from_raw(kind, None);
            assert!(!synthesize_description(kind, &metrics, None).is_empty());
        }
    }
}
