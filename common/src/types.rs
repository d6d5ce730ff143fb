use chrono::{DateTime, Duration, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Date format used on the wire by the event query API.
pub const WIRE_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// A security event as returned by the query API.
///
/// Every scalar defaults to an empty string when the API omits it or sends
/// `null`. Fields the API returns that are not modelled here are kept in
/// `extra` and written back out unchanged.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Event {
    #[serde(deserialize_with = "lenient_string")]
    pub event_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub customer_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub saas: String,
    #[serde(deserialize_with = "lenient_string")]
    pub entity_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub state: String,
    #[serde(rename = "type", deserialize_with = "lenient_string")]
    pub event_type: String,
    #[serde(deserialize_with = "lenient_string")]
    pub confidence_indicator: String,
    #[serde(deserialize_with = "lenient_string")]
    pub event_created: String,
    #[serde(deserialize_with = "lenient_string")]
    pub severity: String,
    #[serde(deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(deserialize_with = "lenient_string")]
    pub sender_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(deserialize_with = "lenient_string")]
    pub entity_link: String,
    #[serde(deserialize_with = "lenient_actions")]
    pub actions: Vec<Action>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Action {
    #[serde(deserialize_with = "lenient_string")]
    pub action_type: String,
    #[serde(deserialize_with = "lenient_string")]
    pub create_time: String,
    #[serde(deserialize_with = "lenient_string")]
    pub related_entity_id: String,
}

/// An event after enrichment. `entity_link` inside `event` may have been
/// rewritten for the active region.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct EnrichedEvent {
    #[serde(flatten)]
    pub event: Event,
    pub recipient: String,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// `null` becomes an empty list. Entries that are not action objects are
/// dropped so one bad entry does not cost the whole event.
fn lenient_actions<'de, D>(deserializer: D) -> Result<Vec<Action>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter(Value::is_object)
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect())
}

/// Half-open time range `[start, end)` queried in one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl QueryWindow {
    /// Both bounds are truncated to whole seconds, the precision of the wire format.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: truncate_to_second(start),
            end: truncate_to_second(end),
        }
    }

    pub fn ending_at(end: DateTime<Utc>, length: Duration) -> Self {
        let end = truncate_to_second(end);
        Self::new(end - length, end)
    }

    /// Parses operator-supplied bounds. Accepts RFC 3339 (`2024-01-01T00:00:00Z`,
    /// offsets allowed) or a naive `YYYY-MM-DDTHH:MM:SS` taken as UTC.
    pub fn parse(start: &str, end: &str) -> anyhow::Result<Self> {
        let window = Self::new(parse_timestamp(start)?, parse_timestamp(end)?);
        if window.start >= window.end {
            anyhow::bail!("start {} must be before end {}", start, end);
        }
        Ok(window)
    }

    pub fn start_date(&self) -> String {
        self.start.format(WIRE_DATE_FORMAT).to_string()
    }

    pub fn end_date(&self) -> String {
        self.end.format(WIRE_DATE_FORMAT).to_string()
    }

    pub fn length(&self) -> Duration {
        self.end - self.start
    }
}

impl fmt::Display for QueryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start_date(), self.end_date())
    }
}

fn truncate_to_second(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(0).unwrap_or(ts)
}

fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .map_err(|e| anyhow::anyhow!("invalid timestamp '{}': {}", raw, e))?;
    Ok(naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn missing_and_null_fields_default_to_empty() {
        let event: Event = serde_json::from_value(json!({
            "eventId": "e-1",
            "severity": null,
            "actions": null
        }))
        .unwrap();

        assert_eq!(event.event_id, "e-1");
        assert_eq!(event.severity, "");
        assert_eq!(event.customer_id, "");
        assert!(event.data.is_none());
        assert!(event.actions.is_empty());
    }

    #[test]
    fn malformed_action_entries_are_dropped() {
        let event: Event = serde_json::from_value(json!({
            "eventId": "e-4",
            "actions": [null, "quarantine", {"actionType": "restore", "createTime": 7}]
        }))
        .unwrap();

        assert_eq!(event.actions.len(), 1);
        assert_eq!(event.actions[0].action_type, "restore");
        assert_eq!(event.actions[0].create_time, "7");
    }

    #[test]
    fn non_string_scalars_keep_their_text() {
        let event: Event = serde_json::from_value(json!({
            "eventId": 42,
            "severity": 3,
            "state": true
        }))
        .unwrap();

        assert_eq!(event.event_id, "42");
        assert_eq!(event.severity, "3");
        assert_eq!(event.state, "true");
    }

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let raw = json!({
            "eventId": "e-2",
            "type": "phishing",
            "availableEventActions": [{"actionName": "quarantine"}]
        });
        let event: Event = serde_json::from_value(raw).unwrap();
        assert_eq!(event.event_type, "phishing");
        assert!(event.extra.contains_key("availableEventActions"));

        let out = serde_json::to_value(&event).unwrap();
        assert_eq!(out["type"], "phishing");
        assert_eq!(out["availableEventActions"][0]["actionName"], "quarantine");
    }

    #[test]
    fn enriched_event_serializes_flat() {
        let enriched = EnrichedEvent {
            event: Event {
                event_id: "e-3".to_string(),
                ..Default::default()
            },
            recipient: "bob@example.com".to_string(),
        };
        let out = serde_json::to_value(&enriched).unwrap();
        assert_eq!(out["eventId"], "e-3");
        assert_eq!(out["recipient"], "bob@example.com");
    }

    #[test]
    fn window_formats_wire_dates() {
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
        let window = QueryWindow::ending_at(end, Duration::minutes(5));
        assert_eq!(window.start_date(), "2024-01-01T00:00:00Z");
        assert_eq!(window.end_date(), "2024-01-01T00:05:00Z");
        assert_eq!(window.to_string(), "[2024-01-01T00:00:00Z, 2024-01-01T00:05:00Z)");
    }

    #[test]
    fn window_drops_sub_second_precision() {
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap() + Duration::milliseconds(750);
        let window = QueryWindow::ending_at(end, Duration::minutes(5));
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap());
    }

    #[test]
    fn parse_accepts_rfc3339_and_naive() {
        let window = QueryWindow::parse("2024-01-01T00:00:00Z", "2024-01-01T05:00:00").unwrap();
        assert_eq!(window.length(), Duration::hours(5));
        assert!(QueryWindow::parse("2024-01-02T00:00:00Z", "2024-01-01T00:00:00Z").is_err());
        assert!(QueryWindow::parse("yesterday", "2024-01-01T00:00:00Z").is_err());
    }
}
