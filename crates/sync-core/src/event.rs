//! Change event model.
//!
//! A [`ChangeEvent`] is built once from a decoded audit row, either read
//! through the historic cursor or received from a notification, and is
//! consumed exactly once by the flush engine.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Errors raised while turning a decoded row into a [`ChangeEvent`].
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The payload was not a JSON object
    #[error("Change payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// The primary key column is absent or null
    #[error("Missing primary key column '{0}'")]
    MissingKey(String),

    /// The primary key column holds something other than an integer
    #[error("Primary key column '{column}' is not an integer: {value}")]
    InvalidKey { column: String, value: Value },

    /// The timestamp column is absent or could not be parsed
    #[error("Timestamp column '{column}' is missing or unparseable: {value}")]
    InvalidTimestamp { column: String, value: Value },
}

/// Column names used to pull the identifying fields out of an audit row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventColumns {
    /// Primary key column, used as the document identity
    pub key_column: String,
    /// Timestamp column, used to sort documents when resolving the watermark
    pub timestamp_column: String,
    /// Column the backlog scan orders by
    pub ordering_column: String,
    /// Column naming the audited table the row belongs to
    pub stream_column: String,
    /// Stream name used when the stream column is absent
    pub default_stream: String,
}

impl Default for EventColumns {
    fn default() -> Self {
        Self {
            key_column: "event_id".to_string(),
            timestamp_column: "action_timestamp".to_string(),
            ordering_column: "event_id".to_string(),
            stream_column: "table_name".to_string(),
            default_stream: "logged_actions".to_string(),
        }
    }
}

/// One captured audit row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    stream_name: String,
    primary_key: i64,
    ordering_key: Value,
    timestamp: DateTime<Utc>,
    attributes: Map<String, Value>,
}

impl ChangeEvent {
    /// Build an event from a decoded row.
    pub fn from_attributes(
        attributes: Map<String, Value>,
        columns: &EventColumns,
    ) -> Result<Self, EventError> {
        let primary_key = match attributes.get(&columns.key_column) {
            None | Some(Value::Null) => {
                return Err(EventError::MissingKey(columns.key_column.clone()))
            }
            Some(value) => key_from_value(value).ok_or_else(|| EventError::InvalidKey {
                column: columns.key_column.clone(),
                value: value.clone(),
            })?,
        };

        let raw_timestamp = attributes
            .get(&columns.timestamp_column)
            .cloned()
            .unwrap_or(Value::Null);
        let timestamp =
            parse_timestamp(&raw_timestamp).ok_or_else(|| EventError::InvalidTimestamp {
                column: columns.timestamp_column.clone(),
                value: raw_timestamp.clone(),
            })?;

        let stream_name = attributes
            .get(&columns.stream_column)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(columns.default_stream.as_str())
            .to_string();

        let ordering_key = attributes
            .get(&columns.ordering_column)
            .cloned()
            .unwrap_or(Value::Null);

        Ok(Self {
            stream_name,
            primary_key,
            ordering_key,
            timestamp,
            attributes,
        })
    }

    /// Build an event from a JSON notification payload.
    pub fn from_json(value: Value, columns: &EventColumns) -> Result<Self, EventError> {
        match value {
            Value::Object(map) => Self::from_attributes(map, columns),
            Value::Null => Err(EventError::NotAnObject("null")),
            Value::Bool(_) => Err(EventError::NotAnObject("a boolean")),
            Value::Number(_) => Err(EventError::NotAnObject("a number")),
            Value::String(_) => Err(EventError::NotAnObject("a string")),
            Value::Array(_) => Err(EventError::NotAnObject("an array")),
        }
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn primary_key(&self) -> i64 {
        self.primary_key
    }

    pub fn ordering_key(&self) -> &Value {
        &self.ordering_key
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// The document body written to the destination.
    ///
    /// When a label is given it is stamped onto the body, overriding any
    /// attribute of the same name.
    pub fn to_document(&self, label: Option<(&str, &str)>) -> Value {
        let mut body = self.attributes.clone();
        if let Some((name, value)) = label {
            body.insert(name.to_string(), Value::String(value.to_string()));
        }
        Value::Object(body)
    }
}

/// Read a primary key out of a JSON value.
///
/// Integers are accepted as numbers or as numeric strings, since bigint
/// columns are rendered as strings by some JSON encoders.
pub fn key_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse the timestamp formats PostgreSQL emits for `timestamptz`,
/// `timestamp` and `date` columns once rendered as JSON text.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let text = value.as_str()?.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    // `row_to_json` keeps the server offset as "+00" without minutes
    for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(ts) = DateTime::parse_from_str(text, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Some(ts.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn row(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_event_from_audit_row() {
        let columns = EventColumns::default();
        let event = ChangeEvent::from_attributes(
            row(json!({
                "event_id": 42,
                "table_name": "users",
                "action": "I",
                "action_timestamp": "2024-03-01T10:15:00+00:00"
            })),
            &columns,
        )
        .unwrap();

        assert_eq!(event.primary_key(), 42);
        assert_eq!(event.stream_name(), "users");
        assert_eq!(event.ordering_key(), &json!(42));
        assert_eq!(
            event.timestamp(),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap()
        );
        assert_eq!(event.attributes().len(), 4);
    }

    #[test]
    fn test_attribute_order_is_preserved() {
        let columns = EventColumns::default();
        let event = ChangeEvent::from_attributes(
            row(json!({
                "zeta": 1,
                "event_id": 7,
                "alpha": 2,
                "action_timestamp": "2024-03-01T10:15:00Z"
            })),
            &columns,
        )
        .unwrap();

        let keys: Vec<&str> = event.attributes().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zeta", "event_id", "alpha", "action_timestamp"]);
    }

    #[test]
    fn test_string_key_is_accepted() {
        let columns = EventColumns::default();
        let event = ChangeEvent::from_attributes(
            row(json!({"event_id": "9000000000", "action_timestamp": "2024-03-01"})),
            &columns,
        )
        .unwrap();
        assert_eq!(event.primary_key(), 9_000_000_000);
    }

    #[test]
    fn test_missing_stream_falls_back_to_default() {
        let columns = EventColumns {
            default_stream: "logged_actions".to_string(),
            ..EventColumns::default()
        };
        let event = ChangeEvent::from_attributes(
            row(json!({"event_id": 1, "action_timestamp": "2024-03-01T00:00:00Z"})),
            &columns,
        )
        .unwrap();
        assert_eq!(event.stream_name(), "logged_actions");
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let columns = EventColumns::default();
        let err = ChangeEvent::from_attributes(
            row(json!({"action_timestamp": "2024-03-01T00:00:00Z"})),
            &columns,
        )
        .unwrap_err();
        assert!(matches!(err, EventError::MissingKey(_)));
    }

    #[test]
    fn test_non_integer_key_is_rejected() {
        let columns = EventColumns::default();
        let err = ChangeEvent::from_attributes(
            row(json!({"event_id": "abc", "action_timestamp": "2024-03-01T00:00:00Z"})),
            &columns,
        )
        .unwrap_err();
        assert!(matches!(err, EventError::InvalidKey { .. }));
    }

    #[test]
    fn test_bad_timestamp_is_rejected() {
        let columns = EventColumns::default();
        let err = ChangeEvent::from_attributes(
            row(json!({"event_id": 1, "action_timestamp": "yesterday"})),
            &columns,
        )
        .unwrap_err();
        assert!(matches!(err, EventError::InvalidTimestamp { .. }));
    }

    #[test]
    fn test_from_json_rejects_non_objects() {
        let columns = EventColumns::default();
        assert!(matches!(
            ChangeEvent::from_json(json!([1, 2]), &columns),
            Err(EventError::NotAnObject("an array"))
        ));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap();
        assert_eq!(
            parse_timestamp(&json!("2024-03-01T10:15:00+00:00")),
            Some(expected)
        );
        assert_eq!(
            parse_timestamp(&json!("2024-03-01 12:15:00+02")),
            Some(expected)
        );
        assert_eq!(
            parse_timestamp(&json!("2024-03-01T10:15:00")),
            Some(expected)
        );
        assert_eq!(
            parse_timestamp(&json!("2024-03-01 10:15:00.000")),
            Some(expected)
        );
        assert_eq!(parse_timestamp(&json!(12345)), None);
    }

    #[test]
    fn test_document_label_stamping() {
        let columns = EventColumns::default();
        let event = ChangeEvent::from_attributes(
            row(json!({"event_id": 1, "action_timestamp": "2024-03-01T00:00:00Z"})),
            &columns,
        )
        .unwrap();

        let doc = event.to_document(Some(("source", "billing")));
        assert_eq!(doc["source"], json!("billing"));
        assert_eq!(doc["event_id"], json!(1));

        let plain = event.to_document(None);
        assert!(plain.get("source").is_none());
    }
}
