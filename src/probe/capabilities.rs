//! Capability report produced by a probe

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use super::ProbeLevel;
use crate::protocol::{coerce_bool, IsFinalSemantics, ServerType};
use crate::transport::ConnectErrorKind;

/// Tri-state capability. `Undetermined` is not the same as `Unsupported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Unsupported,
    Supported,
    #[default]
    Undetermined,
}

impl Capability {
    pub fn as_option(&self) -> Option<bool> {
        match self {
            Capability::Unsupported => Some(false),
            Capability::Supported => Some(true),
            Capability::Undetermined => None,
        }
    }

    pub fn from_option(value: Option<bool>) -> Self {
        match value {
            Some(true) => Capability::Supported,
            Some(false) => Capability::Unsupported,
            None => Capability::Undetermined,
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Capability::Supported)
    }

    /// Wording for display. Undetermined is never shown as a failure.
    pub fn describe(&self) -> &'static str {
        match self {
            Capability::Supported => "supported",
            Capability::Unsupported => "not supported",
            Capability::Undetermined => "not determined - proceed and verify",
        }
    }

    fn to_value(self) -> Value {
        match self.as_option() {
            Some(b) => Value::Bool(b),
            None => Value::Null,
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Capability::Undetermined),
            Value::String(s) => match s.as_str() {
                "supported" => Some(Capability::Supported),
                "unsupported" => Some(Capability::Unsupported),
                "undetermined" => Some(Capability::Undetermined),
                other => Some(Capability::from_option(Some(coerce_bool(&Value::from(other))))),
            },
            Value::Bool(_) | Value::Number(_) => {
                Some(Capability::from_option(Some(coerce_bool(value))))
            }
            _ => None,
        }
    }
}

/// A dictionary that cannot be turned back into [`ServerCapabilities`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityDictError {
    #[error("field '{field}' has an invalid value: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Everything one `probe()` call found out
#[derive(Debug, Clone, PartialEq)]
pub struct ServerCapabilities {
    /// A connection could be opened
    pub reachable: bool,
    /// A reply arrived within the single-shot wait
    pub responsive: bool,
    pub supports_offline: Capability,
    pub supports_online: Capability,
    pub supports_two_pass: Capability,
    /// Replies carry element-level `timestamp`
    pub has_timestamp: bool,
    /// Replies carry segment-level `stamp_sents`
    pub has_stamp_sents: bool,
    pub is_final_semantics: IsFinalSemantics,
    /// Advisory guess derived from `is_final_semantics`
    pub server_type: ServerType,
    /// Deepest stage actually executed
    pub probe_level: ProbeLevel,
    pub notes: Vec<String>,
    pub elapsed: Duration,
    /// Human-readable connection failure, if any
    pub error: Option<String>,
    pub error_kind: Option<ConnectErrorKind>,
    pub probed_at: DateTime<Utc>,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            reachable: false,
            responsive: false,
            supports_offline: Capability::Undetermined,
            supports_online: Capability::Undetermined,
            supports_two_pass: Capability::Undetermined,
            has_timestamp: false,
            has_stamp_sents: false,
            is_final_semantics: IsFinalSemantics::Unknown,
            server_type: ServerType::Auto,
            probe_level: ProbeLevel::ConnectOnly,
            notes: Vec::new(),
            elapsed: Duration::ZERO,
            error: None,
            error_kind: None,
            probed_at: Utc::now(),
        }
    }
}

impl ServerCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_note(&mut self, note: impl Into<String>) {
        let note = note.into();
        log::debug!("Prober: note: {}", note);
        self.notes.push(note);
    }

    /// Plain key/value form for caching
    pub fn to_dict(&self) -> Map<String, Value> {
        let mut dict = Map::new();
        dict.insert("reachable".into(), self.reachable.into());
        dict.insert("responsive".into(), self.responsive.into());
        dict.insert("supports_offline".into(), self.supports_offline.to_value());
        dict.insert("supports_online".into(), self.supports_online.to_value());
        dict.insert("supports_two_pass".into(), self.supports_two_pass.to_value());
        dict.insert("has_timestamp".into(), self.has_timestamp.into());
        dict.insert("has_stamp_sents".into(), self.has_stamp_sents.into());
        dict.insert(
            "is_final_semantics".into(),
            self.is_final_semantics.as_str().into(),
        );
        dict.insert("server_type".into(), self.server_type.as_str().into());
        dict.insert("probe_level".into(), self.probe_level.as_str().into());
        dict.insert(
            "notes".into(),
            Value::Array(self.notes.iter().map(|n| Value::from(n.as_str())).collect()),
        );
        let elapsed_nanos = u64::try_from(self.elapsed.as_nanos()).unwrap_or(u64::MAX);
        dict.insert("elapsed_nanos".into(), elapsed_nanos.into());
        dict.insert(
            "error".into(),
            self.error.as_deref().map(Value::from).unwrap_or(Value::Null),
        );
        dict.insert(
            "error_kind".into(),
            self.error_kind
                .map(|k| Value::from(k.as_str()))
                .unwrap_or(Value::Null),
        );
        dict.insert(
            "probed_at".into(),
            self.probed_at
                .to_rfc3339_opts(SecondsFormat::AutoSi, true)
                .into(),
        );
        dict
    }

    /// Rebuild from [`ServerCapabilities::to_dict`] output.
    ///
    /// Missing keys fall back to defaults so older cache entries still load;
    /// present keys with unusable values are an error.
    pub fn from_dict(dict: &Map<String, Value>) -> Result<Self, CapabilityDictError> {
        let defaults = Self::default();

        Ok(Self {
            reachable: read_bool(dict, "reachable")?.unwrap_or(defaults.reachable),
            responsive: read_bool(dict, "responsive")?.unwrap_or(defaults.responsive),
            supports_offline: read_capability(dict, "supports_offline")?,
            supports_online: read_capability(dict, "supports_online")?,
            supports_two_pass: read_capability(dict, "supports_two_pass")?,
            has_timestamp: read_bool(dict, "has_timestamp")?.unwrap_or(false),
            has_stamp_sents: read_bool(dict, "has_stamp_sents")?.unwrap_or(false),
            is_final_semantics: read_named(dict, "is_final_semantics", IsFinalSemantics::from_name)?
                .unwrap_or_default(),
            server_type: read_named(dict, "server_type", ServerType::from_name)?
                .unwrap_or_default(),
            probe_level: read_named(dict, "probe_level", ProbeLevel::from_name)?
                .unwrap_or(defaults.probe_level),
            notes: read_notes(dict)?,
            elapsed: match dict.get("elapsed_nanos") {
                None | Some(Value::Null) => Duration::ZERO,
                Some(value) => value
                    .as_u64()
                    .map(Duration::from_nanos)
                    .ok_or_else(|| invalid("elapsed_nanos", value))?,
            },
            error: match dict.get("error") {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) => Some(s.clone()),
                Some(value) => return Err(invalid("error", value)),
            },
            error_kind: read_named(dict, "error_kind", ConnectErrorKind::from_name)?,
            probed_at: match dict.get("probed_at") {
                None | Some(Value::Null) => defaults.probed_at,
                Some(value) => value
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok_or_else(|| invalid("probed_at", value))?,
            },
        })
    }
}

fn invalid(field: &'static str, value: &Value) -> CapabilityDictError {
    CapabilityDictError::InvalidField {
        field,
        value: value.to_string(),
    }
}

fn read_bool(dict: &Map<String, Value>, field: &'static str) -> Result<Option<bool>, CapabilityDictError> {
    match dict.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value @ (Value::Bool(_) | Value::Number(_) | Value::String(_))) => {
            Ok(Some(coerce_bool(value)))
        }
        Some(value) => Err(invalid(field, value)),
    }
}

fn read_capability(
    dict: &Map<String, Value>,
    field: &'static str,
) -> Result<Capability, CapabilityDictError> {
    match dict.get(field) {
        None => Ok(Capability::Undetermined),
        Some(value) => Capability::from_value(value).ok_or_else(|| invalid(field, value)),
    }
}

fn read_named<T>(
    dict: &Map<String, Value>,
    field: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, CapabilityDictError> {
    match dict.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_str()
            .and_then(&parse)
            .map(Some)
            .ok_or_else(|| invalid(field, value)),
    }
}

fn read_notes(dict: &Map<String, Value>) -> Result<Vec<String>, CapabilityDictError> {
    match dict.get("notes") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid("notes", item))
            })
            .collect(),
        Some(value) => Err(invalid("notes", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn fully_populated() -> ServerCapabilities {
        ServerCapabilities {
            reachable: true,
            responsive: true,
            supports_offline: Capability::Supported,
            supports_online: Capability::Supported,
            supports_two_pass: Capability::Unsupported,
            has_timestamp: true,
            has_stamp_sents: true,
            is_final_semantics: IsFinalSemantics::AlwaysFalse,
            server_type: ServerType::Modern,
            probe_level: ProbeLevel::TwoPassFull,
            notes: vec!["first".to_string(), "second, with \"quotes\"".to_string()],
            elapsed: Duration::new(3, 141_592_653),
            error: Some("Connection refused: nope".to_string()),
            error_kind: Some(ConnectErrorKind::Refused),
            probed_at: Utc.with_ymd_and_hms(2026, 10, 16, 8, 30, 0).unwrap()
                + chrono::Duration::nanoseconds(123_456_789),
        }
    }

    #[test]
    fn test_round_trip_fully_populated() {
        let caps = fully_populated();
        let restored = ServerCapabilities::from_dict(&caps.to_dict()).unwrap();
        assert_eq!(restored, caps);
    }

    #[test]
    fn test_round_trip_all_undetermined() {
        let caps = ServerCapabilities::new();
        let restored = ServerCapabilities::from_dict(&caps.to_dict()).unwrap();
        assert_eq!(restored, caps);
        assert_eq!(restored.supports_offline, Capability::Undetermined);
        assert_eq!(restored.supports_online, Capability::Undetermined);
        assert_eq!(restored.supports_two_pass, Capability::Undetermined);
    }

    #[test]
    fn test_round_trip_through_json_text() {
        let caps = fully_populated();
        let text = Value::Object(caps.to_dict()).to_string();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        let restored = ServerCapabilities::from_dict(parsed.as_object().unwrap()).unwrap();
        assert_eq!(restored, caps);
    }

    #[test]
    fn test_tri_state_serialization() {
        let mut caps = ServerCapabilities::new();
        caps.supports_offline = Capability::Supported;
        caps.supports_online = Capability::Unsupported;
        let dict = caps.to_dict();
        assert_eq!(dict["supports_offline"], json!(true));
        assert_eq!(dict["supports_online"], json!(false));
        assert_eq!(dict["supports_two_pass"], Value::Null);
    }

    #[test]
    fn test_from_dict_tolerates_missing_and_loose_values() {
        let dict = json!({
            "reachable": "yes",
            "supports_offline": "supported",
            "supports_two_pass": 0
        });
        let caps = ServerCapabilities::from_dict(dict.as_object().unwrap()).unwrap();
        assert!(caps.reachable);
        assert!(!caps.responsive);
        assert_eq!(caps.supports_offline, Capability::Supported);
        assert_eq!(caps.supports_online, Capability::Undetermined);
        assert_eq!(caps.supports_two_pass, Capability::Unsupported);
        assert!(caps.notes.is_empty());
    }

    #[test]
    fn test_from_dict_rejects_invalid_fields() {
        let dict = json!({"server_type": "quantum"});
        let err = ServerCapabilities::from_dict(dict.as_object().unwrap()).unwrap_err();
        assert!(matches!(
            err,
            CapabilityDictError::InvalidField { field: "server_type", .. }
        ));

        let dict = json!({"notes": [1, 2]});
        assert!(ServerCapabilities::from_dict(dict.as_object().unwrap()).is_err());

        let dict = json!({"elapsed_nanos": -5});
        assert!(ServerCapabilities::from_dict(dict.as_object().unwrap()).is_err());

        let dict = json!({"probed_at": "yesterday"});
        assert!(ServerCapabilities::from_dict(dict.as_object().unwrap()).is_err());
    }

    #[test]
    fn test_capability_describe() {
        assert_eq!(Capability::Supported.describe(), "supported");
        assert!(Capability::Undetermined.describe().contains("verify"));
        assert_eq!(Capability::default(), Capability::Undetermined);
        assert_eq!(Capability::from_option(None).as_option(), None);
    }
}
