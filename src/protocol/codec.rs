//! Wire message codec
//!
//! Encodes start/end control messages and decodes loosely-typed result
//! messages. Pure functions, no I/O.
//!
//! Result messages are decoded into a [`DecodedMessage`] with a fixed set of
//! known fields plus an `extra` bag for everything else, so no untyped map
//! leaves this module.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Alternate text keys some two-pass servers use instead of `text`.
/// Checked in order, offline (corrected) keys first.
const TWO_PASS_OFFLINE_TEXT_KEYS: [&str; 2] = ["2pass offline text", "2pass_offline_text"];
const TWO_PASS_ONLINE_TEXT_KEYS: [&str; 2] = ["2pass online text", "2pass_online_text"];

/// Weight given to a hot word listed without one
const DEFAULT_HOTWORD_WEIGHT: i64 = 20;

/// Failure to turn inbound text into a [`DecodedMessage`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty message")]
    Empty,
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Mode string as reported by the server in a result message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResponseMode {
    Offline,
    Online,
    /// Two-pass draft; never terminal on its own
    TwoPassOnline,
    /// Two-pass corrected final
    TwoPassOffline,
    /// Anything else, kept verbatim
    Other(String),
}

impl ResponseMode {
    pub fn from_wire(name: &str) -> Self {
        match name {
            "offline" => ResponseMode::Offline,
            "online" => ResponseMode::Online,
            "2pass-online" => ResponseMode::TwoPassOnline,
            "2pass-offline" => ResponseMode::TwoPassOffline,
            other => ResponseMode::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ResponseMode::Offline => "offline",
            ResponseMode::Online => "online",
            ResponseMode::TwoPassOnline => "2pass-online",
            ResponseMode::TwoPassOffline => "2pass-offline",
            ResponseMode::Other(name) => name,
        }
    }

    /// Either two-pass sub-mode (or a bare "2pass" echo)
    pub fn is_two_pass(&self) -> bool {
        match self {
            ResponseMode::TwoPassOnline | ResponseMode::TwoPassOffline => true,
            ResponseMode::Other(name) => name.starts_with("2pass"),
            _ => false,
        }
    }
}

/// One entry of a `stamp_sents` array
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SentenceStamp {
    pub text_seg: String,
    pub punc: String,
    pub start: Option<f64>,
    pub end: Option<f64>,
}

/// A result message after decoding.
///
/// Known fields are lifted out; fields that are absent or of an unexpected
/// type are left in `extra` untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedMessage {
    pub mode: Option<ResponseMode>,
    pub wav_name: Option<String>,
    pub text: Option<String>,
    /// Coerced final flag; `None` when the server omitted it
    pub is_final: Option<bool>,
    pub timestamp: Option<Value>,
    /// One stamp per object entry of `stamp_sents`
    pub stamp_sents: Option<Vec<SentenceStamp>>,
    /// Length of the raw `stamp_sents` array, entries of any type included
    pub stamp_sents_count: usize,
    pub two_pass_offline_text: Option<String>,
    pub two_pass_online_text: Option<String>,
    pub extra: Map<String, Value>,
}

impl DecodedMessage {
    /// Final flag with "absent" read as false
    pub fn final_flag(&self) -> bool {
        self.is_final.unwrap_or(false)
    }

    pub fn mode_str(&self) -> &str {
        self.mode.as_ref().map(ResponseMode::as_str).unwrap_or("")
    }

    /// Whether `stamp_sents` was a non-empty array, whatever its entries held
    pub fn has_stamp_sents(&self) -> bool {
        self.stamp_sents_count > 0
    }
}

/// Coerce a boolean-like JSON value.
///
/// - booleans pass through
/// - numbers: zero is false, anything else true
/// - strings, case-insensitively: `true|1|yes|y|on` → true,
///   `false|0|no|n|off|""` → false, any other string → true
/// - null is false; arrays and objects are true when non-empty
pub fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => coerce_bool_str(s),
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn coerce_bool_str(s: &str) -> bool {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" => true,
        "false" | "0" | "no" | "n" | "off" | "" => false,
        _ => true,
    }
}

/// Serialize a profile into a start message.
///
/// Chunking fields appear only for streaming modes; `svs_lang`/`svs_itn` only
/// when [`MessageProfile::includes_vendor_fields`] is true.
///
/// [`MessageProfile::includes_vendor_fields`]: super::MessageProfile::includes_vendor_fields
pub fn encode_start(profile: &super::MessageProfile) -> String {
    let mut msg = Map::new();
    msg.insert("mode".into(), profile.mode.as_wire().into());
    msg.insert("wav_name".into(), profile.wav_name.as_str().into());
    msg.insert("wav_format".into(), profile.wav_format.as_str().into());
    msg.insert("audio_fs".into(), profile.audio_fs.into());
    msg.insert("is_speaking".into(), true.into());
    msg.insert("itn".into(), profile.itn.into());
    msg.insert("hotwords".into(), profile.hotwords.as_str().into());

    if profile.mode.is_streaming() {
        let chunking = &profile.chunking;
        msg.insert(
            "chunk_size".into(),
            Value::Array(chunking.chunk_size.iter().map(|&c| c.into()).collect()),
        );
        msg.insert("chunk_interval".into(), chunking.chunk_interval.into());
        msg.insert(
            "encoder_chunk_look_back".into(),
            chunking.encoder_chunk_look_back.into(),
        );
        msg.insert(
            "decoder_chunk_look_back".into(),
            chunking.decoder_chunk_look_back.into(),
        );
    }

    if profile.includes_vendor_fields() {
        msg.insert("svs_lang".into(), profile.svs_lang.as_str().into());
        msg.insert("svs_itn".into(), profile.svs_itn.into());
    }

    Value::Object(msg).to_string()
}

/// The fixed end-of-speech control message
pub fn encode_end() -> String {
    serde_json::json!({ "is_speaking": false }).to_string()
}

/// Decode an inbound text message. Never panics on malformed input.
pub fn decode(raw: &str) -> Result<DecodedMessage, DecodeError> {
    if raw.trim().is_empty() {
        return Err(DecodeError::Empty);
    }

    let value: Value =
        serde_json::from_str(raw).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

    let mut fields = match value {
        Value::Object(map) => map,
        other => return Err(DecodeError::NotAnObject(json_kind(&other))),
    };

    let mode = take_string(&mut fields, "mode").map(|m| ResponseMode::from_wire(&m));
    let wav_name = take_string(&mut fields, "wav_name");
    let text = take_string(&mut fields, "text");
    let is_final = fields.remove("is_final").map(|v| coerce_bool(&v));
    let timestamp = fields.remove("timestamp").filter(|v| !v.is_null());
    let (stamp_sents, stamp_sents_count) = match take_stamp_sents(&mut fields) {
        Some((stamps, count)) => (Some(stamps), count),
        None => (None, 0),
    };
    let two_pass_offline_text = take_first_string(&mut fields, &TWO_PASS_OFFLINE_TEXT_KEYS);
    let two_pass_online_text = take_first_string(&mut fields, &TWO_PASS_ONLINE_TEXT_KEYS);

    Ok(DecodedMessage {
        mode,
        wav_name,
        text,
        is_final,
        timestamp,
        stamp_sents,
        stamp_sents_count,
        two_pass_offline_text,
        two_pass_online_text,
        extra: fields,
    })
}

/// Convert hot-word text (`phrase [weight]` per line) into the wire payload.
///
/// Returns "" when there are no hot words.
pub fn parse_hotwords(text: &str) -> String {
    let mut words = Map::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (phrase, weight) = match line.rsplit_once(char::is_whitespace) {
            Some((phrase, weight)) => match weight.parse::<i64>() {
                Ok(w) => (phrase.trim_end(), w),
                Err(_) => (line, DEFAULT_HOTWORD_WEIGHT),
            },
            None => (line, DEFAULT_HOTWORD_WEIGHT),
        };
        words.insert(phrase.to_string(), weight.into());
    }

    if words.is_empty() {
        String::new()
    } else {
        Value::Object(words).to_string()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Remove `key` only when it holds a string
fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key) {
        Some(Value::String(_)) => match fields.remove(key) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        },
        _ => None,
    }
}

fn take_first_string(fields: &mut Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| take_string(fields, key))
}

fn take_stamp_sents(fields: &mut Map<String, Value>) -> Option<(Vec<SentenceStamp>, usize)> {
    if !matches!(fields.get("stamp_sents"), Some(Value::Array(_))) {
        return None;
    }
    let Some(Value::Array(items)) = fields.remove("stamp_sents") else {
        return None;
    };

    let count = items.len();
    let stamps = items
        .iter()
        .filter_map(Value::as_object)
        .map(read_stamp)
        .collect();

    Some((stamps, count))
}

/// Read one entry field by field; a badly typed field never drops the entry
fn read_stamp(entry: &Map<String, Value>) -> SentenceStamp {
    SentenceStamp {
        text_seg: entry
            .get("text_seg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        punc: match entry.get("punc") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(p)) => p.clone(),
            Some(other) => other.to_string(),
        },
        start: entry.get("start").and_then(loose_f64),
        end: entry.get("end").and_then(loose_f64),
    }
}

fn loose_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
