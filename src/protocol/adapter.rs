//! Protocol adapter
//!
//! Builds control messages through the codec, normalizes inbound results into
//! [`ParsedResult`], and decides when a session's wait loop may stop.
//!
//! # Completion Rule
//!
//! Evaluated in order, first match wins:
//!
//! 1. coerced `is_final` is true
//! 2. reported mode is `offline` (even with empty text)
//! 3. reported mode is `2pass-offline` (even with empty text)
//! 4. the message carries a non-empty `stamp_sents` array
//! 5. otherwise not complete
//!
//! Some servers never set `is_final` for single-shot requests, so rule 1
//! alone would hang the client forever.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::codec::{self, DecodeError, DecodedMessage, ResponseMode, SentenceStamp};
use super::{MessageProfile, ServerType};

/// How a server uses `is_final` on single-shot answers, as observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsFinalSemantics {
    #[default]
    Unknown,
    /// Single-shot answer arrived with `is_final: true`
    LegacyTrue,
    /// Single-shot answer arrived with `is_final` false or missing
    AlwaysFalse,
}

impl IsFinalSemantics {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsFinalSemantics::Unknown => "unknown",
            IsFinalSemantics::LegacyTrue => "legacy_true",
            IsFinalSemantics::AlwaysFalse => "always_false",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "unknown" => Some(IsFinalSemantics::Unknown),
            "legacy_true" => Some(IsFinalSemantics::LegacyTrue),
            "always_false" => Some(IsFinalSemantics::AlwaysFalse),
            _ => None,
        }
    }

    /// Advisory server-type guess. Never used for completion decisions.
    pub fn inferred_server_type(&self) -> ServerType {
        match self {
            IsFinalSemantics::AlwaysFalse => ServerType::Modern,
            IsFinalSemantics::LegacyTrue => ServerType::Legacy,
            IsFinalSemantics::Unknown => ServerType::Auto,
        }
    }
}

/// One inbound message, normalized
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResult {
    /// Recognized text, possibly empty
    pub text: String,
    /// Mode as reported by the server ("" when absent)
    pub mode: String,
    pub wav_name: String,
    /// Raw final flag, coerced
    pub is_final: bool,
    /// The adapter's decision, see [`should_complete`]
    pub is_complete: bool,
    pub timestamp: Option<Value>,
    pub stamp_sents: Option<Vec<SentenceStamp>>,
    /// The decoded message, or why decoding failed
    pub message: Result<DecodedMessage, DecodeError>,
}

impl ParsedResult {
    fn from_decode_error(err: DecodeError) -> Self {
        Self {
            text: String::new(),
            mode: String::new(),
            wav_name: String::new(),
            is_final: false,
            is_complete: false,
            timestamp: None,
            stamp_sents: None,
            message: Err(err),
        }
    }

    pub fn decoded(&self) -> Option<&DecodedMessage> {
        self.message.as_ref().ok()
    }

    pub fn decode_error(&self) -> Option<&DecodeError> {
        self.message.as_ref().err()
    }

    pub fn response_mode(&self) -> Option<&ResponseMode> {
        self.decoded().and_then(|m| m.mode.as_ref())
    }

    pub fn has_timestamp(&self) -> bool {
        self.timestamp.is_some()
    }

    /// Same rule as [`DecodedMessage::has_stamp_sents`]
    pub fn has_stamp_sents(&self) -> bool {
        self.decoded().is_some_and(DecodedMessage::has_stamp_sents)
    }
}

/// Extract recognized text using the fixed priority order:
/// `text`, then joined `stamp_sents[].text_seg`, then the two-pass
/// alternate keys. Falls back to "".
pub fn extract_text(msg: &DecodedMessage) -> String {
    if let Some(text) = msg.text.as_deref().filter(|t| !t.is_empty()) {
        return text.to_string();
    }

    if let Some(stamps) = msg.stamp_sents.as_deref() {
        let joined: String = stamps.iter().map(|s| s.text_seg.as_str()).collect();
        if !joined.is_empty() {
            return joined;
        }
    }

    [&msg.two_pass_offline_text, &msg.two_pass_online_text]
        .into_iter()
        .flatten()
        .find(|t| !t.is_empty())
        .cloned()
        .unwrap_or_default()
}

/// Decide whether this message ends the session's wait loop
pub fn should_complete(msg: &DecodedMessage) -> bool {
    if msg.final_flag() {
        return true;
    }

    match msg.mode {
        Some(ResponseMode::Offline) | Some(ResponseMode::TwoPassOffline) => true,
        _ => msg.has_stamp_sents(),
    }
}

/// Per-session protocol adapter.
///
/// Holds a server-type hint and the passive `is_final` observation. Not meant
/// to be shared between concurrent sessions.
#[derive(Debug, Clone, Default)]
pub struct ProtocolAdapter {
    server_type: ServerType,
    is_final_semantics: IsFinalSemantics,
}

impl ProtocolAdapter {
    pub fn new(server_type: ServerType) -> Self {
        Self {
            server_type,
            is_final_semantics: IsFinalSemantics::Unknown,
        }
    }

    pub fn server_type(&self) -> ServerType {
        self.server_type
    }

    /// Replace the hint. Only affects start messages built afterwards.
    pub fn update_server_type(&mut self, server_type: ServerType) {
        if self.server_type != server_type {
            log::info!(
                "ProtocolAdapter: server type hint {} -> {}",
                self.server_type.as_str(),
                server_type.as_str()
            );
        }
        self.server_type = server_type;
    }

    /// Build the start message. A profile with no hint of its own inherits the
    /// adapter's hint for vendor-field gating.
    pub fn build_start_message(&self, profile: &MessageProfile) -> String {
        if profile.server_type == ServerType::Auto && self.server_type != ServerType::Auto {
            let hinted = MessageProfile {
                server_type: self.server_type,
                ..profile.clone()
            };
            return codec::encode_start(&hinted);
        }
        codec::encode_start(profile)
    }

    pub fn build_end_message(&self) -> String {
        codec::encode_end()
    }

    /// Decode and normalize one inbound message. Decode failures are returned
    /// as data, never as an error.
    pub fn parse_result(&self, raw: &str) -> ParsedResult {
        let msg = match codec::decode(raw) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("ProtocolAdapter: failed to decode message: {}", e);
                return ParsedResult::from_decode_error(e);
            }
        };

        let text = extract_text(&msg);
        let is_complete = should_complete(&msg);

        ParsedResult {
            text,
            mode: msg.mode_str().to_string(),
            wav_name: msg.wav_name.clone().unwrap_or_default(),
            is_final: msg.final_flag(),
            is_complete,
            timestamp: msg.timestamp.clone(),
            stamp_sents: msg.stamp_sents.clone(),
            message: Ok(msg),
        }
    }

    pub fn should_complete(&self, msg: &DecodedMessage) -> bool {
        should_complete(msg)
    }

    /// Record how a single-shot answer used `is_final`.
    ///
    /// Ignores non-offline modes. The first observation sticks; later ones
    /// are only logged.
    pub fn record_is_final_semantics(&mut self, is_final: bool, mode: &ResponseMode) {
        if *mode != ResponseMode::Offline {
            return;
        }

        let observed = if is_final {
            IsFinalSemantics::LegacyTrue
        } else {
            IsFinalSemantics::AlwaysFalse
        };

        match self.is_final_semantics {
            IsFinalSemantics::Unknown => {
                log::debug!("ProtocolAdapter: is_final semantics = {}", observed.as_str());
                self.is_final_semantics = observed;
            }
            current if current != observed => {
                log::warn!(
                    "ProtocolAdapter: conflicting is_final observation ({} vs recorded {}), keeping recorded",
                    observed.as_str(),
                    current.as_str()
                );
            }
            _ => {}
        }
    }

    pub fn get_is_final_semantics(&self) -> IsFinalSemantics {
        self.is_final_semantics
    }
}
