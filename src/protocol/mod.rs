//! Wire protocol for FunASR-style recognition servers
//!
//! This module holds the data types shared by the codec, the adapter and the
//! prober, and re-exports the public surface of its submodules.
//!
//! # Session Flow
//!
//! 1. Client sends a start message (`is_speaking: true`) describing the session
//! 2. Client streams binary PCM frames
//! 3. Client sends the end message (`{"is_speaking": false}`)
//! 4. Server replies with one or more result messages
//!
//! Server variants disagree on which fields carry text and whether `is_final`
//! is ever set, so result handling goes through [`ProtocolAdapter`].

pub mod adapter;
pub mod codec;
mod transcript_aggregator;

pub use adapter::{should_complete, IsFinalSemantics, ParsedResult, ProtocolAdapter};
pub use codec::{
    coerce_bool, decode, encode_end, encode_start, parse_hotwords, DecodeError, DecodedMessage,
    ResponseMode, SentenceStamp,
};
pub use transcript_aggregator::TranscriptAggregator;

use serde::{Deserialize, Serialize};

/// Which server family is believed to sit behind an endpoint.
///
/// `Legacy` and `Modern` are hints only. Nothing on the completion path
/// trusts them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerType {
    /// Unknown, or no preference
    #[default]
    Auto,
    /// Sets `is_final` truthfully
    Legacy,
    /// Accepts vendor fields; may never set `is_final`
    Modern,
}

impl ServerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerType::Auto => "auto",
            ServerType::Legacy => "legacy",
            ServerType::Modern => "modern",
        }
    }

    /// Parse the lowercase name produced by [`ServerType::as_str`].
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "auto" | "unknown" => Some(ServerType::Auto),
            "legacy" => Some(ServerType::Legacy),
            "modern" => Some(ServerType::Modern),
            _ => None,
        }
    }
}

/// Recognition mode requested in a start message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecognitionMode {
    /// Single request/response ("offline" on the wire)
    #[serde(rename = "offline")]
    Offline,
    /// Continuous streaming ("online" on the wire)
    #[serde(rename = "online")]
    Online,
    /// Streaming drafts plus corrected finals ("2pass" on the wire)
    #[serde(rename = "2pass")]
    TwoPass,
}

impl RecognitionMode {
    /// Wire name used in the `mode` field of a start message
    pub fn as_wire(&self) -> &'static str {
        match self {
            RecognitionMode::Offline => "offline",
            RecognitionMode::Online => "online",
            RecognitionMode::TwoPass => "2pass",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        match name.trim() {
            "offline" => Some(RecognitionMode::Offline),
            "online" => Some(RecognitionMode::Online),
            "2pass" => Some(RecognitionMode::TwoPass),
            _ => None,
        }
    }

    /// Whether start messages for this mode carry chunking fields
    pub fn is_streaming(&self) -> bool {
        !matches!(self, RecognitionMode::Offline)
    }
}

/// Chunking parameters for `online` and `2pass` sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Look-ahead/current/look-behind chunk sizes in 60ms units
    pub chunk_size: [u32; 3],
    pub chunk_interval: u32,
    pub encoder_chunk_look_back: u32,
    pub decoder_chunk_look_back: u32,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: [5, 10, 5],
            chunk_interval: 10,
            encoder_chunk_look_back: 4,
            decoder_chunk_look_back: 0,
        }
    }
}

/// Everything needed to build one session's start message.
///
/// Built by the caller per session and treated as read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageProfile {
    pub server_type: ServerType,
    pub mode: RecognitionMode,
    /// Stream name echoed back by the server as `wav_name`
    pub wav_name: String,
    /// "pcm", "wav" or "others"
    pub wav_format: String,
    pub audio_fs: u32,
    pub itn: bool,
    /// JSON-encoded phrase→weight map, or "" for none
    pub hotwords: String,
    /// Force `svs_lang`/`svs_itn` even when the server type is not `Modern`
    pub send_vendor_fields: bool,
    pub svs_lang: String,
    pub svs_itn: bool,
    /// Only serialized for `online` and `2pass`
    pub chunking: ChunkConfig,
}

impl Default for MessageProfile {
    fn default() -> Self {
        Self {
            server_type: ServerType::Auto,
            mode: RecognitionMode::TwoPass,
            wav_name: "microphone".to_string(),
            wav_format: "pcm".to_string(),
            audio_fs: 16000,
            itn: true,
            hotwords: String::new(),
            send_vendor_fields: false,
            svs_lang: "auto".to_string(),
            svs_itn: true,
            chunking: ChunkConfig::default(),
        }
    }
}

impl MessageProfile {
    /// Default profile for the given mode
    pub fn for_mode(mode: RecognitionMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Whether `svs_lang`/`svs_itn` go on the wire for this profile
    pub fn includes_vendor_fields(&self) -> bool {
        self.send_vendor_fields || self.server_type == ServerType::Modern
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recognition_mode_wire_names() {
        for mode in [
            RecognitionMode::Offline,
            RecognitionMode::Online,
            RecognitionMode::TwoPass,
        ] {
            assert_eq!(RecognitionMode::from_wire(mode.as_wire()), Some(mode));
        }
        assert_eq!(RecognitionMode::from_wire("2pass-online"), None);
        assert!(!RecognitionMode::Offline.is_streaming());
        assert!(RecognitionMode::TwoPass.is_streaming());
    }

    #[test]
    fn test_server_type_names() {
        assert_eq!(ServerType::from_name("Modern"), Some(ServerType::Modern));
        assert_eq!(ServerType::from_name("unknown"), Some(ServerType::Auto));
        assert_eq!(ServerType::from_name("nope"), None);
        assert_eq!(ServerType::default(), ServerType::Auto);
    }

    #[test]
    fn test_vendor_field_gating() {
        let mut profile = MessageProfile::default();
        assert!(!profile.includes_vendor_fields());

        profile.server_type = ServerType::Modern;
        assert!(profile.includes_vendor_fields());

        profile.server_type = ServerType::Legacy;
        profile.send_vendor_fields = true;
        assert!(profile.includes_vendor_fields());
    }
}
