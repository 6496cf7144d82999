//! Client-side compatibility layer for FunASR-style streaming speech
//! recognition servers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  start/audio/end   ┌───────────┐   text frames   ┌──────────────┐
//! │ Protocol │ ─────────────────▶ │ Transport │ ◀─────────────▶ │ ASR server   │
//! │ Adapter  │ ◀── ParsedResult ─ │ (ws/wss)  │                 └──────────────┘
//! └──────────┘                    └───────────┘
//!       ▲                               ▲
//!       │ server type hint              │ fresh connection per stage
//! ┌──────────────┐                      │
//! │ ServerProber │ ─────────────────────┘
//! └──────────────┘
//! ```
//!
//! Completion of a session never depends on the server type hint: see
//! [`protocol::should_complete`].

pub mod probe;
pub mod protocol;
pub mod settings;
pub mod transport;

pub use probe::{
    Capability, CapabilityCache, ProbeGate, ProbeLevel, ProbeTimeouts, ServerCapabilities,
    ServerProber,
};
pub use protocol::{
    IsFinalSemantics, MessageProfile, ParsedResult, ProtocolAdapter, RecognitionMode,
    ServerType, TranscriptAggregator,
};
pub use settings::{load_settings, save_settings, ClientSettings, SettingsError};
pub use transport::{ConnectError, ConnectErrorKind, Connector, Endpoint, WsConnector};
