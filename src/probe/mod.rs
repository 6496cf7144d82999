//! Server capability probing
//!
//! Runs short, deliberately minimal sessions against an endpoint to find out
//! which recognition modes it answers and how it uses `is_final`.
//!
//! # Stages
//!
//! ```text
//! ConnectOnly   ── open connection ──▶ close
//! OfflineLight  ── + offline start, 0.25s silence, end ──▶ wait for one reply
//! TwoPassFull   ── + NEW connection: 2pass start, 1s silence, end ──▶ wait for a 2pass reply
//! ```
//!
//! A timeout is an outcome ("undetermined"), not an error. `probe()` never
//! returns an error; connection failures are reported inside
//! [`ServerCapabilities`].

mod cache;
mod capabilities;
mod gate;
mod prober;

pub use cache::CapabilityCache;
pub use capabilities::{Capability, CapabilityDictError, ServerCapabilities};
pub use gate::{ProbeGate, ProbeTicket, ProbeToken};
pub use prober::ServerProber;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How deep a probe goes. Each level includes every check of the ones below.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ProbeLevel {
    ConnectOnly,
    #[default]
    OfflineLight,
    TwoPassFull,
}

impl ProbeLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeLevel::ConnectOnly => "connect_only",
            ProbeLevel::OfflineLight => "offline_light",
            ProbeLevel::TwoPassFull => "two_pass_full",
        }
    }

    /// Accepts the canonical names plus the short CLI spellings
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "connect_only" | "connect" => Some(ProbeLevel::ConnectOnly),
            "offline_light" | "offline" => Some(ProbeLevel::OfflineLight),
            "two_pass_full" | "2pass" | "two_pass" => Some(ProbeLevel::TwoPassFull),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProbeLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-wait bounds used inside one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTimeouts {
    /// Opening each connection
    pub connect: Duration,
    /// Waiting for the single-shot reply
    pub offline_reply: Duration,
    /// Waiting for a two-pass reply
    pub two_pass_reply: Duration,
}

impl Default for ProbeTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            offline_reply: Duration::from_secs(3),
            two_pass_reply: Duration::from_secs(5),
        }
    }
}

impl ProbeTimeouts {
    /// Sum of the waits a probe at `level` may need. An outer timeout should
    /// be at least this long.
    pub fn minimum_budget(&self, level: ProbeLevel) -> Duration {
        match level {
            ProbeLevel::ConnectOnly => self.connect,
            ProbeLevel::OfflineLight => self.connect + self.offline_reply,
            ProbeLevel::TwoPassFull => {
                self.connect * 2 + self.offline_reply + self.two_pass_reply
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_level_ordering() {
        assert!(ProbeLevel::ConnectOnly < ProbeLevel::OfflineLight);
        assert!(ProbeLevel::OfflineLight < ProbeLevel::TwoPassFull);
    }

    #[test]
    fn test_probe_level_names() {
        for level in [
            ProbeLevel::ConnectOnly,
            ProbeLevel::OfflineLight,
            ProbeLevel::TwoPassFull,
        ] {
            assert_eq!(ProbeLevel::from_name(level.as_str()), Some(level));
        }
        assert_eq!(ProbeLevel::from_name("2pass"), Some(ProbeLevel::TwoPassFull));
        assert_eq!(ProbeLevel::from_name("Offline"), Some(ProbeLevel::OfflineLight));
        assert_eq!(ProbeLevel::from_name("deep"), None);
    }

    #[test]
    fn test_minimum_budget_grows_with_level() {
        let timeouts = ProbeTimeouts::default();
        assert_eq!(
            timeouts.minimum_budget(ProbeLevel::ConnectOnly),
            Duration::from_secs(5)
        );
        assert_eq!(
            timeouts.minimum_budget(ProbeLevel::OfflineLight),
            Duration::from_secs(8)
        );
        assert_eq!(
            timeouts.minimum_budget(ProbeLevel::TwoPassFull),
            Duration::from_secs(18)
        );
    }
}
