//! Staged capability prober
//!
//! # Probe Flow
//!
//! 1. Stage 0: open a connection (always)
//! 2. Stage 1: offline start + 0.25s silence + end, wait for one reply
//! 3. Stage 2: on a second connection, 2pass start + 1s silence + end,
//!    wait for a two-pass reply
//! 4. Infer an advisory server type from how `is_final` was used
//!
//! Stage 2 never reuses the Stage 1 connection: per-connection negotiation
//! state must not leak between stages.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use super::{Capability, ProbeLevel, ProbeTimeouts, ServerCapabilities};
use crate::protocol::{
    MessageProfile, ParsedResult, ProtocolAdapter, RecognitionMode, ResponseMode, ServerType,
};
use crate::transport::{
    ConnectError, ConnectErrorKind, Connection, Connector, Endpoint, TransportError, WireMessage,
};

/// Sample rate of the probe audio
const PROBE_SAMPLE_RATE: u32 = 16000;

/// Silence sent in Stage 1
const OFFLINE_SILENCE: Duration = Duration::from_millis(250);

/// Silence sent in Stage 2
const TWO_PASS_SILENCE: Duration = Duration::from_secs(1);

/// Stream names that mark probe sessions in server logs
const OFFLINE_PROBE_NAME: &str = "__probe_offline__";
const TWO_PASS_PROBE_NAME: &str = "__probe_2pass__";

/// 16-bit little-endian PCM zeros
fn silence(sample_rate: u32, duration: Duration) -> Vec<u8> {
    let samples = (u128::from(sample_rate) * duration.as_millis() / 1000) as usize;
    vec![0u8; samples * 2]
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

enum Outcome {
    Finished,
    TimedOut,
    Cancelled,
}

/// Probes one endpoint. Every call opens fresh connections.
pub struct ServerProber {
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    timeouts: ProbeTimeouts,
    server_type: ServerType,
    /// Adapter used by the last completed probe
    adapter: ProtocolAdapter,
}

impl ServerProber {
    pub fn new(endpoint: Endpoint, connector: Arc<dyn Connector>) -> Self {
        Self {
            endpoint,
            connector,
            timeouts: ProbeTimeouts::default(),
            server_type: ServerType::Auto,
            adapter: ProtocolAdapter::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: ProbeTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Hint used for the probe's own start messages
    pub fn with_server_type(mut self, server_type: ServerType) -> Self {
        self.server_type = server_type;
        self.adapter = ProtocolAdapter::new(server_type);
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn timeouts(&self) -> &ProbeTimeouts {
        &self.timeouts
    }

    /// Adapter left behind by the last probe, hint already updated
    pub fn adapter(&self) -> &ProtocolAdapter {
        &self.adapter
    }

    /// Run a probe bounded by `overall`. Never fails; problems are reported
    /// in the returned capabilities.
    pub async fn probe(&mut self, level: ProbeLevel, overall: Duration) -> ServerCapabilities {
        self.probe_with_cancel(level, overall, &CancellationToken::new())
            .await
    }

    /// Like [`ServerProber::probe`], but stops early with a partial report when
    /// `cancel` fires.
    pub async fn probe_with_cancel(
        &mut self,
        level: ProbeLevel,
        overall: Duration,
        cancel: &CancellationToken,
    ) -> ServerCapabilities {
        let started = Instant::now();
        let deadline = started + overall;
        let mut caps = ServerCapabilities::new();
        let mut adapter = ProtocolAdapter::new(self.server_type);

        log::info!(
            "Prober: probing {} at level {} (timeout {:?})",
            self.endpoint,
            level,
            overall
        );

        let budget = self.timeouts.minimum_budget(level);
        if overall < budget {
            log::warn!(
                "Prober: timeout {:?} is below the {:?} needed for level {}",
                overall,
                budget,
                level
            );
            caps.add_note(format!(
                "Overall timeout {:?} is shorter than the {:?} level {} may need",
                overall, budget, level
            ));
        }

        let outcome = tokio::select! {
            _ = self.run_stages(level, deadline, &mut caps, &mut adapter) => Outcome::Finished,
            _ = sleep_until(deadline) => Outcome::TimedOut,
            _ = cancel.cancelled() => Outcome::Cancelled,
        };

        match outcome {
            Outcome::Finished => {}
            Outcome::TimedOut => {
                log::warn!("Prober: {} timed out after {:?}", self.endpoint, overall);
                if !caps.reachable && caps.error.is_none() {
                    caps.error = Some(format!(
                        "{}: no connection within {:?}",
                        ConnectErrorKind::TimedOut,
                        overall
                    ));
                    caps.error_kind = Some(ConnectErrorKind::TimedOut);
                }
                caps.add_note(format!(
                    "Probe timed out after {:?}; results are partial",
                    overall
                ));
            }
            Outcome::Cancelled => {
                log::info!("Prober: probe of {} cancelled", self.endpoint);
                caps.add_note("Probe cancelled; results are partial");
            }
        }

        caps.is_final_semantics = adapter.get_is_final_semantics();
        caps.server_type = caps.is_final_semantics.inferred_server_type();
        if caps.server_type != ServerType::Auto {
            adapter.update_server_type(caps.server_type);
        }
        self.adapter = adapter;
        caps.elapsed = started.elapsed();

        log::info!(
            "Prober: {} reachable={} responsive={} offline={:?} online={:?} 2pass={:?} server_type={} in {:?}",
            self.endpoint,
            caps.reachable,
            caps.responsive,
            caps.supports_offline,
            caps.supports_online,
            caps.supports_two_pass,
            caps.server_type.as_str(),
            caps.elapsed
        );

        caps
    }

    async fn run_stages(
        &self,
        level: ProbeLevel,
        deadline: Instant,
        caps: &mut ServerCapabilities,
        adapter: &mut ProtocolAdapter,
    ) {
        // Stage 0
        let mut conn = match self.open(deadline).await {
            Ok(conn) => conn,
            Err(e) => {
                log::warn!("Prober: cannot connect to {}: {}", self.endpoint, e);
                caps.reachable = false;
                caps.error = Some(e.to_string());
                caps.error_kind = Some(e.kind);
                return;
            }
        };
        caps.reachable = true;
        caps.probe_level = ProbeLevel::ConnectOnly;

        if level == ProbeLevel::ConnectOnly {
            conn.close().await;
            return;
        }

        // Stage 1
        caps.probe_level = ProbeLevel::OfflineLight;
        let responsive = self
            .offline_stage(conn.as_mut(), deadline, caps, adapter)
            .await;
        conn.close().await;
        drop(conn);

        if level < ProbeLevel::TwoPassFull {
            return;
        }
        if !responsive {
            caps.add_note("Two-pass check skipped because the single-shot probe got no reply");
            return;
        }

        // Stage 2, on a fresh connection
        let mut conn = match self.open(deadline).await {
            Ok(conn) => conn,
            Err(e) => {
                caps.add_note(format!(
                    "Two-pass check could not open a second connection: {}",
                    e
                ));
                return;
            }
        };
        caps.probe_level = ProbeLevel::TwoPassFull;
        self.two_pass_stage(conn.as_mut(), deadline, caps, adapter)
            .await;
        conn.close().await;
    }

    async fn open(&self, deadline: Instant) -> Result<Box<dyn Connection>, ConnectError> {
        let wait = self.timeouts.connect.min(remaining(deadline));
        timeout(wait, self.connector.connect(&self.endpoint))
            .await
            .map_err(|_| {
                ConnectError::new(
                    ConnectErrorKind::TimedOut,
                    format!("no connection to {} within {:?}", self.endpoint, wait),
                )
            })?
    }

    async fn send_session(
        conn: &mut dyn Connection,
        start: String,
        audio: Vec<u8>,
        end: String,
    ) -> Result<(), TransportError> {
        conn.send(WireMessage::Text(start)).await?;
        conn.send(WireMessage::Binary(audio)).await?;
        conn.send(WireMessage::Text(end)).await
    }

    /// Returns whether the server answered
    async fn offline_stage(
        &self,
        conn: &mut dyn Connection,
        deadline: Instant,
        caps: &mut ServerCapabilities,
        adapter: &mut ProtocolAdapter,
    ) -> bool {
        let profile = MessageProfile {
            wav_name: OFFLINE_PROBE_NAME.to_string(),
            audio_fs: PROBE_SAMPLE_RATE,
            ..MessageProfile::for_mode(RecognitionMode::Offline)
        };

        let sent = Self::send_session(
            conn,
            adapter.build_start_message(&profile),
            silence(PROBE_SAMPLE_RATE, OFFLINE_SILENCE),
            adapter.build_end_message(),
        )
        .await;
        if let Err(e) = sent {
            log::warn!("Prober: single-shot probe send failed: {}", e);
            caps.add_note(format!("Single-shot probe could not be sent: {}", e));
            return false;
        }

        let wait = self.timeouts.offline_reply.min(remaining(deadline));
        let raw = match timeout(wait, conn.recv_text()).await {
            Ok(Ok(Some(raw))) => raw,
            Ok(Ok(None)) => {
                caps.add_note(
                    "Server closed the connection without answering the single-shot probe; offline support not determined",
                );
                return false;
            }
            Ok(Err(e)) => {
                caps.add_note(format!(
                    "Single-shot probe reply failed: {}; offline support not determined",
                    e
                ));
                return false;
            }
            Err(_) => {
                log::info!("Prober: no single-shot reply within {:?}", wait);
                caps.add_note(format!(
                    "No reply to the single-shot probe within {:?}; offline support not determined",
                    wait
                ));
                return false;
            }
        };

        caps.responsive = true;
        caps.supports_offline = Capability::Supported;

        let result = adapter.parse_result(&raw);
        note_payloads(&result, caps);

        if let Some(e) = result.decode_error() {
            caps.add_note(format!("Single-shot reply could not be decoded: {}", e));
        }
        if let Some(mode) = result.response_mode() {
            adapter.record_is_final_semantics(result.is_final, mode);
            if *mode != ResponseMode::Offline {
                caps.add_note(format!(
                    "Single-shot probe answered with mode '{}'",
                    mode.as_str()
                ));
            }
        }

        true
    }

    async fn two_pass_stage(
        &self,
        conn: &mut dyn Connection,
        deadline: Instant,
        caps: &mut ServerCapabilities,
        adapter: &mut ProtocolAdapter,
    ) {
        let profile = MessageProfile {
            wav_name: TWO_PASS_PROBE_NAME.to_string(),
            audio_fs: PROBE_SAMPLE_RATE,
            ..MessageProfile::for_mode(RecognitionMode::TwoPass)
        };

        let sent = Self::send_session(
            conn,
            adapter.build_start_message(&profile),
            silence(PROBE_SAMPLE_RATE, TWO_PASS_SILENCE),
            adapter.build_end_message(),
        )
        .await;
        if let Err(e) = sent {
            log::warn!("Prober: two-pass probe send failed: {}", e);
            caps.add_note(format!("Two-pass probe could not be sent: {}", e));
            return;
        }

        let wait = self.timeouts.two_pass_reply.min(remaining(deadline));
        let stage_deadline = Instant::now() + wait;
        let mut other_modes: Vec<String> = Vec::new();
        let mut unreported = 0usize;

        loop {
            let raw = match timeout_at(stage_deadline, conn.recv_text()).await {
                Ok(Ok(Some(raw))) => raw,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    caps.add_note(format!("Two-pass probe reply failed: {}", e));
                    break;
                }
                Err(_) => break,
            };

            let result = adapter.parse_result(&raw);
            note_payloads(&result, caps);

            if let Some(e) = result.decode_error() {
                caps.add_note(format!("Two-pass reply could not be decoded: {}", e));
                unreported += 1;
                continue;
            }

            match result.response_mode() {
                Some(mode) if mode.is_two_pass() => {
                    log::info!("Prober: two-pass reply with mode '{}'", mode.as_str());
                    caps.supports_two_pass = Capability::Supported;
                    caps.supports_online = Capability::Supported;
                    return;
                }
                Some(mode) => other_modes.push(mode.as_str().to_string()),
                None => unreported += 1,
            }
        }

        // Only an explicitly reported non-two-pass mode counts against support
        if other_modes.is_empty() {
            if unreported > 0 {
                caps.add_note(format!(
                    "{} two-pass reply(s) reported no mode; streaming support could not be confirmed",
                    unreported
                ));
            } else {
                caps.add_note(format!(
                    "No reply to the two-pass probe within {:?}; streaming support could not be confirmed",
                    wait
                ));
            }
        } else {
            caps.supports_two_pass = Capability::Unsupported;
            caps.add_note(format!(
                "Two-pass probe was answered only with mode(s) {}",
                other_modes.join(", ")
            ));
        }
    }
}

/// OR timestamp capabilities from any reply
fn note_payloads(result: &ParsedResult, caps: &mut ServerCapabilities) {
    caps.has_timestamp |= result.has_timestamp();
    caps.has_stamp_sents |= result.has_stamp_sents();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeGate;
    use crate::protocol::IsFinalSemantics;
    use crate::transport::{ScriptedConnector, ScriptedReply};
    use serde_json::Value;

    fn endpoint() -> Endpoint {
        Endpoint::new("127.0.0.1", 10095, false)
    }

    fn prober(connector: &Arc<ScriptedConnector>) -> ServerProber {
        ServerProber::new(endpoint(), connector.clone() as Arc<dyn Connector>)
    }

    const BUDGET: Duration = Duration::from_secs(30);

    #[test]
    fn test_silence_sizes() {
        assert_eq!(silence(16000, OFFLINE_SILENCE).len(), 8000);
        assert_eq!(silence(16000, TWO_PASS_SILENCE).len(), 32000);
        assert_eq!(silence(8000, OFFLINE_SILENCE).len(), 4000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_is_classified() {
        let connector = Arc::new(ScriptedConnector::new().with_connect_failure(
            ConnectError::new(ConnectErrorKind::Refused, "nothing listening"),
        ));
        let caps = prober(&connector)
            .probe(ProbeLevel::TwoPassFull, BUDGET)
            .await;

        assert!(!caps.reachable);
        assert!(!caps.responsive);
        assert_eq!(caps.error_kind, Some(ConnectErrorKind::Refused));
        assert!(caps.error.as_deref().unwrap().contains("refused"));
        assert_eq!(caps.supports_offline, Capability::Undetermined);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_only_sends_nothing() {
        let connector = Arc::new(ScriptedConnector::new().with_connection(vec![]));
        let caps = prober(&connector)
            .probe(ProbeLevel::ConnectOnly, BUDGET)
            .await;

        assert!(caps.reachable);
        assert!(!caps.responsive);
        assert_eq!(caps.probe_level, ProbeLevel::ConnectOnly);
        assert!(connector.sent_messages().is_empty());
        assert_eq!(connector.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_stage_sends_start_silence_end() {
        let connector = Arc::new(ScriptedConnector::new().with_connection(vec![
            ScriptedReply::text(r#"{"mode":"offline","text":"","is_final":true,"wav_name":"__probe_offline__"}"#),
        ]));
        let caps = prober(&connector)
            .probe(ProbeLevel::OfflineLight, BUDGET)
            .await;

        let sent = connector.sent_messages();
        assert_eq!(sent.len(), 3);
        match &sent[0].message {
            WireMessage::Text(text) => {
                let start: Value = serde_json::from_str(text).unwrap();
                assert_eq!(start["mode"], "offline");
                assert_eq!(start["wav_name"], OFFLINE_PROBE_NAME);
                assert!(start.get("chunk_size").is_none());
            }
            other => panic!("Expected start message, got {:?}", other),
        }
        assert_eq!(sent[1].message, WireMessage::Binary(vec![0u8; 8000]));
        assert_eq!(
            sent[2].message,
            WireMessage::Text(r#"{"is_speaking":false}"#.to_string())
        );

        assert!(caps.responsive);
        assert_eq!(caps.supports_offline, Capability::Supported);
        assert_eq!(caps.is_final_semantics, IsFinalSemantics::LegacyTrue);
        assert_eq!(caps.server_type, ServerType::Legacy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_server_leaves_offline_undetermined() {
        let connector = Arc::new(ScriptedConnector::new().with_connection(vec![]));
        let caps = prober(&connector)
            .probe(ProbeLevel::TwoPassFull, BUDGET)
            .await;

        assert!(caps.reachable);
        assert!(!caps.responsive);
        assert_eq!(caps.supports_offline, Capability::Undetermined);
        assert_eq!(caps.supports_two_pass, Capability::Undetermined);
        assert_eq!(caps.probe_level, ProbeLevel::OfflineLight);
        assert_eq!(caps.server_type, ServerType::Auto);
        assert!(caps.notes.iter().any(|n| n.contains("not determined")));
        // Stage 2 never opened a connection
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_pass_uses_second_connection() {
        let connector = Arc::new(
            ScriptedConnector::new()
                .with_connection(vec![ScriptedReply::text(
                    r#"{"mode":"offline","text":"","is_final":false,"timestamp":"[]"}"#,
                )])
                .with_connection(vec![
                    ScriptedReply::after(
                        Duration::from_millis(300),
                        r#"{"mode":"2pass-online","text":"","is_final":false}"#,
                    ),
                ]),
        );
        let mut prober = prober(&connector);
        let caps = prober.probe(ProbeLevel::TwoPassFull, BUDGET).await;

        assert_eq!(connector.connect_count(), 2);
        assert_eq!(connector.close_count(), 2);

        let second: Vec<_> = connector
            .sent_messages()
            .into_iter()
            .filter(|m| m.connection == 1)
            .collect();
        assert_eq!(second.len(), 3);
        match &second[0].message {
            WireMessage::Text(text) => {
                let start: Value = serde_json::from_str(text).unwrap();
                assert_eq!(start["mode"], "2pass");
                assert_eq!(start["chunk_size"], serde_json::json!([5, 10, 5]));
                assert_eq!(start["chunk_interval"], 10);
                // Modern hint is only applied after the probe
                assert!(start.get("svs_lang").is_none());
            }
            other => panic!("Expected start message, got {:?}", other),
        }
        assert_eq!(second[1].message, WireMessage::Binary(vec![0u8; 32000]));

        assert_eq!(caps.supports_two_pass, Capability::Supported);
        assert_eq!(caps.supports_online, Capability::Supported);
        assert!(caps.has_timestamp);
        assert!(!caps.has_stamp_sents);
        assert_eq!(caps.is_final_semantics, IsFinalSemantics::AlwaysFalse);
        assert_eq!(caps.server_type, ServerType::Modern);
        assert_eq!(caps.probe_level, ProbeLevel::TwoPassFull);
        assert_eq!(prober.adapter().server_type(), ServerType::Modern);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_pass_silence_is_undetermined() {
        let connector = Arc::new(
            ScriptedConnector::new()
                .with_connection(vec![ScriptedReply::text(r#"{"mode":"offline","text":""}"#)])
                .with_connection(vec![]),
        );
        let caps = prober(&connector)
            .probe(ProbeLevel::TwoPassFull, BUDGET)
            .await;

        assert_eq!(caps.supports_two_pass, Capability::Undetermined);
        assert_eq!(caps.supports_online, Capability::Undetermined);
        assert!(caps
            .notes
            .iter()
            .any(|n| n.contains("streaming support could not be confirmed")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_pass_answered_with_offline_only() {
        let connector = Arc::new(
            ScriptedConnector::new()
                .with_connection(vec![ScriptedReply::text(r#"{"mode":"offline","text":""}"#)])
                .with_connection(vec![ScriptedReply::text(
                    r#"{"mode":"offline","text":"","is_final":true}"#,
                )]),
        );
        let caps = prober(&connector)
            .probe(ProbeLevel::TwoPassFull, BUDGET)
            .await;

        assert_eq!(caps.supports_two_pass, Capability::Unsupported);
        assert_eq!(caps.supports_online, Capability::Undetermined);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_pass_reply_without_mode_stays_undetermined() {
        let connector = Arc::new(
            ScriptedConnector::new()
                .with_connection(vec![ScriptedReply::text(r#"{"mode":"offline","text":""}"#)])
                .with_connection(vec![
                    ScriptedReply::text(r#"{"text":"","is_final":false}"#),
                    ScriptedReply::text("not json"),
                ]),
        );
        let caps = prober(&connector)
            .probe(ProbeLevel::TwoPassFull, BUDGET)
            .await;

        assert_eq!(caps.supports_two_pass, Capability::Undetermined);
        assert_eq!(caps.supports_online, Capability::Undetermined);
        assert!(caps.notes.iter().any(|n| n.contains("reported no mode")));
        assert!(!caps.notes.iter().any(|n| n.contains("answered only with")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_stamp_sents_do_not_set_capability() {
        let connector = Arc::new(ScriptedConnector::new().with_connection(vec![
            ScriptedReply::text(r#"{"mode":"offline","text":"","stamp_sents":[]}"#),
        ]));
        let caps = prober(&connector)
            .probe(ProbeLevel::OfflineLight, BUDGET)
            .await;
        assert!(caps.responsive);
        assert!(!caps.has_stamp_sents);

        let connector = Arc::new(ScriptedConnector::new().with_connection(vec![
            ScriptedReply::text(r#"{"mode":"offline","text":"","stamp_sents":[{"text_seg":"","punc":null}]}"#),
        ]));
        let caps = prober(&connector)
            .probe(ProbeLevel::OfflineLight, BUDGET)
            .await;
        assert!(caps.has_stamp_sents);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outer_timeout_returns_partial_and_closes() {
        let connector = Arc::new(ScriptedConnector::new().with_connection(vec![]));
        let timeouts = ProbeTimeouts {
            connect: Duration::from_secs(1),
            offline_reply: Duration::from_secs(60),
            two_pass_reply: Duration::from_secs(60),
        };
        let mut prober = prober(&connector).with_timeouts(timeouts);

        // Only the outer timeout can end the wait for a reply
        let caps = prober
            .probe(ProbeLevel::OfflineLight, Duration::from_secs(2))
            .await;

        assert!(caps.reachable);
        assert!(!caps.responsive);
        assert_eq!(caps.supports_offline, Capability::Undetermined);
        assert!(caps.error.is_none());
        assert!(caps.elapsed <= Duration::from_secs(3));
        assert_eq!(connector.connect_count(), connector.close_count());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_is_classified() {
        let connector = Arc::new(
            ScriptedConnector::new()
                .with_connection(vec![])
                .with_connect_delay(Duration::from_secs(60)),
        );
        let caps = prober(&connector)
            .probe(ProbeLevel::OfflineLight, BUDGET)
            .await;

        assert!(!caps.reachable);
        assert_eq!(caps.error_kind, Some(ConnectErrorKind::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_outer_timeout_is_noted() {
        let connector = Arc::new(ScriptedConnector::new().with_connection(vec![]));
        let caps = prober(&connector)
            .probe(ProbeLevel::ConnectOnly, Duration::from_secs(1))
            .await;
        assert!(caps.reachable);
        assert!(caps.notes.iter().any(|n| n.contains("shorter than")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_probe_is_partial() {
        let connector = Arc::new(ScriptedConnector::new().with_connection(vec![]));
        let gate = ProbeGate::new();
        let ticket = gate.issue();

        let mut prober = prober(&connector);
        let probe = prober.probe_with_cancel(ProbeLevel::OfflineLight, BUDGET, ticket.cancellation());
        let supersede = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            gate.issue()
        };
        let (caps, newer) = tokio::join!(probe, supersede);

        assert!(caps.notes.iter().any(|n| n.contains("cancelled")));
        assert!(caps.elapsed < Duration::from_secs(1));
        assert!(!gate.apply(ticket.token(), caps));
        assert!(gate.is_current(newer.token()));
        assert_eq!(connector.connect_count(), connector.close_count());
    }
}
