//! Transcript aggregation across a recognition session
//!
//! Folds normalized results into display text.
//!
//! # Aggregation Strategy
//!
//! - **`online` / `2pass-online`**: draft fragments, appended to the pending draft
//! - **`2pass-offline`**: corrected utterance, replaces the draft and is committed
//! - **`offline`**: whole-session answer, replaces everything
//!
//! Two-pass servers emit drafts while the user speaks and a corrected pass at
//! each pause, so the draft for an utterance is thrown away once its
//! correction arrives.

use super::adapter::ParsedResult;
use super::codec::ResponseMode;

/// Aggregates parsed results into coherent text
#[derive(Debug, Clone, Default)]
pub struct TranscriptAggregator {
    /// Text confirmed by corrected or single-shot passes
    confirmed_text: String,
    /// Draft text for the utterance in progress
    draft_text: String,
    /// Results folded in (decode errors excluded)
    result_count: u64,
    complete: bool,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one result in and return the current text
    pub fn process(&mut self, result: &ParsedResult) -> String {
        let Some(mode) = result.response_mode() else {
            if result.decode_error().is_some() {
                log::debug!("TranscriptAggregator: ignoring undecodable message");
                return self.current_text();
            }
            // No mode reported: treat as a draft fragment
            self.push_draft(&result.text);
            self.finish(result);
            return self.current_text();
        };

        match mode {
            ResponseMode::Offline => {
                self.confirmed_text = result.text.clone();
                self.draft_text.clear();
            }
            ResponseMode::TwoPassOffline => {
                self.confirmed_text.push_str(&result.text);
                self.draft_text.clear();
            }
            ResponseMode::Online | ResponseMode::TwoPassOnline | ResponseMode::Other(_) => {
                self.push_draft(&result.text);
            }
        }

        self.finish(result);
        self.current_text()
    }

    fn push_draft(&mut self, text: &str) {
        if !text.is_empty() {
            self.draft_text.push_str(text);
        }
    }

    fn finish(&mut self, result: &ParsedResult) {
        self.result_count += 1;
        self.complete = result.is_complete;

        if self.result_count % 20 == 0 {
            log::debug!(
                "TranscriptAggregator: {} results, {} confirmed chars, {} draft chars",
                self.result_count,
                self.confirmed_text.len(),
                self.draft_text.len()
            );
        }
    }

    /// Confirmed text followed by the pending draft
    pub fn current_text(&self) -> String {
        format!("{}{}", self.confirmed_text, self.draft_text)
    }

    pub fn confirmed_text(&self) -> &str {
        &self.confirmed_text
    }

    pub fn draft_text(&self) -> &str {
        &self.draft_text
    }

    pub fn has_text(&self) -> bool {
        !self.confirmed_text.is_empty() || !self.draft_text.is_empty()
    }

    /// Mirrors `is_complete` of the last folded result
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn result_count(&self) -> u64 {
        self.result_count
    }

    /// Reset for a new session
    pub fn reset(&mut self) {
        self.confirmed_text.clear();
        self.draft_text.clear();
        self.result_count = 0;
        self.complete = false;
    }
}
