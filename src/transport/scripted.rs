//! Scripted in-memory connector
//!
//! Each `connect()` pops the next scripted connection. Replies are delivered
//! in order after their delay; once a script runs out the connection stays
//! silent, which is what a server that ignores silence looks like.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{
    ConnectError, ConnectErrorKind, Connection, Connector, Endpoint, TransportError, WireMessage,
};

/// One scripted inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedReply {
    pub delay: Duration,
    /// `None` closes the connection
    pub text: Option<String>,
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::after(Duration::ZERO, text)
    }

    pub fn after(delay: Duration, text: impl Into<String>) -> Self {
        Self {
            delay,
            text: Some(text.into()),
        }
    }

    pub fn close() -> Self {
        Self {
            delay: Duration::ZERO,
            text: None,
        }
    }
}

/// A message a scripted connection received from the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Zero-based index of the connection it was sent on
    pub connection: usize,
    pub message: WireMessage,
}

type Script = Result<Vec<ScriptedReply>, ConnectError>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Connector that replays canned connections
#[derive(Debug, Default)]
pub struct ScriptedConnector {
    scripts: Mutex<VecDeque<Script>>,
    connect_delay: Duration,
    connects: AtomicUsize,
    sent: Arc<Mutex<Vec<SentMessage>>>,
    closes: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a connection that will deliver `replies`
    pub fn with_connection(self, replies: Vec<ScriptedReply>) -> Self {
        lock(&self.scripts).push_back(Ok(replies));
        self
    }

    /// Queue a connection attempt that fails with `err`
    pub fn with_connect_failure(self, err: ConnectError) -> Self {
        lock(&self.scripts).push_back(Err(err));
        self
    }

    /// Delay every connection attempt
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Everything clients sent, across all connections
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        lock(&self.sent).clone()
    }

    /// Successful connections handed out so far
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Connections closed or dropped so far
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, ConnectError> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }

        let script = lock(&self.scripts).pop_front().unwrap_or_else(|| {
            Err(ConnectError::new(
                ConnectErrorKind::Refused,
                format!("no scripted connection left for {}", endpoint),
            ))
        });
        let replies = script?;

        let index = self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            index,
            replies: replies.into(),
            sent: Arc::clone(&self.sent),
            closes: Arc::clone(&self.closes),
            closed: false,
        }))
    }
}

/// Connection handed out by [`ScriptedConnector`]
#[derive(Debug)]
pub struct ScriptedConnection {
    index: usize,
    replies: VecDeque<ScriptedReply>,
    sent: Arc<Mutex<Vec<SentMessage>>>,
    closes: Arc<AtomicUsize>,
    closed: bool,
}

impl ScriptedConnection {
    fn mark_closed(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed("scripted connection closed".to_string()));
        }
        lock(&self.sent).push(SentMessage {
            connection: self.index,
            message,
        });
        Ok(())
    }

    async fn recv_text(&mut self) -> Result<Option<String>, TransportError> {
        if self.closed {
            return Ok(None);
        }

        let Some(delay) = self.replies.front().map(|reply| reply.delay) else {
            // Script exhausted: stay silent until the caller gives up
            return std::future::pending().await;
        };

        // Wait before popping so an abandoned receive leaves the reply queued
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let Some(reply) = self.replies.pop_front() else {
            return Ok(None);
        };

        match reply.text {
            Some(text) => Ok(Some(text)),
            None => {
                self.mark_closed();
                Ok(None)
            }
        }
    }

    async fn close(&mut self) {
        self.mark_closed();
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.mark_closed();
    }
}
