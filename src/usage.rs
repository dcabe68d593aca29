//! Usage events for the external statistics pipeline
//!
//! Emitting never blocks the response path: sinks either hand the event to
//! an unbounded channel or log it.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::vectors::{now_millis, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageKind {
    Add,
    Remove,
    Query,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    pub timestamp: Timestamp,
    pub db_name: String,
    #[serde(rename = "type")]
    pub kind: UsageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_vectors: Option<usize>,
    /// Milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

impl UsageEvent {
    pub fn query(db_name: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            timestamp: now_millis(),
            db_name: db_name.into(),
            kind: UsageKind::Query,
            total_vectors: None,
            duration: Some(duration_ms),
        }
    }

    pub fn writes(db_name: impl Into<String>, kind: UsageKind, total_vectors: usize) -> Self {
        Self {
            timestamp: now_millis(),
            db_name: db_name.into(),
            kind,
            total_vectors: Some(total_vectors),
            duration: None,
        }
    }
}

/// Fire-and-forget destination for usage events
pub trait UsageSink: Send + Sync + 'static {
    fn emit(&self, event: UsageEvent);
}

/// Forwards events to a channel drained by a collector task
#[derive(Clone)]
pub struct ChannelUsageSink {
    tx: mpsc::UnboundedSender<UsageEvent>,
}

impl ChannelUsageSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UsageEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl UsageSink for ChannelUsageSink {
    fn emit(&self, event: UsageEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Usage collector gone, dropping event");
        }
    }
}

/// Logs each event under the `usage` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageSink;

impl UsageSink for TracingUsageSink {
    fn emit(&self, event: UsageEvent) {
        tracing::info!(
            target: "usage",
            db = %event.db_name,
            kind = ?event.kind,
            total_vectors = event.total_vectors,
            duration_ms = event.duration,
            "usage"
        );
    }
}
