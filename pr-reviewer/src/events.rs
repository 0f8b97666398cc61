//! Request-scoped event stream.
//!
//! One review request owns one event channel. Status and progress records
//! are best effort (non-blocking put, dropped when the subscriber lags);
//! terminal `final`/`error` records are sent blocking so they are never
//! lost. The HTTP transport consumes the receiver as an NDJSON stream.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::model::issue::ReviewIssue;

/// Final review payload: markdown comment plus the issue list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub comment: String,
    pub issues: Vec<ReviewIssue>,
}

/// One record of the event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Lifecycle marker (`stage_0_started`, `reconciliation_started`, ...).
    Status { state: String, message: String },
    /// Percentage ladder from 0 to 100.
    Progress { percent: u8, message: String },
    /// Terminal failure.
    Error { message: String },
    /// Terminal success carrying the result.
    Final { result: ReviewOutcome },
}

impl Event {
    /// Whether this record terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Error { .. } | Event::Final { .. })
    }
}

/// Cloneable sender half of the request's event stream.
///
/// `EventSink::disabled()` swallows everything, for callers that only want
/// the return value.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<Event>>,
}

impl EventSink {
    /// Create a bounded channel; the receiver feeds the NDJSON stream.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    /// Sink that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Best-effort status record.
    pub fn status(&self, state: &str, message: impl Into<String>) {
        self.try_emit(Event::Status {
            state: state.to_string(),
            message: message.into(),
        });
    }

    /// Best-effort progress record.
    pub fn progress(&self, percent: u8, message: impl Into<String>) {
        self.try_emit(Event::Progress {
            percent: percent.min(100),
            message: message.into(),
        });
    }

    /// Blocking terminal error record.
    pub async fn error(&self, message: impl Into<String>) {
        self.emit_blocking(Event::Error {
            message: message.into(),
        })
        .await;
    }

    /// Blocking terminal final record.
    pub async fn finished(&self, result: ReviewOutcome) {
        self.emit_blocking(Event::Final { result }).await;
    }

    fn try_emit(&self, event: Event) {
        if let Some(tx) = &self.tx {
            if tx.try_send(event).is_err() {
                debug!("event subscriber lagging, dropped a non-terminal event");
            }
        }
    }

    async fn emit_blocking(&self, event: Event) {
        if let Some(tx) = &self.tx {
            // A closed receiver means the subscriber went away; nothing to do.
            let _ = tx.send(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn terminal_events_are_delivered() {
        let (sink, mut rx) = EventSink::channel(4);
        sink.status("stage_0_started", "planning");
        sink.finished(ReviewOutcome {
            comment: "ok".into(),
            issues: vec![],
        })
        .await;
        drop(sink);

        let mut seen = Vec::new();
        while let Some(e) = rx.recv().await {
            seen.push(e);
        }
        assert_eq!(seen.len(), 2);
        assert!(seen.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn slow_subscriber_drops_progress_not_terminal() {
        let (sink, mut rx) = EventSink::channel(1);
        // Fill the only slot, then push more progress; extras are dropped.
        sink.progress(10, "a");
        sink.progress(20, "b");
        sink.progress(30, "c");

        let first = rx.recv().await.unwrap();
        match first {
            Event::Progress { percent, .. } => assert_eq!(percent, 10),
            other => panic!("unexpected event: {other:?}"),
        }

        sink.error("boom").await;
        drop(sink);
        let last = rx.recv().await.unwrap();
        assert!(last.is_terminal());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let line = serde_json::to_string(&Event::Progress {
            percent: 42,
            message: "halfway".into(),
        })
        .unwrap();
        assert!(line.contains("\"type\":\"progress\""));
        assert!(line.contains("\"percent\":42"));
    }
}
