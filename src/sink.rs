//! Output sinks and capture settings.
//!
//! The pipeline never talks to the network itself. Confirmed actions are
//! handed to an [`OutputSink`], which reports a [`DeliveryOutcome`].

use crate::types::{ActionKind, CapturedAction, DeliveryOutcome};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Destination for captured actions
#[async_trait(?Send)]
pub trait OutputSink {
    async fn deliver(&self, action: &CapturedAction) -> DeliveryOutcome;
}

/// Per-kind capture switch
pub trait CaptureSettings {
    fn is_capture_enabled(&self, kind: ActionKind) -> bool;
}

/// Settings that enable every kind
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl CaptureSettings for AllowAll {
    fn is_capture_enabled(&self, _kind: ActionKind) -> bool {
        true
    }
}

/// Forwards actions to a channel, typically drained by the bridge writer
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<CapturedAction>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<CapturedAction>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CapturedAction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

#[async_trait(?Send)]
impl OutputSink for ChannelSink {
    async fn deliver(&self, action: &CapturedAction) -> DeliveryOutcome {
        match self.tx.send(action.clone()) {
            Ok(()) => DeliveryOutcome::delivered(),
            Err(_) => DeliveryOutcome::failed("output channel closed"),
        }
    }
}

/// Logs every action and reports success
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait(?Send)]
impl OutputSink for LogSink {
    async fn deliver(&self, action: &CapturedAction) -> DeliveryOutcome {
        info!("Captured {}", action.summary());
        match serde_json::to_string(action) {
            Ok(json) => debug!("{}", json),
            Err(e) => debug!("Could not serialize {}: {}", action.id(), e),
        }
        DeliveryOutcome::delivered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Actor, AuthorSource, CommentRecord, ActionContext};
    use chrono::Utc;

    fn comment() -> CapturedAction {
        CapturedAction::Comment(CommentRecord {
            id: "comment-1".into(),
            actor: Actor::named("Ada Lovelace"),
            timestamp: Utc::now(),
            context: ActionContext::Feed,
            text: "Great post".into(),
            post_id: Some("urn:li:activity:1".into()),
            post_author: None,
            parent_comment_id: None,
            author_source: AuthorSource::Rendered,
        })
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::channel();
        let outcome = sink.deliver(&comment()).await;
        assert!(outcome.success);
        assert_eq!(rx.recv().await.unwrap().id(), "comment-1");
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed_channel() {
        let (sink, rx) = ChannelSink::channel();
        drop(rx);
        let outcome = sink.deliver(&comment()).await;
        assert!(!outcome.success);
        assert!(outcome.into_result().is_err());
    }

    #[tokio::test]
    async fn test_log_sink_always_succeeds() {
        assert!(LogSink.deliver(&comment()).await.success);
    }
}
