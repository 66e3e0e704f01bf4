//! Core types used throughout the capture pipeline.
//!
//! This module defines the canonical output record (`CapturedAction`), its
//! per-kind payloads, media items, delivery outcomes and the error taxonomy
//! shared by extractors, trackers and sinks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The kind of user action a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// User captured a feed post through the injected control
    Post,
    /// User submitted a comment on a post
    Comment,
    /// User sent a direct message
    Message,
    /// User sent a connection invitation
    ConnectionRequest,
}

impl ActionKind {
    pub const ALL: [ActionKind; 4] = [
        ActionKind::Post,
        ActionKind::Comment,
        ActionKind::Message,
        ActionKind::ConnectionRequest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Post => "post",
            ActionKind::Comment => "comment",
            ActionKind::Message => "message",
            ActionKind::ConnectionRequest => "connection_request",
        }
    }
}

/// Where on the host page an action originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionContext {
    Feed,
    Profile,
    SinglePost,
    Search,
    MessagingPage,
    MessagingOverlay,
    MyNetwork,
    Notifications,
    Company,
    Unknown,
}

/// Person attached to a record (author, sender or recipient)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
}

impl Actor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            profile_url: None,
            headline: None,
        }
    }

    pub fn with_profile_url(mut self, url: Option<String>) -> Self {
        self.profile_url = url;
        self
    }

    pub fn with_headline(mut self, headline: Option<String>) -> Self {
        self.headline = headline;
        self
    }
}

/// Type of a single content item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaItemType {
    Text,
    Image,
    Video,
    Document,
    Article,
    Poll,
    Carousel,
}

/// Aggregate media type of a post or message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Text,
    Image,
    Video,
    Document,
    Article,
    Poll,
    Carousel,
    Mixed,
}

impl From<MediaItemType> for MediaType {
    fn from(item: MediaItemType) -> Self {
        match item {
            MediaItemType::Text => MediaType::Text,
            MediaItemType::Image => MediaType::Image,
            MediaItemType::Video => MediaType::Video,
            MediaItemType::Document => MediaType::Document,
            MediaItemType::Article => MediaType::Article,
            MediaItemType::Poll => MediaType::Poll,
            MediaItemType::Carousel => MediaType::Carousel,
        }
    }
}

/// One piece of post or message content.
///
/// `data` is never empty: construct through [`MediaItem::new`], which refuses
/// blank data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    #[serde(rename = "type")]
    pub item_type: MediaItemType,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl MediaItem {
    pub fn new(item_type: MediaItemType, data: impl Into<String>) -> Option<Self> {
        let data = data.into();
        let data = data.trim();
        if data.is_empty() {
            return None;
        }
        Some(Self {
            item_type,
            data: data.to_string(),
            metadata: None,
        })
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.metadata
                .get_or_insert_with(BTreeMap::new)
                .insert(key.to_string(), value);
        }
        self
    }
}

/// Whether a two-phase capture was confirmed by the rendered result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    /// Re-extraction after the settle delay found the sent item
    Confirmed,
    /// Re-extraction failed; the pre-action snapshot was delivered instead
    Unconfirmed,
}

/// How the author of a comment was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorSource {
    /// Read from the rendered comment node
    Rendered,
    /// Best-effort: the logged-in user
    CurrentUser,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    pub id: String,
    pub actor: Actor,
    pub timestamp: DateTime<Utc>,
    pub context: ActionContext,
    #[serde(default)]
    pub text: String,
    pub content: Vec<MediaItem>,
    pub media_type: MediaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRecord {
    pub id: String,
    pub actor: Actor,
    pub timestamp: DateTime<Utc>,
    pub context: ActionContext,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_comment_id: Option<String>,
    pub author_source: AuthorSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub actor: Actor,
    pub recipient: Actor,
    pub timestamp: DateTime<Utc>,
    pub context: ActionContext,
    #[serde(default)]
    pub text: String,
    pub message_type: MediaType,
    #[serde(default)]
    pub attachments: Vec<MediaItem>,
    pub is_group_message: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub confirmation: Confirmation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequestRecord {
    pub id: String,
    pub actor: Actor,
    pub recipient: Actor,
    pub timestamp: DateTime<Utc>,
    pub context: ActionContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_company: Option<String>,
    pub confirmation: Confirmation,
}

/// Canonical output record, one per confirmed user action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapturedAction {
    Post(PostRecord),
    Comment(CommentRecord),
    Message(MessageRecord),
    ConnectionRequest(ConnectionRequestRecord),
}

impl CapturedAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            CapturedAction::Post(_) => ActionKind::Post,
            CapturedAction::Comment(_) => ActionKind::Comment,
            CapturedAction::Message(_) => ActionKind::Message,
            CapturedAction::ConnectionRequest(_) => ActionKind::ConnectionRequest,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            CapturedAction::Post(r) => &r.id,
            CapturedAction::Comment(r) => &r.id,
            CapturedAction::Message(r) => &r.id,
            CapturedAction::ConnectionRequest(r) => &r.id,
        }
    }

    pub fn actor(&self) -> &Actor {
        match self {
            CapturedAction::Post(r) => &r.actor,
            CapturedAction::Comment(r) => &r.actor,
            CapturedAction::Message(r) => &r.actor,
            CapturedAction::ConnectionRequest(r) => &r.actor,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            CapturedAction::Post(r) => r.timestamp,
            CapturedAction::Comment(r) => r.timestamp,
            CapturedAction::Message(r) => r.timestamp,
            CapturedAction::ConnectionRequest(r) => r.timestamp,
        }
    }

    /// One-line description for logs
    pub fn summary(&self) -> String {
        match self {
            CapturedAction::Post(r) => format!(
                "post {} by {} ({} items, {:?})",
                r.id,
                r.actor.name,
                r.content.len(),
                r.media_type
            ),
            CapturedAction::Comment(r) => format!(
                "comment {} by {} on {}",
                r.id,
                r.actor.name,
                r.post_id.as_deref().unwrap_or("unknown post")
            ),
            CapturedAction::Message(r) => format!(
                "message {} to {} ({} chars, {} attachments, {:?})",
                r.id,
                r.recipient.name,
                r.text.chars().count(),
                r.attachments.len(),
                r.confirmation
            ),
            CapturedAction::ConnectionRequest(r) => format!(
                "connection request {} to {} ({}, {:?})",
                r.id,
                r.recipient.name,
                if r.custom_message.is_some() { "with note" } else { "no note" },
                r.confirmation
            ),
        }
    }
}

/// Result reported by an output sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryOutcome {
    pub fn delivered() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }

    pub fn into_result(self) -> Result<(), CaptureError> {
        if self.success {
            Ok(())
        } else {
            Err(CaptureError::Delivery(
                self.error.unwrap_or_else(|| "sink reported failure".to_string()),
            ))
        }
    }
}

/// Visual state of the injected post control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonState {
    Default,
    Loading,
    Success,
    Error,
    Captured,
}

/// Errors that can occur in the capture pipeline
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Capture disabled for {}", .0.as_str())]
    Disabled(ActionKind),

    #[error("Invalid selector '{0}'")]
    InvalidSelector(String),

    #[error("Tracker is not initialized")]
    NotInitialized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
