//! Direct message extraction.
//!
//! A message is captured in two phases. [`ComposerExtractor`] snapshots the
//! composer (text, attachments, recipient) at the moment the user sends.
//! After the settle delay [`ThreadConfirmer`] looks for the rendered message
//! in the thread and produces the authoritative record.

use super::author::{clean_person_name, current_user, extract_actor, ActorGroups};
use super::media::determine_media_type;
use super::sanitize::{normalize_for_match, sanitize_composer_text};
use super::{
    absolute_url, classify_context, first_attr, first_text, resolve_timestamp, short_hash,
    visible_text, ExtractContext, Extractor,
};
use crate::types::{ActionContext, Actor, Confirmation, MediaItem, MediaItemType, MessageRecord};
use chrono::{DateTime, Utc};
use ego_tree::NodeId;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::ElementRef;
use std::collections::HashSet;
use tracing::{debug, trace};

lazy_static! {
    static ref THREAD_ID: Regex = Regex::new(r"/messaging/thread/([^/?#]+)").unwrap();
    static ref MORE_PARTICIPANTS: Regex = Regex::new(r"(?i)(?:\band|\+)\s*\d+\s+(?:others?|more)\b").unwrap();
}

/// Composer state captured when the user hits send
#[derive(Debug, Clone, PartialEq)]
pub struct ComposerSnapshot {
    pub text: String,
    pub attachments: Vec<MediaItem>,
    pub recipient: Actor,
    pub participants: Vec<String>,
    pub is_group: bool,
    pub conversation_id: Option<String>,
    pub context: ActionContext,
    /// Messages already rendered in the thread before sending
    pub existing_messages: HashSet<NodeId>,
}

impl ComposerSnapshot {
    /// Fallback record when the sent message never showed up in the thread
    pub fn into_record(self, actor: Actor, now: DateTime<Utc>) -> MessageRecord {
        let id = format!(
            "msg-{}",
            short_hash(&format!(
                "{}|{}|{}|{}",
                self.conversation_id.as_deref().unwrap_or(""),
                self.recipient.name,
                self.text,
                now.timestamp_millis()
            ))
        );
        MessageRecord {
            id,
            actor,
            timestamp: now,
            context: self.context,
            message_type: determine_media_type(&self.attachments),
            text: self.text,
            attachments: self.attachments,
            is_group_message: self.is_group,
            participants: self.participants,
            recipient: self.recipient,
            conversation_id: self.conversation_id,
            confirmation: Confirmation::Unconfirmed,
        }
    }
}

/// Snapshots a composer; rooted at the messaging surface around it
#[derive(Debug, Default, Clone, Copy)]
pub struct ComposerExtractor;

impl Extractor for ComposerExtractor {
    type Output = ComposerSnapshot;

    fn extract(&self, cx: &ExtractContext<'_>, root: Option<ElementRef<'_>>) -> Option<ComposerSnapshot> {
        let root = root?;
        let msg = &cx.selectors.messaging;

        let text = msg
            .composer
            .first_match(root)
            .map(|composer| sanitize_composer_text(&visible_text(composer)))
            .unwrap_or_default();
        let attachments = composer_attachments(cx, root);
        if text.is_empty() && attachments.is_empty() {
            trace!("Composer is empty");
            return None;
        }

        let recipient = resolve_recipient(cx, root)?;
        let participants = participants(cx, root, &recipient);
        let is_group = participants.len() > 1
            || recipient.name.contains(',')
            || MORE_PARTICIPANTS.is_match(&recipient.name);

        let existing_messages = msg
            .message_list
            .first_match(root)
            .map(|list| msg.message_item.find_all_within(list))
            .unwrap_or_else(|| msg.message_item.find_all_within(root));

        Some(ComposerSnapshot {
            text,
            attachments,
            recipient,
            participants,
            is_group,
            conversation_id: conversation_id(cx, root),
            context: messaging_context(cx, root),
            existing_messages,
        })
    }
}

/// Confirms a sent message against the rendered thread
#[derive(Debug, Clone, Copy)]
pub struct ThreadConfirmer<'s> {
    pub snapshot: &'s ComposerSnapshot,
}

impl Extractor for ThreadConfirmer<'_> {
    type Output = MessageRecord;

    fn extract(&self, cx: &ExtractContext<'_>, root: Option<ElementRef<'_>>) -> Option<MessageRecord> {
        let root = root?;
        let msg = &cx.selectors.messaging;
        let snapshot = self.snapshot;
        let wanted = normalize_for_match(&snapshot.text);

        let scope = msg.message_list.first_match(root).unwrap_or(root);
        let items: Vec<ElementRef<'_>> = scope
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|el| msg.message_item.matches(el))
            .filter(|el| !snapshot.existing_messages.contains(&el.id()))
            .collect();

        // Newest first
        let sent = items.into_iter().rev().find(|item| {
            let body = first_text(*item, &msg.message_body)
                .map(|b| normalize_for_match(&b))
                .unwrap_or_default();
            if wanted.is_empty() {
                msg.message_attachment.first_match(*item).is_some()
            } else {
                !body.is_empty() && (body == wanted || body.contains(&wanted))
            }
        })?;

        let text = first_text(sent, &msg.message_body).unwrap_or_else(|| snapshot.text.clone());
        let timestamp = resolve_timestamp(
            first_attr(sent, &msg.message_time, "datetime").as_deref(),
            None,
            cx.now,
        );
        let id = ["data-event-urn", "data-message-urn", "id"]
            .iter()
            .filter_map(|attr| sent.value().attr(attr))
            .find(|v| !v.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                format!(
                    "msg-{}",
                    short_hash(&format!(
                        "{}|{}|{}",
                        snapshot.conversation_id.as_deref().unwrap_or(""),
                        snapshot.recipient.name,
                        text
                    ))
                )
            });

        let actor = current_user(cx).unwrap_or_else(|| Actor::named("Unknown"));
        debug!("Sent message {} confirmed in thread", id);

        Some(MessageRecord {
            id,
            actor,
            recipient: snapshot.recipient.clone(),
            timestamp,
            context: snapshot.context,
            text,
            message_type: determine_media_type(&snapshot.attachments),
            attachments: snapshot.attachments.clone(),
            is_group_message: snapshot.is_group,
            participants: snapshot.participants.clone(),
            conversation_id: snapshot.conversation_id.clone(),
            confirmation: Confirmation::Confirmed,
        })
    }
}

fn composer_attachments(cx: &ExtractContext<'_>, root: ElementRef<'_>) -> Vec<MediaItem> {
    let msg = &cx.selectors.messaging;
    let mut items = Vec::new();

    for preview in msg.attachment_preview.all_matches(root) {
        let image = first_attr(preview, &msg.attachment_image, "src");
        let file_name = first_text(preview, &msg.attachment_file_name);

        let item = match (image, file_name) {
            (Some(src), name) => MediaItem::new(MediaItemType::Image, src)
                .map(|i| i.with_meta("fileName", name.unwrap_or_default())),
            (None, Some(name)) => {
                let item_type = if is_video_file(&name) {
                    MediaItemType::Video
                } else {
                    MediaItemType::Document
                };
                MediaItem::new(item_type, name.clone()).map(|i| i.with_meta("fileName", name))
            }
            (None, None) => None,
        };
        items.extend(item);
    }

    items
}

fn is_video_file(name: &str) -> bool {
    let lower = name.to_lowercase();
    [".mp4", ".mov", ".webm", ".avi", ".mkv"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}

/// Recipient from the surface header, then from the page-level thread header
fn resolve_recipient(cx: &ExtractContext<'_>, root: ElementRef<'_>) -> Option<Actor> {
    let msg = &cx.selectors.messaging;
    let groups = || ActorGroups {
        name: &msg.recipient_name,
        link: &msg.recipient_link,
        headline: Some(&msg.recipient_headline),
    };

    extract_actor(cx, root, groups())
        .or_else(|| {
            // Full-page messaging renders the header outside the composer's container
            let surface = msg.surface.closest(root).filter(|s| s.id() != root.id());
            surface.and_then(|s| extract_actor(cx, s, groups()))
        })
        .or_else(|| {
            if classify_context(cx.page_url) == ActionContext::MessagingPage {
                extract_actor(cx, cx.document(), groups())
            } else {
                None
            }
        })
}

fn participants(cx: &ExtractContext<'_>, root: ElementRef<'_>, recipient: &Actor) -> Vec<String> {
    let msg = &cx.selectors.messaging;
    let mut seen = HashSet::new();
    let mut names: Vec<String> = msg
        .participants
        .all_matches(root)
        .into_iter()
        .filter_map(|el| {
            el.value()
                .attr("alt")
                .map(str::to_string)
                .or_else(|| Some(visible_text(el)))
        })
        .filter_map(|n| clean_person_name(&n))
        .filter(|n| seen.insert(n.clone()))
        .collect();

    if names.is_empty() && recipient.name.contains(',') {
        names = recipient
            .name
            .split(',')
            .map(|part| MORE_PARTICIPANTS.replace(part, "").into_owned())
            .filter_map(|part| clean_person_name(&part))
            .collect();
    }
    names
}

fn conversation_id(cx: &ExtractContext<'_>, root: ElementRef<'_>) -> Option<String> {
    if let Some(id) = root
        .value()
        .attr("data-conversation-id")
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(id.to_string());
    }

    let thread_link = root
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter_map(|el| el.value().attr("href"))
        .find(|href| href.contains("/messaging/thread/"))
        .and_then(|href| absolute_url(cx.page_url, href));

    thread_link
        .as_deref()
        .into_iter()
        .chain(std::iter::once(cx.page_url))
        .find_map(|url| THREAD_ID.captures(url).and_then(|c| c.get(1)).map(|m| m.as_str().to_string()))
}

fn messaging_context(cx: &ExtractContext<'_>, root: ElementRef<'_>) -> ActionContext {
    if cx.selectors.messaging.overlay.closest(root).is_some() {
        ActionContext::MessagingOverlay
    } else {
        match classify_context(cx.page_url) {
            ActionContext::MessagingPage => ActionContext::MessagingPage,
            _ => ActionContext::MessagingOverlay,
        }
    }
}
