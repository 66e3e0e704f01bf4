//! Comment extraction: the draft in a comment box and the rendered comment.

use super::author::{extract_actor, ActorGroups};
use super::post::post_urn;
use super::sanitize::{normalize_for_match, sanitize_composer_text};
use super::{first_attr, first_text, resolve_timestamp, short_hash, visible_text, ExtractContext, Extractor};
use crate::types::{ActionContext, Actor, AuthorSource, CommentRecord};
use chrono::{DateTime, Utc};
use ego_tree::NodeId;
use scraper::ElementRef;
use std::collections::HashSet;
use tracing::trace;

/// What the user is about to submit, captured before the host clears the box
#[derive(Debug, Clone, PartialEq)]
pub struct CommentDraft {
    pub text: String,
    pub post_id: Option<String>,
    pub post_author: Option<String>,
    pub parent_comment_id: Option<String>,
    pub context: ActionContext,
    /// Post container the comment belongs to
    pub post_node: Option<NodeId>,
    /// Comments already rendered before submission
    pub existing_comments: HashSet<NodeId>,
}

impl CommentDraft {
    /// Build the record when the rendered comment could not be found
    pub fn into_record(self, actor: Actor, now: DateTime<Utc>) -> CommentRecord {
        let id = format!(
            "comment-{}",
            short_hash(&format!(
                "{}|{}|{}",
                self.post_id.as_deref().unwrap_or(""),
                actor.name,
                self.text
            ))
        );
        CommentRecord {
            id,
            actor,
            timestamp: now,
            context: self.context,
            text: self.text,
            post_id: self.post_id,
            post_author: self.post_author,
            parent_comment_id: self.parent_comment_id,
            author_source: AuthorSource::CurrentUser,
        }
    }
}

/// Reads the draft out of a comment box (the element around the editor)
#[derive(Debug, Default, Clone, Copy)]
pub struct CommentBoxExtractor;

impl Extractor for CommentBoxExtractor {
    type Output = CommentDraft;

    fn extract(&self, cx: &ExtractContext<'_>, root: Option<ElementRef<'_>>) -> Option<CommentDraft> {
        let root = root?;
        let comments = &cx.selectors.comment;

        let editor = comments.editor.first_match(root)?;
        let text = sanitize_composer_text(&visible_text(editor));
        if text.is_empty() {
            trace!("Comment editor is empty");
            return None;
        }

        let post = cx.selectors.post.container.closest(root);
        let post_id = post.and_then(post_urn);
        let post_author = post.and_then(|p| {
            let scope = cx.selectors.post.actor.first_match(p).unwrap_or(p);
            first_text(scope, &cx.selectors.post.actor_name).and_then(|n| super::clean_person_name(&n))
        });
        let existing_comments = post
            .map(|p| comments.item.find_all_within(p))
            .unwrap_or_default();

        // A reply box lives inside the comment it answers
        let parent_comment_id = root
            .parent()
            .and_then(ElementRef::wrap)
            .and_then(|parent| comments.item.closest(parent))
            .map(|item| comment_id(item, "", ""));

        Some(CommentDraft {
            text,
            post_id,
            post_author,
            parent_comment_id,
            context: cx.context(),
            post_node: post.map(|p| p.id()),
            existing_comments,
        })
    }
}

/// Extracts a rendered comment item
#[derive(Debug, Default, Clone, Copy)]
pub struct CommentExtractor;

impl Extractor for CommentExtractor {
    type Output = CommentRecord;

    fn extract(&self, cx: &ExtractContext<'_>, root: Option<ElementRef<'_>>) -> Option<CommentRecord> {
        let root = root?;
        let comments = &cx.selectors.comment;

        let actor = extract_actor(
            cx,
            root,
            ActorGroups {
                name: &comments.author_name,
                link: &comments.author_link,
                headline: Some(&comments.author_headline),
            },
        )?;
        let text = first_text(root, &comments.text).unwrap_or_default();
        if text.is_empty() {
            return None;
        }

        let post = cx.selectors.post.container.closest(root);
        let post_id = post.and_then(post_urn);
        let post_author = post.and_then(|p| {
            let scope = cx.selectors.post.actor.first_match(p).unwrap_or(p);
            first_text(scope, &cx.selectors.post.actor_name).and_then(|n| super::clean_person_name(&n))
        });
        let parent_comment_id = root
            .parent()
            .and_then(ElementRef::wrap)
            .and_then(|parent| comments.item.closest(parent))
            .map(|item| comment_id(item, "", ""));

        let timestamp = resolve_timestamp(
            first_attr(root, &comments.timestamp, "datetime").as_deref(),
            first_text(root, &comments.timestamp).as_deref(),
            cx.now,
        );

        Some(CommentRecord {
            id: comment_id(root, &actor.name, &text),
            actor,
            timestamp,
            context: cx.context(),
            text,
            post_id,
            post_author,
            parent_comment_id,
            author_source: AuthorSource::Rendered,
        })
    }
}

fn comment_id(item: ElementRef<'_>, author: &str, text: &str) -> String {
    ["data-id", "data-urn", "data-comment-urn"]
        .iter()
        .filter_map(|attr| item.value().attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("comment-{}", short_hash(&format!("{}|{}|{:?}", author, text, item.id()))))
}

/// Find a newly rendered comment whose text matches what was submitted.
///
/// Comments in `exclude` were present before submission and are skipped.
pub fn find_comment_by_text<'a>(
    cx: &ExtractContext<'a>,
    scope: ElementRef<'a>,
    submitted: &str,
    exclude: &HashSet<NodeId>,
) -> Option<ElementRef<'a>> {
    let wanted = normalize_for_match(submitted);
    if wanted.is_empty() {
        return None;
    }

    let comments = &cx.selectors.comment;
    scope
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| comments.item.matches(el))
        .filter(|el| !exclude.contains(&el.id()))
        .find(|el| {
            let rendered = first_text(*el, &comments.text)
                .map(|t| normalize_for_match(&t))
                .unwrap_or_default();
            !rendered.is_empty() && (rendered == wanted || rendered.contains(&wanted))
        })
}
