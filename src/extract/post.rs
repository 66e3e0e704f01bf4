//! Feed post extraction.

use super::author::{extract_actor, ActorGroups};
use super::media::{determine_media_type, image_item, is_content_image};
use super::{
    absolute_url, first_attr, first_text, page_origin, resolve_timestamp, sanitize_text,
    short_hash, visible_text, ExtractContext, Extractor,
};
use crate::types::{ActionContext, Actor, MediaItem, MediaItemType, PostRecord};
use scraper::ElementRef;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, trace};

/// Extracts a [`PostRecord`] from a post container
#[derive(Debug, Default, Clone, Copy)]
pub struct PostExtractor;

impl Extractor for PostExtractor {
    type Output = PostRecord;

    fn extract(&self, cx: &ExtractContext<'_>, root: Option<ElementRef<'_>>) -> Option<PostRecord> {
        let context = cx.context();
        match root {
            Some(root) => extract_from_container(cx, root, context).or_else(|| {
                trace!("Post markup incomplete, trying JSON-LD");
                extract_from_json_ld(cx, context)
            }),
            // Single post pages carry the whole post as JSON-LD
            None if context == ActionContext::SinglePost => extract_from_json_ld(cx, context),
            None => None,
        }
    }
}

/// Platform identifier of a post container, if it carries one
pub fn post_urn(root: ElementRef<'_>) -> Option<String> {
    let mut current = Some(root);
    while let Some(el) = current {
        for attr in ["data-urn", "data-id", "data-activity-urn"] {
            if let Some(value) = el.value().attr(attr).map(str::trim) {
                if value.starts_with("urn:li:") {
                    return Some(value.to_string());
                }
            }
        }
        current = el.parent().and_then(ElementRef::wrap);
    }
    None
}

fn extract_from_container(
    cx: &ExtractContext<'_>,
    root: ElementRef<'_>,
    context: ActionContext,
) -> Option<PostRecord> {
    let posts = &cx.selectors.post;

    let actor_scope = posts.actor.first_match(root).unwrap_or(root);
    let actor = extract_actor(
        cx,
        actor_scope,
        ActorGroups {
            name: &posts.actor_name,
            link: &posts.actor_link,
            headline: Some(&posts.actor_headline),
        },
    )?;

    let text = first_text(root, &posts.text).unwrap_or_default();
    let content = collect_content(cx, root, &text);
    if content.is_empty() {
        debug!("Post by {} has no content, discarding", actor.name);
        return None;
    }

    let id = post_urn(root).unwrap_or_else(|| {
        format!("post-{}", short_hash(&format!("{}|{}", actor.name, text)))
    });
    let url = permalink(cx.page_url, &id);

    let timestamp = resolve_timestamp(
        first_attr(root, &posts.timestamp, "datetime")
            .or_else(|| first_attr(root, &posts.timestamp, "data-timestamp"))
            .as_deref(),
        first_text(root, &posts.relative_time).as_deref(),
        cx.now,
    );

    Some(PostRecord {
        id,
        actor,
        timestamp,
        context,
        media_type: determine_media_type(&content),
        text,
        content,
        url,
    })
}

/// Ordered content list: text first, then media in a fixed order
fn collect_content(cx: &ExtractContext<'_>, root: ElementRef<'_>, text: &str) -> Vec<MediaItem> {
    let posts = &cx.selectors.post;
    let mut content: Vec<MediaItem> = Vec::new();

    if let Some(item) = MediaItem::new(MediaItemType::Text, text) {
        content.push(item);
    }

    // Images inside the actor lockup are avatars, never content
    let actor_images: HashSet<_> = posts
        .actor
        .first_match(root)
        .map(|actor| {
            actor
                .descendants()
                .filter_map(ElementRef::wrap)
                .map(|el| el.id())
                .collect()
        })
        .unwrap_or_default();

    // A carousel's slides become one item rather than separate images
    let carousel = posts.carousel.first_match(root);
    let mut carousel_images = HashSet::new();
    if let Some(carousel) = carousel {
        let slides: Vec<String> = carousel
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|el| el.value().name() == "img" && is_content_image(el))
            .filter_map(|img| {
                carousel_images.insert(img.id());
                super::media::image_source(&img)
            })
            .collect();
        if let Some(first) = slides.first() {
            if let Some(item) = MediaItem::new(MediaItemType::Carousel, first.clone()) {
                content.push(item.with_meta("slides", slides.len().to_string()));
            }
        }
    }

    let mut seen_src = HashSet::new();
    for img in posts.image.all_matches(root) {
        if actor_images.contains(&img.id()) || carousel_images.contains(&img.id()) {
            continue;
        }
        if !is_content_image(&img) {
            continue;
        }
        if let Some(item) = image_item(&img) {
            if seen_src.insert(item.data.clone()) {
                content.push(item);
            }
        }
    }

    for video in posts.video.all_matches(root) {
        let source = video
            .value()
            .attr("src")
            .or_else(|| {
                video
                    .children()
                    .filter_map(ElementRef::wrap)
                    .find(|c| c.value().name() == "source")
                    .and_then(|s| s.value().attr("src"))
            })
            .or_else(|| video.value().attr("poster"));
        if let Some(item) = source.and_then(|s| MediaItem::new(MediaItemType::Video, s)) {
            let poster = video.value().attr("poster").unwrap_or("");
            content.push(item.with_meta("poster", poster));
            break;
        }
    }

    if let Some(doc) = posts.document.first_match(root) {
        let title = doc
            .value()
            .attr("aria-label")
            .map(sanitize_text)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| visible_text(doc));
        let iframe_src = doc
            .descendants()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "iframe")
            .and_then(|f| f.value().attr("src").or_else(|| f.value().attr("data-src")))
            .map(str::to_string);
        let data = iframe_src.clone().unwrap_or_else(|| title.clone());
        if let Some(item) = MediaItem::new(MediaItemType::Document, data) {
            content.push(item.with_meta("title", title));
        }
    }

    if let Some(href) = first_attr(root, &posts.article, "href") {
        if let Some(link) = absolute_url(cx.page_url, &href) {
            let title = first_text(root, &posts.article_title).unwrap_or_default();
            if let Some(item) = MediaItem::new(MediaItemType::Article, link) {
                content.push(item.with_meta("title", title));
            }
        }
    }

    if let Some(poll) = posts.poll.first_match(root) {
        let question = first_text(poll, &posts.poll_question).unwrap_or_default();
        let options: Vec<String> = posts
            .poll_option
            .all_matches(poll)
            .into_iter()
            .map(visible_text)
            .filter(|o| !o.is_empty())
            .collect();
        let data = if question.is_empty() { options.join(" | ") } else { question };
        if let Some(item) = MediaItem::new(MediaItemType::Poll, data) {
            content.push(item.with_meta("options", options.join(" | ")));
        }
    }

    content
}

fn permalink(page_url: &str, id: &str) -> Option<String> {
    if id.starts_with("urn:li:") {
        Some(format!("{}/feed/update/{}/", page_origin(page_url), id))
    } else {
        None
    }
}

/// Fallback: `SocialMediaPosting` JSON-LD embedded in the document
fn extract_from_json_ld(cx: &ExtractContext<'_>, context: ActionContext) -> Option<PostRecord> {
    for selector in cx.selectors.post.json_ld.selectors() {
        for script in cx.document().select(selector) {
            let raw: String = script.text().collect();
            let Ok(json) = serde_json::from_str::<Value>(raw.trim()) else {
                continue;
            };
            if let Some(record) = find_posting(&json).and_then(|p| posting_to_record(cx, p, context)) {
                debug!("Post {} extracted from JSON-LD", record.id);
                return Some(record);
            }
        }
    }
    None
}

fn find_posting(value: &Value) -> Option<&Value> {
    match value {
        Value::Object(map) => {
            let is_posting = match map.get("@type") {
                Some(Value::String(t)) => t == "SocialMediaPosting" || t == "DiscussionForumPosting",
                Some(Value::Array(types)) => types
                    .iter()
                    .any(|t| t.as_str() == Some("SocialMediaPosting")),
                _ => false,
            };
            if is_posting {
                return Some(value);
            }
            map.get("@graph").and_then(find_posting)
        }
        Value::Array(items) => items.iter().find_map(find_posting),
        _ => None,
    }
}

fn posting_to_record(cx: &ExtractContext<'_>, posting: &Value, context: ActionContext) -> Option<PostRecord> {
    let author = posting.get("author");
    let author = match author {
        Some(Value::Array(list)) => list.first(),
        other => other,
    }?;
    let name = author
        .get("name")
        .and_then(Value::as_str)
        .and_then(super::clean_person_name)?;
    let profile_url = author
        .get("url")
        .and_then(Value::as_str)
        .and_then(|u| absolute_url(cx.page_url, u));

    let text = posting
        .get("articleBody")
        .or_else(|| posting.get("text"))
        .or_else(|| posting.get("description"))
        .and_then(Value::as_str)
        .map(sanitize_text)
        .unwrap_or_default();

    let mut content = Vec::new();
    if let Some(item) = MediaItem::new(MediaItemType::Text, text.clone()) {
        content.push(item);
    }
    let images: Vec<&str> = match posting.get("image") {
        Some(Value::String(url)) => vec![url.as_str()],
        Some(Value::Object(obj)) => obj.get("url").and_then(Value::as_str).into_iter().collect(),
        Some(Value::Array(list)) => list
            .iter()
            .filter_map(|i| i.as_str().or_else(|| i.get("url").and_then(Value::as_str)))
            .collect(),
        _ => Vec::new(),
    };
    content.extend(images.into_iter().filter_map(|u| MediaItem::new(MediaItemType::Image, u)));
    if content.is_empty() {
        return None;
    }

    let url = posting
        .get("url")
        .or_else(|| posting.get("@id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| Some(cx.page_url.to_string()));
    let id = posting
        .get("identifier")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("post-{}", short_hash(&format!("{}|{}", name, text))));
    let timestamp = resolve_timestamp(
        posting.get("datePublished").and_then(Value::as_str),
        None,
        cx.now,
    );

    Some(PostRecord {
        id,
        actor: Actor::named(name).with_profile_url(profile_url),
        timestamp,
        context,
        media_type: determine_media_type(&content),
        text,
        content,
        url,
    })
}
