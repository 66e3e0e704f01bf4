//! Extractors turn host markup into capture records.
//!
//! Every extractor follows the same shape:
//! 1. cascading fallback over the selector groups for each field
//! 2. a secondary structural strategy when the markup yields nothing
//! 3. sanitization of every extracted string
//! 4. validation: an identity field plus some content, otherwise `None`
//!
//! Extractors never panic and never return errors. Missing or malformed
//! markup is simply "nothing extracted".

pub mod author;
pub mod comment;
pub mod connection;
pub mod media;
pub mod message;
pub mod post;
pub mod sanitize;

pub use author::{clean_person_name, current_user};
pub use comment::{CommentBoxExtractor, CommentDraft, CommentExtractor};
pub use connection::{InvitationConfirmer, InviteSnapshot, InviteSnapshotExtractor};
pub use media::determine_media_type;
pub use message::{ComposerExtractor, ComposerSnapshot, ThreadConfirmer};
pub use post::PostExtractor;
pub use sanitize::{sanitize_composer_text, sanitize_text};

use crate::dom::Page;
use crate::selectors::{SelectorGroup, SelectorRegistry};
use crate::types::ActionContext;
use chrono::{DateTime, Duration, TimeZone, Utc};
use ego_tree::iter::Edge;
use ego_tree::NodeId;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html, Node};
use sha2::{Digest, Sha256};
use url::Url;

/// Everything an extractor may read besides its root element
pub struct ExtractContext<'a> {
    pub html: &'a Html,
    pub selectors: &'a SelectorRegistry,
    pub page_url: &'a str,
    pub now: DateTime<Utc>,
}

impl<'a> ExtractContext<'a> {
    pub fn new(html: &'a Html, selectors: &'a SelectorRegistry, page_url: &'a str) -> Self {
        Self {
            html,
            selectors,
            page_url,
            now: Utc::now(),
        }
    }

    /// Root element of the document, for page-wide lookups
    pub fn document(&self) -> ElementRef<'a> {
        self.html.root_element()
    }

    pub fn element(&self, node: NodeId) -> Option<ElementRef<'a>> {
        self.html.tree.get(node).and_then(ElementRef::wrap)
    }

    pub fn context(&self) -> ActionContext {
        classify_context(self.page_url)
    }
}

/// Common contract of all extractors
pub trait Extractor {
    type Output;

    /// Extract from `root`; `None` means nothing usable was found
    fn extract(&self, cx: &ExtractContext<'_>, root: Option<ElementRef<'_>>) -> Option<Self::Output>;
}

/// Run `extractor` against the live page, rooted at `node` when given
pub fn extract_at<E: Extractor>(
    page: &Page,
    selectors: &SelectorRegistry,
    extractor: &E,
    node: Option<NodeId>,
) -> Option<E::Output> {
    let url = page.url();
    page.with_html(|html| {
        let cx = ExtractContext::new(html, selectors, &url);
        let root = node.and_then(|n| cx.element(n));
        if node.is_some() && root.is_none() {
            // Root vanished between discovery and extraction
            return None;
        }
        extractor.extract(&cx, root)
    })
}

const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "section", "article",
    "blockquote", "tr", "td",
];

const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "svg"];

/// Visible text of an element, with block boundaries turned into spaces
pub fn visible_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    let mut skip_depth = 0usize;

    for edge in el.traverse() {
        match edge {
            Edge::Open(node) => match node.value() {
                Node::Element(e) if SKIPPED_ELEMENTS.contains(&e.name()) => skip_depth += 1,
                Node::Element(e) if BLOCK_ELEMENTS.contains(&e.name()) => out.push(' '),
                Node::Text(t) if skip_depth == 0 => out.push_str(t),
                _ => {}
            },
            Edge::Close(node) => {
                if let Node::Element(e) = node.value() {
                    if SKIPPED_ELEMENTS.contains(&e.name()) {
                        skip_depth = skip_depth.saturating_sub(1);
                    } else if BLOCK_ELEMENTS.contains(&e.name()) {
                        out.push(' ');
                    }
                }
            }
        }
    }

    sanitize_text(&out)
}

/// First non-empty sanitized text for `group` inside `scope`.
///
/// Alternatives are tried in priority order and every match of an
/// alternative is considered before moving to the next.
pub fn first_text(scope: ElementRef<'_>, group: &SelectorGroup) -> Option<String> {
    group.selectors().iter().find_map(|selector| {
        scope
            .select(selector)
            .map(visible_text)
            .find(|text| !text.is_empty())
    })
}

/// First non-empty value of `attr` for `group` inside `scope`
pub fn first_attr(scope: ElementRef<'_>, group: &SelectorGroup, attr: &str) -> Option<String> {
    group.selectors().iter().find_map(|selector| {
        scope
            .select(selector)
            .filter_map(|el| el.value().attr(attr))
            .map(str::trim)
            .find(|v| !v.is_empty())
            .map(str::to_string)
    })
}

/// Classify where an action happens from the page URL
pub fn classify_context(page_url: &str) -> ActionContext {
    let path = Url::parse(page_url)
        .map(|u| u.path().to_string())
        .unwrap_or_default();

    if path.starts_with("/feed/update/") || path.starts_with("/posts/") {
        ActionContext::SinglePost
    } else if path == "/" || path.starts_with("/feed") {
        ActionContext::Feed
    } else if path.starts_with("/in/") {
        ActionContext::Profile
    } else if path.starts_with("/search/") {
        ActionContext::Search
    } else if path.starts_with("/messaging") {
        ActionContext::MessagingPage
    } else if path.starts_with("/mynetwork") {
        ActionContext::MyNetwork
    } else if path.starts_with("/notifications") {
        ActionContext::Notifications
    } else if path.starts_with("/company/") {
        ActionContext::Company
    } else {
        ActionContext::Unknown
    }
}

/// Short stable identifier derived from content (12 hex chars)
pub fn short_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let hash = hasher.finalize();
    hash.iter().take(6).map(|b| format!("{:02x}", b)).collect()
}

/// Resolve `href` against the page URL, dropping query and fragment
pub fn absolute_url(page_url: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("javascript:") || href == "#" {
        return None;
    }

    let base = Url::parse(page_url).ok();
    let mut resolved = match base {
        Some(base) => base.join(href).ok()?,
        None => Url::parse(href).ok()?,
    };
    resolved.set_query(None);
    resolved.set_fragment(None);
    Some(resolved.to_string())
}

/// Scheme and host of the page, used to build permalinks
pub fn page_origin(page_url: &str) -> String {
    Url::parse(page_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| format!("{}://{}", u.scheme(), h)))
        .unwrap_or_else(|| "https://www.linkedin.com".to_string())
}

lazy_static! {
    // "3h", "2d", "1w", "5mo", "1yr", "30m", "12s", optionally followed by badges
    static ref RELATIVE_AGE: Regex = Regex::new(
        r"(?i)^\s*(\d+)\s*(mo|yr|y|w|d|h|m|s)\b"
    ).unwrap();
}

/// Parse a relative age badge into a duration
pub fn parse_relative_age(text: &str) -> Option<Duration> {
    let text = text.trim();
    let lower = text.to_lowercase();
    if lower.starts_with("now") || lower.starts_with("just now") {
        return Some(Duration::zero());
    }

    let caps = RELATIVE_AGE.captures(text)?;
    let amount: i64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str().to_lowercase();
    // Out-of-range amounts yield None rather than a panic
    match unit.as_str() {
        "s" => Duration::try_seconds(amount),
        "m" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        "w" => Duration::try_weeks(amount),
        "mo" => amount.checked_mul(30).and_then(Duration::try_days),
        "y" | "yr" => amount.checked_mul(365).and_then(Duration::try_days),
        _ => None,
    }
}

/// Resolve a record timestamp.
///
/// Tries an absolute `datetime` value (RFC 3339 or epoch milliseconds), then
/// a relative age badge, then falls back to capture time.
pub fn resolve_timestamp(
    absolute: Option<&str>,
    relative: Option<&str>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    if let Some(value) = absolute.map(str::trim).filter(|v| !v.is_empty()) {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
            return parsed.with_timezone(&Utc);
        }
        if let Ok(millis) = value.parse::<i64>() {
            if let Some(parsed) = Utc.timestamp_millis_opt(millis).single() {
                return parsed;
            }
        }
    }

    if let Some(then) = relative
        .and_then(parse_relative_age)
        .and_then(|age| now.checked_sub_signed(age))
    {
        return then;
    }

    now
}
