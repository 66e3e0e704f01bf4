//! Author, recipient and current-user resolution.

use super::{absolute_url, first_attr, first_text, page_origin, sanitize_text, ExtractContext};
use crate::selectors::SelectorGroup;
use crate::types::Actor;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::ElementRef;
use serde_json::Value;
use tracing::{debug, trace};

lazy_static! {
    // Connection degree and pronoun badges appended to rendered names
    static ref NAME_BADGES: Regex = Regex::new(
        r"(?i)\s*(?:•|·)\s*(?:1st|2nd|3rd\+?|out of network).*$"
    ).unwrap();

    static ref PRONOUNS: Regex = Regex::new(
        r"(?i)\s*\((?:she|he|they|ze)/[a-z]+(?:/[a-z]+)?\)"
    ).unwrap();

    static ref VIEW_PROFILE: Regex = Regex::new(
        r"(?i)^view\s+(.+?)['’]s?\s+(?:verified\s+)?profile$"
    ).unwrap();

    static ref STATUS_SUFFIX: Regex = Regex::new(
        r"(?i)\s*(?:status is (?:online|offline|reachable)|verified|premium member)\s*$"
    ).unwrap();

    static ref PHOTO_OF: Regex = Regex::new(r"(?i)^(?:photo of|profile photo of)\s+").unwrap();
}

/// Normalize a rendered person name, or `None` when nothing usable remains
pub fn clean_person_name(raw: &str) -> Option<String> {
    let mut name = sanitize_text(raw);

    if let Some(caps) = VIEW_PROFILE.captures(&name) {
        name = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
    }
    name = PHOTO_OF.replace(&name, "").into_owned();
    name = NAME_BADGES.replace(&name, "").into_owned();
    name = PRONOUNS.replace_all(&name, "").into_owned();
    loop {
        let stripped = STATUS_SUFFIX.replace(&name, "").into_owned();
        if stripped == name {
            break;
        }
        name = stripped;
    }

    let name = sanitize_text(&name);
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Selector groups that describe one person lockup
pub struct ActorGroups<'a> {
    pub name: &'a SelectorGroup,
    pub link: &'a SelectorGroup,
    pub headline: Option<&'a SelectorGroup>,
}

/// Resolve a person from a lockup inside `scope`
pub fn extract_actor(cx: &ExtractContext<'_>, scope: ElementRef<'_>, groups: ActorGroups<'_>) -> Option<Actor> {
    let name = first_text(scope, groups.name).and_then(|n| clean_person_name(&n))?;
    let profile_url = first_attr(scope, groups.link, "href").and_then(|h| absolute_url(cx.page_url, &h));
    let headline = groups.headline.and_then(|g| first_text(scope, g));

    Some(Actor::named(name).with_profile_url(profile_url).with_headline(headline))
}

/// Resolve the logged-in user.
///
/// Navigation markup first, then the profile JSON the host embeds in
/// hidden `<code>` blocks.
pub fn current_user(cx: &ExtractContext<'_>) -> Option<Actor> {
    from_navigation(cx).or_else(|| from_embedded_profile(cx))
}

fn from_navigation(cx: &ExtractContext<'_>) -> Option<Actor> {
    let nav = &cx.selectors.navigation;
    let doc = cx.document();

    let name = first_text(doc, &nav.me_name)
        .or_else(|| first_attr(doc, &nav.me_photo, "alt"))
        .and_then(|n| clean_person_name(&n))?;
    let profile_url = first_attr(doc, &nav.me_link, "href").and_then(|h| absolute_url(cx.page_url, &h));

    trace!("Current user from navigation: {}", name);
    Some(Actor::named(name).with_profile_url(profile_url))
}

fn from_embedded_profile(cx: &ExtractContext<'_>) -> Option<Actor> {
    let group = &cx.selectors.navigation.embedded_data;
    for selector in group.selectors() {
        for block in cx.document().select(selector) {
            let raw: String = block.text().collect();
            let Ok(json) = serde_json::from_str::<Value>(raw.trim()) else {
                continue;
            };
            if let Some(actor) = find_mini_profile(&json, cx.page_url) {
                debug!("Current user from embedded profile data: {}", actor.name);
                return Some(actor);
            }
        }
    }
    None
}

/// Depth-first search for a mini profile object in embedded page data
fn find_mini_profile(value: &Value, page_url: &str) -> Option<Actor> {
    match value {
        Value::Object(map) => {
            if let Some(profile) = map.get("miniProfile") {
                if let Some(actor) = actor_from_profile(profile, page_url) {
                    return Some(actor);
                }
            }
            let is_profile_type = map
                .get("$type")
                .and_then(Value::as_str)
                .map(|t| t.ends_with("MiniProfile"))
                .unwrap_or(false);
            if is_profile_type {
                if let Some(actor) = actor_from_profile(value, page_url) {
                    return Some(actor);
                }
            }
            map.values().find_map(|v| find_mini_profile(v, page_url))
        }
        Value::Array(items) => items.iter().find_map(|v| find_mini_profile(v, page_url)),
        _ => None,
    }
}

fn actor_from_profile(profile: &Value, page_url: &str) -> Option<Actor> {
    let first = profile.get("firstName").and_then(Value::as_str).unwrap_or("");
    let last = profile.get("lastName").and_then(Value::as_str).unwrap_or("");
    let name = clean_person_name(&format!("{} {}", first, last))?;

    let profile_url = profile
        .get("publicIdentifier")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(|id| format!("{}/in/{}/", page_origin(page_url), id));
    let headline = profile
        .get("occupation")
        .and_then(Value::as_str)
        .map(sanitize_text)
        .filter(|h| !h.is_empty());

    Some(Actor::named(name).with_profile_url(profile_url).with_headline(headline))
}
