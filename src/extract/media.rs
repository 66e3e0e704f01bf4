//! Media items: type aggregation and image filtering.

use crate::types::{MediaItem, MediaItemType, MediaType};
use scraper::ElementRef;

/// Aggregate media type of a content list.
///
/// `text` for no items, the item's own type for exactly one, `mixed` otherwise.
pub fn determine_media_type(items: &[MediaItem]) -> MediaType {
    match items {
        [] => MediaType::Text,
        [only] => only.item_type.into(),
        _ => MediaType::Mixed,
    }
}

/// Class fragments marking avatars, logos and other chrome around content images
const DECORATIVE_IMAGE_MARKERS: &[&str] = &[
    "avatar",
    "EntityPhoto",
    "ghost-person",
    "presence-entity",
    "actor__avatar",
    "ivm-view-attr__img--centered",
    "reactions-icon",
    "emoji",
];

/// Whether an `<img>` is post content rather than decoration
pub fn is_content_image(img: &ElementRef<'_>) -> bool {
    let Some(src) = image_source(img) else {
        return false;
    };
    if src.starts_with("data:") {
        return false;
    }

    let class = img.value().attr("class").unwrap_or("");
    if DECORATIVE_IMAGE_MARKERS.iter().any(|m| class.contains(m)) {
        return false;
    }

    // Icons are rendered tiny and carry explicit dimensions
    let tiny = |attr: &str| {
        img.value()
            .attr(attr)
            .and_then(|v| v.parse::<u32>().ok())
            .map(|v| v < 48)
            .unwrap_or(false)
    };
    !(tiny("width") && tiny("height"))
}

/// Image URL, preferring the lazy-load attribute the host swaps in later
pub fn image_source(img: &ElementRef<'_>) -> Option<String> {
    ["src", "data-delayed-url", "data-src"]
        .iter()
        .filter_map(|attr| img.value().attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Build an image item carrying its alt text as metadata
pub fn image_item(img: &ElementRef<'_>) -> Option<MediaItem> {
    let src = image_source(img)?;
    let alt = img.value().attr("alt").unwrap_or("").trim().to_string();
    Some(MediaItem::new(MediaItemType::Image, src)?.with_meta("alt", alt))
}
