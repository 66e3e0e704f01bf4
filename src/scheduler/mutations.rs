//! Cheap structural filter applied to mutation batches.
//!
//! The host page mutates constantly while scrolling. Only added subtrees that
//! contain a known interactive surface are worth a (debounced) rescan.

use crate::selectors::{SelectorGroup, SelectorRegistry};
use ego_tree::NodeId;
use scraper::{ElementRef, Html};
use serde::Serialize;
use std::collections::BTreeSet;

/// Interactive surfaces the trackers care about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceKind {
    Posts,
    Comments,
    Messaging,
    Connection,
}

impl SurfaceKind {
    pub const ALL: [SurfaceKind; 4] = [
        SurfaceKind::Posts,
        SurfaceKind::Comments,
        SurfaceKind::Messaging,
        SurfaceKind::Connection,
    ];

    pub fn all() -> BTreeSet<SurfaceKind> {
        Self::ALL.into_iter().collect()
    }
}

/// Maps added subtrees to the surfaces they contain
pub struct MutationFilter {
    watches: Vec<(SurfaceKind, SelectorGroup)>,
}

impl MutationFilter {
    pub fn new(selectors: &SelectorRegistry) -> Self {
        let watches = vec![
            (SurfaceKind::Posts, selectors.post.container.clone()),
            (SurfaceKind::Comments, selectors.comment.comment_box.clone()),
            (SurfaceKind::Comments, selectors.comment.submit_button.clone()),
            (SurfaceKind::Messaging, selectors.messaging.surface.clone()),
            (SurfaceKind::Messaging, selectors.messaging.composer.clone()),
            (SurfaceKind::Messaging, selectors.messaging.send_button.clone()),
            (SurfaceKind::Connection, selectors.connection.modal.clone()),
            (SurfaceKind::Connection, selectors.connection.connect_button.clone()),
            (SurfaceKind::Connection, selectors.connection.card.clone()),
        ];
        Self { watches }
    }

    /// Surfaces present in (or at the root of) any of the added subtrees
    pub fn classify(&self, html: &Html, added: &[NodeId]) -> BTreeSet<SurfaceKind> {
        let mut found = BTreeSet::new();
        for node in added {
            // Text nodes match nothing
            let Some(el) = html.tree.get(*node).and_then(ElementRef::wrap) else {
                continue;
            };
            for (kind, group) in &self.watches {
                if found.contains(kind) {
                    continue;
                }
                if group.matches(&el) || group.first_match(el).is_some() {
                    found.insert(*kind);
                }
            }
            if found.len() == SurfaceKind::ALL.len() {
                break;
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Page;
    use scraper::Selector;

    #[test]
    fn test_noise_is_filtered() {
        let page = Page::new("https://www.linkedin.com/feed/", "<html><body><main></main></body></html>");
        let main = page.query_first(&Selector::parse("main").unwrap()).unwrap();
        let filter = MutationFilter::new(&SelectorRegistry::default());

        let added = page.insert_html(main, r#"<div class="ad-banner"><span>Promoted</span></div>"#);
        assert!(page.with_html(|html| filter.classify(html, &added)).is_empty());
    }

    #[test]
    fn test_nested_surfaces_are_found() {
        let page = Page::new("https://www.linkedin.com/feed/", "<html><body><main></main></body></html>");
        let main = page.query_first(&Selector::parse("main").unwrap()).unwrap();
        let filter = MutationFilter::new(&SelectorRegistry::default());

        let added = page.insert_html(
            main,
            r#"<div class="scaffold"><div class="feed-shared-update-v2" data-urn="urn:li:activity:1"></div></div>
               <aside><div class="msg-overlay-conversation-bubble"></div></aside>"#,
        );
        let kinds = page.with_html(|html| filter.classify(html, &added));
        assert_eq!(
            kinds.into_iter().collect::<Vec<_>>(),
            vec![SurfaceKind::Posts, SurfaceKind::Messaging]
        );
    }
}
