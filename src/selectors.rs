//! Selector registry.
//!
//! Every markup-dependent lookup string lives here, grouped by feature. Each
//! group is a prioritized list of alternative selectors because the host
//! markup ships several historical and A/B variants at once. A markup change
//! should only ever require editing this table (or overriding a group from
//! the config file), never the extraction logic.

use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Version of the built-in selector tables
pub const REGISTRY_VERSION: &str = "2024.11";

/// A named, prioritized list of alternative selectors
#[derive(Debug, Clone)]
pub struct SelectorGroup {
    name: String,
    sources: Vec<String>,
    compiled: Vec<Selector>,
}

impl SelectorGroup {
    /// Compile a group, dropping (and logging) alternatives that do not parse
    pub fn new(name: &str, sources: &[&str]) -> Self {
        let sources: Vec<String> = sources.iter().map(|s| s.to_string()).collect();
        Self::from_sources(name, sources)
    }

    fn from_sources(name: &str, sources: Vec<String>) -> Self {
        let mut kept = Vec::with_capacity(sources.len());
        let mut compiled = Vec::with_capacity(sources.len());
        for source in sources {
            let parsed = Selector::parse(&source).map_err(|e| format!("{:?}", e));
            match parsed {
                Ok(selector) => {
                    compiled.push(selector);
                    kept.push(source);
                }
                Err(e) => {
                    warn!("Invalid selector '{}' in group {}: {}", source, name, e);
                }
            }
        }

        Self {
            name: name.to_string(),
            sources: kept,
            compiled,
        }
    }

    /// Put `extra` alternatives ahead of the built-in ones
    pub fn with_overrides(&self, extra: &[String]) -> Self {
        let mut sources = extra.to_vec();
        sources.extend(self.sources.iter().cloned());
        Self::from_sources(&self.name, sources)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn selectors(&self) -> &[Selector] {
        &self.compiled
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }

    /// First match inside `scope`, trying alternatives in priority order
    pub fn first_match<'a>(&self, scope: ElementRef<'a>) -> Option<ElementRef<'a>> {
        self.compiled
            .iter()
            .find_map(|selector| scope.select(selector).next())
    }

    /// Every match of the first alternative that matches anything.
    ///
    /// Later alternatives are not consulted once one has matched, so two
    /// variants describing the same subtree never yield duplicates.
    pub fn all_matches<'a>(&self, scope: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        for selector in &self.compiled {
            let found: Vec<ElementRef<'a>> = scope.select(selector).collect();
            if !found.is_empty() {
                return found;
            }
        }
        Vec::new()
    }

    /// Whether `element` itself matches any alternative
    pub fn matches(&self, element: &ElementRef<'_>) -> bool {
        self.compiled.iter().any(|selector| selector.matches(element))
    }

    /// Nearest inclusive ancestor matching any alternative
    pub fn closest<'a>(&self, element: ElementRef<'a>) -> Option<ElementRef<'a>> {
        let mut current = Some(element);
        while let Some(el) = current {
            if self.matches(&el) {
                return Some(el);
            }
            current = el.parent().and_then(ElementRef::wrap);
        }
        None
    }

    /// Ids of every element inside `scope` matching any alternative
    pub fn find_all_within(&self, scope: ElementRef<'_>) -> HashSet<ego_tree::NodeId> {
        scope
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|el| self.matches(el))
            .map(|el| el.id())
            .collect()
    }

    /// Every element attached to the document that matches any alternative,
    /// in document order.
    ///
    /// Walks from the tree root, so subtrees detached by a removal are never
    /// reported even though their nodes stay in the arena.
    pub fn find_in_document(&self, html: &Html) -> Vec<ego_tree::NodeId> {
        html.tree
            .root()
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|el| self.matches(el))
            .map(|el| el.id())
            .collect()
    }
}

/// Feed post selectors
#[derive(Debug, Clone)]
pub struct PostSelectors {
    pub container: SelectorGroup,
    pub actor: SelectorGroup,
    pub actor_name: SelectorGroup,
    pub actor_link: SelectorGroup,
    pub actor_headline: SelectorGroup,
    pub text: SelectorGroup,
    pub timestamp: SelectorGroup,
    pub relative_time: SelectorGroup,
    pub image: SelectorGroup,
    pub video: SelectorGroup,
    pub document: SelectorGroup,
    pub article: SelectorGroup,
    pub article_title: SelectorGroup,
    pub poll: SelectorGroup,
    pub poll_question: SelectorGroup,
    pub poll_option: SelectorGroup,
    pub carousel: SelectorGroup,
    pub json_ld: SelectorGroup,
}

impl Default for PostSelectors {
    fn default() -> Self {
        Self {
            container: SelectorGroup::new(
                "post.container",
                &[
                    "div.feed-shared-update-v2[data-urn]",
                    "div[data-urn^='urn:li:activity:']",
                    "div[data-id^='urn:li:activity:']",
                    "div.occludable-update",
                    "article.feed-shared-update-v2",
                ],
            ),
            actor: SelectorGroup::new(
                "post.actor",
                &[
                    ".update-components-actor",
                    ".feed-shared-actor",
                    ".update-components-actor__container",
                ],
            ),
            actor_name: SelectorGroup::new(
                "post.actor_name",
                &[
                    ".update-components-actor__title span[aria-hidden='true']",
                    ".update-components-actor__name span[aria-hidden='true']",
                    ".update-components-actor__name",
                    ".feed-shared-actor__name",
                    ".update-components-actor__title",
                ],
            ),
            actor_link: SelectorGroup::new(
                "post.actor_link",
                &[
                    "a.update-components-actor__meta-link",
                    "a.update-components-actor__image",
                    "a.feed-shared-actor__container-link",
                    ".update-components-actor a[href*='/in/']",
                    ".update-components-actor a[href*='/company/']",
                ],
            ),
            actor_headline: SelectorGroup::new(
                "post.actor_headline",
                &[
                    ".update-components-actor__description span[aria-hidden='true']",
                    ".update-components-actor__description",
                    ".feed-shared-actor__description",
                ],
            ),
            text: SelectorGroup::new(
                "post.text",
                &[
                    ".update-components-text",
                    ".feed-shared-update-v2__description",
                    ".feed-shared-text",
                    ".feed-shared-inline-show-more-text",
                ],
            ),
            timestamp: SelectorGroup::new(
                "post.timestamp",
                &["time[datetime]", "[data-timestamp]"],
            ),
            relative_time: SelectorGroup::new(
                "post.relative_time",
                &[
                    ".update-components-actor__sub-description span[aria-hidden='true']",
                    ".update-components-actor__sub-description",
                    ".feed-shared-actor__sub-description",
                ],
            ),
            image: SelectorGroup::new(
                "post.image",
                &[
                    ".update-components-image img",
                    ".feed-shared-image img",
                    ".update-components-image__container img",
                    ".feed-shared-image__container img",
                ],
            ),
            video: SelectorGroup::new(
                "post.video",
                &[
                    ".update-components-linkedin-video video",
                    ".feed-shared-linkedin-video video",
                    "video",
                ],
            ),
            document: SelectorGroup::new(
                "post.document",
                &[
                    ".update-components-document__container",
                    ".feed-shared-document__container",
                    ".document-s-container",
                ],
            ),
            article: SelectorGroup::new(
                "post.article",
                &[
                    ".update-components-article a[href]",
                    ".feed-shared-article a[href]",
                    ".update-components-article__meta a[href]",
                ],
            ),
            article_title: SelectorGroup::new(
                "post.article_title",
                &[
                    ".update-components-article__title",
                    ".feed-shared-article__title",
                ],
            ),
            poll: SelectorGroup::new(
                "post.poll",
                &[".update-components-poll", ".feed-shared-poll"],
            ),
            poll_question: SelectorGroup::new(
                "post.poll_question",
                &[
                    ".update-components-poll__question",
                    ".feed-shared-poll__question",
                ],
            ),
            poll_option: SelectorGroup::new(
                "post.poll_option",
                &[
                    ".update-components-poll-option__text",
                    ".feed-shared-poll-option__text",
                    ".update-components-poll-option",
                ],
            ),
            carousel: SelectorGroup::new(
                "post.carousel",
                &[
                    ".update-components-carousel",
                    ".feed-shared-carousel",
                    ".update-components-image--carousel",
                ],
            ),
            json_ld: SelectorGroup::new(
                "post.json_ld",
                &["script[type='application/ld+json']"],
            ),
        }
    }
}

/// Comment box and rendered comment selectors
#[derive(Debug, Clone)]
pub struct CommentSelectors {
    pub comment_box: SelectorGroup,
    pub form: SelectorGroup,
    pub editor: SelectorGroup,
    pub submit_button: SelectorGroup,
    pub comments_list: SelectorGroup,
    pub item: SelectorGroup,
    pub author_name: SelectorGroup,
    pub author_link: SelectorGroup,
    pub author_headline: SelectorGroup,
    pub text: SelectorGroup,
    pub timestamp: SelectorGroup,
}

impl Default for CommentSelectors {
    fn default() -> Self {
        Self {
            comment_box: SelectorGroup::new(
                "comment.box",
                &[
                    ".comments-comment-box",
                    ".comments-comment-texteditor",
                    ".comments-comment-box--cr",
                ],
            ),
            form: SelectorGroup::new(
                "comment.form",
                &["form.comments-comment-box__form", ".comments-comment-box form"],
            ),
            editor: SelectorGroup::new(
                "comment.editor",
                &[
                    ".comments-comment-box__form .ql-editor",
                    ".comments-comment-texteditor .ql-editor",
                    ".ql-editor[contenteditable='true']",
                    "div[contenteditable='true'][role='textbox']",
                ],
            ),
            submit_button: SelectorGroup::new(
                "comment.submit_button",
                &[
                    "button.comments-comment-box__submit-button",
                    "button.comments-comment-box__submit-button--cr",
                    ".comments-comment-box button[type='submit']",
                ],
            ),
            comments_list: SelectorGroup::new(
                "comment.list",
                &[
                    ".comments-comments-list",
                    ".comments-comment-list__container",
                    ".comments-container",
                ],
            ),
            item: SelectorGroup::new(
                "comment.item",
                &[
                    "article.comments-comment-entity",
                    "article.comments-comment-item",
                    "[data-id^='urn:li:comment:']",
                ],
            ),
            author_name: SelectorGroup::new(
                "comment.author_name",
                &[
                    ".comments-comment-meta__description-title",
                    ".comments-post-meta__name-text span[aria-hidden='true']",
                    ".comments-post-meta__name-text",
                ],
            ),
            author_link: SelectorGroup::new(
                "comment.author_link",
                &[
                    "a.comments-comment-meta__description-container",
                    "a.comments-post-meta__actor-link",
                    "a.comments-post-meta__image-link",
                    "a[href*='/in/']",
                ],
            ),
            author_headline: SelectorGroup::new(
                "comment.author_headline",
                &[
                    ".comments-comment-meta__description-subtitle",
                    ".comments-post-meta__headline",
                ],
            ),
            text: SelectorGroup::new(
                "comment.text",
                &[
                    ".comments-comment-item__main-content",
                    ".comments-comment-item-content-body",
                    ".update-components-text",
                ],
            ),
            timestamp: SelectorGroup::new(
                "comment.timestamp",
                &[
                    "time[datetime]",
                    "time.comments-comment-meta__data",
                    ".comments-comment-item__timestamp",
                ],
            ),
        }
    }
}

/// Messaging overlay and full-page messaging selectors
#[derive(Debug, Clone)]
pub struct MessagingSelectors {
    pub surface: SelectorGroup,
    pub overlay: SelectorGroup,
    pub composer: SelectorGroup,
    pub form: SelectorGroup,
    pub send_button: SelectorGroup,
    pub recipient_name: SelectorGroup,
    pub recipient_link: SelectorGroup,
    pub recipient_headline: SelectorGroup,
    pub participants: SelectorGroup,
    pub attachment_preview: SelectorGroup,
    pub attachment_image: SelectorGroup,
    pub attachment_file_name: SelectorGroup,
    pub message_list: SelectorGroup,
    pub message_item: SelectorGroup,
    pub message_body: SelectorGroup,
    pub message_sender: SelectorGroup,
    pub message_time: SelectorGroup,
    pub message_attachment: SelectorGroup,
}

impl Default for MessagingSelectors {
    fn default() -> Self {
        Self {
            surface: SelectorGroup::new(
                "messaging.surface",
                &[
                    ".msg-overlay-conversation-bubble",
                    ".msg-convo-wrapper",
                    ".msg-thread",
                    ".msg-s-message-list-container",
                ],
            ),
            overlay: SelectorGroup::new(
                "messaging.overlay",
                &[".msg-overlay-conversation-bubble", ".msg-overlay-container"],
            ),
            composer: SelectorGroup::new(
                "messaging.composer",
                &[
                    ".msg-form__contenteditable",
                    "div.msg-form__message-texteditor [contenteditable='true']",
                    ".msg-form [contenteditable='true']",
                    ".msg-form__msg-content-container",
                ],
            ),
            form: SelectorGroup::new("messaging.form", &["form.msg-form", ".msg-form form"]),
            send_button: SelectorGroup::new(
                "messaging.send_button",
                &[
                    "button.msg-form__send-button",
                    "button.msg-form__send-btn",
                    ".msg-form__right-actions button[type='submit']",
                ],
            ),
            recipient_name: SelectorGroup::new(
                "messaging.recipient_name",
                &[
                    ".msg-overlay-bubble-header__title",
                    ".msg-entity-lockup__entity-title",
                    "h2.msg-entity-lockup__entity-title",
                    "#thread-detail-jump-target",
                    ".msg-thread__link-to-profile .t-bold",
                ],
            ),
            recipient_link: SelectorGroup::new(
                "messaging.recipient_link",
                &[
                    "a.msg-thread__link-to-profile",
                    ".msg-overlay-bubble-header__title a[href]",
                    ".msg-entity-lockup a[href*='/in/']",
                ],
            ),
            recipient_headline: SelectorGroup::new(
                "messaging.recipient_headline",
                &[
                    ".msg-entity-lockup__entity-info",
                    ".msg-overlay-bubble-header__subtitle",
                ],
            ),
            participants: SelectorGroup::new(
                "messaging.participants",
                &[
                    ".msg-facepile-grid img[alt]",
                    ".msg-overlay-bubble-header__participants li",
                    ".msg-thread__participants li",
                ],
            ),
            attachment_preview: SelectorGroup::new(
                "messaging.attachment_preview",
                &[
                    ".msg-form__attachment-preview",
                    ".msg-attachment-preview",
                    ".msg-form__attachments li",
                ],
            ),
            attachment_image: SelectorGroup::new("messaging.attachment_image", &["img[src]"]),
            attachment_file_name: SelectorGroup::new(
                "messaging.attachment_file_name",
                &[
                    ".msg-attachment-preview__name",
                    ".msg-form__attachment-name",
                    ".ui-attachment__filename",
                ],
            ),
            message_list: SelectorGroup::new(
                "messaging.message_list",
                &[".msg-s-message-list-content", ".msg-s-message-list", "ul.msg-s-message-list-content"],
            ),
            message_item: SelectorGroup::new(
                "messaging.message_item",
                &[
                    "li.msg-s-message-list__event",
                    ".msg-s-event-listitem",
                    "[data-event-urn]",
                ],
            ),
            message_body: SelectorGroup::new(
                "messaging.message_body",
                &[
                    ".msg-s-event-listitem__body",
                    ".msg-s-event__content",
                    "p.msg-s-event-listitem__body",
                ],
            ),
            message_sender: SelectorGroup::new(
                "messaging.message_sender",
                &[
                    ".msg-s-message-group__name",
                    ".msg-s-message-group__profile-link",
                ],
            ),
            message_time: SelectorGroup::new(
                "messaging.message_time",
                &[
                    "time[datetime]",
                    ".msg-s-message-group__timestamp",
                    "time.msg-s-message-list__time-heading",
                ],
            ),
            message_attachment: SelectorGroup::new(
                "messaging.message_attachment",
                &[
                    ".msg-s-event-listitem__attachment-item",
                    ".ui-attachment",
                    ".msg-s-event-listitem__image-container",
                ],
            ),
        }
    }
}

/// Connection invitation selectors
#[derive(Debug, Clone)]
pub struct ConnectionSelectors {
    pub connect_button: SelectorGroup,
    pub modal: SelectorGroup,
    pub modal_header: SelectorGroup,
    pub modal_body: SelectorGroup,
    pub note_textarea: SelectorGroup,
    pub send_button: SelectorGroup,
    pub card: SelectorGroup,
    pub card_name: SelectorGroup,
    pub card_link: SelectorGroup,
    pub card_headline: SelectorGroup,
    pub profile_name: SelectorGroup,
    pub profile_headline: SelectorGroup,
    pub profile_company: SelectorGroup,
    pub success_toast: SelectorGroup,
    pub pending_button: SelectorGroup,
}

impl Default for ConnectionSelectors {
    fn default() -> Self {
        Self {
            connect_button: SelectorGroup::new(
                "connection.connect_button",
                &[
                    "button[aria-label^='Invite'][aria-label$='to connect']",
                    "button.pvs-profile-actions__action[aria-label*='connect']",
                    "button[data-control-name='connect']",
                    "button.artdeco-button--connect",
                ],
            ),
            modal: SelectorGroup::new(
                "connection.modal",
                &[
                    "div.send-invite[role='dialog']",
                    "div.artdeco-modal.send-invite",
                    "div[data-test-modal-id='send-invite-modal']",
                    "div.artdeco-modal[role='dialog']",
                ],
            ),
            modal_header: SelectorGroup::new(
                "connection.modal_header",
                &[
                    ".artdeco-modal__header h2",
                    "#send-invite-modal",
                    ".send-invite__header",
                ],
            ),
            modal_body: SelectorGroup::new(
                "connection.modal_body",
                &[".artdeco-modal__content", ".send-invite__content"],
            ),
            note_textarea: SelectorGroup::new(
                "connection.note_textarea",
                &[
                    "textarea#custom-message",
                    "textarea[name='message']",
                    ".send-invite__custom-message",
                    ".connect-button-send-invite__custom-message",
                ],
            ),
            send_button: SelectorGroup::new(
                "connection.send_button",
                &[
                    "button[aria-label='Send invitation']",
                    "button[aria-label='Send now']",
                    "button[aria-label='Send without a note']",
                    ".artdeco-modal__actionbar button.artdeco-button--primary",
                ],
            ),
            card: SelectorGroup::new(
                "connection.card",
                &[
                    ".entity-result",
                    ".discover-entity-type-card",
                    ".reusable-search__result-container",
                    ".pv-top-card",
                ],
            ),
            card_name: SelectorGroup::new(
                "connection.card_name",
                &[
                    ".entity-result__title-text a span[aria-hidden='true']",
                    ".entity-result__title-text",
                    ".discover-person-card__name",
                    "h1.text-heading-xlarge",
                ],
            ),
            card_link: SelectorGroup::new(
                "connection.card_link",
                &[
                    ".entity-result__title-text a[href]",
                    "a.discover-entity-type-card__link",
                    "a[href*='/in/']",
                ],
            ),
            card_headline: SelectorGroup::new(
                "connection.card_headline",
                &[
                    ".entity-result__primary-subtitle",
                    ".discover-person-card__occupation",
                    ".text-body-medium.break-words",
                ],
            ),
            profile_name: SelectorGroup::new(
                "connection.profile_name",
                &[
                    "h1.text-heading-xlarge",
                    ".pv-top-card--list li:first-child",
                    ".pv-text-details__left-panel h1",
                ],
            ),
            profile_headline: SelectorGroup::new(
                "connection.profile_headline",
                &[
                    ".pv-text-details__left-panel .text-body-medium",
                    ".text-body-medium.break-words",
                    ".pv-top-card--list-bullet + .text-body-medium",
                ],
            ),
            profile_company: SelectorGroup::new(
                "connection.profile_company",
                &[
                    "button[aria-label^='Current company'] span",
                    ".pv-text-details__right-panel-item-text",
                    ".pv-top-card--experience-list-item",
                ],
            ),
            success_toast: SelectorGroup::new(
                "connection.success_toast",
                &[
                    ".artdeco-toast-item__message",
                    "[data-test-artdeco-toast-item-type='success']",
                    ".artdeco-toasts_toasts p",
                ],
            ),
            pending_button: SelectorGroup::new(
                "connection.pending_button",
                &[
                    "button[aria-label^='Pending']",
                    "button.artdeco-button--muted[aria-label*='invitation sent']",
                ],
            ),
        }
    }
}

/// Global navigation markup used to resolve the logged-in user
#[derive(Debug, Clone)]
pub struct NavigationSelectors {
    pub me_photo: SelectorGroup,
    pub me_name: SelectorGroup,
    pub me_link: SelectorGroup,
    pub embedded_data: SelectorGroup,
}

impl Default for NavigationSelectors {
    fn default() -> Self {
        Self {
            me_photo: SelectorGroup::new(
                "navigation.me_photo",
                &[
                    "img.global-nav__me-photo[alt]",
                    ".global-nav__me img[alt]",
                    "img.feed-identity-module__member-photo[alt]",
                ],
            ),
            me_name: SelectorGroup::new(
                "navigation.me_name",
                &[
                    ".feed-identity-module__actor-meta .t-16",
                    ".profile-card-name",
                    ".feed-identity-module__member-name",
                ],
            ),
            me_link: SelectorGroup::new(
                "navigation.me_link",
                &[
                    ".feed-identity-module__actor-meta a[href*='/in/']",
                    "a.profile-card-profile-link[href*='/in/']",
                    ".global-nav__me-content a[href*='/in/']",
                ],
            ),
            embedded_data: SelectorGroup::new(
                "navigation.embedded_data",
                &["code[id^='bpr-guid-']", "code[style*='display: none']"],
            ),
        }
    }
}

/// Complete registry, one selector table per feature
#[derive(Debug, Clone)]
pub struct SelectorRegistry {
    pub version: String,
    pub post: PostSelectors,
    pub comment: CommentSelectors,
    pub messaging: MessagingSelectors,
    pub connection: ConnectionSelectors,
    pub navigation: NavigationSelectors,
}

impl Default for SelectorRegistry {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION.to_string(),
            post: PostSelectors::default(),
            comment: CommentSelectors::default(),
            messaging: MessagingSelectors::default(),
            connection: ConnectionSelectors::default(),
            navigation: NavigationSelectors::default(),
        }
    }
}

impl SelectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply overrides keyed by group name (e.g. `"messaging.composer"`).
    ///
    /// Unknown group names are logged and ignored.
    pub fn with_overrides(mut self, overrides: &HashMap<String, Vec<String>>) -> Self {
        if overrides.is_empty() {
            return self;
        }

        let mut applied = HashSet::new();
        for group in self.groups_mut() {
            if let Some(extra) = overrides.get(group.name()) {
                *group = group.with_overrides(extra);
                applied.insert(group.name().to_string());
                debug!("Applied {} selector overrides to {}", extra.len(), group.name());
            }
        }

        for name in overrides.keys() {
            if !applied.contains(name) {
                warn!("Selector override for unknown group '{}' ignored", name);
            }
        }

        self.version = format!("{}+overrides", self.version);
        self
    }

    /// Look up a group by name
    pub fn group(&self, name: &str) -> Option<&SelectorGroup> {
        self.groups().into_iter().find(|g| g.name() == name)
    }

    pub fn groups(&self) -> Vec<&SelectorGroup> {
        let p = &self.post;
        let c = &self.comment;
        let m = &self.messaging;
        let n = &self.connection;
        let g = &self.navigation;
        vec![
            &p.container, &p.actor, &p.actor_name, &p.actor_link, &p.actor_headline, &p.text,
            &p.timestamp, &p.relative_time, &p.image, &p.video, &p.document, &p.article,
            &p.article_title, &p.poll, &p.poll_question, &p.poll_option, &p.carousel, &p.json_ld,
            &c.comment_box, &c.form, &c.editor, &c.submit_button, &c.comments_list, &c.item,
            &c.author_name, &c.author_link, &c.author_headline, &c.text, &c.timestamp,
            &m.surface, &m.overlay, &m.composer, &m.form, &m.send_button, &m.recipient_name,
            &m.recipient_link, &m.recipient_headline, &m.participants, &m.attachment_preview,
            &m.attachment_image, &m.attachment_file_name, &m.message_list, &m.message_item,
            &m.message_body, &m.message_sender, &m.message_time, &m.message_attachment,
            &n.connect_button, &n.modal, &n.modal_header, &n.modal_body, &n.note_textarea,
            &n.send_button, &n.card, &n.card_name, &n.card_link, &n.card_headline,
            &n.profile_name, &n.profile_headline, &n.profile_company, &n.success_toast,
            &n.pending_button,
            &g.me_photo, &g.me_name, &g.me_link, &g.embedded_data,
        ]
    }

    fn groups_mut(&mut self) -> Vec<&mut SelectorGroup> {
        let p = &mut self.post;
        let c = &mut self.comment;
        let m = &mut self.messaging;
        let n = &mut self.connection;
        let g = &mut self.navigation;
        vec![
            &mut p.container, &mut p.actor, &mut p.actor_name, &mut p.actor_link,
            &mut p.actor_headline, &mut p.text, &mut p.timestamp, &mut p.relative_time,
            &mut p.image, &mut p.video, &mut p.document, &mut p.article, &mut p.article_title,
            &mut p.poll, &mut p.poll_question, &mut p.poll_option, &mut p.carousel,
            &mut p.json_ld,
            &mut c.comment_box, &mut c.form, &mut c.editor, &mut c.submit_button,
            &mut c.comments_list, &mut c.item, &mut c.author_name, &mut c.author_link,
            &mut c.author_headline, &mut c.text, &mut c.timestamp,
            &mut m.surface, &mut m.overlay, &mut m.composer, &mut m.form, &mut m.send_button,
            &mut m.recipient_name, &mut m.recipient_link, &mut m.recipient_headline,
            &mut m.participants, &mut m.attachment_preview, &mut m.attachment_image,
            &mut m.attachment_file_name, &mut m.message_list, &mut m.message_item,
            &mut m.message_body, &mut m.message_sender, &mut m.message_time,
            &mut m.message_attachment,
            &mut n.connect_button, &mut n.modal, &mut n.modal_header, &mut n.modal_body,
            &mut n.note_textarea, &mut n.send_button, &mut n.card, &mut n.card_name,
            &mut n.card_link, &mut n.card_headline, &mut n.profile_name,
            &mut n.profile_headline, &mut n.profile_company, &mut n.success_toast,
            &mut n.pending_button,
            &mut g.me_photo, &mut g.me_name, &mut g.me_link, &mut g.embedded_data,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_groups_compile() {
        let registry = SelectorRegistry::default();
        for group in registry.groups() {
            assert!(!group.is_empty(), "group {} has no valid selectors", group.name());
            assert_eq!(group.sources().len(), group.selectors().len());
        }
    }

    #[test]
    fn test_group_names_are_unique() {
        let registry = SelectorRegistry::default();
        let names: HashSet<&str> = registry.groups().iter().map(|g| g.name()).collect();
        assert_eq!(names.len(), registry.groups().len());
    }

    #[test]
    fn test_invalid_selector_dropped() {
        let group = SelectorGroup::new("test.group", &["div..bad[", ".ok"]);
        assert_eq!(group.sources(), &[".ok".to_string()]);
    }

    #[test]
    fn test_first_match_respects_priority() {
        let html = Html::parse_document(
            r#"<div id="root"><p class="second">b</p><p class="first">a</p></div>"#,
        );
        let group = SelectorGroup::new("test.group", &[".first", ".second"]);
        let found = group.first_match(html.root_element()).unwrap();
        assert_eq!(found.text().collect::<String>(), "a");
    }

    #[test]
    fn test_all_matches_short_circuits() {
        let html = Html::parse_document(
            r#"<div><img class="a" src="1"><img class="a b" src="2"></div>"#,
        );
        let group = SelectorGroup::new("test.group", &["img.a", "img.b"]);
        assert_eq!(group.all_matches(html.root_element()).len(), 2);
    }

    #[test]
    fn test_closest_includes_self() {
        let html = Html::parse_document(r#"<section class="s"><div class="d"><span>x</span></div></section>"#);
        let span_sel = Selector::parse("span").unwrap();
        let span = html.select(&span_sel).next().unwrap();
        let group = SelectorGroup::new("test.group", &[".s"]);
        let found = group.closest(span).unwrap();
        assert_eq!(found.value().name(), "section");
        let div_group = SelectorGroup::new("test.group", &["span"]);
        assert_eq!(div_group.closest(span).unwrap().id(), span.id());
    }

    #[test]
    fn test_find_in_document_unions_in_order() {
        let html = Html::parse_document(
            r#"<body><div class="x" id="one"></div><div class="y" id="two"></div><div class="x y" id="three"></div></body>"#,
        );
        let group = SelectorGroup::new("test.group", &[".y", ".x"]);
        let ids = group.find_in_document(&html);
        assert_eq!(ids.len(), 3);
        let names: Vec<String> = ids
            .iter()
            .map(|id| {
                ElementRef::wrap(html.tree.get(*id).unwrap())
                    .unwrap()
                    .value()
                    .attr("id")
                    .unwrap()
                    .to_string()
            })
            .collect();
        assert_eq!(names, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_overrides_prepend_alternatives() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "messaging.composer".to_string(),
            vec![".new-composer".to_string()],
        );
        overrides.insert("unknown.group".to_string(), vec![".x".to_string()]);
        let registry = SelectorRegistry::default().with_overrides(&overrides);
        assert_eq!(registry.messaging.composer.sources()[0], ".new-composer");
        assert!(registry.version.ends_with("+overrides"));
        assert!(registry.group("messaging.composer").is_some());
    }
}
