//! Connection invitation extraction.
//!
//! Like messages, invitations are captured in two phases: a snapshot when the
//! user clicks connect or send, then a confirmation check against the toast
//! or the "Pending" button the host renders once the invitation is out.

use super::author::{clean_person_name, current_user};
use super::sanitize::sanitize_composer_text;
use super::{absolute_url, first_attr, first_text, short_hash, visible_text, ExtractContext, Extractor};
use crate::types::{ActionContext, Actor, Confirmation, ConnectionRequestRecord};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use scraper::ElementRef;
use tracing::{debug, trace};

lazy_static! {
    // "Invite Jane Doe to connect", "Connect with Jane Doe"
    static ref INVITE_LABEL: Regex = Regex::new(
        r"(?i)^(?:invite|connect with)\s+(.+?)(?:\s+to connect)?\??$"
    ).unwrap();

    // "Add a note to your invitation to Jane?" style modal headers
    static ref NOTE_HEADER: Regex = Regex::new(
        r"(?i)invitation to\s+(.+?)\??$"
    ).unwrap();

    // "Engineer at Acme", "Founder @ Startup"
    static ref HEADLINE_AT: Regex = Regex::new(r"(?i)^(.*?)\s+(?:at|@)\s+(.+)$").unwrap();

    static ref SENT_TOAST: Regex = Regex::new(r"(?i)invitation sent|invitation was sent").unwrap();
}

/// Invitation as seen when the user clicks connect or send
#[derive(Debug, Clone, PartialEq)]
pub struct InviteSnapshot {
    pub recipient: Actor,
    pub custom_message: Option<String>,
    pub recipient_title: Option<String>,
    pub recipient_company: Option<String>,
    pub context: ActionContext,
}

impl InviteSnapshot {
    /// Fill fields this snapshot lacks from an earlier one for the same person.
    ///
    /// The modal only shows the note; the card clicked before it shows
    /// headline and profile link.
    pub fn merge(mut self, earlier: &InviteSnapshot) -> Self {
        if self.recipient.profile_url.is_none() {
            self.recipient.profile_url = earlier.recipient.profile_url.clone();
        }
        if self.recipient.headline.is_none() {
            self.recipient.headline = earlier.recipient.headline.clone();
        }
        if self.recipient_title.is_none() {
            self.recipient_title = earlier.recipient_title.clone();
        }
        if self.recipient_company.is_none() {
            self.recipient_company = earlier.recipient_company.clone();
        }
        if self.custom_message.is_none() {
            self.custom_message = earlier.custom_message.clone();
        }
        self
    }

    pub fn into_record(self, actor: Actor, confirmation: Confirmation, now: DateTime<Utc>) -> ConnectionRequestRecord {
        let identity = self
            .recipient
            .profile_url
            .clone()
            .unwrap_or_else(|| self.recipient.name.clone());
        ConnectionRequestRecord {
            id: format!("invite-{}", short_hash(&format!("{}|{}", identity, now.timestamp_millis()))),
            actor,
            recipient: self.recipient,
            timestamp: now,
            context: self.context,
            custom_message: self.custom_message,
            recipient_title: self.recipient_title,
            recipient_company: self.recipient_company,
            confirmation,
        }
    }
}

/// Snapshots an invitation.
///
/// Rooted either at the invitation modal or at the connect button.
#[derive(Debug, Default, Clone, Copy)]
pub struct InviteSnapshotExtractor;

impl Extractor for InviteSnapshotExtractor {
    type Output = InviteSnapshot;

    fn extract(&self, cx: &ExtractContext<'_>, root: Option<ElementRef<'_>>) -> Option<InviteSnapshot> {
        let root = root?;
        let conn = &cx.selectors.connection;
        let context = cx.context();

        let modal = if conn.modal.matches(&root) {
            Some(root)
        } else {
            conn.modal.closest(root)
        };
        let card = conn.card.closest(root);
        let on_profile = context == ActionContext::Profile;

        let name = modal
            .and_then(|m| name_from_modal(cx, m))
            .or_else(|| card.and_then(|c| first_text(c, &conn.card_name)))
            .or_else(|| root.value().attr("aria-label").and_then(name_from_label))
            .or_else(|| {
                on_profile
                    .then(|| first_text(cx.document(), &conn.profile_name))
                    .flatten()
            })
            .and_then(|n| clean_person_name(&n));
        let Some(name) = name else {
            trace!("Invitation without a recipient name");
            return None;
        };

        let profile_url = card
            .and_then(|c| first_attr(c, &conn.card_link, "href"))
            .and_then(|h| absolute_url(cx.page_url, &h))
            .or_else(|| on_profile.then(|| profile_root(cx.page_url)).flatten());

        let headline = card
            .and_then(|c| first_text(c, &conn.card_headline))
            .or_else(|| {
                on_profile
                    .then(|| first_text(cx.document(), &conn.profile_headline))
                    .flatten()
            });
        let (recipient_title, mut recipient_company) = headline
            .as_deref()
            .map(split_headline)
            .unwrap_or((None, None));
        if on_profile {
            if let Some(company) = first_text(cx.document(), &conn.profile_company) {
                recipient_company = Some(company);
            }
        }

        let custom_message = modal
            .and_then(|m| conn.note_textarea.first_match(m))
            .map(|area| sanitize_composer_text(&visible_text(area)))
            .filter(|note| !note.is_empty());

        Some(InviteSnapshot {
            recipient: Actor::named(name)
                .with_profile_url(profile_url)
                .with_headline(headline),
            custom_message,
            recipient_title,
            recipient_company,
            context,
        })
    }
}

fn name_from_modal(cx: &ExtractContext<'_>, modal: ElementRef<'_>) -> Option<String> {
    let conn = &cx.selectors.connection;

    // The modal body names the recipient in bold
    let strong = conn.modal_body.first_match(modal).and_then(|body| {
        body.descendants()
            .filter_map(ElementRef::wrap)
            .filter(|el| el.value().name() == "strong")
            .map(visible_text)
            .find(|t| !t.is_empty())
    });

    strong.or_else(|| {
        let header = first_text(modal, &conn.modal_header)?;
        NOTE_HEADER
            .captures(&header)
            .or_else(|| INVITE_LABEL.captures(&header))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    })
}

fn name_from_label(label: &str) -> Option<String> {
    INVITE_LABEL
        .captures(label.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn profile_root(page_url: &str) -> Option<String> {
    let url = url::Url::parse(page_url).ok()?;
    let mut segments = url.path_segments()?;
    match (segments.next(), segments.next()) {
        (Some("in"), Some(slug)) if !slug.is_empty() => {
            Some(format!("{}/in/{}/", super::page_origin(page_url), slug))
        }
        _ => None,
    }
}

/// Split "Engineer at Acme" into title and company
pub fn split_headline(headline: &str) -> (Option<String>, Option<String>) {
    let headline = headline.trim();
    if headline.is_empty() {
        return (None, None);
    }
    match HEADLINE_AT.captures(headline) {
        Some(caps) => {
            let title = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            let company = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            let company = company.split(['|', '•']).next().unwrap_or("").trim();
            (
                (!title.is_empty()).then(|| title.to_string()),
                (!company.is_empty()).then(|| company.to_string()),
            )
        }
        None => (Some(headline.to_string()), None),
    }
}

/// Checks whether an invitation went out
#[derive(Debug, Clone, Copy)]
pub struct InvitationConfirmer<'s> {
    pub snapshot: &'s InviteSnapshot,
}

impl Extractor for InvitationConfirmer<'_> {
    type Output = ConnectionRequestRecord;

    fn extract(&self, cx: &ExtractContext<'_>, root: Option<ElementRef<'_>>) -> Option<ConnectionRequestRecord> {
        let root = root?;
        let conn = &cx.selectors.connection;
        let recipient = &self.snapshot.recipient.name;
        let first_name = recipient.split_whitespace().next().unwrap_or(recipient).to_lowercase();

        let toast = first_text(cx.document(), &conn.success_toast)
            .map(|t| SENT_TOAST.is_match(&t) || t.to_lowercase().contains(&first_name))
            .unwrap_or(false);

        let scope = conn.card.closest(root).unwrap_or(root);
        let pending = conn
            .pending_button
            .all_matches(scope)
            .into_iter()
            .chain(conn.pending_button.all_matches(cx.document()))
            .any(|button| {
                let label = button.value().attr("aria-label").unwrap_or("").to_lowercase();
                scope.id() != cx.document().id() && conn.card.closest(button).map(|c| c.id()) == Some(scope.id())
                    || label.contains(&recipient.to_lowercase())
            });

        if !(toast || pending) {
            return None;
        }

        debug!(
            "Invitation to {} confirmed ({})",
            recipient,
            if toast { "toast" } else { "pending button" }
        );
        let actor = current_user(cx).unwrap_or_else(|| Actor::named("Unknown"));
        Some(
            self.snapshot
                .clone()
                .into_record(actor, Confirmation::Confirmed, cx.now),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selectors::SelectorRegistry;
    use scraper::{Html, Selector};

    const CARD: &str = r#"<html><body>
      <img class="global-nav__me-photo" alt="Sam Rivera" src="https://a/me.jpg">
      <div class="entity-result">
        <span class="entity-result__title-text"><a href="/in/jane-doe?mini=1"><span aria-hidden="true">Jane Doe</span></a></span>
        <div class="entity-result__primary-subtitle">Staff Engineer at Acme Corp</div>
        <button aria-label="Invite Jane Doe to connect" class="artdeco-button">Connect</button>
      </div>
    </body></html>"#;

    fn with_doc<R>(source: &str, url: &str, f: impl FnOnce(&ExtractContext<'_>, &Html) -> R) -> R {
        let html = Html::parse_document(source);
        let registry = SelectorRegistry::default();
        let cx = ExtractContext::new(&html, &registry, url);
        f(&cx, &html)
    }

    fn first<'a>(html: &'a Html, css: &str) -> Option<ElementRef<'a>> {
        let sel = Selector::parse(css).unwrap();
        html.select(&sel).next()
    }

    #[test]
    fn test_snapshot_from_connect_button() {
        with_doc(CARD, "https://www.linkedin.com/search/results/people/", |cx, html| {
            let snap = InviteSnapshotExtractor
                .extract(cx, first(html, "button[aria-label^='Invite']"))
                .unwrap();
            assert_eq!(snap.recipient.name, "Jane Doe");
            assert_eq!(snap.recipient.profile_url.as_deref(), Some("https://www.linkedin.com/in/jane-doe"));
            assert_eq!(snap.recipient_title.as_deref(), Some("Staff Engineer"));
            assert_eq!(snap.recipient_company.as_deref(), Some("Acme Corp"));
            assert_eq!(snap.custom_message, None);
            assert_eq!(snap.context, ActionContext::Search);
        });
    }

    #[test]
    fn test_snapshot_from_modal_with_note() {
        let source = CARD.replace(
            "</body>",
            r#"<div class="artdeco-modal send-invite" role="dialog">
                 <div class="artdeco-modal__header"><h2>Add a note to your invitation</h2></div>
                 <div class="artdeco-modal__content"><p>Personalize your invitation to <strong>Jane Doe</strong></p>
                   <textarea id="custom-message" name="message">Loved your talk at RustConf!</textarea></div>
                 <div class="artdeco-modal__actionbar"><button aria-label="Send invitation" class="artdeco-button--primary">Send</button></div>
               </div></body>"#,
        );
        with_doc(&source, "https://www.linkedin.com/search/results/people/", |cx, html| {
            let snap = InviteSnapshotExtractor
                .extract(cx, first(html, "div.send-invite"))
                .unwrap();
            assert_eq!(snap.recipient.name, "Jane Doe");
            assert_eq!(snap.custom_message.as_deref(), Some("Loved your talk at RustConf!"));
            assert_eq!(snap.recipient.profile_url, None);
        });
    }

    #[test]
    fn test_placeholder_note_is_no_note() {
        let source = CARD.replace(
            "</body>",
            r#"<div class="artdeco-modal send-invite" role="dialog">
                 <div class="artdeco-modal__content"><strong>Jane Doe</strong>
                   <textarea id="custom-message">Ex: We know each other from…</textarea></div>
               </div></body>"#,
        );
        with_doc(&source, "https://www.linkedin.com/feed/", |cx, html| {
            let snap = InviteSnapshotExtractor
                .extract(cx, first(html, "div.send-invite"))
                .unwrap();
            assert_eq!(snap.custom_message, None);
        });
    }

    #[test]
    fn test_split_headline() {
        assert_eq!(
            split_headline("Engineer at Acme | Speaker"),
            (Some("Engineer".to_string()), Some("Acme".to_string()))
        );
        assert_eq!(split_headline("Founder"), (Some("Founder".to_string()), None));
        assert_eq!(split_headline(""), (None, None));
    }

    #[test]
    fn test_confirmation_via_pending_button() {
        let pending = CARD.replace(
            r#"<button aria-label="Invite Jane Doe to connect" class="artdeco-button">Connect</button>"#,
            r#"<button aria-label="Pending, click to withdraw invitation sent to Jane Doe" class="artdeco-button">Pending</button>"#,
        );
        let snapshot = with_doc(CARD, "https://www.linkedin.com/search/results/people/", |cx, html| {
            InviteSnapshotExtractor
                .extract(cx, first(html, "button[aria-label^='Invite']"))
                .unwrap()
        });

        with_doc(CARD, "https://www.linkedin.com/search/results/people/", |cx, html| {
            assert!(InvitationConfirmer { snapshot: &snapshot }
                .extract(cx, first(html, ".entity-result"))
                .is_none());
        });
        with_doc(&pending, "https://www.linkedin.com/search/results/people/", |cx, html| {
            let record = InvitationConfirmer { snapshot: &snapshot }
                .extract(cx, first(html, ".entity-result"))
                .unwrap();
            assert_eq!(record.confirmation, Confirmation::Confirmed);
            assert_eq!(record.actor.name, "Sam Rivera");
            assert_eq!(record.recipient.name, "Jane Doe");
            assert!(record.id.starts_with("invite-"));
        });
    }

    #[test]
    fn test_missing_recipient_is_none() {
        with_doc("<html><body><button>Connect</button></body></html>", "https://www.linkedin.com/feed/", |cx, html| {
            assert!(InviteSnapshotExtractor.extract(cx, first(html, "button")).is_none());
            assert!(InviteSnapshotExtractor.extract(cx, None).is_none());
        });
    }
}
