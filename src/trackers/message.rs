//! Direct message tracker.
//!
//! Two-phase capture: the composer is snapshotted when the user sends, and
//! after the settle delay the rendered thread is checked for the message.
//! Without confirmation the snapshot itself is delivered, marked unconfirmed.

use super::{
    deliver, FlowState, Lifecycle, ListenerRegistry, Tracker, TrackerContext, TrackerStats,
    TrackerStatsSnapshot,
};
use crate::dom::{DomEvent, EventKind};
use crate::extract::{current_user, extract_at, ComposerExtractor, ComposerSnapshot, ExtractContext, ThreadConfirmer};
use crate::scheduler::SurfaceKind;
use crate::trackers::RecentCaptureCache;
use crate::types::{ActionKind, Actor, CapturedAction, MessageRecord};
use chrono::Utc;
use ego_tree::NodeId;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::{Rc, Weak};
use tracing::debug;

pub struct MessageTracker {
    me: Weak<MessageTracker>,
    cx: TrackerContext,
    lifecycle: Lifecycle,
    listeners: RefCell<ListenerRegistry>,
    /// Latest flow per messaging surface
    flows: RefCell<HashMap<NodeId, FlowState>>,
    dedup: RefCell<RecentCaptureCache>,
    stats: TrackerStats,
}

impl MessageTracker {
    pub fn new(cx: TrackerContext) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            dedup: RefCell::new(cx.new_dedup_cache()),
            cx,
            lifecycle: Lifecycle::default(),
            listeners: RefCell::new(ListenerRegistry::default()),
            flows: RefCell::new(HashMap::new()),
            stats: TrackerStats::default(),
        })
    }

    pub fn flow_state(&self, surface: NodeId) -> FlowState {
        self.flows
            .borrow()
            .get(&surface)
            .copied()
            .unwrap_or(FlowState::Idle)
    }

    fn set_flow(&self, surface: NodeId, state: FlowState) {
        self.flows.borrow_mut().insert(surface, state);
    }

    fn listener(&self) -> Rc<dyn Fn(&DomEvent)> {
        let me = self.me.clone();
        Rc::new(move |event: &DomEvent| {
            if let Some(tracker) = me.upgrade() {
                tracker.on_send(event.current_target);
            }
        })
    }

    fn on_send(&self, target: NodeId) {
        if !self.lifecycle.is_active() {
            return;
        }
        let page = &self.cx.page;
        let surface = page.closest(target, &self.cx.selectors.messaging.surface);
        let Some(snapshot) = extract_at(page, &self.cx.selectors, &ComposerExtractor, surface) else {
            debug!("Send without message content, ignoring");
            return;
        };
        let (Some(surface), Some(tracker)) = (surface, self.me.upgrade()) else {
            return;
        };

        debug!(
            "Message to {} snapshotted ({} chars, {} attachments)",
            snapshot.recipient.name,
            snapshot.text.chars().count(),
            snapshot.attachments.len()
        );
        self.set_flow(surface, FlowState::Clicked);
        self.lifecycle.spawn(async move {
            tokio::time::sleep(tracker.cx.timing.message_settle()).await;
            if !tracker.lifecycle.is_active() {
                return;
            }
            tracker.set_flow(surface, FlowState::AwaitingConfirmation);

            let (record, state) = match tracker.confirm(surface, &snapshot) {
                Some(record) => (record, FlowState::Confirmed),
                None => {
                    debug!("Message to {} not confirmed, delivering snapshot", snapshot.recipient.name);
                    let actor = tracker.actor();
                    (snapshot.into_record(actor, Utc::now()), FlowState::ConfirmationFailed)
                }
            };
            tracker.set_flow(surface, state);
            let _ = deliver(&tracker.cx, &tracker.dedup, &tracker.stats, CapturedAction::Message(record)).await;
        });
    }

    /// Re-read the thread; the surface may have been re-rendered meanwhile
    fn confirm(&self, surface: NodeId, snapshot: &ComposerSnapshot) -> Option<MessageRecord> {
        let page = &self.cx.page;
        let root = if page.is_connected(surface) {
            Some(surface)
        } else {
            page.find_first(&self.cx.selectors.messaging.surface, None)
        };
        extract_at(page, &self.cx.selectors, &ThreadConfirmer { snapshot }, root)
    }

    fn actor(&self) -> Actor {
        let page = &self.cx.page;
        let url = page.url();
        page.with_html(|html| current_user(&ExtractContext::new(html, &self.cx.selectors, &url)))
            .unwrap_or_else(|| Actor::named("Unknown"))
    }
}

impl Tracker for MessageTracker {
    fn kind(&self) -> ActionKind {
        ActionKind::Message
    }

    fn init(&self) {
        self.lifecycle.start();
    }

    fn scan(&self, surfaces: &BTreeSet<SurfaceKind>) {
        if !self.lifecycle.is_active() || !surfaces.contains(&SurfaceKind::Messaging) {
            return;
        }
        let page = &self.cx.page;
        let selectors = &self.cx.selectors.messaging;
        let mut registry = self.listeners.borrow_mut();
        let mut attached = 0;

        for button in page.find_all(&selectors.send_button) {
            if registry.attach(page, button, EventKind::Click, self.listener()) {
                attached += 1;
            }
        }
        for form in page.find_all(&selectors.form) {
            if registry.attach(page, form, EventKind::Submit, self.listener()) {
                attached += 1;
            }
        }

        if attached > 0 {
            debug!("Attached {} messaging listeners", attached);
            self.stats.add_discovered(attached);
        }
    }

    fn prune(&self) {
        let page = &self.cx.page;
        self.listeners.borrow_mut().prune(page);
        self.flows
            .borrow_mut()
            .retain(|surface, state| state.in_flight() || page.is_connected(*surface));
    }

    fn reset_tracking(&self) {
        self.listeners.borrow_mut().detach_all(&self.cx.page);
        self.flows.borrow_mut().retain(|_, state| state.in_flight());
    }

    fn cleanup(&self) {
        self.lifecycle.shutdown();
        self.listeners.borrow_mut().detach_all(&self.cx.page);
        self.flows.borrow_mut().clear();
        self.stats().log();
    }

    fn stats(&self) -> TrackerStatsSnapshot {
        self.stats.snapshot(ActionKind::Message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Page;
    use crate::selectors::SelectorRegistry;
    use crate::sink::{AllowAll, ChannelSink};
    use crate::types::Confirmation;
    use pretty_assertions::assert_eq;
    use scraper::Selector;
    use std::time::Duration;
    use tokio::task::LocalSet;

    const BUBBLE: &str = r#"<html><body>
      <img class="global-nav__me-photo" alt="Sam Rivera" src="https://media.example.com/sam.jpg">
      <div class="msg-overlay-conversation-bubble" data-conversation-id="2-abc">
        <h2 class="msg-overlay-bubble-header__title"><a href="/in/jane-doe/">Jane Doe</a></h2>
        <ul class="msg-s-message-list-content"></ul>
        <form class="msg-form">
          <div class="msg-form__contenteditable" contenteditable="true"><p>Lunch on Friday?</p></div>
          <button class="msg-form__send-button" type="submit">Send</button>
        </form>
      </div>
    </body></html>"#;

    fn setup() -> (Rc<Page>, Rc<MessageTracker>, tokio::sync::mpsc::UnboundedReceiver<CapturedAction>) {
        let page = Rc::new(Page::new("https://www.linkedin.com/feed/", BUBBLE));
        let (sink, rx) = ChannelSink::channel();
        let cx = TrackerContext::new(
            Rc::clone(&page),
            Rc::new(SelectorRegistry::default()),
            Rc::new(sink),
            Rc::new(AllowAll),
        );
        let tracker = MessageTracker::new(cx);
        tracker.init();
        tracker.scan(&SurfaceKind::all());
        (page, tracker, rx)
    }

    fn node(page: &Page, css: &str) -> NodeId {
        page.query_first(&Selector::parse(css).unwrap()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_from_thread() {
        LocalSet::new()
            .run_until(async {
                let (page, tracker, mut rx) = setup();
                let surface = node(&page, ".msg-overlay-conversation-bubble");
                page.dispatch(EventKind::Click, node(&page, "button.msg-form__send-button"));
                assert_eq!(tracker.flow_state(surface), FlowState::Clicked);

                page.set_text(node(&page, ".msg-form__contenteditable"), "");
                page.insert_html(
                    node(&page, "ul.msg-s-message-list-content"),
                    r#"<li class="msg-s-message-list__event" data-event-urn="urn:li:msg:9">
                         <p class="msg-s-event-listitem__body">Lunch on Friday?</p></li>"#,
                );

                match rx.recv().await.unwrap() {
                    CapturedAction::Message(record) => {
                        assert_eq!(record.id, "urn:li:msg:9");
                        assert_eq!(record.actor.name, "Sam Rivera");
                        assert_eq!(record.recipient.name, "Jane Doe");
                        assert_eq!(record.confirmation, Confirmation::Confirmed);
                    }
                    other => panic!("unexpected {:?}", other),
                }
                assert_eq!(tracker.flow_state(surface), FlowState::Confirmed);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_delivered_without_confirmation() {
        LocalSet::new()
            .run_until(async {
                let (page, tracker, mut rx) = setup();
                let surface = node(&page, ".msg-overlay-conversation-bubble");
                let started = tokio::time::Instant::now();
                page.dispatch(EventKind::Submit, node(&page, "form.msg-form"));

                match rx.recv().await.unwrap() {
                    CapturedAction::Message(record) => {
                        assert_eq!(record.text, "Lunch on Friday?");
                        assert_eq!(record.confirmation, Confirmation::Unconfirmed);
                        assert_eq!(record.conversation_id.as_deref(), Some("2-abc"));
                    }
                    other => panic!("unexpected {:?}", other),
                }
                assert!(tokio::time::Instant::now() - started >= Duration::from_millis(1500));
                assert_eq!(tracker.flow_state(surface), FlowState::ConfirmationFailed);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_composer_is_ignored() {
        LocalSet::new()
            .run_until(async {
                let (page, tracker, mut rx) = setup();
                page.set_text(node(&page, ".msg-form__contenteditable"), "Write a message…");
                page.dispatch(EventKind::Click, node(&page, "button.msg-form__send-button"));

                tokio::time::sleep(Duration::from_secs(3)).await;
                assert!(rx.try_recv().is_err());
                assert_eq!(
                    tracker.flow_state(node(&page, ".msg-overlay-conversation-bubble")),
                    FlowState::Idle
                );
            })
            .await;
    }
}
