//! Post tracker: injects a capture control into visible posts.
//!
//! Posts are the one user-initiated capture. The control drives a small
//! state machine (`default -> loading -> success | error`, `captured` once a
//! post was already delivered) and is the only place a delivery failure is
//! surfaced.

use super::{deliver, Delivered, Lifecycle, ListenerRegistry, Tracker, TrackerContext, TrackerStats, TrackerStatsSnapshot};
use crate::dom::{DomEvent, EventKind};
use crate::extract::post::post_urn;
use crate::extract::{extract_at, PostExtractor};
use crate::scheduler::SurfaceKind;
use crate::trackers::RecentCaptureCache;
use crate::types::{ActionKind, ButtonState, CaptureError, CapturedAction};
use ego_tree::NodeId;
use lazy_static::lazy_static;
use scraper::Selector;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::{Rc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

pub const CONTROL_CLASS: &str = "feed-capture-button";
pub const CONTROL_ID_ATTR: &str = "data-feed-capture-id";

/// How long a captured state outlives its control, so a post seen again
/// after navigating back still shows as captured
pub const CAPTURED_STATE_RETENTION: Duration = Duration::from_secs(60 * 60);

lazy_static! {
    static ref CONTROL: Selector =
        Selector::parse("button.feed-capture-button[data-feed-capture-id]").unwrap();
}

fn label(state: ButtonState) -> &'static str {
    match state {
        ButtonState::Default => "Capture",
        ButtonState::Loading => "Capturing...",
        ButtonState::Success => "Captured",
        ButtonState::Error => "Retry capture",
        ButtonState::Captured => "Already captured",
    }
}

/// Injected control for one post container
#[derive(Debug, Clone, Copy)]
struct Control {
    container: NodeId,
    button: NodeId,
}

pub struct PostTracker {
    me: Weak<PostTracker>,
    cx: TrackerContext,
    lifecycle: Lifecycle,
    listeners: RefCell<ListenerRegistry>,
    /// Control id -> injected control
    controls: RefCell<HashMap<String, Control>>,
    /// Container -> control id
    injected: RefCell<HashMap<NodeId, String>>,
    /// Control id -> state and when it last changed; survives navigation so
    /// a captured post stays captured
    states: RefCell<HashMap<String, (ButtonState, Instant)>>,
    dedup: RefCell<RecentCaptureCache>,
    stats: TrackerStats,
}

impl PostTracker {
    pub fn new(cx: TrackerContext) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            dedup: RefCell::new(cx.new_dedup_cache()),
            cx,
            lifecycle: Lifecycle::default(),
            listeners: RefCell::new(ListenerRegistry::default()),
            controls: RefCell::new(HashMap::new()),
            injected: RefCell::new(HashMap::new()),
            states: RefCell::new(HashMap::new()),
            stats: TrackerStats::default(),
        })
    }

    /// Inject controls into newly visible containers.
    ///
    /// Returns the containers that now carry a control, so the scheduler can
    /// stop reporting them.
    pub fn handle_visible(&self, containers: &[NodeId]) -> Vec<NodeId> {
        if !self.lifecycle.is_active() {
            return Vec::new();
        }
        let page = &self.cx.page;
        let mut processed = Vec::new();

        for &container in containers {
            if !page.is_connected(container) {
                continue;
            }
            if self.injected.borrow().contains_key(&container) {
                processed.push(container);
                continue;
            }

            // A control may survive from before a navigation
            let existing = page
                .with_element(container, |el| {
                    el.select(&CONTROL).next().and_then(|button| {
                        let id = button.value().attr(CONTROL_ID_ATTR)?;
                        Some((button.id(), id.to_string()))
                    })
                })
                .flatten();

            let (button, id) = match existing {
                Some(found) => found,
                None => {
                    let id = page
                        .with_element(container, post_urn)
                        .flatten()
                        .unwrap_or_else(|| format!("post-{}", uuid::Uuid::new_v4()));
                    let html = format!(
                        r#"<button type="button" class="{}" {}="{}">{}</button>"#,
                        CONTROL_CLASS,
                        CONTROL_ID_ATTR,
                        id.replace('"', ""),
                        label(self.state(&id))
                    );
                    let Some(button) = page.insert_html(container, &html).into_iter().next() else {
                        continue;
                    };
                    (button, id)
                }
            };

            self.attach(button, &id);
            self.controls
                .borrow_mut()
                .insert(id.clone(), Control { container, button });
            self.injected.borrow_mut().insert(container, id);
            self.stats.add_discovered(1);
            processed.push(container);
        }

        if !processed.is_empty() {
            debug!("Post controls active on {} containers", processed.len());
        }
        processed
    }

    fn attach(&self, button: NodeId, id: &str) {
        let me = self.me.clone();
        let id = id.to_string();
        let listener = Rc::new(move |_event: &DomEvent| {
            let Some(tracker) = me.upgrade() else {
                return;
            };
            let id = id.clone();
            let task = Rc::clone(&tracker);
            tracker.lifecycle.spawn(async move {
                if let Err(e) = task.capture(&id).await {
                    warn!("Post capture {} failed: {}", id, e);
                }
            });
        });
        self.listeners
            .borrow_mut()
            .attach(&self.cx.page, button, EventKind::Click, listener);
    }

    pub fn state(&self, id: &str) -> ButtonState {
        self.states
            .borrow()
            .get(id)
            .map(|(state, _)| *state)
            .unwrap_or(ButtonState::Default)
    }

    fn set_state(&self, id: &str, state: ButtonState) {
        self.states
            .borrow_mut()
            .insert(id.to_string(), (state, Instant::now()));
        let control = self.controls.borrow().get(id).copied();
        if let Some(control) = control {
            self.cx.page.set_text(control.button, label(state));
        }
    }

    /// Control ids currently injected
    pub fn control_ids(&self) -> Vec<String> {
        self.controls.borrow().keys().cloned().collect()
    }

    /// Control id for a container, if one was injected
    pub fn control_for(&self, container: NodeId) -> Option<String> {
        self.injected.borrow().get(&container).cloned()
    }

    pub fn button_for(&self, id: &str) -> Option<NodeId> {
        self.controls.borrow().get(id).map(|c| c.button)
    }

    /// Capture the post behind control `id`.
    ///
    /// This is the one capture path that reports errors to its caller.
    pub async fn capture(&self, id: &str) -> Result<ButtonState, CaptureError> {
        if !self.lifecycle.is_active() {
            return Err(CaptureError::NotInitialized);
        }
        match self.state(id) {
            ButtonState::Success | ButtonState::Captured => {
                debug!("Post {} already captured", id);
                self.set_state(id, ButtonState::Captured);
                return Ok(ButtonState::Captured);
            }
            ButtonState::Loading => return Ok(ButtonState::Loading),
            ButtonState::Default | ButtonState::Error => {}
        }

        self.set_state(id, ButtonState::Loading);
        let container = self.controls.borrow().get(id).map(|c| c.container);
        let record = container.and_then(|node| {
            extract_at(&self.cx.page, &self.cx.selectors, &PostExtractor, Some(node))
        });
        let Some(record) = record else {
            self.set_state(id, ButtonState::Error);
            return Err(CaptureError::Extraction(format!("no usable post content for {}", id)));
        };

        let action = CapturedAction::Post(record);
        match deliver(&self.cx, &self.dedup, &self.stats, action).await {
            Ok(Delivered::Sent) => {
                self.set_state(id, ButtonState::Success);
                Ok(ButtonState::Success)
            }
            Ok(Delivered::Duplicate) => {
                self.set_state(id, ButtonState::Captured);
                Ok(ButtonState::Captured)
            }
            Err(e) => {
                self.set_state(id, ButtonState::Error);
                Err(e)
            }
        }
    }

    fn clear_registries(&self) {
        self.listeners.borrow_mut().detach_all(&self.cx.page);
        self.controls.borrow_mut().clear();
        self.injected.borrow_mut().clear();
    }
}

impl Tracker for PostTracker {
    fn kind(&self) -> ActionKind {
        ActionKind::Post
    }

    fn init(&self) {
        self.lifecycle.start();
    }

    fn scan(&self, _surfaces: &BTreeSet<SurfaceKind>) {
        // Posts are discovered through viewport batches
    }

    fn prune(&self) {
        let page = &self.cx.page;
        self.listeners.borrow_mut().prune(page);
        let gone: Vec<NodeId> = self
            .injected
            .borrow()
            .keys()
            .copied()
            .filter(|node| !page.is_connected(*node))
            .collect();
        for node in gone {
            if let Some(id) = self.injected.borrow_mut().remove(&node) {
                self.controls.borrow_mut().remove(&id);
            }
        }

        let controls = self.controls.borrow();
        let now = Instant::now();
        let mut states = self.states.borrow_mut();
        let before = states.len();
        states.retain(|id, (state, changed)| {
            controls.contains_key(id)
                || match state {
                    ButtonState::Loading => true,
                    ButtonState::Success | ButtonState::Captured => {
                        now.duration_since(*changed) < CAPTURED_STATE_RETENTION
                    }
                    ButtonState::Default | ButtonState::Error => false,
                }
        });
        if states.len() < before {
            trace!("Dropped {} post control states", before - states.len());
        }
    }

    fn reset_tracking(&self) {
        self.clear_registries();
    }

    fn cleanup(&self) {
        self.lifecycle.shutdown();
        self.clear_registries();
        self.stats().log();
    }

    fn stats(&self) -> TrackerStatsSnapshot {
        self.stats.snapshot(ActionKind::Post)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Page;
    use crate::selectors::SelectorRegistry;
    use crate::sink::{AllowAll, ChannelSink};
    use pretty_assertions::assert_eq;
    use tokio::task::LocalSet;

    const FEED: &str = r#"<html><body><main>
      <div class="feed-shared-update-v2" data-urn="urn:li:activity:42">
        <div class="update-components-actor">
          <span class="update-components-actor__name">Grace Hopper</span>
          <a class="update-components-actor__meta-link" href="/in/grace/">profile</a>
        </div>
        <div class="update-components-text">Shipping the compiler today</div>
      </div>
      <div class="feed-shared-update-v2" data-urn="urn:li:activity:43">
        <div class="update-components-text">No author here</div>
      </div>
    </main></body></html>"#;

    fn setup() -> (Rc<Page>, Rc<PostTracker>, tokio::sync::mpsc::UnboundedReceiver<CapturedAction>) {
        let page = Rc::new(Page::new("https://www.linkedin.com/feed/", FEED));
        let (sink, rx) = ChannelSink::channel();
        let cx = TrackerContext::new(
            Rc::clone(&page),
            Rc::new(SelectorRegistry::default()),
            Rc::new(sink),
            Rc::new(AllowAll),
        );
        let tracker = PostTracker::new(cx);
        tracker.init();
        (page, tracker, rx)
    }

    fn containers(page: &Page) -> Vec<NodeId> {
        page.find_all(&SelectorRegistry::default().post.container)
    }

    #[tokio::test]
    async fn test_control_injected_once() {
        let (page, tracker, _rx) = setup();
        let posts = containers(&page);

        assert_eq!(tracker.handle_visible(&posts), posts);
        assert_eq!(tracker.handle_visible(&posts), posts);
        assert_eq!(page.query_all(&CONTROL).len(), 2);

        let id = tracker.control_for(posts[0]).unwrap();
        assert_eq!(id, "urn:li:activity:42");
        let button = tracker.button_for(&id).unwrap();
        assert_eq!(page.listener_count(button, EventKind::Click), 1);
        assert_eq!(page.text_of(button).as_deref(), Some("Capture"));
    }

    #[tokio::test]
    async fn test_capture_state_machine() {
        let (page, tracker, mut rx) = setup();
        let posts = containers(&page);
        tracker.handle_visible(&posts);
        let id = tracker.control_for(posts[0]).unwrap();

        assert_eq!(tracker.capture(&id).await.unwrap(), ButtonState::Success);
        let button = tracker.button_for(&id).unwrap();
        assert_eq!(page.text_of(button).as_deref(), Some("Captured"));
        match rx.try_recv().unwrap() {
            CapturedAction::Post(record) => {
                assert_eq!(record.id, "urn:li:activity:42");
                assert_eq!(record.actor.name, "Grace Hopper");
            }
            other => panic!("unexpected {:?}", other),
        }

        // A second capture reports "already captured" without delivering
        assert_eq!(tracker.capture(&id).await.unwrap(), ButtonState::Captured);
        assert_eq!(tracker.state(&id), ButtonState::Captured);
        assert!(rx.try_recv().is_err());
        assert_eq!(tracker.stats().captured, 1);
    }

    #[tokio::test]
    async fn test_unextractable_post_sets_error() {
        let (page, tracker, mut rx) = setup();
        let posts = containers(&page);
        tracker.handle_visible(&posts);
        let id = tracker.control_for(posts[1]).unwrap();

        let err = tracker.capture(&id).await.unwrap_err();
        assert!(matches!(err, CaptureError::Extraction(_)));
        assert_eq!(tracker.state(&id), ButtonState::Error);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_click_spawns_capture() {
        LocalSet::new()
            .run_until(async {
                let (page, tracker, mut rx) = setup();
                let posts = containers(&page);
                tracker.handle_visible(&posts);
                let id = tracker.control_for(posts[0]).unwrap();
                let button = tracker.button_for(&id).unwrap();

                assert_eq!(page.dispatch(EventKind::Click, button), 1);
                let action = rx.recv().await.unwrap();
                assert_eq!(action.id(), "urn:li:activity:42");
            })
            .await;
    }

    #[tokio::test]
    async fn test_reset_keeps_captured_state_and_reuses_control() {
        let (page, tracker, _rx) = setup();
        let posts = containers(&page);
        tracker.handle_visible(&posts);
        let id = tracker.control_for(posts[0]).unwrap();
        tracker.capture(&id).await.unwrap();

        tracker.reset_tracking();
        assert!(tracker.control_ids().is_empty());

        tracker.handle_visible(&posts);
        assert_eq!(page.query_all(&CONTROL).len(), 2);
        assert_eq!(tracker.state(&id), ButtonState::Success);
        assert_eq!(tracker.capture(&id).await.unwrap(), ButtonState::Captured);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_drops_states_of_removed_posts() {
        let (page, tracker, _rx) = setup();
        let posts = containers(&page);
        tracker.handle_visible(&posts);
        let captured = tracker.control_for(posts[0]).unwrap();
        let failed = tracker.control_for(posts[1]).unwrap();
        tracker.capture(&captured).await.unwrap();
        tracker.capture(&failed).await.unwrap_err();

        // Live controls keep their state however old it is
        tokio::time::advance(CAPTURED_STATE_RETENTION * 2).await;
        tracker.prune();
        assert_eq!(tracker.state(&failed), ButtonState::Error);
        assert_eq!(tracker.state(&captured), ButtonState::Success);

        tracker.capture(&captured).await.unwrap();
        for post in &posts {
            page.remove(*post);
        }
        tracker.prune();
        assert!(tracker.control_ids().is_empty());
        assert_eq!(tracker.state(&failed), ButtonState::Default);
        assert_eq!(tracker.state(&captured), ButtonState::Captured);

        tokio::time::advance(CAPTURED_STATE_RETENTION).await;
        tracker.prune();
        assert_eq!(tracker.state(&captured), ButtonState::Default);
    }
}
