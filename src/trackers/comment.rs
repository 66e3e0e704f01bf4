//! Comment tracker

use super::{deliver, Lifecycle, ListenerRegistry, Tracker, TrackerContext, TrackerStats, TrackerStatsSnapshot};
use crate::dom::{DomEvent, EventKind};
use crate::extract::comment::find_comment_by_text;
use crate::extract::{current_user, extract_at, CommentBoxExtractor, CommentDraft, CommentExtractor, ExtractContext, Extractor};
use crate::scheduler::SurfaceKind;
use crate::trackers::RecentCaptureCache;
use crate::types::{ActionKind, CapturedAction, CommentRecord};
use chrono::Utc;
use ego_tree::NodeId;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

pub struct CommentTracker {
    me: Weak<CommentTracker>,
    cx: TrackerContext,
    lifecycle: Lifecycle,
    listeners: RefCell<ListenerRegistry>,
    dedup: RefCell<RecentCaptureCache>,
    stats: TrackerStats,
}

impl CommentTracker {
    pub fn new(cx: TrackerContext) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            dedup: RefCell::new(cx.new_dedup_cache()),
            cx,
            lifecycle: Lifecycle::default(),
            listeners: RefCell::new(ListenerRegistry::default()),
            stats: TrackerStats::default(),
        })
    }

    fn listener(&self) -> Rc<dyn Fn(&DomEvent)> {
        let me = self.me.clone();
        Rc::new(move |event: &DomEvent| {
            if let Some(tracker) = me.upgrade() {
                tracker.on_submit(event.current_target);
            }
        })
    }

    /// Snapshot the draft synchronously, then confirm after the settle delay
    fn on_submit(&self, target: NodeId) {
        if !self.lifecycle.is_active() {
            return;
        }
        let page = &self.cx.page;
        let comment_box = page.closest(target, &self.cx.selectors.comment.comment_box);
        let Some(draft) = extract_at(page, &self.cx.selectors, &CommentBoxExtractor, comment_box) else {
            debug!("Comment submit without usable draft, ignoring");
            return;
        };
        trace!("Comment draft captured ({} chars)", draft.text.chars().count());

        let Some(tracker) = self.me.upgrade() else {
            return;
        };
        self.lifecycle.spawn(async move {
            tokio::time::sleep(tracker.cx.timing.comment_settle()).await;
            if !tracker.lifecycle.is_active() {
                return;
            }
            let Some(record) = tracker.resolve(draft) else {
                debug!("Submitted comment could not be attributed, dropping");
                return;
            };
            let _ = deliver(&tracker.cx, &tracker.dedup, &tracker.stats, CapturedAction::Comment(record)).await;
        });
    }

    /// The rendered comment if it can be found, else the draft authored by
    /// the current user
    fn resolve(&self, draft: CommentDraft) -> Option<CommentRecord> {
        let page = &self.cx.page;
        let url = page.url();
        page.with_html(|html| {
            let cx = ExtractContext::new(html, &self.cx.selectors, &url);
            let scope = draft
                .post_node
                .and_then(|node| cx.element(node))
                .unwrap_or_else(|| cx.document());

            let rendered = find_comment_by_text(&cx, scope, &draft.text, &draft.existing_comments)
                .and_then(|item| CommentExtractor.extract(&cx, Some(item)));
            if let Some(record) = rendered {
                debug!("Comment {} found in rendered thread", record.id);
                return Some(record);
            }

            let actor = current_user(&cx)?;
            debug!("Rendered comment not found, attributing to {}", actor.name);
            Some(draft.into_record(actor, Utc::now()))
        })
    }
}

impl Tracker for CommentTracker {
    fn kind(&self) -> ActionKind {
        ActionKind::Comment
    }

    fn init(&self) {
        self.lifecycle.start();
    }

    fn scan(&self, surfaces: &BTreeSet<SurfaceKind>) {
        if !self.lifecycle.is_active() || !surfaces.contains(&SurfaceKind::Comments) {
            return;
        }
        let page = &self.cx.page;
        let selectors = &self.cx.selectors.comment;
        let mut registry = self.listeners.borrow_mut();
        let mut attached = 0;

        for button in page.find_all(&selectors.submit_button) {
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
            debug!("Attached {} comment listeners", attached);
            self.stats.add_discovered(attached);
        }
    }

    fn prune(&self) {
        self.listeners.borrow_mut().prune(&self.cx.page);
    }

    fn reset_tracking(&self) {
        self.listeners.borrow_mut().detach_all(&self.cx.page);
    }

    fn cleanup(&self) {
        self.lifecycle.shutdown();
        self.reset_tracking();
        self.stats().log();
    }

    fn stats(&self) -> TrackerStatsSnapshot {
        self.stats.snapshot(ActionKind::Comment)
    }
}
