//! Connection invitation tracker.
//!
//! Connect buttons and invitation modals come and go constantly, so a single
//! click listener is delegated from the document node. A click on a connect
//! button snapshots the card and parks it under the recipient's name. A send
//! from the "add a note" modal claims the parked snapshot for the same
//! person; otherwise the connect flow delivers it once the settle delay ends.
//! Either way, the invitation is confirmed against the toast or the
//! "Pending" button, and delivered unconfirmed when neither shows up.

use super::{
    deliver, wait_for, FlowState, Lifecycle, ListenerRegistry, Tracker, TrackerContext, TrackerStats,
    TrackerStatsSnapshot,
};
use crate::dom::{DomEvent, EventKind};
use crate::extract::{current_user, extract_at, ExtractContext, InvitationConfirmer, InviteSnapshot, InviteSnapshotExtractor};
use crate::scheduler::SurfaceKind;
use crate::trackers::RecentCaptureCache;
use crate::types::{ActionKind, Actor, CaptureError, CapturedAction, Confirmation, ConnectionRequestRecord};
use chrono::Utc;
use ego_tree::NodeId;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

pub struct ConnectionTracker {
    me: Weak<ConnectionTracker>,
    cx: TrackerContext,
    lifecycle: Lifecycle,
    listeners: RefCell<ListenerRegistry>,
    /// Flow per anchor (the connect button, or the modal send button)
    flows: RefCell<HashMap<NodeId, FlowState>>,
    /// Card snapshots from connect clicks, by recipient, until the modal
    /// send claims them or the settle task delivers them
    pending: RefCell<HashMap<String, Parked>>,
    dedup: RefCell<RecentCaptureCache>,
    stats: TrackerStats,
}

#[derive(Debug, Clone)]
struct Parked {
    button: NodeId,
    snapshot: InviteSnapshot,
}

fn recipient_key(snapshot: &InviteSnapshot) -> String {
    snapshot.recipient.name.trim().to_lowercase()
}

impl ConnectionTracker {
    pub fn new(cx: TrackerContext) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            dedup: RefCell::new(cx.new_dedup_cache()),
            cx,
            lifecycle: Lifecycle::default(),
            listeners: RefCell::new(ListenerRegistry::default()),
            flows: RefCell::new(HashMap::new()),
            pending: RefCell::new(HashMap::new()),
            stats: TrackerStats::default(),
        })
    }

    pub fn flow_state(&self, anchor: NodeId) -> FlowState {
        self.flows
            .borrow()
            .get(&anchor)
            .copied()
            .unwrap_or(FlowState::Idle)
    }

    fn set_flow(&self, anchor: NodeId, state: FlowState) {
        trace!("Invitation flow {:?} -> {:?}", anchor, state);
        self.flows.borrow_mut().insert(anchor, state);
    }

    fn modal_open(&self) -> bool {
        self.cx
            .page
            .find_first(&self.cx.selectors.connection.modal, None)
            .is_some()
    }

    /// Remove the parked snapshot for `key` if `button` still owns it
    fn take_parked(&self, key: &str, button: NodeId) -> Option<InviteSnapshot> {
        let owned = self.pending.borrow().get(key).map(|p| p.button) == Some(button);
        if !owned {
            return None;
        }
        self.pending.borrow_mut().remove(key).map(|p| p.snapshot)
    }

    /// Parked snapshot a modal send belongs to.
    ///
    /// Matched by recipient; a modal without a readable name takes the only
    /// parked snapshot, if there is exactly one.
    fn claim_parked(&self, modal: Option<&InviteSnapshot>) -> Option<Parked> {
        let mut pending = self.pending.borrow_mut();
        match modal {
            Some(snapshot) => pending.remove(&recipient_key(snapshot)),
            None if pending.len() == 1 => {
                let key = pending.keys().next().cloned()?;
                pending.remove(&key)
            }
            None => None,
        }
    }

    fn ensure_delegate(&self) {
        let page = &self.cx.page;
        let me = self.me.clone();
        let listener = Rc::new(move |event: &DomEvent| {
            if let Some(tracker) = me.upgrade() {
                tracker.on_click(event.target);
            }
        });
        if self
            .listeners
            .borrow_mut()
            .attach(page, page.document_node(), EventKind::Click, listener)
        {
            debug!("Connection click delegate attached");
        }
    }

    fn on_click(&self, target: NodeId) {
        if !self.lifecycle.is_active() {
            return;
        }
        let page = &self.cx.page;
        let selectors = &self.cx.selectors.connection;
        if let Some(button) = page.closest(target, &selectors.connect_button) {
            self.on_connect(button);
        } else if let Some(send) = page.closest(target, &selectors.send_button) {
            if page.closest(send, &selectors.modal).is_some() {
                self.on_modal_send(send);
            }
        }
    }

    fn on_connect(&self, button: NodeId) {
        if self.flow_state(button).in_flight() {
            debug!("Connect click while an invitation is in flight, ignoring");
            return;
        }
        let Some(snapshot) = extract_at(&self.cx.page, &self.cx.selectors, &InviteSnapshotExtractor, Some(button))
        else {
            debug!("Connect click without a recognizable recipient, ignoring");
            return;
        };
        let Some(tracker) = self.me.upgrade() else {
            return;
        };

        debug!("Connect clicked for {}", snapshot.recipient.name);
        self.stats.add_discovered(1);
        let key = recipient_key(&snapshot);
        self.pending.borrow_mut().insert(key.clone(), Parked { button, snapshot });
        self.set_flow(
            button,
            if self.modal_open() { FlowState::AwaitingModal } else { FlowState::Clicked },
        );

        self.lifecycle.spawn(async move {
            tokio::time::sleep(tracker.cx.timing.connection_settle()).await;
            if !tracker.lifecycle.is_active() {
                return;
            }
            if tracker.modal_open() {
                if tracker.pending.borrow().get(&key).map(|p| p.button) == Some(button) {
                    debug!("Invitation modal open, waiting for send");
                    tracker.set_flow(button, FlowState::AwaitingModal);
                }
                return;
            }
            // Gone means the modal send took over this invitation
            let Some(snapshot) = tracker.take_parked(&key, button) else {
                trace!("Connect flow for {} claimed by modal send", key);
                return;
            };
            tracker.confirm_and_deliver(button, snapshot).await;
        });
    }

    fn on_modal_send(&self, send: NodeId) {
        let page = &self.cx.page;
        let modal = page.closest(send, &self.cx.selectors.connection.modal);
        let from_modal = extract_at(page, &self.cx.selectors, &InviteSnapshotExtractor, modal);
        let parked = self.claim_parked(from_modal.as_ref());
        let anchor = parked.as_ref().map(|p| p.button).unwrap_or(send);
        if parked.is_none() && self.flow_state(anchor).in_flight() {
            debug!("Modal send while an invitation is in flight, ignoring");
            return;
        }

        let snapshot = match (from_modal, parked) {
            (Some(modal), Some(card)) => Some(modal.merge(&card.snapshot)),
            (Some(modal), None) => Some(modal),
            (None, Some(card)) => Some(card.snapshot),
            (None, None) => None,
        };
        let (Some(snapshot), Some(tracker)) = (snapshot, self.me.upgrade()) else {
            debug!("Modal send without a recognizable recipient, ignoring");
            return;
        };

        debug!(
            "Invitation to {} sent from modal ({})",
            snapshot.recipient.name,
            if snapshot.custom_message.is_some() { "with note" } else { "no note" }
        );
        if anchor == send {
            self.stats.add_discovered(1);
        }
        self.set_flow(anchor, FlowState::Clicked);
        self.lifecycle.spawn(async move {
            tokio::time::sleep(tracker.cx.timing.connection_settle()).await;
            if !tracker.lifecycle.is_active() {
                return;
            }
            tracker.confirm_and_deliver(anchor, snapshot).await;
        });
    }

    async fn confirm_and_deliver(&self, anchor: NodeId, snapshot: InviteSnapshot) {
        self.set_flow(anchor, FlowState::AwaitingConfirmation);
        let page = &self.cx.page;

        let confirmed = wait_for("invitation confirmation", self.cx.timing.modal_wait_timeout(), || {
            let root = if page.is_connected(anchor) { Some(anchor) } else { page.body() };
            extract_at(page, &self.cx.selectors, &InvitationConfirmer { snapshot: &snapshot }, root)
        })
        .await;
        if !self.lifecycle.is_active() {
            return;
        }

        let (record, state) = match confirmed {
            Ok(record) => (record, FlowState::Confirmed),
            Err(CaptureError::Timeout(what)) => {
                debug!("No {} for {}, delivering snapshot", what, snapshot.recipient.name);
                (self.unconfirmed(snapshot), FlowState::ConfirmationFailed)
            }
            Err(e) => {
                debug!("Invitation confirmation failed: {}", e);
                (self.unconfirmed(snapshot), FlowState::ConfirmationFailed)
            }
        };
        self.set_flow(anchor, state);
        let _ = deliver(&self.cx, &self.dedup, &self.stats, CapturedAction::ConnectionRequest(record)).await;
    }

    fn unconfirmed(&self, snapshot: InviteSnapshot) -> ConnectionRequestRecord {
        let page = &self.cx.page;
        let url = page.url();
        let actor = page
            .with_html(|html| current_user(&ExtractContext::new(html, &self.cx.selectors, &url)))
            .unwrap_or_else(|| Actor::named("Unknown"));
        snapshot.into_record(actor, Confirmation::Unconfirmed, Utc::now())
    }
}

impl Tracker for ConnectionTracker {
    fn kind(&self) -> ActionKind {
        ActionKind::ConnectionRequest
    }

    fn init(&self) {
        self.lifecycle.start();
        self.ensure_delegate();
    }

    fn scan(&self, surfaces: &BTreeSet<SurfaceKind>) {
        if !self.lifecycle.is_active() {
            return;
        }
        // Listeners are dropped with a replaced document
        self.ensure_delegate();
        if !surfaces.contains(&SurfaceKind::Connection) || !self.modal_open() {
            return;
        }
        let parked: Vec<NodeId> = self.pending.borrow().values().map(|p| p.button).collect();
        for button in parked {
            if self.flow_state(button) == FlowState::Clicked {
                self.set_flow(button, FlowState::AwaitingModal);
            }
        }
    }

    fn prune(&self) {
        let page = &self.cx.page;
        // A modal dismissed without sending leaves its snapshot behind
        if !self.modal_open() {
            let mut flows = self.flows.borrow_mut();
            self.pending.borrow_mut().retain(|key, parked| {
                let awaiting = flows.get(&parked.button) == Some(&FlowState::AwaitingModal);
                if awaiting {
                    debug!("Invitation modal for {} dismissed", key);
                    flows.remove(&parked.button);
                }
                !awaiting
            });
        }
        self.flows
            .borrow_mut()
            .retain(|anchor, state| state.in_flight() || page.is_connected(*anchor));
    }

    fn reset_tracking(&self) {
        self.listeners.borrow_mut().detach_all(&self.cx.page);
        self.flows.borrow_mut().retain(|_, state| state.in_flight());
        self.pending.borrow_mut().clear();
    }

    fn cleanup(&self) {
        self.lifecycle.shutdown();
        self.reset_tracking();
        self.flows.borrow_mut().clear();
        self.stats().log();
    }

    fn stats(&self) -> TrackerStatsSnapshot {
        self.stats.snapshot(ActionKind::ConnectionRequest)
    }
}
