//! Feature trackers.
//!
//! Each tracker owns the listeners, registries and dedup cache for one kind
//! of user action. They share a shape: discover candidates on rescan, attach
//! one capturing listener per candidate, capture when the user acts, then
//! suppress duplicates and hand the record to the output sink.
//!
//! Nothing here propagates into host-page event dispatch. Listener callbacks
//! only take a synchronous snapshot and spawn the rest.

pub mod comment;
pub mod connection;
pub mod dedup;
pub mod message;
pub mod post;

pub use comment::CommentTracker;
pub use connection::ConnectionTracker;
pub use dedup::{dedup_key, DedupResult, RecentCaptureCache};
pub use message::MessageTracker;
pub use post::PostTracker;

use crate::config::{DedupConfig, TimingConfig};
use crate::dom::{EventKind, Listener, ListenerId, Page};
use crate::scheduler::SurfaceKind;
use crate::selectors::SelectorRegistry;
use crate::sink::{CaptureSettings, OutputSink};
use crate::types::{ActionKind, CaptureError, CapturedAction};
use ego_tree::NodeId;
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Interval between checks in [`wait_for`]
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared dependencies handed to every tracker
#[derive(Clone)]
pub struct TrackerContext {
    pub page: Rc<Page>,
    pub selectors: Rc<SelectorRegistry>,
    pub sink: Rc<dyn OutputSink>,
    pub settings: Rc<dyn CaptureSettings>,
    pub timing: TimingConfig,
    pub dedup: DedupConfig,
}

impl TrackerContext {
    pub fn new(
        page: Rc<Page>,
        selectors: Rc<SelectorRegistry>,
        sink: Rc<dyn OutputSink>,
        settings: Rc<dyn CaptureSettings>,
    ) -> Self {
        Self {
            page,
            selectors,
            sink,
            settings,
            timing: TimingConfig::default(),
            dedup: DedupConfig::default(),
        }
    }

    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_dedup(mut self, dedup: DedupConfig) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn new_dedup_cache(&self) -> RecentCaptureCache {
        RecentCaptureCache::new(self.dedup.debounce(), self.dedup.ttl())
    }
}

/// Operations the application drives on every tracker
pub trait Tracker {
    fn kind(&self) -> ActionKind;

    /// Mark the tracker live; spawned work only runs while it is
    fn init(&self);

    /// Discover candidates after the page changed
    fn scan(&self, surfaces: &BTreeSet<SurfaceKind>);

    /// Drop registry entries whose nodes left the document
    fn prune(&self);

    /// Detach listeners and clear registries, keeping in-flight captures
    fn reset_tracking(&self);

    /// Full teardown: reset and abort in-flight captures
    fn cleanup(&self);

    fn stats(&self) -> TrackerStatsSnapshot;
}

/// `initialized` flag plus the tasks a tracker spawned
#[derive(Default)]
pub struct Lifecycle {
    initialized: Cell<bool>,
    tasks: RefCell<Vec<JoinHandle<()>>>,
}

impl Lifecycle {
    pub fn start(&self) {
        self.initialized.set(true);
    }

    pub fn is_active(&self) -> bool {
        self.initialized.get()
    }

    /// Spawn on the current `LocalSet`; ignored once shut down
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + 'static,
    {
        if !self.is_active() {
            debug!("Tracker is shut down, not spawning");
            return;
        }
        let mut tasks = self.tasks.borrow_mut();
        tasks.retain(|task| !task.is_finished());
        tasks.push(tokio::task::spawn_local(future));
    }

    pub fn in_flight(&self) -> usize {
        self.tasks
            .borrow()
            .iter()
            .filter(|task| !task.is_finished())
            .count()
    }

    /// Abort every spawned task and refuse new ones
    pub fn shutdown(&self) {
        self.initialized.set(false);
        for task in self.tasks.borrow_mut().drain(..) {
            task.abort();
        }
    }
}

/// Listeners a tracker attached, at most one per node and event kind
#[derive(Default)]
pub struct ListenerRegistry {
    attached: HashMap<(NodeId, EventKind), ListenerId>,
}

impl ListenerRegistry {
    /// Attach `listener` unless one is already registered for `(node, kind)`
    pub fn attach(&mut self, page: &Page, node: NodeId, kind: EventKind, listener: Listener) -> bool {
        if self.attached.contains_key(&(node, kind)) {
            return false;
        }
        let id = page.add_listener(node, kind, listener);
        self.attached.insert((node, kind), id);
        true
    }

    pub fn contains(&self, node: NodeId, kind: EventKind) -> bool {
        self.attached.contains_key(&(node, kind))
    }

    /// Forget listeners on detached nodes
    pub fn prune(&mut self, page: &Page) -> usize {
        let before = self.attached.len();
        self.attached.retain(|(node, _), id| {
            let keep = page.is_connected(*node);
            if !keep {
                page.remove_listener(*id);
            }
            keep
        });
        before - self.attached.len()
    }

    pub fn detach_all(&mut self, page: &Page) {
        for (_, id) in self.attached.drain() {
            page.remove_listener(id);
        }
    }

    pub fn len(&self) -> usize {
        self.attached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }
}

/// Per-tracker counters
#[derive(Default)]
pub struct TrackerStats {
    discovered: Cell<u64>,
    captured: Cell<u64>,
    duplicates: Cell<u64>,
    failed: Cell<u64>,
}

impl TrackerStats {
    pub fn add_discovered(&self, n: usize) {
        self.discovered.set(self.discovered.get() + n as u64);
    }

    fn bump(cell: &Cell<u64>) {
        cell.set(cell.get() + 1);
    }

    pub fn snapshot(&self, kind: ActionKind) -> TrackerStatsSnapshot {
        TrackerStatsSnapshot {
            kind,
            discovered: self.discovered.get(),
            captured: self.captured.get(),
            duplicates: self.duplicates.get(),
            failed: self.failed.get(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackerStatsSnapshot {
    pub kind: ActionKind,
    pub discovered: u64,
    pub captured: u64,
    pub duplicates: u64,
    pub failed: u64,
}

impl TrackerStatsSnapshot {
    pub fn log(&self) {
        info!(
            "{} tracker: {} discovered, {} captured, {} duplicates, {} failed",
            self.kind.as_str(),
            self.discovered,
            self.captured,
            self.duplicates,
            self.failed
        );
    }
}

/// Result of a delivery attempt that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivered {
    Sent,
    /// Suppressed by the dedup window
    Duplicate,
}

/// Enabled check, dedup window, then the sink.
///
/// The dedup key is recorded when the attempt is made, so a failed delivery
/// still suppresses repeats inside the window.
pub async fn deliver(
    cx: &TrackerContext,
    cache: &RefCell<RecentCaptureCache>,
    stats: &TrackerStats,
    action: CapturedAction,
) -> Result<Delivered, CaptureError> {
    let kind = action.kind();
    if !cx.settings.is_capture_enabled(kind) {
        debug!("Capture disabled for {}, dropping {}", kind.as_str(), action.id());
        return Err(CaptureError::Disabled(kind));
    }

    let key = dedup_key(&action, cx.dedup.key_content_chars);
    let result = cache.borrow_mut().check_and_record(&key, Instant::now());
    if result == DedupResult::Duplicate {
        debug!("Suppressed duplicate {}", action.summary());
        TrackerStats::bump(&stats.duplicates);
        return Ok(Delivered::Duplicate);
    }

    match cx.sink.deliver(&action).await.into_result() {
        Ok(()) => {
            info!("Delivered {}", action.summary());
            TrackerStats::bump(&stats.captured);
            Ok(Delivered::Sent)
        }
        Err(e) => {
            warn!("Delivery of {} failed: {}", action.id(), e);
            TrackerStats::bump(&stats.failed);
            Err(e)
        }
    }
}

/// Poll `check` until it yields a value or `timeout` elapses
pub async fn wait_for<T>(
    what: &str,
    timeout: Duration,
    mut check: impl FnMut() -> Option<T>,
) -> Result<T, CaptureError> {
    let polling = async {
        loop {
            if let Some(found) = check() {
                return found;
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    };
    tokio::time::timeout(timeout, polling)
        .await
        .map_err(|_| CaptureError::Timeout(what.to_string()))
}

/// Progress of a two-phase capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    Idle,
    Clicked,
    /// Waiting for the user to finish an invitation modal
    AwaitingModal,
    AwaitingConfirmation,
    Confirmed,
    /// No confirmation; the snapshot was delivered instead
    ConfirmationFailed,
}

impl FlowState {
    pub fn in_flight(self) -> bool {
        matches!(
            self,
            FlowState::Clicked | FlowState::AwaitingModal | FlowState::AwaitingConfirmation
        )
    }
}
