//! Capture orchestrator.
//!
//! Owns the scheduler and the four trackers, and routes scheduler events to
//! them. Everything runs on one thread: `init` must be called from inside a
//! `LocalSet`.

use crate::config::Config;
use crate::dom::Page;
use crate::scheduler::{PerformanceManager, SchedulerEvent, SchedulerHandle};
use crate::selectors::SelectorRegistry;
use crate::sink::OutputSink;
use crate::trackers::{
    CommentTracker, ConnectionTracker, MessageTracker, PostTracker, Tracker, TrackerContext,
    TrackerStatsSnapshot,
};
use std::rc::Rc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// The four trackers, cheap to clone into the dispatcher task
#[derive(Clone)]
struct Trackers {
    post: Rc<PostTracker>,
    comment: Rc<CommentTracker>,
    message: Rc<MessageTracker>,
    connection: Rc<ConnectionTracker>,
}

impl Trackers {
    fn all(&self) -> [&dyn Tracker; 4] {
        [&*self.post, &*self.comment, &*self.message, &*self.connection]
    }
}

pub struct CaptureApp {
    config: Config,
    page: Rc<Page>,
    selectors: Rc<SelectorRegistry>,
    trackers: Trackers,
    scheduler: Option<SchedulerHandle>,
    tasks: Vec<JoinHandle<()>>,
}

impl CaptureApp {
    /// Build the trackers against `page`; nothing observes until [`Self::init`]
    pub fn new(config: Config, page: Rc<Page>, sink: Rc<dyn OutputSink>) -> Self {
        let selectors = Rc::new(SelectorRegistry::default().with_overrides(&config.selectors));
        let cx = TrackerContext::new(
            Rc::clone(&page),
            Rc::clone(&selectors),
            sink,
            Rc::new(config.clone()),
        )
        .with_timing(config.timing.clone())
        .with_dedup(config.dedup.clone());

        let trackers = Trackers {
            post: PostTracker::new(cx.clone()),
            comment: CommentTracker::new(cx.clone()),
            message: MessageTracker::new(cx.clone()),
            connection: ConnectionTracker::new(cx),
        };

        Self {
            config,
            page,
            selectors,
            trackers,
            scheduler: None,
            tasks: Vec::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Start observing. Calling it twice is a no-op.
    pub fn init(&mut self) {
        if self.is_initialized() {
            debug!("Capture already initialized");
            return;
        }
        info!(
            "Initializing capture on {} (selectors {})",
            self.page.url(),
            self.selectors.version
        );

        for tracker in self.trackers.all() {
            tracker.init();
        }

        let (manager, handle, events) = PerformanceManager::new(
            Rc::clone(&self.page),
            &self.selectors,
            self.config.scheduler.clone(),
        );
        self.tasks.push(tokio::task::spawn_local(manager.run()));
        self.tasks.push(tokio::task::spawn_local(dispatch(
            self.trackers.clone(),
            handle.clone(),
            events,
        )));
        self.scheduler = Some(handle);
    }

    /// Ask the scheduler for an immediate full rescan
    pub fn request_rescan(&self) {
        if let Some(handle) = &self.scheduler {
            handle.request_rescan();
        }
    }

    /// Stop observing and tear every tracker down.
    ///
    /// Pending timers and confirmation waits are cancelled, so nothing is
    /// delivered after this returns.
    pub fn cleanup(&mut self) {
        let Some(handle) = self.scheduler.take() else {
            return;
        };
        info!("Cleaning up capture");
        handle.shutdown();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        for tracker in self.trackers.all() {
            tracker.cleanup();
        }
    }

    pub fn stats(&self) -> Vec<TrackerStatsSnapshot> {
        self.trackers.all().iter().map(|t| t.stats()).collect()
    }

    pub fn post_tracker(&self) -> &Rc<PostTracker> {
        &self.trackers.post
    }

    pub fn comment_tracker(&self) -> &Rc<CommentTracker> {
        &self.trackers.comment
    }

    pub fn message_tracker(&self) -> &Rc<MessageTracker> {
        &self.trackers.message
    }

    pub fn connection_tracker(&self) -> &Rc<ConnectionTracker> {
        &self.trackers.connection
    }

    pub fn page(&self) -> &Rc<Page> {
        &self.page
    }
}

impl Drop for CaptureApp {
    fn drop(&mut self) {
        self.cleanup();
    }
}

async fn dispatch(
    trackers: Trackers,
    scheduler: SchedulerHandle,
    mut events: mpsc::UnboundedReceiver<SchedulerEvent>,
) {
    while let Some(event) = events.recv().await {
        trace!("Scheduler event: {:?}", event);
        match event {
            SchedulerEvent::PostsVisible(containers) => {
                for container in trackers.post.handle_visible(&containers) {
                    scheduler.mark_processed(container);
                }
            }
            SchedulerEvent::Rescan { reason, surfaces } => {
                debug!("Rescan ({:?}) of {:?}", reason, surfaces);
                for tracker in trackers.all() {
                    tracker.scan(&surfaces);
                }
            }
            SchedulerEvent::Navigated { from, to } => {
                info!("Navigated from {} to {}", from, to);
                for tracker in trackers.all() {
                    tracker.reset_tracking();
                }
            }
            SchedulerEvent::Maintenance { evicted, tracked } => {
                trace!("Maintenance evicted {} posts, {} still tracked", evicted, tracked);
                for tracker in trackers.all() {
                    tracker.prune();
                }
            }
            SchedulerEvent::DocumentReplaced => {
                for tracker in trackers.all() {
                    tracker.reset_tracking();
                }
            }
        }
    }
    debug!("Scheduler event stream closed");
}
