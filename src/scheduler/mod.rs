//! Observation scheduler.
//!
//! Turns raw page signals into a small set of normalized events for the
//! trackers. Post containers go through a per-node lifecycle
//! (`observed -> processed -> stale -> evicted`); everything else is
//! coalesced into debounced rescans.
//!
//! The scheduler never fails. A query that finds nothing means "not there
//! yet" and the next rescan tries again.

pub mod mutations;
pub mod tracked;
pub mod visibility;

pub use mutations::{MutationFilter, SurfaceKind};
pub use tracked::{Phase, TrackedElement, TrackedElements, TrackedStats};
pub use visibility::VisibilityBatcher;

use crate::config::SchedulerConfig;
use crate::dom::{Page, PageSignal};
use crate::selectors::{SelectorGroup, SelectorRegistry};
use ego_tree::NodeId;
use std::collections::BTreeSet;
use std::rc::Rc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

/// Why a rescan was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescanReason {
    Initial,
    Mutation,
    Resumed,
    Navigation,
    Requested,
}

/// Normalized events consumed by the trackers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A batch of post containers that entered the viewport
    PostsVisible(Vec<NodeId>),
    /// Surfaces may have appeared; trackers should rediscover candidates
    Rescan {
        reason: RescanReason,
        surfaces: BTreeSet<SurfaceKind>,
    },
    /// The URL changed without a document load
    Navigated { from: String, to: String },
    /// Periodic cleanup ran
    Maintenance { evicted: usize, tracked: usize },
    /// The document was replaced and every node id is void
    DocumentReplaced,
}

/// Commands accepted from the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerCommand {
    /// A post container was handled; it will not be reported again
    MarkProcessed(NodeId),
    Rescan,
    Shutdown,
}

/// Cloneable handle for sending commands to a running scheduler
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub fn mark_processed(&self, node: NodeId) {
        let _ = self.tx.send(SchedulerCommand::MarkProcessed(node));
    }

    pub fn request_rescan(&self) {
        let _ = self.tx.send(SchedulerCommand::Rescan);
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(SchedulerCommand::Shutdown);
    }
}

/// Single owner of post-container tracking and observation timers
pub struct PerformanceManager {
    page: Rc<Page>,
    config: SchedulerConfig,
    post_containers: SelectorGroup,
    filter: MutationFilter,
    posts: TrackedElements<NodeId>,
    batcher: VisibilityBatcher,
    events: mpsc::UnboundedSender<SchedulerEvent>,
    signals: Option<mpsc::UnboundedReceiver<PageSignal>>,
    commands: Option<mpsc::UnboundedReceiver<SchedulerCommand>>,
    paused: bool,
    last_url: String,
    last_batch: Option<Instant>,
    pending_rescan: Option<(Instant, BTreeSet<SurfaceKind>)>,
    pending_navigation: Option<Instant>,
}

impl PerformanceManager {
    /// Create a scheduler subscribed to `page`.
    ///
    /// Signals emitted after this call are buffered until [`Self::run`]
    /// starts.
    pub fn new(
        page: Rc<Page>,
        selectors: &SelectorRegistry,
        config: SchedulerConfig,
    ) -> (Self, SchedulerHandle, mpsc::UnboundedReceiver<SchedulerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let signals = page.subscribe();

        let manager = Self {
            posts: TrackedElements::new(config.max_tracked_elements, config.stale_after()),
            batcher: VisibilityBatcher::new(config.visibility_batch_size),
            post_containers: selectors.post.container.clone(),
            filter: MutationFilter::new(selectors),
            last_url: page.url(),
            page,
            config,
            events: events_tx,
            signals: Some(signals),
            commands: Some(commands_rx),
            paused: false,
            last_batch: None,
            pending_rescan: None,
            pending_navigation: None,
        };
        (manager, SchedulerHandle { tx: commands_tx }, events_rx)
    }

    pub fn stats(&self) -> TrackedStats {
        self.posts.stats()
    }

    /// Drive the scheduler until shutdown or until nobody listens
    pub async fn run(mut self) {
        let (Some(mut signals), Some(mut commands)) = (self.signals.take(), self.commands.take())
        else {
            return;
        };

        let start = Instant::now();
        let mut url_poll = interval_at(start + self.config.url_poll_interval(), self.config.url_poll_interval());
        url_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cleanup = interval_at(start + self.config.cleanup_interval(), self.config.cleanup_interval());
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.paused = !self.page.is_visible();
        info!(
            "Scheduler started at {} (batch {} every {:?})",
            self.last_url,
            self.config.visibility_batch_size,
            self.config.batch_interval()
        );
        if !self.paused && !self.emit_rescan(RescanReason::Initial, SurfaceKind::all()) {
            return;
        }

        loop {
            let batch_at = self.next_batch_deadline();
            let rescan_at = self.pending_rescan.as_ref().map(|(at, _)| *at);
            let navigation_at = self.pending_navigation;
            let active = !self.paused;

            let keep_running = tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => false,
                },
                signal = signals.recv() => match signal {
                    Some(signal) => self.handle_signal(signal),
                    None => false,
                },
                _ = sleep_until(batch_at.unwrap_or(start)), if active && batch_at.is_some() => {
                    self.flush_batch()
                }
                _ = sleep_until(rescan_at.unwrap_or(start)), if active && rescan_at.is_some() => {
                    let surfaces = self
                        .pending_rescan
                        .take()
                        .map(|(_, surfaces)| surfaces)
                        .unwrap_or_default();
                    self.emit_rescan(RescanReason::Mutation, surfaces)
                }
                _ = sleep_until(navigation_at.unwrap_or(start)), if active && navigation_at.is_some() => {
                    self.pending_navigation = None;
                    self.emit_rescan(RescanReason::Navigation, SurfaceKind::all())
                }
                _ = url_poll.tick(), if active => self.poll_url(),
                _ = cleanup.tick() => self.run_maintenance(),
            };

            if !keep_running {
                break;
            }
        }

        let stats = self.posts.stats();
        info!(
            "Scheduler stopped ({} tracked posts, {} processed)",
            stats.entries, stats.processed
        );
    }

    fn handle_command(&mut self, command: SchedulerCommand) -> bool {
        match command {
            SchedulerCommand::MarkProcessed(node) => {
                if !self.posts.mark_processed(node) {
                    // Reported by a rescan rather than by visibility
                    self.posts.observe(node, Instant::now());
                    self.posts.mark_processed(node);
                    self.enforce_cap();
                }
                true
            }
            SchedulerCommand::Rescan => self.emit_rescan(RescanReason::Requested, SurfaceKind::all()),
            SchedulerCommand::Shutdown => {
                debug!("Scheduler shutdown requested");
                false
            }
        }
    }

    fn handle_signal(&mut self, signal: PageSignal) -> bool {
        match signal {
            PageSignal::Mutation { added, removed } => {
                for node in removed {
                    self.forget(node);
                }
                if added.is_empty() {
                    return true;
                }
                let surfaces = self.page.with_html(|html| self.filter.classify(html, &added));
                if surfaces.is_empty() {
                    trace!("Ignoring mutation of {} nodes", added.len());
                    return true;
                }
                let deadline = Instant::now() + self.config.mutation_debounce();
                match self.pending_rescan.as_mut() {
                    Some((at, pending)) => {
                        *at = deadline;
                        pending.extend(surfaces);
                    }
                    None => self.pending_rescan = Some((deadline, surfaces)),
                }
                true
            }
            PageSignal::Intersection { node, visible } => {
                if visible {
                    self.on_visible(node);
                }
                true
            }
            PageSignal::Visibility { visible } => {
                if visible && self.paused {
                    info!("Page visible again, resuming observation");
                    self.paused = false;
                    let mut surfaces = SurfaceKind::all();
                    if let Some((_, pending)) = self.pending_rescan.take() {
                        surfaces.extend(pending);
                    }
                    self.emit_rescan(RescanReason::Resumed, surfaces)
                } else {
                    if !visible && !self.paused {
                        info!("Page hidden, pausing observation");
                    }
                    self.paused = !visible;
                    true
                }
            }
            PageSignal::DocumentReplaced { generation } => {
                debug!("Document replaced (generation {}), dropping tracked posts", generation);
                self.posts.clear();
                self.batcher.clear();
                self.pending_rescan = None;
                self.pending_navigation = None;
                self.last_url = self.page.url();
                self.send(SchedulerEvent::DocumentReplaced)
                    && (self.paused || self.emit_rescan(RescanReason::Initial, SurfaceKind::all()))
            }
        }
    }

    fn on_visible(&mut self, node: NodeId) {
        let Some(container) = self.page.closest(node, &self.post_containers) else {
            return;
        };
        let now = Instant::now();
        self.posts.observe(container, now);
        if self.posts.phase(container) == Some(Phase::Observed) && self.batcher.push(container) {
            trace!("Queued visible post {:?}", container);
        }
        self.enforce_cap();
    }

    fn next_batch_deadline(&self) -> Option<Instant> {
        if self.batcher.is_empty() {
            return None;
        }
        Some(match self.last_batch {
            Some(last) => last + self.config.batch_interval(),
            None => Instant::now(),
        })
    }

    fn flush_batch(&mut self) -> bool {
        self.last_batch = Some(Instant::now());
        let page = Rc::clone(&self.page);
        let batch: Vec<NodeId> = self
            .batcher
            .next_batch()
            .into_iter()
            .filter(|node| page.is_connected(*node))
            .collect();
        if batch.is_empty() {
            return true;
        }
        debug!("{} posts became visible", batch.len());
        self.send(SchedulerEvent::PostsVisible(batch))
    }

    fn poll_url(&mut self) -> bool {
        let url = self.page.url();
        if url == self.last_url {
            return true;
        }
        info!("Navigation detected: {} -> {}", self.last_url, url);
        let from = std::mem::replace(&mut self.last_url, url.clone());
        self.posts.clear();
        self.batcher.clear();
        self.pending_rescan = None;
        self.pending_navigation = Some(Instant::now() + self.config.navigation_rescan_delay());
        self.send(SchedulerEvent::Navigated { from, to: url })
    }

    fn run_maintenance(&mut self) -> bool {
        let page = Rc::clone(&self.page);
        let mut evicted = self
            .posts
            .evict_stale(Instant::now(), |node| page.is_connected(node));
        evicted.extend(self.posts.enforce_cap());
        for node in &evicted {
            self.batcher.remove(*node);
        }
        if !evicted.is_empty() {
            debug!("Maintenance evicted {} posts", evicted.len());
        }
        self.send(SchedulerEvent::Maintenance {
            evicted: evicted.len(),
            tracked: self.posts.len(),
        })
    }

    fn enforce_cap(&mut self) {
        for node in self.posts.enforce_cap() {
            self.batcher.remove(node);
        }
    }

    fn forget(&mut self, node: NodeId) {
        self.posts.remove(node);
        self.batcher.remove(node);
    }

    fn emit_rescan(&mut self, reason: RescanReason, surfaces: BTreeSet<SurfaceKind>) -> bool {
        debug!("Rescan ({:?}) for {:?}", reason, surfaces);
        self.send(SchedulerEvent::Rescan { reason, surfaces })
    }

    /// Returns `false` once the consumer is gone
    fn send(&self, event: SchedulerEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use scraper::Selector;
    use std::time::Duration;
    use tokio::task::LocalSet;

    fn feed_page() -> Rc<Page> {
        Rc::new(Page::new(
            "https://www.linkedin.com/feed/",
            "<html><body><main></main></body></html>",
        ))
    }

    fn main_node(page: &Page) -> NodeId {
        page.query_first(&Selector::parse("main").unwrap()).unwrap()
    }

    fn post_fragment(count: usize) -> String {
        (0..count)
            .map(|i| {
                format!(
                    r#"<div class="feed-shared-update-v2" data-urn="urn:li:activity:{}"><p>post {}</p></div>"#,
                    i, i
                )
            })
            .collect()
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<SchedulerEvent>) -> SchedulerEvent {
        tokio::time::timeout(Duration::from_secs(60), events.recv())
            .await
            .expect("scheduler went quiet")
            .expect("scheduler stopped")
    }

    #[tokio::test(start_paused = true)]
    async fn test_visible_posts_are_batched() {
        LocalSet::new()
            .run_until(async {
                let page = feed_page();
                let (manager, _handle, mut events) =
                    PerformanceManager::new(Rc::clone(&page), &SelectorRegistry::default(), SchedulerConfig::default());
                tokio::task::spawn_local(manager.run());

                assert!(matches!(
                    next_event(&mut events).await,
                    SchedulerEvent::Rescan { reason: RescanReason::Initial, .. }
                ));

                let posts = page.insert_html(main_node(&page), &post_fragment(12));
                for post in &posts {
                    page.set_intersecting(*post, true);
                }
                // A second sighting of the same node must not queue it twice
                page.set_intersecting(posts[0], true);

                let mut batches = Vec::new();
                let mut times = Vec::new();
                while batches.len() < 3 {
                    if let SchedulerEvent::PostsVisible(batch) = next_event(&mut events).await {
                        times.push(Instant::now());
                        batches.push(batch);
                    }
                }

                assert_eq!(batches[0], posts[0..5].to_vec());
                assert_eq!(batches[1], posts[5..10].to_vec());
                assert_eq!(batches[2], posts[10..12].to_vec());
                assert!(times[1] - times[0] >= Duration::from_millis(150));
                assert!(times[2] - times[1] >= Duration::from_millis(150));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_processed_posts_are_not_reported_again() {
        LocalSet::new()
            .run_until(async {
                let page = feed_page();
                let (manager, handle, mut events) =
                    PerformanceManager::new(Rc::clone(&page), &SelectorRegistry::default(), SchedulerConfig::default());
                tokio::task::spawn_local(manager.run());
                next_event(&mut events).await;

                let posts = page.insert_html(main_node(&page), &post_fragment(1));
                page.set_intersecting(posts[0], true);
                loop {
                    if let SchedulerEvent::PostsVisible(batch) = next_event(&mut events).await {
                        assert_eq!(batch, posts);
                        break;
                    }
                }

                handle.mark_processed(posts[0]);
                page.set_intersecting(posts[0], false);
                page.set_intersecting(posts[0], true);
                handle.request_rescan();

                // Everything up to the requested rescan has been handled
                loop {
                    match next_event(&mut events).await {
                        SchedulerEvent::PostsVisible(batch) => panic!("reported again: {:?}", batch),
                        SchedulerEvent::Rescan { reason: RescanReason::Requested, .. } => break,
                        _ => {}
                    }
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
                while let Ok(event) = events.try_recv() {
                    assert!(!matches!(event, SchedulerEvent::PostsVisible(_)));
                }
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_burst_is_debounced() {
        LocalSet::new()
            .run_until(async {
                let page = feed_page();
                let (manager, _handle, mut events) =
                    PerformanceManager::new(Rc::clone(&page), &SelectorRegistry::default(), SchedulerConfig::default());
                tokio::task::spawn_local(manager.run());
                next_event(&mut events).await;

                let main = main_node(&page);
                let started = Instant::now();
                for _ in 0..3 {
                    page.insert_html(main, &post_fragment(1));
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                page.insert_html(main, r#"<div class="ad-banner">noise</div>"#);

                match next_event(&mut events).await {
                    SchedulerEvent::Rescan { reason, surfaces } => {
                        assert_eq!(reason, RescanReason::Mutation);
                        assert_eq!(surfaces.into_iter().collect::<Vec<_>>(), vec![SurfaceKind::Posts]);
                        // Last qualifying mutation at +200ms, debounce 250ms
                        assert!(Instant::now() - started >= Duration::from_millis(450));
                    }
                    other => panic!("unexpected event {:?}", other),
                }
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_page_pauses_and_resumes_with_rescan() {
        LocalSet::new()
            .run_until(async {
                let page = feed_page();
                let (manager, _handle, mut events) =
                    PerformanceManager::new(Rc::clone(&page), &SelectorRegistry::default(), SchedulerConfig::default());
                tokio::task::spawn_local(manager.run());
                next_event(&mut events).await;

                page.set_visible(false);
                let posts = page.insert_html(main_node(&page), &post_fragment(2));
                for post in &posts {
                    page.set_intersecting(*post, true);
                }
                tokio::time::sleep(Duration::from_secs(2)).await;
                while let Ok(event) = events.try_recv() {
                    assert!(
                        matches!(event, SchedulerEvent::Maintenance { .. }),
                        "event while paused: {:?}",
                        event
                    );
                }

                page.set_visible(true);
                assert_eq!(
                    next_event(&mut events).await,
                    SchedulerEvent::Rescan {
                        reason: RescanReason::Resumed,
                        surfaces: SurfaceKind::all(),
                    }
                );
                assert_eq!(next_event(&mut events).await, SchedulerEvent::PostsVisible(posts));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_url_change_triggers_delayed_rescan() {
        LocalSet::new()
            .run_until(async {
                let page = feed_page();
                let (manager, _handle, mut events) =
                    PerformanceManager::new(Rc::clone(&page), &SelectorRegistry::default(), SchedulerConfig::default());
                tokio::task::spawn_local(manager.run());
                next_event(&mut events).await;

                page.set_url("https://www.linkedin.com/messaging/thread/2-abc/");
                let detected = loop {
                    if let SchedulerEvent::Navigated { from, to } = next_event(&mut events).await {
                        assert_eq!(from, "https://www.linkedin.com/feed/");
                        assert_eq!(to, "https://www.linkedin.com/messaging/thread/2-abc/");
                        break Instant::now();
                    }
                };
                assert!(matches!(
                    next_event(&mut events).await,
                    SchedulerEvent::Rescan { reason: RescanReason::Navigation, .. }
                ));
                assert!(Instant::now() - detected >= Duration::from_millis(500));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_evicts_detached_posts() {
        LocalSet::new()
            .run_until(async {
                let page = feed_page();
                let (manager, _handle, mut events) =
                    PerformanceManager::new(Rc::clone(&page), &SelectorRegistry::default(), SchedulerConfig::default());
                tokio::task::spawn_local(manager.run());
                next_event(&mut events).await;

                let wrapper = page.insert_html(
                    main_node(&page),
                    &format!("<section>{}</section>", post_fragment(1)),
                )[0];
                let post = page.find_all(&SelectorRegistry::default().post.container)[0];
                page.set_intersecting(post, true);
                // Removing the wrapper detaches the post without a removal signal for it
                page.remove(wrapper);

                loop {
                    if let SchedulerEvent::Maintenance { evicted, tracked } = next_event(&mut events).await {
                        assert_eq!(evicted, 1);
                        assert_eq!(tracked, 0);
                        break;
                    }
                }
            })
            .await;
    }
}
