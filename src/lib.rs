//! Feed Capture - social feed action capture pipeline
//!
//! Observes a live social-network page and turns the user's own actions into
//! canonical records:
//!
//! - **Posts**: an injected capture control on every visible feed post
//! - **Comments**: captured on submit, attributed from the rendered thread
//! - **Messages**: snapshotted on send, confirmed against the thread
//! - **Connection requests**: snapshotted on connect or modal send, confirmed
//!   by toast or pending button
//!
//! # Architecture
//!
//! A single-threaded scheduler ([`scheduler::PerformanceManager`]) turns raw
//! page signals into batched visibility reports and debounced rescans. The
//! trackers attach listeners, extract records with the selector registry,
//! suppress duplicates and hand the result to an [`sink::OutputSink`].

pub mod app;
pub mod bridge;
pub mod config;
pub mod dom;
pub mod extract;
pub mod scheduler;
pub mod selectors;
pub mod sink;
pub mod trackers;
pub mod types;

// Re-export commonly used types
pub use app::CaptureApp;
pub use config::Config;
pub use dom::{DomEvent, EventKind, Page, PageSignal};
pub use scheduler::{PerformanceManager, RescanReason, SchedulerEvent, SchedulerHandle, SurfaceKind};
pub use selectors::{SelectorGroup, SelectorRegistry};
pub use sink::{AllowAll, CaptureSettings, ChannelSink, LogSink, OutputSink};
pub use trackers::{
    CommentTracker, ConnectionTracker, FlowState, MessageTracker, PostTracker, RecentCaptureCache,
    Tracker, TrackerContext, TrackerStatsSnapshot,
};
pub use types::{
    ActionContext, ActionKind, Actor, AuthorSource, ButtonState, CaptureError, CapturedAction,
    CommentRecord, Confirmation, ConnectionRequestRecord, MediaItem, MediaItemType, MediaType,
    MessageRecord, PostRecord,
};
