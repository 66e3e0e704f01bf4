//! Event and signal types emitted by the live page.

use ego_tree::NodeId;

/// DOM events trackers can listen for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Click,
    Submit,
}

/// Handle returned by [`super::Page::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Event delivered to a listener during capturing-phase dispatch
#[derive(Debug, Clone, Copy)]
pub struct DomEvent {
    pub kind: EventKind,
    /// Node the event was dispatched on
    pub target: NodeId,
    /// Node the listener was registered on
    pub current_target: NodeId,
}

/// Observation signals, the stand-in for mutation, intersection and
/// page-visibility observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSignal {
    /// Nodes were inserted into or detached from the document
    Mutation {
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
    /// A node entered or left the viewport
    Intersection { node: NodeId, visible: bool },
    /// The tab became visible or hidden
    Visibility { visible: bool },
    /// The whole document was replaced; every previously issued node id is void
    DocumentReplaced { generation: u64 },
}
