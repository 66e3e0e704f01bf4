//! Live host-page model.
//!
//! The host page is a third-party single-page application. This module keeps
//! an in-memory copy of its document as a `scraper::Html` tree and exposes
//! the handful of browser primitives the pipeline needs:
//!
//! - CSS queries over the live tree
//! - fragment insertion, removal and text replacement (each emits a mutation signal)
//! - viewport and tab-visibility signals
//! - capturing-phase listener registration and event dispatch
//!
//! Node identity is the tree's `NodeId`. It stays valid until the document is
//! replaced, which bumps the page generation and voids every issued id.

pub mod events;

pub use events::{DomEvent, EventKind, ListenerId, PageSignal};

use crate::selectors::SelectorGroup;
use ego_tree::{NodeId, NodeRef, Tree};
use scraper::{ElementRef, Html, Node, Selector};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Callback registered on a node
pub type Listener = Rc<dyn Fn(&DomEvent)>;

struct ListenerEntry {
    id: ListenerId,
    node: NodeId,
    kind: EventKind,
    callback: Listener,
}

/// In-memory live document of the host page
pub struct Page {
    html: RefCell<Html>,
    url: RefCell<String>,
    visible: Cell<bool>,
    generation: Cell<u64>,
    listeners: RefCell<Vec<ListenerEntry>>,
    next_listener_id: Cell<u64>,
    subscribers: RefCell<Vec<mpsc::UnboundedSender<PageSignal>>>,
}

impl Page {
    /// Parse a full document served at `url`
    pub fn new(url: &str, source: &str) -> Self {
        Self {
            html: RefCell::new(Html::parse_document(source)),
            url: RefCell::new(url.to_string()),
            visible: Cell::new(true),
            generation: Cell::new(0),
            listeners: RefCell::new(Vec::new()),
            next_listener_id: Cell::new(1),
            subscribers: RefCell::new(Vec::new()),
        }
    }

    /// An empty page, used before the host sends its first document
    pub fn blank() -> Self {
        Self::new("about:blank", "<html><head></head><body></body></html>")
    }

    pub fn url(&self) -> String {
        self.url.borrow().clone()
    }

    /// Change the URL without touching the document, like `history.pushState`.
    ///
    /// No signal is emitted; navigation is detected by polling.
    pub fn set_url(&self, url: &str) {
        *self.url.borrow_mut() = url.to_string();
    }

    pub fn is_visible(&self) -> bool {
        self.visible.get()
    }

    pub fn set_visible(&self, visible: bool) {
        if self.visible.replace(visible) != visible {
            self.emit(PageSignal::Visibility { visible });
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    /// Subscribe to observation signals
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PageSignal> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.borrow_mut().push(tx);
        rx
    }

    fn emit(&self, signal: PageSignal) {
        trace!("Page signal: {:?}", signal);
        self.subscribers
            .borrow_mut()
            .retain(|tx| tx.send(signal.clone()).is_ok());
    }

    /// Borrow the document for read-only work.
    ///
    /// The closure must not call back into mutating `Page` methods.
    pub fn with_html<R>(&self, f: impl FnOnce(&Html) -> R) -> R {
        let html = self.html.borrow();
        f(&html)
    }

    /// Run `f` against the element behind `node`, if it still exists
    pub fn with_element<R>(&self, node: NodeId, f: impl FnOnce(ElementRef<'_>) -> R) -> Option<R> {
        let html = self.html.borrow();
        let element = html.tree.get(node).and_then(ElementRef::wrap)?;
        Some(f(element))
    }

    /// The document node, root of every dispatch path
    pub fn document_node(&self) -> NodeId {
        self.html.borrow().tree.root().id()
    }

    pub fn body(&self) -> Option<NodeId> {
        let selector = Selector::parse("body").ok()?;
        self.query_first(&selector)
    }

    /// Attached elements matching `selector`, in document order
    pub fn query_all(&self, selector: &Selector) -> Vec<NodeId> {
        self.with_html(|html| live_elements(html).filter(|el| selector.matches(el)).map(|el| el.id()).collect())
    }

    pub fn query_first(&self, selector: &Selector) -> Option<NodeId> {
        self.with_html(|html| live_elements(html).find(|el| selector.matches(el)).map(|el| el.id()))
    }

    /// All nodes matching any alternative of `group`, in document order
    pub fn find_all(&self, group: &SelectorGroup) -> Vec<NodeId> {
        self.with_html(|html| group.find_in_document(html))
    }

    /// First match of `group`, searched inside `scope` or the whole document
    pub fn find_first(&self, group: &SelectorGroup, scope: Option<NodeId>) -> Option<NodeId> {
        self.with_html(|html| match scope {
            Some(scope) => {
                let scope = html.tree.get(scope).and_then(ElementRef::wrap)?;
                group.first_match(scope).map(|el| el.id())
            }
            None => group.find_in_document(html).into_iter().next(),
        })
    }

    /// Nearest inclusive ancestor of `node` matching `group`
    pub fn closest(&self, node: NodeId, group: &SelectorGroup) -> Option<NodeId> {
        self.with_element(node, |el| group.closest(el).map(|found| found.id()))
            .flatten()
    }

    pub fn matches(&self, node: NodeId, group: &SelectorGroup) -> bool {
        self.with_element(node, |el| group.matches(&el))
            .unwrap_or(false)
    }

    pub fn text_of(&self, node: NodeId) -> Option<String> {
        self.with_element(node, |el| el.text().collect::<String>())
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<String> {
        self.with_element(node, |el| el.value().attr(name).map(str::to_string))
            .flatten()
    }

    /// Whether `node` is still reachable from the document root
    pub fn is_connected(&self, node: NodeId) -> bool {
        self.with_html(|html| is_attached(html, node))
    }

    /// Parse `fragment` and append its top-level nodes to `parent`.
    ///
    /// Returns the ids of the inserted top-level nodes.
    pub fn insert_html(&self, parent: NodeId, fragment: &str) -> Vec<NodeId> {
        let parsed = Html::parse_fragment(fragment);
        let added = {
            let mut html = self.html.borrow_mut();
            if !is_attached(&html, parent) {
                debug!("Insert target {:?} is not attached, skipping", parent);
                return Vec::new();
            }
            let mut added = Vec::new();
            for child in parsed.root_element().children() {
                if let Some(id) = graft(&mut html.tree, parent, child) {
                    added.push(id);
                }
            }
            added
        };

        if !added.is_empty() {
            self.emit(PageSignal::Mutation {
                added: added.clone(),
                removed: Vec::new(),
            });
        }
        added
    }

    /// Detach `node` (and its subtree) from the document
    pub fn remove(&self, node: NodeId) -> bool {
        let removed = {
            let mut html = self.html.borrow_mut();
            if node == html.tree.root().id() || !is_attached(&html, node) {
                false
            } else {
                match html.tree.get_mut(node) {
                    Some(mut handle) => {
                        handle.detach();
                        true
                    }
                    None => false,
                }
            }
        };

        if removed {
            self.emit(PageSignal::Mutation {
                added: Vec::new(),
                removed: vec![node],
            });
        }
        removed
    }

    /// Replace the children of `node` with a single text node
    pub fn set_text(&self, node: NodeId, text: &str) -> bool {
        let removed: Vec<NodeId> = {
            let mut html = self.html.borrow_mut();
            if !is_attached(&html, node) {
                return false;
            }
            let children: Vec<NodeId> = match html.tree.get(node) {
                Some(n) => n.children().map(|c| c.id()).collect(),
                None => return false,
            };
            for child in &children {
                if let Some(mut handle) = html.tree.get_mut(*child) {
                    handle.detach();
                }
            }
            children
        };

        let added = if text.is_empty() {
            Vec::new()
        } else {
            let parsed = Html::parse_fragment(&escape_text(text));
            let mut html = self.html.borrow_mut();
            parsed
                .root_element()
                .children()
                .filter_map(|child| graft(&mut html.tree, node, child))
                .collect()
        };

        self.emit(PageSignal::Mutation { added, removed });
        true
    }

    /// Swap in a freshly served document.
    ///
    /// Listeners are dropped and every previously issued node id becomes void.
    pub fn replace_document(&self, url: &str, source: &str) {
        *self.html.borrow_mut() = Html::parse_document(source);
        *self.url.borrow_mut() = url.to_string();
        self.listeners.borrow_mut().clear();
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        debug!("Document replaced (generation {}) at {}", generation, url);
        self.emit(PageSignal::DocumentReplaced { generation });
    }

    /// Report that `node` entered or left the viewport
    pub fn set_intersecting(&self, node: NodeId, visible: bool) {
        if self.is_connected(node) {
            self.emit(PageSignal::Intersection { node, visible });
        }
    }

    /// Register a capturing-phase listener on `node`
    pub fn add_listener(&self, node: NodeId, kind: EventKind, callback: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener_id.get());
        self.next_listener_id.set(id.0 + 1);
        self.listeners.borrow_mut().push(ListenerEntry {
            id,
            node,
            kind,
            callback,
        });
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self, node: NodeId, kind: EventKind) -> usize {
        self.listeners
            .borrow()
            .iter()
            .filter(|entry| entry.node == node && entry.kind == kind)
            .count()
    }

    /// Dispatch an event at `target`, capturing phase only.
    ///
    /// Listeners run from the document node down to the target. The list of
    /// listeners is fixed before the first one runs, so a listener attached
    /// during dispatch only sees later events. Returns how many listeners ran.
    pub fn dispatch(&self, kind: EventKind, target: NodeId) -> usize {
        let path: Vec<NodeId> = {
            let html = self.html.borrow();
            if !is_attached(&html, target) {
                return 0;
            }
            let Some(node) = html.tree.get(target) else {
                return 0;
            };
            let mut path: Vec<NodeId> = node.ancestors().map(|n| n.id()).collect();
            path.reverse();
            path.push(target);
            path
        };

        let mut callbacks: Vec<(NodeId, Listener)> = Vec::new();
        {
            let listeners = self.listeners.borrow();
            for node in &path {
                for entry in listeners.iter() {
                    if entry.node == *node && entry.kind == kind {
                        callbacks.push((entry.node, Rc::clone(&entry.callback)));
                    }
                }
            }
        }

        for (current_target, callback) in &callbacks {
            callback(&DomEvent {
                kind,
                target,
                current_target: *current_target,
            });
        }
        callbacks.len()
    }

    /// Serialize the current document, mostly for debugging
    pub fn html(&self) -> String {
        self.with_html(|html| html.html())
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::blank()
    }
}

/// Elements reachable from the document root.
///
/// `Html::select` walks the whole arena, detached subtrees included.
fn live_elements(html: &Html) -> impl Iterator<Item = ElementRef<'_>> {
    html.tree.root().descendants().filter_map(ElementRef::wrap)
}

fn is_attached(html: &Html, node: NodeId) -> bool {
    let root = html.tree.root().id();
    match html.tree.get(node) {
        Some(n) => n.id() == root || n.ancestors().any(|a| a.id() == root),
        None => false,
    }
}

/// Deep-copy `src` from a parsed fragment under `parent`
fn graft(tree: &mut Tree<Node>, parent: NodeId, src: NodeRef<'_, Node>) -> Option<NodeId> {
    let id = tree.get_mut(parent)?.append(src.value().clone()).id();
    for child in src.children() {
        graft(tree, id, child);
    }
    Some(id)
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
