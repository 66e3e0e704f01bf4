//! Tracked element registry with staleness and cap-based eviction.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Lifecycle phase of a tracked node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Matched a watch (visible or inserted) but not acted upon yet
    Observed,
    /// Action taken: button injected or listener attached
    Processed,
}

/// Discovery metadata for one live node
#[derive(Debug, Clone)]
pub struct TrackedElement {
    pub first_seen: Instant,
    pub last_seen: Instant,
    pub phase: Phase,
    /// Stable key shared with other components (e.g. a post URN)
    pub key: Option<String>,
}

/// Registry of tracked nodes, owned by exactly one component
#[derive(Debug)]
pub struct TrackedElements<K> {
    entries: HashMap<K, TrackedElement>,
    /// Maximum number of entries before the oldest are evicted
    max_entries: usize,
    /// How long an entry may go unseen before it is stale
    stale_after: Duration,
}

impl<K: Copy + Eq + Hash + std::fmt::Debug> TrackedElements<K> {
    pub fn new(max_entries: usize, stale_after: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries,
            stale_after,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(
            50,                       // tracked nodes
            Duration::from_secs(300), // 5 minutes
        )
    }

    /// Record a sighting; returns `true` when the node was not tracked yet.
    ///
    /// Does not evict: callers run [`Self::enforce_cap`] at a point of
    /// their choosing.
    pub fn observe(&mut self, node: K, now: Instant) -> bool {
        match self.entries.get_mut(&node) {
            Some(entry) => {
                entry.last_seen = now;
                false
            }
            None => {
                trace!("Tracking {:?}", node);
                self.entries.insert(
                    node,
                    TrackedElement {
                        first_seen: now,
                        last_seen: now,
                        phase: Phase::Observed,
                        key: None,
                    },
                );
                true
            }
        }
    }

    pub fn set_key(&mut self, node: K, key: String) {
        if let Some(entry) = self.entries.get_mut(&node) {
            entry.key = Some(key);
        }
    }

    /// Move a node to `Processed`; returns `false` if it is not tracked
    pub fn mark_processed(&mut self, node: K) -> bool {
        match self.entries.get_mut(&node) {
            Some(entry) => {
                entry.phase = Phase::Processed;
                true
            }
            None => false,
        }
    }

    pub fn phase(&self, node: K) -> Option<Phase> {
        self.entries.get(&node).map(|e| e.phase)
    }

    pub fn get(&self, node: K) -> Option<&TrackedElement> {
        self.entries.get(&node)
    }

    pub fn contains(&self, node: K) -> bool {
        self.entries.contains_key(&node)
    }

    pub fn remove(&mut self, node: K) -> Option<TrackedElement> {
        self.entries.remove(&node)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn nodes(&self) -> Vec<K> {
        self.entries.keys().copied().collect()
    }

    /// Evict oldest-`last_seen` entries until the cap holds
    pub fn enforce_cap(&mut self) -> Vec<K> {
        if self.entries.len() <= self.max_entries {
            return Vec::new();
        }

        let excess = self.entries.len() - self.max_entries;
        let mut by_age: Vec<(K, Instant)> = self
            .entries
            .iter()
            .map(|(node, entry)| (*node, entry.last_seen))
            .collect();
        by_age.sort_by_key(|(_, last_seen)| *last_seen);

        let evicted: Vec<K> = by_age.into_iter().take(excess).map(|(node, _)| node).collect();
        for node in &evicted {
            self.entries.remove(node);
        }
        debug!("Evicted {} tracked elements over cap {}", evicted.len(), self.max_entries);
        evicted
    }

    /// Evict detached nodes and nodes unseen for longer than the stale window
    pub fn evict_stale(&mut self, now: Instant, is_connected: impl Fn(K) -> bool) -> Vec<K> {
        let stale_after = self.stale_after;
        let evicted: Vec<K> = self
            .entries
            .iter()
            .filter(|(node, entry)| {
                now.duration_since(entry.last_seen) > stale_after || !is_connected(**node)
            })
            .map(|(node, _)| *node)
            .collect();

        for node in &evicted {
            self.entries.remove(node);
        }
        evicted
    }

    pub fn stats(&self) -> TrackedStats {
        TrackedStats {
            entries: self.entries.len(),
            processed: self
                .entries
                .values()
                .filter(|e| e.phase == Phase::Processed)
                .count(),
            max_entries: self.max_entries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedStats {
    pub entries: usize,
    pub processed: usize,
    pub max_entries: usize,
}
