//! Batching of "became visible" notifications.

use ego_tree::NodeId;
use std::collections::{HashSet, VecDeque};

/// FIFO of visible nodes, drained in fixed-size chunks.
///
/// A node is queued at most once until it is drained or removed.
#[derive(Debug, Default)]
pub struct VisibilityBatcher {
    queue: VecDeque<NodeId>,
    queued: HashSet<NodeId>,
    batch_size: usize,
}

impl VisibilityBatcher {
    pub fn new(batch_size: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            queued: HashSet::new(),
            batch_size: batch_size.max(1),
        }
    }

    /// Queue a node; returns `false` if it was already queued
    pub fn push(&mut self, node: NodeId) -> bool {
        if !self.queued.insert(node) {
            return false;
        }
        self.queue.push_back(node);
        true
    }

    /// Take up to one batch, oldest first
    pub fn next_batch(&mut self) -> Vec<NodeId> {
        let n = self.batch_size.min(self.queue.len());
        let batch: Vec<NodeId> = self.queue.drain(..n).collect();
        for node in &batch {
            self.queued.remove(node);
        }
        batch
    }

    pub fn remove(&mut self, node: NodeId) {
        if self.queued.remove(&node) {
            self.queue.retain(|n| *n != node);
        }
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.queued.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn nodes(n: usize) -> (Html, Vec<NodeId>) {
        let body: String = (0..n).map(|i| format!("<div id=\"d{}\"></div>", i)).collect();
        let html = Html::parse_fragment(&body);
        let ids = html
            .root_element()
            .children()
            .map(|c| c.id())
            .collect();
        (html, ids)
    }

    #[test]
    fn test_batches_of_fixed_size() {
        let (_html, ids) = nodes(12);
        let mut batcher = VisibilityBatcher::new(5);
        for id in &ids {
            assert!(batcher.push(*id));
        }
        assert_eq!(batcher.next_batch(), ids[0..5].to_vec());
        assert_eq!(batcher.next_batch(), ids[5..10].to_vec());
        assert_eq!(batcher.next_batch(), ids[10..12].to_vec());
        assert!(batcher.next_batch().is_empty());
    }

    #[test]
    fn test_duplicate_push_is_ignored() {
        let (_html, ids) = nodes(2);
        let mut batcher = VisibilityBatcher::new(5);
        assert!(batcher.push(ids[0]));
        assert!(!batcher.push(ids[0]));
        assert_eq!(batcher.len(), 1);
        batcher.remove(ids[0]);
        assert!(batcher.is_empty());
        assert!(batcher.push(ids[0]));
    }
}
