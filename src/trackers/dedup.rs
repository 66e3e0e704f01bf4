//! Short-window duplicate suppression for captured actions

use crate::extract::sanitize::truncate_chars;
use crate::types::CapturedAction;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Cache of recently delivered capture keys.
///
/// A key seen within the debounce window is a duplicate. Suppressed attempts
/// do not refresh the recorded time, so a steady stream of repeats still gets
/// one delivery per window.
pub struct RecentCaptureCache {
    entries: HashMap<String, Instant>,
    debounce: Duration,
    /// How long entries stay in the cache at all
    ttl: Duration,
}

impl RecentCaptureCache {
    pub fn new(debounce: Duration, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            debounce,
            ttl,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(
            Duration::from_secs(5),       // debounce
            Duration::from_secs(10 * 60), // 10 minutes
        )
    }

    /// Check `key` and record it when it is new (or its window has passed)
    pub fn check_and_record(&mut self, key: &str, now: Instant) -> DedupResult {
        self.evict_expired(now);

        let hash = compute_hash(key);
        if let Some(recorded) = self.entries.get(&hash) {
            if now.duration_since(*recorded) < self.debounce {
                trace!("Duplicate capture key {}", &hash[..12]);
                return DedupResult::Duplicate;
            }
        }
        self.entries.insert(hash, now);
        DedupResult::New
    }

    /// Remove entries older than the TTL
    pub fn evict_expired(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, recorded| now.duration_since(*recorded) < ttl);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupResult {
    /// Not seen within the debounce window
    New,
    /// Seen within the debounce window
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
}

/// Compute SHA-256 hash of a capture key
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Identity of an action for duplicate suppression.
///
/// Content-bearing kinds include the first `content_chars` characters of the
/// text so that two different messages to the same person are distinct.
pub fn dedup_key(action: &CapturedAction, content_chars: usize) -> String {
    let kind = action.kind().as_str();
    match action {
        CapturedAction::Post(r) => format!("{}:{}", kind, r.id),
        CapturedAction::Comment(r) => format!(
            "{}:{}:{}",
            kind,
            r.post_id.as_deref().unwrap_or(""),
            truncate_chars(&r.text, content_chars)
        ),
        CapturedAction::Message(r) => {
            let thread = r
                .conversation_id
                .as_deref()
                .unwrap_or(r.recipient.name.as_str());
            format!("{}:{}:{}", kind, thread, truncate_chars(&r.text, content_chars))
        }
        // The card and the modal report the same person with different
        // detail, so only the name identifies an invitation
        CapturedAction::ConnectionRequest(r) => {
            format!("{}:{}", kind, r.recipient.name.trim().to_lowercase())
        }
    }
}
