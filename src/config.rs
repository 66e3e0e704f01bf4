//! Configuration management for feed-capture.
//!
//! Loads configuration from TOML files and provides runtime defaults.

use crate::sink::CaptureSettings;
use crate::types::ActionKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub destinations: DestinationsConfig,

    /// Selector overrides, keyed by group name (e.g. `post.container`)
    #[serde(default)]
    pub selectors: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Master switch for every capture
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Delay after a message send before re-reading the thread
    #[serde(default = "default_message_settle")]
    pub message_settle_ms: u64,

    /// Delay after a connect/send click before looking for confirmation
    #[serde(default = "default_connection_settle")]
    pub connection_settle_ms: u64,

    /// Delay after a comment submit before looking for the rendered comment
    #[serde(default = "default_comment_settle")]
    pub comment_settle_ms: u64,

    /// Upper bound for waits on modals and toasts
    #[serde(default = "default_modal_wait_timeout")]
    pub modal_wait_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            message_settle_ms: default_message_settle(),
            connection_settle_ms: default_connection_settle(),
            comment_settle_ms: default_comment_settle(),
            modal_wait_timeout_ms: default_modal_wait_timeout(),
        }
    }
}

impl TimingConfig {
    pub fn message_settle(&self) -> Duration {
        Duration::from_millis(self.message_settle_ms)
    }

    pub fn connection_settle(&self) -> Duration {
        Duration::from_millis(self.connection_settle_ms)
    }

    pub fn comment_settle(&self) -> Duration {
        Duration::from_millis(self.comment_settle_ms)
    }

    pub fn modal_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.modal_wait_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Posts handed to the post tracker per batch
    #[serde(default = "default_batch_size")]
    pub visibility_batch_size: usize,

    /// Minimum spacing between two visibility batches
    #[serde(default = "default_batch_interval")]
    pub visibility_batch_interval_ms: u64,

    /// Quiet period before a mutation burst triggers a rescan
    #[serde(default = "default_mutation_debounce")]
    pub mutation_debounce_ms: u64,

    /// How often the URL is polled for SPA navigation
    #[serde(default = "default_url_poll_interval")]
    pub url_poll_interval_ms: u64,

    /// Delay between a detected navigation and the full rescan
    #[serde(default = "default_navigation_rescan_delay")]
    pub navigation_rescan_delay_ms: u64,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Nodes unseen for longer than this are evicted
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    #[serde(default = "default_max_tracked")]
    pub max_tracked_elements: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            visibility_batch_size: default_batch_size(),
            visibility_batch_interval_ms: default_batch_interval(),
            mutation_debounce_ms: default_mutation_debounce(),
            url_poll_interval_ms: default_url_poll_interval(),
            navigation_rescan_delay_ms: default_navigation_rescan_delay(),
            cleanup_interval_secs: default_cleanup_interval(),
            stale_after_secs: default_stale_after(),
            max_tracked_elements: default_max_tracked(),
        }
    }
}

impl SchedulerConfig {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.visibility_batch_interval_ms)
    }

    pub fn mutation_debounce(&self) -> Duration {
        Duration::from_millis(self.mutation_debounce_ms)
    }

    pub fn url_poll_interval(&self) -> Duration {
        Duration::from_millis(self.url_poll_interval_ms.max(1))
    }

    pub fn navigation_rescan_delay(&self) -> Duration {
        Duration::from_millis(self.navigation_rescan_delay_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Window in which a repeated key is suppressed
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,

    /// Entries older than this are purged
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// Characters of content that take part in a dedup key
    #[serde(default = "default_key_chars")]
    pub key_content_chars: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce(),
            ttl_secs: default_ttl(),
            key_content_chars: default_key_chars(),
        }
    }
}

impl DedupConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Collector endpoint per action kind; a kind without one is not captured
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DestinationsConfig {
    #[serde(default)]
    pub post: Option<String>,

    #[serde(default)]
    pub comment: Option<String>,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub connection_request: Option<String>,
}

impl DestinationsConfig {
    pub fn for_kind(&self, kind: ActionKind) -> Option<&str> {
        let url = match kind {
            ActionKind::Post => self.post.as_deref(),
            ActionKind::Comment => self.comment.as_deref(),
            ActionKind::Message => self.message.as_deref(),
            ActionKind::ConnectionRequest => self.connection_request.as_deref(),
        };
        url.map(str::trim).filter(|u| !u.is_empty())
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_message_settle() -> u64 {
    1500
}

fn default_connection_settle() -> u64 {
    1500
}

fn default_comment_settle() -> u64 {
    200
}

fn default_modal_wait_timeout() -> u64 {
    3000
}

fn default_batch_size() -> usize {
    5
}

fn default_batch_interval() -> u64 {
    150
}

fn default_mutation_debounce() -> u64 {
    250
}

fn default_url_poll_interval() -> u64 {
    1000
}

fn default_navigation_rescan_delay() -> u64 {
    500
}

fn default_cleanup_interval() -> u64 {
    30
}

fn default_stale_after() -> u64 {
    300
}

fn default_max_tracked() -> usize {
    50
}

fn default_debounce() -> u64 {
    5000
}

fn default_ttl() -> u64 {
    600
}

fn default_key_chars() -> usize {
    100
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        Self::load_from_path(Self::default_config_path())
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: PathBuf) -> Self {
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("No config file found at {:?}, using defaults", path);
                Self::default()
            }
        }
    }

    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("feed-capture")
            .join("config.toml")
    }

    /// Write configuration as TOML, creating parent directories
    pub fn save_to_path(&self, path: PathBuf) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        std::fs::write(&path, contents)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }
}

impl CaptureSettings for Config {
    fn is_capture_enabled(&self, kind: ActionKind) -> bool {
        self.general.enabled && self.destinations.for_kind(kind).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.general.enabled);
        assert_eq!(config.timing.message_settle_ms, 1500);
        assert_eq!(config.timing.comment_settle_ms, 200);
        assert_eq!(config.scheduler.visibility_batch_size, 5);
        assert_eq!(config.scheduler.max_tracked_elements, 50);
        assert_eq!(config.dedup.debounce(), Duration::from_secs(5));
        assert_eq!(config.dedup.ttl(), Duration::from_secs(600));
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[general]
log_level = "debug"

[timing]
message_settle_ms = 2000

[destinations]
post = "https://collector.example.com/posts"
message = "   "

[selectors]
"post.container" = ["article.custom-post"]
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert!(config.general.enabled);
        assert_eq!(config.timing.message_settle_ms, 2000);
        assert_eq!(config.timing.connection_settle_ms, 1500);
        assert_eq!(config.selectors["post.container"], vec!["article.custom-post"]);

        assert!(config.is_capture_enabled(ActionKind::Post));
        assert!(!config.is_capture_enabled(ActionKind::Message));
        assert!(!config.is_capture_enabled(ActionKind::Comment));
    }

    #[test]
    fn test_master_switch_disables_all() {
        let mut config = Config::default();
        config.destinations.comment = Some("https://collector.example.com/c".to_string());
        assert!(config.is_capture_enabled(ActionKind::Comment));
        config.general.enabled = false;
        assert!(!config.is_capture_enabled(ActionKind::Comment));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.dedup.debounce_ms = 1234;
        config.destinations.connection_request = Some("https://collector.example.com/cr".into());
        config.save_to_path(path.clone()).unwrap();

        let loaded = Config::load_from_path(path);
        assert_eq!(loaded.dedup.debounce_ms, 1234);
        assert!(loaded.is_capture_enabled(ActionKind::ConnectionRequest));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(dir.path().join("absent.toml"));
        assert_eq!(config.timing.modal_wait_timeout_ms, 3000);
    }
}
