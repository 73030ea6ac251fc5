//! Adapter core (component C, §4.C) — the capability surface every
//! transcript format implements, and the two concrete instantiations.
//!
//! Two adapter variants share this public surface: generalize via
//! composition of per-adapter state, not inheritance (§4, design notes).

pub mod codex;
pub mod openclaw;

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::RwLock;

use crate::ingest_error::IngestError;
use crate::model::{Message, Session};
use crate::watcher::{Closer, EventReceiver};

/// What an adapter can do. Both reference adapters report all four true.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub sessions: bool,
    pub messages: bool,
    pub usage: bool,
    pub watch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchScope {
    Global,
    PerProject,
}

/// Token totals returned by `Adapter::usage`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageStats {
    pub total_tokens: u64,
    pub est_cost: Option<f64>,
}

/// The uniform per-format driver (§6: "Adapter capability set").
pub trait Adapter: Send + Sync {
    fn id(&self) -> &'static str;
    fn name(&self) -> &'static str;
    fn icon(&self) -> &'static str;

    /// Cheap existence check: does this adapter have any transcripts that
    /// could belong to `project_root`?
    fn detect(&self, project_root: &Path) -> bool;

    fn capabilities(&self) -> Capabilities;

    fn sessions(&self, project_root: &Path) -> Result<Vec<Session>, IngestError>;

    fn messages(&self, session_id: &str) -> Result<Vec<Message>, IngestError>;

    fn usage(&self, session_id: &str) -> Result<UsageStats, IngestError>;

    fn watch(&self, project_root: &Path) -> Result<(EventReceiver, Closer), IngestError>;

    fn watch_scope(&self) -> WatchScope;
}

/// Tunable constants shared by both adapters (§6).
#[derive(Debug, Clone)]
pub struct AdapterLimits {
    pub meta_cache_max_entries: usize,
    pub msg_cache_max_entries: usize,
    pub dir_listing_ttl: Duration,
    pub two_pass_threshold_bytes: u64,
    pub head_scan_lines: usize,
    pub tail_scan_bytes: u64,
    pub active_session_threshold: Duration,
    pub watch_debounce: Duration,
}

impl Default for AdapterLimits {
    fn default() -> Self {
        AdapterLimits {
            meta_cache_max_entries: 2048,
            msg_cache_max_entries: 128,
            dir_listing_ttl: Duration::from_millis(500),
            two_pass_threshold_bytes: 16 * 1024,
            head_scan_lines: 100,
            tail_scan_bytes: 8 * 1024,
            active_session_threshold: Duration::from_secs(5 * 60),
            watch_debounce: crate::watcher::DEFAULT_DEBOUNCE,
        }
    }
}

/// A directory-listing cache entry: every `.jsonl` file under the adapter's
/// transcript directory at the time of the last walk (§4.C.1).
#[derive(Debug, Clone)]
pub struct ListedFile {
    pub path: PathBuf,
    pub size: u64,
    pub mtime: std::time::SystemTime,
}

/// TTL-cached directory walk shared by both adapters (§4.C.1: "500 ms
/// directory-listing cache"). Each adapter owns its own instance, keyed
/// implicitly by the closure it is refreshed with.
pub(crate) struct DirListingCache {
    ttl: Duration,
    inner: RwLock<Option<(std::time::Instant, Vec<ListedFile>)>>,
}

impl DirListingCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        DirListingCache {
            ttl,
            inner: RwLock::new(None),
        }
    }

    pub(crate) fn get_or_refresh(&self, refresh: impl FnOnce() -> Vec<ListedFile>) -> Vec<ListedFile> {
        if let Some((at, files)) = self.inner.read().as_ref() {
            if at.elapsed() < self.ttl {
                return files.clone();
            }
        }
        let fresh = refresh();
        *self.inner.write() = Some((std::time::Instant::now(), fresh.clone()));
        fresh
    }
}
