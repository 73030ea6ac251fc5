//! Cache-coherent, incremental ingestion of append-only AI session
//! transcripts.
//!
//! The crate is organized the way the spec's own component table reads:
//! a generic LRU cache (`cache`), a pooled JSONL reader (`reader`), the
//! adapter core and its two concrete formats (`adapter`), a filesystem
//! watcher (`watcher`), and a project-path resolver (`resolver`). `model`
//! is the uniform output shape every adapter converges on; nothing upstream
//! of `adapter` ever sees a format-specific record.

pub mod adapter;
pub mod cache;
pub mod config;
pub mod ingest_error;
pub mod model;
pub mod reader;
pub mod resolver;
pub mod watcher;

pub use adapter::{Adapter, Capabilities, UsageStats, WatchScope};
pub use ingest_error::IngestError;
pub use model::{Message, Role, Session};

use std::path::Path;

use adapter::{codex::CodexAdapter, openclaw::OpenclawAdapter, AdapterLimits};
use config::Config;

/// Builds the adapter set implied by a loaded `Config`: one entry per
/// format whose transcript root exists on disk (§6 "adapter capability
/// set"), in the fixed order codex-then-openclaw so `sessions()` output
/// ordering is deterministic across runs for ties on `updated_at`.
pub fn default_adapters(config: &Config) -> Vec<Box<dyn Adapter>> {
    let limits = AdapterLimits::from(&config.limits);
    let mut out: Vec<Box<dyn Adapter>> = Vec::new();

    if let Some(root) = config.sources.codex_root() {
        out.push(Box::new(CodexAdapter::new(root, limits.clone())));
    }
    if let Some(root) = config.sources.openclaw_root() {
        out.push(Box::new(OpenclawAdapter::new(root, limits)));
    }

    out
}

/// Sessions across every configured adapter that belong to `project_root`,
/// merged and sorted by `updated_at` descending. An adapter whose
/// enumeration fails is logged and skipped rather than failing the whole
/// call (§4.C.5: failures never propagate across adapters).
pub fn sessions_for_project(
    adapters: &[Box<dyn Adapter>],
    project_root: &Path,
) -> Vec<Session> {
    let mut out = Vec::new();
    for adapter in adapters {
        match adapter.sessions(project_root) {
            Ok(mut sessions) => out.append(&mut sessions),
            Err(e) => tracing::warn!(adapter = adapter.id(), error = %e, "session enumeration failed"),
        }
    }
    out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    out
}
