use std::path::PathBuf;

/// Error kinds that traverse the core boundary (§7).
///
/// Per-record decode failures and incremental-parse structural failures are
/// deliberately absent from this enum: they are swallowed at the parse site
/// and surfaced only as a `tracing` event, never as a `Result::Err` a caller
/// has to handle.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to start watching {path}: {reason}")]
    WatchSetup { path: PathBuf, reason: String },

    #[error("{0}")]
    Other(String),
}
