//! The uniform session/message model produced by every adapter.
//!
//! Every transcript format parses down to the same shapes here. Adapters
//! never leak their own record schema past this module — a caller holding a
//! `Session` or a `Message` cannot tell which source produced it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An identified transcript occurrence.
///
/// Sessions are never mutated in place; an update produces a new value with
/// the same `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// First user message, truncated, or the first 8 characters of `id`.
    pub name: String,
    pub adapter_id: String,
    pub adapter_name: String,
    pub adapter_icon: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub duration_seconds: i64,
    /// `true` when `now - updated_at < active_session_threshold` (5 minutes by default).
    pub is_active: bool,
    pub message_count: u32,
    pub total_tokens: u64,
    pub est_cost: Option<f64>,
    pub file_size: u64,
    pub path: PathBuf,
}

/// A participant role. `SyntheticAssistant` marks a message the adapter
/// fabricated at end-of-stream to carry otherwise-orphaned tool calls and
/// thinking blocks (A-format only — see `adapter::codex`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    SyntheticAssistant,
}

/// One turn in a session's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Only present on a fabricated `SyntheticAssistant` message, formatted
    /// `synthetic-<short-session-id>-<index>` (§4.C.4).
    pub id: Option<String>,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub model: Option<String>,
    pub tool_uses: Vec<ToolUse>,
    pub thinking: Vec<ThinkingBlock>,
    pub usage: Option<TokenUsage>,
    /// Ordered structured content, preserved when the source carries blocks
    /// rather than flat text (both formats do for assistant turns).
    pub blocks: Vec<ContentBlock>,
}

impl Message {
    pub fn new(role: Role, timestamp: DateTime<Utc>) -> Self {
        Message {
            id: None,
            role,
            content: String::new(),
            timestamp,
            model: None,
            tool_uses: Vec::new(),
            thinking: Vec::new(),
            usage: None,
            blocks: Vec::new(),
        }
    }
}

/// A tool invocation and its (possibly not-yet-arrived) result.
///
/// Every field but `id` is optional: a tool-result record that arrives
/// before its matching call produces a `ToolUse` with `input = None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: String,
    pub name: Option<String>,
    pub input: Option<String>,
    pub output: Option<String>,
}

impl ToolUse {
    pub fn pending(id: impl Into<String>, name: impl Into<String>, input: impl Into<String>) -> Self {
        ToolUse {
            id: id.into(),
            name: Some(name.into()),
            input: Some(input.into()),
            output: None,
        }
    }

    /// A tool-result record with no prior matching call.
    pub fn output_only(id: impl Into<String>, output: impl Into<String>) -> Self {
        ToolUse {
            id: id.into(),
            name: None,
            input: None,
            output: Some(output.into()),
        }
    }
}

/// A reasoning/thinking block with an approximate token count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingBlock {
    pub text: String,
    pub approx_tokens: u32,
}

impl ThinkingBlock {
    /// `tokens` is the source-reported count when present; otherwise
    /// `len(text) / 4` per the heuristic in §4.C.4.
    pub fn new(text: impl Into<String>, tokens: Option<u32>) -> Self {
        let text = text.into();
        let approx_tokens = tokens.unwrap_or_else(|| (text.len() / 4) as u32);
        ThinkingBlock { text, approx_tokens }
    }
}

/// Non-negative token counters for one message or one session total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_read_tokens + self.cache_write_tokens
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
    }
}

/// Ordered, render-preserving structured content inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Thinking { text: String },
    ToolUse { id: String, name: String, input: String },
    ToolResult { tool_use_id: String, output: String },
}

/// Cached per-session bookkeeping kept alongside a parsed `Session`.
///
/// This is the adapter's private working state, not part of the public
/// `Session` shape — it carries the accumulators needed to resume an
/// incremental or tail-only re-parse without re-reading the file prefix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionMetadata {
    pub path: PathBuf,
    pub session_id: String,
    pub cwd: String,
    pub first_message_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub message_count: u32,
    pub total_tokens: u64,
    pub first_user_message: Option<String>,
    pub primary_model: Option<String>,
    /// Per-model message counts, insertion-ordered so that a tie between two
    /// models is broken by which one was seen first (§4.C.3).
    pub model_counts: Vec<(String, u32)>,
    pub model_tokens: HashMap<String, u64>,
    pub cost: Option<f64>,
}

impl SessionMetadata {
    pub fn record_model(&mut self, model: &str) {
        if let Some(entry) = self.model_counts.iter_mut().find(|(m, _)| m == model) {
            entry.1 += 1;
        } else {
            self.model_counts.push((model.to_string(), 1));
        }
    }

    /// The model with the highest message count; ties go to whichever was
    /// recorded first via `record_model`.
    ///
    /// `Iterator::max_by_key` returns the *last* maximal element on ties, so
    /// this walks manually and only replaces the current best on a strictly
    /// greater count, preserving first-occurrence order.
    pub fn primary_model_by_count(&self) -> Option<&str> {
        let mut best: Option<&(String, u32)> = None;
        for entry in &self.model_counts {
            if best.map(|b| entry.1 > b.1).unwrap_or(true) {
                best = Some(entry);
            }
        }
        best.map(|(model, _)| model.as_str())
    }
}

/// A cached, stat-stamped payload of type `T` (component A, §3/§4.A).
///
/// `byte_offset` marks the position in the source file immediately after
/// the last record this payload reflects; a resumed parse starts there.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub payload: T,
    pub size: u64,
    pub mtime: SystemTime,
    pub last_access: SystemTime,
    pub byte_offset: u64,
}

/// The model with the highest count in an insertion-ordered `(model, count)`
/// list, ties broken by first occurrence (same rule as
/// `SessionMetadata::primary_model_by_count`, shared so adapters building a
/// `model_counts` list outside of `record_model` get the same tie-break).
pub fn primary_by_count(counts: &[(String, u32)]) -> Option<&str> {
    let mut best: Option<&(String, u32)> = None;
    for entry in counts {
        if best.map(|b| entry.1 > b.1).unwrap_or(true) {
            best = Some(entry);
        }
    }
    best.map(|(model, _)| model.as_str())
}

/// Truncate `s` to at most `max` bytes on a UTF-8 character boundary,
/// stripping newlines first. Used for session display names (§4.C.2 step 4).
pub fn truncate(s: &str, max: usize) -> String {
    let flattened = s.replace(['\n', '\r'], " ");
    let trimmed = flattened.trim();
    if trimmed.len() <= max {
        return trimmed.to_string();
    }
    let mut end = max;
    while end > 0 && !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}
