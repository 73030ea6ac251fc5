//! P-format adapter: single-file-per-session JSONL with inline
//! `user`/`assistant` records, stored flat under `<home>/.openclaw/sessions/`
//! (§6). Grounded on the teacher's `parser/claude.rs` record shape, adapted
//! to the shared cache/incrementality machinery used by [`super::codex`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use walkdir::WalkDir;

use crate::adapter::{Adapter, AdapterLimits, Capabilities, DirListingCache, ListedFile, UsageStats, WatchScope};
use crate::cache::{file_changed, StampedCache};
use crate::ingest_error::IngestError;
use crate::model::{truncate, ContentBlock, Message, Role, Session, SessionMetadata, ThinkingBlock, TokenUsage, ToolUse};
use crate::reader::{read_first_line, IncrementalReader};
use crate::resolver::ProjectResolver;
use crate::watcher::{self, Closer, EventReceiver};

pub fn default_root() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".openclaw").join("sessions"))
}

/// Classification of a session from its first user message (§6: "session
/// title prefixes"). A pure function over the text — no file or adapter
/// state involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: &'static str,
    pub name: Option<String>,
    pub source: &'static str,
}

impl Default for Classification {
    fn default() -> Self {
        Classification {
            category: "interactive",
            name: None,
            source: "direct",
        }
    }
}

/// `[cron:<uuid> <name>]` → cron; `System:` prefix → system; `[Telegram …]`
/// / `[WhatsApp …]` → interactive via that channel; anything else →
/// interactive/direct.
pub fn classify_first_message(text: &str) -> Classification {
    let trimmed = text.trim_start();

    if let Some(rest) = trimmed.strip_prefix("[cron:") {
        if let Some(close) = rest.find(']') {
            let inner = &rest[..close];
            let name = inner.split_once(' ').map(|(_, name)| name.trim().to_string());
            return Classification {
                category: "cron",
                name,
                source: "cron",
            };
        }
    }

    if trimmed.starts_with("System:") {
        return Classification {
            category: "system",
            name: None,
            source: "system",
        };
    }

    if trimmed.starts_with("[Telegram") {
        return Classification {
            category: "interactive",
            name: None,
            source: "telegram",
        };
    }

    if trimmed.starts_with("[WhatsApp") {
        return Classification {
            category: "interactive",
            name: None,
            source: "whatsapp",
        };
    }

    Classification::default()
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
}

fn extract_text_and_tool_results(content: &Value) -> (String, Vec<(String, String)>) {
    let mut text = String::new();
    let mut tool_results = Vec::new();

    match content {
        Value::String(s) => text.push_str(s),
        Value::Array(items) => {
            for item in items {
                match item.get("type").and_then(|t| t.as_str()) {
                    Some("text") => {
                        if let Some(t) = item.get("text").and_then(|t| t.as_str()) {
                            if !text.is_empty() {
                                text.push('\n');
                            }
                            text.push_str(t);
                        }
                    }
                    Some("tool_result") => {
                        let id = item.get("tool_use_id").and_then(|v| v.as_str()).unwrap_or_default();
                        let output = item
                            .get("content")
                            .and_then(|c| c.as_str())
                            .map(String::from)
                            .or_else(|| item.get("content").map(|c| c.to_string()))
                            .unwrap_or_default();
                        tool_results.push((id.to_string(), output));
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }

    (text, tool_results)
}

fn extract_assistant_blocks(content: &Value) -> (String, Vec<ThinkingBlock>, Vec<ToolUse>) {
    let mut text = String::new();
    let mut thinking = Vec::new();
    let mut tool_uses = Vec::new();

    if let Some(items) = content.as_array() {
        for item in items {
            match item.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(t) = item.get("text").and_then(|t| t.as_str()) {
                        if !text.is_empty() {
                            text.push('\n');
                        }
                        text.push_str(t);
                    }
                }
                Some("thinking") => {
                    if let Some(t) = item.get("thinking").and_then(|t| t.as_str()) {
                        thinking.push(ThinkingBlock::new(t, None));
                    }
                }
                Some("tool_use") => {
                    let id = item.get("id").and_then(|v| v.as_str()).unwrap_or_default();
                    let name = item.get("name").and_then(|v| v.as_str()).unwrap_or_default();
                    let input = item.get("input").map(|v| v.to_string()).unwrap_or_default();
                    tool_uses.push(ToolUse::pending(id, name, input));
                }
                _ => {}
            }
        }
    } else if let Some(s) = content.as_str() {
        text.push_str(s);
    }

    (text, thinking, tool_uses)
}

/// Parse state carried across an incremental resume.
#[derive(Debug, Default, Clone)]
struct ParseState {
    session_id: String,
    cwd: String,
    tool_refs: HashMap<String, (usize, usize)>,
    messages: Vec<Message>,
}

impl ParseState {
    fn process(&mut self, record: &Value) {
        let record_type = record.get("type").and_then(|t| t.as_str()).unwrap_or("");
        if record_type != "user" && record_type != "assistant" {
            return;
        }
        if record.get("isMeta").and_then(|v| v.as_bool()).unwrap_or(false) {
            return;
        }

        if self.session_id.is_empty() {
            if let Some(id) = record.get("sessionId").and_then(|v| v.as_str()) {
                self.session_id = id.to_string();
            }
        }
        if self.cwd.is_empty() {
            if let Some(cwd) = record.get("cwd").and_then(|v| v.as_str()) {
                self.cwd = cwd.to_string();
            }
        }

        let ts = record
            .get("timestamp")
            .and_then(|t| t.as_str())
            .and_then(parse_ts)
            .unwrap_or_else(Utc::now);

        let Some(message) = record.get("message") else { return };
        let role = message.get("role").and_then(|r| r.as_str()).unwrap_or("");

        match (record_type, role) {
            ("user", "user") => {
                let content = message.get("content").cloned().unwrap_or(Value::Null);
                let (text, tool_results) = extract_text_and_tool_results(&content);

                for (id, output) in tool_results {
                    match self.tool_refs.get(&id) {
                        Some(&(mi, ti)) => {
                            if let Some(msg) = self.messages.get_mut(mi) {
                                if let Some(tu) = msg.tool_uses.get_mut(ti) {
                                    tu.output = Some(output.clone());
                                }
                                msg.blocks.push(ContentBlock::ToolResult {
                                    tool_use_id: id.clone(),
                                    output,
                                });
                            }
                        }
                        None => {
                            // Orphaned result: no matching prior call. Attach
                            // as a standalone output-only entry on this user
                            // turn rather than dropping it.
                            let mut orphan = Message::new(Role::User, ts);
                            orphan.tool_uses.push(ToolUse::output_only(id, output));
                            self.messages.push(orphan);
                        }
                    }
                }

                if !text.trim().is_empty() && !text.trim_start().starts_with('<') {
                    let mut msg = Message::new(Role::User, ts);
                    msg.content = text;
                    msg.blocks = vec![ContentBlock::Text { text: msg.content.clone() }];
                    self.messages.push(msg);
                }
            }
            ("assistant", "assistant") => {
                let content = message.get("content").cloned().unwrap_or(Value::Null);
                let (text, thinking, tool_uses) = extract_assistant_blocks(&content);
                let model = message.get("model").and_then(|m| m.as_str()).filter(|m| *m != "<synthetic>");

                let usage = message.get("usage").map(|usage| TokenUsage {
                    input_tokens: usage.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
                    output_tokens: usage.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
                    cache_read_tokens: usage
                        .get("cache_read_input_tokens")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0),
                    cache_write_tokens: usage
                        .get("cache_creation_input_tokens")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0),
                });

                if text.trim().is_empty() && thinking.is_empty() && tool_uses.is_empty() {
                    return;
                }

                let mut msg = Message::new(Role::Assistant, ts);
                msg.content = text;
                msg.model = model.map(String::from);
                msg.thinking = thinking;
                msg.usage = usage;
                msg.tool_uses = tool_uses;

                let msg_index = self.messages.len();
                for (i, tu) in msg.tool_uses.iter().enumerate() {
                    self.tool_refs.insert(tu.id.clone(), (msg_index, i));
                }
                msg.blocks = super::codex::blocks_from_message(&msg);
                self.messages.push(msg);
            }
            _ => {}
        }
    }
}

fn read_records(path: &Path, offset: u64) -> std::io::Result<IncrementalReader> {
    IncrementalReader::open_at(path, offset)
}

fn full_message_parse(path: &Path) -> std::io::Result<(Vec<Message>, ParseState, u64)> {
    let mut state = ParseState::default();
    let mut reader = read_records(path, 0)?;
    while let Some(bytes) = reader.next_record()? {
        if let Ok(v) = serde_json::from_slice::<Value>(&bytes) {
            state.process(&v);
        }
    }
    let offset = reader.offset();
    let messages = state.messages.clone();
    Ok((messages, state, offset))
}

fn incremental_message_parse(
    path: &Path,
    offset: u64,
    mut state: ParseState,
) -> std::io::Result<(Vec<Message>, ParseState, u64)> {
    let mut reader = read_records(path, offset)?;
    while let Some(bytes) = reader.next_record()? {
        if let Ok(v) = serde_json::from_slice::<Value>(&bytes) {
            state.process(&v);
        }
    }
    let new_offset = reader.offset();
    let messages = state.messages.clone();
    Ok((messages, state, new_offset))
}

#[derive(Debug, Default, Clone)]
struct MetaAccumulator {
    session_id: Option<String>,
    cwd: Option<String>,
    first_user_message: Option<String>,
    first_message_at: Option<DateTime<Utc>>,
    last_message_at: Option<DateTime<Utc>>,
    message_count: u32,
    total_tokens: u64,
    model_counts: Vec<(String, u32)>,
}

impl MetaAccumulator {
    fn observe(&mut self, record: &Value) {
        let record_type = record.get("type").and_then(|t| t.as_str()).unwrap_or("");
        if record_type != "user" && record_type != "assistant" {
            return;
        }
        if record.get("isMeta").and_then(|v| v.as_bool()).unwrap_or(false) {
            return;
        }
        if self.session_id.is_none() {
            self.session_id = record.get("sessionId").and_then(|v| v.as_str()).map(String::from);
        }
        if self.cwd.is_none() {
            self.cwd = record.get("cwd").and_then(|v| v.as_str()).map(String::from);
        }

        let ts = record.get("timestamp").and_then(|t| t.as_str()).and_then(parse_ts);
        let Some(message) = record.get("message") else { return };
        let role = message.get("role").and_then(|r| r.as_str()).unwrap_or("");

        if record_type == "user" && role == "user" {
            let content = message.get("content").cloned().unwrap_or(Value::Null);
            let (text, _) = extract_text_and_tool_results(&content);
            if !text.trim().is_empty() {
                if let Some(t) = ts {
                    self.first_message_at.get_or_insert(t);
                    self.last_message_at = Some(t);
                }
                self.message_count += 1;
                if self.first_user_message.is_none() {
                    self.first_user_message = Some(truncate(&text, 120));
                }
            }
        } else if record_type == "assistant" && role == "assistant" {
            if let Some(t) = ts {
                self.first_message_at.get_or_insert(t);
                self.last_message_at = Some(t);
            }
            self.message_count += 1;
            if let Some(model) = message.get("model").and_then(|m| m.as_str()) {
                if model != "<synthetic>" {
                    if let Some(entry) = self.model_counts.iter_mut().find(|(m, _)| m == model) {
                        entry.1 += 1;
                    } else {
                        self.model_counts.push((model.to_string(), 1));
                    }
                }
            }
            if let Some(usage) = message.get("usage") {
                self.total_tokens += usage.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0)
                    + usage.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0)
                    + usage.get("cache_read_input_tokens").and_then(|v| v.as_u64()).unwrap_or(0)
                    + usage.get("cache_creation_input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
            }
        }
    }

    fn into_metadata(self, path: &Path, info: &ListedFile) -> SessionMetadata {
        let session_id = self.session_id.unwrap_or_else(|| {
            path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown").to_string()
        });
        let first_message_at = self
            .first_message_at
            .or_else(|| info.mtime.duration_since(SystemTime::UNIX_EPOCH).ok().and_then(|d| {
                DateTime::<Utc>::from_timestamp(d.as_secs() as i64, 0)
            }))
            .unwrap_or_else(Utc::now);
        let last_message_at = self.last_message_at.unwrap_or(first_message_at);
        let primary_model = crate::model::primary_by_count(&self.model_counts).map(String::from);

        SessionMetadata {
            path: path.to_path_buf(),
            session_id,
            cwd: self.cwd.unwrap_or_default(),
            first_message_at: Some(first_message_at),
            last_message_at: Some(last_message_at),
            message_count: self.message_count,
            total_tokens: self.total_tokens,
            first_user_message: self.first_user_message,
            primary_model,
            model_counts: self.model_counts,
            model_tokens: HashMap::new(),
            cost: None,
        }
    }
}

fn metadata_full_parse(path: &Path, info: &ListedFile, limits: &AdapterLimits) -> std::io::Result<SessionMetadata> {
    let mut acc = MetaAccumulator::default();
    if info.size >= limits.two_pass_threshold_bytes {
        let mut reader = read_records(path, 0)?;
        let mut n = 0;
        while n < limits.head_scan_lines {
            match reader.next_record()? {
                Some(bytes) => {
                    if let Ok(v) = serde_json::from_slice::<Value>(&bytes) {
                        acc.observe(&v);
                    }
                    n += 1;
                }
                None => break,
            }
        }
        if info.size > limits.tail_scan_bytes {
            let tail_start = info.size - limits.tail_scan_bytes;
            let mut tail_reader = read_records(path, tail_start)?;
            let _ = tail_reader.next_record()?;
            while let Some(bytes) = tail_reader.next_record()? {
                if let Ok(v) = serde_json::from_slice::<Value>(&bytes) {
                    acc.observe(&v);
                }
            }
        }
    } else {
        let mut reader = read_records(path, 0)?;
        while let Some(bytes) = reader.next_record()? {
            if let Ok(v) = serde_json::from_slice::<Value>(&bytes) {
                acc.observe(&v);
            }
        }
    }
    Ok(acc.into_metadata(path, info))
}

fn metadata_tail_only(
    path: &Path,
    info: &ListedFile,
    cached: &SessionMetadata,
    limits: &AdapterLimits,
) -> std::io::Result<SessionMetadata> {
    let mut acc = MetaAccumulator {
        session_id: Some(cached.session_id.clone()),
        cwd: Some(cached.cwd.clone()),
        first_user_message: cached.first_user_message.clone(),
        first_message_at: cached.first_message_at,
        last_message_at: cached.last_message_at,
        message_count: cached.message_count,
        total_tokens: cached.total_tokens,
        model_counts: cached.model_counts.clone(),
    };
    let tail_start = info.size.saturating_sub(limits.tail_scan_bytes);
    let mut tail_reader = read_records(path, tail_start)?;
    if tail_start > 0 {
        let _ = tail_reader.next_record()?;
    }
    while let Some(bytes) = tail_reader.next_record()? {
        if let Ok(v) = serde_json::from_slice::<Value>(&bytes) {
            acc.observe(&v);
        }
    }
    Ok(acc.into_metadata(path, info))
}

fn walk_flat(root: &Path) -> Vec<ListedFile> {
    let mut out = Vec::new();
    if !root.exists() {
        return out;
    }
    for entry in WalkDir::new(root).max_depth(1).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() && entry.path().extension().and_then(|e| e.to_str()) == Some("jsonl") {
            if let Ok(meta) = entry.metadata() {
                out.push(ListedFile {
                    path: entry.path().to_path_buf(),
                    size: meta.len(),
                    mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                });
            }
        }
    }
    out
}

/// Openclaw-style (P-format) adapter.
pub struct OpenclawAdapter {
    root: PathBuf,
    limits: AdapterLimits,
    dir_cache: DirListingCache,
    metadata_cache: StampedCache<PathBuf, SessionMetadata>,
    message_cache: StampedCache<PathBuf, (Vec<Message>, ParseState)>,
    session_index: RwLock<HashMap<String, PathBuf>>,
}

impl OpenclawAdapter {
    pub fn new(root: PathBuf, limits: AdapterLimits) -> Self {
        OpenclawAdapter {
            metadata_cache: StampedCache::new(limits.meta_cache_max_entries),
            message_cache: StampedCache::new(limits.msg_cache_max_entries),
            dir_cache: DirListingCache::new(limits.dir_listing_ttl),
            root,
            limits,
            session_index: RwLock::new(HashMap::new()),
        }
    }

    fn list_files(&self) -> Vec<ListedFile> {
        let root = self.root.clone();
        self.dir_cache.get_or_refresh(|| walk_flat(&root))
    }

    /// Reads only the session header's first JSONL line to recover `cwd`
    /// (§4.C.2 step 1: P-format's header guarantees `cwd` up front), so a
    /// project-path mismatch can be rejected before running a full metadata
    /// parse. Falls back to the metadata cache/full parse if the header line
    /// is missing or malformed.
    fn read_cwd_cheaply(&self, path: &Path, info: &ListedFile) -> String {
        if let Some(meta) = self.metadata_cache.get(&path.to_path_buf(), info.size, info.mtime) {
            return meta.cwd;
        }
        if let Ok(Some(line)) = read_first_line(path) {
            if let Ok(header) = serde_json::from_str::<Value>(&line) {
                if let Some(cwd) = header.get("cwd").and_then(|v| v.as_str()) {
                    return cwd.to_string();
                }
            }
        }
        self.session_metadata(path, info).map(|m| m.cwd).unwrap_or_default()
    }

    fn session_metadata(&self, path: &Path, info: &ListedFile) -> std::io::Result<SessionMetadata> {
        let key = path.to_path_buf();
        if let Some(cached) = self.metadata_cache.get(&key, info.size, info.mtime) {
            return Ok(cached);
        }
        if let Some((cached, _offset, cached_size, cached_mtime)) = self.metadata_cache.get_with_offset(&key) {
            let (_changed, grew, size, mtime) = file_changed(path, cached_size, cached_mtime)?;
            if grew {
                let info = ListedFile { path: key.clone(), size, mtime };
                let meta = metadata_tail_only(path, &info, &cached, &self.limits)?;
                self.metadata_cache.set(key, meta.clone(), size, mtime, 0);
                return Ok(meta);
            }
        }
        let meta = metadata_full_parse(path, info, &self.limits)?;
        self.metadata_cache.set(key, meta.clone(), info.size, info.mtime, 0);
        Ok(meta)
    }
}

impl Adapter for OpenclawAdapter {
    fn id(&self) -> &'static str {
        "openclaw"
    }
    fn name(&self) -> &'static str {
        "Openclaw"
    }
    fn icon(&self) -> &'static str {
        ""
    }

    fn detect(&self, _project_root: &Path) -> bool {
        self.root.exists()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            sessions: true,
            messages: true,
            usage: true,
            watch: true,
        }
    }

    fn sessions(&self, project_root: &Path) -> Result<Vec<Session>, IngestError> {
        let Some(resolver) = ProjectResolver::new(project_root) else {
            return Ok(Vec::new());
        };
        let files = self.list_files();
        let mut out = Vec::new();
        let mut new_index = HashMap::new();

        for info in &files {
            let cwd = self.read_cwd_cheaply(&info.path, info);
            if !resolver.matches(&cwd) {
                continue;
            }
            let meta = self.session_metadata(&info.path, info)?;
            if meta.message_count == 0 {
                continue;
            }

            let classification = meta
                .first_user_message
                .as_deref()
                .map(classify_first_message)
                .unwrap_or_default();

            let name = classification
                .name
                .or_else(|| meta.first_user_message.as_deref().map(|s| truncate(s, 80)))
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| meta.session_id.chars().take(8).collect());

            let created_at = meta.first_message_at.unwrap_or_else(Utc::now);
            let updated_at = meta.last_message_at.unwrap_or(created_at);
            let is_active = Utc::now().signed_duration_since(updated_at)
                < chrono::Duration::from_std(self.limits.active_session_threshold).unwrap_or_default();

            new_index.insert(meta.session_id.clone(), info.path.clone());

            out.push(Session {
                id: meta.session_id.clone(),
                name,
                adapter_id: self.id().to_string(),
                adapter_name: self.name().to_string(),
                adapter_icon: self.icon().to_string(),
                created_at,
                updated_at,
                duration_seconds: (updated_at - created_at).num_seconds().max(0),
                is_active,
                message_count: meta.message_count,
                total_tokens: meta.total_tokens,
                est_cost: meta.cost,
                file_size: info.size,
                path: info.path.clone(),
            });
        }

        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let listed: std::collections::HashSet<PathBuf> = files.iter().map(|f| f.path.clone()).collect();
        self.metadata_cache.delete_if(|p| !listed.contains(p));
        *self.session_index.write() = new_index;

        Ok(out)
    }

    fn messages(&self, session_id: &str) -> Result<Vec<Message>, IngestError> {
        let path = {
            let index = self.session_index.read();
            index.get(session_id).cloned()
        };
        let path = match path {
            Some(p) => p,
            None => {
                let files = self.list_files();
                files
                    .iter()
                    .find(|f| f.path.file_stem().and_then(|s| s.to_str()) == Some(session_id))
                    .map(|f| f.path.clone())
                    .ok_or_else(|| IngestError::Other(format!("unknown session: {session_id}")))?
            }
        };

        let meta = std::fs::metadata(&path)?;
        let size = meta.len();
        let mtime = meta.modified()?;

        if let Some((cached, _)) = self.message_cache.get(&path, size, mtime) {
            return Ok(cached);
        }

        if let Some(((_, cached_state), offset, cached_size, cached_mtime)) =
            self.message_cache.get_with_offset(&path)
        {
            if let Ok((_changed, true, size, mtime)) = file_changed(&path, cached_size, cached_mtime) {
                match incremental_message_parse(&path, offset, cached_state) {
                    Ok((messages, state, new_offset)) => {
                        self.message_cache.set(path.clone(), (messages.clone(), state), size, mtime, new_offset);
                        return Ok(messages);
                    }
                    Err(_) => {
                        tracing::warn!(path = %path.display(), "incremental message parse failed, falling back to full");
                    }
                }
            }
        }

        let (messages, state, offset) = full_message_parse(&path)?;
        self.message_cache.set(path.clone(), (messages.clone(), state), size, mtime, offset);
        Ok(messages)
    }

    fn usage(&self, session_id: &str) -> Result<UsageStats, IngestError> {
        let messages = self.messages(session_id)?;
        let total = messages.iter().filter_map(|m| m.usage.as_ref()).map(|u| u.total()).sum();
        Ok(UsageStats { total_tokens: total, est_cost: None })
    }

    fn watch(&self, _project_root: &Path) -> Result<(EventReceiver, Closer), IngestError> {
        watcher::watch(&self.root, self.limits.watch_debounce)
    }

    fn watch_scope(&self) -> WatchScope {
        WatchScope::Global
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_lines(path: &Path, lines: &[&str]) {
        let mut file = std::fs::File::create(path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
    }

    #[test]
    fn classify_cron_prefix() {
        let c = classify_first_message("[cron:7c1e nightly-backup] run it");
        assert_eq!(c.category, "cron");
        assert_eq!(c.name.as_deref(), Some("nightly-backup"));
    }

    #[test]
    fn classify_system_prefix() {
        let c = classify_first_message("System: boot complete");
        assert_eq!(c.category, "system");
    }

    #[test]
    fn classify_plain_message_is_interactive_direct() {
        let c = classify_first_message("hey, can you help me");
        assert_eq!(c.category, "interactive");
        assert_eq!(c.source, "direct");
    }

    #[test]
    fn tool_use_and_result_link_across_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        write_lines(
            &path,
            &[
                r#"{"type":"user","sessionId":"sess-1","timestamp":"2025-11-20T04:13:55Z","cwd":"/tmp","message":{"role":"user","content":"do a thing"}}"#,
                r#"{"type":"assistant","sessionId":"sess-1","timestamp":"2025-11-20T04:14:00Z","cwd":"/tmp","message":{"role":"assistant","content":[{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls"}}]}}"#,
                r#"{"type":"user","sessionId":"sess-1","timestamp":"2025-11-20T04:14:01Z","cwd":"/tmp","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"file.txt"}]}}"#,
            ],
        );

        let (messages, _, _) = full_message_parse(&path).unwrap();
        let assistant = messages.iter().find(|m| matches!(m.role, Role::Assistant)).unwrap();
        assert_eq!(assistant.tool_uses.len(), 1);
        assert_eq!(assistant.tool_uses[0].output.as_deref(), Some("file.txt"));
    }

    #[test]
    fn incremental_append_yields_exactly_one_new_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        write_lines(
            &path,
            &[r#"{"type":"user","sessionId":"sess-1","timestamp":"2025-11-20T04:13:55Z","cwd":"/tmp","message":{"role":"user","content":"hello"}}"#],
        );

        let (messages, state, offset) = full_message_parse(&path).unwrap();
        assert_eq!(messages.len(), 1);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(
            file,
            r#"{{"type":"assistant","sessionId":"sess-1","timestamp":"2025-11-20T04:14:00Z","cwd":"/tmp","message":{{"role":"assistant","content":[{{"type":"text","text":"hi there"}}]}}}}"#
        ).unwrap();

        let (more, _, _) = incremental_message_parse(&path, offset, state).unwrap();
        assert_eq!(more.len(), 2);
        assert_eq!(more[1].content, "hi there");
    }
}
