//! Zero-config configuration loading.
//!
//! Configuration lives at `~/.config/transcript-core/config.toml` and is
//! purely optional. Every field falls back to a built-in default, and
//! `Config::load()` never errors — a missing or malformed file behaves
//! exactly like an absent one, since the library must work out of the box
//! with no setup (§A.3).

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::adapter::AdapterLimits;

/// Per-adapter transcript root overrides from `[sources]` (§6: "Configuration
/// constants"). An absent field means "use the adapter's built-in default".
#[derive(Debug, Default, Deserialize)]
pub struct SourcesConfig {
    pub codex: Option<String>,
    pub openclaw: Option<String>,
}

impl SourcesConfig {
    pub fn codex_root(&self) -> Option<PathBuf> {
        match &self.codex {
            Some(p) => Some(expand_tilde(p)),
            None => crate::adapter::codex::default_root(),
        }
    }

    pub fn openclaw_root(&self) -> Option<PathBuf> {
        match &self.openclaw {
            Some(p) => Some(expand_tilde(p)),
            None => crate::adapter::openclaw::default_root(),
        }
    }
}

impl Config {
    pub fn codex_root(&self) -> Option<PathBuf> {
        self.sources.codex_root()
    }

    pub fn openclaw_root(&self) -> Option<PathBuf> {
        self.sources.openclaw_root()
    }
}

/// Tunables from the `[limits]` table, mirroring `AdapterLimits` plus the
/// reader and watcher constants a caller may reasonably want to override.
/// Every field is optional; a missing one keeps the built-in default.
#[derive(Debug, Default, Deserialize)]
pub struct LimitsConfig {
    pub meta_cache_max_entries: Option<usize>,
    pub msg_cache_max_entries: Option<usize>,
    pub dir_listing_ttl_ms: Option<u64>,
    pub two_pass_threshold_bytes: Option<u64>,
    pub head_scan_lines: Option<usize>,
    pub tail_scan_bytes: Option<u64>,
    pub active_session_threshold_secs: Option<u64>,
    pub watch_debounce_ms: Option<u64>,
}

impl From<&LimitsConfig> for AdapterLimits {
    fn from(cfg: &LimitsConfig) -> Self {
        let default = AdapterLimits::default();
        AdapterLimits {
            meta_cache_max_entries: cfg.meta_cache_max_entries.unwrap_or(default.meta_cache_max_entries),
            msg_cache_max_entries: cfg.msg_cache_max_entries.unwrap_or(default.msg_cache_max_entries),
            dir_listing_ttl: cfg
                .dir_listing_ttl_ms
                .map(Duration::from_millis)
                .unwrap_or(default.dir_listing_ttl),
            two_pass_threshold_bytes: cfg
                .two_pass_threshold_bytes
                .unwrap_or(default.two_pass_threshold_bytes),
            head_scan_lines: cfg.head_scan_lines.unwrap_or(default.head_scan_lines),
            tail_scan_bytes: cfg.tail_scan_bytes.unwrap_or(default.tail_scan_bytes),
            active_session_threshold: cfg
                .active_session_threshold_secs
                .map(Duration::from_secs)
                .unwrap_or(default.active_session_threshold),
            watch_debounce: cfg
                .watch_debounce_ms
                .map(Duration::from_millis)
                .unwrap_or(default.watch_debounce),
        }
    }
}

/// Top-level config deserialized from `~/.config/transcript-core/config.toml`.
///
/// All fields are optional, so a config file with a single key — or no file
/// at all — is valid.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Config {
    /// Load config from `~/.config/transcript-core/config.toml`. Returns
    /// `Config::default()` when the file is absent or fails to parse —
    /// never an error, since this must remain usable with zero setup.
    pub fn load() -> Config {
        let Some(home) = dirs::home_dir() else {
            return Config::default();
        };
        let path = home.join(".config/transcript-core/config.toml");
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Config::default();
        };
        toml::from_str(&content).unwrap_or_default()
    }
}

/// Expand a leading `~` or `~/` prefix to the user's home directory. Paths
/// without it are returned unchanged.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_tilde_with_path() {
        let result = expand_tilde("~/projects");
        let home = dirs::home_dir().unwrap();
        assert_eq!(result, home.join("projects"));
    }

    #[test]
    fn expand_tilde_bare() {
        let result = expand_tilde("~");
        assert_eq!(result, dirs::home_dir().unwrap());
    }

    #[test]
    fn expand_tilde_absolute_unchanged() {
        assert_eq!(expand_tilde("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn config_default_has_no_source_overrides() {
        let config = Config::default();
        assert!(config.sources.codex.is_none());
        assert!(config.sources.openclaw.is_none());
    }

    #[test]
    fn config_deserializes_sources_and_limits() {
        let toml_str = r#"
[sources]
codex = "~/custom/codex"

[limits]
watch_debounce_ms = 200
tail_scan_bytes = 4096
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.sources.codex.as_deref(), Some("~/custom/codex"));
        assert_eq!(config.limits.watch_debounce_ms, Some(200));
        assert_eq!(config.limits.tail_scan_bytes, Some(4096));
    }

    #[test]
    fn limits_config_overrides_only_specified_fields() {
        let cfg = LimitsConfig {
            tail_scan_bytes: Some(1234),
            ..Default::default()
        };
        let limits = AdapterLimits::from(&cfg);
        assert_eq!(limits.tail_scan_bytes, 1234);
        assert_eq!(limits.meta_cache_max_entries, AdapterLimits::default().meta_cache_max_entries);
    }
}
