//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PushbusSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `PUSHBUS_*` environment overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{LogLevel, PushbusSettings};

/// Resolve the path to the settings file (`~/.pushbus/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pushbus").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PushbusSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON, an unparsable
/// environment override or an invalid value is an error.
pub fn load_settings_from_path(path: &Path) -> Result<PushbusSettings> {
    let defaults = serde_json::to_value(PushbusSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: PushbusSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings)?;
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `PUSHBUS_*` environment variable overrides to loaded settings.
///
/// Booleans accept `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
/// A set but unparsable value is an error naming the variable.
pub fn apply_env_overrides(settings: &mut PushbusSettings) -> Result<()> {
    apply_overrides(settings, |name| std::env::var(name).ok())
}

/// Apply overrides read through `lookup` (variable name → value).
///
/// Empty values count as unset.
pub fn apply_overrides<F>(settings: &mut PushbusSettings, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("PUSHBUS_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("PUSHBUS_PORT", |v| parse_u16_range(v, 0, 65535))? {
        settings.server.port = v;
    }
    if let Some(v) = env.string("PUSHBUS_BASE_PATH") {
        settings.server.base_path = v;
    }
    if let Some(v) = env.parsed("PUSHBUS_MAX_CONNECTIONS", |v| {
        parse_usize_range(v, 1, 1_000_000)
    })? {
        settings.server.max_connections = v;
    }

    // ── WebSocket normalization ─────────────────────────────────────
    if let Some(v) = env.string("PUSHBUS_WS_CONTENT_TYPE") {
        settings.websocket.content_type = v;
    }
    if let Some(v) = env.string("PUSHBUS_WS_METHOD") {
        settings.websocket.method = v.to_ascii_uppercase();
    }
    if let Some(v) = env.string("PUSHBUS_WS_DELIMITER") {
        settings.websocket.path_delimiter = v;
    }
    if let Some(v) = env.parsed("PUSHBUS_RECYCLE_REQUESTS", parse_bool)? {
        settings.websocket.recycle_requests = Some(v);
    }

    // ── Cache ───────────────────────────────────────────────────────
    if let Some(v) = env.parsed("PUSHBUS_CACHE_CAPACITY", |v| {
        parse_usize_range(v, 0, 1_000_000)
    })? {
        settings.cache.capacity = v;
    }

    // ── Events / logging ────────────────────────────────────────────
    if let Some(v) = env.string("PUSHBUS_EVENTS_FILE") {
        settings.events.definitions_file = Some(v);
    }
    if let Some(v) = env.parsed("PUSHBUS_LOG_LEVEL", LogLevel::parse)? {
        settings.logging.level = v;
    }
    Ok(())
}

/// Reject values the server cannot run with.
pub fn validate(settings: &PushbusSettings) -> Result<()> {
    if !settings.server.base_path.starts_with('/') {
        return Err(SettingsError::InvalidValue(
            "basePath must start with '/'".into(),
        ));
    }
    if settings.server.send_queue_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "sendQueueCapacity must be at least 1".into(),
        ));
    }
    if settings.websocket.path_delimiter.is_empty() {
        return Err(SettingsError::InvalidValue(
            "pathDelimiter must not be empty".into(),
        ));
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Result<Option<T>> {
        let Some(val) = self.string(name) else {
            return Ok(None);
        };
        match parse(val.trim()) {
            Some(parsed) => {
                debug!(key = name, "env override applied");
                Ok(Some(parsed))
            }
            None => Err(SettingsError::InvalidValue(format!(
                "{name}={val:?} could not be parsed"
            ))),
        }
    }
}
