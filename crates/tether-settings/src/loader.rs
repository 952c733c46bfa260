//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TetherSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `TETHER_*` environment variable overrides (highest priority)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::TetherSettings;

/// Resolve the default settings file (`~/.tether/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. A file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Defaults deep-merged with the file at `path`, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<TetherSettings> {
    let defaults = serde_json::to_value(TetherSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TetherSettings = serde_json::from_value(merged)?;
    clamp_to_limits(&mut settings);
    Ok(settings)
}

// ── Limits ──────────────────────────────────────────────────────────────────

const HEARTBEAT_INTERVAL_MS: (u64, u64) = (10, 3_600_000);
const MAX_CONNECTIONS: (usize, usize) = (1, 1_000_000);
const SHUTDOWN_TIMEOUT_MS: (u64, u64) = (1, 600_000);

/// Pull file-supplied numbers into the same ranges the env layer accepts.
///
/// Out-of-range values are clamped to the nearest bound with a warning.
pub fn clamp_to_limits(settings: &mut TetherSettings) {
    clamp(
        "server.heartbeatIntervalMs",
        &mut settings.server.heartbeat_interval_ms,
        HEARTBEAT_INTERVAL_MS,
    );
    clamp(
        "server.maxConnections",
        &mut settings.server.max_connections,
        MAX_CONNECTIONS,
    );
    clamp(
        "shutdown.timeoutMs",
        &mut settings.shutdown.timeout_ms,
        SHUTDOWN_TIMEOUT_MS,
    );
}

fn clamp<T>(key: &str, value: &mut T, (min, max): (T, T))
where
    T: Copy + Ord + std::fmt::Display,
{
    let original = *value;
    let clamped = original.clamp(min, max);
    if clamped != original {
        tracing::warn!(key, %original, %clamped, "setting out of range, clamping");
        *value = clamped;
    }
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut TetherSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Integers must parse and fall within range; booleans accept
/// `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`. Invalid values are
/// ignored with a warning.
pub fn apply_overrides<F>(settings: &mut TetherSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("TETHER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("TETHER_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("TETHER_IDENTITY") {
        settings.server.identity = v;
    }
    if let Some(v) = env.u64(
        "TETHER_HEARTBEAT_INTERVAL_MS",
        HEARTBEAT_INTERVAL_MS.0,
        HEARTBEAT_INTERVAL_MS.1,
    ) {
        settings.server.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.usize("TETHER_MAX_CONNECTIONS", MAX_CONNECTIONS.0, MAX_CONNECTIONS.1) {
        settings.server.max_connections = v;
    }

    // ── Shutdown ────────────────────────────────────────────────────
    if let Some(v) = env.u64(
        "TETHER_SHUTDOWN_TIMEOUT_MS",
        SHUTDOWN_TIMEOUT_MS.0,
        SHUTDOWN_TIMEOUT_MS.1,
    ) {
        settings.shutdown.timeout_ms = v;
    }
    if let Some(v) = env.bool("TETHER_EXIT_PROCESS") {
        settings.shutdown.exit_process = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("TETHER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("TETHER_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
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

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8080, "host": "localhost"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"a": null});
        assert_eq!(deep_merge(target, source)["a"], 1);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── files ───────────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = read_settings_file(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.shutdown.timeout_ms, 5000);
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9100, "relayTypes": ["chat", "presence"]}, "shutdown": {"exitProcess": false}}"#,
        )
        .unwrap();

        let settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.relay_types, vec!["chat", "presence"]);
        assert!(!settings.shutdown.exit_process);
        assert_eq!(settings.server.identity, "gateway");
    }

    #[test]
    fn file_values_are_clamped_to_limits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"heartbeatIntervalMs": 0, "maxConnections": 0}, "shutdown": {"timeoutMs": 0}}"#,
        )
        .unwrap();

        let settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.server.heartbeat_interval_ms, 10);
        assert_eq!(settings.server.max_connections, 1);
        assert_eq!(settings.shutdown.timeout_ms, 1);
    }

    #[test]
    fn in_range_values_are_untouched() {
        let mut settings = TetherSettings::default();
        settings.server.heartbeat_interval_ms = 250;
        settings.server.max_connections = 4;
        clamp_to_limits(&mut settings);
        assert_eq!(settings.server.heartbeat_interval_ms, 250);
        assert_eq!(settings.server.max_connections, 4);

        settings.server.heartbeat_interval_ms = u64::MAX;
        clamp_to_limits(&mut settings);
        assert_eq!(settings.server.heartbeat_interval_ms, 3_600_000);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert_matches!(read_settings_file(&path), Err(SettingsError::Json(_)));
    }

    #[test]
    fn wrong_type_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": "high"}}"#).unwrap();
        assert_matches!(read_settings_file(&path), Err(SettingsError::Json(_)));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply() {
        let mut settings = TetherSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("TETHER_HOST", "0.0.0.0"),
                ("TETHER_PORT", "9500"),
                ("TETHER_IDENTITY", "hub"),
                ("TETHER_HEARTBEAT_INTERVAL_MS", "1500"),
                ("TETHER_SHUTDOWN_TIMEOUT_MS", "250"),
                ("TETHER_EXIT_PROCESS", "off"),
                ("TETHER_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9500);
        assert_eq!(settings.server.identity, "hub");
        assert_eq!(settings.server.heartbeat_interval_ms, 1500);
        assert_eq!(settings.shutdown.timeout_ms, 250);
        assert!(!settings.shutdown.exit_process);
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut settings = TetherSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("TETHER_PORT", "99999"),
                ("TETHER_HEARTBEAT_INTERVAL_MS", "soon"),
                ("TETHER_EXIT_PROCESS", "maybe"),
                ("TETHER_HOST", ""),
            ]),
        );
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.heartbeat_interval_ms, 30_000);
        assert!(settings.shutdown.exit_process);
        assert_eq!(settings.server.host, "127.0.0.1");
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "1", "YES", "On"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("80", 1, 100), Some(80));
        assert_eq!(parse_u16_range("0", 1, 100), None);
        assert_eq!(parse_u64_range("-1", 0, 10), None);
        assert_eq!(parse_usize_range("10", 1, 10), Some(10));
    }
}
