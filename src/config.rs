//! Configuration loading
//!
//! A [`SyncConfig`] is built in layers: built-in defaults, then a JSON or YAML
//! file, then `MOBISYNC__SECTION__FIELD=value` environment overlays, then a
//! whole-document JSON overlay from `MOBISYNC_CONFIG_JSON`. Every field has a
//! default, so partial documents are valid at every layer.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use mobisync_resource_center::{BatchingOptions, CachingStrategy, LazyLoadingOptions};
use mobisync_wait_engine::{PollingDefaults, TimeoutProfile, TimeoutResolver, DEFAULT_PROFILE};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::errors::{MobisyncError, Result};

const ENV_PREFIX: &str = "MOBISYNC__";
const ENV_JSON: &str = "MOBISYNC_CONFIG_JSON";
const LOCAL_CONFIG: &str = "config/mobisync.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Profile activated at startup; unknown names fall back to `default`
    pub active_profile: String,
    pub profiles: Vec<TimeoutProfile>,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            active_profile: DEFAULT_PROFILE.to_string(),
            profiles: Vec::new(),
        }
    }
}

impl TimeoutSettings {
    /// Resolver with every configured profile registered and the configured one active
    pub fn build_resolver(&self) -> TimeoutResolver {
        let resolver = TimeoutResolver::new();
        for profile in &self.profiles {
            resolver.register_profile(profile.clone());
        }
        let wanted = self.active_profile.as_str();
        if wanted != DEFAULT_PROFILE && !resolver.set_active_profile(wanted) {
            warn!(profile = wanted, "Configured timeout profile is not registered, using default");
        }
        resolver
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub timeouts: TimeoutSettings,
    pub polling: PollingDefaults,
    pub batching: BatchingOptions,
    pub caching: CachingStrategy,
    pub lazy_loading: LazyLoadingOptions,
    pub logging: LoggingConfig,
}

impl SyncConfig {
    /// Parse a document as JSON first, then YAML
    pub fn parse_str(raw: &str) -> Result<Self> {
        match serde_json::from_str(raw) {
            Ok(config) => Ok(config),
            Err(json_err) => serde_yaml::from_str(raw).map_err(|yaml_err| {
                MobisyncError::invalid_config(format!(
                    "json error: {json_err}; yaml error: {yaml_err}"
                ))
            }),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| MobisyncError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        let polling = &self.polling;
        if polling.interval_ms == 0 {
            return Err(MobisyncError::invalid_config(
                "polling.interval_ms must be positive",
            ));
        }
        if !polling.backoff_factor.is_finite() || polling.backoff_factor < 1.0 {
            return Err(MobisyncError::invalid_config(
                "polling.backoff_factor must be at least 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&polling.alert_threshold) {
            return Err(MobisyncError::invalid_config(
                "polling.alert_threshold must lie in [0, 1]",
            ));
        }
        if self.batching.max_batch_size == 0 {
            return Err(MobisyncError::invalid_config(
                "batching.max_batch_size must be positive",
            ));
        }
        if self.caching.max_entries == 0 {
            return Err(MobisyncError::invalid_config(
                "caching.max_entries must be positive",
            ));
        }

        let mut seen = HashSet::new();
        for profile in &self.timeouts.profiles {
            if profile.name.trim().is_empty() {
                return Err(MobisyncError::invalid_config(
                    "timeout profiles require a name",
                ));
            }
            if !seen.insert(profile.name.as_str()) {
                return Err(MobisyncError::invalid_config(format!(
                    "duplicate timeout profile '{}'",
                    profile.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LoadOptions {
    /// Candidate files; the first one that exists is loaded
    pub paths: Vec<PathBuf>,
    pub include_env: bool,
}

impl LoadOptions {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            paths: vec![path.into()],
            include_env: true,
        }
    }
}

/// `./config/mobisync.yaml`, then `<config_dir>/mobisync/config.yaml`
pub fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG)];
    if let Some(mut dir) = dirs::config_dir() {
        dir.push("mobisync");
        dir.push("config.yaml");
        paths.push(dir);
    }
    paths
}

/// Load with environment overlays from `path`, or from the default search path
pub fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    let options = LoadOptions {
        paths: match path {
            Some(path) => vec![path.to_path_buf()],
            None => default_search_paths(),
        },
        include_env: true,
    };
    load_config_with_options(&options)
}

pub fn load_config_with_options(options: &LoadOptions) -> Result<SyncConfig> {
    let mut config = match options.paths.iter().find(|path| path.exists()) {
        Some(path) => {
            let config = SyncConfig::from_path(path)?;
            info!(path = %path.display(), "Loaded configuration");
            config
        }
        None => {
            debug!(candidates = options.paths.len(), "No config file found, using defaults");
            SyncConfig::default()
        }
    };

    if options.include_env {
        config = apply_env(config, env::vars(), env::var(ENV_JSON).ok())?;
    }

    config.validate()?;
    Ok(config)
}

fn apply_env(
    config: SyncConfig,
    vars: impl IntoIterator<Item = (String, String)>,
    json_overlay: Option<String>,
) -> Result<SyncConfig> {
    let mut document = serde_json::to_value(&config)
        .map_err(|err| MobisyncError::invalid_config(err.to_string()))?;

    let mut applied = 0usize;
    for (key, raw) in vars {
        let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let segments: Vec<String> = stripped
            .split("__")
            .filter(|segment| !segment.is_empty())
            .map(|segment| segment.to_ascii_lowercase())
            .collect();
        if segments.is_empty() {
            continue;
        }
        set_path(&mut document, &segments, parse_env_value(&raw))?;
        applied += 1;
    }

    if let Some(raw_json) = json_overlay.filter(|raw| !raw.trim().is_empty()) {
        let overlay: Value = serde_json::from_str(&raw_json).map_err(|err| {
            MobisyncError::invalid_config(format!("{ENV_JSON} is not valid JSON: {err}"))
        })?;
        merge(&mut document, overlay);
        applied += 1;
    }

    if applied == 0 {
        return Ok(config);
    }
    debug!(overlays = applied, "Applied environment configuration overlays");
    serde_json::from_value(document).map_err(|err| {
        warn!(error = %err, "Environment overlays produced an invalid configuration");
        MobisyncError::invalid_config(err.to_string())
    })
}

fn parse_env_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn set_path(document: &mut Value, segments: &[String], value: Value) -> Result<()> {
    let Some((last, parents)) = segments.split_last() else {
        return Ok(());
    };
    let mut cursor = document;
    for segment in parents {
        let object = as_object(cursor, segments)?;
        cursor = object
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    as_object(cursor, segments)?.insert(last.clone(), value);
    Ok(())
}

fn as_object<'a>(value: &'a mut Value, segments: &[String]) -> Result<&'a mut Map<String, Value>> {
    value.as_object_mut().ok_or_else(|| {
        MobisyncError::invalid_config(format!(
            "cannot set '{}': parent is not a section",
            segments.join(".")
        ))
    })
}

/// Objects merge key by key; any other overlay value replaces the target
fn merge(target: &mut Value, overlay: Value) {
    match (target, overlay) {
        (Value::Object(target), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match target.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, overlay) => *target = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mobisync_resource_center::InvalidationStrategy;
    use mobisync_wait_engine::TimeoutStrategy;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_are_valid() {
        let config = SyncConfig::default();
        config.validate().unwrap();
        assert_eq!(config.timeouts.active_profile, "default");
        assert_eq!(config.polling.interval_ms, 500);
        assert_eq!(config.batching.max_batch_size, 10);
        assert_eq!(config.caching.max_entries, 1000);
        assert!(!config.logging.json);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let raw = r#"
timeouts:
  active_profile: slow-device
  profiles:
    - name: slow-device
      config:
        global: 20000
        operation:
          click: 8000
polling:
  interval_ms: 250
  strategy: progressive
caching:
  invalidation_strategy: ttl
"#;
        let config = SyncConfig::parse_str(raw).unwrap();
        assert_eq!(config.timeouts.active_profile, "slow-device");
        assert_eq!(config.timeouts.profiles[0].config.global, Some(20000));
        assert_eq!(
            config.timeouts.profiles[0].config.operation.get("click"),
            Some(&8000)
        );
        assert_eq!(config.polling.interval_ms, 250);
        assert_eq!(config.polling.strategy, TimeoutStrategy::Progressive);
        assert_eq!(config.polling.max_backoff_ms, 3000);
        assert_eq!(config.caching.invalidation_strategy, InvalidationStrategy::Ttl);
        assert_eq!(config.batching, BatchingOptions::default());
    }

    #[test]
    fn json_documents_parse() {
        let config =
            SyncConfig::parse_str(r#"{"batching": {"maxBatchSize": 4}, "logging": {"json": true}}"#)
                .unwrap();
        assert_eq!(config.batching.max_batch_size, 4);
        assert!(config.logging.json);
    }

    #[test]
    fn malformed_documents_report_both_parsers() {
        let err = SyncConfig::parse_str("polling: [unterminated").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("json error"), "{message}");
        assert!(message.contains("yaml error"), "{message}");
    }

    #[test]
    fn env_overlays_set_nested_fields() {
        let config = apply_env(
            SyncConfig::default(),
            vars(&[
                ("MOBISYNC__POLLING__INTERVAL_MS", "125"),
                ("MOBISYNC__POLLING__STRATEGY", "dynamic"),
                ("MOBISYNC__LOGGING__LEVEL", "debug"),
                ("MOBISYNC__BATCHING__ENABLED", "false"),
                ("UNRELATED__POLLING__INTERVAL_MS", "1"),
            ]),
            None,
        )
        .unwrap();
        assert_eq!(config.polling.interval_ms, 125);
        assert_eq!(config.polling.strategy, TimeoutStrategy::Dynamic);
        assert_eq!(config.logging.level, "debug");
        assert!(!config.batching.enabled);
    }

    #[test]
    fn json_overlay_wins_over_field_overlays() {
        let config = apply_env(
            SyncConfig::default(),
            vars(&[("MOBISYNC__LAZY_LOADING__LOAD_THRESHOLD", "50")]),
            Some(r#"{"lazy_loading": {"load_threshold": 75}, "timeouts": {"active_profile": "ci"}}"#.into()),
        )
        .unwrap();
        assert_eq!(config.lazy_loading.load_threshold, 75);
        assert_eq!(config.timeouts.active_profile, "ci");
        assert!(config.lazy_loading.enabled);
    }

    #[test]
    fn env_overlay_with_wrong_type_is_rejected() {
        let err = apply_env(
            SyncConfig::default(),
            vars(&[("MOBISYNC__POLLING__INTERVAL_MS", "soon")]),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, MobisyncError::InvalidConfig(_)));

        let err = apply_env(
            SyncConfig::default(),
            vars(&[("MOBISYNC__LOGGING__LEVEL__INNER", "x")]),
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("logging.level.inner"));
    }

    #[test]
    fn resolver_activates_configured_profile() {
        let settings = TimeoutSettings {
            active_profile: "slow".into(),
            profiles: vec![TimeoutProfile::new("slow")
                .with_global(30_000)
                .with_operation("click", 8_000)],
        };
        let resolver = settings.build_resolver();
        assert_eq!(resolver.active_profile_name(), "slow");
        assert_eq!(resolver.resolve_timeout("click", None, None), 8_000);
        // built-in operation entries survive the merge; only unknown ones fall back to global
        assert_eq!(resolver.resolve_timeout("swipe", None, None), 5_000);
        assert_eq!(resolver.resolve_timeout("scroll", None, None), 30_000);

        let unknown = TimeoutSettings {
            active_profile: "missing".into(),
            profiles: Vec::new(),
        };
        assert_eq!(unknown.build_resolver().active_profile_name(), "default");
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = SyncConfig::default();
        config.polling.backoff_factor = 0.5;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.timeouts.profiles = vec![TimeoutProfile::new("ci"), TimeoutProfile::new("ci")];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate timeout profile 'ci'"));
    }

    #[test]
    fn loads_first_existing_file_without_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mobisync.yaml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "polling:\n  interval_ms: 40").unwrap();

        let options = LoadOptions {
            paths: vec![dir.path().join("missing.yaml"), path],
            include_env: false,
        };
        let config = load_config_with_options(&options).unwrap();
        assert_eq!(config.polling.interval_ms, 40);

        let defaults = load_config_with_options(&LoadOptions::default()).unwrap();
        assert_eq!(defaults, SyncConfig::default());
    }

    #[test]
    fn invalid_file_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"polling": {"interval_ms": 0}}"#).unwrap();
        let options = LoadOptions {
            paths: vec![path],
            include_env: false,
        };
        assert!(matches!(
            load_config_with_options(&options),
            Err(MobisyncError::InvalidConfig(_))
        ));
    }
}
