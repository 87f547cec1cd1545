//! Hierarchical timeout resolution with named profiles

use std::collections::HashMap;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Name of the profile seeded at construction
pub const DEFAULT_PROFILE: &str = "default";

/// Budget used when no profile yields a value
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Fully populated timeout table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimeoutConfig {
    pub global: u64,
    pub operation: HashMap<String, u64>,
    pub element: HashMap<String, u64>,
    pub element_type: HashMap<String, u64>,
    pub condition: HashMap<String, u64>,
}

fn table(entries: &[(&str, u64)]) -> HashMap<String, u64> {
    entries
        .iter()
        .map(|(key, ms)| (key.to_string(), *ms))
        .collect()
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            global: DEFAULT_TIMEOUT_MS,
            operation: table(&[
                ("findElement", 10_000),
                ("findElements", 10_000),
                ("click", 5_000),
                ("sendKeys", 7_000),
                ("tap", 5_000),
                ("swipe", 5_000),
                ("screenshot", 15_000),
                ("getPageSource", 15_000),
                ("waitForCondition", 10_000),
            ]),
            element: HashMap::new(),
            element_type: table(&[
                ("button", 5_000),
                ("input", 7_000),
                ("text", 5_000),
                ("image", 10_000),
                ("list", 15_000),
                ("webview", 20_000),
            ]),
            condition: table(&[
                ("present", 10_000),
                ("visible", 10_000),
                ("enabled", 5_000),
                ("attribute", 10_000),
                ("text", 10_000),
                ("compound", 15_000),
                ("custom", 10_000),
            ]),
        }
    }
}

impl TimeoutConfig {
    /// Built-in defaults with `overrides` merged category by category
    ///
    /// `global` is replaced wholesale, the four maps key by key.
    pub fn merged(overrides: &TimeoutOverrides) -> Self {
        let mut config = Self::default();
        if let Some(global) = overrides.global {
            config.global = global;
        }
        config.operation.extend(overrides.operation.clone());
        config.element.extend(overrides.element.clone());
        config.element_type.extend(overrides.element_type.clone());
        config.condition.extend(overrides.condition.clone());
        config
    }

    fn lookup(&self, query: &TimeoutQuery<'_>) -> u64 {
        query
            .element_id
            .and_then(|id| self.element.get(id))
            .or_else(|| query.element_type.and_then(|ty| self.element_type.get(ty)))
            .or_else(|| query.condition.and_then(|kind| self.condition.get(kind)))
            .or_else(|| self.operation.get(query.operation))
            .copied()
            .unwrap_or(self.global)
    }
}

/// Partial timeout table as supplied by callers and configuration files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimeoutOverrides {
    pub global: Option<u64>,
    pub operation: HashMap<String, u64>,
    pub element: HashMap<String, u64>,
    pub element_type: HashMap<String, u64>,
    pub condition: HashMap<String, u64>,
}

/// Scales a resolved budget by the observed timeout rate of the operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DynamicAdjustment {
    pub enabled: bool,
    /// Weight of the timeout rate: `base * (1 + timeout_rate * factor)`
    pub factor: f64,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
    /// Observations required before any adjustment applies
    pub min_samples: u64,
}

impl Default for DynamicAdjustment {
    fn default() -> Self {
        Self {
            enabled: false,
            factor: 1.0,
            min_timeout_ms: 1_000,
            max_timeout_ms: 60_000,
            min_samples: 5,
        }
    }
}

impl DynamicAdjustment {
    fn apply(&self, base: u64, timeout_rate: f64) -> u64 {
        let scaled = (base as f64 * (1.0 + timeout_rate * self.factor)).round() as u64;
        let ceiling = self.max_timeout_ms.max(self.min_timeout_ms);
        scaled.max(self.min_timeout_ms).min(ceiling)
    }
}

/// Profile as registered by callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutProfile {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub config: TimeoutOverrides,
    #[serde(default)]
    pub dynamic_adjustment: Option<DynamicAdjustment>,
}

impl TimeoutProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            config: TimeoutOverrides::default(),
            dynamic_adjustment: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_global(mut self, ms: u64) -> Self {
        self.config.global = Some(ms);
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>, ms: u64) -> Self {
        self.config.operation.insert(operation.into(), ms);
        self
    }

    pub fn with_element(mut self, element_id: impl Into<String>, ms: u64) -> Self {
        self.config.element.insert(element_id.into(), ms);
        self
    }

    pub fn with_element_type(mut self, element_type: impl Into<String>, ms: u64) -> Self {
        self.config.element_type.insert(element_type.into(), ms);
        self
    }

    pub fn with_condition(mut self, kind: impl Into<String>, ms: u64) -> Self {
        self.config.condition.insert(kind.into(), ms);
        self
    }

    pub fn with_dynamic_adjustment(mut self, adjustment: DynamicAdjustment) -> Self {
        self.dynamic_adjustment = Some(adjustment);
        self
    }
}

/// Registered profile with every category populated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedProfile {
    pub name: String,
    pub description: Option<String>,
    pub config: TimeoutConfig,
    pub dynamic_adjustment: Option<DynamicAdjustment>,
}

impl From<TimeoutProfile> for ResolvedProfile {
    fn from(profile: TimeoutProfile) -> Self {
        Self {
            config: TimeoutConfig::merged(&profile.config),
            name: profile.name,
            description: profile.description,
            dynamic_adjustment: profile.dynamic_adjustment,
        }
    }
}

impl ResolvedProfile {
    fn builtin() -> Self {
        Self {
            name: DEFAULT_PROFILE.to_string(),
            description: Some("Built-in timeouts".to_string()),
            config: TimeoutConfig::default(),
            dynamic_adjustment: None,
        }
    }
}

/// Lookup key for [`TimeoutResolver::resolve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutQuery<'a> {
    pub operation: &'a str,
    pub element_type: Option<&'a str>,
    pub element_id: Option<&'a str>,
    pub condition: Option<&'a str>,
}

impl<'a> TimeoutQuery<'a> {
    pub fn new(operation: &'a str) -> Self {
        Self {
            operation,
            element_type: None,
            element_id: None,
            condition: None,
        }
    }

    pub fn element_type(mut self, element_type: Option<&'a str>) -> Self {
        self.element_type = element_type;
        self
    }

    pub fn element_id(mut self, element_id: Option<&'a str>) -> Self {
        self.element_id = element_id;
        self
    }

    pub fn condition(mut self, condition: Option<&'a str>) -> Self {
        self.condition = condition;
        self
    }
}

/// Wait outcomes per operation, fed back into dynamic adjustment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeSamples {
    pub total: u64,
    pub timeouts: u64,
}

impl OutcomeSamples {
    pub fn timeout_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.timeouts as f64 / self.total as f64
        }
    }
}

/// Resolves effective wait budgets against the active profile.
///
/// Resolution order, most specific first: element id, element type, condition
/// kind, operation kind, the profile's global value.
///
/// Dynamic adjustment reads the resolver's own outcome samples, never the
/// observational wait metrics.
pub struct TimeoutResolver {
    profiles: DashMap<String, ResolvedProfile>,
    active: RwLock<String>,
    outcomes: DashMap<String, OutcomeSamples>,
}

impl Default for TimeoutResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeoutResolver {
    pub fn new() -> Self {
        let profiles = DashMap::new();
        profiles.insert(DEFAULT_PROFILE.to_string(), ResolvedProfile::builtin());
        Self {
            profiles,
            active: RwLock::new(DEFAULT_PROFILE.to_string()),
            outcomes: DashMap::new(),
        }
    }

    pub fn resolve_timeout(
        &self,
        operation: &str,
        element_type: Option<&str>,
        element_id: Option<&str>,
    ) -> u64 {
        self.resolve(
            &TimeoutQuery::new(operation)
                .element_type(element_type)
                .element_id(element_id),
        )
    }

    pub fn resolve(&self, query: &TimeoutQuery<'_>) -> u64 {
        let timeout = self.with_active(|profile| profile.config.lookup(query));
        debug!(
            operation = query.operation,
            element_type = ?query.element_type,
            element_id = ?query.element_id,
            condition = ?query.condition,
            timeout_ms = timeout,
            "Resolved timeout"
        );
        timeout
    }

    pub fn resolve_condition_timeout(&self, kind: &str) -> u64 {
        self.with_active(|profile| {
            profile
                .config
                .condition
                .get(kind)
                .copied()
                .unwrap_or(profile.config.global)
        })
    }

    /// [`resolve`](Self::resolve) scaled by the active profile's dynamic adjustment
    pub fn resolve_adjusted(&self, query: &TimeoutQuery<'_>) -> u64 {
        let base = self.resolve(query);
        let adjustment = self.with_active(|profile| profile.dynamic_adjustment.clone());
        let Some(adjustment) = adjustment.filter(|adjustment| adjustment.enabled) else {
            return base;
        };
        match self.outcomes(query.operation) {
            Some(samples) if samples.total >= adjustment.min_samples => {
                let timeout_rate = samples.timeout_rate();
                let adjusted = adjustment.apply(base, timeout_rate);
                debug!(
                    operation = query.operation,
                    base_ms = base,
                    adjusted_ms = adjusted,
                    timeout_rate,
                    "Applied dynamic timeout adjustment"
                );
                adjusted
            }
            _ => base,
        }
    }

    /// Feed one finished wait into the adjustment samples
    pub fn record_outcome(&self, operation: &str, timed_out: bool) {
        let mut samples = self.outcomes.entry(operation.to_string()).or_default();
        samples.total += 1;
        if timed_out {
            samples.timeouts += 1;
        }
    }

    pub fn outcomes(&self, operation: &str) -> Option<OutcomeSamples> {
        self.outcomes.get(operation).map(|samples| *samples)
    }

    /// Forget adjustment samples for one operation, or all of them
    pub fn clear_outcomes(&self, operation: Option<&str>) {
        match operation {
            Some(operation) => {
                self.outcomes.remove(operation);
            }
            None => self.outcomes.clear(),
        }
    }

    /// Register or replace a profile; missing categories are filled from the built-in defaults
    pub fn register_profile(&self, profile: TimeoutProfile) -> ResolvedProfile {
        let resolved = ResolvedProfile::from(profile);
        info!(profile = %resolved.name, global_ms = resolved.config.global, "Registered timeout profile");
        self.profiles
            .insert(resolved.name.clone(), resolved.clone());
        resolved
    }

    /// Activate a registered profile; unknown names leave the active profile unchanged
    pub fn set_active_profile(&self, name: &str) -> bool {
        if !self.profiles.contains_key(name) {
            warn!(
                profile = name,
                active = %self.active.read(),
                "Unknown timeout profile, keeping current profile"
            );
            return false;
        }
        *self.active.write() = name.to_string();
        info!(profile = name, "Activated timeout profile");
        true
    }

    pub fn active_profile_name(&self) -> String {
        self.active.read().clone()
    }

    pub fn active_profile(&self) -> ResolvedProfile {
        self.with_active(Clone::clone)
    }

    pub fn profile(&self, name: &str) -> Option<ResolvedProfile> {
        self.profiles.get(name).map(|profile| profile.value().clone())
    }

    pub fn profile_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .profiles
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Remove a profile; the seeded default profile is never removed
    pub fn remove_profile(&self, name: &str) -> bool {
        if name == DEFAULT_PROFILE {
            warn!("The default timeout profile cannot be removed");
            return false;
        }
        if self.profiles.remove(name).is_none() {
            return false;
        }
        let mut active = self.active.write();
        if *active == name {
            *active = DEFAULT_PROFILE.to_string();
            info!(profile = name, "Removed active timeout profile, reverted to default");
        }
        true
    }

    fn with_active<R>(&self, f: impl FnOnce(&ResolvedProfile) -> R) -> R {
        let name = self.active.read().clone();
        if let Some(profile) = self.profiles.get(&name) {
            return f(profile.value());
        }
        if let Some(profile) = self.profiles.get(DEFAULT_PROFILE) {
            return f(profile.value());
        }
        f(&ResolvedProfile::builtin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_resolution_order() {
        let resolver = TimeoutResolver::new();
        assert_eq!(resolver.resolve_timeout("click", None, None), 5000);
        assert_eq!(resolver.resolve_timeout("click", Some("webview"), None), 20000);
        assert_eq!(resolver.resolve_timeout("scroll", None, None), DEFAULT_TIMEOUT_MS);
        assert_eq!(resolver.resolve_condition_timeout("compound"), 15000);
        assert_eq!(resolver.resolve_condition_timeout("unknown"), DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn custom_profile_scenario() {
        let resolver = TimeoutResolver::new();
        resolver.register_profile(
            TimeoutProfile::new("custom")
                .with_global(15000)
                .with_operation("click", 8000),
        );
        assert!(resolver.set_active_profile("custom"));
        assert_eq!(resolver.resolve_timeout("click", None, None), 8000);
        assert_eq!(resolver.resolve_timeout("scroll", None, None), 15000);
        // untouched categories are still populated from the built-ins
        assert_eq!(resolver.resolve_timeout("sendKeys", None, None), 7000);
        assert_eq!(resolver.resolve_timeout("scroll", Some("list"), None), 15000);
    }

    #[test]
    fn most_specific_value_wins_for_every_triple() {
        let resolver = TimeoutResolver::new();
        resolver.register_profile(
            TimeoutProfile::new("layered")
                .with_global(1000)
                .with_operation("tap", 2000)
                .with_element_type("cell", 3000)
                .with_element("login-button", 4000),
        );
        resolver.set_active_profile("layered");

        let operations = [("tap", 2000), ("drag", 1000)];
        let types = [(None, None), (Some("cell"), Some(3000)), (Some("bogus"), None)];
        let ids = [(None, None), (Some("login-button"), Some(4000)), (Some("x"), None)];

        for (operation, op_ms) in operations {
            for (element_type, type_ms) in types {
                for (element_id, id_ms) in ids {
                    let expected = id_ms.or(type_ms).unwrap_or(op_ms);
                    assert_eq!(
                        resolver.resolve_timeout(operation, element_type, element_id),
                        expected,
                        "{operation} {element_type:?} {element_id:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn condition_kind_sits_between_element_type_and_operation() {
        let resolver = TimeoutResolver::new();
        let query = TimeoutQuery::new("click").condition(Some("compound"));
        assert_eq!(resolver.resolve(&query), 15000);
        assert_eq!(resolver.resolve(&query.element_type(Some("button"))), 5000);
    }

    #[test]
    fn unknown_profile_keeps_active() {
        let resolver = TimeoutResolver::new();
        resolver.register_profile(TimeoutProfile::new("fast").with_global(2000));
        assert!(resolver.set_active_profile("fast"));
        assert!(!resolver.set_active_profile("missing"));
        assert_eq!(resolver.active_profile_name(), "fast");
    }

    #[test]
    fn default_profile_cannot_be_removed() {
        let resolver = TimeoutResolver::new();
        resolver.register_profile(TimeoutProfile::new("slow").with_global(30000));
        resolver.set_active_profile("slow");
        assert!(!resolver.remove_profile(DEFAULT_PROFILE));
        assert!(resolver.remove_profile("slow"));
        assert_eq!(resolver.active_profile_name(), DEFAULT_PROFILE);
        assert_eq!(resolver.profile_names(), vec![DEFAULT_PROFILE.to_string()]);
    }

    #[test]
    fn dynamic_adjustment_scales_by_timeout_rate() {
        let resolver = TimeoutResolver::new();
        resolver.register_profile(
            TimeoutProfile::new("adaptive")
                .with_operation("tap", 4000)
                .with_dynamic_adjustment(DynamicAdjustment {
                    enabled: true,
                    factor: 1.0,
                    min_timeout_ms: 1000,
                    max_timeout_ms: 6000,
                    min_samples: 4,
                }),
        );
        resolver.set_active_profile("adaptive");
        let query = TimeoutQuery::new("tap");

        resolver.record_outcome("tap", true);
        assert_eq!(resolver.resolve_adjusted(&query), 4000);

        resolver.record_outcome("tap", false);
        resolver.record_outcome("tap", false);
        resolver.record_outcome("tap", false);
        // timeout rate 0.25
        assert_eq!(resolver.resolve_adjusted(&query), 5000);

        for _ in 0..4 {
            resolver.record_outcome("tap", true);
        }
        assert_eq!(resolver.resolve_adjusted(&query), 6000);

        resolver.clear_outcomes(Some("tap"));
        assert_eq!(resolver.outcomes("tap"), None);
        assert_eq!(resolver.resolve_adjusted(&query), 4000);
    }

    #[test]
    fn overrides_deserialize_from_camel_case() {
        let profile: TimeoutProfile = serde_json::from_value(serde_json::json!({
            "name": "ci",
            "config": { "global": 20000, "elementType": { "button": 9000 } }
        }))
        .unwrap();
        let resolved = ResolvedProfile::from(profile);
        assert_eq!(resolved.config.element_type["button"], 9000);
        assert_eq!(resolved.config.element_type["input"], 7000);
        assert_eq!(resolved.config.operation["click"], 5000);
    }
}
