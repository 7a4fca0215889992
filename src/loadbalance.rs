// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Load Balancer. Per-service failure counters, an exclusion list, and a cooldown
//! timestamp decide which configs `Router`-selected candidates are tried in, and in
//! what order. State is persisted to disk after every mutation so a restarted engine
//! picks up where the exclusion list left off.
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::store::UpstreamConfig;
use crate::config::{atomic_write, clp_home, FileSignature};

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalanceMode {
    ActiveFirst,
    WeightBased,
}

impl Default for LoadBalanceMode {
    fn default() -> Self {
        LoadBalanceMode::ActiveFirst
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
#[serde(rename_all = "camelCase")]
struct Options {
    #[serde(default)]
    auto_reset_on_all_failed: bool,
    #[serde(default)]
    notify_enabled: bool,
    #[serde(default = "default_cooldown")]
    reset_cooldown_seconds: i64,
    #[serde(default = "default_threshold")]
    failure_threshold: u32,
}

fn default_cooldown() -> i64 {
    30
}

fn default_threshold() -> u32 {
    3
}

impl Default for Options {
    fn default() -> Self {
        Self {
            auto_reset_on_all_failed: false,
            notify_enabled: false,
            reset_cooldown_seconds: default_cooldown(),
            failure_threshold: default_threshold(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
struct PerServiceWire {
    #[serde(default)]
    failure_threshold: Option<u32>,
    #[serde(default)]
    current_failures: HashMap<String, u32>,
    #[serde(default)]
    excluded_configs: HashSet<String>,
    #[serde(default)]
    last_reset_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
struct LoadBalanceConfigFile {
    #[serde(default)]
    mode: LoadBalanceMode,
    #[serde(default)]
    options: Options,
    #[serde(default)]
    per_service: HashMap<String, PerServiceWire>,
}

#[derive(Default)]
struct ServiceState {
    failure_threshold: Option<u32>,
    current_failures: HashMap<String, u32>,
    excluded_configs: HashSet<String>,
    last_reset_at: Option<DateTime<Utc>>,
}

struct Loaded {
    signature: Option<FileSignature>,
    mode: LoadBalanceMode,
    options: Options,
    per_service: HashMap<String, ServiceState>,
}

impl Loaded {
    fn from_file(signature: Option<FileSignature>, file: LoadBalanceConfigFile) -> Self {
        let per_service = file
            .per_service
            .into_iter()
            .map(|(k, v)| {
                (
                    k,
                    ServiceState {
                        failure_threshold: v.failure_threshold,
                        current_failures: v.current_failures,
                        excluded_configs: v.excluded_configs,
                        last_reset_at: v.last_reset_at,
                    },
                )
            })
            .collect();
        Self {
            signature,
            mode: file.mode,
            options: file.options,
            per_service,
        }
    }

    fn to_file(&self) -> LoadBalanceConfigFile {
        LoadBalanceConfigFile {
            mode: self.mode,
            options: self.options,
            per_service: self
                .per_service
                .iter()
                .map(|(k, v)| {
                    (
                        k.clone(),
                        PerServiceWire {
                            failure_threshold: v.failure_threshold,
                            current_failures: v.current_failures.clone(),
                            excluded_configs: v.excluded_configs.clone(),
                            last_reset_at: v.last_reset_at,
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Whether a failure caused this config to be newly excluded, for the engine to
/// decide whether to publish `lb_switch`.
pub struct FailureOutcome {
    pub excluded: bool,
    pub failures: u32,
    pub threshold: u32,
}

pub struct LoadBalancer {
    path: PathBuf,
    state: Mutex<Option<Loaded>>,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self {
            path: clp_home().join("data").join("load_balance_config.json"),
            state: Mutex::new(None),
        }
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self {
            path,
            state: Mutex::new(None),
        }
    }

    /// Reloads from disk if the file signature changed. Caller must already hold the
    /// state mutex.
    fn reload_if_needed_locked(guard: &mut Option<Loaded>, path: &PathBuf) {
        let current_sig = FileSignature::stat(path).ok().flatten();
        if let Some(loaded) = guard.as_ref() {
            if loaded.signature == current_sig {
                return;
            }
        }

        let file = match &current_sig {
            None => LoadBalanceConfigFile::default(),
            Some(_) => match std::fs::read_to_string(path) {
                Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                    warn!("load_balance_config.json malformed, using default: {e}");
                    LoadBalanceConfigFile::default()
                }),
                Err(e) => {
                    warn!("failed to read load_balance_config.json: {e}");
                    LoadBalanceConfigFile::default()
                }
            },
        };

        *guard = Some(Loaded::from_file(current_sig, file));
    }

    fn persist_locked(loaded: &mut Loaded, path: &PathBuf) {
        let file = loaded.to_file();
        match serde_json::to_vec_pretty(&file) {
            Ok(bytes) => {
                if let Err(e) = atomic_write(path, &bytes) {
                    warn!("failed to persist load_balance_config.json: {e}");
                    return;
                }
                loaded.signature = FileSignature::stat(path).ok().flatten();
            }
            Err(e) => warn!("failed to serialize load_balance_config.json: {e}"),
        }
    }

    fn effective_threshold(loaded: &Loaded, service: &str) -> u32 {
        loaded
            .per_service
            .get(service)
            .and_then(|s| s.failure_threshold)
            .unwrap_or(loaded.options.failure_threshold)
            .max(1)
    }

    /// The configured dispatch mode, reloading from disk first if it changed.
    pub async fn mode(&self) -> LoadBalanceMode {
        let mut guard = self.state.lock().await;
        Self::reload_if_needed_locked(&mut guard, &self.path);
        guard.as_ref().expect("just reloaded").mode
    }

    /// Whether the configured options ask the engine to publish lifecycle events for
    /// load-balancer state changes (`lb_switch`/`lb_reset`/`lb_exhausted`).
    pub async fn notify_enabled(&self) -> bool {
        let mut guard = self.state.lock().await;
        Self::reload_if_needed_locked(&mut guard, &self.path);
        guard.as_ref().expect("just reloaded").options.notify_enabled
    }

    /// The effective failure threshold for `service`, for event payloads.
    pub async fn threshold(&self, service: &str) -> u32 {
        let mut guard = self.state.lock().await;
        Self::reload_if_needed_locked(&mut guard, &self.path);
        let loaded = guard.as_ref().expect("just reloaded");
        Self::effective_threshold(loaded, service)
    }

    /// Seconds remaining before `service` becomes eligible for an automatic reset, 0
    /// if it's eligible now (or auto-reset is disabled).
    pub async fn cooldown_remaining_seconds(&self, service: &str) -> i64 {
        let mut guard = self.state.lock().await;
        Self::reload_if_needed_locked(&mut guard, &self.path);
        let loaded = guard.as_ref().expect("just reloaded");
        if !loaded.options.auto_reset_on_all_failed {
            return 0;
        }
        let Some(entry) = loaded.per_service.get(service) else {
            return 0;
        };
        let Some(last) = entry.last_reset_at else {
            return 0;
        };
        let elapsed = (Utc::now() - last).num_seconds();
        (loaded.options.reset_cooldown_seconds - elapsed).max(0)
    }

    /// Ordered candidate config names for `service`. `active-first` returns at most
    /// one entry; `weight-based` returns every eligible config, heaviest first.
    pub async fn pick(&self, service: &str, configs: &HashMap<String, UpstreamConfig>) -> Vec<String> {
        let mut guard = self.state.lock().await;
        Self::reload_if_needed_locked(&mut guard, &self.path);
        let loaded = guard.as_ref().expect("just reloaded");

        match loaded.mode {
            LoadBalanceMode::ActiveFirst => configs
                .values()
                .find(|c| c.active && !c.deleted)
                .map(|c| vec![c.name.clone()])
                .unwrap_or_default(),
            LoadBalanceMode::WeightBased => {
                let excluded = loaded
                    .per_service
                    .get(service)
                    .map(|s| &s.excluded_configs);
                let mut candidates: Vec<&UpstreamConfig> = configs
                    .values()
                    .filter(|c| !c.deleted)
                    .filter(|c| excluded.map(|e| !e.contains(&c.name)).unwrap_or(true))
                    .collect();
                candidates.sort_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.name.cmp(&b.name)));
                candidates.into_iter().map(|c| c.name.clone()).collect()
            }
        }
    }

    pub async fn on_success(&self, service: &str, name: &str) {
        let mut guard = self.state.lock().await;
        Self::reload_if_needed_locked(&mut guard, &self.path);
        let loaded = guard.as_mut().expect("just reloaded");
        let entry = loaded.per_service.entry(service.to_string()).or_default();
        entry.current_failures.insert(name.to_string(), 0);
        entry.excluded_configs.remove(name);
        Self::persist_locked(loaded, &self.path);
    }

    pub async fn on_failure(&self, service: &str, name: &str) -> FailureOutcome {
        let mut guard = self.state.lock().await;
        Self::reload_if_needed_locked(&mut guard, &self.path);
        let loaded = guard.as_mut().expect("just reloaded");
        let threshold = Self::effective_threshold(loaded, service);
        let entry = loaded.per_service.entry(service.to_string()).or_default();
        let failures = entry.current_failures.entry(name.to_string()).or_insert(0);
        *failures += 1;
        let failures = *failures;
        let excluded = failures >= threshold;
        if excluded {
            entry.excluded_configs.insert(name.to_string());
        }
        Self::persist_locked(loaded, &self.path);
        FailureOutcome {
            excluded,
            failures,
            threshold,
        }
    }

    /// Called once the candidate list is exhausted. Returns `true` if failures and
    /// exclusions for `service` were cleared (cooldown elapsed and auto-reset is on).
    pub async fn maybe_reset(&self, service: &str) -> bool {
        let mut guard = self.state.lock().await;
        Self::reload_if_needed_locked(&mut guard, &self.path);
        let loaded = guard.as_mut().expect("just reloaded");
        if !loaded.options.auto_reset_on_all_failed {
            return false;
        }

        let cooldown = loaded.options.reset_cooldown_seconds;
        let now = Utc::now();
        let entry = loaded.per_service.entry(service.to_string()).or_default();
        if let Some(last) = entry.last_reset_at {
            if (now - last).num_seconds() < cooldown {
                return false;
            }
        }

        entry.current_failures.clear();
        entry.excluded_configs.clear();
        entry.last_reset_at = Some(now);
        Self::persist_locked(loaded, &self.path);
        true
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::store::Credential;

    fn cfg(name: &str, weight: u32, active: bool, deleted: bool) -> UpstreamConfig {
        UpstreamConfig {
            name: name.to_string(),
            base_url: "https://x/".to_string(),
            credential: Some(Credential::ApiKey("k".to_string())),
            weight,
            active,
            deleted,
            deleted_at: None,
        }
    }

    fn configs(entries: Vec<UpstreamConfig>) -> HashMap<String, UpstreamConfig> {
        entries.into_iter().map(|c| (c.name.clone(), c)).collect()
    }

    #[tokio::test]
    async fn active_first_returns_single_active_config() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("lb.json"),
            r#"{"mode": "active-first"}"#,
        )
        .unwrap();
        let lb = LoadBalancer::with_path(tmp.path().join("lb.json"));
        let map = configs(vec![
            cfg("a", 0, false, false),
            cfg("b", 0, true, false),
        ]);
        let picked = lb.pick("claude", &map).await;
        assert_eq!(picked, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn weight_based_orders_by_weight_then_name() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("lb.json"),
            r#"{"mode": "weight-based"}"#,
        )
        .unwrap();
        let lb = LoadBalancer::with_path(tmp.path().join("lb.json"));
        let map = configs(vec![
            cfg("c", 50, false, false),
            cfg("a", 100, false, false),
            cfg("b", 100, false, false),
        ]);
        let picked = lb.pick("claude", &map).await;
        assert_eq!(picked, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn failure_excludes_after_threshold() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("lb.json"),
            r#"{"mode": "weight-based", "options": {"failureThreshold": 2}}"#,
        )
        .unwrap();
        let lb = LoadBalancer::with_path(tmp.path().join("lb.json"));
        let first = lb.on_failure("claude", "a").await;
        assert!(!first.excluded);
        let second = lb.on_failure("claude", "a").await;
        assert!(second.excluded);

        let map = configs(vec![cfg("a", 100, false, false), cfg("b", 50, false, false)]);
        let picked = lb.pick("claude", &map).await;
        assert_eq!(picked, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn success_clears_failures_and_exclusion() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("lb.json"),
            r#"{"mode": "weight-based", "options": {"failureThreshold": 1}}"#,
        )
        .unwrap();
        let lb = LoadBalancer::with_path(tmp.path().join("lb.json"));
        lb.on_failure("claude", "a").await;
        lb.on_success("claude", "a").await;

        let map = configs(vec![cfg("a", 100, false, false)]);
        let picked = lb.pick("claude", &map).await;
        assert_eq!(picked, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn reset_respects_cooldown() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("lb.json"),
            r#"{"mode": "weight-based", "options": {"autoResetOnAllFailed": true, "resetCooldownSeconds": 9999}}"#,
        )
        .unwrap();
        let lb = LoadBalancer::with_path(tmp.path().join("lb.json"));
        lb.on_failure("claude", "a").await;
        assert!(lb.maybe_reset("claude").await);
        // Second reset attempt immediately after should be blocked by cooldown.
        assert!(!lb.maybe_reset("claude").await);
    }

    #[tokio::test]
    async fn notify_enabled_reflects_options() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("lb.json"),
            r#"{"mode": "weight-based", "options": {"notifyEnabled": true}}"#,
        )
        .unwrap();
        let lb = LoadBalancer::with_path(tmp.path().join("lb.json"));
        assert!(lb.notify_enabled().await);
    }

    #[tokio::test]
    async fn cooldown_remaining_counts_down_from_reset() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("lb.json"),
            r#"{"mode": "weight-based", "options": {"autoResetOnAllFailed": true, "resetCooldownSeconds": 9999}}"#,
        )
        .unwrap();
        let lb = LoadBalancer::with_path(tmp.path().join("lb.json"));
        lb.on_failure("claude", "a").await;
        assert!(lb.maybe_reset("claude").await);
        let remaining = lb.cooldown_remaining_seconds("claude").await;
        assert!(remaining > 0 && remaining <= 9999);
    }

    #[tokio::test]
    async fn reset_disabled_never_resets() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("lb.json"),
            r#"{"mode": "weight-based", "options": {"autoResetOnAllFailed": false}}"#,
        )
        .unwrap();
        let lb = LoadBalancer::with_path(tmp.path().join("lb.json"));
        assert!(!lb.maybe_reset("claude").await);
    }
}
