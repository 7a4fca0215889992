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

//! Config Store.
//!
//! Owns `service -> {config_name -> UpstreamConfig}`. Readers call [`ConfigStore::get`],
//! which stats the backing file on every call and reloads only when the file signature
//! changed, checked per-access instead of on a timer.
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{atomic_write, clp_home, FileSignature};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Exactly one of `auth_token`/`api_key` is populated on the wire; see
/// `Credential::from_parts` for the load-time ambiguity rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    BearerToken(String),
    ApiKey(String),
}

impl Credential {
    /// When both fields are set in a config file, `api_key` wins.
    fn from_parts(auth_token: Option<String>, api_key: Option<String>, name: &str) -> Option<Self> {
        match (auth_token, api_key) {
            (Some(_), Some(key)) => {
                warn!(
                    "config '{}' has both auth_token and api_key set; using api_key",
                    name
                );
                Some(Credential::ApiKey(key))
            }
            (None, Some(key)) => Some(Credential::ApiKey(key)),
            (Some(token), None) => Some(Credential::BearerToken(token)),
            (None, None) => None,
        }
    }

    pub fn apply_to(&self, headers: &mut http::HeaderMap) {
        match self {
            Credential::BearerToken(token) => {
                if let Ok(value) = http::HeaderValue::from_str(&format!("Bearer {token}")) {
                    headers.insert(http::header::AUTHORIZATION, value);
                }
            }
            Credential::ApiKey(key) => {
                if let Ok(value) = http::HeaderValue::from_str(key) {
                    headers.insert("x-api-key", value);
                }
            }
        }
    }

    pub fn redacted(&self) -> &'static str {
        "[REDACTED]"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UpstreamConfigWire {
    name: String,
    base_url: String,
    #[serde(default)]
    auth_token: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    weight: u32,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub name: String,
    pub base_url: String,
    pub credential: Option<Credential>,
    pub weight: u32,
    pub active: bool,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl UpstreamConfig {
    fn from_wire(wire: UpstreamConfigWire) -> Self {
        let credential = Credential::from_parts(wire.auth_token, wire.api_key, &wire.name);
        Self {
            name: wire.name,
            base_url: wire.base_url,
            credential,
            weight: wire.weight,
            // deleted implies not active, enforced on load.
            active: wire.active && !wire.deleted,
            deleted: wire.deleted,
            deleted_at: wire.deleted_at,
        }
    }
}

type ServiceConfigs = HashMap<String, UpstreamConfig>;

struct Loaded {
    signature: Option<FileSignature>,
    configs: Arc<ServiceConfigs>,
}

/// Mapping `service -> {config_name -> UpstreamConfig}`, one backing JSON file per service
/// under `~/.clp/{service}.json`.
pub struct ConfigStore {
    dir: PathBuf,
    per_service: RwLock<HashMap<String, Loaded>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            dir: clp_home(),
            per_service: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_dir(dir: PathBuf) -> Self {
        Self {
            dir,
            per_service: RwLock::new(HashMap::new()),
        }
    }

    fn path_for(&self, service: &str) -> PathBuf {
        self.dir.join(format!("{service}.json"))
    }

    /// Returns an immutable snapshot of the current config for `service`, reloading
    /// from disk first if the file signature changed. A missing file is an empty map,
    /// never an error.
    pub async fn get(&self, service: &str) -> Result<Arc<ServiceConfigs>, ConfigError> {
        let path = self.path_for(service);
        let current_sig = FileSignature::stat(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        {
            let guard = self.per_service.read().await;
            if let Some(loaded) = guard.get(service) {
                if loaded.signature == current_sig {
                    return Ok(loaded.configs.clone());
                }
            }
        }

        let configs = match &current_sig {
            None => Arc::new(HashMap::new()),
            Some(_) => {
                let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                let wire: Vec<UpstreamConfigWire> =
                    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                        path: path.clone(),
                        source,
                    })?;
                let map = wire
                    .into_iter()
                    .map(|w| {
                        let cfg = UpstreamConfig::from_wire(w);
                        (cfg.name.clone(), cfg)
                    })
                    .collect();
                debug!("reloaded config for service '{}' from {:?}", service, path);
                Arc::new(map)
            }
        };

        let mut guard = self.per_service.write().await;
        guard.insert(
            service.to_string(),
            Loaded {
                signature: current_sig,
                configs: configs.clone(),
            },
        );
        Ok(configs)
    }

    /// Writes the full config set for `service` atomically and invalidates the cache
    /// so the next [`ConfigStore::get`] reloads it. `mutation` receives the current
    /// snapshot (or an empty map) and returns the new one.
    pub async fn update(
        &self,
        service: &str,
        mutation: impl FnOnce(ServiceConfigs) -> ServiceConfigs,
    ) -> Result<(), ConfigError> {
        let current = self.get(service).await.unwrap_or_else(|_| Arc::new(HashMap::new()));
        let new_map = mutation((*current).clone());

        let wire: Vec<UpstreamConfigWire> = new_map
            .values()
            .map(|c| UpstreamConfigWire {
                name: c.name.clone(),
                base_url: c.base_url.clone(),
                auth_token: match &c.credential {
                    Some(Credential::BearerToken(t)) => Some(t.clone()),
                    _ => None,
                },
                api_key: match &c.credential {
                    Some(Credential::ApiKey(k)) => Some(k.clone()),
                    _ => None,
                },
                weight: c.weight,
                active: c.active,
                deleted: c.deleted,
                deleted_at: c.deleted_at,
            })
            .collect();

        let path = self.path_for(service);
        let bytes = serde_json::to_vec_pretty(&wire).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        atomic_write(&path, &bytes).map_err(|source| ConfigError::Write {
            path: path.clone(),
            source,
        })?;

        self.per_service.write().await.remove(service);
        Ok(())
    }

    /// The single active, non-deleted config for `service`, if any (active-first mode).
    pub async fn active(&self, service: &str) -> Result<Option<UpstreamConfig>, ConfigError> {
        let map = self.get(service).await?;
        Ok(map
            .values()
            .find(|c| c.active && !c.deleted)
            .cloned())
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_configs(dir: &std::path::Path, service: &str, json: &str) {
        std::fs::write(dir.join(format!("{service}.json")), json).unwrap();
    }

    #[tokio::test]
    async fn missing_file_is_empty_map() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::with_dir(tmp.path().to_path_buf());
        let map = store.get("claude").await.unwrap();
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn loads_and_caches_until_signature_changes() {
        let tmp = tempfile::tempdir().unwrap();
        write_configs(
            tmp.path(),
            "claude",
            r#"[{"name":"prod","base_url":"https://api.x/","api_key":"k","weight":100,"active":true}]"#,
        );
        let store = ConfigStore::with_dir(tmp.path().to_path_buf());
        let map = store.get("claude").await.unwrap();
        assert_eq!(map.len(), 1);
        assert!(map["prod"].active);

        // Mutate underlying file directly; without touching mtime/size equally the
        // cached copy would normally still be served, but here we bump content+size.
        write_configs(
            tmp.path(),
            "claude",
            r#"[{"name":"prod","base_url":"https://api.x/","api_key":"k","weight":100,"active":true},
                {"name":"backup","base_url":"https://api.y/","api_key":"k2","weight":50,"active":false}]"#,
        );
        let map2 = store.get("claude").await.unwrap();
        assert_eq!(map2.len(), 2);
    }

    #[tokio::test]
    async fn deleted_implies_not_active() {
        let tmp = tempfile::tempdir().unwrap();
        write_configs(
            tmp.path(),
            "codex",
            r#"[{"name":"old","base_url":"https://api.z/","api_key":"k","weight":1,"active":true,"deleted":true}]"#,
        );
        let store = ConfigStore::with_dir(tmp.path().to_path_buf());
        let map = store.get("codex").await.unwrap();
        assert!(!map["old"].active);
        assert!(map["old"].deleted);
    }

    #[test]
    fn both_credentials_set_prefers_api_key() {
        let cred = Credential::from_parts(
            Some("tok".to_string()),
            Some("key".to_string()),
            "dual",
        );
        assert_eq!(cred, Some(Credential::ApiKey("key".to_string())));
    }

    #[tokio::test]
    async fn update_round_trips_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::with_dir(tmp.path().to_path_buf());
        store
            .update("claude", |mut map| {
                map.insert(
                    "prod".to_string(),
                    UpstreamConfig {
                        name: "prod".to_string(),
                        base_url: "https://api.x/".to_string(),
                        credential: Some(Credential::ApiKey("k".to_string())),
                        weight: 100,
                        active: true,
                        deleted: false,
                        deleted_at: None,
                    },
                );
                map
            })
            .await
            .unwrap();

        let map = store.get("claude").await.unwrap();
        assert_eq!(map.len(), 1);
        assert!(map["prod"].active);
    }
}
