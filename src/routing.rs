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

//! Router. Extracts the model name from the request body and applies model-to-model
//! or model-to-config mapping rules in list order, first match wins. A non-JSON body
//! or an absent model field makes routing a no-op.
use std::collections::HashMap;
use std::path::PathBuf;

use log::warn;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::{clp_home, FileSignature};

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingMode {
    Default,
    ModelMapping,
    ConfigMapping,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum SourceType {
    Model,
    Config,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
struct ModelMappingRule {
    source: String,
    source_type: SourceType,
    target: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
struct ConfigMappingRule {
    model: String,
    config_name: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
struct RoutingConfigFile {
    #[serde(default = "default_mode")]
    mode: RoutingMode,
    #[serde(default)]
    model_mappings: HashMap<String, Vec<ModelMappingRule>>,
    #[serde(default)]
    config_mappings: HashMap<String, Vec<ConfigMappingRule>>,
}

fn default_mode() -> RoutingMode {
    RoutingMode::Default
}

impl Default for RoutingMode {
    fn default() -> Self {
        RoutingMode::Default
    }
}

struct Loaded {
    signature: Option<FileSignature>,
    file: RoutingConfigFile,
}

/// Per-service model-name extractor: both Claude and Codex use `$.model`, but the
/// engine is generic over which extractor a service specialization supplies.
pub trait ModelExtractor: Send + Sync {
    fn extract_model(&self, body: &Value) -> Option<String>;
    fn set_model(&self, body: &mut Value, model: &str);
}

pub struct JsonPointerModelExtractor {
    pointer: &'static str,
}

impl JsonPointerModelExtractor {
    pub const fn new(pointer: &'static str) -> Self {
        Self { pointer }
    }
}

impl ModelExtractor for JsonPointerModelExtractor {
    fn extract_model(&self, body: &Value) -> Option<String> {
        body.pointer(self.pointer)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn set_model(&self, body: &mut Value, model: &str) {
        if let Some(obj) = body.as_object_mut() {
            let key = self.pointer.trim_start_matches('/');
            obj.insert(key.to_string(), Value::String(model.to_string()));
        }
    }
}

pub struct Router {
    path: PathBuf,
    state: RwLock<Option<Loaded>>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            path: clp_home().join("data").join("model_router_config.json"),
            state: RwLock::new(None),
        }
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self {
            path,
            state: RwLock::new(None),
        }
    }

    async fn reload_if_needed(&self) {
        let current_sig = FileSignature::stat(&self.path).ok().flatten();
        {
            let guard = self.state.read().await;
            if let Some(loaded) = guard.as_ref() {
                if loaded.signature == current_sig {
                    return;
                }
            }
        }

        let file = match &current_sig {
            None => RoutingConfigFile::default(),
            Some(_) => match std::fs::read_to_string(&self.path) {
                Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                    warn!("model_router_config.json malformed, using default routing: {e}");
                    RoutingConfigFile::default()
                }),
                Err(e) => {
                    warn!("failed to read model_router_config.json: {e}");
                    RoutingConfigFile::default()
                }
            },
        };

        *self.state.write().await = Some(Loaded {
            signature: current_sig,
            file,
        });
    }

    /// Phase 2 of the engine: rewrites model-to-model rules and resolves a forced
    /// config name in `config-mapping` mode. Returns the (possibly rewritten) model
    /// name and the forced config name, if any.
    pub async fn apply_before_selection(
        &self,
        service: &str,
        body: &mut Value,
        extractor: &dyn ModelExtractor,
    ) -> (Option<String>, Option<String>) {
        self.reload_if_needed().await;
        let guard = self.state.read().await;
        let Some(loaded) = guard.as_ref() else {
            return (extractor.extract_model(body), None);
        };

        let mut model = extractor.extract_model(body);

        match loaded.file.mode {
            RoutingMode::Default => {}
            RoutingMode::ModelMapping => {
                if let (Some(rules), Some(current)) =
                    (loaded.file.model_mappings.get(service), model.clone())
                {
                    for rule in rules {
                        if rule.source_type == SourceType::Model && rule.source == current {
                            extractor.set_model(body, &rule.target);
                            model = Some(rule.target.clone());
                            break;
                        }
                    }
                }
            }
            RoutingMode::ConfigMapping => {
                if let (Some(rules), Some(current)) =
                    (loaded.file.config_mappings.get(service), model.clone())
                {
                    for rule in rules {
                        if rule.model == current {
                            return (model, Some(rule.config_name.clone()));
                        }
                    }
                }
            }
        }

        (model, None)
    }

    /// Per-candidate model-mapping rules keyed on the config name about to be used:
    /// with source_type=config, if the to-be-used config name equals source, the
    /// model is rewritten to target. Called once per attempted candidate.
    pub async fn apply_for_candidate(&self, service: &str, body: &mut Value, config_name: &str, extractor: &dyn ModelExtractor) {
        self.reload_if_needed().await;
        let guard = self.state.read().await;
        let Some(loaded) = guard.as_ref() else {
            return;
        };
        if loaded.file.mode != RoutingMode::ModelMapping {
            return;
        }
        let Some(rules) = loaded.file.model_mappings.get(service) else {
            return;
        };
        for rule in rules {
            if rule.source_type == SourceType::Config && rule.source == config_name {
                extractor.set_model(body, &rule.target);
                break;
            }
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

pub const CLAUDE_MODEL_EXTRACTOR: JsonPointerModelExtractor = JsonPointerModelExtractor::new("/model");
pub const CODEX_MODEL_EXTRACTOR: JsonPointerModelExtractor = JsonPointerModelExtractor::new("/model");

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn default_mode_is_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let router = Router::with_path(tmp.path().join("model_router_config.json"));
        let mut body = json!({"model": "claude-3"});
        let (model, forced) = router
            .apply_before_selection("claude", &mut body, &CLAUDE_MODEL_EXTRACTOR)
            .await;
        assert_eq!(model.as_deref(), Some("claude-3"));
        assert!(forced.is_none());
        assert_eq!(body["model"], "claude-3");
    }

    #[tokio::test]
    async fn model_mapping_rewrites_matching_model() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("model_router_config.json"),
            r#"{
                "mode": "model-mapping",
                "modelMappings": {
                    "claude": [{"source": "claude-3", "sourceType": "model", "target": "claude-3.5"}]
                }
            }"#,
        )
        .unwrap();
        let router = Router::with_path(tmp.path().join("model_router_config.json"));
        let mut body = json!({"model": "claude-3"});
        let (model, _) = router
            .apply_before_selection("claude", &mut body, &CLAUDE_MODEL_EXTRACTOR)
            .await;
        assert_eq!(model.as_deref(), Some("claude-3.5"));
        assert_eq!(body["model"], "claude-3.5");
    }

    #[tokio::test]
    async fn config_mapping_forces_config_selection() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("model_router_config.json"),
            r#"{
                "mode": "config-mapping",
                "configMappings": {
                    "claude": [{"model": "claude-3", "configName": "fast-pool"}]
                }
            }"#,
        )
        .unwrap();
        let router = Router::with_path(tmp.path().join("model_router_config.json"));
        let mut body = json!({"model": "claude-3"});
        let (_, forced) = router
            .apply_before_selection("claude", &mut body, &CLAUDE_MODEL_EXTRACTOR)
            .await;
        assert_eq!(forced.as_deref(), Some("fast-pool"));
    }

    #[tokio::test]
    async fn non_json_model_absent_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let router = Router::with_path(tmp.path().join("model_router_config.json"));
        let mut body = json!({});
        let (model, forced) = router
            .apply_before_selection("claude", &mut body, &CLAUDE_MODEL_EXTRACTOR)
            .await;
        assert!(model.is_none());
        assert!(forced.is_none());
    }

    #[tokio::test]
    async fn config_sourced_model_mapping_applies_per_candidate() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("model_router_config.json"),
            r#"{
                "mode": "model-mapping",
                "modelMappings": {
                    "claude": [{"source": "backup", "sourceType": "config", "target": "claude-3-haiku"}]
                }
            }"#,
        )
        .unwrap();
        let router = Router::with_path(tmp.path().join("model_router_config.json"));
        let mut body = json!({"model": "claude-3-opus"});
        router
            .apply_for_candidate("claude", &mut body, "backup", &CLAUDE_MODEL_EXTRACTOR)
            .await;
        assert_eq!(body["model"], "claude-3-haiku");
    }
}
