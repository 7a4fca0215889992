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

//! Endpoint Blocker: rejects requests matching a configured path/method/query rule
//! before they ever reach an upstream.
use std::collections::HashMap;
use std::path::PathBuf;

use log::warn;
use regex::Regex;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::config::{clp_home, FileSignature};

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "snake_case")]
enum MatchType {
    Path,
    Prefix,
    Regex,
}

#[derive(Debug, Deserialize, Clone)]
struct RuleAction {
    status: u16,
    message: String,
}

#[derive(Debug, Deserialize, Clone)]
struct RuleMatch {
    #[serde(rename = "type")]
    match_type: MatchType,
    value: String,
}

#[derive(Debug, Deserialize, Clone)]
struct RuleWire {
    id: Option<String>,
    services: Vec<String>,
    methods: Vec<String>,
    #[serde(rename = "match")]
    rule_match: RuleMatch,
    #[serde(default)]
    query: HashMap<String, String>,
    action: RuleAction,
}

#[derive(Debug, Deserialize, Clone)]
struct EndpointFilterFile {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    rules: Vec<RuleWire>,
}

struct CompiledRule {
    id: String,
    services: Vec<String>,
    methods: Vec<String>,
    match_type: MatchType,
    match_value: String,
    regex: Option<Regex>,
    query: HashMap<String, String>,
    status: u16,
    message: String,
}

pub struct BlockMatch {
    pub rule_id: String,
    pub status: http::StatusCode,
    pub message: String,
}

struct Loaded {
    signature: Option<FileSignature>,
    enabled: bool,
    rules: Vec<CompiledRule>,
}

pub struct EndpointBlocker {
    path: PathBuf,
    state: RwLock<Option<Loaded>>,
}

impl EndpointBlocker {
    pub fn new() -> Self {
        Self {
            path: clp_home().join("endpoint_filter.json"),
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

        let loaded = match &current_sig {
            None => Loaded {
                signature: None,
                enabled: false,
                rules: Vec::new(),
            },
            Some(_) => match std::fs::read_to_string(&self.path) {
                Ok(contents) => match serde_json::from_str::<EndpointFilterFile>(&contents) {
                    Ok(file) => {
                        let rules = file
                            .rules
                            .into_iter()
                            .filter_map(|r| compile_rule(r))
                            .collect();
                        Loaded {
                            signature: current_sig,
                            enabled: file.enabled,
                            rules,
                        }
                    }
                    Err(e) => {
                        warn!("endpoint_filter.json malformed, treating as disabled: {e}");
                        Loaded {
                            signature: current_sig,
                            enabled: false,
                            rules: Vec::new(),
                        }
                    }
                },
                Err(e) => {
                    warn!("failed to read endpoint_filter.json: {e}");
                    Loaded {
                        signature: current_sig,
                        enabled: false,
                        rules: Vec::new(),
                    }
                }
            },
        };

        *self.state.write().await = Some(loaded);
    }

    /// Scans rules in order; first match wins. Disabled short-circuits to no-match.
    pub async fn evaluate(
        &self,
        service: &str,
        method: &str,
        path: &str,
        query: &HashMap<String, String>,
    ) -> Option<BlockMatch> {
        self.reload_if_needed().await;
        let guard = self.state.read().await;
        let loaded = guard.as_ref()?;
        if !loaded.enabled {
            return None;
        }

        for rule in &loaded.rules {
            if !rule.services.iter().any(|s| s == service) {
                continue;
            }
            if !rule.methods.iter().any(|m| m == "*" || m.eq_ignore_ascii_case(method)) {
                continue;
            }
            if !matches_path(rule, path) {
                continue;
            }
            if !matches_query(rule, query) {
                continue;
            }
            return Some(BlockMatch {
                rule_id: rule.id.clone(),
                status: http::StatusCode::from_u16(rule.status).unwrap_or(http::StatusCode::FORBIDDEN),
                message: rule.message.clone(),
            });
        }
        None
    }
}

impl Default for EndpointBlocker {
    fn default() -> Self {
        Self::new()
    }
}

fn compile_rule(wire: RuleWire) -> Option<CompiledRule> {
    let regex = if matches!(wire.rule_match.match_type, MatchType::Regex) {
        match Regex::new(&wire.rule_match.value) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(
                    "skipping endpoint rule {:?}: invalid regex '{}': {}",
                    wire.id, wire.rule_match.value, e
                );
                return None;
            }
        }
    } else {
        None
    };

    Some(CompiledRule {
        id: wire.id.unwrap_or_default(),
        services: wire.services,
        methods: wire.methods,
        match_type: wire.rule_match.match_type,
        match_value: wire.rule_match.value,
        regex,
        query: wire.query,
        status: wire.action.status,
        message: wire.action.message,
    })
}

fn matches_path(rule: &CompiledRule, path: &str) -> bool {
    match rule.match_type {
        MatchType::Path => path == rule.match_value,
        MatchType::Prefix => path.starts_with(&rule.match_value),
        MatchType::Regex => rule
            .regex
            .as_ref()
            .map(|re| re.is_match(path))
            .unwrap_or(false),
    }
}

fn matches_query(rule: &CompiledRule, query: &HashMap<String, String>) -> bool {
    rule.query.iter().all(|(k, expected)| match query.get(k) {
        Some(actual) => expected == "*" || actual == expected,
        None => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn write_rule(dir: &std::path::Path) {
        std::fs::write(
            dir.join("endpoint_filter.json"),
            r#"{
                "enabled": true,
                "rules": [
                    {
                        "id": "r1",
                        "services": ["claude"],
                        "methods": ["GET", "POST"],
                        "match": {"type": "path", "value": "/v1/messages/count_tokens"},
                        "query": {"beta": "true"},
                        "action": {"status": 403, "message": "disabled"}
                    }
                ]
            }"#,
        )
        .unwrap();
    }

    #[tokio::test]
    async fn exact_path_and_query_match_blocks() {
        let tmp = tempfile::tempdir().unwrap();
        write_rule(tmp.path());
        let blocker = EndpointBlocker::with_path(tmp.path().join("endpoint_filter.json"));

        let mut query = HashMap::new();
        query.insert("beta".to_string(), "true".to_string());
        let result = blocker
            .evaluate("claude", "POST", "/v1/messages/count_tokens", &query)
            .await;
        assert!(result.is_some());
        let m = result.unwrap();
        assert_eq!(m.rule_id, "r1");
        assert_eq!(m.status, http::StatusCode::FORBIDDEN);
        assert_eq!(m.message, "disabled");
    }

    #[tokio::test]
    async fn wrong_service_does_not_match() {
        let tmp = tempfile::tempdir().unwrap();
        write_rule(tmp.path());
        let blocker = EndpointBlocker::with_path(tmp.path().join("endpoint_filter.json"));
        let mut query = HashMap::new();
        query.insert("beta".to_string(), "true".to_string());
        let result = blocker
            .evaluate("codex", "POST", "/v1/messages/count_tokens", &query)
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn missing_query_param_does_not_match() {
        let tmp = tempfile::tempdir().unwrap();
        write_rule(tmp.path());
        let blocker = EndpointBlocker::with_path(tmp.path().join("endpoint_filter.json"));
        let result = blocker
            .evaluate("claude", "POST", "/v1/messages/count_tokens", &HashMap::new())
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn disabled_filter_never_matches() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("endpoint_filter.json"),
            r#"{"enabled": false, "rules": []}"#,
        )
        .unwrap();
        let blocker = EndpointBlocker::with_path(tmp.path().join("endpoint_filter.json"));
        let mut query = HashMap::new();
        query.insert("beta".to_string(), "true".to_string());
        let result = blocker
            .evaluate("claude", "POST", "/v1/messages/count_tokens", &query)
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn wildcard_query_value_requires_only_presence() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("endpoint_filter.json"),
            r#"{
                "enabled": true,
                "rules": [{
                    "id": "r2",
                    "services": ["codex"],
                    "methods": ["*"],
                    "match": {"type": "prefix", "value": "/v1/"},
                    "query": {"trace": "*"},
                    "action": {"status": 404, "message": "not found"}
                }]
            }"#,
        )
        .unwrap();
        let blocker = EndpointBlocker::with_path(tmp.path().join("endpoint_filter.json"));
        let mut query = HashMap::new();
        query.insert("trace".to_string(), "anything".to_string());
        let result = blocker.evaluate("codex", "GET", "/v1/chat", &query).await;
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn invalid_regex_rule_is_skipped_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("endpoint_filter.json"),
            r#"{
                "enabled": true,
                "rules": [{
                    "id": "bad",
                    "services": ["claude"],
                    "methods": ["*"],
                    "match": {"type": "regex", "value": "("},
                    "query": {},
                    "action": {"status": 403, "message": "x"}
                }]
            }"#,
        )
        .unwrap();
        let blocker = EndpointBlocker::with_path(tmp.path().join("endpoint_filter.json"));
        let result = blocker
            .evaluate("claude", "GET", "/anything", &HashMap::new())
            .await;
        assert!(result.is_none());
    }
}
