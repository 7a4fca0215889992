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

//! Body Rewriter. Rules apply in order to the body as UTF-8 text; non-UTF-8 bodies
//! bypass the filter untouched, and the engine is responsible for recomputing
//! `Content-Length` after rewriting (this module only returns the new bytes).
use std::path::PathBuf;

use log::warn;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::config::{clp_home, FileSignature};

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum Op {
    Replace,
    Remove,
}

#[derive(Debug, Deserialize, Clone)]
struct RuleWire {
    source: String,
    op: Op,
    #[serde(default)]
    target: Option<String>,
}

struct Rule {
    source: String,
    target: String,
}

struct Loaded {
    signature: Option<FileSignature>,
    rules: Vec<Rule>,
}

pub struct BodyRewriter {
    path: PathBuf,
    state: RwLock<Option<Loaded>>,
}

impl BodyRewriter {
    pub fn new() -> Self {
        Self {
            path: clp_home().join("filter.json"),
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

        let rules = match &current_sig {
            None => Vec::new(),
            Some(_) => match std::fs::read_to_string(&self.path) {
                Ok(contents) => match serde_json::from_str::<Vec<RuleWire>>(&contents) {
                    Ok(wire) => wire.into_iter().filter_map(compile_rule).collect(),
                    Err(e) => {
                        warn!("filter.json malformed, treating as empty: {e}");
                        Vec::new()
                    }
                },
                Err(e) => {
                    warn!("failed to read filter.json: {e}");
                    Vec::new()
                }
            },
        };

        *self.state.write().await = Some(Loaded {
            signature: current_sig,
            rules,
        });
    }

    /// Applies all rules in order. Non-UTF-8 bodies bypass the filter untouched.
    pub async fn apply(&self, body: Vec<u8>) -> Vec<u8> {
        self.reload_if_needed().await;
        let Ok(mut text) = String::from_utf8(body.clone()) else {
            return body;
        };

        let guard = self.state.read().await;
        let Some(loaded) = guard.as_ref() else {
            return body;
        };

        for rule in &loaded.rules {
            if rule.source.is_empty() {
                continue;
            }
            text = text.replace(&rule.source, &rule.target);
        }
        text.into_bytes()
    }
}

impl Default for BodyRewriter {
    fn default() -> Self {
        Self::new()
    }
}

/// `replace` without `target` is rejected at load time: the rule is dropped and a
/// warning logged rather than treated as fatal.
fn compile_rule(wire: RuleWire) -> Option<Rule> {
    match wire.op {
        Op::Remove => Some(Rule {
            source: wire.source,
            target: String::new(),
        }),
        Op::Replace => match wire.target {
            Some(target) => Some(Rule {
                source: wire.source,
                target,
            }),
            None => {
                warn!("dropping body filter rule '{}': replace without target", wire.source);
                None
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replace_substitutes_all_occurrences() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("filter.json"),
            r#"[{"source": "sk-live-ABC", "op": "replace", "target": "[REDACTED]"}]"#,
        )
        .unwrap();
        let rewriter = BodyRewriter::with_path(tmp.path().join("filter.json"));
        let body = br#"{"prompt":"key sk-live-ABC here"}"#.to_vec();
        let out = rewriter.apply(body).await;
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"{"prompt":"key [REDACTED] here"}"#
        );
    }

    #[tokio::test]
    async fn remove_is_replace_with_empty_target() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("filter.json"),
            r#"[{"source": "secret", "op": "remove"}]"#,
        )
        .unwrap();
        let rewriter = BodyRewriter::with_path(tmp.path().join("filter.json"));
        let out = rewriter.apply(b"a secret b".to_vec()).await;
        assert_eq!(String::from_utf8(out).unwrap(), "a  b");
    }

    #[tokio::test]
    async fn non_utf8_body_bypasses_filter() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("filter.json"),
            r#"[{"source": "x", "op": "remove"}]"#,
        )
        .unwrap();
        let rewriter = BodyRewriter::with_path(tmp.path().join("filter.json"));
        let body = vec![0xff, 0xfe, b'x'];
        let out = rewriter.apply(body.clone()).await;
        assert_eq!(out, body);
    }

    #[tokio::test]
    async fn idempotent_when_source_absent_from_output() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("filter.json"),
            r#"[{"source": "sk-live-ABC", "op": "replace", "target": "[REDACTED]"}]"#,
        )
        .unwrap();
        let rewriter = BodyRewriter::with_path(tmp.path().join("filter.json"));
        let body = br#"{"prompt":"sk-live-ABC"}"#.to_vec();
        let once = rewriter.apply(body).await;
        let twice = rewriter.apply(once.clone()).await;
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn replace_without_target_is_dropped_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("filter.json"),
            r#"[{"source": "x", "op": "replace"}]"#,
        )
        .unwrap();
        let rewriter = BodyRewriter::with_path(tmp.path().join("filter.json"));
        let out = rewriter.apply(b"x y x".to_vec()).await;
        assert_eq!(String::from_utf8(out).unwrap(), "x y x");
    }
}
