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

//! Header Stripper. Case-insensitive removal of any configured header name; the engine
//! separately strips `authorization`/`host`/`content-length` unconditionally (that is
//! the engine's job, not this filter's).
use std::path::PathBuf;

use http::HeaderMap;
use log::warn;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::config::{clp_home, FileSignature};

#[derive(Debug, Deserialize, Clone, Default)]
struct HeaderFilterFile {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    blocked_headers: Vec<String>,
}

struct Loaded {
    signature: Option<FileSignature>,
    file: HeaderFilterFile,
}

pub struct HeaderStripper {
    path: PathBuf,
    state: RwLock<Option<Loaded>>,
}

impl HeaderStripper {
    pub fn new() -> Self {
        Self {
            path: clp_home().join("header_filter.json"),
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
            None => HeaderFilterFile::default(),
            Some(_) => match std::fs::read_to_string(&self.path) {
                Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                    warn!("header_filter.json malformed, treating as disabled: {e}");
                    HeaderFilterFile::default()
                }),
                Err(e) => {
                    warn!("failed to read header_filter.json: {e}");
                    HeaderFilterFile::default()
                }
            },
        };

        *self.state.write().await = Some(Loaded {
            signature: current_sig,
            file,
        });
    }

    /// Removes every configured header name, case-insensitively. Disabled returns the
    /// input unchanged. Never touches response headers (the engine only ever calls this
    /// on the outgoing request).
    pub async fn apply(&self, mut headers: HeaderMap) -> HeaderMap {
        self.reload_if_needed().await;
        let guard = self.state.read().await;
        let Some(loaded) = guard.as_ref() else {
            return headers;
        };
        if !loaded.file.enabled {
            return headers;
        }
        for name in &loaded.file.blocked_headers {
            if let Ok(header_name) = http::HeaderName::from_bytes(name.to_lowercase().as_bytes()) {
                headers.remove(&header_name);
            }
        }
        headers
    }
}

impl Default for HeaderStripper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(
                http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                v.parse().unwrap(),
            );
        }
        h
    }

    #[tokio::test]
    async fn case_insensitive_removal_both_directions() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("header_filter.json"),
            r#"{"enabled": true, "blocked_headers": ["X-Forwarded-For"]}"#,
        )
        .unwrap();
        let stripper = HeaderStripper::with_path(tmp.path().join("header_filter.json"));
        let headers = headers_with(&[("x-forwarded-for", "1.2.3.4"), ("x-keep", "yes")]);
        let out = stripper.apply(headers).await;
        assert!(out.get("x-forwarded-for").is_none());
        assert!(out.get("x-keep").is_some());
    }

    #[tokio::test]
    async fn disabled_passes_through_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("header_filter.json"),
            r#"{"enabled": false, "blocked_headers": ["x-forwarded-for"]}"#,
        )
        .unwrap();
        let stripper = HeaderStripper::with_path(tmp.path().join("header_filter.json"));
        let headers = headers_with(&[("x-forwarded-for", "1.2.3.4")]);
        let out = stripper.apply(headers).await;
        assert!(out.get("x-forwarded-for").is_some());
    }

    #[tokio::test]
    async fn missing_file_means_disabled() {
        let tmp = tempfile::tempdir().unwrap();
        let stripper = HeaderStripper::with_path(tmp.path().join("header_filter.json"));
        let headers = headers_with(&[("x-anything", "v")]);
        let out = stripper.apply(headers).await;
        assert!(out.get("x-anything").is_some());
    }
}
