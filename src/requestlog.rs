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

//! Request Log: an in-memory ring buffer per service mirrored to an append-only
//! JSON-lines file under an OS exclusive lock, so multiple proxy processes sharing
//! a log directory never interleave writes.
use std::collections::{HashMap, VecDeque};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::config::clp_home;
use crate::usage::UsageTotals;

pub const DEFAULT_CAPACITY: usize = 1000;
pub const MAX_BODY_BYTES: usize = 1_048_576;
const TRUNCATION_SENTINEL: &[u8] = b"...[truncated]";

/// Base64-encodes a body, truncating to `MAX_BODY_BYTES` with a sentinel suffix
/// first if it's larger.
pub fn encode_body(bytes: &[u8]) -> String {
    if bytes.len() > MAX_BODY_BYTES {
        let mut truncated = bytes[..MAX_BODY_BYTES].to_vec();
        truncated.extend_from_slice(TRUNCATION_SENTINEL);
        BASE64.encode(truncated)
    } else {
        BASE64.encode(bytes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: String,
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub client_method: String,
    pub client_path: String,
    pub original_headers: HashMap<String, String>,
    pub target_headers: HashMap<String, String>,
    pub original_body_b64: String,
    pub filtered_body_b64: String,
    pub target_url: String,
    pub config_name: Option<String>,
    pub channel: Option<String>,
    pub status_code: Option<u16>,
    pub response_content_b64: String,
    pub duration_ms: u64,
    pub blocked: bool,
    pub blocked_by: Option<String>,
    pub blocked_reason: Option<String>,
    pub usage: UsageTotals,
}

struct ServiceLogState {
    ring: VecDeque<RequestRecord>,
    line_count: usize,
}

pub struct RequestLog {
    dir: PathBuf,
    capacity: usize,
    services: RwLock<HashMap<String, Arc<Mutex<ServiceLogState>>>>,
}

impl RequestLog {
    pub fn new() -> Self {
        Self::with_dir_and_capacity(clp_home().join("logs"), DEFAULT_CAPACITY)
    }

    pub fn with_dir_and_capacity(dir: PathBuf, capacity: usize) -> Self {
        Self {
            dir,
            capacity,
            services: RwLock::new(HashMap::new()),
        }
    }

    fn path_for(&self, service: &str) -> PathBuf {
        self.dir.join(format!("{service}.jsonl"))
    }

    async fn state_for(&self, service: &str) -> Arc<Mutex<ServiceLogState>> {
        {
            let guard = self.services.read().await;
            if let Some(state) = guard.get(service) {
                return state.clone();
            }
        }
        let mut guard = self.services.write().await;
        guard
            .entry(service.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(ServiceLogState {
                    ring: VecDeque::new(),
                    line_count: 0,
                }))
            })
            .clone()
    }

    /// Inserts into the ring (evicting the oldest beyond capacity) and appends one
    /// JSON line to disk under an exclusive file lock. Truncates the file from the
    /// ring once it grows beyond `2 * capacity` lines.
    pub async fn append(&self, record: RequestRecord) {
        let service = record.service.clone();
        let path = self.path_for(&service);
        let state = self.state_for(&service).await;
        let mut state = state.lock().await;

        if state.ring.len() >= self.capacity {
            state.ring.pop_front();
        }
        state.ring.push_back(record.clone());

        if let Err(e) = append_line(&path, &record) {
            warn!("failed to append request log line for '{service}': {e}");
            return;
        }
        state.line_count += 1;

        if state.line_count >= 2 * self.capacity {
            let snapshot: Vec<RequestRecord> = state.ring.iter().cloned().collect();
            match rewrite_file(&path, &snapshot) {
                Ok(()) => state.line_count = snapshot.len(),
                Err(e) => warn!("failed to truncate request log for '{service}': {e}"),
            }
        }
    }

    /// Up to `limit` most recent records, newest first.
    pub async fn list(&self, service: &str, limit: usize) -> Vec<RequestRecord> {
        let state = self.state_for(service).await;
        let state = state.lock().await;
        state.ring.iter().rev().take(limit).cloned().collect()
    }

    pub async fn get(&self, service: &str, id: &str) -> Option<RequestRecord> {
        let state = self.state_for(service).await;
        let state = state.lock().await;
        state.ring.iter().find(|r| r.id == id).cloned()
    }
}

impl Default for RequestLog {
    fn default() -> Self {
        Self::new()
    }
}

fn append_line(path: &PathBuf, record: &RequestRecord) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.lock_exclusive()?;
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    let result = file.write_all(&line);
    let _ = FileExt::unlock(&file);
    result
}

fn rewrite_file(path: &PathBuf, records: &[RequestRecord]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
    file.lock_exclusive()?;
    let mut result = Ok(());
    for record in records {
        let mut line = match serde_json::to_vec(record) {
            Ok(l) => l,
            Err(e) => {
                result = Err(std::io::Error::new(std::io::ErrorKind::Other, e));
                break;
            }
        };
        line.push(b'\n');
        if let Err(e) = file.write_all(&line) {
            result = Err(e);
            break;
        }
    }
    let _ = FileExt::unlock(&file);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(id: &str) -> RequestRecord {
        RequestRecord {
            id: id.to_string(),
            service: "claude".to_string(),
            timestamp: Utc::now(),
            client_method: "POST".to_string(),
            client_path: "/v1/messages".to_string(),
            original_headers: HashMap::new(),
            target_headers: HashMap::new(),
            original_body_b64: String::new(),
            filtered_body_b64: String::new(),
            target_url: "https://api.x/v1/messages".to_string(),
            config_name: Some("prod".to_string()),
            channel: Some("prod".to_string()),
            status_code: Some(200),
            response_content_b64: String::new(),
            duration_ms: 42,
            blocked: false,
            blocked_by: None,
            blocked_reason: None,
            usage: UsageTotals::default(),
        }
    }

    #[tokio::test]
    async fn append_and_list_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let log = RequestLog::with_dir_and_capacity(tmp.path().to_path_buf(), 10);
        log.append(sample_record("r1")).await;
        log.append(sample_record("r2")).await;
        let listed = log.list("claude", 10).await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "r2");
        assert_eq!(listed[1].id, "r1");

        let contents = std::fs::read_to_string(tmp.path().join("claude.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn ring_evicts_oldest_beyond_capacity() {
        let tmp = tempfile::tempdir().unwrap();
        let log = RequestLog::with_dir_and_capacity(tmp.path().to_path_buf(), 2);
        log.append(sample_record("r1")).await;
        log.append(sample_record("r2")).await;
        log.append(sample_record("r3")).await;
        let listed = log.list("claude", 10).await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "r3");
        assert_eq!(listed[1].id, "r2");
    }

    #[tokio::test]
    async fn get_finds_by_id() {
        let tmp = tempfile::tempdir().unwrap();
        let log = RequestLog::with_dir_and_capacity(tmp.path().to_path_buf(), 10);
        log.append(sample_record("r1")).await;
        let found = log.get("claude", "r1").await;
        assert!(found.is_some());
        assert!(log.get("claude", "missing").await.is_none());
    }

    #[tokio::test]
    async fn file_truncates_once_it_grows_beyond_double_capacity() {
        let tmp = tempfile::tempdir().unwrap();
        let log = RequestLog::with_dir_and_capacity(tmp.path().to_path_buf(), 2);
        for i in 0..5 {
            log.append(sample_record(&format!("r{i}"))).await;
        }
        let contents = std::fs::read_to_string(tmp.path().join("claude.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn body_over_cap_gets_sentinel_suffix() {
        let big = vec![b'a'; MAX_BODY_BYTES + 100];
        let encoded = encode_body(&big);
        let decoded = BASE64.decode(encoded).unwrap();
        assert!(decoded.ends_with(TRUNCATION_SENTINEL));
        assert_eq!(decoded.len(), MAX_BODY_BYTES + TRUNCATION_SENTINEL.len());
    }

    #[test]
    fn body_under_cap_is_untouched() {
        let small = b"hello".to_vec();
        let encoded = encode_body(&small);
        let decoded = BASE64.decode(encoded).unwrap();
        assert_eq!(decoded, small);
    }
}
