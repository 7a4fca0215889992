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

//! Configuration: the Config Store and the shared hot-reload-by-file-signature
//! primitive every other hot-reloaded component (filters, load balancer) builds on.
pub mod store;

pub use store::{ConfigError, ConfigStore, Credential, UpstreamConfig};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// `(mtime_ns, size)` — the file signature used for hot-reload across the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSignature {
    pub mtime_ns: i128,
    pub size: u64,
}

impl FileSignature {
    pub fn stat(path: &Path) -> std::io::Result<Option<Self>> {
        match fs::metadata(path) {
            Ok(meta) => {
                let mtime_ns = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_nanos() as i128)
                    .unwrap_or(0);
                Ok(Some(Self {
                    mtime_ns,
                    size: meta.len(),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Resolve `~/.clp` (overridable with `CLP_HOME`, used by tests so they never touch
/// a developer's real home directory).
pub fn clp_home() -> PathBuf {
    if let Ok(dir) = std::env::var("CLP_HOME") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".clp")
}

/// Atomically write `contents` to `path` via a temp file + rename in the same directory,
/// so readers never observe a partially written snapshot.
pub fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("json")
    ));
    fs::write(&tmp_path, contents)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
