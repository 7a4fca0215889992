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

//! Logging setup: plain line output by default, structured JSON lines when
//! `CLP_JSON_LOGGING` is set.
use std::io::Write;

use chrono::Local;
use env_logger::{Builder, Env};
use log::LevelFilter;

fn level_from_str(s: &str) -> LevelFilter {
    match s.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

/// Initializes the global logger. `log_level` defaults to `info` on anything
/// unrecognized; `json_logging` switches to one-JSON-object-per-line output.
pub fn setup_logging(log_level: &str, json_logging: bool) {
    let mut builder = Builder::from_env(Env::default());

    if json_logging {
        builder.format(|buf, record| {
            let now = Local::now();
            let json = serde_json::json!({
                "timestamp": now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
                "level": record.level().to_string(),
                "target": record.target(),
                "message": record.args().to_string(),
            });
            writeln!(buf, "{json}")
        });
    } else {
        builder.format(|buf, record| {
            let now = Local::now();
            writeln!(
                buf,
                "{} [{}] {}: {}",
                now.format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        });
    }

    builder.filter_level(level_from_str(log_level));
    builder.init();

    log::info!("logging initialized: level={log_level}, json={json_logging}");
}
