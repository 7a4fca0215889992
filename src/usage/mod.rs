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

//! Usage Parser: a stateful incremental parser fed arbitrary response-body chunks,
//! framing-aware (SSE / NDJSON / single JSON) and dialect-aware (Claude / Codex).
//! Malformed JSON fragments are dropped silently — usage accounting never fails
//! the stream it is observing.
pub mod claude;
pub mod codex;

use serde_json::Value;

pub use claude::ClaudeDialect;
pub use codex::CodexDialect;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct UsageTotals {
    pub input: u64,
    pub cached_create: u64,
    pub cached_read: u64,
    pub output: u64,
    pub reasoning: u64,
    pub total: u64,
}

impl UsageTotals {
    /// Codex display totals subtract `cached_read` from `input` and `total`;
    /// storage (this struct as parsed) always keeps the raw numbers.
    pub fn display_for_codex(&self) -> Self {
        Self {
            input: self.input.saturating_sub(self.cached_read),
            total: self.total.saturating_sub(self.cached_read),
            ..*self
        }
    }
}

pub trait UsageDialect: Send + Sync {
    /// Folds one parsed JSON event into the running totals.
    fn apply_event(&self, event: &Value, totals: &mut UsageTotals);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Sse,
    NdJson,
    SingleJson,
}

fn framing_for_content_type(content_type: &str) -> Framing {
    let ct = content_type.split(';').next().unwrap_or("").trim();
    if ct.eq_ignore_ascii_case("text/event-stream") {
        Framing::Sse
    } else if ct.eq_ignore_ascii_case("application/x-ndjson") {
        Framing::NdJson
    } else {
        Framing::SingleJson
    }
}

pub struct UsageParser {
    framing: Framing,
    dialect: Box<dyn UsageDialect>,
    sse_buf: String,
    ndjson_buf: String,
    json_buf: Vec<u8>,
    totals: UsageTotals,
}

impl UsageParser {
    pub fn new(content_type: &str, dialect: Box<dyn UsageDialect>) -> Self {
        Self {
            framing: framing_for_content_type(content_type),
            dialect,
            sse_buf: String::new(),
            ndjson_buf: String::new(),
            json_buf: Vec::new(),
            totals: UsageTotals::default(),
        }
    }

    /// Feeds one chunk of the response body. Usage totals update in place; call
    /// [`UsageParser::finish`] once the stream ends to flush single-JSON framing.
    pub fn feed(&mut self, chunk: &[u8]) {
        match self.framing {
            Framing::Sse => self.feed_sse(chunk),
            Framing::NdJson => self.feed_ndjson(chunk),
            Framing::SingleJson => self.json_buf.extend_from_slice(chunk),
        }
    }

    fn feed_sse(&mut self, chunk: &[u8]) {
        self.sse_buf.push_str(&String::from_utf8_lossy(chunk));
        let mut event_data = String::new();
        loop {
            let Some(pos) = self.sse_buf.find('\n') else {
                break;
            };
            let line = self.sse_buf[..pos].trim_end_matches('\r').to_string();
            self.sse_buf.drain(..=pos);

            if line.is_empty() {
                if !event_data.is_empty() {
                    self.try_parse_event(&event_data);
                    event_data.clear();
                }
                continue;
            }
            if let Some(data) = line.strip_prefix("data:") {
                if !event_data.is_empty() {
                    event_data.push('\n');
                }
                event_data.push_str(data.trim_start());
            }
        }
    }

    fn feed_ndjson(&mut self, chunk: &[u8]) {
        self.ndjson_buf.push_str(&String::from_utf8_lossy(chunk));
        loop {
            let Some(pos) = self.ndjson_buf.find('\n') else {
                break;
            };
            let line = self.ndjson_buf[..pos].to_string();
            self.ndjson_buf.drain(..=pos);
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                self.try_parse_event(trimmed);
            }
        }
    }

    fn try_parse_event(&mut self, text: &str) {
        if let Ok(value) = serde_json::from_str::<Value>(text) {
            self.dialect.apply_event(&value, &mut self.totals);
        }
    }

    /// Flushes any buffered partial line (NDJSON) and, for single-JSON framing,
    /// parses the fully accumulated body. Returns the final running totals.
    pub fn finish(mut self) -> UsageTotals {
        if self.framing == Framing::NdJson {
            let trimmed = self.ndjson_buf.trim().to_string();
            if !trimmed.is_empty() {
                self.try_parse_event(&trimmed);
            }
        }
        if self.framing == Framing::SingleJson {
            if let Ok(value) = serde_json::from_slice::<Value>(&self.json_buf) {
                self.dialect.apply_event(&value, &mut self.totals);
            }
        }
        self.totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_detection() {
        assert_eq!(framing_for_content_type("text/event-stream"), Framing::Sse);
        assert_eq!(
            framing_for_content_type("application/x-ndjson; charset=utf-8"),
            Framing::NdJson
        );
        assert_eq!(framing_for_content_type("application/json"), Framing::SingleJson);
    }

    #[test]
    fn malformed_json_fragment_is_dropped_silently() {
        let mut parser = UsageParser::new("text/event-stream", Box::new(ClaudeDialect));
        parser.feed(b"data: {not json}\n\n");
        let totals = parser.finish();
        assert_eq!(totals, UsageTotals::default());
    }
}
