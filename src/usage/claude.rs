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

//! Claude SSE dialect: `message_start` carries prompt-side usage, `message_delta`
//! carries the output count. Reasoning tokens are not reported by this dialect.
use serde_json::Value;

use super::{UsageDialect, UsageTotals};

pub struct ClaudeDialect;

impl UsageDialect for ClaudeDialect {
    fn apply_event(&self, event: &Value, totals: &mut UsageTotals) {
        let event_type = event.get("type").and_then(Value::as_str).unwrap_or("");
        match event_type {
            "message_start" => {
                let Some(usage) = event.pointer("/message/usage") else {
                    return;
                };
                totals.input = usage
                    .get("input_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(totals.input);
                totals.cached_create = usage
                    .get("cache_creation_input_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(totals.cached_create);
                totals.cached_read = usage
                    .get("cache_read_input_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(totals.cached_read);
            }
            "message_delta" => {
                if let Some(output) = event.pointer("/usage/output_tokens").and_then(Value::as_u64) {
                    totals.output = output;
                }
            }
            _ => return,
        }
        totals.total = totals.input + totals.output;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_start_sets_input_side_totals() {
        let mut totals = UsageTotals::default();
        let event = json!({
            "type": "message_start",
            "message": {
                "usage": {
                    "input_tokens": 100,
                    "cache_creation_input_tokens": 20,
                    "cache_read_input_tokens": 5
                }
            }
        });
        ClaudeDialect.apply_event(&event, &mut totals);
        assert_eq!(totals.input, 100);
        assert_eq!(totals.cached_create, 20);
        assert_eq!(totals.cached_read, 5);
        assert_eq!(totals.total, 100);
    }

    #[test]
    fn message_delta_adds_output_and_recomputes_total() {
        let mut totals = UsageTotals {
            input: 100,
            cached_create: 20,
            cached_read: 5,
            ..Default::default()
        };
        let event = json!({"type": "message_delta", "usage": {"output_tokens": 42}});
        ClaudeDialect.apply_event(&event, &mut totals);
        assert_eq!(totals.output, 42);
        assert_eq!(totals.total, 142);
    }

    #[test]
    fn unrelated_event_type_is_ignored() {
        let mut totals = UsageTotals::default();
        let event = json!({"type": "ping"});
        ClaudeDialect.apply_event(&event, &mut totals);
        assert_eq!(totals, UsageTotals::default());
    }
}
