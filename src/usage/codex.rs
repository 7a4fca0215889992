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

//! Codex SSE/NDJSON dialect: a single `response.usage` object carries the full
//! totals each time it appears, so later events simply overwrite earlier ones.
use serde_json::Value;

use super::{UsageDialect, UsageTotals};

pub struct CodexDialect;

impl UsageDialect for CodexDialect {
    fn apply_event(&self, event: &Value, totals: &mut UsageTotals) {
        let Some(usage) = event.pointer("/response/usage") else {
            return;
        };

        let input = usage.get("input_tokens").and_then(Value::as_u64);
        let output = usage.get("output_tokens").and_then(Value::as_u64);
        let total = usage.get("total_tokens").and_then(Value::as_u64);
        let cached = usage
            .pointer("/input_tokens_details/cached_tokens")
            .and_then(Value::as_u64);
        let reasoning = usage
            .pointer("/output_tokens_details/reasoning_tokens")
            .and_then(Value::as_u64);

        if input.is_none() && output.is_none() && total.is_none() {
            return;
        }

        totals.input = input.unwrap_or(totals.input);
        totals.output = output.unwrap_or(totals.output);
        totals.cached_read = cached.unwrap_or(totals.cached_read);
        totals.reasoning = reasoning.unwrap_or(totals.reasoning);
        totals.total = total.unwrap_or(totals.input + totals.output);
    }
}
