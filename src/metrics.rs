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

//! Prometheus metrics exposed over `GET /metrics`, bypassing authentication like
//! the health surface.
use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    Histogram, HistogramVec, IntCounter, IntCounterVec,
};

use crate::usage::UsageTotals;

lazy_static! {
    pub static ref NUM_REQUESTS: IntCounter =
        register_int_counter!("clp_requests_total", "Total number of proxied requests")
            .expect("failed to create clp_requests_total counter");

    pub static ref REQUESTS_PER_SERVICE: IntCounterVec = register_int_counter_vec!(
        "clp_requests_per_service",
        "Total number of requests per service",
        &["service"]
    )
    .expect("failed to create clp_requests_per_service counter vector");

    pub static ref REQUESTS_PER_CONFIG: IntCounterVec = register_int_counter_vec!(
        "clp_requests_per_config",
        "Total number of requests routed to each upstream config",
        &["service", "config"]
    )
    .expect("failed to create clp_requests_per_config counter vector");

    pub static ref REQUESTS_PER_MODEL: IntCounterVec = register_int_counter_vec!(
        "clp_requests_per_model",
        "Total number of requests per model",
        &["service", "model"]
    )
    .expect("failed to create clp_requests_per_model counter vector");

    pub static ref REQUEST_LATENCY: HistogramVec = register_histogram_vec!(
        "clp_request_latency_seconds",
        "Latency of proxied requests in seconds",
        &["service"]
    )
    .expect("failed to create clp_request_latency_seconds histogram vector");

    pub static ref REQUEST_SUCCESS: IntCounterVec = register_int_counter_vec!(
        "clp_request_success_total",
        "Total successful proxied requests",
        &["service"]
    )
    .expect("failed to create clp_request_success_total counter vector");

    pub static ref REQUEST_FAILURE: IntCounterVec = register_int_counter_vec!(
        "clp_request_failure_total",
        "Total failed proxied requests",
        &["service", "reason"]
    )
    .expect("failed to create clp_request_failure_total counter vector");

    pub static ref LB_SWITCH_TOTAL: IntCounterVec = register_int_counter_vec!(
        "clp_lb_switch_total",
        "Number of times the load balancer excluded a config and switched candidates",
        &["service"]
    )
    .expect("failed to create clp_lb_switch_total counter vector");

    pub static ref LB_RESET_TOTAL: IntCounterVec = register_int_counter_vec!(
        "clp_lb_reset_total",
        "Number of times the load balancer cleared failures after cooldown",
        &["service"]
    )
    .expect("failed to create clp_lb_reset_total counter vector");

    pub static ref LB_EXHAUSTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "clp_lb_exhausted_total",
        "Number of times every candidate config failed with no reset available",
        &["service"]
    )
    .expect("failed to create clp_lb_exhausted_total counter vector");

    pub static ref TOKEN_USAGE: IntCounterVec = register_int_counter_vec!(
        "clp_token_usage_total",
        "Running token usage per service and category",
        &["service", "category"]
    )
    .expect("failed to create clp_token_usage_total counter vector");

    pub static ref MODEL_SELECTION_TIME: Histogram = register_histogram!(
        "clp_model_selection_time_seconds",
        "Time taken to parse the request body and resolve routing"
    )
    .expect("failed to create clp_model_selection_time_seconds histogram");
}

/// Folds a parsed [`UsageTotals`] into the per-service token-usage counters.
pub fn track_usage(service: &str, usage: &UsageTotals) {
    TOKEN_USAGE.with_label_values(&[service, "input"]).inc_by(usage.input);
    TOKEN_USAGE
        .with_label_values(&[service, "cached_create"])
        .inc_by(usage.cached_create);
    TOKEN_USAGE
        .with_label_values(&[service, "cached_read"])
        .inc_by(usage.cached_read);
    TOKEN_USAGE.with_label_values(&[service, "output"]).inc_by(usage.output);
    TOKEN_USAGE
        .with_label_values(&[service, "reasoning"])
        .inc_by(usage.reasoning);
}

pub fn track_lb_switch(service: &str) {
    LB_SWITCH_TOTAL.with_label_values(&[service]).inc();
}

pub fn track_lb_reset(service: &str) {
    LB_RESET_TOTAL.with_label_values(&[service]).inc();
}

pub fn track_lb_exhausted(service: &str) {
    LB_EXHAUSTED_TOTAL.with_label_values(&[service]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_usage_increments_all_categories() {
        let before = TOKEN_USAGE.with_label_values(&["claude", "input"]).get();
        track_usage(
            "claude",
            &UsageTotals {
                input: 10,
                cached_create: 1,
                cached_read: 2,
                output: 3,
                reasoning: 0,
                total: 16,
            },
        );
        let after = TOKEN_USAGE.with_label_values(&["claude", "input"]).get();
        assert_eq!(after - before, 10);
    }
}
