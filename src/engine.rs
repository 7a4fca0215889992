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

//! Proxy Engine: the orchestrator that turns one incoming client request into a
//! block check, a routing decision, a load-balanced sequence of upstream attempts,
//! a streamed response, and a request-log entry. Everything else in this crate is a
//! component the engine calls in order; nothing here owns its own hot-reload state.
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, StreamBody};
use hyper::body::{Frame, Incoming};
use log::warn;
use rand::Rng;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::client::build_upstream_client;
use crate::config::store::UpstreamConfig;
use crate::config::ConfigStore;
use crate::error::GatewayError;
use crate::filters::{BodyRewriter, EndpointBlocker, HeaderStripper};
use crate::loadbalance::{LoadBalanceMode, LoadBalancer};
use crate::metrics;
use crate::realtime::RealtimeHub;
use crate::requestlog::{encode_body, RequestLog, RequestRecord, MAX_BODY_BYTES};
use crate::routing::{
    ModelExtractor, Router, CLAUDE_MODEL_EXTRACTOR, CODEX_MODEL_EXTRACTOR,
};
use crate::usage::{ClaudeDialect, CodexDialect, UsageDialect, UsageParser, UsageTotals};

/// What distinguishes one proxied AI CLI service from another: which JSON field
/// carries the model name, and which wire dialect its usage events speak.
pub trait ServiceSpec: Send + Sync {
    fn name(&self) -> &'static str;
    fn model_extractor(&self) -> &'static dyn ModelExtractor;
    fn usage_dialect(&self) -> Box<dyn UsageDialect>;
}

pub struct ClaudeSpec;

impl ServiceSpec for ClaudeSpec {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn model_extractor(&self) -> &'static dyn ModelExtractor {
        &CLAUDE_MODEL_EXTRACTOR
    }

    fn usage_dialect(&self) -> Box<dyn UsageDialect> {
        Box::new(ClaudeDialect)
    }
}

pub struct CodexSpec;

impl ServiceSpec for CodexSpec {
    fn name(&self) -> &'static str {
        "codex"
    }

    fn model_extractor(&self) -> &'static dyn ModelExtractor {
        &CODEX_MODEL_EXTRACTOR
    }

    fn usage_dialect(&self) -> Box<dyn UsageDialect> {
        Box::new(CodexDialect)
    }
}

/// Everything about the inbound request that every candidate attempt needs,
/// borrowed for the lifetime of one call to [`Engine::proxy`].
struct RequestContext<'a> {
    service: &'a str,
    request_id: &'a str,
    method: &'a Method,
    path: &'a str,
    query_string: Option<&'a str>,
    original_headers: &'a HeaderMap,
    raw_body: &'a Bytes,
    timestamp: DateTime<Utc>,
    started: Instant,
}

pub struct Engine {
    config_store: Arc<ConfigStore>,
    endpoint_blocker: Arc<EndpointBlocker>,
    header_stripper: Arc<HeaderStripper>,
    body_rewriter: Arc<BodyRewriter>,
    router: Arc<Router>,
    load_balancer: Arc<LoadBalancer>,
    hub: Arc<RealtimeHub>,
    request_log: Arc<RequestLog>,
    http: Client,
    counter: AtomicU64,
    salt: u32,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config_store: Arc<ConfigStore>,
        endpoint_blocker: Arc<EndpointBlocker>,
        header_stripper: Arc<HeaderStripper>,
        body_rewriter: Arc<BodyRewriter>,
        router: Arc<Router>,
        load_balancer: Arc<LoadBalancer>,
        hub: Arc<RealtimeHub>,
        request_log: Arc<RequestLog>,
    ) -> Self {
        Self {
            config_store,
            endpoint_blocker,
            header_stripper,
            body_rewriter,
            router,
            load_balancer,
            hub,
            request_log,
            http: build_upstream_client(),
            counter: AtomicU64::new(0),
            salt: rand::thread_rng().gen(),
        }
    }

    fn next_request_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{:08x}-{:016x}", self.salt, n)
    }

    /// The full seven-phase pipeline: block check, parse & route, select candidates,
    /// build upstream request, stream exchange, handle outcome, log.
    pub async fn proxy(
        &self,
        spec: &dyn ServiceSpec,
        req: Request<Incoming>,
    ) -> Result<Response<BoxBody<Bytes, GatewayError>>, GatewayError> {
        let service = spec.name();
        let request_id = self.next_request_id();
        let started = Instant::now();
        let timestamp = Utc::now();

        let (parts, body) = req.into_parts();
        let method = parts.method.clone();
        let path = parts.uri.path().to_string();
        let query_string = parts.uri.query().map(str::to_string);
        let query_map = parse_query(query_string.as_deref().unwrap_or(""));

        // Phase 1: block check, before the body is even read off the wire.
        if let Some(block) = self
            .endpoint_blocker
            .evaluate(service, method.as_str(), &path, &query_map)
            .await
        {
            self.log_blocked(service, &request_id, timestamp, started, &method, &path, query_string.as_deref(), &block)
                .await;
            return Err(GatewayError::EndpointBlocked {
                rule_id: block.rule_id,
                status: block.status,
                message: block.message,
            });
        }

        let raw_body = body
            .collect()
            .await
            .map_err(|e| GatewayError::InternalError {
                message: format!("failed to read request body: {e}"),
            })?
            .to_bytes();

        let content_type = header_value(&parts.headers, http::header::CONTENT_TYPE);
        let mut json_body: Option<Value> = if is_json_content_type(&content_type) {
            serde_json::from_slice(&raw_body).ok()
        } else {
            None
        };

        // Phase 2: parse & route.
        let (model, forced_config) = match json_body.as_mut() {
            Some(body) => {
                self.router
                    .apply_before_selection(service, body, spec.model_extractor())
                    .await
            }
            None => (None, None),
        };

        // Phase 3: select candidates.
        let configs =
            self.config_store
                .get(service)
                .await
                .map_err(|e| GatewayError::InternalError {
                    message: format!("failed to load config for '{service}': {e}"),
                })?;

        let candidates = match &forced_config {
            Some(name) => vec![name.clone()],
            None => self.load_balancer.pick(service, &configs).await,
        };

        if candidates.is_empty() {
            metrics::track_lb_exhausted(service);
            metrics::REQUEST_FAILURE
                .with_label_values(&[service, "config_unavailable"])
                .inc();
            if self.load_balancer.notify_enabled().await {
                let threshold = self.load_balancer.threshold(service).await;
                let cooldown_remaining_seconds =
                    self.load_balancer.cooldown_remaining_seconds(service).await;
                self.hub
                    .publish(
                        service,
                        lifecycle_event(
                            "lb_exhausted",
                            service,
                            &request_id,
                            serde_json::json!({
                                "threshold": threshold,
                                "cooldown_remaining_seconds": cooldown_remaining_seconds,
                            }),
                        ),
                    )
                    .await;
            }
            return Err(GatewayError::ConfigUnavailable {
                service: service.to_string(),
            });
        }

        let mode = self.load_balancer.mode().await;
        metrics::NUM_REQUESTS.inc();
        metrics::REQUESTS_PER_SERVICE.with_label_values(&[service]).inc();
        if let Some(model) = &model {
            metrics::REQUESTS_PER_MODEL
                .with_label_values(&[service, model.as_str()])
                .inc();
        }

        let ctx = RequestContext {
            service,
            request_id: &request_id,
            method: &method,
            path: &path,
            query_string: query_string.as_deref(),
            original_headers: &parts.headers,
            raw_body: &raw_body,
            timestamp,
            started,
        };

        self.hub
            .publish(
                service,
                lifecycle_event("request_started", service, &request_id, serde_json::json!({})),
            )
            .await;

        // Phases 4-6: build, send, and judge each candidate in turn.
        let notify = self.load_balancer.notify_enabled().await;
        let mut pass = 1;
        loop {
            for (index, candidate) in candidates.iter().enumerate() {
                let Some(config) = configs.get(candidate) else {
                    continue;
                };
                metrics::REQUESTS_PER_CONFIG
                    .with_label_values(&[service, config.name.as_str()])
                    .inc();

                match self.attempt(spec, &ctx, config, json_body.clone()).await {
                    Ok(response) => return Ok(response),
                    Err(err) => {
                        let outcome = self.load_balancer.on_failure(service, &config.name).await;
                        metrics::REQUEST_FAILURE.with_label_values(&[service, "upstream"]).inc();

                        if mode == LoadBalanceMode::ActiveFirst {
                            self.log_failure(&ctx, config, &err).await;
                            return Err(err);
                        }

                        if index + 1 < candidates.len() {
                            metrics::track_lb_switch(service);
                            if notify {
                                self.hub
                                    .publish(
                                        service,
                                        lifecycle_event(
                                            "lb_switch",
                                            service,
                                            &request_id,
                                            serde_json::json!({
                                                "from_channel": config.name,
                                                "to_channel": candidates[index + 1],
                                                "failures": outcome.failures,
                                                "threshold": outcome.threshold,
                                                "attempt": index + 1,
                                            }),
                                        ),
                                    )
                                    .await;
                            }
                            continue;
                        }

                        if pass == 1 && self.load_balancer.maybe_reset(service).await {
                            metrics::track_lb_reset(service);
                            if notify {
                                self.hub
                                    .publish(
                                        service,
                                        lifecycle_event(
                                            "lb_reset",
                                            service,
                                            &request_id,
                                            serde_json::json!({
                                                "total_configs": candidates.len(),
                                                "threshold": outcome.threshold,
                                            }),
                                        ),
                                    )
                                    .await;
                            }
                            pass += 1;
                            break;
                        }

                        metrics::track_lb_exhausted(service);
                        if notify {
                            let cooldown_remaining_seconds =
                                self.load_balancer.cooldown_remaining_seconds(service).await;
                            self.hub
                                .publish(
                                    service,
                                    lifecycle_event(
                                        "lb_exhausted",
                                        service,
                                        &request_id,
                                        serde_json::json!({
                                            "threshold": outcome.threshold,
                                            "cooldown_remaining_seconds": cooldown_remaining_seconds,
                                        }),
                                    ),
                                )
                                .await;
                        }
                        self.log_failure(&ctx, config, &err).await;
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Phases 4-6 for a single candidate: rewrite, send, and either return the
    /// streamed success response or classify the failure for the caller to handle.
    async fn attempt(
        &self,
        spec: &dyn ServiceSpec,
        ctx: &RequestContext<'_>,
        config: &UpstreamConfig,
        mut json_body: Option<Value>,
    ) -> Result<Response<BoxBody<Bytes, GatewayError>>, GatewayError> {
        let service = ctx.service;

        if let Some(body) = json_body.as_mut() {
            self.router
                .apply_for_candidate(service, body, &config.name, spec.model_extractor())
                .await;
        }

        let mut headers = self.header_stripper.apply(ctx.original_headers.clone()).await;
        headers.remove(http::header::AUTHORIZATION);
        headers.remove(http::header::HOST);
        headers.remove(http::header::CONTENT_LENGTH);
        headers.remove("x-api-key");
        if let Some(credential) = &config.credential {
            credential.apply_to(&mut headers);
        }

        let outgoing_body = match &json_body {
            Some(body) => serde_json::to_vec(body)?,
            None => ctx.raw_body.to_vec(),
        };
        let filtered_body = self.body_rewriter.apply(outgoing_body).await;
        headers.insert(
            http::header::CONTENT_LENGTH,
            http::HeaderValue::from_str(&filtered_body.len().to_string())
                .unwrap_or_else(|_| http::HeaderValue::from_static("0")),
        );

        let target_url = format!(
            "{}{}",
            config.base_url.trim_end_matches('/'),
            full_path(ctx.path, ctx.query_string)
        );

        let send_result = self
            .http
            .request(ctx.method.clone(), target_url.clone())
            .headers(headers.clone())
            .body(filtered_body.clone())
            .send()
            .await;

        let upstream = match send_result {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                return Err(GatewayError::UpstreamTimeout {
                    config_name: config.name.clone(),
                })
            }
            Err(e) if e.is_connect() => {
                return Err(GatewayError::UpstreamConnect {
                    config_name: config.name.clone(),
                })
            }
            Err(e) => {
                return Err(GatewayError::InternalError {
                    message: format!("upstream request to '{}' failed: {e}", config.name),
                })
            }
        };

        let status = upstream.status();
        if !is_success_status(status) {
            let response_headers = upstream.headers().clone();
            let body = upstream.bytes().await.unwrap_or_default();
            return Err(GatewayError::UpstreamStatusError {
                status,
                headers: response_headers,
                body,
            });
        }

        self.load_balancer.on_success(service, &config.name).await;

        let response_content_type = header_value(upstream.headers(), http::header::CONTENT_TYPE);
        let response_headers = upstream.headers().clone();
        let usage_parser = UsageParser::new(&response_content_type, spec.usage_dialect());

        let (tx, rx) = mpsc::channel::<Result<Frame<Bytes>, GatewayError>>(32);
        let stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>> =
            Box::pin(upstream.bytes_stream());

        let drive_ctx = DriveContext {
            service: service.to_string(),
            request_id: ctx.request_id.to_string(),
            config_name: config.name.clone(),
            timestamp: ctx.timestamp,
            started: ctx.started,
            method: ctx.method.to_string(),
            client_path: full_path(ctx.path, ctx.query_string),
            original_headers: header_snapshot(ctx.original_headers),
            target_headers: header_snapshot(&headers),
            original_body_b64: encode_body(ctx.raw_body),
            filtered_body_b64: encode_body(&filtered_body),
            target_url,
            status,
        };

        tokio::spawn(drive_response_stream(
            self.hub.clone(),
            self.request_log.clone(),
            stream,
            tx,
            usage_parser,
            drive_ctx,
        ));

        let body = StreamBody::new(ReceiverStream::new(rx)).boxed();
        let mut builder = Response::builder().status(status);
        for (name, value) in response_headers.iter() {
            builder = builder.header(name, value);
        }
        Ok(builder.body(body)?)
    }

    async fn log_blocked(
        &self,
        service: &str,
        request_id: &str,
        timestamp: DateTime<Utc>,
        started: Instant,
        method: &Method,
        path: &str,
        query_string: Option<&str>,
        block: &crate::filters::endpoint::BlockMatch,
    ) {
        let record = RequestRecord {
            id: request_id.to_string(),
            service: service.to_string(),
            timestamp,
            client_method: method.to_string(),
            client_path: full_path(path, query_string),
            original_headers: HashMap::new(),
            target_headers: HashMap::new(),
            original_body_b64: String::new(),
            filtered_body_b64: String::new(),
            target_url: String::new(),
            config_name: None,
            channel: None,
            status_code: Some(block.status.as_u16()),
            response_content_b64: encode_body(block.message.as_bytes()),
            duration_ms: started.elapsed().as_millis() as u64,
            blocked: true,
            blocked_by: Some(block.rule_id.clone()),
            blocked_reason: Some(block.message.clone()),
            usage: UsageTotals::default(),
        };
        metrics::REQUEST_FAILURE.with_label_values(&[service, "blocked"]).inc();
        self.hub
            .publish(
                service,
                lifecycle_event("request_started", service, request_id, serde_json::json!({})),
            )
            .await;
        self.hub
            .publish(
                service,
                lifecycle_event(
                    "request_completed",
                    service,
                    request_id,
                    serde_json::json!({
                        "success": false,
                        "reason": "blocked",
                    }),
                ),
            )
            .await;
        self.request_log.append(record).await;
    }

    async fn log_failure(&self, ctx: &RequestContext<'_>, config: &UpstreamConfig, err: &GatewayError) {
        let status = err.status_code();
        let message = err.to_string();
        let record = RequestRecord {
            id: ctx.request_id.to_string(),
            service: ctx.service.to_string(),
            timestamp: ctx.timestamp,
            client_method: ctx.method.to_string(),
            client_path: full_path(ctx.path, ctx.query_string),
            original_headers: header_snapshot(ctx.original_headers),
            target_headers: HashMap::new(),
            original_body_b64: encode_body(ctx.raw_body),
            filtered_body_b64: String::new(),
            target_url: format!(
                "{}{}",
                config.base_url.trim_end_matches('/'),
                full_path(ctx.path, ctx.query_string)
            ),
            config_name: Some(config.name.clone()),
            channel: Some(config.name.clone()),
            status_code: Some(status.as_u16()),
            response_content_b64: encode_body(message.as_bytes()),
            duration_ms: ctx.started.elapsed().as_millis() as u64,
            blocked: false,
            blocked_by: None,
            blocked_reason: None,
            usage: UsageTotals::default(),
        };
        metrics::REQUEST_LATENCY
            .with_label_values(&[ctx.service])
            .observe(ctx.started.elapsed().as_secs_f64());
        self.hub
            .publish(
                ctx.service,
                lifecycle_event(
                    "request_failed",
                    ctx.service,
                    ctx.request_id,
                    serde_json::json!({
                        "config_name": config.name,
                        "status": status.as_u16(),
                    }),
                ),
            )
            .await;
        self.request_log.append(record).await;
    }
}

/// Everything [`drive_response_stream`] needs that doesn't borrow from the request:
/// it runs in a detached task so the caller can hand the streaming body to hyper
/// immediately instead of waiting for the upstream to finish.
struct DriveContext {
    service: String,
    request_id: String,
    config_name: String,
    timestamp: DateTime<Utc>,
    started: Instant,
    method: String,
    client_path: String,
    original_headers: HashMap<String, String>,
    target_headers: HashMap<String, String>,
    original_body_b64: String,
    filtered_body_b64: String,
    target_url: String,
    status: StatusCode,
}

/// Phase 5/7 for the success path: forwards each upstream chunk to the client as
/// soon as it arrives, feeds it to the usage parser, and captures up to
/// `MAX_BODY_BYTES` of it for the request log, publishing a `request_progress`
/// event per chunk. If the client goes away mid-stream (the forwarding channel
/// closes), the upstream stream is dropped immediately rather than drained to
/// completion, and the final `request_completed` event is published with
/// `success: false` and a `client_cancelled` reason.
async fn drive_response_stream(
    hub: Arc<RealtimeHub>,
    request_log: Arc<RequestLog>,
    mut stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    tx: mpsc::Sender<Result<Frame<Bytes>, GatewayError>>,
    mut usage_parser: UsageParser,
    ctx: DriveContext,
) {
    let mut captured: Vec<u8> = Vec::new();
    let mut client_connected = true;

    while let Some(next) = stream.next().await {
        match next {
            Ok(chunk) => {
                usage_parser.feed(&chunk);
                if captured.len() < MAX_BODY_BYTES {
                    let remaining = MAX_BODY_BYTES - captured.len();
                    captured.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
                }
                if tx.send(Ok(Frame::data(chunk.clone()))).await.is_err() {
                    client_connected = false;
                    break;
                }
                hub.publish(
                    &ctx.service,
                    lifecycle_event(
                        "request_progress",
                        &ctx.service,
                        &ctx.request_id,
                        serde_json::json!({
                            "status": ctx.status.as_u16(),
                            "duration_ms": ctx.started.elapsed().as_millis() as u64,
                            "response_delta": String::from_utf8_lossy(&chunk).into_owned(),
                        }),
                    ),
                )
                .await;
            }
            Err(e) => {
                warn!("upstream stream error for '{}' on '{}': {e}", ctx.service, ctx.config_name);
                break;
            }
        }
    }
    // `stream` is dropped here whether or not we drained it to completion, which
    // aborts the upstream connection when the client disconnected mid-stream.
    drop(stream);

    let cancelled = !client_connected;
    let usage = usage_parser.finish();
    metrics::track_usage(&ctx.service, &usage);
    if cancelled {
        metrics::REQUEST_FAILURE
            .with_label_values(&[ctx.service.as_str(), "client_cancelled"])
            .inc();
    } else {
        metrics::REQUEST_SUCCESS.with_label_values(&[ctx.service.as_str()]).inc();
    }
    metrics::REQUEST_LATENCY
        .with_label_values(&[ctx.service.as_str()])
        .observe(ctx.started.elapsed().as_secs_f64());

    let record = RequestRecord {
        id: ctx.request_id.clone(),
        service: ctx.service.clone(),
        timestamp: ctx.timestamp,
        client_method: ctx.method,
        client_path: ctx.client_path,
        original_headers: ctx.original_headers,
        target_headers: ctx.target_headers,
        original_body_b64: ctx.original_body_b64,
        filtered_body_b64: ctx.filtered_body_b64,
        target_url: ctx.target_url,
        config_name: Some(ctx.config_name.clone()),
        channel: Some(ctx.config_name.clone()),
        status_code: Some(ctx.status.as_u16()),
        response_content_b64: encode_body(&captured),
        duration_ms: ctx.started.elapsed().as_millis() as u64,
        blocked: false,
        blocked_by: None,
        blocked_reason: None,
        usage,
    };

    let reason = cancelled.then(|| GatewayError::ClientCancelled.to_string());
    hub.publish(
        &ctx.service,
        lifecycle_event(
            "request_completed",
            &ctx.service,
            &ctx.request_id,
            serde_json::json!({
                "config_name": ctx.config_name,
                "status": ctx.status.as_u16(),
                "usage": record.usage.clone(),
                "success": !cancelled,
                "reason": reason,
            }),
        ),
    )
    .await;

    request_log.append(record).await;
}

/// Stamps an `lb_*`/`request_*` event with the fields every subscriber can rely on:
/// `type`, `service`, `timestamp`, and `request_id`. `extra` supplies whatever else
/// is specific to that event type and must be a JSON object (or `json!({})`).
fn lifecycle_event(event_type: &str, service: &str, request_id: &str, extra: Value) -> Value {
    let mut map = match extra {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    map.insert("type".to_string(), Value::String(event_type.to_string()));
    map.insert("service".to_string(), Value::String(service.to_string()));
    map.insert("timestamp".to_string(), Value::String(Utc::now().to_rfc3339()));
    map.insert("request_id".to_string(), Value::String(request_id.to_string()));
    Value::Object(map)
}

fn parse_query(query: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for pair in query.split('&').filter(|s| !s.is_empty()) {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or("");
        let value = parts.next().unwrap_or("");
        if !key.is_empty() {
            map.insert(key.to_string(), value.to_string());
        }
    }
    map
}

fn full_path(path: &str, query: Option<&str>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("{path}?{q}"),
        _ => path.to_string(),
    }
}

fn header_value(headers: &HeaderMap, name: http::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

fn header_snapshot(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn is_json_content_type(content_type: &str) -> bool {
    let ct = content_type.split(';').next().unwrap_or("").trim();
    ct.is_empty() || ct.eq_ignore_ascii_case("application/json")
}

fn is_success_status(status: StatusCode) -> bool {
    status.is_success() || status == StatusCode::NOT_MODIFIED || status == StatusCode::TEMPORARY_REDIRECT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parsing_splits_pairs() {
        let map = parse_query("a=1&b=2&flag");
        assert_eq!(map.get("a"), Some(&"1".to_string()));
        assert_eq!(map.get("b"), Some(&"2".to_string()));
        assert!(!map.contains_key("flag"));
    }

    #[test]
    fn full_path_appends_query_when_present() {
        assert_eq!(full_path("/v1/messages", Some("beta=1")), "/v1/messages?beta=1");
        assert_eq!(full_path("/v1/messages", None), "/v1/messages");
        assert_eq!(full_path("/v1/messages", Some("")), "/v1/messages");
    }

    #[test]
    fn json_content_type_detection() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("application/json; charset=utf-8"));
        assert!(is_json_content_type(""));
        assert!(!is_json_content_type("text/plain"));
    }

    #[test]
    fn success_status_includes_redirects_used_by_upstreams() {
        assert!(is_success_status(StatusCode::OK));
        assert!(is_success_status(StatusCode::NOT_MODIFIED));
        assert!(is_success_status(StatusCode::TEMPORARY_REDIRECT));
        assert!(!is_success_status(StatusCode::BAD_GATEWAY));
    }

    #[test]
    fn claude_and_codex_specs_report_distinct_names() {
        assert_eq!(ClaudeSpec.name(), "claude");
        assert_eq!(CodexSpec.name(), "codex");
    }
}
