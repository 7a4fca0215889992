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

//! Token-based auth gate, a pre-engine tower middleware. Accepts the token via
//! `Authorization: Bearer clp_…`, `X-API-Key: clp_…`, or `?token=clp_…`. Disabled
//! by default; bypasses `/health`, `/ping`, and `/metrics` even when enabled.
use std::path::Path;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use http::{Request, Response};
use log::{debug, warn};
use serde::Deserialize;
use tower::{Layer, Service};

use crate::error::GatewayError;

#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct AuthTokenWire {
    token: String,
    #[serde(default)]
    active: bool,
}

#[derive(Debug, Deserialize, Default)]
struct AuthFileWire {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    tokens: Vec<AuthTokenWire>,
}

impl AuthConfig {
    /// Loads `auth.json`. The on-disk format carries a list of named, independently
    /// revocable tokens; this gate only needs one shared secret, so the first active
    /// token in the list wins. A missing or malformed file disables the gate.
    pub fn load(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Self::default(),
        };
        let file: AuthFileWire = match serde_json::from_str(&contents) {
            Ok(f) => f,
            Err(e) => {
                warn!("auth.json malformed, disabling authentication: {e}");
                return Self::default();
            }
        };
        let token = file.tokens.into_iter().find(|t| t.active).map(|t| t.token);
        Self {
            enabled: file.enabled,
            token,
        }
    }
}

const BYPASS_PATHS: &[&str] = &["/health", "/ping", "/metrics"];

fn extract_token<B>(req: &Request<B>) -> Option<String> {
    if let Some(header) = req.headers().get(http::header::AUTHORIZATION) {
        if let Ok(s) = header.to_str() {
            if let Some(bearer) = s.strip_prefix("Bearer ") {
                return Some(bearer.trim().to_string());
            }
        }
    }
    if let Some(header) = req.headers().get("x-api-key") {
        if let Ok(s) = header.to_str() {
            return Some(s.trim().to_string());
        }
    }
    if let Some(query) = req.uri().query() {
        for pair in query.split('&') {
            if let Some(value) = pair.strip_prefix("token=") {
                return Some(value.to_string());
            }
        }
    }
    None
}

#[derive(Clone)]
pub struct AuthLayer {
    config: Arc<AuthConfig>,
}

impl AuthLayer {
    pub fn new(config: Arc<AuthConfig>) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, service: S) -> Self::Service {
        AuthService {
            inner: service,
            config: self.config.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    config: Arc<AuthConfig>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for AuthService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<GatewayError> + Send,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = GatewayError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let bypass = BYPASS_PATHS.contains(&req.uri().path());
        if bypass || !self.config.enabled {
            let mut inner = self.inner.clone();
            std::mem::swap(&mut self.inner, &mut inner);
            return Box::pin(async move { inner.call(req).await.map_err(Into::into) });
        }

        let Some(expected) = self.config.token.as_deref() else {
            let mut inner = self.inner.clone();
            std::mem::swap(&mut self.inner, &mut inner);
            return Box::pin(async move { inner.call(req).await.map_err(Into::into) });
        };

        match extract_token(&req) {
            Some(token) if token == expected => {
                let mut inner = self.inner.clone();
                std::mem::swap(&mut self.inner, &mut inner);
                Box::pin(async move { inner.call(req).await.map_err(Into::into) })
            }
            _ => {
                debug!("rejecting request to {} with invalid or missing token", req.uri().path());
                Box::pin(async { Err(GatewayError::AuthFailed) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(header: Option<(&str, &str)>, query: Option<&str>) -> Request<()> {
        let uri = match query {
            Some(q) => format!("/v1/messages?{q}"),
            None => "/v1/messages".to_string(),
        };
        let mut builder = Request::builder().uri(uri);
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn bearer_token_extracted() {
        let req = request_with(Some(("authorization", "Bearer clp_abc")), None);
        assert_eq!(extract_token(&req), Some("clp_abc".to_string()));
    }

    #[test]
    fn api_key_header_extracted() {
        let req = request_with(Some(("x-api-key", "clp_xyz")), None);
        assert_eq!(extract_token(&req), Some("clp_xyz".to_string()));
    }

    #[test]
    fn query_param_extracted() {
        let req: Request<()> = request_with(None, Some("token=clp_qqq"));
        assert_eq!(extract_token(&req), Some("clp_qqq".to_string()));
    }

    #[test]
    fn missing_token_is_none() {
        let req = request_with(None, None);
        assert_eq!(extract_token(&req), None);
    }
}
