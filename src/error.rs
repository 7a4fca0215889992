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

//! Crate-wide error type for the proxy engine.
use bytes::Bytes;
use http::{Response, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use serde_json::json;
use thiserror::Error;

pub trait IntoResponse {
    fn into_response(self) -> Response<BoxBody<Bytes, GatewayError>>;
}

/// All error kinds surfaced by the engine.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no healthy upstream configured for service '{service}'")]
    ConfigUnavailable { service: String },

    #[error("blocked by rule {rule_id}: {message}")]
    EndpointBlocked {
        rule_id: String,
        status: StatusCode,
        message: String,
    },

    #[error("authentication failed")]
    AuthFailed,

    #[error("upstream connect timed out for config '{config_name}'")]
    UpstreamConnect { config_name: String },

    #[error("upstream read timed out for config '{config_name}'")]
    UpstreamTimeout { config_name: String },

    #[error("upstream returned status {status}")]
    UpstreamStatusError {
        status: StatusCode,
        headers: http::HeaderMap,
        body: Bytes,
    },

    #[error("client disconnected")]
    ClientCancelled,

    #[error("internal error: {message}")]
    InternalError { message: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] http::Error),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ConfigUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::EndpointBlocked { status, .. } => *status,
            Self::AuthFailed => StatusCode::UNAUTHORIZED,
            Self::UpstreamConnect { .. } | Self::UpstreamTimeout { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::UpstreamStatusError { status, .. } => *status,
            Self::ClientCancelled => StatusCode::BAD_REQUEST,
            Self::InternalError { .. }
            | Self::Json(_)
            | Self::Io(_)
            | Self::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            Self::ConfigUnavailable { .. } => "config_unavailable",
            Self::EndpointBlocked { .. } => "endpoint_blocked",
            Self::AuthFailed => "auth_failed",
            Self::UpstreamConnect { .. } => "upstream_connect",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::UpstreamStatusError { .. } => "upstream_status_error",
            Self::ClientCancelled => "client_cancelled",
            Self::InternalError { .. } => "internal_error",
            Self::Json(_) => "json_error",
            Self::Io(_) => "io_error",
            Self::Http(_) => "http_error",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response<BoxBody<Bytes, GatewayError>> {
        // Upstream status errors are propagated verbatim: status, headers, and body
        // pass through untouched rather than being wrapped.
        if let Self::UpstreamStatusError {
            status,
            ref headers,
            ref body,
        } = self
        {
            let mut builder = Response::builder().status(status);
            for (name, value) in headers.iter() {
                builder = builder.header(name, value);
            }
            let body = Full::from(body.clone())
                .map_err(|never: std::convert::Infallible| match never {})
                .boxed();
            if let Ok(resp) = builder.body(body) {
                return resp;
            }
        }

        let status = self.status_code();
        let message = self.to_string();
        let error_type = self.error_type();
        let body = json!({
            "error": {
                "type": error_type,
                "message": message,
                "status": status.as_u16(),
            }
        });
        let bytes = Bytes::from(serde_json::to_vec(&body).unwrap_or_default());
        let body = Full::from(bytes)
            .map_err(|never: std::convert::Infallible| match never {})
            .boxed();

        Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(body)
            .unwrap_or_else(|_| {
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(
                        Full::from(Bytes::from_static(b"internal error"))
                            .map_err(|never: std::convert::Infallible| match never {})
                            .boxed(),
                    )
                    .expect("static error response must build")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_unavailable_maps_to_503() {
        let err = GatewayError::ConfigUnavailable {
            service: "claude".into(),
        };
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn endpoint_blocked_uses_rule_status() {
        let err = GatewayError::EndpointBlocked {
            rule_id: "r1".into(),
            status: StatusCode::FORBIDDEN,
            message: "disabled".into(),
        };
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn auth_failed_maps_to_401() {
        assert_eq!(GatewayError::AuthFailed.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn upstream_status_error_propagates_body_verbatim() {
        let mut headers = http::HeaderMap::new();
        headers.insert("x-upstream", "1".parse().unwrap());
        let err = GatewayError::UpstreamStatusError {
            status: StatusCode::TOO_MANY_REQUESTS,
            headers,
            body: Bytes::from_static(b"rate limited"),
        };
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get("x-upstream").unwrap(), "1");
    }
}
