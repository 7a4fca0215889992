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

//! `GET /health` and `GET /ping`: bypass authentication, always return 200.
use std::sync::OnceLock;
use std::time::Instant;

use bytes::Bytes;
use http::{Response, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Full};

use crate::error::GatewayError;

static START: OnceLock<Instant> = OnceLock::new();

pub fn mark_started() {
    START.get_or_init(Instant::now);
}

fn uptime_seconds() -> u64 {
    START.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

pub fn health_response() -> Result<Response<BoxBody<Bytes, GatewayError>>, GatewayError> {
    let body = serde_json::json!({
        "status": "OK",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime_seconds(),
    });
    let bytes = Bytes::from(serde_json::to_vec(&body)?);
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Full::from(bytes).map_err(|never: std::convert::Infallible| match never {}).boxed())?)
}

pub fn ping_response() -> Result<Response<BoxBody<Bytes, GatewayError>>, GatewayError> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(
            Full::from(Bytes::from_static(b"{\"status\":\"OK\"}"))
                .map_err(|never: std::convert::Infallible| match never {})
                .boxed(),
        )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_response_is_200() {
        mark_started();
        let resp = health_response().unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn ping_response_is_200() {
        let resp = ping_response().unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
