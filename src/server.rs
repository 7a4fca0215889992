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

//! HTTP server wiring: one listener per service, each serving the proxy surface
//! (everything forwarded through [`Engine::proxy`]) plus the ambient endpoints
//! every listener carries — `/health`, `/ping`, `/metrics`, and `/ws/realtime`.
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Incoming;
use hyper_tungstenite::tungstenite::Message;
use hyper_util::rt::{TokioExecutor, TokioIo};
use log::{error, info, warn};
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;
use tower::{Layer, ServiceExt};

use crate::auth::{AuthConfig, AuthLayer};
use crate::engine::{Engine, ServiceSpec};
use crate::error::GatewayError;
use crate::health;
use crate::realtime::RealtimeHub;

struct ListenerState {
    engine: Arc<Engine>,
    spec: &'static dyn ServiceSpec,
    hub: Arc<RealtimeHub>,
}

/// Binds and serves one service's listener until the process is killed. Each
/// accepted connection gets its own clone of the auth-gated router; `Arc`
/// clones underneath make this cheap per connection.
pub async fn serve(
    addr: SocketAddr,
    engine: Arc<Engine>,
    spec: &'static dyn ServiceSpec,
    hub: Arc<RealtimeHub>,
    auth: Arc<AuthConfig>,
) -> std::io::Result<()> {
    let state = Arc::new(ListenerState { engine, spec, hub });
    let base = tower::service_fn(move |req| route(state.clone(), req));
    let gated = AuthLayer::new(auth).layer(base);

    let listener = TcpListener::bind(addr).await?;
    info!("{} listening on {addr}", spec.name());

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("accept failed on {addr}: {e}");
                continue;
            }
        };
        let gated = gated.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let hyper_svc = hyper::service::service_fn(move |req: Request<Incoming>| {
                let gated = gated.clone();
                async move {
                    let resp = gated
                        .oneshot(req)
                        .await
                        .unwrap_or_else(|err: GatewayError| err.into_response());
                    Ok::<_, Infallible>(resp)
                }
            });
            let result = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(io, hyper_svc)
                .await;
            if let Err(e) = result {
                warn!("connection from {peer} ended with error: {e}");
            }
        });
    }
}

async fn route(
    state: Arc<ListenerState>,
    mut req: Request<Incoming>,
) -> Result<Response<BoxBody<Bytes, GatewayError>>, GatewayError> {
    let path = req.uri().path().to_string();

    if req.method() == Method::GET && path == "/health" {
        return health::health_response();
    }
    if req.method() == Method::GET && path == "/ping" {
        return health::ping_response();
    }
    if req.method() == Method::GET && path == "/metrics" {
        return metrics_response();
    }
    if path == "/ws/realtime" && hyper_tungstenite::is_upgrade_request(&req) {
        return handle_websocket(state.spec, state.hub.clone(), &mut req).await;
    }

    state.engine.proxy(state.spec, req).await
}

fn metrics_response() -> Result<Response<BoxBody<Bytes, GatewayError>>, GatewayError> {
    let families = prometheus::gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&families, &mut buffer)
        .map_err(|e| GatewayError::InternalError {
            message: format!("failed to encode metrics: {e}"),
        })?;
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", encoder.format_type())
        .body(
            Full::from(Bytes::from(buffer))
                .map_err(|never: Infallible| match never {})
                .boxed(),
        )?)
}

async fn handle_websocket(
    spec: &'static dyn ServiceSpec,
    hub: Arc<RealtimeHub>,
    req: &mut Request<Incoming>,
) -> Result<Response<BoxBody<Bytes, GatewayError>>, GatewayError> {
    let (response, websocket) =
        hyper_tungstenite::upgrade(req, None).map_err(|e| GatewayError::InternalError {
            message: format!("websocket upgrade failed: {e}"),
        })?;

    let service = spec.name().to_string();
    tokio::spawn(async move {
        if let Err(e) = drive_websocket(service, hub, websocket).await {
            warn!("realtime websocket session ended: {e}");
        }
    });

    Ok(response.map(|body| body.map_err(|never: Infallible| match never {}).boxed()))
}

async fn drive_websocket(
    service: String,
    hub: Arc<RealtimeHub>,
    websocket: hyper_tungstenite::HyperWebsocket,
) -> Result<(), hyper_tungstenite::tungstenite::Error> {
    use futures::{SinkExt, StreamExt};

    let mut ws = websocket.await?;
    let mut subscription = hub.subscribe(&service).await;

    let greeting = serde_json::json!({"type": "connection", "service": service}).to_string();
    ws.send(Message::Text(greeting)).await?;

    loop {
        tokio::select! {
            event = subscription.recv() => {
                match event {
                    Some(event) => {
                        if ws.send(Message::Text(event.to_string())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = ws.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        error!("realtime websocket read error: {e}");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
    Ok(())
}
