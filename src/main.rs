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

//! Binary entry point: wires the shared components, starts one listener per
//! service, and runs until killed.
use std::net::SocketAddr;
use std::sync::Arc;

use clp_gateway_core::auth::AuthConfig;
use clp_gateway_core::config::{clp_home, ConfigStore};
use clp_gateway_core::engine::{ClaudeSpec, CodexSpec, Engine, ServiceSpec};
use clp_gateway_core::filters::{BodyRewriter, EndpointBlocker, HeaderStripper};
use clp_gateway_core::health;
use clp_gateway_core::loadbalance::LoadBalancer;
use clp_gateway_core::logging;
use clp_gateway_core::realtime::RealtimeHub;
use clp_gateway_core::requestlog::RequestLog;
use clp_gateway_core::routing::Router;
use clp_gateway_core::server;

const DEFAULT_CLAUDE_PORT: u16 = 3210;
const DEFAULT_CODEX_PORT: u16 = 3211;

fn bind_addr(env_var: &str, default_port: u16) -> SocketAddr {
    let host = std::env::var(env_var).unwrap_or_else(|_| "127.0.0.1".to_string());
    format!("{host}:{default_port}")
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], default_port)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_level = std::env::var("CLP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let json_logging = std::env::var("CLP_JSON_LOGGING").is_ok();
    logging::setup_logging(&log_level, json_logging);
    health::mark_started();

    let config_store = Arc::new(ConfigStore::new());
    let endpoint_blocker = Arc::new(EndpointBlocker::new());
    let header_stripper = Arc::new(HeaderStripper::new());
    let body_rewriter = Arc::new(BodyRewriter::new());
    let router = Arc::new(Router::new());
    let load_balancer = Arc::new(LoadBalancer::new());
    let hub = Arc::new(RealtimeHub::new());
    let request_log = Arc::new(RequestLog::new());

    let engine = Arc::new(Engine::new(
        config_store,
        endpoint_blocker,
        header_stripper,
        body_rewriter,
        router,
        load_balancer,
        hub.clone(),
        request_log,
    ));

    let auth = Arc::new(AuthConfig::load(&clp_home().join("auth.json")));

    static CLAUDE: ClaudeSpec = ClaudeSpec;
    static CODEX: CodexSpec = CodexSpec;
    let claude_spec: &'static dyn ServiceSpec = &CLAUDE;
    let codex_spec: &'static dyn ServiceSpec = &CODEX;

    let claude_addr = bind_addr("CLP_PROXY_HOST", DEFAULT_CLAUDE_PORT);
    let codex_addr = bind_addr("CLP_PROXY_HOST", DEFAULT_CODEX_PORT);

    let claude = tokio::spawn(server::serve(
        claude_addr,
        engine.clone(),
        claude_spec,
        hub.clone(),
        auth.clone(),
    ));
    let codex = tokio::spawn(server::serve(
        codex_addr,
        engine,
        codex_spec,
        hub,
        auth,
    ));

    let (claude_result, codex_result) = tokio::join!(claude, codex);
    claude_result??;
    codex_result??;
    Ok(())
}
