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

//! HTTP client configuration for upstream requests: a shared pool the engine uses
//! for every outgoing call, regardless of which service or config is selected.
use std::time::Duration;

use log::info;
use reqwest::{Client, ClientBuilder};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const POOL_IDLE_PER_HOST: usize = 100;

/// Builds the client the Proxy Engine uses for every upstream call. No overall
/// request timeout is set: streamed responses may legitimately run far longer
/// than any fixed budget, so only connect and read-idle timeouts apply.
pub fn build_upstream_client() -> Client {
    let client = ClientBuilder::new()
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(READ_IDLE_TIMEOUT)
        .pool_max_idle_per_host(POOL_IDLE_PER_HOST)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .user_agent(format!("clp-gatewayd/{}", env!("CARGO_PKG_VERSION")))
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .build()
        .expect("failed to build upstream HTTP client");

    info!(
        "upstream HTTP client ready: connect_timeout={}s, read_idle_timeout={}s, keep_alive_per_host={}",
        CONNECT_TIMEOUT.as_secs(),
        READ_IDLE_TIMEOUT.as_secs(),
        POOL_IDLE_PER_HOST
    );

    client
}
