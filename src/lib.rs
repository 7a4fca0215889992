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

//! CLP gateway core: a local reverse proxy sitting between AI CLI clients and
//! their upstream HTTP APIs. Each request passes through a filter chain
//! (endpoint blocking, header stripping, body rewriting), gets routed and
//! load-balanced to an upstream config, streamed back to the client, and
//! logged — with usage parsed off the wire and lifecycle events published to
//! the realtime hub along the way.
pub mod auth;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod filters;
pub mod health;
pub mod loadbalance;
pub mod logging;
pub mod metrics;
pub mod realtime;
pub mod requestlog;
pub mod routing;
pub mod server;
pub mod usage;
