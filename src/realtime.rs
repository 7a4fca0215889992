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

//! Realtime Hub: process-wide pub/sub for lifecycle events, keyed by service. Each
//! subscriber gets a bounded queue; a slow consumer silently drops the oldest
//! events rather than back-pressuring the publisher, which is exactly the lag
//! behavior `tokio::sync::broadcast` gives for free.
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

pub struct Subscription {
    pub service: String,
    receiver: broadcast::Receiver<Arc<Value>>,
}

impl Subscription {
    /// Waits for the next event, skipping over any that were dropped due to lag
    /// (the consumer fell behind and missed the oldest ones).
    pub async fn recv(&mut self) -> Option<Arc<Value>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[derive(Default)]
pub struct RealtimeHub {
    channels: RwLock<HashMap<String, broadcast::Sender<Arc<Value>>>>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    async fn sender_for(&self, service: &str) -> broadcast::Sender<Arc<Value>> {
        {
            let guard = self.channels.read().await;
            if let Some(tx) = guard.get(service) {
                return tx.clone();
            }
        }
        let mut guard = self.channels.write().await;
        guard
            .entry(service.to_string())
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_QUEUE_CAPACITY).0)
            .clone()
    }

    pub async fn subscribe(&self, service: &str) -> Subscription {
        let tx = self.sender_for(service).await;
        Subscription {
            service: service.to_string(),
            receiver: tx.subscribe(),
        }
    }

    /// Enqueues `event` to every current subscriber of `service`. A service with no
    /// subscribers is a no-op (the broadcast send simply has nowhere to go).
    pub async fn publish(&self, service: &str, event: Value) {
        let tx = self.sender_for(service).await;
        let _ = tx.send(Arc::new(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let hub = RealtimeHub::new();
        let mut sub = hub.subscribe("claude").await;
        hub.publish("claude", json!({"type": "request_started"})).await;
        let event = sub.recv().await.unwrap();
        assert_eq!(event["type"], "request_started");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let hub = RealtimeHub::new();
        hub.publish("codex", json!({"type": "ping"})).await;
    }

    #[tokio::test]
    async fn events_are_keyed_by_service() {
        let hub = RealtimeHub::new();
        let mut claude_sub = hub.subscribe("claude").await;
        let mut codex_sub = hub.subscribe("codex").await;
        hub.publish("claude", json!({"type": "a"})).await;
        let event = claude_sub.recv().await.unwrap();
        assert_eq!(event["type"], "a");

        hub.publish("codex", json!({"type": "b"})).await;
        let event = codex_sub.recv().await.unwrap();
        assert_eq!(event["type"], "b");
    }

    #[tokio::test]
    async fn slow_subscriber_skips_lagged_events_instead_of_blocking() {
        let hub = RealtimeHub::new();
        let mut sub = hub.subscribe("claude").await;
        for i in 0..(SUBSCRIBER_QUEUE_CAPACITY + 10) {
            hub.publish("claude", json!({"type": "n", "i": i})).await;
        }
        // The receiver is far behind; recv() should still return the newest events
        // rather than hang or error permanently.
        let event = sub.recv().await.unwrap();
        assert_eq!(event["type"], "n");
    }
}
