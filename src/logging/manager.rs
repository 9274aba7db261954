// src/logging/manager.rs
//
// Serializes failure reporting per endpoint. Every endpoint gets one bounded
// channel and exactly one consumer task, created up front, so concurrent
// mirror failures for the same endpoint are emitted in receipt order and
// never interleave. Consumers exit once all senders are gone, which happens
// when the owning proxy is dropped.

use super::sink::{LogMessage, LogSink};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

pub struct LogManager {
    channels: HashMap<String, mpsc::Sender<LogMessage>>,
    sink: Arc<dyn LogSink>,
}

impl LogManager {
    /// Spawns one consumer per distinct name. Must run inside a Tokio runtime.
    pub fn new<I, S>(endpoints: I, sink: Arc<dyn LogSink>, buffer: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut channels = HashMap::new();

        for name in endpoints {
            let name = name.into();
            if channels.contains_key(&name) {
                continue;
            }

            let (tx, rx) = mpsc::channel(buffer.max(1));
            tokio::spawn(consume(name.clone(), rx, sink.clone()));
            channels.insert(name, tx);
        }

        debug!(consumers = channels.len(), "log manager started");

        Self { channels, sink }
    }

    /// Queues a message on its endpoint's channel.
    ///
    /// Waits only while that endpoint's buffer is full. Messages for an
    /// endpoint without a channel are emitted inline instead of dropped.
    pub async fn log(&self, message: LogMessage) {
        match self.channels.get(&message.endpoint) {
            Some(tx) => {
                if let Err(mpsc::error::SendError(message)) = tx.send(message).await {
                    // consumer gone, only possible while the runtime shuts down
                    self.sink.emit(message).await;
                }
            }
            None => self.sink.emit(message).await,
        }
    }

    pub fn consumer_count(&self) -> usize {
        self.channels.len()
    }

    pub fn has_consumer(&self, endpoint: &str) -> bool {
        self.channels.contains_key(endpoint)
    }
}

async fn consume(endpoint: String, mut rx: mpsc::Receiver<LogMessage>, sink: Arc<dyn LogSink>) {
    while let Some(message) = rx.recv().await {
        sink.emit(message).await;
    }
    debug!(%endpoint, "log consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records messages and flags any overlapping emit for the same endpoint.
    #[derive(Default)]
    struct RecordingSink {
        emitted: Mutex<Vec<LogMessage>>,
        active: Mutex<HashSet<String>>,
        overlaps: Mutex<usize>,
    }

    impl RecordingSink {
        async fn wait_for(&self, count: usize) -> Vec<LogMessage> {
            for _ in 0..500 {
                if self.emitted.lock().unwrap().len() >= count {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            self.emitted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LogSink for RecordingSink {
        async fn emit(&self, message: LogMessage) {
            if !self.active.lock().unwrap().insert(message.endpoint.clone()) {
                *self.overlaps.lock().unwrap() += 1;
            }
            tokio::task::yield_now().await;
            self.active.lock().unwrap().remove(&message.endpoint);
            self.emitted.lock().unwrap().push(message);
        }
    }

    #[tokio::test]
    async fn creates_one_consumer_per_distinct_endpoint() {
        let sink = Arc::new(RecordingSink::default());
        let manager = LogManager::new(["primary", "a", "b", "a"], sink, 8);

        assert_eq!(manager.consumer_count(), 3);
        assert!(manager.has_consumer("b"));
        assert!(!manager.has_consumer("c"));
    }

    #[tokio::test]
    async fn unregistered_endpoint_is_emitted_inline() {
        let sink = Arc::new(RecordingSink::default());
        let manager = LogManager::new(["primary"], sink.clone(), 8);

        manager.log(LogMessage::new("stranger", "failed")).await;

        let emitted = sink.emitted.lock().unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].endpoint, "stranger");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_bursts_are_serialized_per_endpoint() {
        const REQUESTS: usize = 50;
        let endpoints = ["a", "b", "c"];

        let sink = Arc::new(RecordingSink::default());
        let manager = Arc::new(LogManager::new(endpoints, sink.clone(), 4));

        let mut tasks = Vec::new();
        for i in 0..REQUESTS {
            for endpoint in endpoints {
                let manager = manager.clone();
                tasks.push(tokio::spawn(async move {
                    manager
                        .log(LogMessage::new(endpoint, format!("failure {i}")))
                        .await;
                }));
            }
        }
        futures::future::join_all(tasks).await;

        let emitted = sink.wait_for(REQUESTS * endpoints.len()).await;
        assert_eq!(emitted.len(), REQUESTS * endpoints.len());
        assert_eq!(*sink.overlaps.lock().unwrap(), 0);
        for endpoint in endpoints {
            let count = emitted.iter().filter(|m| m.endpoint == endpoint).count();
            assert_eq!(count, REQUESTS);
        }
    }

    #[tokio::test]
    async fn preserves_order_from_a_single_producer() {
        let sink = Arc::new(RecordingSink::default());
        let manager = LogManager::new(["a"], sink.clone(), 2);

        for i in 0..20 {
            manager.log(LogMessage::new("a", i.to_string())).await;
        }

        let emitted = sink.wait_for(20).await;
        let summaries: Vec<_> = emitted.iter().map(|m| m.summary.clone()).collect();
        let expected: Vec<_> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(summaries, expected);
    }
}
