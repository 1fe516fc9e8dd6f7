/// Event journal: pub/sub fan-out plus an append-only JSONL audit trail
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, warn};

use super::types::{Event, EventType};
use crate::error::{Result, TradingError};

pub type EventHandler =
    Arc<dyn Fn(Event) -> futures_util::future::BoxFuture<'static, Result<()>> + Send + Sync>;

pub struct EventBus {
    /// Subscribers for each event type
    subscribers: Arc<RwLock<HashMap<EventType, Vec<EventHandler>>>>,

    /// Channel for publishing events
    tx: mpsc::UnboundedSender<Event>,
    rx: Arc<RwLock<mpsc::UnboundedReceiver<Event>>>,

    /// Idempotency tracker (prevents duplicate event processing)
    processed_events: Arc<RwLock<HashSet<String>>>,

    /// Journal file path
    journal_path: String,
}

impl EventBus {
    pub fn new(journal_path: String) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        EventBus {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            tx,
            rx: Arc::new(RwLock::new(rx)),
            processed_events: Arc::new(RwLock::new(HashSet::new())),
            journal_path,
        }
    }

    pub async fn subscribe(&self, event_type: EventType, handler: EventHandler) {
        let mut subscribers = self.subscribers.write().await;
        subscribers.entry(event_type).or_default().push(handler);
        debug!("Subscribed handler to event: {:?}", event_type);
    }

    /// Publish an event: journal it, then fan out to subscribers.
    /// A repeated idempotency key is rejected.
    pub async fn publish(&self, event: Event) -> Result<()> {
        {
            let mut processed = self.processed_events.write().await;
            if processed.contains(&event.idempotency_key) {
                warn!(
                    "Duplicate event detected: {} ({})",
                    event.event_type.as_str(),
                    event.idempotency_key
                );
                return Err(TradingError::DuplicateEvent(event.idempotency_key.clone()));
            }
            processed.insert(event.idempotency_key.clone());
        }

        self.journal(&event).await?;

        self.tx.send(event).map_err(|e| {
            TradingError::EventDispatchFailed(format!("Failed to send event: {}", e))
        })?;

        Ok(())
    }

    /// Start draining the queue into subscriber handlers
    pub async fn start_processing(&self) {
        let subscribers = Arc::clone(&self.subscribers);
        let rx = Arc::clone(&self.rx);

        tokio::spawn(async move {
            let mut rx = rx.write().await;

            while let Some(event) = rx.recv().await {
                let event_type = event.event_type;

                let handlers = {
                    let subs = subscribers.read().await;
                    subs.get(&event_type).cloned()
                };

                if let Some(handlers) = handlers {
                    for handler in handlers {
                        if let Err(e) = handler(event.clone()).await {
                            error!("Handler failed for event {:?}: {}", event_type, e);
                        }
                    }
                }
            }
        });
    }

    /// Append the event to the JSONL journal
    async fn journal(&self, event: &Event) -> Result<()> {
        use tokio::fs::OpenOptions;
        use tokio::io::AsyncWriteExt;

        let json_line = serde_json::to_string(event)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.journal_path)
            .await?;

        file.write_all(format!("{}\n", json_line).as_bytes()).await?;

        Ok(())
    }

    pub async fn processed_count(&self) -> usize {
        let processed = self.processed_events.read().await;
        processed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::EventPayload;

    fn journal_path(tag: &str) -> String {
        std::env::temp_dir()
            .join(format!("oiw_events_{}_{}.jsonl", tag, uuid::Uuid::new_v4()))
            .display()
            .to_string()
    }

    fn heartbeat() -> Event {
        Event::new(
            EventType::Heartbeat,
            EventPayload::Heartbeat {
                at: chrono::Utc::now(),
                open_positions: 0,
                cash: 100_000.0,
            },
        )
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let path = journal_path("pubsub");
        let bus = EventBus::new(path.clone());

        let called = Arc::new(RwLock::new(false));
        let called_clone = Arc::clone(&called);

        let handler: EventHandler = Arc::new(move |_event| {
            let called = Arc::clone(&called_clone);
            Box::pin(async move {
                let mut c = called.write().await;
                *c = true;
                Ok(())
            })
        });

        bus.subscribe(EventType::Heartbeat, handler).await;
        bus.start_processing().await;

        bus.publish(heartbeat()).await.unwrap();
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert!(*called.read().await);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_duplicate_event_rejected() {
        let path = journal_path("dedup");
        let bus = EventBus::new(path.clone());
        bus.start_processing().await;

        let event = heartbeat();
        assert!(bus.publish(event.clone()).await.is_ok());
        assert!(matches!(
            bus.publish(event).await,
            Err(TradingError::DuplicateEvent(_))
        ));
        assert_eq!(bus.processed_count().await, 1);

        let _ = std::fs::remove_file(&path);
    }
}
