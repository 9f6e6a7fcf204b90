//! Subscriber registry.
//!
//! Maps each live connection to the topic it asked for and the sink its
//! frames go to. Delivery is synchronous: a sink that cannot take a frame
//! right now is dropped from the registry rather than waited on.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use bera_state::AppId;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

pub type SubscriberId = u64;

/// Which events a subscriber wants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every application.
    All,
    App(AppId),
}

impl Topic {
    /// Build a topic from an optional `?app=` filter. Empty means all.
    pub fn from_filter(app: Option<&str>) -> Self {
        match app.map(str::trim) {
            Some(id) if !id.is_empty() => Topic::App(id.to_string()),
            _ => Topic::All,
        }
    }

    pub fn matches(&self, app_id: &str) -> bool {
        match self {
            Topic::All => true,
            Topic::App(id) => id == app_id,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("subscriber is gone")]
    Closed,
    #[error("subscriber buffer is full")]
    Full,
}

/// Destination for serialized frames of one subscriber.
pub trait EventSink: Send + Sync {
    fn send(&self, message: &str) -> Result<(), SinkError>;
}

impl EventSink for mpsc::Sender<String> {
    fn send(&self, message: &str) -> Result<(), SinkError> {
        self.try_send(message.to_string()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

struct Subscriber {
    topic: Topic,
    sink: Box<dyn EventSink>,
}

#[derive(Default)]
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, topic: Topic, sink: Box<dyn EventSink>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(subscriber = id, ?topic, "subscriber registered");
        self.write().insert(id, Subscriber { topic, sink });
        id
    }

    /// Returns true if the subscriber was registered.
    pub fn remove(&self, id: SubscriberId) -> bool {
        let removed = self.write().remove(&id).is_some();
        if removed {
            debug!(subscriber = id, "subscriber removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push `message` to every subscriber whose topic matches `app_id`.
    /// Subscribers whose sink fails are removed. Returns the number of
    /// successful deliveries.
    pub fn deliver(&self, app_id: &str, message: &str) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let subscribers = self.read();
            for (id, sub) in subscribers.iter() {
                if !sub.topic.matches(app_id) {
                    continue;
                }
                match sub.sink.send(message) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        debug!(subscriber = id, error = %e, "dropping subscriber");
                        dead.push(*id);
                    }
                }
            }
        }
        if !dead.is_empty() {
            let mut subscribers = self.write();
            for id in dead {
                subscribers.remove(&id);
            }
        }
        delivered
    }

    // A panic while holding the lock leaves the map itself intact.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SubscriberId, Subscriber>> {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SubscriberId, Subscriber>> {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner())
    }
}
