//! The event bus.
//!
//! `publish` is persist-then-deliver under a per-app lane lock, so every
//! subscriber sees an app's events in the order they were written to the
//! log store. Different apps never wait on each other's commits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bera_state::{LogEvent, LogStore};
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::error::StreamError;
use crate::message::StreamMessage;
use crate::registry::{EventSink, SubscriberId, SubscriberRegistry, Topic};

pub struct EventBus {
    store: Arc<dyn LogStore>,
    registry: SubscriberRegistry,
    lanes: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EventBus {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self {
            store,
            registry: SubscriberRegistry::new(),
            lanes: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, topic: Topic, sink: Box<dyn EventSink>) -> SubscriberId {
        self.registry.register(topic, sink)
    }

    /// Register a bounded channel sink and hand back its receiving end.
    pub fn subscribe_channel(
        &self,
        topic: Topic,
        buffer: usize,
    ) -> (SubscriberId, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let id = self.subscribe(topic, Box::new(tx));
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.registry.remove(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    /// Persist `event`, then deliver it to every matching subscriber.
    ///
    /// Returns the number of deliveries. A persistence failure is reported
    /// as an error, but live delivery has already happened by then.
    pub fn publish(&self, event: &LogEvent) -> Result<usize, StreamError> {
        let frame = StreamMessage::from(event).to_json()?;

        let lane = self.lane(&event.app_id);
        let (persisted, delivered) = {
            let _guard = lane.lock().unwrap_or_else(|e| e.into_inner());
            let persisted = self.store.append_log(event);
            (persisted, self.registry.deliver(&event.app_id, &frame))
        };
        self.release_lane(&event.app_id, lane);

        match persisted {
            Ok(seq) => {
                trace!(app_id = %event.app_id, seq, delivered, "log event published");
                Ok(delivered)
            }
            Err(e) => {
                warn!(app_id = %event.app_id, error = %e, delivered, "log event not persisted");
                Err(StreamError::Persistence {
                    reason: e.to_string(),
                    delivered,
                })
            }
        }
    }

    fn lane(&self, app_id: &str) -> Arc<Mutex<()>> {
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        lanes.entry(app_id.to_string()).or_default().clone()
    }

    /// Drop the lane once no other publisher holds it.
    fn release_lane(&self, app_id: &str, lane: Arc<Mutex<()>>) {
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one here.
        if Arc::strong_count(&lane) == 2 {
            lanes.remove(app_id);
        }
    }

    #[cfg(test)]
    fn lane_count(&self) -> usize {
        self.lanes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    use bera_state::{StateError, StateResult, StateStore};

    use crate::message::LogPayload;

    struct FlakyLogs {
        inner: StateStore,
        fail: AtomicBool,
    }

    impl LogStore for FlakyLogs {
        fn append_log(&self, event: &LogEvent) -> StateResult<u64> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StateError::Unavailable("disk full".into()));
            }
            self.inner.append_log(event)
        }
    }

    /// Blocks appends for the "slow" app until the gate opens.
    struct GatedLogs {
        inner: StateStore,
        entered: Mutex<std_mpsc::Sender<()>>,
        gate: Mutex<std_mpsc::Receiver<()>>,
    }

    impl LogStore for GatedLogs {
        fn append_log(&self, event: &LogEvent) -> StateResult<u64> {
            if event.app_id == "slow" {
                self.entered.lock().unwrap().send(()).unwrap();
                self.gate.lock().unwrap().recv().unwrap();
            }
            self.inner.append_log(event)
        }
    }

    fn setup() -> (StateStore, EventBus) {
        let store = StateStore::open_in_memory().unwrap();
        let bus = EventBus::new(Arc::new(store.clone()));
        (store, bus)
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut contents = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let message: StreamMessage = serde_json::from_str(&frame).unwrap();
            let StreamMessage::Log(LogPayload { content, .. }) = message;
            contents.push(content);
        }
        contents
    }

    #[test]
    fn subscribers_see_publish_order() {
        let (store, bus) = setup();
        let (_, mut rx1) = bus.subscribe_channel(Topic::All, 64);
        let (_, mut rx2) = bus.subscribe_channel(Topic::All, 64);

        for i in 0..10 {
            assert_eq!(bus.publish(&LogEvent::build("app1", format!("line {i}"))).unwrap(), 2);
        }

        let expected: Vec<String> = (0..10).map(|i| format!("line {i}")).collect();
        assert_eq!(drain(&mut rx1), expected);
        assert_eq!(drain(&mut rx2), expected);

        let persisted: Vec<String> = store
            .recent_logs("app1", 100)
            .unwrap()
            .into_iter()
            .map(|l| l.content)
            .collect();
        assert_eq!(persisted, expected);
    }

    #[test]
    fn late_subscriber_gets_no_replay() {
        let (_, bus) = setup();
        bus.publish(&LogEvent::build("app1", "early")).unwrap();
        let (_, mut rx) = bus.subscribe_channel(Topic::All, 8);
        bus.publish(&LogEvent::build("app1", "late")).unwrap();
        assert_eq!(drain(&mut rx), vec!["late".to_string()]);
    }

    #[test]
    fn no_subscribers_still_persists() {
        let (store, bus) = setup();
        assert_eq!(bus.publish(&LogEvent::build("app1", "alone")).unwrap(), 0);
        assert_eq!(store.recent_logs("app1", 10).unwrap().len(), 1);
    }

    #[test]
    fn dead_subscriber_is_dropped_and_others_continue() {
        let (_, bus) = setup();
        let (_, rx_dead) = bus.subscribe_channel(Topic::All, 8);
        let (_, mut rx_live) = bus.subscribe_channel(Topic::All, 8);
        drop(rx_dead);

        assert_eq!(bus.publish(&LogEvent::build("app1", "hello")).unwrap(), 1);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(drain(&mut rx_live), vec!["hello".to_string()]);
    }

    #[test]
    fn topic_filter_delivers_only_matching_app() {
        let (_, bus) = setup();
        let (_, mut rx_a) = bus.subscribe_channel(Topic::App("a".into()), 8);
        let (_, mut rx_all) = bus.subscribe_channel(Topic::All, 8);

        bus.publish(&LogEvent::build("a", "for a")).unwrap();
        bus.publish(&LogEvent::build("b", "for b")).unwrap();

        assert_eq!(drain(&mut rx_a), vec!["for a".to_string()]);
        assert_eq!(drain(&mut rx_all), vec!["for a".to_string(), "for b".to_string()]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let (_, bus) = setup();
        let (id, mut rx) = bus.subscribe_channel(Topic::All, 8);
        assert!(bus.unsubscribe(id));
        bus.publish(&LogEvent::build("a", "nobody")).unwrap();
        assert!(drain(&mut rx).is_empty());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn persistence_failure_still_delivers() {
        let store = StateStore::open_in_memory().unwrap();
        let logs = Arc::new(FlakyLogs {
            inner: store.clone(),
            fail: AtomicBool::new(true),
        });
        let bus = EventBus::new(logs.clone());
        let (_, mut rx) = bus.subscribe_channel(Topic::All, 8);

        let err = bus.publish(&LogEvent::build("a", "unsaved")).unwrap_err();
        assert!(matches!(err, StreamError::Persistence { delivered: 1, .. }));
        assert_eq!(drain(&mut rx), vec!["unsaved".to_string()]);
        assert!(store.recent_logs("a", 10).unwrap().is_empty());

        logs.fail.store(false, Ordering::SeqCst);
        assert_eq!(bus.publish(&LogEvent::build("a", "saved")).unwrap(), 1);
    }

    #[test]
    fn concurrent_publishers_deliver_in_persisted_order() {
        let (store, bus) = setup();
        let bus = Arc::new(bus);
        let (_, mut rx) = bus.subscribe_channel(Topic::App("a".into()), 1024);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let bus = bus.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        bus.publish(&LogEvent::build("a", format!("{t}-{i}"))).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let live = drain(&mut rx);
        let persisted: Vec<String> = store
            .recent_logs("a", 1000)
            .unwrap()
            .into_iter()
            .map(|l| l.content)
            .collect();
        assert_eq!(live.len(), 100);
        assert_eq!(live, persisted);
    }

    #[test]
    fn slow_app_does_not_block_other_apps() {
        let store = StateStore::open_in_memory().unwrap();
        let (entered_tx, entered_rx) = std_mpsc::channel();
        let (gate_tx, gate_rx) = std_mpsc::channel();
        let bus = Arc::new(EventBus::new(Arc::new(GatedLogs {
            inner: store.clone(),
            entered: Mutex::new(entered_tx),
            gate: Mutex::new(gate_rx),
        })));

        let slow = {
            let bus = bus.clone();
            std::thread::spawn(move || bus.publish(&LogEvent::build("slow", "stuck")).unwrap())
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let (done_tx, done_rx) = std_mpsc::channel();
        let fast = {
            let bus = bus.clone();
            std::thread::spawn(move || {
                bus.publish(&LogEvent::build("fast", "through")).unwrap();
                done_tx.send(()).unwrap();
            })
        };
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("publish for another app waited on the slow one");
        assert_eq!(store.recent_logs("fast", 10).unwrap().len(), 1);
        assert!(store.recent_logs("slow", 10).unwrap().is_empty());

        gate_tx.send(()).unwrap();
        slow.join().unwrap();
        fast.join().unwrap();
        assert_eq!(store.recent_logs("slow", 10).unwrap().len(), 1);
        assert_eq!(bus.lane_count(), 0);
    }
}
