// Event bus: in-process pub/sub with prioritized, optionally asynchronous
// callbacks.
//
// Grounded on `networking/routing/queue.rs` (`BinaryHeap`-based priority
// queue guarded by `parking_lot::RwLock`, bounded capacity with
// drop-on-full) for the priority ordering and backpressure, and on
// `networking/routing/dispatcher.rs` (`tokio::task::JoinSet`-driven
// fan-out) for the async worker pool.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::error::{NodeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    PeerDiscovered,
    PeerConnected,
    PeerDisconnected,
    MessageReceived,
    MessageSent,
    MessageFailed,
    FileTransferStarted,
    FileTransferProgress,
    FileTransferCompleted,
    FileTransferFailed,
    NodeStarted,
    NodeStopping,
    Error,
    PerformanceWarning,
    ReputationPromoted,
    TraversalNeedsRendezvous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Ui,
    Api,
    System,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub id: u64,
    pub event_type: EventType,
    pub source_component: String,
    pub timestamp: u64,
    pub payload: HashMap<String, String>,
}

impl Event {
    pub fn new(event_type: EventType, source_component: impl Into<String>) -> Self {
        Self {
            id: next_event_id(),
            event_type,
            source_component: source_component.into(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            payload: HashMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }
}

fn next_event_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone)]
pub struct SubscriberOptions {
    pub priority: i32,
    pub r#async: bool,
    pub timeout: Option<Duration>,
    pub retry_count: u8,
    pub debounce: Option<Duration>,
    pub type_tag: TypeTag,
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            r#async: true,
            timeout: None,
            retry_count: 0,
            debounce: None,
            type_tag: TypeTag::System,
        }
    }
}

pub type Callback = Arc<dyn Fn(&Event) -> std::result::Result<(), String> + Send + Sync>;

struct Subscriber {
    id: u64,
    options: SubscriberOptions,
    callback: Callback,
    error_count: AtomicU64,
    last_fired: Mutex<Option<Instant>>,
}

/// Wraps a queued event with its enqueue-order tiebreaker so `BinaryHeap`
/// orders by descending priority, then ascending sequence number (FIFO
/// within equal priority).
struct QueuedEvent {
    event: Event,
    sequence: u64,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}
impl Eq for QueuedEvent {}
impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse sequence so the heap (a max-heap) pops the oldest first.
        other.sequence.cmp(&self.sequence)
    }
}

pub struct EventBus {
    capacity: usize,
    queue: RwLock<BinaryHeap<QueuedEvent>>,
    sequence: AtomicU64,
    subscriber_id: AtomicU64,
    subscribers: RwLock<HashMap<EventType, Vec<Subscriber>>>,
    worker_permits: Semaphore,
}

impl EventBus {
    pub fn new(capacity: usize, worker_count: usize) -> Self {
        Self {
            capacity,
            queue: RwLock::new(BinaryHeap::new()),
            sequence: AtomicU64::new(0),
            subscriber_id: AtomicU64::new(1),
            subscribers: RwLock::new(HashMap::new()),
            worker_permits: Semaphore::new(worker_count.max(1)),
        }
    }

    pub fn subscribe(&self, event_type: EventType, callback: Callback, options: SubscriberOptions) -> u64 {
        let id = self.subscriber_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.write();
        let list = subscribers.entry(event_type).or_default();
        list.push(Subscriber {
            id,
            options,
            callback,
            error_count: AtomicU64::new(0),
            last_fired: Mutex::new(None),
        });
        // Descending priority; ties keep subscription order since `sort_by`
        // is stable.
        list.sort_by(|a, b| b.options.priority.cmp(&a.options.priority));
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        let mut subscribers = self.subscribers.write();
        for list in subscribers.values_mut() {
            list.retain(|s| s.id != id);
        }
    }

    /// Enqueues to the bounded buffer; returns `BufferFull` rather than
    /// dropping silently.
    pub fn publish(&self, event: Event) -> Result<()> {
        let mut queue = self.queue.write();
        if queue.len() >= self.capacity {
            return Err(NodeError::ResourceExhausted("event buffer full".into()));
        }
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        queue.push(QueuedEvent { event, sequence });
        Ok(())
    }

    /// Invokes subscribers in descending-priority order on the caller's
    /// thread — deterministic, used by tests and latency-sensitive paths.
    pub fn publish_sync(&self, event: &Event) {
        let subscribers = self.subscribers.read();
        let Some(list) = subscribers.get(&event.event_type) else {
            return;
        };
        for subscriber in list {
            invoke(subscriber, event);
        }
    }

    /// Pop one event from the queue and fan it out to a worker task. Call
    /// this in a loop from the bus's owning task; it returns `false` when
    /// the queue was empty (caller should back off).
    pub async fn drain_one(self: &Arc<Self>, workers: &mut JoinSet<()>) -> bool {
        let queued = { self.queue.write().pop() };
        let Some(queued) = queued else {
            return false;
        };

        let bus = Arc::clone(self);
        let Ok(permit) = self.worker_permits.clone().acquire_owned().await else {
            return true;
        };
        workers.spawn(async move {
            let _permit = permit;
            bus.dispatch_async(queued.event).await;
        });
        true
    }

    async fn dispatch_async(&self, event: Event) {
        let subscribers = self.subscribers.read();
        if let Some(list) = subscribers.get(&event.event_type) {
            for subscriber in list {
                invoke(subscriber, &event);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Own `drain_one`'s poll loop: the bus otherwise just accumulates events
    /// that nothing ever dispatches. Runs until `cancel` reports shutdown,
    /// then waits out any in-flight dispatch workers before returning.
    pub fn spawn_dispatch_loop(self: Arc<Self>, mut cancel: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut workers = JoinSet::new();
            loop {
                tokio::select! {
                    _ = cancel.changed() => {
                        if *cancel.borrow() {
                            break;
                        }
                    }
                    drained = self.drain_one(&mut workers) => {
                        if !drained {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                    }
                }
            }
            while workers.join_next().await.is_some() {}
        })
    }
}

fn invoke(subscriber: &Subscriber, event: &Event) {
    if let Some(debounce) = subscriber.options.debounce {
        let mut last = subscriber.last_fired.lock();
        if let Some(prev) = *last {
            if prev.elapsed() < debounce {
                return;
            }
        }
        *last = Some(Instant::now());
    }

    let mut attempts = 0u8;
    loop {
        match (subscriber.callback)(event) {
            Ok(()) => return,
            Err(e) => {
                subscriber.error_count.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("event subscriber {} failed: {e}", subscriber.id);
                if attempts >= subscriber.options.retry_count {
                    return;
                }
                attempts += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn subscribers_fire_in_priority_order_p8() {
        let bus = EventBus::new(10, 1);
        let order = Arc::new(StdMutex::new(Vec::new()));

        let o1 = Arc::clone(&order);
        bus.subscribe(
            EventType::PeerConnected,
            Arc::new(move |_| {
                o1.lock().unwrap().push("s1-high");
                Ok(())
            }),
            SubscriberOptions {
                priority: 3,
                ..Default::default()
            },
        );
        let o2 = Arc::clone(&order);
        bus.subscribe(
            EventType::PeerConnected,
            Arc::new(move |_| {
                o2.lock().unwrap().push("s2-mid");
                Ok(())
            }),
            SubscriberOptions {
                priority: 2,
                ..Default::default()
            },
        );
        let o3 = Arc::clone(&order);
        bus.subscribe(
            EventType::PeerConnected,
            Arc::new(move |_| {
                o3.lock().unwrap().push("s3-low");
                Ok(())
            }),
            SubscriberOptions {
                priority: 1,
                ..Default::default()
            },
        );

        bus.publish_sync(&Event::new(EventType::PeerConnected, "test"));
        assert_eq!(*order.lock().unwrap(), vec!["s1-high", "s2-mid", "s3-low"]);
    }

    #[test]
    fn buffer_full_on_overflow_e5() {
        let bus = EventBus::new(3, 1);
        for _ in 0..3 {
            assert!(bus.publish(Event::new(EventType::PeerDiscovered, "test")).is_ok());
        }
        assert!(matches!(
            bus.publish(Event::new(EventType::PeerDiscovered, "test")),
            Err(NodeError::ResourceExhausted(_))
        ));
        assert_eq!(bus.len(), 3);
    }
}
