// =============================================================================
// Event Bus (C3) — typed pub/sub with priority, backpressure, and isolation
// =============================================================================
//
// Generalizes the per-agent mpsc channel registry pattern: every subscriber
// owns a bounded priority mailbox; publishing fans a message out to every
// matching subscriber's mailbox according to that subscriber's backpressure
// policy. A subscriber callback is never invoked directly by the publisher —
// delivery is always through the mailbox, so one slow or panicking consumer
// cannot block or corrupt another's view of the bus.
//
// Delivery order per subscriber is priority-first, creation-time second:
// a plain FIFO channel can't give a `Critical` message sitting behind a
// backlog of `Low` ones priority, so each subscriber's mailbox is a small
// sorted buffer drained by its `Receiver` rather than a raw `mpsc` queue.
// =============================================================================

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    BuySignal,
    SentimentChanged,
    NewLearning,
    PriceAlert,
    TradeClosed,
    ComponentAlert,
    ControlShutdown,
    /// Inbound content awaiting a moderation verdict.
    ContentReceived,
    /// A moderation verdict reached for a prior `ContentReceived` message.
    ModerationAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub message_type: MessageType,
    pub sender: String,
    pub priority: Priority,
    pub data: Value,
    pub created_at: String,
}

impl Message {
    pub fn new(message_type: MessageType, sender: impl Into<String>, priority: Priority, data: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type,
            sender: sender.into(),
            priority,
            data,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// What to do when a subscriber's mailbox is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Drop the new message, count it.
    Drop,
    /// Await room in the mailbox (used for `Critical` priority).
    Block,
    /// Keep only the newest message per coalesce key (same `symbol` field
    /// in `data`), dropping whatever older entry shared that key. Used for
    /// `SentimentChanged` so a stale score for a symbol never outlives a
    /// fresher one sitting in the same mailbox.
    CoalesceByKey,
}

/// Evaluated in the publisher's context before a message is queued for a
/// subscriber; returning `false` filters the message out for that
/// subscriber without counting it as delivered or dropped.
pub type FilterPredicate = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

pub struct Subscription {
    pub subscriber: String,
    pub types: HashSet<MessageType>,
    pub policy: BackpressurePolicy,
    pub queue_capacity: usize,
    pub filter_predicate: Option<FilterPredicate>,
}

pub struct SubscriptionHandle {
    pub subscriber: String,
}

#[derive(Debug, Default, Clone)]
pub struct PublishOutcome {
    pub delivered_count: usize,
    pub dropped_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryRecvError;

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mailbox empty")
    }
}

impl std::error::Error for TryRecvError {}

struct SubscriberEntry {
    types: HashSet<MessageType>,
    policy: BackpressurePolicy,
    capacity: usize,
    filter: Option<FilterPredicate>,
    pending: Mutex<VecDeque<Message>>,
    data_notify: Notify,
    room_notify: Notify,
    closed: AtomicBool,
    seen_ids: RwLock<VecDeque<String>>,
    consecutive_failures: AtomicU64,
    paused: AtomicBool,
}

/// Receiving end of a subscription. Pops messages in priority order
/// (ties broken by creation time), not arrival order.
pub struct Receiver {
    entry: Arc<SubscriberEntry>,
}

impl Receiver {
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            {
                let mut pending = self.entry.pending.lock();
                if let Some(msg) = pending.pop_front() {
                    drop(pending);
                    self.entry.room_notify.notify_one();
                    return Some(msg);
                }
                if self.entry.closed.load(Ordering::SeqCst) {
                    return None;
                }
            }
            self.entry.data_notify.notified().await;
        }
    }

    pub fn try_recv(&mut self) -> Result<Message, TryRecvError> {
        let mut pending = self.entry.pending.lock();
        match pending.pop_front() {
            Some(msg) => {
                drop(pending);
                self.entry.room_notify.notify_one();
                Ok(msg)
            }
            None => Err(TryRecvError),
        }
    }
}

const SEEN_ID_WINDOW: usize = 4096;
const FAILURE_PAUSE_THRESHOLD: u64 = 5;

/// True if `a` belongs ahead of `b` in a subscriber's mailbox: strictly
/// higher priority first, and within the same priority, earlier creation
/// time first.
fn should_come_before(a: &Message, b: &Message) -> bool {
    if a.priority != b.priority {
        a.priority > b.priority
    } else {
        a.created_at < b.created_at
    }
}

/// Coalescing key for `CoalesceByKey` mailboxes — the `symbol` field when
/// present, falling back to `actor` for non-market event types.
fn coalesce_key(message: &Message) -> Option<String> {
    message
        .data
        .get("symbol")
        .or_else(|| message.data.get("actor"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

enum DeliverOutcome {
    Delivered,
    Dropped,
    Filtered,
}

async fn deliver(entry: &Arc<SubscriberEntry>, message: Message) -> DeliverOutcome {
    if let Some(filter) = &entry.filter {
        if !filter(&message) {
            return DeliverOutcome::Filtered;
        }
    }

    loop {
        if entry.closed.load(Ordering::SeqCst) {
            return DeliverOutcome::Dropped;
        }

        {
            let mut pending = entry.pending.lock();

            if entry.policy == BackpressurePolicy::CoalesceByKey {
                if let Some(key) = coalesce_key(&message) {
                    pending.retain(|m| coalesce_key(m).as_deref() != Some(key.as_str()));
                }
            }

            let has_room = pending.len() < entry.capacity;
            if !has_room {
                match entry.policy {
                    BackpressurePolicy::Block => {}
                    BackpressurePolicy::Drop | BackpressurePolicy::CoalesceByKey => {
                        return DeliverOutcome::Dropped;
                    }
                }
            } else {
                let idx = pending.iter().position(|existing| should_come_before(&message, existing)).unwrap_or(pending.len());
                pending.insert(idx, message);
                drop(pending);
                entry.data_notify.notify_one();
                return DeliverOutcome::Delivered;
            }
        }

        entry.room_notify.notified().await;
    }
}

/// In-process typed pub/sub bus.
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Arc<SubscriberEntry>>>,
    shutdown: AtomicBool,
}

impl EventBus {
    pub fn new() -> Self {
        Self { subscribers: RwLock::new(HashMap::new()), shutdown: AtomicBool::new(false) }
    }

    /// Register a subscriber and get back its receiving end plus a handle
    /// used to unsubscribe later. Re-subscribing the same subscriber name
    /// with the same type set is idempotent — it replaces the prior mailbox.
    pub fn subscribe(&self, sub: Subscription) -> (SubscriptionHandle, Receiver) {
        let entry = Arc::new(SubscriberEntry {
            types: sub.types,
            policy: sub.policy,
            capacity: sub.queue_capacity.max(1),
            filter: sub.filter_predicate,
            pending: Mutex::new(VecDeque::new()),
            data_notify: Notify::new(),
            room_notify: Notify::new(),
            closed: AtomicBool::new(false),
            seen_ids: RwLock::new(VecDeque::with_capacity(64)),
            consecutive_failures: AtomicU64::new(0),
            paused: AtomicBool::new(false),
        });
        self.subscribers.write().insert(sub.subscriber.clone(), Arc::clone(&entry));
        info!(subscriber = %sub.subscriber, "subscribed to event bus");
        (SubscriptionHandle { subscriber: sub.subscriber }, Receiver { entry })
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        if let Some(entry) = self.subscribers.write().remove(&handle.subscriber) {
            entry.closed.store(true, Ordering::SeqCst);
            entry.data_notify.notify_waiters();
            entry.room_notify.notify_waiters();
        }
        info!(subscriber = %handle.subscriber, "unsubscribed from event bus");
    }

    /// Re-enable a paused subscriber (after an operator or health probe
    /// decides it is safe again).
    pub fn resume(&self, subscriber: &str) {
        if let Some(entry) = self.subscribers.read().get(subscriber) {
            entry.paused.store(false, Ordering::SeqCst);
            entry.consecutive_failures.store(0, Ordering::SeqCst);
        }
    }

    /// Record that a subscriber's handling of the last message it received
    /// failed. After `FAILURE_PAUSE_THRESHOLD` consecutive failures the
    /// subscriber is paused until explicitly resumed.
    pub fn record_subscriber_failure(&self, subscriber: &str) {
        if let Some(entry) = self.subscribers.read().get(subscriber) {
            let failures = entry.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
            if failures >= FAILURE_PAUSE_THRESHOLD {
                entry.paused.store(true, Ordering::SeqCst);
                warn!(subscriber, failures, "subscriber paused after consecutive failures");
            }
        }
    }

    pub fn record_subscriber_success(&self, subscriber: &str) {
        if let Some(entry) = self.subscribers.read().get(subscriber) {
            entry.consecutive_failures.store(0, Ordering::SeqCst);
        }
    }

    /// Publish a message to every matching, non-paused subscriber according
    /// to its backpressure policy, in priority order within each mailbox.
    /// De-duplicates by `Message.id` per subscriber so a re-publish of the
    /// same id delivers at most once.
    pub async fn publish(&self, message: Message) -> PublishOutcome {
        if self.shutdown.load(Ordering::SeqCst) && message.priority != Priority::Critical {
            return PublishOutcome::default();
        }

        let entries: Vec<Arc<SubscriberEntry>> = self
            .subscribers
            .read()
            .values()
            .filter(|e| e.types.contains(&message.message_type))
            .cloned()
            .collect();

        let mut outcome = PublishOutcome::default();
        for entry in entries {
            if entry.paused.load(Ordering::SeqCst) || entry.closed.load(Ordering::SeqCst) {
                continue;
            }

            {
                let mut seen = entry.seen_ids.write();
                if seen.contains(&message.id) {
                    continue;
                }
                seen.push_back(message.id.clone());
                if seen.len() > SEEN_ID_WINDOW {
                    seen.pop_front();
                }
            }

            match deliver(&entry, message.clone()).await {
                DeliverOutcome::Delivered => outcome.delivered_count += 1,
                DeliverOutcome::Dropped => {
                    outcome.dropped_count += 1;
                    debug!(message_id = %message.id, "message dropped for full subscriber mailbox");
                }
                DeliverOutcome::Filtered => {}
            }
        }

        outcome
    }

    /// Publish a `ControlShutdown` and stop accepting any further
    /// non-critical publications.
    pub async fn shutdown(&self) -> PublishOutcome {
        self.shutdown.store(true, Ordering::SeqCst);
        let msg = Message::new(MessageType::ControlShutdown, "event_bus", Priority::Critical, Value::Null);
        self.publish(msg).await
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_paused(&self, subscriber: &str) -> bool {
        self.subscribers.read().get(subscriber).map(|e| e.paused.load(Ordering::SeqCst)).unwrap_or(false)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(name: &str, types: &[MessageType], policy: BackpressurePolicy, cap: usize) -> Subscription {
        Subscription {
            subscriber: name.to_string(),
            types: types.iter().cloned().collect(),
            policy,
            queue_capacity: cap,
            filter_predicate: None,
        }
    }

    #[tokio::test]
    async fn delivers_to_matching_subscriber_only() {
        let bus = EventBus::new();
        let (_h1, mut rx1) = bus.subscribe(sub("s1", &[MessageType::NewLearning], BackpressurePolicy::Drop, 8));
        let (_h2, mut rx2) = bus.subscribe(sub("s2", &[MessageType::BuySignal], BackpressurePolicy::Drop, 8));

        bus.publish(Message::new(MessageType::NewLearning, "x", Priority::Normal, Value::Null)).await;

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn dedup_by_id_delivers_once() {
        let bus = EventBus::new();
        let (_h, mut rx) = bus.subscribe(sub("s1", &[MessageType::NewLearning], BackpressurePolicy::Drop, 8));
        let msg = Message::new(MessageType::NewLearning, "x", Priority::Normal, Value::Null);

        bus.publish(msg.clone()).await;
        bus.publish(msg).await;

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn drop_policy_reports_dropped_count_when_full() {
        let bus = EventBus::new();
        let (_h, mut rx) = bus.subscribe(sub("s1", &[MessageType::PriceAlert], BackpressurePolicy::Drop, 1));

        let o1 = bus.publish(Message::new(MessageType::PriceAlert, "x", Priority::Low, Value::Null)).await;
        let o2 = bus.publish(Message::new(MessageType::PriceAlert, "x", Priority::Low, Value::Null)).await;

        assert_eq!(o1.delivered_count, 1);
        assert_eq!(o2.dropped_count, 1);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn subscriber_paused_after_consecutive_failures() {
        let bus = EventBus::new();
        let (_h, _rx) = bus.subscribe(sub("s1", &[MessageType::NewLearning], BackpressurePolicy::Drop, 8));

        for _ in 0..FAILURE_PAUSE_THRESHOLD {
            bus.record_subscriber_failure("s1");
        }
        assert!(bus.is_paused("s1"));

        let outcome = bus.publish(Message::new(MessageType::NewLearning, "x", Priority::Normal, Value::Null)).await;
        assert_eq!(outcome.delivered_count, 0);

        bus.resume("s1");
        assert!(!bus.is_paused("s1"));
    }

    #[tokio::test]
    async fn shutdown_blocks_further_non_critical_publishes() {
        let bus = EventBus::new();
        let (_h, mut rx) = bus.subscribe(sub(
            "s1",
            &[MessageType::NewLearning, MessageType::ControlShutdown],
            BackpressurePolicy::Block,
            8,
        ));

        bus.shutdown().await;
        assert!(rx.try_recv().is_ok());

        let outcome = bus.publish(Message::new(MessageType::NewLearning, "x", Priority::Normal, Value::Null)).await;
        assert_eq!(outcome.delivered_count, 0);
    }

    #[tokio::test]
    async fn higher_priority_is_delivered_before_older_lower_priority() {
        let bus = EventBus::new();
        let (_h, mut rx) = bus.subscribe(sub("s1", &[MessageType::PriceAlert], BackpressurePolicy::Drop, 8));

        bus.publish(Message::new(MessageType::PriceAlert, "x", Priority::Low, Value::Null)).await;
        bus.publish(Message::new(MessageType::PriceAlert, "x", Priority::Critical, Value::Null)).await;

        let first = rx.try_recv().unwrap();
        assert_eq!(first.priority, Priority::Critical);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.priority, Priority::Low);
    }

    #[tokio::test]
    async fn coalesce_by_key_keeps_only_newest_per_symbol() {
        let bus = EventBus::new();
        let (_h, mut rx) =
            bus.subscribe(sub("s1", &[MessageType::SentimentChanged], BackpressurePolicy::CoalesceByKey, 8));

        bus.publish(Message::new(
            MessageType::SentimentChanged,
            "x",
            Priority::Normal,
            serde_json::json!({ "symbol": "BTCUSDT", "score": 0.1 }),
        ))
        .await;
        bus.publish(Message::new(
            MessageType::SentimentChanged,
            "x",
            Priority::Normal,
            serde_json::json!({ "symbol": "BTCUSDT", "score": 0.9 }),
        ))
        .await;

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.data.get("score").and_then(|v| v.as_f64()), Some(0.9));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn filter_predicate_excludes_non_matching_messages() {
        let bus = EventBus::new();
        let mut s = sub("s1", &[MessageType::NewLearning], BackpressurePolicy::Drop, 8);
        s.filter_predicate = Some(Arc::new(|m: &Message| m.data.get("important").is_some()));
        let (_h, mut rx) = bus.subscribe(s);

        bus.publish(Message::new(MessageType::NewLearning, "x", Priority::Normal, Value::Null)).await;
        let outcome = bus
            .publish(Message::new(
                MessageType::NewLearning,
                "x",
                Priority::Normal,
                serde_json::json!({ "important": true }),
            ))
            .await;

        assert_eq!(outcome.delivered_count, 1);
        let msg = rx.try_recv().unwrap();
        assert!(msg.data.get("important").is_some());
        assert!(rx.try_recv().is_err());
    }
}
