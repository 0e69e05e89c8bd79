// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2025 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Subscriber registry for the task progress channel.
//!
//! The registry maps topic keys to ordered handler lists and keeps three independent
//! lifecycle lists (opened, closed, error). It is shared between the client facade, which
//! registers handlers, and the channel state machine, which dispatches to them.
//!
//! # Topics
//!
//! A topic is either a message `type` tag (e.g. `progress`) or the wildcard `*`, which
//! receives every decoded message, including those with unknown tags.
//!
//! # Dispatch guarantees
//!
//! - Topic handlers run in registration order, then wildcard handlers in registration
//!   order.
//! - The handler list is snapshotted before any handler runs, so handlers may subscribe
//!   or unsubscribe without deadlocking. Changes take effect from the next dispatch.
//! - A panicking handler is caught and logged; the remaining handlers still run.

use std::{
    fmt::{Debug, Display},
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use ustr::Ustr;

use super::{
    messages::{MessageKind, TaskMessage},
    types::{ErrorHandler, LifecycleHandler, MessageHandler},
};
use crate::error::ChannelError;

/// The wildcard topic key.
pub const WILDCARD: &str = "*";

/// A key under which message handlers are registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Messages whose `type` tag equals the given string.
    Kind(Ustr),
    /// Every decoded message.
    Wildcard,
}

impl Topic {
    /// Returns the topic for a message, which is never the wildcard.
    #[must_use]
    pub fn of(message: &TaskMessage) -> Self {
        Self::Kind(Ustr::from(message.type_tag()))
    }

    #[must_use]
    pub const fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard)
    }
}

impl From<&str> for Topic {
    fn from(value: &str) -> Self {
        if value == WILDCARD {
            Self::Wildcard
        } else {
            Self::Kind(Ustr::from(value))
        }
    }
}

impl From<MessageKind> for Topic {
    fn from(value: MessageKind) -> Self {
        Self::Kind(Ustr::from(value.as_ref()))
    }
}

impl Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kind(kind) => write!(f, "{kind}"),
            Self::Wildcard => write!(f, "{WILDCARD}"),
        }
    }
}

/// Unique identity of one handler registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// The list a registration lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    Message(Topic),
    Opened,
    Closed,
    Error,
}

type Entries<H> = Vec<(SubscriptionId, H)>;

/// Registry of message and lifecycle handlers.
pub struct SubscriberRegistry {
    topics: DashMap<Topic, Entries<MessageHandler>>,
    opened: Mutex<Entries<LifecycleHandler>>,
    closed: Mutex<Entries<LifecycleHandler>>,
    errors: Mutex<Entries<ErrorHandler>>,
    next_id: AtomicU64,
}

impl Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(SubscriberRegistry))
            .field("topics", &self.topics.len())
            .field("message_handlers", &self.message_handler_count())
            .field("opened", &lock(&self.opened).len())
            .field("closed", &lock(&self.closed).len())
            .field("errors", &lock(&self.errors).len())
            .finish()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self {
            topics: DashMap::new(),
            opened: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

// Handlers never run while a list is locked, so a poisoned lock holds consistent data
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn remove_entry<H>(entries: &mut Entries<H>, id: SubscriptionId) -> bool {
    let before = entries.len();
    entries.retain(|(entry_id, _)| *entry_id != id);
    entries.len() != before
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

/// Runs a handler, logging instead of propagating a panic. Returns true if it completed.
fn invoke_isolated(label: &str, id: SubscriptionId, f: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            tracing::error!(
                handler = id.0,
                "Handler for '{label}' panicked: {}",
                panic_message(payload.as_ref())
            );
            false
        }
    }
}

impl SubscriberRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn handle(self: &Arc<Self>, id: SubscriptionId, key: SubscriptionKey) -> Subscription {
        Subscription {
            id,
            key,
            registry: Arc::downgrade(self),
        }
    }

    /// Registers a message handler for `topic`.
    pub fn subscribe(
        self: &Arc<Self>,
        topic: impl Into<Topic>,
        handler: MessageHandler,
    ) -> Subscription {
        let topic = topic.into();
        let id = self.next_id();
        self.topics.entry(topic).or_default().push((id, handler));
        tracing::debug!("Subscribed {id:?} to '{topic}'");
        self.handle(id, SubscriptionKey::Message(topic))
    }

    /// Registers a handler for the channel opening.
    pub fn on_opened(self: &Arc<Self>, handler: LifecycleHandler) -> Subscription {
        let id = self.next_id();
        lock(&self.opened).push((id, handler));
        self.handle(id, SubscriptionKey::Opened)
    }

    /// Registers a handler for the channel closing, cleanly or not.
    pub fn on_closed(self: &Arc<Self>, handler: LifecycleHandler) -> Subscription {
        let id = self.next_id();
        lock(&self.closed).push((id, handler));
        self.handle(id, SubscriptionKey::Closed)
    }

    /// Registers a handler for transport errors and reconnection exhaustion.
    pub fn on_error(self: &Arc<Self>, handler: ErrorHandler) -> Subscription {
        let id = self.next_id();
        lock(&self.errors).push((id, handler));
        self.handle(id, SubscriptionKey::Error)
    }

    /// Removes the registration `id` from the list `key`.
    ///
    /// Returns true if a registration was removed.
    pub fn unsubscribe(&self, key: SubscriptionKey, id: SubscriptionId) -> bool {
        let removed = match key {
            SubscriptionKey::Message(topic) => {
                let removed = self
                    .topics
                    .get_mut(&topic)
                    .is_some_and(|mut entries| remove_entry(&mut entries, id));
                self.topics.remove_if(&topic, |_, entries| entries.is_empty());
                removed
            }
            SubscriptionKey::Opened => remove_entry(&mut lock(&self.opened), id),
            SubscriptionKey::Closed => remove_entry(&mut lock(&self.closed), id),
            SubscriptionKey::Error => remove_entry(&mut lock(&self.errors), id),
        };

        if removed {
            tracing::debug!("Unsubscribed {id:?} from {key:?}");
        }
        removed
    }

    /// Returns true if the registration `id` is still present in `key`.
    #[must_use]
    pub fn contains(&self, key: SubscriptionKey, id: SubscriptionId) -> bool {
        match key {
            SubscriptionKey::Message(topic) => self
                .topics
                .get(&topic)
                .is_some_and(|entries| entries.iter().any(|(e, _)| *e == id)),
            SubscriptionKey::Opened => lock(&self.opened).iter().any(|(e, _)| *e == id),
            SubscriptionKey::Closed => lock(&self.closed).iter().any(|(e, _)| *e == id),
            SubscriptionKey::Error => lock(&self.errors).iter().any(|(e, _)| *e == id),
        }
    }

    fn snapshot(&self, topic: &Topic) -> Entries<MessageHandler> {
        self.topics
            .get(topic)
            .map(|entries| entries.value().clone())
            .unwrap_or_default()
    }

    /// Dispatches `message` to its topic handlers, then to the wildcard handlers.
    ///
    /// Messages with an unrecognized `type` reach the wildcard handlers only.
    /// Returns the number of handlers invoked.
    pub fn dispatch(&self, message: &TaskMessage) -> usize {
        let mut handlers = match message.kind() {
            Some(_) => self.snapshot(&Topic::of(message)),
            None => Entries::new(),
        };
        handlers.extend(self.snapshot(&Topic::Wildcard));

        let label = message.type_tag();
        for (id, handler) in &handlers {
            invoke_isolated(label, *id, || handler(message));
        }

        handlers.len()
    }

    /// Fires the opened handlers in registration order.
    pub fn notify_opened(&self) {
        let handlers = lock(&self.opened).clone();
        for (id, handler) in &handlers {
            invoke_isolated("opened", *id, || handler());
        }
    }

    /// Fires the closed handlers in registration order.
    pub fn notify_closed(&self) {
        let handlers = lock(&self.closed).clone();
        for (id, handler) in &handlers {
            invoke_isolated("closed", *id, || handler());
        }
    }

    /// Fires the error handlers in registration order.
    pub fn notify_error(&self, error: &ChannelError) {
        let handlers = lock(&self.errors).clone();
        for (id, handler) in &handlers {
            invoke_isolated("error", *id, || handler(error));
        }
    }

    /// Returns the number of handlers registered for `topic`.
    #[must_use]
    pub fn topic_handler_count(&self, topic: impl Into<Topic>) -> usize {
        self.topics
            .get(&topic.into())
            .map_or(0, |entries| entries.len())
    }

    /// Returns the total number of message handlers across all topics.
    #[must_use]
    pub fn message_handler_count(&self) -> usize {
        self.topics.iter().map(|entry| entry.value().len()).sum()
    }

    /// Returns the number of lifecycle handlers as `(opened, closed, error)`.
    #[must_use]
    pub fn lifecycle_handler_counts(&self) -> (usize, usize, usize) {
        (
            lock(&self.opened).len(),
            lock(&self.closed).len(),
            lock(&self.errors).len(),
        )
    }

    /// Returns true if no handlers of any kind are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.message_handler_count() == 0 && self.lifecycle_handler_counts() == (0, 0, 0)
    }

    /// Drops every registration.
    pub fn clear(&self) {
        self.topics.clear();
        lock(&self.opened).clear();
        lock(&self.closed).clear();
        lock(&self.errors).clear();
    }
}

/// Capability to remove one handler registration.
///
/// Dropping a `Subscription` does not unsubscribe; the handler stays registered until
/// [`Subscription::unsubscribe`] is called or the client is disposed.
#[derive(Clone)]
pub struct Subscription {
    id: SubscriptionId,
    key: SubscriptionKey,
    registry: Weak<SubscriberRegistry>,
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(Subscription))
            .field("id", &self.id)
            .field("key", &self.key)
            .field("registry_alive", &(self.registry.strong_count() > 0))
            .finish()
    }
}

impl Subscription {
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    #[must_use]
    pub const fn key(&self) -> SubscriptionKey {
        self.key
    }

    /// Removes exactly this registration.
    ///
    /// Idempotent: returns true only for the call that actually removed it. A no-op
    /// once the registry itself is gone.
    pub fn unsubscribe(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.unsubscribe(self.key, self.id))
    }

    /// Returns true while the registration is still present.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.contains(self.key, self.id))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn registry() -> Arc<SubscriberRegistry> {
        Arc::new(SubscriberRegistry::new())
    }

    fn progress() -> TaskMessage {
        TaskMessage::decode(
            r#"{"type":"progress","taskId":"abc","timestamp":"t","data":{"progress":10,"message":"m","filesAnalyzed":1,"totalFiles":10}}"#,
        )
        .unwrap()
    }

    fn unknown() -> TaskMessage {
        TaskMessage::decode(r#"{"type":"custom","taskId":"abc","timestamp":"t","data":{}}"#)
            .unwrap()
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &str) -> MessageHandler {
        let log = log.clone();
        let label = label.to_string();
        Arc::new(move |message: &TaskMessage| {
            log.lock()
                .unwrap()
                .push(format!("{label}:{}", message.type_tag()));
        })
    }

    #[rstest]
    #[case("*", Topic::Wildcard)]
    #[case("progress", Topic::Kind(Ustr::from("progress")))]
    fn test_topic_from_str(#[case] input: &str, #[case] expected: Topic) {
        assert_eq!(Topic::from(input), expected);
    }

    #[rstest]
    fn test_topic_from_kind() {
        assert_eq!(
            Topic::from(MessageKind::Vulnerability),
            Topic::from("vulnerability")
        );
    }

    #[rstest]
    fn test_dispatch_order_topic_then_wildcard(registry: Arc<SubscriberRegistry>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.subscribe(WILDCARD, recorder(&log, "w1"));
        registry.subscribe("progress", recorder(&log, "h1"));
        registry.subscribe("progress", recorder(&log, "h2"));
        registry.subscribe("log", recorder(&log, "other"));
        registry.subscribe(WILDCARD, recorder(&log, "w2"));

        let invoked = registry.dispatch(&progress());

        assert_eq!(invoked, 4);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["h1:progress", "h2:progress", "w1:progress", "w2:progress"]
        );
    }

    #[rstest]
    fn test_unknown_type_reaches_wildcard_only(registry: Arc<SubscriberRegistry>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.subscribe("progress", recorder(&log, "h"));
        registry.subscribe(WILDCARD, recorder(&log, "w"));

        registry.dispatch(&unknown());

        assert_eq!(*log.lock().unwrap(), vec!["w:custom"]);
    }

    #[rstest]
    fn test_unknown_type_skips_matching_topic(registry: Arc<SubscriberRegistry>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.subscribe("custom", recorder(&log, "h"));
        registry.subscribe(WILDCARD, recorder(&log, "w"));

        let invoked = registry.dispatch(&unknown());

        assert_eq!(invoked, 1);
        assert_eq!(*log.lock().unwrap(), vec!["w:custom"]);
    }

    #[rstest]
    fn test_unsubscribe_is_idempotent(registry: Arc<SubscriberRegistry>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sub = registry.subscribe("progress", recorder(&log, "h"));
        let keep = registry.subscribe("progress", recorder(&log, "k"));

        assert!(sub.is_active());
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(!sub.is_active());
        assert!(keep.is_active());

        registry.dispatch(&progress());
        assert_eq!(*log.lock().unwrap(), vec!["k:progress"]);
    }

    #[rstest]
    fn test_same_handler_on_two_topics_removed_independently(
        registry: Arc<SubscriberRegistry>,
    ) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = recorder(&log, "h");
        let on_progress = registry.subscribe("progress", handler.clone());
        let _on_all = registry.subscribe(WILDCARD, handler);

        on_progress.unsubscribe();
        registry.dispatch(&progress());

        assert_eq!(*log.lock().unwrap(), vec!["h:progress"]);
    }

    #[rstest]
    fn test_empty_topic_is_pruned(registry: Arc<SubscriberRegistry>) {
        let sub = registry.subscribe("log", Arc::new(|_: &TaskMessage| {}));
        sub.unsubscribe();
        assert_eq!(registry.topic_handler_count("log"), 0);
        assert!(registry.is_empty());
    }

    #[rstest]
    fn test_panicking_handler_is_isolated(registry: Arc<SubscriberRegistry>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.subscribe(
            "progress",
            Arc::new(|message: &TaskMessage| {
                if message.kind().is_some() {
                    panic!("handler failure");
                }
            }),
        );
        registry.subscribe("progress", recorder(&log, "after"));

        let invoked = registry.dispatch(&progress());

        assert_eq!(invoked, 2);
        assert_eq!(*log.lock().unwrap(), vec!["after:progress"]);
    }

    #[rstest]
    fn test_handler_may_unsubscribe_during_dispatch(registry: Arc<SubscriberRegistry>) {
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(AtomicU64::new(0));

        let slot_clone = slot.clone();
        let count_clone = count.clone();
        let sub = registry.subscribe(
            "progress",
            Arc::new(move |_: &TaskMessage| {
                count_clone.fetch_add(1, Ordering::SeqCst);
                if let Some(sub) = slot_clone.lock().unwrap().as_ref() {
                    sub.unsubscribe();
                }
            }),
        );
        *slot.lock().unwrap() = Some(sub);

        registry.dispatch(&progress());
        registry.dispatch(&progress());

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    fn test_lifecycle_namespaces_are_independent(registry: Arc<SubscriberRegistry>) {
        let opened = Arc::new(AtomicU64::new(0));
        let closed = Arc::new(AtomicU64::new(0));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let opened_clone = opened.clone();
        registry.on_opened(Arc::new(move || {
            opened_clone.fetch_add(1, Ordering::SeqCst);
        }));
        let closed_clone = closed.clone();
        let closed_sub = registry.on_closed(Arc::new(move || {
            closed_clone.fetch_add(1, Ordering::SeqCst);
        }));
        let errors_clone = errors.clone();
        registry.on_error(Arc::new(move |e: &ChannelError| {
            errors_clone.lock().unwrap().push(e.clone());
        }));

        registry.notify_opened();
        registry.notify_closed();
        registry.notify_error(&ChannelError::Transport("reset".to_string()));

        assert!(closed_sub.unsubscribe());
        registry.notify_closed();

        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(errors.lock().unwrap().len(), 1);
        assert_eq!(registry.lifecycle_handler_counts(), (1, 0, 1));
        assert_eq!(registry.message_handler_count(), 0);
    }

    #[rstest]
    fn test_unsubscribe_after_registry_dropped() {
        let registry = Arc::new(SubscriberRegistry::new());
        let sub = registry.on_opened(Arc::new(|| {}));
        drop(registry);

        assert!(!sub.unsubscribe());
        assert!(!sub.is_active());
    }

    #[rstest]
    fn test_clear(registry: Arc<SubscriberRegistry>) {
        let sub = registry.subscribe(WILDCARD, Arc::new(|_: &TaskMessage| {}));
        registry.on_error(Arc::new(|_: &ChannelError| {}));

        registry.clear();

        assert!(registry.is_empty());
        assert!(!sub.is_active());
    }
}
