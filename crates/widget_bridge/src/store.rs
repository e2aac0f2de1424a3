//! Global store bridge.
//!
//! Turns the host's mutable globals object into per-key subscriptions. A key
//! is re-read and its subscribers notified when:
//!
//! - the host dispatches a [`WindowEvent::SetGlobals`] event whose update
//!   contains the key,
//! - a [`WindowEvent::Message`] carrying a `openai:set_globals` payload
//!   contains the key,
//! - the startup poll sees the host binding appear for the first time.
//!
//! Every distinct key owns one channel: its two window listeners, its poll
//! timer and its subscriber list. The channel is created with the first
//! subscriber and torn down with the last one.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};
use widget_bridge_config::PollConfig;

use crate::{
    globals::{BridgeMessage, GlobalKey, GlobalsSnapshot},
    host::{EventKind, HostWindow, ListenerId, WindowEvent},
    sync::lock,
};

/// Called with the freshly read value of the subscribed key
pub type SubscriberFn = Arc<dyn Fn(Option<&Value>) + Send + Sync>;

/// Identifies one registered subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken {
    key: GlobalKey,
    id: u64,
}

impl SubscriptionToken {
    pub fn key(&self) -> GlobalKey {
        self.key
    }
}

/// Why a channel re-read its key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    SetGlobals,
    Message,
    HostAttached,
}

struct KeyChannel {
    subscribers: Vec<(u64, SubscriberFn)>,
    current: Option<Value>,
    event_listener: ListenerId,
    message_listener: ListenerId,
    poller: Option<JoinHandle<()>>,
}

impl KeyChannel {
    fn teardown(mut self, window: &HostWindow) {
        window.remove_event_listener(self.event_listener);
        window.remove_event_listener(self.message_listener);
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    channels: HashMap<GlobalKey, KeyChannel>,
}

struct StoreInner {
    window: Arc<HostWindow>,
    poll: PollConfig,
    registry: Mutex<Registry>,
}

impl StoreInner {
    fn read(&self, key: GlobalKey) -> Option<Value> {
        match self.window.read_global(key) {
            Ok(value) => value.filter(|v| !v.is_null()),
            Err(err) => {
                error!(key = %key, error = %err, "Error accessing host binding");
                None
            }
        }
    }

    fn notify(&self, key: GlobalKey, trigger: Trigger) {
        let value = self.read(key);

        let subscribers: Vec<SubscriberFn> = {
            let mut registry = lock(&self.registry);
            let Some(channel) = registry.channels.get_mut(&key) else {
                return;
            };
            channel.current.clone_from(&value);
            channel
                .subscribers
                .iter()
                .map(|(_, callback)| Arc::clone(callback))
                .collect()
        };

        trace!(
            key = %key,
            ?trigger,
            subscribers = subscribers.len(),
            "Notifying subscribers"
        );
        for callback in subscribers {
            callback(value.as_ref());
        }
    }

    fn poll_finished(&self, key: GlobalKey) {
        if let Some(channel) = lock(&self.registry).channels.get_mut(&key) {
            channel.poller = None;
        }
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let channels: Vec<KeyChannel> = lock(&self.registry)
            .channels
            .drain()
            .map(|(_, channel)| channel)
            .collect();
        for channel in channels {
            channel.teardown(&self.window);
        }
    }
}

/// Reactive per-key access to the host globals
#[derive(Clone)]
pub struct GlobalStore {
    inner: Arc<StoreInner>,
}

impl fmt::Debug for GlobalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = lock(&self.inner.registry);
        f.debug_struct("GlobalStore")
            .field("window", &self.inner.window)
            .field("poll", &self.inner.poll)
            .field("keys", &registry.channels.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl GlobalStore {
    pub fn new(window: Arc<HostWindow>) -> Self {
        Self::with_poll(window, PollConfig::default())
    }

    pub fn with_poll(window: Arc<HostWindow>, poll: PollConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                window,
                poll,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    pub fn window(&self) -> &Arc<HostWindow> {
        &self.inner.window
    }

    pub fn poll_config(&self) -> PollConfig {
        self.inner.poll
    }

    /// Reads `key` fresh from the host binding.
    ///
    /// A missing binding, an unset field, a `null` field and a failing read
    /// all yield `None`.
    pub fn read(&self, key: GlobalKey) -> Option<Value> {
        self.inner.read(key)
    }

    /// Typed view of every global field, read fresh
    pub fn snapshot(&self) -> GlobalsSnapshot {
        GlobalsSnapshot::collect(|key| self.read(key))
    }

    /// Subscribes to `key`, returning a handle that unsubscribes on drop
    pub fn subscribe(
        &self,
        key: GlobalKey,
        callback: impl Fn(Option<&Value>) + Send + Sync + 'static,
    ) -> Subscription {
        let token = self.register(key, Arc::new(callback));
        Subscription {
            token,
            store: Arc::downgrade(&self.inner),
            active: AtomicBool::new(true),
        }
    }

    /// Registers a subscriber for `key`.
    ///
    /// The first subscriber of a key installs the key's window listeners and,
    /// when the host binding is not attached yet, starts the startup poll.
    ///
    /// Joining an existing channel leaves its cached value alone, so earlier
    /// subscribers keep reporting what they were last notified of.
    pub fn register(&self, key: GlobalKey, callback: SubscriberFn) -> SubscriptionToken {
        let mut registry = lock(&self.inner.registry);
        registry.next_id += 1;
        let id = registry.next_id;

        if let Some(channel) = registry.channels.get_mut(&key) {
            channel.subscribers.push((id, callback));
        } else {
            let initial = self.inner.read(key);
            let channel = self.open_channel(key, initial, (id, callback));
            registry.channels.insert(key, channel);
        }

        debug!(key = %key, id, "Registered subscriber");
        SubscriptionToken { key, id }
    }

    /// Removes a subscriber. The last subscriber of a key tears down the
    /// key's listeners and poll timer. Returns `false` for unknown or already
    /// removed tokens.
    pub fn unregister(&self, token: SubscriptionToken) -> bool {
        let closed = {
            let mut registry = lock(&self.inner.registry);
            let Some(channel) = registry.channels.get_mut(&token.key) else {
                return false;
            };

            let before = channel.subscribers.len();
            channel.subscribers.retain(|(id, _)| *id != token.id);
            if channel.subscribers.len() == before {
                return false;
            }

            if channel.subscribers.is_empty() {
                registry.channels.remove(&token.key)
            } else {
                None
            }
        };

        debug!(key = %token.key, id = token.id, "Unregistered subscriber");
        if let Some(channel) = closed {
            debug!(key = %token.key, "Closing channel");
            channel.teardown(&self.inner.window);
        }
        true
    }

    pub fn subscriber_count(&self, key: GlobalKey) -> usize {
        lock(&self.inner.registry)
            .channels
            .get(&key)
            .map_or(0, |channel| channel.subscribers.len())
    }

    /// Whether the startup poll for `key` is still waiting for the host
    pub fn is_polling(&self, key: GlobalKey) -> bool {
        lock(&self.inner.registry)
            .channels
            .get(&key)
            .and_then(|channel| channel.poller.as_ref())
            .is_some_and(|poller| !poller.is_finished())
    }

    fn open_channel(
        &self,
        key: GlobalKey,
        initial: Option<Value>,
        subscriber: (u64, SubscriberFn),
    ) -> KeyChannel {
        let window = &self.inner.window;

        let weak = Arc::downgrade(&self.inner);
        let event_listener = window.add_event_listener(
            EventKind::SetGlobals,
            Arc::new(move |event| {
                let WindowEvent::SetGlobals(event) = event else {
                    return;
                };
                if !event.globals.contains(key) {
                    return;
                }
                if let Some(inner) = weak.upgrade() {
                    inner.notify(key, Trigger::SetGlobals);
                }
            }),
        );

        let weak = Arc::downgrade(&self.inner);
        let message_listener = window.add_event_listener(
            EventKind::Message,
            Arc::new(move |event| {
                let WindowEvent::Message(data) = event else {
                    return;
                };
                let Some(globals) = BridgeMessage::parse_update(data) else {
                    return;
                };
                if !globals.contains(key) {
                    return;
                }
                if let Some(inner) = weak.upgrade() {
                    inner.notify(key, Trigger::Message);
                }
            }),
        );

        let poller = if window.is_attached() {
            None
        } else {
            self.spawn_poller(key)
        };

        KeyChannel {
            subscribers: vec![subscriber],
            current: initial,
            event_listener,
            message_listener,
            poller,
        }
    }

    fn spawn_poller(&self, key: GlobalKey) -> Option<JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %key, "No async runtime available, not polling for the host binding");
            return None;
        };

        let poll = self.inner.poll;
        let weak = Arc::downgrade(&self.inner);
        debug!(
            key = %key,
            interval_ms = poll.interval_ms,
            max_attempts = poll.max_attempts,
            "Host binding not attached, polling"
        );

        Some(runtime.spawn(async move {
            let period = poll.interval();
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

            for attempt in 1..=poll.max_attempts {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if inner.window.is_attached() {
                    debug!(key = %key, attempt, "Host binding attached");
                    inner.poll_finished(key);
                    inner.notify(key, Trigger::HostAttached);
                    return;
                }
            }

            debug!(key = %key, "Host binding did not attach within the poll budget");
            if let Some(inner) = weak.upgrade() {
                inner.poll_finished(key);
            }
        }))
    }
}

/// Handle to one registered subscriber
pub struct Subscription {
    token: SubscriptionToken,
    store: Weak<StoreInner>,
    active: AtomicBool,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("token", &self.token)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Subscription {
    pub fn key(&self) -> GlobalKey {
        self.token.key
    }

    pub fn token(&self) -> SubscriptionToken {
        self.token
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Value of the key as of the last notification (or subscription time).
    ///
    /// Repeated calls between two notifications return the same value. After
    /// unsubscribing this falls back to a fresh read.
    pub fn current(&self) -> Option<Value> {
        let inner = self.store.upgrade()?;
        if self.is_active() {
            if let Some(channel) = lock(&inner.registry).channels.get(&self.token.key) {
                return channel.current.clone();
            }
        }
        inner.read(self.token.key)
    }

    /// Removes this subscriber. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(inner) = self.store.upgrade() {
            GlobalStore { inner }.unregister(self.token);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
