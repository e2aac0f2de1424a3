//! Widget state synchronizer.
//!
//! Keeps a local, optimistically updated copy of the host's `widgetState`.
//! The host wins whenever it pushes a non-null value; local writes are pushed
//! back through the host's `setWidgetState` entry point.

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    error::BridgeError,
    globals::GlobalKey,
    host::HostWindow,
    store::{GlobalStore, Subscription},
    sync::lock,
};

pub struct WidgetStateSync<T = Value> {
    local: Arc<Mutex<Option<T>>>,
    window: Arc<HostWindow>,
    _subscription: Subscription,
    _store: GlobalStore,
}

impl<T: fmt::Debug> fmt::Debug for WidgetStateSync<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WidgetStateSync")
            .field("local", &*lock(&self.local))
            .finish()
    }
}

impl<T> WidgetStateSync<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    /// Starts from the host's state if it has one, else from `default`
    pub fn init(store: &GlobalStore, default: Option<T>) -> Self {
        Self::init_with(store, move || default)
    }

    /// Starts from the host's state if it has one, else from `factory()`.
    ///
    /// The factory runs at most once, and not at all when the host already
    /// holds a state.
    pub fn init_with(store: &GlobalStore, factory: impl FnOnce() -> Option<T>) -> Self {
        let local: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));

        let sink = Arc::clone(&local);
        let subscription = store.subscribe(GlobalKey::WidgetState, move |pushed| {
            let Some(state) = pushed.and_then(decode::<T>) else {
                return;
            };
            debug!("Adopting widget state pushed by host");
            *lock(&sink) = Some(state);
        });

        let initial = match subscription.current().as_ref().and_then(decode::<T>) {
            Some(state) => Some(state),
            None => factory(),
        };
        *lock(&local) = initial;

        Self {
            local,
            window: Arc::clone(store.window()),
            _subscription: subscription,
            _store: store.clone(),
        }
    }

    pub fn get(&self) -> Option<T> {
        lock(&self.local).clone()
    }

    /// Replaces the local state and persists it when it is not `None`
    pub fn set(&self, state: Option<T>) {
        self.update(move |_| state);
    }

    /// Computes the next state from the current local one and persists it
    /// when it is not `None`.
    ///
    /// `updater` runs while the local state is locked and must not call back
    /// into this handle.
    pub fn update(&self, updater: impl FnOnce(Option<&T>) -> Option<T>) {
        let next = {
            let mut local = lock(&self.local);
            let next = updater(local.as_ref());
            local.clone_from(&next);
            next
        };

        if let Some(state) = next {
            self.persist(&state);
        }
    }

    fn persist(&self, state: &T) {
        let Some(host) = self.window.binding() else {
            debug!("No host binding, widget state kept locally");
            return;
        };

        let value = match serde_json::to_value(state) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "Failed encoding widget state");
                return;
            }
        };

        match host.set_widget_state(value) {
            Ok(()) => {}
            Err(BridgeError::CapabilityUnavailable(capability)) => {
                debug!(%capability, "Host cannot persist widget state, kept locally");
            }
            Err(err) => warn!(error = %err, "Host failed persisting widget state"),
        }
    }
}

fn decode<T: DeserializeOwned>(value: &Value) -> Option<T> {
    if value.is_null() {
        return None;
    }
    match serde_json::from_value(value.clone()) {
        Ok(state) => Some(state),
        Err(err) => {
            warn!(error = %err, "Ignoring widget state that does not match the expected shape");
            None
        }
    }
}
