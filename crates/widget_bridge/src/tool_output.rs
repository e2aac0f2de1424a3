//! Tool output normalization.
//!
//! Hosts deliver tool results either bare or wrapped in an envelope
//! `{ structuredContent, _meta }`. Consumers only care about the payload.

use std::{
    fmt,
    marker::PhantomData,
    sync::{Arc, Mutex},
};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::{
    error::Result,
    globals::GlobalKey,
    store::{GlobalStore, Subscription},
    sync::lock,
};

pub const STRUCTURED_CONTENT_KEY: &str = "structuredContent";
pub const META_KEY: &str = "_meta";

/// Shape of a raw tool output value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Envelope<'a> {
    /// Object carrying a non-null `structuredContent`
    Enveloped {
        structured_content: &'a Value,
        meta: Option<&'a Value>,
    },
    /// Anything else, used as-is
    Bare(&'a Value),
}

impl<'a> Envelope<'a> {
    pub fn classify(raw: &'a Value) -> Self {
        let Value::Object(record) = raw else {
            return Envelope::Bare(raw);
        };
        match record.get(STRUCTURED_CONTENT_KEY) {
            Some(content) if !content.is_null() => Envelope::Enveloped {
                structured_content: content,
                meta: record.get(META_KEY).filter(|meta| !meta.is_null()),
            },
            _ => Envelope::Bare(raw),
        }
    }

    /// The meaningful payload
    pub fn payload(&self) -> &'a Value {
        match self {
            Envelope::Enveloped {
                structured_content, ..
            } => structured_content,
            Envelope::Bare(raw) => raw,
        }
    }
}

/// Extracts the useful payload of a tool output
pub fn normalize(raw: Option<&Value>) -> Option<Value> {
    let raw = raw.filter(|value| !value.is_null())?;
    Some(Envelope::classify(raw).payload().clone())
}

/// Reactive view over the host's `toolOutput`, normalized on every change
pub struct ToolOutput<T = Value> {
    current: Arc<Mutex<Option<Value>>>,
    _subscription: Subscription,
    _store: GlobalStore,
    _marker: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for ToolOutput<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolOutput")
            .field("current", &*lock(&self.current))
            .finish()
    }
}

impl<T: DeserializeOwned> ToolOutput<T> {
    pub fn new(store: &GlobalStore) -> Self {
        let current = Arc::new(Mutex::new(None));

        let sink = Arc::clone(&current);
        let subscription = store.subscribe(GlobalKey::ToolOutput, move |raw| {
            *lock(&sink) = normalize(raw);
        });
        *lock(&current) = normalize(subscription.current().as_ref());

        Self {
            current,
            _subscription: subscription,
            _store: store.clone(),
            _marker: PhantomData,
        }
    }

    /// The normalized payload as JSON
    pub fn get(&self) -> Option<Value> {
        lock(&self.current).clone()
    }

    /// The normalized payload decoded as `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match `T`
    pub fn try_get(&self) -> Result<Option<T>> {
        match self.get() {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// The normalized payload decoded as `T`, `None` when absent or when it
    /// does not decode
    pub fn get_as(&self) -> Option<T> {
        self.try_get().unwrap_or_else(|err| {
            warn!(error = %err, "Tool output does not match the expected shape");
            None
        })
    }
}
