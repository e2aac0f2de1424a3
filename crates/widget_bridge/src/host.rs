//! The host binding and the window it lives on.
//!
//! [`Host`] is the object the embedding application installs for the widget:
//! readable global fields plus a set of optional entry points. [`HostWindow`]
//! is the well-known scope holding that binding. The host may attach it late
//! or never, and it doubles as the event target for the two update channels.

use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::{
    error::{BridgeError, Capability, HostError, Result},
    globals::{BridgeMessage, DisplayMode, GlobalKey, Globals, SetGlobalsEvent},
    sync::{lock, read, write},
};

/// File handed to [`Host::upload_file`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUpload {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub file_id: String,
}

/// The host-provided binding.
///
/// Only [`Host::read_global`] is mandatory. Every entry point defaults to
/// [`BridgeError::CapabilityUnavailable`], so a host implements exactly the
/// capabilities it offers and callers can tell "missing" from "failed".
#[async_trait]
pub trait Host: Send + Sync {
    /// Reads the current value of a global field. `Ok(None)` means the field
    /// is not set.
    fn read_global(&self, key: GlobalKey) -> std::result::Result<Option<Value>, HostError>;

    fn set_widget_state(&self, _state: Value) -> Result<()> {
        Err(BridgeError::CapabilityUnavailable(Capability::SetWidgetState))
    }

    async fn call_tool(&self, _name: &str, _args: Value) -> Result<Value> {
        Err(BridgeError::CapabilityUnavailable(Capability::CallTool))
    }

    async fn send_follow_up_message(&self, _prompt: &str) -> Result<()> {
        Err(BridgeError::CapabilityUnavailable(
            Capability::SendFollowUpMessage,
        ))
    }

    async fn upload_file(&self, _file: FileUpload) -> Result<UploadedFile> {
        Err(BridgeError::CapabilityUnavailable(Capability::UploadFile))
    }

    async fn get_file_download_url(&self, _file_id: &str) -> Result<String> {
        Err(BridgeError::CapabilityUnavailable(
            Capability::GetFileDownloadUrl,
        ))
    }

    async fn request_display_mode(&self, _mode: DisplayMode) -> Result<()> {
        Err(BridgeError::CapabilityUnavailable(
            Capability::RequestDisplayMode,
        ))
    }

    async fn request_modal(&self, _options: Value) -> Result<()> {
        Err(BridgeError::CapabilityUnavailable(Capability::RequestModal))
    }

    fn notify_intrinsic_height(&self, _height: f64) -> Result<()> {
        Err(BridgeError::CapabilityUnavailable(
            Capability::NotifyIntrinsicHeight,
        ))
    }

    fn open_external(&self, _href: &str) -> Result<()> {
        Err(BridgeError::CapabilityUnavailable(Capability::OpenExternal))
    }

    fn set_open_in_app_url(&self, _href: &str) -> Result<()> {
        Err(BridgeError::CapabilityUnavailable(Capability::SetOpenInAppUrl))
    }

    fn request_close(&self) -> Result<()> {
        Err(BridgeError::CapabilityUnavailable(Capability::RequestClose))
    }
}

/// Events delivered on the window
#[derive(Debug, Clone, PartialEq)]
pub enum WindowEvent {
    /// Broadcast dispatched by the host under [`crate::SET_GLOBALS_EVENT_TYPE`]
    SetGlobals(SetGlobalsEvent),
    /// Generic cross-context message with an arbitrary payload
    Message(Value),
}

impl WindowEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WindowEvent::SetGlobals(_) => EventKind::SetGlobals,
            WindowEvent::Message(_) => EventKind::Message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SetGlobals,
    Message,
}

pub type EventListener = Arc<dyn Fn(&WindowEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(ListenerId, EventKind, EventListener)>,
}

/// Global scope the widget runs in
#[derive(Default)]
pub struct HostWindow {
    binding: RwLock<Option<Arc<dyn Host>>>,
    listeners: Mutex<Listeners>,
}

impl std::fmt::Debug for HostWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostWindow")
            .field("attached", &self.is_attached())
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

impl HostWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the host binding, replacing any previous one
    pub fn attach(&self, host: Arc<dyn Host>) {
        *write(&self.binding) = Some(host);
    }

    /// Removes the host binding, returning it if one was installed
    pub fn detach(&self) -> Option<Arc<dyn Host>> {
        write(&self.binding).take()
    }

    pub fn binding(&self) -> Option<Arc<dyn Host>> {
        read(&self.binding).clone()
    }

    pub fn is_attached(&self) -> bool {
        read(&self.binding).is_some()
    }

    /// Reads a global field through the binding. A missing binding reads as
    /// an unset field.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the binding fails the read
    pub fn read_global(&self, key: GlobalKey) -> std::result::Result<Option<Value>, HostError> {
        match self.binding() {
            Some(host) => host.read_global(key),
            None => Ok(None),
        }
    }

    /// Registers a listener for one kind of event
    pub fn add_event_listener(&self, kind: EventKind, listener: EventListener) -> ListenerId {
        let mut listeners = lock(&self.listeners);
        listeners.next_id += 1;
        let id = ListenerId(listeners.next_id);
        listeners.entries.push((id, kind, listener));
        id
    }

    /// Removes a listener. Returns `false` if it was already removed.
    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.entries.len();
        listeners.entries.retain(|(entry_id, _, _)| *entry_id != id);
        before != listeners.entries.len()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).entries.len()
    }

    /// Delivers an event to every listener of its kind, in registration order.
    ///
    /// Listeners are collected before any of them runs, so a listener may add
    /// or remove listeners without deadlocking.
    pub fn dispatch(&self, event: &WindowEvent) {
        let kind = event.kind();
        let targets: Vec<EventListener> = lock(&self.listeners)
            .entries
            .iter()
            .filter(|(_, entry_kind, _)| *entry_kind == kind)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();

        trace!(?kind, listeners = targets.len(), "Dispatching window event");
        for listener in targets {
            listener(event);
        }
    }

    /// Dispatches the host's broadcast update event
    pub fn dispatch_set_globals(&self, globals: Globals) {
        self.dispatch(&WindowEvent::SetGlobals(SetGlobalsEvent { globals }));
    }

    /// Posts a cross-context message
    pub fn post_message(&self, data: Value) {
        self.dispatch(&WindowEvent::Message(data));
    }

    /// Posts a globals update through the message channel
    ///
    /// # Errors
    ///
    /// Returns an error if the update cannot be encoded as a message
    pub fn post_set_globals(&self, globals: Globals) -> Result<()> {
        let data = serde_json::to_value(BridgeMessage::set_globals(globals))?;
        self.post_message(data);
        Ok(())
    }
}
