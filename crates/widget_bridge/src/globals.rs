//! Keys and payload shapes of the host-owned globals object.
//!
//! The host exposes a fixed set of fields. Updates arrive as partial
//! mappings: a key that is missing from an update is unchanged, a key that is
//! present (even with `null`) has been replaced.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tag shared by the broadcast event and the cross-context message fallback
pub const SET_GLOBALS_EVENT_TYPE: &str = "openai:set_globals";

/// Field of the host globals object a consumer can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GlobalKey {
    ToolInput,
    ToolOutput,
    ToolResponseMetadata,
    WidgetState,
    Theme,
    DisplayMode,
    MaxHeight,
    SafeArea,
    View,
    UserAgent,
    Locale,
}

impl GlobalKey {
    pub const ALL: [GlobalKey; 11] = [
        GlobalKey::ToolInput,
        GlobalKey::ToolOutput,
        GlobalKey::ToolResponseMetadata,
        GlobalKey::WidgetState,
        GlobalKey::Theme,
        GlobalKey::DisplayMode,
        GlobalKey::MaxHeight,
        GlobalKey::SafeArea,
        GlobalKey::View,
        GlobalKey::UserAgent,
        GlobalKey::Locale,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GlobalKey::ToolInput => "toolInput",
            GlobalKey::ToolOutput => "toolOutput",
            GlobalKey::ToolResponseMetadata => "toolResponseMetadata",
            GlobalKey::WidgetState => "widgetState",
            GlobalKey::Theme => "theme",
            GlobalKey::DisplayMode => "displayMode",
            GlobalKey::MaxHeight => "maxHeight",
            GlobalKey::SafeArea => "safeArea",
            GlobalKey::View => "view",
            GlobalKey::UserAgent => "userAgent",
            GlobalKey::Locale => "locale",
        }
    }
}

impl fmt::Display for GlobalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown global key \"{0}\"")]
pub struct UnknownGlobalKey(pub String);

impl FromStr for GlobalKey {
    type Err = UnknownGlobalKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GlobalKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| UnknownGlobalKey(s.to_string()))
    }
}

/// Partial mapping of global fields to their new values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Globals(Map<String, Value>);

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: GlobalKey, value: Value) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: GlobalKey, value: Value) -> Option<Value> {
        self.0.insert(key.as_str().to_string(), value)
    }

    pub fn remove(&mut self, key: GlobalKey) -> Option<Value> {
        self.0.remove(key.as_str())
    }

    /// Whether this update touches `key`. A present `null` counts as a change.
    pub fn contains(&self, key: GlobalKey) -> bool {
        self.0.contains_key(key.as_str())
    }

    pub fn get(&self, key: GlobalKey) -> Option<&Value> {
        self.0.get(key.as_str())
    }

    /// Known keys carried by this update, unknown field names are skipped
    pub fn keys(&self) -> impl Iterator<Item = GlobalKey> + '_ {
        self.0.keys().filter_map(|name| name.parse().ok())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<Map<String, Value>> for Globals {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Payload of the host's broadcast event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetGlobalsEvent {
    pub globals: Globals,
}

/// Cross-context message carrying the same payload as [`SetGlobalsEvent`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub globals: Option<Globals>,
}

impl BridgeMessage {
    pub fn set_globals(globals: Globals) -> Self {
        Self {
            kind: SET_GLOBALS_EVENT_TYPE.to_string(),
            globals: Some(globals),
        }
    }

    /// Extracts the globals update from an arbitrary message payload.
    ///
    /// Returns `None` for messages that are not bridge updates.
    pub fn parse_update(data: &Value) -> Option<Globals> {
        let message = BridgeMessage::deserialize(data).ok()?;
        if message.kind != SET_GLOBALS_EVENT_TYPE {
            return None;
        }
        message.globals
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    Inline,
    Pip,
    Fullscreen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceView {
    Mobile,
    Desktop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SafeArea {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

/// Typed view of every global field at one point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalsSnapshot {
    pub tool_input: Option<Value>,
    pub tool_output: Option<Value>,
    pub tool_response_metadata: Option<Value>,
    pub widget_state: Option<Value>,
    pub theme: Option<Theme>,
    pub display_mode: Option<DisplayMode>,
    pub max_height: Option<f64>,
    pub safe_area: Option<SafeArea>,
    pub view: Option<DeviceView>,
    pub user_agent: Option<String>,
    pub locale: Option<String>,
}

impl GlobalsSnapshot {
    /// Builds a snapshot from a per-key reader. Fields that fail to decode
    /// into their typed form are left empty.
    pub fn collect(mut read: impl FnMut(GlobalKey) -> Option<Value>) -> Self {
        Self {
            tool_input: read(GlobalKey::ToolInput),
            tool_output: read(GlobalKey::ToolOutput),
            tool_response_metadata: read(GlobalKey::ToolResponseMetadata),
            widget_state: read(GlobalKey::WidgetState),
            theme: read(GlobalKey::Theme).and_then(decode),
            display_mode: read(GlobalKey::DisplayMode).and_then(decode),
            max_height: read(GlobalKey::MaxHeight).and_then(|v| v.as_f64()),
            safe_area: read(GlobalKey::SafeArea).and_then(decode),
            view: read(GlobalKey::View).and_then(decode),
            user_agent: read(GlobalKey::UserAgent).and_then(decode),
            locale: read(GlobalKey::Locale).and_then(decode),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Option<T> {
    serde_json::from_value(value).ok()
}
