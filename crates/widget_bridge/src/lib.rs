//! # Widget Bridge
//!
//! Reactive synchronization between an embedded widget and the host runtime
//! that renders it. The host publishes a mutable globals object (theme,
//! locale, tool output, persisted widget state, ...) on a well-known window
//! binding, which it may install late or never. This crate turns that object
//! into typed subscriptions and keeps a small application session on top.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use serde_json::json;
//! use widget_bridge::{App, GlobalKey, GlobalStore, Globals, HostWindow, LocalHost};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // 1. The window the host attaches its binding to
//!     let window = Arc::new(HostWindow::new());
//!     let store = GlobalStore::new(Arc::clone(&window));
//!
//!     // 2. The app derives its session from toolOutput and toolResponseMetadata
//!     let app = App::new(&store);
//!
//!     // 3. The host shows up and publishes a tool result
//!     let host = LocalHost::new();
//!     window.attach(host.clone());
//!     host.set_tool_output(&window, json!({ "structuredContent": { "balance": 12 } }));
//!
//!     assert_eq!(app.data(), Some(json!({ "balance": 12 })));
//!
//!     // 4. Actions go through the host's entry points
//!     host.set_tool_response("refresh", json!({ "ok": true }));
//!     let result = app.execute_tool("refresh", None).await?;
//!     println!("{result}");
//!     Ok(())
//! }
//! ```
//!
//! ## Core Concepts
//!
//! - [`HostWindow`] holds the optional [`Host`] binding and dispatches the two
//!   update channels: `openai:set_globals` events and posted messages.
//! - [`GlobalStore`] gives per-key [`Subscription`]s. A key is re-read on
//!   either channel and once when a late host binding is first seen by the
//!   startup poll.
//! - [`ToolOutput`] normalizes the `toolOutput` envelope
//!   (`{ structuredContent, _meta }`) into its useful payload.
//! - [`WidgetStateSync`] keeps an optimistic local copy of `widgetState` and
//!   pushes local writes back to the host.
//! - [`App`] memoizes an [`AppSession`] (data, upgrade flag, meta) and exposes
//!   `execute_tool` / `execute_prompt`. [`App::render`] swaps content for an
//!   [`UpgradePrompt`] when a payload carries the upgrade sentinel.

pub mod app;
pub mod error;
pub mod globals;
pub mod host;
pub mod local_host;
pub mod store;
mod sync;
pub mod tool_output;
pub mod upgrade;
pub mod widget_state;

pub use app::{App, AppContext, AppSession, Rendered, try_app_context, use_app_context};
pub use error::{BridgeError, Capability, HostError, Result};
pub use globals::{
    BridgeMessage, DeviceView, DisplayMode, GlobalKey, Globals, GlobalsSnapshot, SafeArea,
    SET_GLOBALS_EVENT_TYPE, SetGlobalsEvent, Theme,
};
pub use host::{EventKind, FileUpload, Host, HostWindow, ListenerId, UploadedFile, WindowEvent};
pub use local_host::{HostRecord, LocalHost, ToolCall};
pub use store::{GlobalStore, SubscriberFn, Subscription, SubscriptionToken};
pub use tool_output::{ToolOutput, normalize};
pub use upgrade::{DEFAULT_UPGRADE_KEY, PaymentAction, UpgradePrompt, UpgradeScan};
pub use widget_state::WidgetStateSync;

// Re-export config types that are part of the public API
pub use widget_bridge_config::{BridgeConfig, PollConfig};
