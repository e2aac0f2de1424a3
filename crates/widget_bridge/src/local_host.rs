//! In-memory [`Host`] implementation.
//!
//! Backs the replay CLI and the tests: fields are replaced wholesale, every
//! entry point call is recorded, tool calls are answered from a table of
//! canned results, and capabilities can be switched off one by one.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::{
    error::{BridgeError, Capability, HostError, Result},
    globals::{DisplayMode, GlobalKey, Globals},
    host::{FileUpload, Host, HostWindow, UploadedFile},
    sync::{lock, read, write},
};

/// Everything the host was asked to do, in call order per entry point
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HostRecord {
    pub widget_state_pushes: Vec<Value>,
    pub tool_calls: Vec<ToolCall>,
    pub follow_up_prompts: Vec<String>,
    pub display_mode_requests: Vec<DisplayMode>,
    pub opened_links: Vec<String>,
    pub intrinsic_heights: Vec<f64>,
    pub open_in_app_url: Option<String>,
    pub close_requested: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub name: String,
    pub args: Value,
}

#[derive(Default)]
pub struct LocalHost {
    globals: RwLock<Globals>,
    broken: AtomicBool,
    disabled: RwLock<HashSet<Capability>>,
    tool_results: RwLock<HashMap<String, std::result::Result<Value, HostError>>>,
    files: Mutex<HashMap<String, FileUpload>>,
    record: Mutex<HostRecord>,
}

impl std::fmt::Debug for LocalHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalHost")
            .field("globals", &read(&self.globals).len())
            .field("broken", &self.broken.load(Ordering::SeqCst))
            .field("disabled", &read(&self.disabled))
            .finish_non_exhaustive()
    }
}

impl LocalHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_globals(globals: Globals) -> Arc<Self> {
        let host = Self::default();
        *write(&host.globals) = globals;
        Arc::new(host)
    }

    /// Replaces the given fields without notifying anyone
    pub fn replace_globals(&self, update: Globals) {
        let mut globals = write(&self.globals);
        for key in update.keys() {
            if let Some(value) = update.get(key) {
                globals.insert(key, value.clone());
            }
        }
    }

    /// Replaces the given fields and dispatches the broadcast update event
    pub fn set_globals(&self, window: &HostWindow, update: Globals) {
        self.replace_globals(update.clone());
        window.dispatch_set_globals(update);
    }

    /// Replaces the given fields and announces them over the message channel
    ///
    /// # Errors
    ///
    /// Returns an error if the update cannot be encoded
    pub fn post_globals(&self, window: &HostWindow, update: Globals) -> Result<()> {
        self.replace_globals(update.clone());
        window.post_set_globals(update)
    }

    /// Sets the tool output, mirroring how the host delivers a tool result
    pub fn set_tool_output(&self, window: &HostWindow, payload: Value) {
        self.set_globals(window, Globals::new().with(GlobalKey::ToolOutput, payload));
    }

    pub fn globals(&self) -> Globals {
        read(&self.globals).clone()
    }

    /// Makes every subsequent read fail until cleared
    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    pub fn disable(&self, capability: Capability) {
        write(&self.disabled).insert(capability);
    }

    pub fn enable(&self, capability: Capability) {
        write(&self.disabled).remove(&capability);
    }

    pub fn set_tool_response(&self, name: impl Into<String>, response: Value) {
        write(&self.tool_results).insert(name.into(), Ok(response));
    }

    pub fn set_tool_error(&self, name: impl Into<String>, error: HostError) {
        write(&self.tool_results).insert(name.into(), Err(error));
    }

    pub fn record(&self) -> HostRecord {
        lock(&self.record).clone()
    }

    pub fn widget_state_pushes(&self) -> Vec<Value> {
        lock(&self.record).widget_state_pushes.clone()
    }

    fn ensure(&self, capability: Capability) -> Result<()> {
        if read(&self.disabled).contains(&capability) {
            return Err(BridgeError::CapabilityUnavailable(capability));
        }
        Ok(())
    }
}

#[async_trait]
impl Host for LocalHost {
    fn read_global(&self, key: GlobalKey) -> std::result::Result<Option<Value>, HostError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(HostError::Read(format!("{key} is not readable")));
        }
        Ok(read(&self.globals).get(key).cloned())
    }

    fn set_widget_state(&self, state: Value) -> Result<()> {
        self.ensure(Capability::SetWidgetState)?;
        debug!("Persisting widget state");
        write(&self.globals).insert(GlobalKey::WidgetState, state.clone());
        lock(&self.record).widget_state_pushes.push(state);
        Ok(())
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<Value> {
        self.ensure(Capability::CallTool)?;
        lock(&self.record).tool_calls.push(ToolCall {
            name: name.to_string(),
            args,
        });

        let result = read(&self.tool_results).get(name).cloned();
        match result {
            Some(Ok(value)) => Ok(value),
            Some(Err(error)) => Err(error.into()),
            None => Err(HostError::Failed(format!("Unknown tool \"{name}\"")).into()),
        }
    }

    async fn send_follow_up_message(&self, prompt: &str) -> Result<()> {
        self.ensure(Capability::SendFollowUpMessage)?;
        lock(&self.record).follow_up_prompts.push(prompt.to_string());
        Ok(())
    }

    async fn upload_file(&self, file: FileUpload) -> Result<UploadedFile> {
        self.ensure(Capability::UploadFile)?;
        let mut files = lock(&self.files);
        let file_id = format!("file-{}", files.len() + 1);
        files.insert(file_id.clone(), file);
        Ok(UploadedFile { file_id })
    }

    async fn get_file_download_url(&self, file_id: &str) -> Result<String> {
        self.ensure(Capability::GetFileDownloadUrl)?;
        if !lock(&self.files).contains_key(file_id) {
            return Err(HostError::Failed(format!("Unknown file \"{file_id}\"")).into());
        }
        Ok(format!("local://files/{file_id}"))
    }

    async fn request_display_mode(&self, mode: DisplayMode) -> Result<()> {
        self.ensure(Capability::RequestDisplayMode)?;
        write(&self.globals).insert(GlobalKey::DisplayMode, serde_json::to_value(mode)?);
        lock(&self.record).display_mode_requests.push(mode);
        Ok(())
    }

    async fn request_modal(&self, _options: Value) -> Result<()> {
        self.ensure(Capability::RequestModal)
    }

    fn notify_intrinsic_height(&self, height: f64) -> Result<()> {
        self.ensure(Capability::NotifyIntrinsicHeight)?;
        lock(&self.record).intrinsic_heights.push(height);
        Ok(())
    }

    fn open_external(&self, href: &str) -> Result<()> {
        self.ensure(Capability::OpenExternal)?;
        lock(&self.record).opened_links.push(href.to_string());
        Ok(())
    }

    fn set_open_in_app_url(&self, href: &str) -> Result<()> {
        self.ensure(Capability::SetOpenInAppUrl)?;
        lock(&self.record).open_in_app_url = Some(href.to_string());
        Ok(())
    }

    fn request_close(&self) -> Result<()> {
        self.ensure(Capability::RequestClose)?;
        lock(&self.record).close_requested = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_updates_replace_fields() {
        let host = LocalHost::with_globals(
            Globals::new().with(GlobalKey::WidgetState, json!({ "count": 1, "clicks": 9 })),
        );
        host.replace_globals(Globals::new().with(GlobalKey::WidgetState, json!({ "count": 2 })));

        assert_eq!(
            host.read_global(GlobalKey::WidgetState),
            Ok(Some(json!({ "count": 2 })))
        );
    }

    #[tokio::test]
    async fn test_tool_calls_use_canned_results() {
        let host = LocalHost::new();
        host.set_tool_response("get_balance", json!({ "balance": "12.5" }));
        host.set_tool_error("transfer", HostError::Rejected(json!({ "code": 402 })));

        let value = host.call_tool("get_balance", json!({})).await.unwrap();
        assert_eq!(value, json!({ "balance": "12.5" }));

        let err = host.call_tool("transfer", json!({})).await.unwrap_err();
        assert!(matches!(err, BridgeError::Host(HostError::Rejected(_))));

        let err = host.call_tool("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, BridgeError::Host(HostError::Failed(_))));

        assert_eq!(host.record().tool_calls.len(), 3);
    }

    #[tokio::test]
    async fn test_disabled_capability_is_unavailable() {
        let host = LocalHost::new();
        host.disable(Capability::SendFollowUpMessage);

        let err = host.send_follow_up_message("hi").await.unwrap_err();
        assert!(err.is_capability_unavailable());

        host.enable(Capability::SendFollowUpMessage);
        host.send_follow_up_message("hi").await.unwrap();
        assert_eq!(host.record().follow_up_prompts, vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn test_uploaded_files_get_download_urls() {
        let host = LocalHost::new();
        let uploaded = host
            .upload_file(FileUpload {
                name: "avatar.png".into(),
                mime_type: "image/png".into(),
                bytes: vec![1, 2, 3],
            })
            .await
            .unwrap();

        let url = host.get_file_download_url(&uploaded.file_id).await.unwrap();
        assert_eq!(url, "local://files/file-1");
        assert!(host.get_file_download_url("file-9").await.is_err());
    }

    #[test]
    fn test_broken_host_fails_reads() {
        let host = LocalHost::new();
        host.set_broken(true);
        assert!(host.read_global(GlobalKey::Locale).is_err());
        host.set_broken(false);
        assert_eq!(host.read_global(GlobalKey::Locale), Ok(None));
    }
}
