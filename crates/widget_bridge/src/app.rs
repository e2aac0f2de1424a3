//! Application session facade.
//!
//! [`App`] composes the store bridge, the tool output normalizer and the
//! upgrade scan into one handle: a memoized [`AppSession`] view plus the
//! actions a widget may ask the host for.

use std::{
    cell::RefCell,
    fmt,
    sync::{Arc, Mutex},
};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use crate::{
    error::{BridgeError, Capability, Result},
    globals::{DisplayMode, GlobalKey},
    host::{FileUpload, Host, HostWindow, UploadedFile},
    store::{GlobalStore, Subscription},
    sync::lock,
    tool_output::{META_KEY, normalize},
    upgrade::{DEFAULT_UPGRADE_KEY, UpgradePrompt, UpgradeScan},
};

/// Derived view of the current tool result
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSession {
    /// Normalized tool output
    pub data: Option<Value>,
    /// Whether some payload carries the upgrade sentinel
    pub payment_required: bool,
    pub meta: Option<Value>,
}

impl AppSession {
    /// Derives the session from the raw `toolOutput` and
    /// `toolResponseMetadata` values.
    ///
    /// Both the upgrade scan and the meta lookup prefer the normalized data,
    /// then the raw tool output, then the response metadata.
    pub fn derive(tool_output: Option<&Value>, metadata: Option<&Value>, upgrade_key: &str) -> Self {
        let data = normalize(tool_output);
        let upgrade = UpgradeScan::scan([data.as_ref(), tool_output, metadata], upgrade_key);

        let meta = extract_meta(data.as_ref())
            .or_else(|| extract_meta(tool_output))
            .or_else(|| metadata.filter(|m| !m.is_null()))
            .or_else(|| upgrade.record())
            .cloned();

        Self {
            payment_required: upgrade.is_found(),
            data,
            meta,
        }
    }

    /// Decodes `data` as `T`
    ///
    /// # Errors
    ///
    /// Returns an error if the data does not match `T`
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match &self.data {
            Some(data) => Ok(Some(serde_json::from_value(data.clone())?)),
            None => Ok(None),
        }
    }
}

fn extract_meta(value: Option<&Value>) -> Option<&Value> {
    value?
        .as_object()?
        .get(META_KEY)
        .filter(|meta| !meta.is_null())
}

struct Derived {
    tool_output: Option<Value>,
    metadata: Option<Value>,
    session: Arc<AppSession>,
    revision: u64,
}

impl Derived {
    fn rebuild(&mut self, upgrade_key: &str) {
        self.session = Arc::new(AppSession::derive(
            self.tool_output.as_ref(),
            self.metadata.as_ref(),
            upgrade_key,
        ));
        self.revision += 1;
        trace!(
            revision = self.revision,
            payment_required = self.session.payment_required,
            "Rebuilt app session"
        );
    }
}

struct AppInner {
    _subscriptions: [Subscription; 2],
    store: GlobalStore,
    upgrade_key: Arc<str>,
    derived: Arc<Mutex<Derived>>,
}

/// Single access point for a widget: session view plus host actions
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("upgrade_key", &self.inner.upgrade_key)
            .field("revision", &self.revision())
            .field("session", &self.session())
            .finish()
    }
}

impl App {
    pub fn new(store: &GlobalStore) -> Self {
        Self::with_upgrade_key(store, DEFAULT_UPGRADE_KEY)
    }

    pub fn with_upgrade_key(store: &GlobalStore, upgrade_key: impl Into<Arc<str>>) -> Self {
        let upgrade_key: Arc<str> = upgrade_key.into();
        let derived = Arc::new(Mutex::new(Derived {
            tool_output: None,
            metadata: None,
            session: Arc::new(AppSession::default()),
            revision: 0,
        }));

        let tool_output = Self::watch(store, GlobalKey::ToolOutput, &derived, &upgrade_key);
        let metadata = Self::watch(store, GlobalKey::ToolResponseMetadata, &derived, &upgrade_key);

        {
            let mut derived = lock(&derived);
            derived.tool_output = tool_output.current();
            derived.metadata = metadata.current();
            derived.rebuild(&upgrade_key);
        }

        Self {
            inner: Arc::new(AppInner {
                _subscriptions: [tool_output, metadata],
                store: store.clone(),
                upgrade_key,
                derived,
            }),
        }
    }

    fn watch(
        store: &GlobalStore,
        key: GlobalKey,
        derived: &Arc<Mutex<Derived>>,
        upgrade_key: &Arc<str>,
    ) -> Subscription {
        let derived = Arc::clone(derived);
        let upgrade_key = Arc::clone(upgrade_key);
        store.subscribe(key, move |value| {
            let mut derived = lock(&derived);
            let slot = match key {
                GlobalKey::ToolOutput => &mut derived.tool_output,
                _ => &mut derived.metadata,
            };
            if slot.as_ref() == value {
                trace!(key = %key, "Value unchanged, keeping app session");
                return;
            }
            *slot = value.cloned();
            derived.rebuild(&upgrade_key);
        })
    }

    /// The current session. The same `Arc` is returned until the value of
    /// `toolOutput` or `toolResponseMetadata` actually changes.
    pub fn session(&self) -> Arc<AppSession> {
        Arc::clone(&lock(&self.inner.derived).session)
    }

    /// Number of times the session has been derived
    pub fn revision(&self) -> u64 {
        lock(&self.inner.derived).revision
    }

    pub fn data(&self) -> Option<Value> {
        self.session().data.clone()
    }

    pub fn payment_required(&self) -> bool {
        self.session().payment_required
    }

    pub fn meta(&self) -> Option<Value> {
        self.session().meta.clone()
    }

    pub fn upgrade_key(&self) -> &str {
        &self.inner.upgrade_key
    }

    pub fn store(&self) -> &GlobalStore {
        &self.inner.store
    }

    pub fn window(&self) -> &Arc<HostWindow> {
        self.inner.store.window()
    }

    /// The prompt to show in place of the app, if payment is required
    pub fn upgrade_prompt(&self) -> Option<UpgradePrompt> {
        let session = self.session();
        session
            .payment_required
            .then(|| UpgradePrompt::from_meta(session.meta.as_ref()))
    }

    /// Invokes a tool through the host. `args` defaults to an empty object.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::CapabilityUnavailable`] without a host or a
    /// `callTool` entry point, otherwise whatever the host rejects with
    pub async fn execute_tool(&self, name: &str, args: Option<Value>) -> Result<Value> {
        let host = self.host(Capability::CallTool)?;

        debug!(tool = %name, "Calling tool through host");
        let result = host.call_tool(name, args.unwrap_or_else(|| json!({}))).await;
        if let Err(err) = &result {
            warn!(tool = %name, error = %err, "Tool call failed");
        }
        result
    }

    /// Sends a follow-up prompt to the conversation.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::CapabilityUnavailable`] without a host or a
    /// `sendFollowUpMessage` entry point, otherwise the host's rejection
    pub async fn execute_prompt(&self, prompt: &str) -> Result<()> {
        let host = self.host(Capability::SendFollowUpMessage)?;

        debug!("Sending follow-up message through host");
        host.send_follow_up_message(prompt).await
    }

    /// # Errors
    ///
    /// Returns [`BridgeError::CapabilityUnavailable`] without a host or a
    /// `requestDisplayMode` entry point, otherwise the host's rejection
    pub async fn request_display_mode(&self, mode: DisplayMode) -> Result<()> {
        self.host(Capability::RequestDisplayMode)?
            .request_display_mode(mode)
            .await
    }

    /// # Errors
    ///
    /// Returns [`BridgeError::CapabilityUnavailable`] without a host or an
    /// `openExternal` entry point
    pub fn open_external(&self, href: &str) -> Result<()> {
        self.host(Capability::OpenExternal)?.open_external(href)
    }

    /// Uploads a file through the host, returning the id it was stored under.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::CapabilityUnavailable`] without a host or an
    /// `uploadFile` entry point, otherwise the host's rejection
    pub async fn upload_file(&self, file: FileUpload) -> Result<UploadedFile> {
        let host = self.host(Capability::UploadFile)?;
        debug!(name = %file.name, mime_type = %file.mime_type, "Uploading file through host");
        host.upload_file(file).await
    }

    /// # Errors
    ///
    /// Returns [`BridgeError::CapabilityUnavailable`] without a host or a
    /// `getFileDownloadUrl` entry point, otherwise the host's rejection
    pub async fn get_file_download_url(&self, file_id: &str) -> Result<String> {
        self.host(Capability::GetFileDownloadUrl)?
            .get_file_download_url(file_id)
            .await
    }

    /// # Errors
    ///
    /// Returns [`BridgeError::CapabilityUnavailable`] without a host or a
    /// `requestModal` entry point, otherwise the host's rejection
    pub async fn request_modal(&self, options: Value) -> Result<()> {
        self.host(Capability::RequestModal)?
            .request_modal(options)
            .await
    }

    /// Tells the host how tall the rendered content is
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::CapabilityUnavailable`] without a host or a
    /// `notifyIntrinsicHeight` entry point
    pub fn notify_intrinsic_height(&self, height: f64) -> Result<()> {
        self.host(Capability::NotifyIntrinsicHeight)?
            .notify_intrinsic_height(height)
    }

    /// # Errors
    ///
    /// Returns [`BridgeError::CapabilityUnavailable`] without a host or a
    /// `setOpenInAppUrl` entry point
    pub fn set_open_in_app_url(&self, href: &str) -> Result<()> {
        self.host(Capability::SetOpenInAppUrl)?
            .set_open_in_app_url(href)
    }

    /// # Errors
    ///
    /// Returns [`BridgeError::CapabilityUnavailable`] without a host or a
    /// `requestClose` entry point
    pub fn request_close(&self) -> Result<()> {
        self.host(Capability::RequestClose)?.request_close()
    }

    /// The attached binding, or `capability` reported as unavailable
    fn host(&self, capability: Capability) -> Result<Arc<dyn Host>> {
        self.window()
            .binding()
            .ok_or(BridgeError::CapabilityUnavailable(capability))
    }

    /// Renders the app: the upgrade prompt while payment is required,
    /// otherwise `children` with this app available through
    /// [`use_app_context`].
    pub fn render<R>(&self, children: impl FnOnce(&AppContext) -> R) -> Rendered<R> {
        let session = self.session();
        if session.payment_required {
            debug!("Payment required, rendering upgrade prompt");
            return Rendered::Upgrade(UpgradePrompt::from_meta(session.meta.as_ref()));
        }

        let context = AppContext {
            app: self.clone(),
            session,
        };
        let _scope = ContextScope::enter(context.clone());
        Rendered::Content(children(&context))
    }
}

/// Outcome of [`App::render`]
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered<R> {
    Upgrade(UpgradePrompt),
    Content(R),
}

impl<R> Rendered<R> {
    pub fn content(self) -> Option<R> {
        match self {
            Rendered::Content(content) => Some(content),
            Rendered::Upgrade(_) => None,
        }
    }

    pub fn is_upgrade(&self) -> bool {
        matches!(self, Rendered::Upgrade(_))
    }
}

/// What [`App::render`] hands to the code it renders
#[derive(Debug, Clone)]
pub struct AppContext {
    app: App,
    session: Arc<AppSession>,
}

impl AppContext {
    pub fn app(&self) -> &App {
        &self.app
    }

    /// The session as of the render
    pub fn session(&self) -> &Arc<AppSession> {
        &self.session
    }
}

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<AppContext>> = const { RefCell::new(Vec::new()) };
}

struct ContextScope;

impl ContextScope {
    fn enter(context: AppContext) -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(context));
        ContextScope
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// The innermost rendering app's context.
///
/// # Errors
///
/// Returns [`BridgeError::MissingContext`] outside of [`App::render`]
pub fn try_app_context() -> Result<AppContext> {
    CONTEXT_STACK
        .with(|stack| stack.borrow().last().cloned())
        .ok_or(BridgeError::MissingContext)
}

/// The innermost rendering app's context.
///
/// # Panics
///
/// Panics outside of [`App::render`]; reaching for the app context there is a
/// programming error.
pub fn use_app_context() -> AppContext {
    match try_app_context() {
        Ok(context) => context,
        Err(_) => panic!("use_app_context must be used within App::render"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_prefers_nested_meta() {
        let tool_output = json!({
            "structuredContent": { "items": [1], "_meta": { "source": "data" } },
            "_meta": { "source": "envelope" }
        });
        let metadata = json!({ "source": "response" });

        let session =
            AppSession::derive(Some(&tool_output), Some(&metadata), DEFAULT_UPGRADE_KEY);
        assert_eq!(
            session.data,
            Some(json!({ "items": [1], "_meta": { "source": "data" } }))
        );
        assert_eq!(session.meta, Some(json!({ "source": "data" })));
        assert!(!session.payment_required);
    }

    #[test]
    fn test_session_meta_falls_back_in_order() {
        let enveloped = json!({ "structuredContent": { "items": [] }, "_meta": { "page": 1 } });
        let metadata = json!({ "requestId": "r-1" });

        let session = AppSession::derive(Some(&enveloped), Some(&metadata), DEFAULT_UPGRADE_KEY);
        assert_eq!(session.meta, Some(json!({ "page": 1 })));

        let bare = json!({ "items": [] });
        let session = AppSession::derive(Some(&bare), Some(&metadata), DEFAULT_UPGRADE_KEY);
        assert_eq!(session.meta, Some(metadata.clone()));

        let session = AppSession::derive(Some(&bare), None, DEFAULT_UPGRADE_KEY);
        assert_eq!(session.meta, None);
    }

    #[test]
    fn test_upgrade_in_metadata() {
        let metadata = json!({ "_joai/upgrade": true, "feature": "exports" });
        let session = AppSession::derive(Some(&json!({ "rows": 3 })), Some(&metadata), DEFAULT_UPGRADE_KEY);

        assert!(session.payment_required);
        assert_eq!(session.meta, Some(metadata));
    }

    #[test]
    fn test_upgrade_record_is_last_meta_fallback() {
        let tool_output = json!({ "_joai/upgrade": true, "feature": "x" });
        let session = AppSession::derive(Some(&tool_output), None, DEFAULT_UPGRADE_KEY);

        assert!(session.payment_required);
        assert_eq!(session.meta, Some(tool_output));
    }

    #[test]
    fn test_custom_upgrade_key() {
        let tool_output = json!({ "acme/upgrade": true });
        assert!(!AppSession::derive(Some(&tool_output), None, DEFAULT_UPGRADE_KEY).payment_required);
        assert!(AppSession::derive(Some(&tool_output), None, "acme/upgrade").payment_required);
    }

    #[test]
    fn test_data_as_decodes() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Account {
            address: String,
        }

        let tool_output = json!({ "structuredContent": { "address": "erd1qqq" } });
        let session = AppSession::derive(Some(&tool_output), None, DEFAULT_UPGRADE_KEY);
        assert_eq!(
            session.data_as::<Account>().unwrap(),
            Some(Account {
                address: "erd1qqq".into()
            })
        );
        assert!(session.data_as::<Vec<u8>>().is_err());
    }

    fn attached_app() -> (Arc<HostWindow>, Arc<crate::LocalHost>, App) {
        let window = Arc::new(HostWindow::new());
        let host = crate::LocalHost::new();
        window.attach(host.clone());
        let store = GlobalStore::new(Arc::clone(&window));
        (window, host, App::new(&store))
    }

    #[tokio::test]
    async fn test_session_is_memoized_between_changes() {
        let (window, host, app) = attached_app();
        host.set_tool_output(&window, json!({ "structuredContent": { "n": 1 } }));

        let first = app.session();
        assert!(Arc::ptr_eq(&first, &app.session()));

        host.set_tool_output(&window, json!({ "structuredContent": { "n": 2 } }));
        let second = app.session();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.data, Some(json!({ "n": 2 })));
    }

    #[tokio::test]
    async fn test_repeated_payload_keeps_session() {
        let (window, host, app) = attached_app();
        host.set_tool_output(&window, json!({ "n": 1 }));
        let first = app.session();
        let revision = app.revision();

        host.set_tool_output(&window, json!({ "n": 1 }));
        assert!(Arc::ptr_eq(&first, &app.session()));
        assert_eq!(app.revision(), revision);
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_attaching_without_tool_output_keeps_session() {
        let window = Arc::new(HostWindow::new());
        let app = App::new(&GlobalStore::new(Arc::clone(&window)));
        let first = app.session();

        window.attach(crate::LocalHost::new());
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        assert!(Arc::ptr_eq(&first, &app.session()));
        assert_eq!(app.revision(), 1);
    }

    #[tokio::test]
    async fn test_app_outlives_dropped_store_handle() {
        let window = Arc::new(HostWindow::new());
        let host = crate::LocalHost::new();
        window.attach(host.clone());
        let app = App::new(&GlobalStore::new(Arc::clone(&window)));

        host.set_tool_output(&window, json!({ "rows": 1 }));
        assert_eq!(app.data(), Some(json!({ "rows": 1 })));
    }

    #[tokio::test]
    async fn test_execute_tool_defaults_to_empty_args() {
        let (_window, host, app) = attached_app();
        host.set_tool_response("refresh", json!({ "ok": true }));

        assert_eq!(
            app.execute_tool("refresh", None).await.unwrap(),
            json!({ "ok": true })
        );
        assert_eq!(host.record().tool_calls[0].args, json!({}));
    }

    #[tokio::test]
    async fn test_actions_without_host_are_unavailable() {
        let window = Arc::new(HostWindow::new());
        let app = App::new(&GlobalStore::new(window));

        assert!(matches!(
            app.execute_tool("refresh", None).await,
            Err(BridgeError::CapabilityUnavailable(Capability::CallTool))
        ));
        assert!(matches!(
            app.execute_prompt("hello").await,
            Err(BridgeError::CapabilityUnavailable(Capability::SendFollowUpMessage))
        ));
        assert!(matches!(
            app.open_external("https://example.com"),
            Err(BridgeError::CapabilityUnavailable(Capability::OpenExternal))
        ));
        assert!(matches!(
            app.get_file_download_url("file-1").await,
            Err(BridgeError::CapabilityUnavailable(Capability::GetFileDownloadUrl))
        ));
        assert!(matches!(
            app.request_modal(json!({})).await,
            Err(BridgeError::CapabilityUnavailable(Capability::RequestModal))
        ));
        assert!(matches!(
            app.notify_intrinsic_height(320.0),
            Err(BridgeError::CapabilityUnavailable(Capability::NotifyIntrinsicHeight))
        ));
        assert!(matches!(
            app.set_open_in_app_url("https://example.com/app"),
            Err(BridgeError::CapabilityUnavailable(Capability::SetOpenInAppUrl))
        ));
        assert!(matches!(
            app.request_close(),
            Err(BridgeError::CapabilityUnavailable(Capability::RequestClose))
        ));
    }

    #[tokio::test]
    async fn test_render_swaps_content_for_upgrade_prompt() {
        let (window, host, app) = attached_app();

        let rendered = app.render(|context| context.session().data.clone());
        assert_eq!(rendered, Rendered::Content(None));

        host.set_tool_output(
            &window,
            json!({ "_joai/upgrade": true, "feature": "alerts" }),
        );
        let rendered = app.render(|_| 0);
        assert!(rendered.is_upgrade());
        assert_eq!(app.upgrade_prompt().unwrap().title, "Upgrade to unlock alerts");
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_context_is_scoped_to_render() {
        let (_window, _host, app) = attached_app();
        assert!(matches!(try_app_context(), Err(BridgeError::MissingContext)));

        let key = app
            .render(|_| use_app_context().app().upgrade_key().to_string())
            .content();
        assert_eq!(key.as_deref(), Some(DEFAULT_UPGRADE_KEY));
        assert!(try_app_context().is_err());
    }

    #[test]
    #[serial_test::serial]
    #[should_panic(expected = "use_app_context must be used within App::render")]
    fn test_use_app_context_outside_render_panics() {
        let _ = use_app_context();
    }
}
