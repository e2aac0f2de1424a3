use std::{
    collections::{BTreeMap, HashMap},
    fs,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use widget_bridge::{
    App, AppSession, Capability, FileUpload, GlobalKey, GlobalStore, Globals, HostError,
    HostRecord, HostWindow, LocalHost, Subscription, UpgradePrompt, WidgetStateSync,
};
use widget_bridge_config::BridgeConfig;

use crate::utils::styles::{fmt_dimmed, fmt_error, fmt_success};

#[derive(Debug, Clone, Parser)]
pub struct ReplayCmd {
    /// Scenario file to replay
    pub scenario: Utf8PathBuf,

    /// Wait out the whole host poll budget after the last step
    #[arg(long)]
    pub keep_polling: bool,

    /// Write the report to this file instead of stdout
    #[arg(long, short = 'o')]
    pub output: Option<Utf8PathBuf>,
}

impl ReplayCmd {
    #[allow(clippy::missing_errors_doc)]
    pub async fn handle(&self, cfg: &BridgeConfig) -> Result<ReplayReport> {
        let scenario = Scenario::load(&self.scenario)?;
        let report = scenario.run(cfg, self.keep_polling).await;

        let contents = serde_json::to_string_pretty(&report)?;
        match &self.output {
            Some(path) => {
                fs::write(path, contents).context(format!("Failed writing report: {path}"))?;
                info!(
                    "{}",
                    fmt_success(&format!("Report written to {}", fmt_dimmed(path.as_str())))
                );
            }
            None => println!("{contents}"),
        }

        Ok(report)
    }
}

/// Host behaviour plus the ordered steps to drive it with
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Canned results by tool name
    #[serde(default)]
    pub tool_responses: HashMap<String, Value>,

    /// Tools that fail, with the host's error message
    #[serde(default)]
    pub tool_errors: HashMap<String, String>,

    /// Entry points the host does not offer
    #[serde(default)]
    pub disabled: Vec<Capability>,

    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Let time pass, giving the startup poll a chance to run
    Wait { ms: u64 },
    /// Install the host binding, seeded with `globals`
    Attach {
        #[serde(default)]
        globals: Globals,
    },
    Detach,
    /// Host updates fields and broadcasts the update event
    SetGlobals { globals: Globals },
    /// Host updates fields and announces them over the message channel
    PostGlobals { globals: Globals },
    /// Arbitrary message posted to the window
    PostMessage { data: Value },
    /// Local write through the widget state synchronizer
    SetWidgetState { value: Value },
    CallTool {
        name: String,
        #[serde(default)]
        args: Option<Value>,
    },
    SendPrompt { prompt: String },
    /// Upload `content` as a file, then resolve its download url
    UploadFile {
        name: String,
        #[serde(default = "default_mime_type")]
        mime_type: String,
        content: String,
    },
    RequestModal {
        #[serde(default)]
        options: Value,
    },
    NotifyHeight { height: f64 },
    OpenInApp { href: String },
    RequestClose,
    /// Make every host read fail until `fix_reads`
    BreakReads,
    FixReads,
}

fn default_mime_type() -> String {
    "text/plain".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionOutcome {
    pub action: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    fn from_result(action: String, result: widget_bridge::Result<Value>) -> Self {
        match result {
            Ok(value) => Self {
                action,
                ok: true,
                result: Some(value).filter(|v| !v.is_null()),
                error: None,
            },
            Err(err) => {
                warn!("{}", fmt_error(&format!("{action} failed: {err}")));
                Self {
                    action,
                    ok: false,
                    result: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

/// State observed through the bridge once the scenario has played out
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    /// Last value each key's subscribers were told about
    pub globals: BTreeMap<GlobalKey, Value>,
    /// Number of notifications per key
    pub notifications: BTreeMap<GlobalKey, usize>,
    pub widget_state: Option<Value>,
    pub session: AppSession,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_prompt: Option<UpgradePrompt>,
    pub actions: Vec<ActionOutcome>,
    pub host: HostRecord,
}

struct Observer {
    subscription: Subscription,
    notifications: Arc<AtomicUsize>,
}

impl Observer {
    fn watch(store: &GlobalStore, key: GlobalKey) -> Self {
        let notifications = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notifications);
        let subscription = store.subscribe(key, move |value| {
            counter.fetch_add(1, Ordering::SeqCst);
            debug!(key = %key, ?value, "Bridge notified");
        });
        Self {
            subscription,
            notifications,
        }
    }
}

impl Scenario {
    /// Loads a scenario from a json file
    ///
    /// # Errors
    ///
    /// This function will return an error if the file does not exist or the content is invalid
    pub fn load(path: &Utf8PathBuf) -> Result<Self> {
        debug!("Loading scenario from {path}");

        if !path.exists() {
            anyhow::bail!("Scenario file does not exist: {path}");
        }

        let contents =
            fs::read_to_string(path).context(format!("Failed reading scenario: {path}"))?;
        serde_json::from_str(&contents).context(format!("Failed loading scenario: {path}"))
    }

    fn host(&self) -> Arc<LocalHost> {
        let host = LocalHost::new();
        for (name, response) in &self.tool_responses {
            host.set_tool_response(name.clone(), response.clone());
        }
        for (name, message) in &self.tool_errors {
            host.set_tool_error(name.clone(), HostError::Failed(message.clone()));
        }
        for capability in &self.disabled {
            host.disable(*capability);
        }
        host
    }

    /// Plays every step against a fresh window and in-memory host.
    ///
    /// The host starts detached; an `attach` step installs it.
    pub async fn run(&self, cfg: &BridgeConfig, keep_polling: bool) -> ReplayReport {
        let window = Arc::new(HostWindow::new());
        let store = GlobalStore::with_poll(Arc::clone(&window), cfg.poll);
        let host = self.host();

        let observers: BTreeMap<GlobalKey, Observer> = GlobalKey::ALL
            .into_iter()
            .map(|key| (key, Observer::watch(&store, key)))
            .collect();
        let app = App::with_upgrade_key(&store, cfg.upgrade_key.as_str());
        let widget_state = WidgetStateSync::<Value>::init(&store, None);
        let mut actions = Vec::new();

        for (index, step) in self.steps.iter().enumerate() {
            debug!(index, ?step, "Replaying step");
            match step {
                Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
                Step::Attach { globals } => {
                    host.replace_globals(globals.clone());
                    window.attach(host.clone());
                }
                Step::Detach => {
                    window.detach();
                }
                Step::SetGlobals { globals } => host.set_globals(&window, globals.clone()),
                Step::PostGlobals { globals } => {
                    if let Err(err) = host.post_globals(&window, globals.clone()) {
                        warn!(index, error = %err, "Failed posting globals");
                    }
                }
                Step::PostMessage { data } => window.post_message(data.clone()),
                Step::SetWidgetState { value } => widget_state.set(Some(value.clone())),
                Step::CallTool { name, args } => {
                    let result = app.execute_tool(name, args.clone()).await;
                    actions.push(ActionOutcome::from_result(format!("call_tool:{name}"), result));
                }
                Step::SendPrompt { prompt } => {
                    let result = app.execute_prompt(prompt).await.map(|()| Value::Null);
                    actions.push(ActionOutcome::from_result("send_prompt".to_string(), result));
                }
                Step::UploadFile {
                    name,
                    mime_type,
                    content,
                } => {
                    let file = FileUpload {
                        name: name.clone(),
                        mime_type: mime_type.clone(),
                        bytes: content.as_bytes().to_vec(),
                    };
                    let result = match app.upload_file(file).await {
                        Ok(uploaded) => app
                            .get_file_download_url(&uploaded.file_id)
                            .await
                            .map(Value::String),
                        Err(err) => Err(err),
                    };
                    actions.push(ActionOutcome::from_result(format!("upload_file:{name}"), result));
                }
                Step::RequestModal { options } => {
                    let result = app.request_modal(options.clone()).await.map(|()| Value::Null);
                    actions.push(ActionOutcome::from_result("request_modal".to_string(), result));
                }
                Step::NotifyHeight { height } => {
                    let result = app.notify_intrinsic_height(*height).map(|()| Value::Null);
                    actions.push(ActionOutcome::from_result("notify_height".to_string(), result));
                }
                Step::OpenInApp { href } => {
                    let result = app.set_open_in_app_url(href).map(|()| Value::Null);
                    actions.push(ActionOutcome::from_result("open_in_app".to_string(), result));
                }
                Step::RequestClose => {
                    let result = app.request_close().map(|()| Value::Null);
                    actions.push(ActionOutcome::from_result("request_close".to_string(), result));
                }
                Step::BreakReads => host.set_broken(true),
                Step::FixReads => host.set_broken(false),
            }
        }

        if keep_polling {
            tokio::time::sleep(store.poll_config().budget()).await;
        }

        info!(
            "{}",
            fmt_success(&format!("Replayed {} steps", self.steps.len()))
        );

        let globals = observers
            .iter()
            .filter_map(|(key, observer)| Some((*key, observer.subscription.current()?)))
            .collect();
        let notifications = observers
            .iter()
            .map(|(key, observer)| (*key, observer.notifications.load(Ordering::SeqCst)))
            .collect();

        ReplayReport {
            globals,
            notifications,
            widget_state: widget_state.get(),
            session: AppSession::clone(&app.session()),
            upgrade_prompt: app.upgrade_prompt(),
            actions,
            host: host.record(),
        }
    }
}
