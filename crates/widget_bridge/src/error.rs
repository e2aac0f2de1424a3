use std::fmt;

use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Entry points a host may or may not expose on its binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    SetWidgetState,
    CallTool,
    SendFollowUpMessage,
    UploadFile,
    GetFileDownloadUrl,
    RequestDisplayMode,
    RequestModal,
    NotifyIntrinsicHeight,
    OpenExternal,
    SetOpenInAppUrl,
    RequestClose,
}

impl Capability {
    pub const ALL: [Capability; 11] = [
        Capability::SetWidgetState,
        Capability::CallTool,
        Capability::SendFollowUpMessage,
        Capability::UploadFile,
        Capability::GetFileDownloadUrl,
        Capability::RequestDisplayMode,
        Capability::RequestModal,
        Capability::NotifyIntrinsicHeight,
        Capability::OpenExternal,
        Capability::SetOpenInAppUrl,
        Capability::RequestClose,
    ];

    /// Name of the entry point on the host binding
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::SetWidgetState => "setWidgetState",
            Capability::CallTool => "callTool",
            Capability::SendFollowUpMessage => "sendFollowUpMessage",
            Capability::UploadFile => "uploadFile",
            Capability::GetFileDownloadUrl => "getFileDownloadUrl",
            Capability::RequestDisplayMode => "requestDisplayMode",
            Capability::RequestModal => "requestModal",
            Capability::NotifyIntrinsicHeight => "notifyIntrinsicHeight",
            Capability::OpenExternal => "openExternal",
            Capability::SetOpenInAppUrl => "setOpenInAppUrl",
            Capability::RequestClose => "requestClose",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures raised by the host itself
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HostError {
    #[error("Failed reading host binding: {0}")]
    Read(String),
    #[error("Host rejected the request: {0}")]
    Rejected(serde_json::Value),
    #[error("Host call failed: {0}")]
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Host capability `{0}` is not available")]
    CapabilityUnavailable(Capability),
    #[error("App context accessed outside of an app render scope")]
    MissingContext,
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BridgeError {
    pub fn is_capability_unavailable(&self) -> bool {
        matches!(self, BridgeError::CapabilityUnavailable(_))
    }
}
