//! Billing upgrade detection and the prompt shown in its place.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::{error::BridgeError, host::HostWindow};

pub use widget_bridge_config::DEFAULT_UPGRADE_KEY;

const DEFAULT_FEATURE: &str = "this feature";
const DEFAULT_MESSAGE: &str = "Upgrade to get premium features and higher limits in seconds.";
const DEFAULT_BUTTON_LABEL: &str = "Upgrade now";

/// Result of scanning payloads for the upgrade sentinel
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpgradeScan<'a> {
    /// First candidate object whose sentinel key is exactly `true`
    Found(&'a Value),
    NoUpgrade,
}

impl<'a> UpgradeScan<'a> {
    /// Scans candidates in order. Only JSON objects count, and only when
    /// `upgrade_key` holds the boolean `true`.
    pub fn scan(candidates: impl IntoIterator<Item = Option<&'a Value>>, upgrade_key: &str) -> Self {
        candidates
            .into_iter()
            .flatten()
            .find(|candidate| {
                candidate
                    .as_object()
                    .and_then(|record| record.get(upgrade_key))
                    .is_some_and(|flag| *flag == Value::Bool(true))
            })
            .map_or(UpgradeScan::NoUpgrade, UpgradeScan::Found)
    }

    pub fn record(&self) -> Option<&'a Value> {
        match self {
            UpgradeScan::Found(record) => Some(record),
            UpgradeScan::NoUpgrade => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, UpgradeScan::Found(_))
    }
}

/// String field of the upgrade payload. Fields of any other type are ignored
/// on their own without discarding the rest of the payload.
fn text_field<'a>(meta: Option<&'a Value>, field: &str) -> Option<&'a str> {
    let value = meta?.get(field)?;
    let text = value.as_str();
    if text.is_none() && !value.is_null() {
        debug!(field, "Ignoring non-string upgrade field");
    }
    text
}

/// What the presentation layer shows instead of the app while payment is
/// required
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradePrompt {
    pub title: String,
    pub message: String,
    pub button_label: String,
    pub payment_url: Option<Url>,
}

/// Outcome of pressing the prompt's button
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PaymentAction {
    /// No usable payment link, the button is disabled
    Disabled,
    /// The host opened the link
    OpenedByHost { href: String },
    /// The host could not open the link, the caller should open it itself
    OpenInBrowser { href: String },
}

impl UpgradePrompt {
    pub fn from_meta(meta: Option<&Value>) -> Self {
        let feature = text_field(meta, "feature")
            .filter(|feature| !feature.is_empty())
            .unwrap_or(DEFAULT_FEATURE);

        let payment_url = text_field(meta, "paymentUrl").and_then(|raw| match Url::parse(raw) {
            Ok(url) => Some(url),
            Err(err) => {
                warn!(payment_url = %raw, error = %err, "Ignoring invalid payment url");
                None
            }
        });

        Self {
            title: format!("Upgrade to unlock {feature}"),
            message: text_field(meta, "message")
                .unwrap_or(DEFAULT_MESSAGE)
                .to_string(),
            button_label: text_field(meta, "buttonLabel")
                .unwrap_or(DEFAULT_BUTTON_LABEL)
                .to_string(),
            payment_url,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.payment_url.is_some()
    }

    /// Sends the user to the payment page, through the host when it can
    pub fn activate(&self, window: &HostWindow) -> PaymentAction {
        let Some(url) = &self.payment_url else {
            return PaymentAction::Disabled;
        };
        let href = url.to_string();

        let Some(host) = window.binding() else {
            return PaymentAction::OpenInBrowser { href };
        };

        match host.open_external(&href) {
            Ok(()) => {
                debug!(%href, "Host opened payment page");
                PaymentAction::OpenedByHost { href }
            }
            Err(BridgeError::CapabilityUnavailable(_)) => PaymentAction::OpenInBrowser { href },
            Err(err) => {
                warn!(%href, error = %err, "Host failed opening payment page");
                PaymentAction::OpenInBrowser { href }
            }
        }
    }
}
