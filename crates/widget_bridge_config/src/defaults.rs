// Various default functions to be used by serde

pub const DEFAULT_UPGRADE_KEY: &str = "_joai/upgrade";

pub(crate) fn default_true() -> bool {
    true
}

pub(crate) fn default_upgrade_key() -> String {
    DEFAULT_UPGRADE_KEY.into()
}

pub(crate) fn default_poll_interval_ms() -> u64 {
    50
}

pub(crate) fn default_poll_max_attempts() -> u32 {
    100
}
