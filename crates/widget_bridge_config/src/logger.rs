use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    #[serde(default = "crate::defaults::default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default = "crate::defaults::default_true")]
    pub colors: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: LogLevel::Info,
            colors: true,
        }
    }
}

/// Log levels, ordered from lowest to highest severity: Trace < Debug < Info < Warn < Error
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    #[serde(rename = "trace", alias = "TRACE")]
    Trace,
    #[serde(rename = "debug", alias = "DEBUG")]
    Debug,
    #[serde(rename = "info", alias = "INFO")]
    #[default]
    Info,
    #[serde(rename = "warn", alias = "WARN")]
    Warn,
    #[serde(rename = "error", alias = "ERROR")]
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Resolves the effective level from CLI flags, which take precedence
    /// over the configured level when given.
    pub fn from_flags(configured: LogLevel, verbose: u8, quiet: bool) -> LogLevel {
        if quiet {
            LogLevel::Warn
        } else {
            match verbose {
                0 => configured,
                1 => LogLevel::Debug,
                _ => LogLevel::Trace,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_configured_level() {
        assert_eq!(LogLevel::from_flags(LogLevel::Error, 0, false), LogLevel::Error);
        assert_eq!(LogLevel::from_flags(LogLevel::Error, 1, false), LogLevel::Debug);
        assert_eq!(LogLevel::from_flags(LogLevel::Info, 3, false), LogLevel::Trace);
        assert_eq!(LogLevel::from_flags(LogLevel::Trace, 2, true), LogLevel::Warn);
    }

    #[test]
    fn test_level_accepts_uppercase_alias() {
        let level: LogLevel = serde_json::from_str("\"DEBUG\"").unwrap();
        assert_eq!(level, LogLevel::Debug);
        assert_eq!(level.as_str(), "debug");
    }
}
