use std::io::Write;

use widget_bridge_config::{LogLevel, LoggerConfig};

const WHITELISTED_CRATES: &[&str] = &["widget_bridge", "widget_bridge_cli", "widget_bridge_config"];

pub(crate) fn default_env_filter(level: &str) -> String {
    let mut filters: Vec<String> = WHITELISTED_CRATES
        .iter()
        .map(|crate_name| format!("{crate_name}={level}"))
        .collect();

    // Set default level for all other crates to warn
    filters.insert(0, "warn".to_string());

    filters.join(",")
}

pub(crate) fn init_cli_logger(cfg: &LoggerConfig, verbose: u8, quiet: bool) {
    if !cfg.enabled && verbose == 0 {
        return;
    }

    let level = LogLevel::from_flags(cfg.level, verbose, quiet);
    let level_str = level.as_str();

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_env_filter(level_str)),
    );
    if !cfg.colors {
        builder.write_style(env_logger::WriteStyle::Never);
    }

    // For INFO and below, only include/colorize WARN and ERROR levels
    if level >= LogLevel::Info {
        builder.format(|buf, record| {
            if record.level() == tracing::log::Level::Info {
                writeln!(buf, "{}", record.args())
            } else {
                let log_style = buf.default_level_style(record.level());
                writeln!(
                    buf,
                    "{log_style}[{}]{log_style:#} {}",
                    record.level(),
                    record.args()
                )
            }
        });
    }

    if let Err(e) = builder.try_init() {
        eprintln!("widget-bridge: Failed initializing env_logger: {e:?}");
    }
}
