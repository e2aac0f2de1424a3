pub mod commands;
pub(crate) mod utils;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

use crate::{
    commands::{keys::KeysCmd, replay::ReplayCmd},
    utils::logger::init_cli_logger,
};
use widget_bridge_config::{BridgeConfig, LoggerConfig};

#[derive(Parser)]
#[command(name = "widget-bridge")]
#[command(version)]
#[command(about = "Widget Bridge - host/widget synchronization playground")]
#[command(
    long_about = "Widget Bridge replays host scenarios against the widget synchronization layer. \
A scenario drives an in-memory host (attaching late, pushing globals, posting messages, answering tool calls) \
and the resulting bridge state is printed as JSON."
)]
#[command(after_help = "EXAMPLES:\n  \
    widget-bridge replay scenario.json\n  \
    widget-bridge -v replay late-host.json --keep-polling\n  \
    widget-bridge keys\n\
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path, defaults to ./widget-bridge.json
    #[arg(long, short = 'c', global = true, default_value_t = BridgeConfig::default_path())]
    pub config: Utf8PathBuf,

    /// No logging except for warnings and errors
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Verbose logging (-v) or trace logging (-vv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

impl Cli {
    #[allow(clippy::missing_errors_doc)]
    pub async fn handle(&self) -> anyhow::Result<()> {
        let cfg = match BridgeConfig::load_or_default(&self.config) {
            Ok(cfg) => cfg,
            Err(e) => {
                // still report the failure through the logger
                init_cli_logger(&LoggerConfig::default(), self.verbose, self.quiet);
                return Err(e);
            }
        };
        init_cli_logger(&cfg.logger, self.verbose, self.quiet);

        match &self.command {
            Commands::Replay(cmd) => {
                cmd.handle(&cfg).await?;
            }
            Commands::Keys(cmd) => cmd.handle()?,
        }

        Ok(())
    }
}

#[derive(Debug, Subcommand)]
#[command(styles=utils::styles::get_styles())]
pub enum Commands {
    /// Replay a host scenario and print the resulting bridge state
    #[command(
        long_about = "Runs the steps of a scenario file against an in-memory host and prints a JSON report \
of the globals, widget state, app session and host calls observed at the end."
    )]
    Replay(ReplayCmd),

    /// List the global keys and host entry points
    #[command(long_about = "Lists the host global keys a widget can subscribe to and the host entry points.")]
    Keys(KeysCmd),
}
