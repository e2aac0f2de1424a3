use anyhow::Result;
use clap::Parser;
use tracing::info;
use widget_bridge::{Capability, GlobalKey};

use crate::utils::styles::{fmt_bold, fmt_dimmed};

#[derive(Debug, Clone, Parser)]
pub struct KeysCmd {
    /// Print as JSON instead of a listing
    #[arg(long)]
    pub json: bool,
}

impl KeysCmd {
    #[allow(clippy::missing_errors_doc)]
    pub fn handle(&self) -> Result<()> {
        if self.json {
            let listing = serde_json::json!({
                "globals": GlobalKey::ALL,
                "capabilities": Capability::ALL,
            });
            println!("{}", serde_json::to_string_pretty(&listing)?);
            return Ok(());
        }

        info!(
            "{} {}",
            fmt_bold("Global keys"),
            fmt_dimmed(&format!("({})", GlobalKey::ALL.len()))
        );
        for key in GlobalKey::ALL {
            info!("  {key}");
        }
        info!(
            "{} {}",
            fmt_bold("Host entry points"),
            fmt_dimmed(&format!("({})", Capability::ALL.len()))
        );
        for capability in Capability::ALL {
            info!("  {capability}");
        }

        Ok(())
    }
}
