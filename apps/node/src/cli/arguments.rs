use std::path::PathBuf;

use clap::Args;

/// Run the node with the given configuration file.
#[derive(Args)]
pub struct Run {
    /// Path to the node's TOML configuration file.
    #[arg(long, short, default_value = "node.toml")]
    pub config: PathBuf,
}
