use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "autobid")]
#[command(version = "0.1.0")]
#[command(about = "Remotely controlled timed bid submission agent", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Directory holding default.toml and per-environment overrides
    #[arg(short, long, default_value = "config", env = "AUTOBID_CONFIG_DIR")]
    pub config_dir: String,

    /// Use the simulated page regardless of driver.mode
    #[arg(long)]
    pub paper: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Connect to the controller and wait for commands (default)
    Run,
    /// Read the listing identity from the page and exit
    Identify,
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.unwrap_or(Commands::Run)
    }
}
