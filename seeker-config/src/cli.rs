use std::path::PathBuf;

use clap::Parser;

/// Command-line surface of the seeker process.
#[derive(Parser, Debug, Clone)]
#[command(name = "seeker", about = "Observing control plane for a SETI search")]
pub struct SeekerArgs {
    /// Path to the TOML configuration file; defaults apply when omitted.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override the expected-components file from the config.
    #[arg(long, value_name = "FILE")]
    pub expected_components: Option<PathBuf>,

    /// Disable database writes regardless of the config file.
    #[arg(long)]
    pub no_database: bool,

    /// Verbosity: repeat for more detail (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl SeekerArgs {
    /// Tracing filter directive for the chosen verbosity.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
