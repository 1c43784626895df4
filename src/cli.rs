use clap::Parser;
use std::path::PathBuf;

// Build version with target info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Demo host: serves a directory and exposes a few operations on a ticking main loop
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Directory to serve (overrides config file and TICKSERVE_ROOT)
    #[arg(short = 'r', long = "root", value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Listen port (overrides config file and TICKSERVE_PORT)
    #[arg(short = 'p', long = "port", value_name = "PORT")]
    pub port: Option<u16>,

    /// JSON server configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host loop rate in ticks per second
    #[arg(long = "tick-hz", value_name = "HZ", default_value = "60")]
    pub tick_hz: u32,

    /// Stop after this many seconds (0 = run forever)
    #[arg(long = "run-secs", value_name = "SECS", default_value = "0")]
    pub run_secs: u64,

    /// Page to print in the connect URL
    #[arg(long = "page", value_name = "PAGE", default_value = "")]
    pub page: String,

    /// Enable debug logging to file (default: tickserve.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
}
