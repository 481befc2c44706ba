//! Command-line interface (clap-derive `Args`), trimmed to what this
//! crate's ambient CLI needs: a config file path, a log level/format
//! pair, and nothing binary-upgrade or pool-specific.

use clap::{Parser, ValueEnum};
use tracing::Level;

/// pg_wire_mock: a mock PostgreSQL wire-protocol server for tool probes
/// and integration tests.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to a TOML configuration file. Missing keys fall back to the
    /// documented defaults (spec §6); the file itself is optional.
    #[arg(default_value_t = String::from("pg_wire_mock.toml"), env)]
    pub config_file: String,

    #[arg(short, long, default_value_t = tracing::Level::INFO, env)]
    pub log_level: Level,

    #[clap(short = 'F', long, value_enum, default_value_t = LogFormat::Text, env)]
    pub log_format: LogFormat,

    #[arg(short, long, default_value_t = false, env, help = "disable colors in the log output")]
    pub no_color: bool,

    #[arg(short = 't', long = "test-config", default_value_t = false, help = "validate the configuration file and exit")]
    pub test_config: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum LogFormat {
    Text,
    Json,
    Pretty,
}

pub fn parse() -> Args {
    Args::parse()
}
