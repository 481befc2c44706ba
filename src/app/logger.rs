//! Logging initialization: `tracing-subscriber` fed by `log` call sites
//! throughout the codebase via the `tracing-log` compatibility shim. No
//! syslog branch here (no operational need for it in a mock server);
//! noted in DESIGN.md.

use tracing_subscriber::EnvFilter;

use super::args::{Args, LogFormat};

pub fn init_logging(args: &Args) {
    // The codebase calls the `log` facade throughout; bridge it onto the
    // `tracing` subscriber below so those calls actually reach a sink.
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::from_default_env().add_directive(args.log_level.into());
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_ansi(!args.no_color);

    match args.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.pretty().init(),
        LogFormat::Text => subscriber.init(),
    }

    log::info!("pg_wire_mock starting up");
}
