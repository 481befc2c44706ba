//! The ambient CLI/startup shell: argument parsing, config loading and
//! logging initialization, trimmed to what a single mock-server binary
//! needs (no daemonization, no binary-upgrade, no TLS).

pub mod args;
pub mod logger;

use std::path::Path;
use std::process;

pub use args::{Args, LogFormat};
pub use logger::init_logging;

use crate::config::{self, Config};

/// Loads the config file named on the command line if it exists, leaving
/// every field at its documented default otherwise (spec §6: every config
/// key is optional).
pub fn init_config(args: &Args) -> Config {
    let path = Path::new(&args.config_file);
    if !path.exists() {
        return Config::default();
    }
    match config::load_from_file(path) {
        Ok(()) => (*config::get_config()).clone(),
        Err(err) => {
            eprintln!("config error in {}: {err}", args.config_file);
            process::exit(exitcode::CONFIG);
        }
    }
}

/// Builds the multi-threaded runtime and drives the accept loop to
/// completion. No core-affinity pinning: a mock server has no CPU-bound
/// backend pool to pin workers against.
pub fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    crate::config::set_config(config);
    crate::stats::Collector::global().set_enabled(crate::config::get_config().general.stats_enabled);
    crate::stats::Collector::global().set_slow_threshold_ms(
        crate::config::get_config().general.slow_query_threshold_ms.as_millis(),
    );

    let worker_threads = num_cpus::get();
    log::info!("starting tokio runtime with {worker_threads} worker threads");
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .thread_name("worker-pg-wire-mock")
        .build()?;

    let dispatcher: std::sync::Arc<dyn crate::dispatcher::Dispatcher> =
        std::sync::Arc::new(crate::dispatcher::DemoDialect);

    runtime.block_on(crate::server::run(dispatcher))?;
    Ok(())
}
