use pg_wire_mock::app;

fn main() {
    let args = app::args::parse();
    let config = app::init_config(&args);

    if args.test_config {
        println!("configuration file {} is valid", args.config_file);
        return;
    }

    app::init_logging(&args);

    if let Err(err) = app::run_server(config) {
        eprintln!("pg_wire_mock exited with error: {err}");
        std::process::exit(exitcode::SOFTWARE);
    }
}
