use clap::Parser;
use prometheus::Registry;

use qps_loadtest::args::LoadTestArgs;
use qps_loadtest::config::Config;
use qps_loadtest::logger::init_logging;
use qps_loadtest::metrics::{register_metrics, start_metrics_server};
use qps_loadtest::runner::run_load_test;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = LoadTestArgs::parse();
    init_logging(args.verbose);

    let metrics_port = args.metrics_port;

    // Invalid configuration never reaches the worker pool.
    let config = match Config::new(args.into_params()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(port) = metrics_port {
        let registry = Registry::new();
        register_metrics(&registry)?;
        tokio::spawn(start_metrics_server(port, registry));
    }

    config.print_summary();

    let report = match run_load_test(&config).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Load test setup failed: {}", e);
            std::process::exit(1);
        }
    };

    println!();
    println!("{}", report.stats);

    Ok(())
}
