use std::process::ExitCode;

use chrono::Local;
use clap::Parser;
use harvest::{
    config::{init_logging, Cli},
    info_time,
    process::process_site,
};
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let start_time = Local::now();
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let monitor = config.monitor.clone();
    let timeout = config.request_timeout;
    if let Err(e) = process_site(&config, move || monitor.build(timeout)).await {
        error!(error = %e, "harvest failed");
        return ExitCode::FAILURE;
    }

    info_time!(start_time, "Full program time:");
    ExitCode::SUCCESS
}
