//! keel - provision servers and deploy cataloged apps onto k3s

use std::process::ExitCode;

use clap::Parser;
use keel_cli::cli::Cli;
use keel_cli::output::json::{error_code, format_error};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.default_log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let json = cli.json;
    match cli.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let message = format!("{e:#}");
            if json {
                match format_error(&message, error_code(&e)) {
                    Ok(out) => println!("{out}"),
                    Err(_) => eprintln!("Error: {message}"),
                }
            } else {
                eprintln!("Error: {message}");
            }
            ExitCode::FAILURE
        }
    }
}
