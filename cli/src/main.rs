//! privatebox: personal cloud instances with resumable provisioning

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use privatebox_cli::cli::Cli;
use privatebox_cli::output::{OutputContext, json};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let as_json = cli.json;
    let no_color = cli.no_color;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; finishing the current step");
            on_signal.cancel();
        }
    });

    match cli.run(&cancel).await {
        Ok(code) => code,
        Err(e) => {
            let message = format!("{e:#}");
            match json::format_error(&message, json::error_code(&e)) {
                Ok(body) if as_json => println!("{body}"),
                _ => OutputContext::new(no_color, false).error(&format!("Error: {message}")),
            }
            ExitCode::FAILURE
        }
    }
}
