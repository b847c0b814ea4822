//! `privatebox destroy`: tear down an instance.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use tokio_util::sync::CancellationToken;

use crate::app::AppContext;
use crate::application::services::convergence::ConvergenceEngine;
use crate::output::json;
use crate::output::reporter::TerminalReporter;

/// Arguments for the destroy command.
#[derive(Args)]
pub struct DestroyArgs {
    /// Instance name
    pub name: String,
}

/// Run `privatebox destroy <name>`.
///
/// # Errors
///
/// Returns `DeploymentError::NotProvisioned` for an unknown instance and
/// `DeploymentError::DestroyIncomplete` when a resource cannot be removed.
pub async fn run(
    app: &AppContext,
    args: &DestroyArgs,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    let session = app.session()?;
    if !app.non_interactive
        && !app.confirm(
            &format!("Destroy '{}' and all of its resources?", args.name),
            false,
        )?
    {
        app.output.info("Cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let reporter = TerminalReporter::new(&app.output);
    let engine = ConvergenceEngine::new(&session.provider, &session.store, &reporter);
    if let Err(e) = engine.destroy(&args.name, cancel).await {
        reporter.fail(&format!("{} not fully destroyed", args.name));
        return Err(e);
    }

    if app.is_json() {
        json::print(&serde_json::json!({ "name": args.name, "destroyed": true }))?;
    } else {
        app.output.success(&format!("Destroyed {}", args.name));
    }
    Ok(ExitCode::SUCCESS)
}
