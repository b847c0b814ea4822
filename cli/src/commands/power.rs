//! `privatebox start` / `privatebox stop`.

use std::process::ExitCode;

use anyhow::Result;

use crate::app::AppContext;
use crate::application::ports::{PowerAction, ProgressReporter};
use crate::application::services::status;
use crate::output::json;
use crate::output::reporter::TerminalReporter;

/// Start or stop `name`.
///
/// # Errors
///
/// Returns `DeploymentError::NotProvisioned` for an unknown instance, or the
/// provider error.
pub async fn run(app: &AppContext, name: &str, action: PowerAction) -> Result<ExitCode> {
    let session = app.session()?;
    let reporter = TerminalReporter::new(&app.output);
    let (verb, done) = match action {
        PowerAction::On => ("Starting", "Started"),
        PowerAction::Off => ("Stopping", "Stopped"),
    };
    reporter.step(&format!("{verb} {name}..."));
    if let Err(e) = status::set_power(&session.store, &session.provider, name, action).await {
        reporter.fail(&format!("{verb} {name} failed"));
        return Err(e);
    }
    reporter.success(&format!("{done} {name}"));

    if app.is_json() {
        json::print(&serde_json::json!({
            "name": name,
            "action": match action {
                PowerAction::On => "start",
                PowerAction::Off => "stop",
            },
        }))?;
    }
    Ok(ExitCode::SUCCESS)
}
