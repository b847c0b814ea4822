//! `privatebox show`: one instance's record and live state.

use std::process::ExitCode;

use anyhow::Result;

use crate::app::AppContext;
use crate::application::services::status;
use crate::output::human::HumanRenderer;
use crate::output::json;

/// Run `privatebox show <name>`.
///
/// # Errors
///
/// Returns `DeploymentError::NotProvisioned` for an unknown instance.
pub async fn run(app: &AppContext, name: &str) -> Result<ExitCode> {
    let session = app.session()?;
    let detail = status::describe(&session.store, &session.provider, name).await?;

    if app.is_json() {
        json::print(&serde_json::json!({
            "deployment": detail.deployment,
            "status": detail.status,
        }))?;
    } else {
        HumanRenderer::new(&app.output).render_detail(&detail);
    }
    Ok(ExitCode::SUCCESS)
}
