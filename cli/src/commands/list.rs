//! `privatebox list`: every instance with its live state.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use privatebox_common::LifecycleState;
use tokio_util::sync::CancellationToken;

use crate::app::AppContext;
use crate::application::services::discovery::{self, DiscoveryOptions};
use crate::output::human::HumanRenderer;
use crate::output::json;

/// Arguments for the list command.
#[derive(Args)]
pub struct ListArgs {
    /// Only show instances in this state (e.g. running, stopped, unknown)
    #[arg(long)]
    pub state: Option<LifecycleState>,
}

/// Run `privatebox list`.
///
/// # Errors
///
/// Returns an error if the state backend cannot enumerate instances.
pub async fn run(app: &AppContext, args: &ListArgs, cancel: &CancellationToken) -> Result<ExitCode> {
    let session = app.session()?;
    let instances = discovery::list_with_status(
        &session.store,
        &session.provider,
        args.state,
        DiscoveryOptions::default(),
        cancel,
    )
    .await?;

    if app.is_json() {
        json::print(&instances)?;
    } else {
        HumanRenderer::new(&app.output).render_instance_list(&instances);
    }
    Ok(ExitCode::SUCCESS)
}
