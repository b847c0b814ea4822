//! `privatebox create` and `privatebox up`: converge an instance.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use tokio_util::sync::CancellationToken;

use crate::app::AppContext;
use crate::application::services::convergence::ConvergenceEngine;
use crate::domain::instance::{InstanceSpec, parse_tag};
use crate::infra::userdata::resolve_boot_script;
use crate::output::human::HumanRenderer;
use crate::output::json;
use crate::output::reporter::TerminalReporter;

/// Arguments shared by `create` and `up`.
#[derive(Args)]
pub struct InstanceArgs {
    /// Instance name
    pub name: String,

    /// Instance type (defaults to the profile's `aws.instance_type`)
    #[arg(long = "type", value_name = "TYPE")]
    pub size: Option<String>,

    /// Boot script: a named script from config or a file path
    #[arg(long, value_name = "NAME|PATH")]
    pub user_data: Option<String>,

    /// Extra tag, repeatable
    #[arg(long = "tag", value_name = "KEY=VALUE", value_parser = parse_tag)]
    pub tags: Vec<(String, String)>,
}

/// Run `privatebox create` (strict) or `privatebox up` (resume/update).
///
/// # Errors
///
/// Returns a `DeploymentError` when convergence fails or is cancelled.
pub async fn run(
    app: &AppContext,
    args: &InstanceArgs,
    resume: bool,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    let session = app.session()?;
    let size = args
        .size
        .clone()
        .unwrap_or_else(|| session.profile.aws.instance_type.clone());
    let mut spec = InstanceSpec::new(&args.name, &size, &session.profile_name);
    spec.tags = args.tags.iter().cloned().collect();
    if let Some(arg) = args.user_data.as_deref().or(session.profile.user_data.as_deref()) {
        let script = resolve_boot_script(&session.config, arg)?;
        spec.user_data = Some(script.content);
        spec.user_data_name = script.name;
    }

    let reporter = TerminalReporter::new(&app.output);
    let engine = ConvergenceEngine::new(&session.provider, &session.store, &reporter);
    let result = if resume {
        engine.up(&spec, cancel).await
    } else {
        engine.create(&spec, cancel).await
    };
    let state = match result {
        Ok(state) => state,
        Err(e) => {
            reporter.fail(&format!("{} failed", spec.name));
            return Err(e);
        }
    };

    if app.is_json() {
        json::print(&state)?;
    } else {
        HumanRenderer::new(&app.output).render_deployment(&state);
        app.output.info(&format!("Connect: privatebox connect {}", state.name));
    }
    Ok(ExitCode::SUCCESS)
}
