//! `privatebox connect`: open a shell on an instance.

use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Args;
use privatebox_common::{InstanceStatus, LifecycleState};
use tokio_util::sync::CancellationToken;

use crate::app::{AppContext, Session};
use crate::application::ports::{CommandRunner, ProviderInfo};
use crate::application::services::discovery::{self, DiscoveryOptions};
use crate::application::services::status;
use crate::domain::connect::{
    ConnectTarget, connect_template, private_key_path, render_connect_command,
};
use crate::infra::command_runner::TokioCommandRunner;
use crate::infra::fs::expand_home;

/// Arguments for the connect command.
#[derive(Args)]
pub struct ConnectArgs {
    /// Instance name; picked automatically when only one is running
    pub name: Option<String>,

    /// Print the command instead of running it
    #[arg(long)]
    pub print: bool,
}

/// Run `privatebox connect [name]`.
///
/// # Errors
///
/// Returns an error if no instance can be chosen, the instance has no
/// public address, or the connect command cannot be spawned.
pub async fn run(
    app: &AppContext,
    args: &ConnectArgs,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    let session = app.session()?;
    let name = match &args.name {
        Some(name) => name.clone(),
        None => pick_instance(app, &session, cancel).await?,
    };

    let detail = status::describe(&session.store, &session.provider, &name).await?;
    let ip = detail
        .status
        .public_ip
        .clone()
        .or_else(|| detail.deployment.public_ip.clone())
        .with_context(|| format!("'{name}' has no public IP (is it running?)"))?;

    let key = match &session.profile.ssh_public_key_path {
        Some(path) => expand_home(&private_key_path(path))?.display().to_string(),
        None => String::new(),
    };
    let target = ConnectTarget {
        user: session.provider.default_login_user().to_string(),
        ip,
        id: detail.status.resource_id.clone(),
        key,
    };
    let template = connect_template(
        session.profile.connect_command.as_deref(),
        !target.key.is_empty(),
    );
    let command = render_connect_command(template, &target);

    if args.print || app.is_json() {
        if app.is_json() {
            crate::output::json::print(&serde_json::json!({ "name": name, "command": command }))?;
        } else {
            println!("{command}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let mut envs: Vec<(&str, &str)> = session
        .profile
        .env
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    if let Some(aws_profile) = session.profile.aws.profile.as_deref() {
        envs.push(("AWS_PROFILE", aws_profile));
    }
    envs.push(("AWS_REGION", session.profile.region.as_str()));

    tracing::info!(instance = %name, %command, "connecting");
    let runner = TokioCommandRunner::default();
    let status = runner.run_status("sh", &["-c", &command], &envs).await?;
    Ok(match status.code() {
        Some(0) => ExitCode::SUCCESS,
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        None => ExitCode::FAILURE,
    })
}

/// One running instance is chosen automatically; several prompt a selection.
async fn pick_instance(
    app: &AppContext,
    session: &Session,
    cancel: &CancellationToken,
) -> Result<String> {
    let running: Vec<InstanceStatus> = discovery::list_with_status(
        &session.store,
        &session.provider,
        Some(LifecycleState::Running),
        DiscoveryOptions::default(),
        cancel,
    )
    .await?;

    match running.as_slice() {
        [] => bail!("No running instances. Create one: privatebox create <name>"),
        [only] => Ok(only.name.clone()),
        _ if app.non_interactive => {
            bail!("Several instances are running; name one: privatebox connect <name>")
        }
        many => {
            let names: Vec<&str> = many.iter().map(|i| i.name.as_str()).collect();
            let index = dialoguer::Select::new()
                .with_prompt("Connect to")
                .items(&names)
                .default(0)
                .interact()
                .context("reading selection")?;
            Ok(names[index].to_string())
        }
    }
}
