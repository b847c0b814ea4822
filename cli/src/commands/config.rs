//! `privatebox config`: manage profiles.

use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};

use crate::app::AppContext;
use crate::application::ports::ConfigStore;
use crate::application::services::discovery;
use crate::domain::config::Profile;
use crate::domain::error::ConfigError;
use crate::infra::fs::expand_home;
use crate::output::human::HumanRenderer;
use crate::output::json;

/// Config subcommands.
#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the active profile
    Show,
    /// List profiles
    List,
    /// Switch the current profile
    Use {
        /// Profile name
        name: String,
    },
    /// Add a profile
    New(NewProfileArgs),
    /// Manage named boot scripts, usable with `--user-data <name>`
    #[command(subcommand)]
    Script(ScriptCommand),
}

/// `config script` subcommands.
#[derive(Subcommand)]
pub enum ScriptCommand {
    /// Store a boot script from a file, replacing one of the same name
    Create {
        /// Script name
        name: String,
        /// File holding the script
        path: String,
    },
    /// List stored boot scripts
    #[command(alias = "ls")]
    List,
    /// Delete a boot script no instance uses
    Delete {
        /// Script name
        name: String,
    },
}

/// Arguments for `config new`.
#[derive(Args)]
pub struct NewProfileArgs {
    /// Profile name
    pub name: String,
    #[arg(long, default_value = crate::domain::config::DEFAULT_PROVIDER)]
    pub provider: String,
    #[arg(long, default_value = crate::domain::config::DEFAULT_REGION)]
    pub region: String,
    /// State backend URL (`file://...` or `s3://bucket/prefix`)
    #[arg(long, default_value = crate::domain::config::DEFAULT_STATE_BACKEND)]
    pub state_backend: String,
    /// Named AWS CLI profile for credentials
    #[arg(long)]
    pub aws_profile: Option<String>,
    #[arg(long, default_value = crate::domain::config::DEFAULT_INSTANCE_TYPE)]
    pub instance_type: String,
    /// Public key installed on new instances
    #[arg(long)]
    pub ssh_public_key: Option<String>,
}

/// Run the config command.
///
/// # Errors
///
/// Returns a `ConfigError` for unknown or duplicate profiles and for
/// unknown or in-use boot scripts, or an I/O error reading or writing the
/// config file.
pub async fn run(app: &AppContext, cmd: ConfigCommand) -> Result<ExitCode> {
    match cmd {
        ConfigCommand::Show => show(app),
        ConfigCommand::List => list(app),
        ConfigCommand::Use { name } => use_profile(app, &name),
        ConfigCommand::New(args) => new_profile(app, args),
        ConfigCommand::Script(ScriptCommand::Create { name, path }) => {
            store_script(app, &name, &path).await
        }
        ConfigCommand::Script(ScriptCommand::List) => list_scripts(app),
        ConfigCommand::Script(ScriptCommand::Delete { name }) => delete_script(app, &name).await,
    }
}

fn show(app: &AppContext) -> Result<ExitCode> {
    let session = app.session()?;
    if app.is_json() {
        json::print(&serde_json::json!({
            "name": session.profile_name,
            "profile": session.profile,
            "path": app.config_store.path()?,
        }))?;
        return Ok(ExitCode::SUCCESS);
    }
    HumanRenderer::new(&app.output).render_profile(&session.profile_name, &session.profile);
    app.output
        .kv("Config file:", &app.config_store.path()?.display().to_string());
    Ok(ExitCode::SUCCESS)
}

fn list(app: &AppContext) -> Result<ExitCode> {
    let config = app.config_store.load()?;
    if app.is_json() {
        json::print(&config)?;
    } else {
        HumanRenderer::new(&app.output).render_profiles(&config);
    }
    Ok(ExitCode::SUCCESS)
}

fn use_profile(app: &AppContext, name: &str) -> Result<ExitCode> {
    let mut config = app.config_store.load()?;
    config.use_profile(name)?;
    app.config_store.save(&config)?;
    app.output.success(&format!("Now using profile '{name}'"));
    Ok(ExitCode::SUCCESS)
}

fn new_profile(app: &AppContext, args: NewProfileArgs) -> Result<ExitCode> {
    let mut config = app.config_store.load()?;
    let mut profile = Profile {
        provider: args.provider,
        region: args.region,
        state_backend: args.state_backend,
        ssh_public_key_path: args.ssh_public_key,
        ..Profile::default()
    };
    profile.aws.profile = args.aws_profile;
    profile.aws.instance_type = args.instance_type;
    config.add_profile(&args.name, profile)?;
    app.config_store.save(&config)?;
    app.output.success(&format!("Added profile '{}'", args.name));
    if config.current_profile.as_deref() == Some(args.name.as_str()) {
        app.output.info("It is now the current profile.");
    }
    Ok(ExitCode::SUCCESS)
}

async fn store_script(app: &AppContext, name: &str, path: &str) -> Result<ExitCode> {
    let file = expand_home(path)?;
    let content = std::fs::read_to_string(&file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    if content.trim().is_empty() {
        bail!("{} is empty", file.display());
    }
    let mut config = app.config_store.load()?;
    if config.user_data.contains_key(name) {
        warn_script_users(app, name).await;
    }
    config.user_data.insert(name.to_string(), content);
    app.config_store.save(&config)?;
    app.output.success(&format!("Stored boot script '{name}'"));
    Ok(ExitCode::SUCCESS)
}

fn list_scripts(app: &AppContext) -> Result<ExitCode> {
    let config = app.config_store.load()?;
    let names: Vec<&str> = config.user_data.keys().map(String::as_str).collect();
    if app.is_json() {
        json::print(&names)?;
    } else if names.is_empty() {
        app.output.info("No boot scripts stored.");
    } else {
        for name in names {
            println!("{name}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Refuses while any recorded deployment was created with the script. The
/// check needs a backend that can enumerate instances.
async fn delete_script(app: &AppContext, name: &str) -> Result<ExitCode> {
    let mut config = app.config_store.load()?;
    if !config.user_data.contains_key(name) {
        return Err(ConfigError::ScriptNotFound(name.to_string()).into());
    }
    let session = app.session()?;
    let users = discovery::instances_using_boot_script(&session.store, name)
        .await
        .context("cannot check which instances use the script")?;
    if !users.is_empty() {
        return Err(ConfigError::ScriptInUse {
            name: name.to_string(),
            users,
        }
        .into());
    }
    config.user_data.remove(name);
    app.config_store.save(&config)?;
    if app.is_json() {
        json::print(&serde_json::json!({ "name": name, "deleted": true }))?;
    } else {
        app.output.success(&format!("Deleted boot script '{name}'"));
    }
    Ok(ExitCode::SUCCESS)
}

/// Existing deployments keep the old content; only new ones see the change.
/// Backends that cannot list instances skip the check.
async fn warn_script_users(app: &AppContext, script: &str) {
    let Ok(session) = app.session() else {
        return;
    };
    match discovery::instances_using_boot_script(&session.store, script).await {
        Ok(users) if !users.is_empty() => app.output.warn(&format!(
            "Boot script '{script}' is used by: {}",
            users.join(", ")
        )),
        Ok(_) => {}
        Err(e) => tracing::debug!(error = %e, "cannot check boot script users"),
    }
}
