//! CLI argument parsing with clap derive

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::app::{AppContext, AppFlags};
use crate::commands;

/// Private cloud boxes: create, inspect and tear down personal instances
#[derive(Parser)]
#[command(
    name = "privatebox",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(
        long,
        global = true,
        env = "NO_COLOR",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    pub no_color: bool,

    /// Profile to use instead of the current one
    #[arg(long, global = true, env = "PRIVATEBOX_PROFILE")]
    pub profile: Option<String>,

    /// Answer yes to confirmation prompts
    #[arg(short, long, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a new instance
    Create(commands::create::InstanceArgs),

    /// Create or update an instance, resuming a partial deployment
    Up(commands::create::InstanceArgs),

    /// Destroy an instance and every resource it owns
    Destroy(commands::destroy::DestroyArgs),

    /// List instances with their live state
    List(commands::list::ListArgs),

    /// Show one instance
    Show(commands::NameArg),

    /// Start a stopped instance
    Start(commands::NameArg),

    /// Stop a running instance
    Stop(commands::NameArg),

    /// Open a shell on an instance
    Connect(commands::connect::ConnectArgs),

    /// Manage profiles
    #[command(subcommand)]
    Config(commands::config::ConfigCommand),
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn run(self, cancel: &CancellationToken) -> Result<ExitCode> {
        let Cli {
            json,
            quiet,
            no_color,
            profile,
            yes,
            command,
        } = self;
        let app = AppContext::new(&AppFlags {
            no_color,
            quiet,
            json,
            yes,
            profile,
        });

        match command {
            Command::Create(args) => commands::create::run(&app, &args, false, cancel).await,
            Command::Up(args) => commands::create::run(&app, &args, true, cancel).await,
            Command::Destroy(args) => commands::destroy::run(&app, &args, cancel).await,
            Command::List(args) => commands::list::run(&app, &args, cancel).await,
            Command::Show(args) => commands::show::run(&app, &args.name).await,
            Command::Start(args) => {
                commands::power::run(&app, &args.name, crate::application::PowerAction::On).await
            }
            Command::Stop(args) => {
                commands::power::run(&app, &args.name, crate::application::PowerAction::Off).await
            }
            Command::Connect(args) => commands::connect::run(&app, &args, cancel).await,
            Command::Config(cmd) => commands::config::run(&app, cmd).await,
        }
    }
}
