//! Application context: unified state passed to every command handler.
//!
//! `AppContext` carries the output settings and the config store. Commands
//! that touch deployments call [`AppContext::session`], which resolves the
//! active profile once and builds the provider and state store from that
//! snapshot.

use anyhow::Result;

use crate::application::ports::ConfigStore;
use crate::domain::config::{AppConfig, Profile};
use crate::infra::aws::cli::AwsCli;
use crate::infra::aws::provider::AwsProvider;
use crate::infra::command_runner::TokioCommandRunner;
use crate::infra::config::YamlConfigStore;
use crate::infra::state::StateStore;
use crate::output::OutputContext;

/// Output rendering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-readable terminal output (default).
    Human,
    /// Machine-readable JSON output.
    Json,
}

/// Flags passed from the top-level CLI to `AppContext::new`.
pub struct AppFlags {
    pub no_color: bool,
    pub quiet: bool,
    pub json: bool,
    /// Skip interactive prompts (also set by the `CI` / `PRIVATEBOX_YES` env vars).
    pub yes: bool,
    /// Profile chosen with `--profile`; wins over `current_profile`.
    pub profile: Option<String>,
}

/// Unified application context passed to every command handler.
pub struct AppContext {
    /// Terminal output context (colors, quiet mode).
    pub output: OutputContext,
    /// Output rendering mode (human vs JSON).
    pub mode: OutputMode,
    pub config_store: YamlConfigStore,
    /// When `true`, skip interactive prompts and use defaults.
    pub non_interactive: bool,
    profile: Option<String>,
}

/// Everything a deployment command needs, resolved from one profile.
pub struct Session {
    pub config: AppConfig,
    pub profile_name: String,
    pub profile: Profile,
    pub provider: AwsProvider<TokioCommandRunner>,
    pub store: StateStore<TokioCommandRunner>,
}

impl AppContext {
    /// Construct an `AppContext` from top-level CLI flags.
    #[must_use]
    pub fn new(flags: &AppFlags) -> Self {
        let ci_env = std::env::var("CI").is_ok() || std::env::var("PRIVATEBOX_YES").is_ok();
        let mode = if flags.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        };
        Self {
            output: OutputContext::new(flags.no_color, flags.quiet || flags.json),
            mode,
            config_store: YamlConfigStore,
            non_interactive: flags.yes || ci_env,
            profile: flags.profile.clone(),
        }
    }

    /// Returns `true` when JSON output mode is active.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.mode == OutputMode::Json
    }

    /// Load the config and resolve the active profile into a [`Session`].
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` when no profile can be resolved, or a
    /// `StoreError` when the profile's state backend is unsupported.
    pub fn session(&self) -> Result<Session> {
        let config = self.config_store.load()?;
        let (profile_name, profile) = config.resolve_profile(self.profile.as_deref())?;
        tracing::debug!(profile = %profile_name, backend = %profile.state_backend, "resolved profile");
        let provider = AwsProvider::from_profile(&profile);
        let cli = AwsCli::new(
            TokioCommandRunner::default(),
            &profile.region,
            profile.aws.profile.as_deref(),
        );
        let store = StateStore::open(&profile.state_backend, cli)?;
        Ok(Session {
            config,
            profile_name,
            profile,
            provider,
            store,
        })
    }

    /// Ask the user for confirmation.
    ///
    /// When `non_interactive` is `true` (CI, `--yes` flag, or `PRIVATEBOX_YES` env),
    /// returns `default` immediately without prompting.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal prompt fails (e.g. no TTY available).
    pub fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        if self.non_interactive {
            return Ok(default);
        }
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()?;
        Ok(confirmed)
    }
}
