//! Human-readable terminal renderer.

use owo_colors::OwoColorize as _;
use privatebox_common::InstanceStatus;

use crate::application::services::status::InstanceDetail;
use crate::domain::config::{AppConfig, Profile};
use crate::domain::deployment::DeploymentState;
use crate::output::OutputContext;

/// Renders domain types as human-readable terminal output using `OutputContext`.
pub struct HumanRenderer<'a> {
    ctx: &'a OutputContext,
}

impl<'a> HumanRenderer<'a> {
    /// Create a new `HumanRenderer` wrapping the given output context.
    #[must_use]
    pub fn new(ctx: &'a OutputContext) -> Self {
        Self { ctx }
    }

    /// Render the instance table for `list`.
    pub fn render_instance_list(&self, instances: &[InstanceStatus]) {
        if instances.is_empty() {
            self.ctx.info("No instances found.");
            return;
        }
        let width = instances
            .iter()
            .map(|i| i.name.len())
            .max()
            .unwrap_or(0)
            .max("NAME".len());
        println!(
            "  {:<width$}  {:<14}  {:<20}  {:<16}  {}",
            "NAME".style(self.ctx.styles.bold),
            "STATE".style(self.ctx.styles.bold),
            "INSTANCE".style(self.ctx.styles.bold),
            "PUBLIC IP".style(self.ctx.styles.bold),
            "PRIVATE IP".style(self.ctx.styles.bold),
        );
        for instance in instances {
            let status = &instance.status;
            println!(
                "  {:<width$}  {:<14}  {:<20}  {:<16}  {}",
                instance.name,
                status.state.as_str().style(self.ctx.styles.state(status.state)),
                status.resource_id,
                status.public_ip.as_deref().unwrap_or("-"),
                status.private_ip.as_deref().unwrap_or("-"),
            );
        }
    }

    /// Render one instance: its deployment record plus live status.
    pub fn render_detail(&self, detail: &InstanceDetail) {
        let state = detail.status.state;
        self.render_deployment(&detail.deployment);
        self.ctx.kv(
            "State:",
            &state.as_str().style(self.ctx.styles.state(state)).to_string(),
        );
        if let Some(ip) = &detail.status.public_ip {
            self.ctx.kv("Live IP:", ip);
        }
    }

    /// Render a deployment record.
    pub fn render_deployment(&self, state: &DeploymentState) {
        self.ctx.header(&state.name);
        self.ctx.kv("Profile:", &state.profile);
        self.ctx.kv("Provider:", &state.provider);
        if let Some(placement) = &state.placement {
            self.ctx.kv("Region:", &placement.to_string());
        }
        self.ctx
            .kv("Instance:", state.instance_id.as_deref().unwrap_or("-"));
        self.ctx
            .kv("Public IP:", state.public_ip.as_deref().unwrap_or("-"));
        self.ctx
            .kv("Private IP:", state.private_ip.as_deref().unwrap_or("-"));
        if let Some(script) = &state.user_data_name {
            self.ctx.kv("Boot script:", script);
        }
        self.ctx.kv(
            "Created:",
            &state.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        );
        if !state.is_complete() {
            self.ctx
                .warn("Deployment is incomplete. Run 'privatebox up' to resume.");
        }
        if !self.ctx.quiet && !state.resources.is_empty() {
            println!();
            self.ctx.header("Resources:");
            for resource in &state.resources {
                self.ctx.kv(
                    &format!("{:<24}", resource.kind.as_str()),
                    &resource.physical_id,
                );
            }
        }
    }

    /// Render configured profiles, marking the current one.
    pub fn render_profiles(&self, config: &AppConfig) {
        if config.profiles.is_empty() {
            self.ctx.info("No profiles configured.");
            return;
        }
        for (name, profile) in &config.profiles {
            let marker = if config.current_profile.as_deref() == Some(name) {
                "*"
            } else {
                " "
            };
            println!(
                "  {marker} {name}  {}",
                format!("{} {}", profile.provider, profile.region).style(self.ctx.styles.dim)
            );
        }
    }

    /// Render one profile's settings.
    pub fn render_profile(&self, name: &str, profile: &Profile) {
        self.ctx.header(name);
        self.ctx.kv("Provider:", &profile.provider);
        self.ctx.kv("Region:", &profile.region);
        self.ctx.kv("State backend:", &profile.state_backend);
        self.ctx.kv("Instance type:", &profile.aws.instance_type);
        if let Some(aws_profile) = &profile.aws.profile {
            self.ctx.kv("AWS profile:", aws_profile);
        }
        if let Some(ami) = &profile.aws.ami {
            self.ctx.kv("Image:", ami);
        }
        if let Some(key) = &profile.ssh_public_key_path {
            self.ctx.kv("SSH key:", key);
        }
        if let Some(script) = &profile.user_data {
            self.ctx.kv("Boot script:", script);
        }
    }
}
