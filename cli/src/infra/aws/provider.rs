//! AWS implementation of the provider port traits.
//!
//! `AwsProvider<R>` builds the per-instance resource graph and realizes it
//! through the `aws` CLI. Generic over `R: CommandRunner` so tests can inject
//! a scripted runner without spawning real processes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use privatebox_common::{LifecycleState, RuntimeStatus};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::application::ports::{
    CommandRunner, GraphBuilder, PowerAction, PowerControl, ProviderInfo, Realized, ResourceRealizer,
    StatusProbe,
};
use crate::domain::config::{AccessRule, Profile};
use crate::domain::deployment::{Placement, RealizedResource};
use crate::domain::error::{BuildError, ProbeError};
use crate::domain::graph::{
    InputValue, Outputs, ResolvedInputs, ResourceGraph, ResourceKind, ResourceNode,
};
use crate::domain::instance::{InstanceSpec, merge_tags, validate_instance_name};
use crate::infra::aws::cli::{AwsCli, AwsCliError, is_not_found};
use crate::infra::command_runner::{TokioCommandRunner, WAIT_CMD_TIMEOUT};
use crate::infra::fs::expand_home;

/// Canonical's image owner id.
pub const CANONICAL_OWNER: &str = "099720109477";
/// Ubuntu 22.04 LTS server images.
pub const UBUNTU_IMAGE_FILTER: &str = "ubuntu/images/hvm-ssd/ubuntu-jammy-22.04-amd64-server-*";
/// Managed policy that lets Session Manager reach the instance.
pub const SSM_POLICY_ARN: &str = "arn:aws:iam::aws:policy/AmazonSSMManagedInstanceCore";
/// Login user on Ubuntu images.
pub const DEFAULT_LOGIN_USER: &str = "ubuntu";

const DEFAULT_ROOT_DEVICE: &str = "/dev/sda1";
const KEY_DELETION_WINDOW_DAYS: &str = "7";

/// A freshly created instance profile can take a few seconds to become
/// visible to EC2.
const PROFILE_RETRIES: u32 = 6;
const PROFILE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Profile values the adapter needs, captured once per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsSettings {
    pub region: String,
    pub profile: Option<String>,
    /// Explicit image id; wins over the lookup.
    pub ami: Option<String>,
    pub ssh_public_key_path: Option<String>,
    pub ingress: Vec<AccessRule>,
    pub egress: Vec<AccessRule>,
}

impl AwsSettings {
    #[must_use]
    pub fn from_profile(profile: &Profile) -> Self {
        Self {
            region: profile.region.clone(),
            profile: profile.aws.profile.clone(),
            ami: profile.aws.ami.clone().filter(|s| !s.is_empty()),
            ssh_public_key_path: profile.ssh_public_key_path.clone().filter(|s| !s.is_empty()),
            ingress: profile.aws.effective_ingress(),
            egress: profile.aws.egress_rules.clone(),
        }
    }
}

/// Reference provider: EC2 instance plus its KMS key, security group, IAM
/// role and instance profile, optional key pair and an Ubuntu image lookup.
pub struct AwsProvider<R: CommandRunner> {
    cli: AwsCli<R>,
    settings: AwsSettings,
}

impl<R: CommandRunner> AwsProvider<R> {
    pub fn new(runner: R, settings: AwsSettings) -> Self {
        Self {
            cli: AwsCli::new(runner, &settings.region, settings.profile.as_deref()),
            settings,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &AwsSettings {
        &self.settings
    }
}

impl AwsProvider<TokioCommandRunner> {
    /// Convenience constructor for production use.
    #[must_use]
    pub fn from_profile(profile: &Profile) -> Self {
        Self::new(TokioCommandRunner::default(), AwsSettings::from_profile(profile))
    }
}

// ── Input helpers ────────────────────────────────────────────────────────────

fn text<'a>(inputs: &'a ResolvedInputs, key: &str) -> Result<&'a str> {
    opt_text(inputs, key).ok_or_else(|| anyhow!("missing input '{key}'"))
}

fn opt_text<'a>(inputs: &'a ResolvedInputs, key: &str) -> Option<&'a str> {
    inputs
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Result<&'a str> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("unexpected aws response: missing {pointer}"))
}

fn opt_str_at(value: &Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn outputs(pairs: &[(&str, &str)]) -> Outputs {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn rules(inputs: &ResolvedInputs, key: &str) -> Result<Vec<AccessRule>> {
    match inputs.get(key) {
        Some(value) => serde_json::from_value(value.clone())
            .with_context(|| format!("input '{key}' is not a list of access rules")),
        None => Ok(Vec::new()),
    }
}

fn ip_permissions(rules: &[AccessRule]) -> String {
    Value::Array(
        rules
            .iter()
            .map(|r| {
                json!({
                    "IpProtocol": r.protocol,
                    "FromPort": r.from_port,
                    "ToPort": r.to_port,
                    "IpRanges": r.cidr_blocks.iter().map(|c| json!({ "CidrIp": c })).collect::<Vec<_>>(),
                })
            })
            .collect(),
    )
    .to_string()
}

fn tag_list(inputs: &ResolvedInputs) -> Vec<Value> {
    inputs
        .get("tags")
        .and_then(Value::as_object)
        .map(|tags| {
            tags.iter()
                .map(|(k, v)| json!({ "Key": k, "Value": v.as_str().unwrap_or_default() }))
                .collect()
        })
        .unwrap_or_default()
}

fn tag_specifications(inputs: &ResolvedInputs, resource_types: &[&str]) -> String {
    let tags = tag_list(inputs);
    Value::Array(
        resource_types
            .iter()
            .map(|t| json!({ "ResourceType": t, "Tags": tags }))
            .collect(),
    )
    .to_string()
}

fn trust_policy() -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": "ec2.amazonaws.com" },
            "Action": "sts:AssumeRole",
        }],
    })
}

fn name_tag(name: &str) -> InputValue {
    InputValue::Map(BTreeMap::from([(
        crate::domain::instance::NAME_TAG.to_string(),
        name.to_string(),
    )]))
}

fn read_public_key(path: &str) -> Result<String> {
    let expanded: PathBuf = expand_home(path)?;
    let key = std::fs::read_to_string(&expanded).map_err(|source| BuildError::UnreadableKey {
        path: expanded.clone(),
        source,
    })?;
    Ok(key.trim().to_string())
}

// ── Provider ports ───────────────────────────────────────────────────────────

impl<R: CommandRunner> ProviderInfo for AwsProvider<R> {
    fn name(&self) -> &str {
        "aws"
    }

    fn default_login_user(&self) -> &str {
        DEFAULT_LOGIN_USER
    }

    fn placement(&self) -> Placement {
        Placement::new(&self.settings.region, self.settings.profile.as_deref())
    }
}

impl<R: CommandRunner> GraphBuilder for AwsProvider<R> {
    fn build_graph(&self, spec: &InstanceSpec) -> Result<ResourceGraph> {
        validate_instance_name(&spec.name)?;
        // Key material is read now so a bad path fails the build, not realization.
        let public_key = self
            .settings
            .ssh_public_key_path
            .as_deref()
            .map(read_public_key)
            .transpose()?;

        let name = spec.name.as_str();
        let kms = format!("{name}-kms");
        let sg = format!("{name}-sg");
        let role = format!("{name}-role");
        let rpa = format!("{name}-rpa");
        let profile = format!("{name}-profile");
        let key = format!("{name}-key");
        let ami = format!("{name}-ami");

        let mut nodes = vec![
            ResourceNode::new(&kms, ResourceKind::EncryptionKey)
                .text("description", format!("privatebox root volume key for {name}"))
                .input("tags", name_tag(&kms)),
            ResourceNode::new(&sg, ResourceKind::SecurityGroup)
                .text("group_name", &sg)
                .text("description", format!("privatebox access for {name}"))
                .input("ingress", InputValue::Json(serde_json::to_value(&self.settings.ingress)?))
                .input("egress", InputValue::Json(serde_json::to_value(&self.settings.egress)?))
                .input("tags", name_tag(&sg)),
            ResourceNode::new(&role, ResourceKind::IamRole)
                .text("role_name", &role)
                .input("assume_role_policy", InputValue::Json(trust_policy())),
            ResourceNode::new(&rpa, ResourceKind::RolePolicyAttachment)
                .reference("role_name", &role, "name")
                .text("policy_arn", SSM_POLICY_ARN),
            ResourceNode::new(&profile, ResourceKind::InstanceProfile)
                .text("profile_name", &profile)
                .reference("role_name", &role, "name"),
        ];
        if let Some(material) = &public_key {
            nodes.push(
                ResourceNode::new(&key, ResourceKind::KeyPair)
                    .text("key_name", &key)
                    .text("public_key", material)
                    .input("tags", name_tag(&key)),
            );
        }
        let image = ResourceNode::new(&ami, ResourceKind::MachineImage);
        nodes.push(match &self.settings.ami {
            Some(id) => image.text("image_id", id),
            None => image
                .text("owner", CANONICAL_OWNER)
                .text("name_filter", UBUNTU_IMAGE_FILTER),
        });

        let mut compute = ResourceNode::new(name, ResourceKind::ComputeInstance)
            .text("instance_type", &spec.size)
            .reference("kms_key_id", &kms, "arn")
            .reference("security_group_id", &sg, "id")
            .reference("instance_profile", &profile, "name")
            .reference("image_id", &ami, "id")
            .reference("root_device", &ami, "root_device_name")
            .input("tags", InputValue::Map(merge_tags(spec)));
        if public_key.is_some() {
            compute = compute.reference("key_name", &key, "name");
        }
        if let Some(user_data) = &spec.user_data {
            compute = compute.text("user_data", user_data);
        }
        nodes.push(compute);

        Ok(ResourceGraph::new(nodes)?)
    }
}

impl<R: CommandRunner> ResourceRealizer for AwsProvider<R> {
    async fn create(&self, node: &ResourceNode, inputs: &ResolvedInputs) -> Result<Realized> {
        match node.kind {
            ResourceKind::EncryptionKey => self.create_key(inputs).await,
            ResourceKind::SecurityGroup => self.create_security_group(inputs).await,
            ResourceKind::IamRole => self.create_role(inputs).await,
            ResourceKind::RolePolicyAttachment => self.attach_policy(inputs).await,
            ResourceKind::InstanceProfile => self.create_instance_profile(inputs).await,
            ResourceKind::KeyPair => self.import_key_pair(inputs).await,
            ResourceKind::MachineImage => {
                let outputs = self.lookup_image(inputs).await?;
                let physical_id = outputs.get("id").cloned().unwrap_or_default();
                Ok(Realized {
                    physical_id,
                    outputs,
                })
            }
            ResourceKind::ComputeInstance => self.run_instance(inputs).await,
        }
    }

    async fn read(&self, node: &ResourceNode, inputs: &ResolvedInputs) -> Result<Outputs> {
        match node.kind {
            ResourceKind::MachineImage => self.lookup_image(inputs).await,
            kind => bail!("{kind} '{}' is not a data source", node.id),
        }
    }

    async fn delete(&self, resource: &RealizedResource) -> Result<()> {
        let id = resource.physical_id.as_str();
        match resource.kind {
            ResourceKind::EncryptionKey => {
                let result = self
                    .cli
                    .call(&[
                        "kms",
                        "schedule-key-deletion",
                        "--key-id",
                        id,
                        "--pending-window-in-days",
                        KEY_DELETION_WINDOW_DAYS,
                    ])
                    .await;
                match result {
                    Err(e)
                        if e.downcast_ref::<AwsCliError>()
                            .is_some_and(|a| a.code.as_deref() == Some("KMSInvalidStateException")) =>
                    {
                        debug!(key_id = %id, "key already pending deletion");
                        Ok(())
                    }
                    other => ignore_missing(other),
                }
            }
            ResourceKind::SecurityGroup => ignore_missing(
                self.cli
                    .call(&["ec2", "delete-security-group", "--group-id", id])
                    .await,
            ),
            ResourceKind::IamRole => ignore_missing(
                self.cli
                    .call(&["iam", "delete-role", "--role-name", id])
                    .await,
            ),
            ResourceKind::RolePolicyAttachment => {
                let role = resource
                    .outputs
                    .get("role_name")
                    .context("attachment record has no role_name")?;
                let arn = resource
                    .outputs
                    .get("policy_arn")
                    .context("attachment record has no policy_arn")?;
                ignore_missing(
                    self.cli
                        .call(&[
                            "iam",
                            "detach-role-policy",
                            "--role-name",
                            role,
                            "--policy-arn",
                            arn,
                        ])
                        .await,
                )
            }
            ResourceKind::InstanceProfile => {
                if let Some(role) = resource.outputs.get("role_name") {
                    ignore_missing(
                        self.cli
                            .call(&[
                                "iam",
                                "remove-role-from-instance-profile",
                                "--instance-profile-name",
                                id,
                                "--role-name",
                                role,
                            ])
                            .await,
                    )?;
                }
                ignore_missing(
                    self.cli
                        .call(&["iam", "delete-instance-profile", "--instance-profile-name", id])
                        .await,
                )
            }
            ResourceKind::KeyPair => ignore_missing(
                self.cli
                    .call(&["ec2", "delete-key-pair", "--key-pair-id", id])
                    .await,
            ),
            ResourceKind::MachineImage => Ok(()),
            ResourceKind::ComputeInstance => {
                let terminated = self
                    .cli
                    .call(&["ec2", "terminate-instances", "--instance-ids", id])
                    .await;
                if terminated.is_err() {
                    return ignore_missing(terminated);
                }
                info!(instance_id = %id, "waiting for instance to terminate");
                ignore_missing(
                    self.cli
                        .call_with_timeout(
                            &["ec2", "wait", "instance-terminated", "--instance-ids", id],
                            WAIT_CMD_TIMEOUT,
                        )
                        .await,
                )
            }
        }
    }
}

fn ignore_missing<T>(result: Result<T>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if is_not_found(&e) => {
            debug!(error = %e, "already gone");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

impl<R: CommandRunner> StatusProbe for AwsProvider<R> {
    async fn probe(&self, resource_id: &str) -> Result<RuntimeStatus> {
        let instance = self.describe_instance(resource_id).await?;
        let state = LifecycleState::from_provider(&opt_str_at(&instance, "/State/Name"));
        let some = |s: String| (!s.is_empty()).then_some(s);
        Ok(RuntimeStatus {
            resource_id: resource_id.to_string(),
            state,
            public_ip: some(opt_str_at(&instance, "/PublicIpAddress")),
            private_ip: some(opt_str_at(&instance, "/PrivateIpAddress")),
            cpu_percent: None,
            observed_at: Utc::now(),
        })
    }
}

impl<R: CommandRunner> PowerControl for AwsProvider<R> {
    async fn set_power(&self, resource_id: &str, action: PowerAction) -> Result<()> {
        let verb = match action {
            PowerAction::On => "start-instances",
            PowerAction::Off => "stop-instances",
        };
        match self
            .cli
            .call(&["ec2", verb, "--instance-ids", resource_id])
            .await
        {
            Err(e) if is_not_found(&e) => Err(ProbeError::NotFound(resource_id.to_string()).into()),
            other => other.map(|_| ()),
        }
    }
}

// ── Resource operations ──────────────────────────────────────────────────────

impl<R: CommandRunner> AwsProvider<R> {
    async fn create_key(&self, inputs: &ResolvedInputs) -> Result<Realized> {
        let tags = Value::Array(
            tag_list(inputs)
                .into_iter()
                .map(|t| json!({ "TagKey": t["Key"], "TagValue": t["Value"] }))
                .collect(),
        )
        .to_string();
        let created = self
            .cli
            .json(&[
                "kms",
                "create-key",
                "--description",
                text(inputs, "description")?,
                "--tags",
                &tags,
            ])
            .await?;
        let key_id = str_at(&created, "/KeyMetadata/KeyId")?;
        let arn = str_at(&created, "/KeyMetadata/Arn")?;
        Ok(Realized {
            physical_id: key_id.to_string(),
            outputs: outputs(&[("id", key_id), ("arn", arn)]),
        })
    }

    async fn create_security_group(&self, inputs: &ResolvedInputs) -> Result<Realized> {
        let group_name = text(inputs, "group_name")?;
        let created = self
            .cli
            .json(&[
                "ec2",
                "create-security-group",
                "--group-name",
                group_name,
                "--description",
                text(inputs, "description")?,
                "--tag-specifications",
                &tag_specifications(inputs, &["security-group"]),
            ])
            .await?;
        let group_id = str_at(&created, "/GroupId")?.to_string();

        if let Err(e) = self.authorize(&group_id, inputs).await {
            warn!(group_id = %group_id, "rule setup failed; removing group");
            let cleanup = ["ec2", "delete-security-group", "--group-id", group_id.as_str()];
            return Err(self.discard(&cleanup, &group_id, e).await);
        }
        Ok(Realized {
            outputs: outputs(&[("id", &group_id), ("name", group_name)]),
            physical_id: group_id,
        })
    }

    async fn authorize(&self, group_id: &str, inputs: &ResolvedInputs) -> Result<()> {
        let ingress = rules(inputs, "ingress")?;
        if !ingress.is_empty() {
            self.cli
                .call(&[
                    "ec2",
                    "authorize-security-group-ingress",
                    "--group-id",
                    group_id,
                    "--ip-permissions",
                    &ip_permissions(&ingress),
                ])
                .await?;
        }
        let egress = rules(inputs, "egress")?;
        if !egress.is_empty() {
            self.cli
                .call(&[
                    "ec2",
                    "authorize-security-group-egress",
                    "--group-id",
                    group_id,
                    "--ip-permissions",
                    &ip_permissions(&egress),
                ])
                .await?;
        }
        Ok(())
    }

    async fn create_role(&self, inputs: &ResolvedInputs) -> Result<Realized> {
        let policy = inputs
            .get("assume_role_policy")
            .context("missing input 'assume_role_policy'")?
            .to_string();
        let created = self
            .cli
            .json(&[
                "iam",
                "create-role",
                "--role-name",
                text(inputs, "role_name")?,
                "--assume-role-policy-document",
                &policy,
            ])
            .await?;
        let name = str_at(&created, "/Role/RoleName")?;
        let arn = str_at(&created, "/Role/Arn")?;
        Ok(Realized {
            physical_id: name.to_string(),
            outputs: outputs(&[("id", name), ("name", name), ("arn", arn)]),
        })
    }

    async fn attach_policy(&self, inputs: &ResolvedInputs) -> Result<Realized> {
        let role = text(inputs, "role_name")?;
        let arn = text(inputs, "policy_arn")?;
        self.cli
            .call(&[
                "iam",
                "attach-role-policy",
                "--role-name",
                role,
                "--policy-arn",
                arn,
            ])
            .await?;
        Ok(Realized {
            physical_id: format!("{role}/{arn}"),
            outputs: outputs(&[("role_name", role), ("policy_arn", arn)]),
        })
    }

    async fn create_instance_profile(&self, inputs: &ResolvedInputs) -> Result<Realized> {
        let name = text(inputs, "profile_name")?;
        let role = text(inputs, "role_name")?;
        let created = self
            .cli
            .json(&["iam", "create-instance-profile", "--instance-profile-name", name])
            .await?;
        let arn = str_at(&created, "/InstanceProfile/Arn")?.to_string();

        let added = self
            .cli
            .call(&[
                "iam",
                "add-role-to-instance-profile",
                "--instance-profile-name",
                name,
                "--role-name",
                role,
            ])
            .await;
        if let Err(e) = added {
            warn!(profile = %name, "role binding failed; removing instance profile");
            let cleanup = ["iam", "delete-instance-profile", "--instance-profile-name", name];
            return Err(self.discard(&cleanup, name, e).await);
        }
        Ok(Realized {
            physical_id: name.to_string(),
            outputs: outputs(&[("id", name), ("name", name), ("arn", &arn), ("role_name", role)]),
        })
    }

    async fn import_key_pair(&self, inputs: &ResolvedInputs) -> Result<Realized> {
        let key_name = text(inputs, "key_name")?;
        // The CLI takes blob parameters base64-encoded.
        let material = STANDARD.encode(text(inputs, "public_key")?);
        let imported = self
            .cli
            .json(&[
                "ec2",
                "import-key-pair",
                "--key-name",
                key_name,
                "--public-key-material",
                &material,
                "--tag-specifications",
                &tag_specifications(inputs, &["key-pair"]),
            ])
            .await?;
        let key_id = str_at(&imported, "/KeyPairId")?;
        Ok(Realized {
            physical_id: key_id.to_string(),
            outputs: outputs(&[
                ("id", key_id),
                ("name", key_name),
                ("fingerprint", &opt_str_at(&imported, "/KeyFingerprint")),
            ]),
        })
    }

    async fn lookup_image(&self, inputs: &ResolvedInputs) -> Result<Outputs> {
        let images = if let Some(id) = opt_text(inputs, "image_id") {
            self.cli
                .json(&["ec2", "describe-images", "--image-ids", id])
                .await?
        } else {
            let filter = format!("Name=name,Values={}", text(inputs, "name_filter")?);
            self.cli
                .json(&[
                    "ec2",
                    "describe-images",
                    "--owners",
                    text(inputs, "owner")?,
                    "--filters",
                    &filter,
                    "Name=virtualization-type,Values=hvm",
                    "Name=state,Values=available",
                ])
                .await?
        };
        let latest = images
            .get("Images")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .max_by_key(|image| {
                image["CreationDate"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string()
            })
            .ok_or_else(|| anyhow!("no machine image matches the lookup"))?;

        let id = str_at(latest, "/ImageId")?;
        let root = latest["RootDeviceName"]
            .as_str()
            .unwrap_or(DEFAULT_ROOT_DEVICE);
        debug!(image_id = %id, "image resolved");
        Ok(outputs(&[
            ("id", id),
            ("name", &opt_str_at(latest, "/Name")),
            ("root_device_name", root),
            ("creation_date", &opt_str_at(latest, "/CreationDate")),
        ]))
    }

    async fn run_instance(&self, inputs: &ResolvedInputs) -> Result<Realized> {
        let profile_arg = format!("Name={}", text(inputs, "instance_profile")?);
        let block_devices = json!([{
            "DeviceName": text(inputs, "root_device")?,
            "Ebs": {
                "Encrypted": true,
                "KmsKeyId": text(inputs, "kms_key_id")?,
                "DeleteOnTermination": true,
            },
        }])
        .to_string();
        let tags = tag_specifications(inputs, &["instance", "volume"]);
        let mut args = vec![
            "ec2",
            "run-instances",
            "--image-id",
            text(inputs, "image_id")?,
            "--instance-type",
            text(inputs, "instance_type")?,
            "--count",
            "1",
            "--iam-instance-profile",
            profile_arg.as_str(),
            "--security-group-ids",
            text(inputs, "security_group_id")?,
            "--block-device-mappings",
            block_devices.as_str(),
            "--tag-specifications",
            tags.as_str(),
        ];
        if let Some(key) = opt_text(inputs, "key_name") {
            args.extend(["--key-name", key]);
        }
        if let Some(user_data) = opt_text(inputs, "user_data") {
            args.extend(["--user-data", user_data]);
        }

        let launched = self.run_instances_retrying(&args).await?;
        let id = str_at(&launched, "/Instances/0/InstanceId")?.to_string();
        info!(instance_id = %id, "waiting for instance to run");

        let described = match self.wait_running(&id).await {
            Ok(described) => described,
            Err(e) => {
                warn!(instance_id = %id, "instance did not come up; terminating");
                let cleanup = ["ec2", "terminate-instances", "--instance-ids", id.as_str()];
                return Err(self.discard(&cleanup, &id, e).await);
            }
        };
        Ok(Realized {
            outputs: outputs(&[
                ("id", &id),
                ("public_ip", &opt_str_at(&described, "/PublicIpAddress")),
                ("private_ip", &opt_str_at(&described, "/PrivateIpAddress")),
                ("public_dns", &opt_str_at(&described, "/PublicDnsName")),
            ]),
            physical_id: id,
        })
    }

    async fn run_instances_retrying(&self, args: &[&str]) -> Result<Value> {
        let mut attempt = 1;
        loop {
            match self.cli.json(args).await {
                Err(e) if attempt < PROFILE_RETRIES && is_profile_propagation(&e) => {
                    debug!(attempt, "instance profile not visible yet; retrying");
                    attempt += 1;
                    tokio::time::sleep(PROFILE_RETRY_DELAY).await;
                }
                result => return result,
            }
        }
    }

    /// Remove a half-created resource after `cause`. A failed removal is
    /// logged and named in the returned error, since nothing records it.
    async fn discard(
        &self,
        args: &[&str],
        physical_id: &str,
        cause: anyhow::Error,
    ) -> anyhow::Error {
        match ignore_missing(self.cli.call(args).await) {
            Ok(()) => cause,
            Err(cleanup) => {
                warn!(
                    physical_id = %physical_id,
                    error = %cleanup,
                    "cleanup failed; resource left behind"
                );
                cause.context(format!(
                    "cleanup of {physical_id} also failed ({cleanup}); remove it manually"
                ))
            }
        }
    }

    async fn wait_running(&self, id: &str) -> Result<Value> {
        self.cli
            .call_with_timeout(
                &["ec2", "wait", "instance-running", "--instance-ids", id],
                WAIT_CMD_TIMEOUT,
            )
            .await
            .context("waiting for instance to run")?;
        self.describe_instance(id).await
    }

    /// Describe one instance; a missing id maps to `ProbeError::NotFound`.
    async fn describe_instance(&self, id: &str) -> Result<Value> {
        let described = match self
            .cli
            .json(&["ec2", "describe-instances", "--instance-ids", id])
            .await
        {
            Err(e) if is_not_found(&e) => {
                return Err(ProbeError::NotFound(id.to_string()).into());
            }
            other => other?,
        };
        described
            .pointer("/Reservations/0/Instances/0")
            .cloned()
            .ok_or_else(|| ProbeError::NotFound(id.to_string()).into())
    }
}

fn is_profile_propagation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<AwsCliError>()
        .is_some_and(|e| e.message.contains("Invalid IAM Instance Profile"))
}
