//! Instance spec: the caller-supplied desired state of one instance.
//!
//! Pure types and validation; no I/O.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::domain::error::BuildError;

/// Tag carrying the instance name. Reserved: caller tags never override it.
pub const NAME_TAG: &str = "Name";

/// Tag carrying the named boot script, set only when one was used.
pub const USER_DATA_NAME_TAG: &str = "UserDataName";

/// Maximum instance name length (cloud resource names are derived from it).
pub const MAX_NAME_LEN: usize = 63;

/// A single safe path segment, starting with a letter or digit.
pub static INSTANCE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,62}$").expect("valid regex")
});

/// Desired state of one instance, immutable for the duration of an operation.
///
/// `name` is the sole key into deployment state: two specs with the same
/// name target the same deployed instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    /// Logical instance name.
    pub name: String,
    /// Compute size class, e.g. `"t3.micro"`.
    pub size: String,
    /// Boot script content, embedded verbatim.
    pub user_data: Option<String>,
    /// Name of the stored boot script `user_data` came from, if any.
    pub user_data_name: Option<String>,
    /// Caller-supplied tags.
    pub tags: BTreeMap<String, String>,
    /// Profile that owns the instance.
    pub profile: String,
}

impl InstanceSpec {
    /// Minimal spec: just a name and size, owned by `profile`.
    #[must_use]
    pub fn new(name: &str, size: &str, profile: &str) -> Self {
        Self {
            name: name.to_string(),
            size: size.to_string(),
            user_data: None,
            user_data_name: None,
            tags: BTreeMap::new(),
            profile: profile.to_string(),
        }
    }
}

/// Validates an instance name.
///
/// The name doubles as a storage partition key and a prefix for cloud
/// resource names, so it must be a single safe path segment.
///
/// # Errors
///
/// Returns `BuildError::EmptyName` or `BuildError::InvalidName`.
pub fn validate_instance_name(name: &str) -> Result<(), BuildError> {
    if name.is_empty() {
        return Err(BuildError::EmptyName);
    }
    if !INSTANCE_NAME_RE.is_match(name) {
        return Err(BuildError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Merge caller tags with the reserved tags.
///
/// Caller tags never override `Name`. `UserDataName` is present only when a
/// named (not ad hoc) boot script was used.
#[must_use]
pub fn merge_tags(spec: &InstanceSpec) -> BTreeMap<String, String> {
    let mut tags: BTreeMap<String, String> = spec
        .tags
        .iter()
        .filter(|(k, _)| k.as_str() != NAME_TAG && k.as_str() != USER_DATA_NAME_TAG)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    tags.insert(NAME_TAG.to_string(), spec.name.clone());
    if let Some(script) = spec.user_data_name.as_deref().filter(|s| !s.is_empty()) {
        tags.insert(USER_DATA_NAME_TAG.to_string(), script.to_string());
    }
    tags
}

/// Parse a `KEY=VALUE` tag argument.
///
/// # Errors
///
/// Returns an error message if there is no `=` or the key is empty.
pub fn parse_tag(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("invalid tag '{raw}': expected KEY=VALUE")),
    }
}
