//! Connect command rendering.

use std::collections::BTreeMap;

/// Template used when a profile has no `connect_command`.
pub const DEFAULT_CONNECT_TEMPLATE: &str = "ssh -i {key} {user}@{ip}";

/// Default template when the profile names no SSH key.
pub const KEYLESS_CONNECT_TEMPLATE: &str = "ssh {user}@{ip}";

/// Values substituted into a connect template.
#[derive(Debug, Clone, Default)]
pub struct ConnectTarget {
    pub user: String,
    pub ip: String,
    pub id: String,
    pub key: String,
}

/// Substitute `{user}`, `{ip}`, `{host}`, `{id}` and `{key}` in `template`.
///
/// `{host}` is the login target `user@ip`, ready for `ssh {host}` or `mosh {host}`.
#[must_use]
pub fn render_connect_command(template: &str, target: &ConnectTarget) -> String {
    let host = format!("{}@{}", target.user, target.ip);
    let values: BTreeMap<&str, &str> = [
        ("{user}", target.user.as_str()),
        ("{ip}", target.ip.as_str()),
        ("{host}", host.as_str()),
        ("{id}", target.id.as_str()),
        ("{key}", target.key.as_str()),
    ]
    .into_iter()
    .collect();
    values
        .iter()
        .fold(template.to_string(), |acc, (k, v)| acc.replace(k, v))
}

/// The template to render: the profile's own, else a default that only
/// passes `-i` when a key is known.
#[must_use]
pub fn connect_template(custom: Option<&str>, has_key: bool) -> &str {
    match custom.filter(|t| !t.trim().is_empty()) {
        Some(template) => template,
        None if has_key => DEFAULT_CONNECT_TEMPLATE,
        None => KEYLESS_CONNECT_TEMPLATE,
    }
}

/// Private key path paired with a public key path (`id_ed25519.pub` -> `id_ed25519`).
#[must_use]
pub fn private_key_path(public_key_path: &str) -> String {
    public_key_path
        .strip_suffix(".pub")
        .unwrap_or(public_key_path)
        .to_string()
}
