//! AWS adapter: the `aws` CLI wrapper and the provider built on it.

pub mod cli;
pub mod provider;

pub use cli::{AwsCli, AwsCliError};
pub use provider::{AwsProvider, AwsSettings};
