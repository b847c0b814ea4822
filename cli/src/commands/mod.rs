//! Command implementations

pub mod config;
pub mod connect;
pub mod create;
pub mod destroy;
pub mod list;
pub mod power;
pub mod show;

use clap::Args;

/// A single instance name argument.
#[derive(Args)]
pub struct NameArg {
    /// Instance name
    pub name: String,
}
