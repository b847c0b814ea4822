//! Domain layer: pure types, validation and graph algorithms.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All functions are synchronous and take data in, returning data out.

pub mod config;
pub mod connect;
pub mod deployment;
pub mod error;
pub mod graph;
pub mod instance;

pub use config::{AccessRule, AppConfig, AwsConfig, Profile};
pub use deployment::{DeploymentState, RealizedResource, StateBackend, partition_location};
pub use error::{BuildError, ConfigError, DeploymentError, ProbeError, StoreError};
pub use graph::{InputValue, Outputs, ResolvedInputs, ResourceGraph, ResourceKind, ResourceNode};
pub use instance::InstanceSpec;
