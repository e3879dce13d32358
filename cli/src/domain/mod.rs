//! Domain layer: pure business logic, types, and validation.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All functions are synchronous and take data in, returning data out.

pub mod catalog;
pub mod command;
pub mod config;
pub mod credentials;
pub mod error;
pub mod lifecycle;
pub mod requests;
pub mod values;

pub use catalog::{Catalog, CatalogEntry, ChartSource};
pub use command::RemoteCommand;
pub use config::{Credentials, KeelConfig};
pub use credentials::{ProbeSpec, ProbeTarget};
pub use error::{ApplicationError, ConfigError, ConnectionError, PipelineError, StoreError, VaultError};
pub use requests::{CreateRequest, DeleteRequest, ManualHost, ProvisionRequest, UpgradeRequest};
