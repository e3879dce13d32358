//! Application services: use-case orchestration.
//!
//! Each service module implements one responsibility by composing domain
//! logic with port trait calls. Services import only from `crate::domain`
//! and `crate::application::ports`, never from `crate::infra`,
//! `crate::commands`, or `crate::output`.

pub mod config_service;
pub mod connection_pool;
pub mod deploy;
pub mod locks;
pub mod memo_cache;
pub mod orchestrator;
pub mod provision;
pub mod record_store;
pub mod rollback;
pub mod vault;
