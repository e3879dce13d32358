//! Infrastructure layer: concrete implementations of application port traits.
//!
//! This module contains all I/O-performing code: process execution, HTTP
//! clients for the store and cloud APIs, SSH transport, and chart bundling.
//!
//! Imports from `crate::domain` and `crate::application::ports` are allowed.
//! Imports from `crate::commands` or `crate::output` are forbidden.

pub mod charts;
pub mod cipher;
pub mod command_runner;
pub mod config;
pub mod hetzner;
pub mod keys;
pub mod oci;
pub mod platform;
pub mod providers;
pub mod remote_store;
pub mod ssh;
pub mod versions;
