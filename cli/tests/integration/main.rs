//! Integration tests for keel CLI
//!
//! These tests spawn the actual binary and test end-to-end behavior.
//! None of them reach a store, provider or host.

mod config_command;
