#![deny(unsafe_code)]

//! Shared test utilities for the solo workspace.
//!
//! Provides isolated configurations and tracing helpers so that individual
//! crate tests stay concise and never touch a real runtime directory.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! solo-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod tracing_setup;
