#![deny(unsafe_code)]

//! solo core runtime.
//!
//! Arbitrates a single resident instance per endpoint name. Later invocations
//! forward their arguments to the resident over a Unix domain socket; the
//! resident routes them through the same option grammar it parsed its own
//! command line with and answers with a textual reply.

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Endpoint naming, socket paths, and the single-owner guard lock.
pub mod endpoint;
/// Startup: forward to a resident or become one.
pub mod instance;
/// Client/server transport over the endpoint.
pub mod ipc;
/// Reconfigurable logging (filter rules and message pattern).
pub mod logging;
/// Option grammar and reply construction.
pub mod router;
/// Periodic log emitter.
pub mod ticker;

pub use endpoint::{Endpoint, EndpointError};
pub use instance::{Instance, InstanceError, Outcome, ShutdownSignal};
pub use ipc::{Client, Dispatch, Server, ServerHandle};
pub use logging::LogControl;
pub use router::{ParseMode, Reply, Router};
