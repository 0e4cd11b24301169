//! Endpoint IPC: Unix domain socket transport between invocations.
//!
//! A new invocation first acts as a [`Client`]: if a resident instance
//! answers on the endpoint, the invocation's arguments are forwarded and the
//! invocation exits. Otherwise it claims the endpoint and runs the
//! [`Server`], routing every forwarded request through the argument router.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐        Unix socket         ┌──────────────┐
//! │  invocation  │───────────────────────────▶│    Server    │
//! │   (Client)   │  raw argv line / raw reply │   reactor    │
//! └──────────────┘                            └──────┬───────┘
//!                                                    │
//!                                             ┌──────▼───────┐
//!                                             │    Router    │
//!                                             │  (lenient)   │
//!                                             └──────────────┘
//! ```

pub mod client;
pub mod server;
pub mod wire;

pub use client::{Client, Dispatch};
pub use server::{ConnectionId, ConnectionState, Server, ServerHandle};
