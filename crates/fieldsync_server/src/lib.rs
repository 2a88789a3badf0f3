//! # FieldSync Server
//!
//! Reference sync server for FieldSync.
//!
//! This crate provides:
//! - Pull, push and fetch endpoints with CBOR bodies
//! - A versioned entity table with tombstones
//! - Optimistic concurrency on `expected_version`
//! - Optional request rate limiting
//!
//! # Protocol
//!
//! 1. Clients pull changes since their cursor
//! 2. Clients push one mutation at a time, asserting the version they last saw
//! 3. A stale version is refused with the current server state so the client
//!    can resolve the conflict
//!
//! The server is in-memory; it exists to exercise clients end to end.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod limits;
mod server;
mod store;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use limits::RequestLimits;
pub use server::{ServerReply, SyncServer};
pub use store::ServerStore;
