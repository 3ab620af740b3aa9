#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Shared types and control-plane plumbing for the dendro compute resource
//! daemon: wire documents, processor specs, request signing, the HTTP client,
//! and the per-directory config bootstrap.

pub mod client;
pub mod config;
pub mod signing;
pub mod spec;
pub mod types;
