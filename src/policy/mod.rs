//! Declarative allow/deny decisions for network and filesystem access.
//!
//! Both policies are immutable once an executor is built and are shared
//! read-only. The Rust types are the source of truth: each execution gets a
//! serialized copy baked into its harness, which applies the same decision
//! procedure inside the child.

pub mod filesystem;
pub mod network;

pub use filesystem::{FileAction, FileSystemPolicy, FsDenial, RESTRICTED_DIRS};
pub use network::{NetworkPolicy, LOOPBACK_HOSTS};
