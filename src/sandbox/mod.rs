//! Sandbox module containing all execution-related components.

pub mod config;
pub mod executor;
pub(crate) mod harness;
pub mod inventory;
pub mod io;
pub mod limits;
