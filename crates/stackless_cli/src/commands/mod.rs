//! CLI command implementations.

pub mod call;
pub mod get;
pub mod watch;
