//! Command implementations.
//!
//! Each subcommand is implemented in its own module.

pub(crate) mod completions;
pub(crate) mod monitor;
pub(crate) mod patch;
pub(crate) mod ports;
pub(crate) mod send;
