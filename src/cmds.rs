//! Implementations of the CLI subcommands.
//!
//! Every command returns `Ok(true)` on success and `Ok(false)` if it failed in a way already
//! reported to the user.

pub(crate) mod install;
pub(crate) mod query;
pub(crate) mod status;
