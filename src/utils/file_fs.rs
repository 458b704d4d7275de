//! File system helpers.

use color_eyre::Result;
use color_eyre::eyre::eyre;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// Expands a path, resolving environment variables and tilde expressions.
///
/// This function takes a path and expands any environment variables (e.g., $HOME) and tilde
/// expressions (~) within it.
///
/// # Arguments
///
/// * `path` - Any type that can be converted to a Path
/// * `env` - Optional HashMap containing environment variable pairs to prepend to the default
///           environment
///
/// # Errors
///
/// Returns an error if environment variables cannot be expanded.
pub(crate) fn expand_path<P: AsRef<Path>, S: AsRef<OsStr>>(
    path: P,
    env: Option<&HashMap<String, S>>,
) -> Result<PathBuf> {
    let home_dir = || -> Option<PathBuf> { dirs::home_dir() };

    // Create variable lookup closure that checks custom env first, then system env
    let context = |var: &str| -> Result<Option<OsString>> {
        if let Some(value) = env.and_then(|custom_env| custom_env.get(var)) {
            return Ok(Some(value.as_ref().into()));
        }
        Ok(std::env::var_os(var))
    };

    let expanded = shellexpand::path::full_with_context(&path, home_dir, context)
        .map_err(|e| eyre!("Failed to expand path: {:?}", e))?;

    Ok(PathBuf::from(expanded))
}

// -------------------------------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------------------------------
