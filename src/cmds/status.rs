use crate::cmds::query::found;
use crate::registry::{DirectoryLister, ModuleRegistry};
use crate::store::Store;
use color_eyre::Result;
use tracing::info;

/// Publishes or unpublishes a module.
///
/// # Errors
/// Returns an error if the store fails. An unknown module is reported and yields `Ok(false)`.
pub(crate) async fn set_status<S: Store, L: DirectoryLister>(
    code: &str,
    publish: bool,
    registry: &ModuleRegistry<S, L>,
) -> Result<bool> {
    if found(registry.set_status(code, publish).await)?.is_none() {
        return Ok(false);
    }

    info!(
        "Module '{}' {}",
        code,
        if publish { "published" } else { "unpublished" }
    );
    Ok(true)
}
