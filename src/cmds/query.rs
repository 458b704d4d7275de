use crate::errors::RegistryError;
use crate::registry::{DirectoryLister, ModuleRegistry};
use crate::store::Store;
use color_eyre::Result;
use serde::Serialize;
use tracing::error;

/// Prints a module with its information in `language_code`, all its languages and its images.
///
/// # Errors
/// Returns errors if the store or the image directory cannot be read.
pub(crate) async fn show<S: Store, L: DirectoryLister>(
    code: &str,
    language_code: &str,
    registry: &ModuleRegistry<S, L>,
) -> Result<bool> {
    let Some(module) = found(registry.find(code, language_code).await)? else {
        return Ok(false);
    };
    let languages = registry.available_languages(code).await?;
    let images = registry.images(code)?;

    print_json(&serde_json::json!({
        "module": module,
        "languages": languages,
        "images": images,
    }))?;
    Ok(true)
}

/// Prints all published modules with their information in `language_code`.
pub(crate) async fn list<S: Store, L: DirectoryLister>(
    language_code: &str,
    registry: &ModuleRegistry<S, L>,
) -> Result<bool> {
    print_json(&registry.published(language_code).await?)?;
    Ok(true)
}

/// Prints the languages of a module.
pub(crate) async fn languages<S: Store, L: DirectoryLister>(
    code: &str,
    registry: &ModuleRegistry<S, L>,
) -> Result<bool> {
    match found(registry.available_languages(code).await)? {
        Some(languages) => {
            print_json(&languages)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Prints the images of a module in display order.
pub(crate) fn images<S: Store, L: DirectoryLister>(
    code: &str,
    registry: &ModuleRegistry<S, L>,
) -> Result<bool> {
    print_json(&registry.images(code)?)?;
    Ok(true)
}

/// Reports an unknown module as a failed command instead of an error.
pub(super) fn found<T>(result: Result<T, RegistryError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(RegistryError::NotFound(code)) => {
            error!("Module '{}' not found", code);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// -------------------------------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------------------------------
