//! This module persists the module catalog.
//!
//! The catalog is kept behind the [`Store`] trait so that the registry only depends on the
//! operations it needs. [`sqlite::SQLiteStore`] is the implementation used by the application.

use crate::store::sqlite_modules::{
    StoreLocalizedModule, StoreModule, StoreModuleUpsert, StoreTranslation,
};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

pub(crate) mod sqlite;
pub(crate) mod sqlite_modules;

// -------------------------------------------------------------------------------------------------
// Store trait
// -------------------------------------------------------------------------------------------------

pub(crate) trait Store {
    /// Returns the path of the store database.
    fn path(&self) -> &PathBuf;

    // --
    // * Modules

    /// Inserts or updates a module and its translations in one transaction.
    ///
    /// The module row is matched by `code`, translations by `(code, language_code)`. An existing
    /// row keeps its id and creation date.
    ///
    /// # Errors
    /// Returns an error if there's an error during the database operation.
    async fn save_module(&self, module: &StoreModuleUpsert) -> Result<(), sqlx::Error>;

    /// Sets the publish flag of a module.
    ///
    /// Returns `false` if no module with this code exists.
    async fn set_module_status(&self, code: &str, status: bool) -> Result<bool, sqlx::Error>;

    /// Retrieves a single module by its code.
    async fn get_module(&self, code: &str) -> Result<Option<StoreModule>, sqlx::Error>;

    /// Retrieves all published modules joined with their translation for `language_code`.
    async fn get_published_modules(
        &self,
        language_code: &str,
    ) -> Result<Vec<StoreLocalizedModule>, sqlx::Error>;

    // --
    // * Translations

    /// Retrieves the translation of a module for one language.
    async fn get_translation(
        &self,
        code: &str,
        language_code: &str,
    ) -> Result<Option<StoreTranslation>, sqlx::Error>;

    /// Retrieves all translations of a module.
    async fn get_translations(&self, code: &str) -> Result<Vec<StoreTranslation>, sqlx::Error>;
}

// -------------------------------------------------------------------------------------------------
// Store directory creation
// -------------------------------------------------------------------------------------------------

/// Creates the directory holding the store database.
///
/// # Arguments
/// * `file_path` - Path where the store directory should be created
///
/// # Returns
/// * `Ok(())` - Directory created successfully or already exists
/// * `Err` - If directory creation fails
#[instrument(skip(file_path))]
async fn create_store_dir<P: AsRef<Path>>(file_path: P) -> Result<()> {
    match file_path.as_ref().try_exists() {
        Ok(false) => {
            debug!(
                "Store directory '{}' does not exist, creating.",
                file_path.as_ref().display()
            );
            tokio::fs::create_dir_all(file_path.as_ref())
                .await
                .wrap_err_with(|| format!("Failed to create directory {:?}", file_path.as_ref()))?;
            Ok(())
        }
        Ok(true) => {
            debug!(
                "Store directory '{}' exists already, continuing.",
                file_path.as_ref().display()
            );
            Ok(())
        }
        Err(e) => Err(eyre!("{}", e)),
    }
}

// -------------------------------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------------------------------
