use crate::store::sqlite_modules::{
    StoreLocalizedModule, StoreModule, StoreModuleUpsert, StoreTranslation,
};
use crate::store::{Store, create_store_dir};
use color_eyre::eyre::{WrapErr, eyre};
use color_eyre::{Result, Section};
use sqlx::sqlite;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, instrument};

/// Representation of the store database
#[derive(Clone, Debug)]
pub(crate) struct SQLiteStore {
    /// SQLite connection pool
    pub(crate) pool: sqlite::SqlitePool,
    /// Store location
    pub(crate) path: PathBuf,
}

impl SQLiteStore {
    /// Creates a new [`SQLiteStore`] instance.
    ///
    /// # Arguments
    /// * `pool` - A [`sqlite::SqlitePool`].
    /// * `path` - The path of the store database file.
    pub(crate) fn new(pool: sqlite::SqlitePool, path: PathBuf) -> Self {
        SQLiteStore { pool, path }
    }
}

// -------------------------------------------------------------------------------------------------
// Helper functions for SQLiteStore
// -------------------------------------------------------------------------------------------------

/// Initialize a [`SQLiteStore`].
///
/// Creates `dir` if needed and opens (or creates) the `store.sqlite` database inside it.
///
/// # Arguments
/// * `dir` - Directory of the store database, usually [`field@crate::config::BlocksConfig::store_path`]
///
/// # Returns
/// Returns `Ok(SQLiteStore)` if the store is successfully initialized, or an error if:
/// - Directory creation fails
/// - Database initialization fails
/// - Connection pool setup fails
pub(crate) async fn init_sqlite_store<P: AsRef<Path>>(dir: P) -> Result<SQLiteStore> {
    let dir = dir.as_ref();
    create_store_dir(dir).await?;

    let (pool, path) = init_pool(dir)
        .await
        .wrap_err_with(|| format!("Failed to initialize store in {}", dir.display()))
        .suggestion(format!(
            "Ensure that {} exists and you have read and write permissions to it",
            dir.display()
        ))?;

    Ok(SQLiteStore::new(pool, path))
}

/// Initializes and configures a SQLite connection pool for the store database.
///
/// This function:
/// - Creates a SQLite database file if it doesn't exist
/// - Configures connection options including WAL journal mode and synchronous settings
/// - Sets up a connection pool sized based on CPU cores
/// - Runs any pending database migrations
///
/// # Arguments
/// * `path` - Base directory path where the SQLite database file will be created
///
/// # Returns
/// * `Ok((SqlitePool, PathBuf))` - Configured and initialized connection pool and the database path
/// * `Err` - If database creation, migration, or pool setup fails
async fn init_pool(path: &Path) -> Result<(sqlite::SqlitePool, PathBuf)> {
    // Set the full path for the SQLite database file
    let path = path.join("store.sqlite");

    let database_url = format!(
        "sqlite://{}",
        path.to_str()
            .ok_or_else(|| eyre!("{:?} is not valid UTF-8", path))?
    );
    let pool_timeout = std::time::Duration::from_secs(30);
    // We set the number of connections to 4 times the number of physical CPUs
    let max_connections =
        u32::try_from(num_cpus::get_physical() * 4).wrap_err("Failed to convert usize to u32")?;

    let connection_options = sqlite::SqliteConnectOptions::from_str(&database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlite::SqliteSynchronous::Normal)
        .busy_timeout(pool_timeout);

    let pool = sqlite::SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(connection_options)
        .await?;

    // Create the necessary tables, if they do not exist already
    sqlx::migrate!("./db")
        .run(&pool)
        .await
        .wrap_err("Failed to initialize store database")?;

    Ok((pool, path))
}

// -------------------------------------------------------------------------------------------------
// Store impl for SQLiteStore
// -------------------------------------------------------------------------------------------------

impl Store for SQLiteStore {
    fn path(&self) -> &PathBuf {
        &self.path
    }

    // --
    // * Modules

    #[instrument(skip(self, module), fields(code = %module.code))]
    async fn save_module(&self, module: &StoreModuleUpsert) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
INSERT INTO modules (code, version, status, created_at)
VALUES (?1, ?2, COALESCE(?3, 0), ?4)
ON CONFLICT(code)
DO UPDATE SET
  version = excluded.version,
  status = COALESCE(?3, modules.status)
            "#,
        )
        .bind(&module.code)
        .bind(&module.version)
        .bind(module.status)
        .bind(module.date)
        .execute(&mut *tx)
        .await?;

        for translation in module.translations.iter() {
            sqlx::query(
                r#"
INSERT INTO translations (code, language_code, title, description)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(code, language_code)
DO UPDATE SET
  title = excluded.title,
  description = excluded.description
                "#,
            )
            .bind(&module.code)
            .bind(&translation.language_code)
            .bind(&translation.title)
            .bind(&translation.description)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            version = %module.version,
            translations = module.translations.len(),
            "Module saved"
        );
        Ok(())
    }

    async fn set_module_status(&self, code: &str, status: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE modules SET status = ?1 WHERE code = ?2")
            .bind(status)
            .bind(code)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_module(&self, code: &str) -> Result<Option<StoreModule>, sqlx::Error> {
        sqlx::query_as::<_, StoreModule>(
            r#"
SELECT id, code, version, status, created_at
FROM modules
WHERE code = ?1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_published_modules(
        &self,
        language_code: &str,
    ) -> Result<Vec<StoreLocalizedModule>, sqlx::Error> {
        sqlx::query_as::<_, StoreLocalizedModule>(
            r#"
SELECT modules.id, modules.code, modules.version, modules.status, translations.title, translations.description
FROM modules
LEFT JOIN translations
  ON translations.code = modules.code AND translations.language_code = ?1
WHERE modules.status = 1
ORDER BY modules.code
            "#,
        )
        .bind(language_code)
        .fetch_all(&self.pool)
        .await
    }

    // --
    // * Translations

    async fn get_translation(
        &self,
        code: &str,
        language_code: &str,
    ) -> Result<Option<StoreTranslation>, sqlx::Error> {
        sqlx::query_as::<_, StoreTranslation>(
            r#"
SELECT code, language_code, title, description
FROM translations
WHERE code = ?1 AND language_code = ?2
            "#,
        )
        .bind(code)
        .bind(language_code)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_translations(&self, code: &str) -> Result<Vec<StoreTranslation>, sqlx::Error> {
        sqlx::query_as::<_, StoreTranslation>(
            r#"
SELECT code, language_code, title, description
FROM translations
WHERE code = ?1
ORDER BY language_code
            "#,
        )
        .bind(code)
        .fetch_all(&self.pool)
        .await
    }
}

// -------------------------------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------------------------------
