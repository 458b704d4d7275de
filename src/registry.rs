//! The versioned, language-aware module catalog.
//!
//! [`ModuleRegistry`] shapes the rows of a [`Store`] into the records consumed by the front end
//! and finds the images of a module. Images are not stored in the database: by convention they
//! live in `<resources_root>/<code>/<n>.png` and are ordered by `<n>`.

use crate::errors::RegistryError;
use crate::manifest::{LocalizedText, Manifest, slugify};
use crate::store::Store;
use crate::store::sqlite_modules::{StoreModuleUpsert, StoreTranslation};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Information of a module in one language. Empty if the module has no such translation.
pub(crate) type ModuleInformation = LocalizedText;

/// Fields written by [`ModuleRegistry::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ModuleFields {
    pub(crate) code: String,
    pub(crate) version: String,
    /// Publish flag. `None` keeps the current flag; new modules start unpublished.
    pub(crate) status: Option<bool>,
    /// Translations keyed by language code.
    pub(crate) translations: BTreeMap<String, ModuleInformation>,
}

impl ModuleFields {
    pub(crate) fn new<S: Into<String>>(code: S, version: S) -> Self {
        ModuleFields {
            code: code.into(),
            version: version.into(),
            status: None,
            translations: BTreeMap::new(),
        }
    }

    pub(crate) fn with_status(mut self, status: bool) -> Self {
        self.status = Some(status);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_translation<S: Into<String>>(
        mut self,
        language_code: S,
        information: ModuleInformation,
    ) -> Self {
        self.translations.insert(language_code.into(), information);
        self
    }
}

impl From<&Manifest> for ModuleFields {
    fn from(manifest: &Manifest) -> Self {
        ModuleFields {
            code: manifest.code(),
            version: manifest.version().to_string(),
            status: None,
            translations: manifest.translation_entries(),
        }
    }
}

/// A module as shown to the front end.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub(crate) struct ModuleRecord {
    pub(crate) id: i64,
    pub(crate) code: String,
    pub(crate) version: String,
    pub(crate) status: bool,
    pub(crate) information: ModuleInformation,
}

/// Published modules in one language.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub(crate) struct PublishedModules {
    pub(crate) language_code: String,
    pub(crate) modules: Vec<ModuleRecord>,
}

// -------------------------------------------------------------------------------------------------
// Images
// -------------------------------------------------------------------------------------------------

/// Lists the entries of a directory.
pub(crate) trait DirectoryLister {
    /// Returns the paths in `dir`, or `None` if `dir` does not exist.
    fn list(&self, dir: &Path) -> io::Result<Option<Vec<PathBuf>>>;
}

/// [`DirectoryLister`] reading the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FsLister;

impl DirectoryLister for FsLister {
    fn list(&self, dir: &Path) -> io::Result<Option<Vec<PathBuf>>> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                paths.push(entry.path());
            }
        }
        Ok(Some(paths))
    }
}

/// Finds module images below a resources directory.
#[derive(Debug, Clone)]
pub(crate) struct ImageCatalog<L> {
    root: PathBuf,
    lister: L,
}

impl<L: DirectoryLister> ImageCatalog<L> {
    pub(crate) fn new(root: PathBuf, lister: L) -> Self {
        ImageCatalog { root, lister }
    }

    /// Returns the images of `code` in display order.
    ///
    /// Codes are slugs. Anything else has no images and never reaches the filesystem.
    pub(crate) fn images(&self, code: &str) -> Result<Vec<PathBuf>, RegistryError> {
        if code.is_empty() || slugify(code) != code {
            debug!(code, "Not a module code, no images");
            return Ok(vec![]);
        }
        let dir = self.root.join(code);
        match self.lister.list(&dir) {
            Ok(Some(entries)) => Ok(order_images(entries)),
            Ok(None) => Ok(vec![]),
            Err(source) => Err(RegistryError::Images { path: dir, source }),
        }
    }
}

/// Keeps `<n>.png` paths with a positive integer `<n>` and sorts them by `<n>`.
pub(crate) fn order_images(entries: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut numbered: Vec<(u64, PathBuf)> = entries
        .into_iter()
        .filter_map(|path| image_number(&path).map(|n| (n, path)))
        .collect();
    numbered.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    numbered.into_iter().map(|(_, path)| path).collect()
}

fn image_number(path: &Path) -> Option<u64> {
    let is_png = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
    if !is_png {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse::<u64>().ok().filter(|n| *n > 0)
}

// -------------------------------------------------------------------------------------------------
// Registry
// -------------------------------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct ModuleRegistry<S, L> {
    store: S,
    images: ImageCatalog<L>,
}

impl<S: Store, L: DirectoryLister> ModuleRegistry<S, L> {
    pub(crate) fn new(store: S, images: ImageCatalog<L>) -> Self {
        ModuleRegistry { store, images }
    }

    /// Inserts or updates a module and its translations.
    ///
    /// Saving the same fields twice leaves the catalog unchanged.
    ///
    /// # Errors
    /// Returns [`RegistryError::Persistence`] if the store fails.
    #[instrument(skip(self, module), fields(code = %module.code, version = %module.version))]
    pub(crate) async fn save(&self, module: &ModuleFields) -> Result<bool, RegistryError> {
        let upsert = StoreModuleUpsert::new(
            module.code.clone(),
            module.version.clone(),
            module.status,
            module
                .translations
                .iter()
                .map(|(language_code, information)| StoreTranslation {
                    code: module.code.clone(),
                    language_code: language_code.clone(),
                    title: information.title.clone(),
                    description: information.description.clone(),
                })
                .collect(),
            chrono::Utc::now(),
        );
        self.store.save_module(&upsert).await?;
        Ok(true)
    }

    /// Looks up a module together with its information in `language_code`.
    ///
    /// # Errors
    /// * [`RegistryError::NotFound`] - no module with this code exists
    /// * [`RegistryError::Persistence`] - the store fails
    pub(crate) async fn find(
        &self,
        code: &str,
        language_code: &str,
    ) -> Result<ModuleRecord, RegistryError> {
        let module = self
            .store
            .get_module(code)
            .await?
            .ok_or_else(|| RegistryError::NotFound(code.to_string()))?;

        let information = self
            .store
            .get_translation(code, language_code)
            .await?
            .map(|t| ModuleInformation {
                title: t.title,
                description: t.description,
            })
            .unwrap_or_default();

        Ok(ModuleRecord {
            id: module.id,
            code: module.code,
            version: module.version,
            status: module.status,
            information,
        })
    }

    /// Lists all published modules with their information in `language_code`.
    pub(crate) async fn published(
        &self,
        language_code: &str,
    ) -> Result<PublishedModules, RegistryError> {
        let modules = self
            .store
            .get_published_modules(language_code)
            .await?
            .into_iter()
            .map(|m| ModuleRecord {
                id: m.id,
                code: m.code,
                version: m.version,
                status: m.status,
                information: ModuleInformation {
                    title: m.title.unwrap_or_default(),
                    description: m.description.unwrap_or_default(),
                },
            })
            .collect::<Vec<_>>();

        debug!(language_code, count = modules.len(), "Published modules listed");
        Ok(PublishedModules {
            language_code: language_code.to_string(),
            modules,
        })
    }

    /// Maps every language a module is translated to onto its information.
    ///
    /// # Errors
    /// * [`RegistryError::NotFound`] - no module with this code exists
    /// * [`RegistryError::Persistence`] - the store fails
    pub(crate) async fn available_languages(
        &self,
        code: &str,
    ) -> Result<BTreeMap<String, ModuleInformation>, RegistryError> {
        if self.store.get_module(code).await?.is_none() {
            return Err(RegistryError::NotFound(code.to_string()));
        }

        Ok(self
            .store
            .get_translations(code)
            .await?
            .into_iter()
            .map(|t| {
                (
                    t.language_code,
                    ModuleInformation {
                        title: t.title,
                        description: t.description,
                    },
                )
            })
            .collect())
    }

    /// Returns the image paths of a module in display order.
    ///
    /// A module without image directory has no images. The registry is not consulted.
    pub(crate) fn images(&self, code: &str) -> Result<Vec<PathBuf>, RegistryError> {
        self.images.images(code)
    }

    /// Publishes or unpublishes a module.
    ///
    /// # Errors
    /// * [`RegistryError::NotFound`] - no module with this code exists
    /// * [`RegistryError::Persistence`] - the store fails
    #[instrument(skip(self))]
    pub(crate) async fn set_status(&self, code: &str, status: bool) -> Result<bool, RegistryError> {
        if !self.store.set_module_status(code, status).await? {
            return Err(RegistryError::NotFound(code.to_string()));
        }
        Ok(true)
    }
}

// -------------------------------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SQLiteStore;
    use crate::tests::store_setup_helper;
    use color_eyre::Result;
    use tempfile::TempDir;

    async fn registry_setup(dir: &TempDir) -> Result<ModuleRegistry<SQLiteStore, FsLister>> {
        let store = store_setup_helper(dir.path().join("store")).await?;
        Ok(ModuleRegistry::new(
            store,
            ImageCatalog::new(dir.path().join("resources"), FsLister),
        ))
    }

    async fn count_rows(registry: &ModuleRegistry<SQLiteStore, FsLister>, code: &str) -> Result<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM modules WHERE code = ?1")
                .bind(code)
                .fetch_one(&registry.store.pool)
                .await?,
        )
    }

    fn information(title: &str) -> ModuleInformation {
        ModuleInformation {
            title: title.to_string(),
            description: format!("{title} description"),
        }
    }

    #[tokio::test]
    async fn test_save_is_idempotent() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let registry = registry_setup(&temp_dir).await?;

        let fields = ModuleFields::new("test-module", "1.0.0")
            .with_translation("en", information("Test"));
        assert!(registry.save(&fields).await?);
        let first = registry.find("test-module", "en").await?;

        assert!(registry.save(&fields).await?);
        let second = registry.find("test-module", "en").await?;

        assert_eq!(first, second);
        assert_eq!(count_rows(&registry, "test-module").await?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_save_updates_version() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let registry = registry_setup(&temp_dir).await?;

        for version in ["1.0.0", "2.0.0", "3.0.0"] {
            registry
                .save(&ModuleFields::new("test-module", version))
                .await?;
        }

        let module = registry.find("test-module", "en").await?;
        assert_eq!(module.version, "3.0.0");
        assert_eq!(count_rows(&registry, "test-module").await?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_find() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let registry = registry_setup(&temp_dir).await?;

        registry
            .save(
                &ModuleFields::new("test-module", "1.0.0")
                    .with_status(true)
                    .with_translation("en", information("Test")),
            )
            .await?;

        let module = registry.find("test-module", "en").await?;
        assert_eq!(module.code, "test-module");
        assert!(module.status);
        assert_eq!(module.information.title, "Test");

        // A missing language is not an error
        let module = registry.find("test-module", "ru").await?;
        assert!(module.information.is_empty());
        let json = serde_json::to_value(&module)?;
        assert!(json.get("id").is_some());
        assert_eq!(json["information"], serde_json::json!({}));

        // A missing module is
        assert!(matches!(
            registry.find("unknown", "en").await,
            Err(RegistryError::NotFound(code)) if code == "unknown"
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_published_excludes_unpublished() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let registry = registry_setup(&temp_dir).await?;

        registry
            .save(
                &ModuleFields::new("visible", "1.0.0")
                    .with_status(true)
                    .with_translation("en", information("Visible")),
            )
            .await?;
        registry
            .save(&ModuleFields::new("hello", "1.0.0").with_translation("en", information("Hello")))
            .await?;
        registry
            .save(&ModuleFields::new("hidden", "1.0.0").with_status(false))
            .await?;

        for lang in ["en", "ru", "ua"] {
            let published = registry.published(lang).await?;
            assert_eq!(published.language_code, lang);
            assert!(published.modules.iter().all(|m| m.status));
            assert_eq!(
                published
                    .modules
                    .iter()
                    .map(|m| m.code.as_str())
                    .collect::<Vec<_>>(),
                vec!["visible"]
            );
        }

        let json = serde_json::to_value(registry.published("en").await?)?;
        assert!(json.get("language_code").is_some());
        assert!(json.get("modules").is_some());

        Ok(())
    }

    #[tokio::test]
    async fn test_available_languages() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let registry = registry_setup(&temp_dir).await?;

        registry
            .save(
                &ModuleFields::new("test-module", "1.0.0")
                    .with_translation("en", information("Test"))
                    .with_translation("ru", information("Тест"))
                    .with_translation("ua", information("Тест")),
            )
            .await?;

        let languages = registry.available_languages("test-module").await?;
        assert_eq!(
            languages.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["en", "ru", "ua"]
        );

        assert!(matches!(
            registry.available_languages("unknown").await,
            Err(RegistryError::NotFound(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_set_status() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let registry = registry_setup(&temp_dir).await?;

        registry.save(&ModuleFields::new("test-module", "1.0.0")).await?;
        assert!(registry.published("en").await?.modules.is_empty());

        registry.set_status("test-module", true).await?;
        assert_eq!(registry.published("en").await?.modules.len(), 1);

        // Saving a new version keeps the publish flag
        registry.save(&ModuleFields::new("test-module", "1.1.0")).await?;
        assert!(registry.find("test-module", "en").await?.status);

        assert!(matches!(
            registry.set_status("unknown", true).await,
            Err(RegistryError::NotFound(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_images_are_ordered_numerically() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let registry = registry_setup(&temp_dir).await?;

        let dir = temp_dir.path().join("resources").join("dummy-module");
        std::fs::create_dir_all(&dir)?;
        for name in ["2.png", "1.png", "3.png"] {
            std::fs::write(dir.join(name), b"png")?;
        }

        assert_eq!(
            registry.images("dummy-module")?,
            vec![dir.join("1.png"), dir.join("2.png"), dir.join("3.png")]
        );
        // Listing again yields the same sequence
        assert_eq!(registry.images("dummy-module")?.len(), 3);
        assert!(registry.images("no-images")?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_images_stay_below_resources_root() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let registry = registry_setup(&temp_dir).await?;

        let secret = temp_dir.path().join("secret");
        std::fs::create_dir_all(&secret)?;
        std::fs::write(secret.join("1.png"), b"png")?;
        std::fs::create_dir_all(temp_dir.path().join("resources"))?;

        for code in ["../secret", "..", "", "/tmp", "Dummy Module", "a/../../secret"] {
            assert!(
                registry.images(code)?.is_empty(),
                "'{code}' should not list any directory"
            );
        }

        Ok(())
    }

    #[test]
    fn test_order_images() {
        let entries = ["10.png", "2.png", "1.PNG", "cover.png", "0.png", "3.jpg", "02.png"]
            .into_iter()
            .map(PathBuf::from)
            .collect();

        assert_eq!(
            order_images(entries),
            ["1.PNG", "02.png", "2.png", "10.png"]
                .into_iter()
                .map(PathBuf::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_image_catalog_with_listing() -> Result<()> {
        struct FakeLister;

        impl DirectoryLister for FakeLister {
            fn list(&self, dir: &Path) -> io::Result<Option<Vec<PathBuf>>> {
                if dir.ends_with("present") {
                    Ok(Some(vec![dir.join("3.png"), dir.join("1.png")]))
                } else if dir.ends_with("broken") {
                    Err(io::Error::from(io::ErrorKind::PermissionDenied))
                } else {
                    Ok(None)
                }
            }
        }

        let catalog = ImageCatalog::new(PathBuf::from("/resources"), FakeLister);
        assert_eq!(
            catalog.images("present")?,
            vec![
                PathBuf::from("/resources/present/1.png"),
                PathBuf::from("/resources/present/3.png")
            ]
        );
        assert!(catalog.images("absent")?.is_empty());
        assert!(matches!(
            catalog.images("broken"),
            Err(RegistryError::Images { .. })
        ));

        Ok(())
    }
}
