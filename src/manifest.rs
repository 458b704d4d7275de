//! This module reads and validates the declarative metadata file shipped with every module.
//!
//! A module manifest is a JSON document placed at the root of the module archive:
//!
//! ```json
//! {
//!   "name": "demo-module",
//!   "version": "1.0.0",
//!   "title": "Demo",
//!   "description": "A demo module",
//!   "language": "en",
//!   "translations": { "ru": { "title": "...", "description": "..." } }
//! }
//! ```
//!
//! `language` and `translations` are optional, every other field is required. Fields not listed
//! here are ignored.

use crate::errors::ManifestError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Title and description of a module in one language.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct LocalizedText {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub(crate) title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub(crate) description: String,
}

impl LocalizedText {
    pub(crate) fn is_empty(&self) -> bool {
        self.title.is_empty() && self.description.is_empty()
    }
}

/// Raw shape of the manifest file. Required fields are optional here so that a missing field can
/// be reported as [`ManifestError::Invalid`] instead of a serde message.
#[derive(Deserialize, Debug)]
struct RawManifest {
    name: Option<serde_json::Value>,
    version: Option<serde_json::Value>,
    title: Option<serde_json::Value>,
    description: Option<serde_json::Value>,
    language: Option<String>,
    #[serde(default)]
    translations: BTreeMap<String, LocalizedText>,
}

/// Validated metadata of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Manifest {
    name: String,
    version: String,
    title: String,
    description: String,
    language: String,
    translations: BTreeMap<String, LocalizedText>,
    /// Location the manifest was read from, used in error messages.
    source: PathBuf,
}

impl Manifest {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Filesystem-safe slug of the module name. Used as registry code and install directory.
    pub(crate) fn code(&self) -> String {
        slugify(&self.name)
    }

    pub(crate) fn version(&self) -> &str {
        &self.version
    }

    pub(crate) fn title(&self) -> &str {
        &self.title
    }

    pub(crate) fn description(&self) -> &str {
        &self.description
    }

    /// Language of [`Manifest::title`] and [`Manifest::description`].
    pub(crate) fn language(&self) -> &str {
        &self.language
    }

    pub(crate) fn translations(&self) -> &BTreeMap<String, LocalizedText> {
        &self.translations
    }

    /// All translations of the module, including the primary title and description.
    ///
    /// The primary language wins over an entry of the same language in `translations`.
    pub(crate) fn translation_entries(&self) -> BTreeMap<String, LocalizedText> {
        let mut entries = self.translations.clone();
        entries.insert(
            self.language.clone(),
            LocalizedText {
                title: self.title.clone(),
                description: self.description.clone(),
            },
        );
        entries
    }

    /// Returns a manifest with `field` replaced by `value`.
    ///
    /// # Errors
    /// * [`ManifestError::UnknownField`] - `field` is not one of `name`, `version`, `title`,
    ///   `description` or `language`
    /// * [`ManifestError::Invalid`] - `value` is blank or, for `name`, does not yield a code
    pub(crate) fn with_override<S: AsRef<str>>(
        mut self,
        field: &str,
        value: S,
    ) -> Result<Self, ManifestError> {
        let value = value.as_ref().trim();
        let slot = match field {
            "name" => &mut self.name,
            "version" => &mut self.version,
            "title" => &mut self.title,
            "description" => &mut self.description,
            "language" => &mut self.language,
            _ => return Err(ManifestError::UnknownField(field.to_string())),
        };
        if value.is_empty() {
            return Err(ManifestError::Invalid {
                path: self.source.clone(),
                reason: format!("override of '{field}' is empty"),
            });
        }
        *slot = match field {
            "language" => value.to_lowercase(),
            _ => value.to_string(),
        };

        if field == "name" && self.code().is_empty() {
            return Err(ManifestError::Invalid {
                path: self.source.clone(),
                reason: format!("name '{value}' does not contain any usable character"),
            });
        }
        Ok(self)
    }
}

// -------------------------------------------------------------------------------------------------
// Reader
// -------------------------------------------------------------------------------------------------

/// Reads manifests from module directories.
#[derive(Debug, Clone)]
pub(crate) struct ManifestReader {
    /// File name of the manifest inside a module directory.
    file_name: String,
    /// Language assumed for manifests that do not declare one.
    default_language: String,
}

impl ManifestReader {
    pub(crate) fn new<S: Into<String>>(file_name: S, default_language: S) -> Self {
        ManifestReader {
            file_name: file_name.into(),
            default_language: default_language.into(),
        }
    }

    /// Reads and validates the manifest found in `module_dir`.
    ///
    /// # Errors
    /// * [`ManifestError::NotFound`] - the manifest file does not exist
    /// * [`ManifestError::Invalid`] - the file cannot be parsed or a required field is missing
    #[instrument(skip(self, module_dir), fields(dir = %module_dir.as_ref().display()))]
    pub(crate) fn describe<P: AsRef<Path>>(&self, module_dir: P) -> Result<Manifest, ManifestError> {
        let path = module_dir.as_ref().join(&self.file_name);

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ManifestError::NotFound(path));
            }
            Err(e) => {
                return Err(ManifestError::Invalid {
                    path,
                    reason: e.to_string(),
                });
            }
        };

        let raw: RawManifest = serde_json::from_str(&content).map_err(|e| ManifestError::Invalid {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let required = |field: &str, value: Option<serde_json::Value>| -> Result<String, ManifestError> {
            match value {
                Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
                Some(serde_json::Value::String(_)) => Err(ManifestError::Invalid {
                    path: path.clone(),
                    reason: format!("field '{field}' is empty"),
                }),
                Some(other) => Err(ManifestError::Invalid {
                    path: path.clone(),
                    reason: format!("field '{field}' must be a string, found {other}"),
                }),
                None => Err(ManifestError::Invalid {
                    path: path.clone(),
                    reason: format!("missing required field '{field}'"),
                }),
            }
        };

        let manifest = Manifest {
            name: required("name", raw.name)?,
            version: required("version", raw.version)?,
            title: required("title", raw.title)?,
            description: required("description", raw.description)?,
            language: raw
                .language
                .map(|l| l.trim().to_lowercase())
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| self.default_language.clone()),
            translations: raw
                .translations
                .into_iter()
                .map(|(lang, text)| (lang.trim().to_lowercase(), text))
                .filter(|(lang, text)| !lang.is_empty() && !text.is_empty())
                .collect(),
            source: path.clone(),
        };

        if manifest.code().is_empty() {
            return Err(ManifestError::Invalid {
                path,
                reason: format!(
                    "name '{}' does not contain any usable character",
                    manifest.name
                ),
            });
        }

        debug!(name = manifest.name(), version = manifest.version(), "Manifest read");
        Ok(manifest)
    }
}

/// Normalizes a module name into a lowercase, hyphenated slug.
///
/// ASCII letters and digits are kept (lowercased), every run of other characters becomes a single
/// `-`, and leading or trailing hyphens are dropped.
pub(crate) fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

// -------------------------------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::Result;
    use tempfile::TempDir;

    fn reader() -> ManifestReader {
        ManifestReader::new("module.json", "en")
    }

    fn write_manifest(dir: &TempDir, content: &str) -> Result<()> {
        std::fs::write(dir.path().join("module.json"), content)?;
        Ok(())
    }

    #[test]
    fn test_describe_valid_manifest() -> Result<()> {
        let temp_dir = TempDir::new()?;
        write_manifest(
            &temp_dir,
            r#"{
                "name": "Demo Module",
                "version": "1.0.0",
                "title": "t",
                "description": "d",
                "homepage": "https://example.org",
                "translations": { "RU": { "title": "т", "description": "о" } }
            }"#,
        )?;

        let manifest = reader().describe(temp_dir.path())?;
        assert_eq!(manifest.name(), "Demo Module");
        assert_eq!(manifest.code(), "demo-module");
        assert_eq!(manifest.version(), "1.0.0");
        assert_eq!(manifest.title(), "t");
        assert_eq!(manifest.description(), "d");
        assert_eq!(manifest.language(), "en", "language should fall back to the default");

        let entries = manifest.translation_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["en"].title, "t");
        assert_eq!(entries["ru"].description, "о");

        Ok(())
    }

    #[test]
    fn test_describe_without_manifest() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let res = reader().describe(temp_dir.path());
        assert!(matches!(res, Err(ManifestError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn test_describe_invalid_manifests() -> Result<()> {
        let cases = [
            ("not json", "{ name: "),
            ("missing version", r#"{"name": "a", "title": "t", "description": "d"}"#),
            (
                "blank title",
                r#"{"name": "a", "version": "1", "title": "  ", "description": "d"}"#,
            ),
            (
                "numeric version",
                r#"{"name": "a", "version": 1, "title": "t", "description": "d"}"#,
            ),
            (
                "unusable name",
                r#"{"name": "???", "version": "1", "title": "t", "description": "d"}"#,
            ),
        ];

        for (case, content) in cases {
            let temp_dir = TempDir::new()?;
            write_manifest(&temp_dir, content)?;
            let res = reader().describe(temp_dir.path());
            assert!(
                matches!(res, Err(ManifestError::Invalid { .. })),
                "{case} should be rejected, got {res:?}"
            );
        }
        Ok(())
    }

    #[test]
    fn test_override() -> Result<()> {
        let temp_dir = TempDir::new()?;
        write_manifest(
            &temp_dir,
            r#"{"name": "test-module", "version": "0.1.0", "title": "t", "description": "d"}"#,
        )?;
        let manifest = reader().describe(temp_dir.path())?;

        let overridden = manifest.clone().with_override("version", "1.0.0")?;
        assert_eq!(overridden.version(), "1.0.0");
        assert_eq!(manifest.version(), "0.1.0", "original value must stay untouched");

        let renamed = overridden.with_override("name", "Hello")?;
        assert_eq!(renamed.code(), "hello");

        // Languages are normalized the same way as in the manifest file
        let translated = renamed.with_override("language", " RU ")?;
        assert_eq!(translated.language(), "ru");
        assert!(translated.translation_entries().contains_key("ru"));
        assert!(!translated.translation_entries().contains_key("RU"));

        assert!(matches!(
            manifest.clone().with_override("author", "me"),
            Err(ManifestError::UnknownField(f)) if f == "author"
        ));
        assert!(matches!(
            manifest.with_override("title", " "),
            Err(ManifestError::Invalid { .. })
        ));

        Ok(())
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("demo-module"), "demo-module");
        assert_eq!(slugify("Demo Module"), "demo-module");
        assert_eq!(slugify("  My__Great  Module!! v2 "), "my-great-module-v2");
        assert_eq!(slugify("../../etc"), "etc");
        assert_eq!(slugify("Ünïcode"), "n-code");
        assert_eq!(slugify("--"), "");
    }
}
