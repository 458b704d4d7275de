//! This module handles the configuration for the Blocks application.
//!
//! It provides functionality to read, parse, and initialize the configuration from a TOML file or
//! use default values when necessary.

use color_eyre::Result;
use color_eyre::{eyre::OptionExt, eyre::WrapErr};
use serde::Deserialize;
use std::path::{Path, PathBuf};

// -------------------------------------------------------------------------------------------------
// Blocks Config
// -------------------------------------------------------------------------------------------------

/// Representation of the Blocks configuration.
///
/// This struct holds the resolved configuration. The configuration file is expected to be found
/// under `$XDG_CONFIG_HOME/blocks/config.toml`.
///
/// # Defaults
///
/// ## Basic Options
/// - `overwrite`: false - Replace installed modules with the same code
/// - `manifest_file`: `"module.json"` - File name of the module manifest
/// - `default_language`: `"en"` - Language of manifests without `language` and of queries without
///   `--lang`
/// - `logs_max`: 15 - Maximum number of logs to retain
///
/// ## Paths
/// - `modules_root`: `"$XDG_DATA_HOME/blocks/modules"` - Installed modules
/// - `resources_root`: `"$XDG_DATA_HOME/blocks/resources"` - Module images
/// - `staging_root`: `"<modules_root>/.staging"` - Unpacked archives awaiting promotion
/// - `store_path`: `"$XDG_DATA_HOME/blocks"` - Location of the catalog database
/// - `logs_dir`: `"$XDG_DATA_HOME/blocks/logs"` - Directory for log files
///
/// # Example Configuration
///
/// ```toml
/// modules_root = "/srv/blocks/modules"
/// resources_root = "/srv/blocks/public/images"
/// default_language = "ru"
/// ```
#[derive(Debug, Clone)]
pub(crate) struct BlocksConfig {
    /// Replace installed modules with the same code.
    pub(crate) overwrite: bool,
    /// Location of the config file.
    pub(crate) config_file: PathBuf,
    /// Root folder of installed modules.
    pub(crate) modules_root: PathBuf,
    /// Root folder of module images, `<resources_root>/<code>/<n>.png`.
    pub(crate) resources_root: PathBuf,
    /// Staging area for unpacked archives. Must be on the same filesystem as `modules_root`.
    pub(crate) staging_root: PathBuf,
    /// Directory of the catalog database
    pub(crate) store_path: PathBuf,
    /// File name of the manifest inside a module
    pub(crate) manifest_file: String,
    /// Language used when none is given
    pub(crate) default_language: String,
    /// Directory of the log files
    pub(crate) logs_dir: PathBuf,
    /// Maximum number of log files to retain
    pub(crate) logs_max: usize,
}

// -------------------------------------------------------------------------------------------------
// Config Builder
// -------------------------------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct BlocksConfigBuilder {
    pub(crate) overwrite: Option<bool>,
    pub(crate) config_file: Option<PathBuf>,
    pub(crate) modules_root: Option<PathBuf>,
    pub(crate) resources_root: Option<PathBuf>,
    pub(crate) staging_root: Option<PathBuf>,
    pub(crate) store_path: Option<PathBuf>,
    pub(crate) manifest_file: Option<String>,
    pub(crate) default_language: Option<String>,
    pub(crate) logs_dir: Option<PathBuf>,
    pub(crate) logs_max: Option<usize>,
}

impl BlocksConfigBuilder {
    // --
    // * Builders

    pub(crate) fn with_overwrite(&mut self, overwrite: Option<bool>) -> &mut Self {
        self.overwrite = overwrite;
        self
    }

    pub(crate) fn with_config_file(&mut self, config_file: Option<PathBuf>) -> &mut Self {
        self.config_file = config_file;
        self
    }

    pub(crate) fn with_modules_root(&mut self, modules_root: Option<PathBuf>) -> &mut Self {
        self.modules_root = modules_root;
        self
    }

    pub(crate) fn with_resources_root(&mut self, resources_root: Option<PathBuf>) -> &mut Self {
        self.resources_root = resources_root;
        self
    }

    pub(crate) fn with_staging_root(&mut self, staging_root: Option<PathBuf>) -> &mut Self {
        self.staging_root = staging_root;
        self
    }

    pub(crate) fn with_store_path(&mut self, store_path: Option<PathBuf>) -> &mut Self {
        self.store_path = store_path;
        self
    }

    pub(crate) fn with_manifest_file(&mut self, manifest_file: Option<String>) -> &mut Self {
        self.manifest_file = manifest_file;
        self
    }

    pub(crate) fn with_default_language(&mut self, default_language: Option<String>) -> &mut Self {
        self.default_language = default_language;
        self
    }

    pub(crate) fn with_logs_dir(&mut self, logs_dir: Option<PathBuf>) -> &mut Self {
        self.logs_dir = logs_dir;
        self
    }

    pub(crate) fn with_logs_max(&mut self, logs_max: Option<usize>) -> &mut Self {
        self.logs_max = logs_max;
        self
    }

    /// Reads and returns the contents of a configuration file.
    fn read_config_file(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config from {}", path.display()))
    }

    /// Helper function to expand a path from configuration
    fn expand_config_path<F>(
        value: &Option<PathBuf>,
        parsed_value: &Option<PathBuf>,
        default_fn: F,
    ) -> Result<PathBuf>
    where
        F: FnOnce() -> Result<PathBuf>,
    {
        match value.as_ref().or(parsed_value.as_ref()) {
            Some(path) => crate::utils::file_fs::expand_path::<&PathBuf, &str>(path, None),
            None => default_fn(),
        }
    }

    /// Constructs the final configuration by merging defaults, file values, and runtime overrides
    ///
    /// Resolution order (highest priority last):
    /// 1. Default values
    /// 2. Config file values
    /// 3. Explicit builder overrides
    ///
    /// A missing config file is not an error, an unreadable or invalid one is.
    pub(crate) fn build(&self, verbosity: u8) -> Result<BlocksConfig> {
        let config_file_path = match self.config_file {
            Some(ref path) => crate::utils::file_fs::expand_path::<&PathBuf, &str>(path, None)?,
            None => dirs::config_dir()
                .ok_or_eyre("Could not determine user's config directory")?
                .join("blocks")
                .join("config.toml"),
        };

        let conf_string = if config_file_path.is_file() {
            self.read_config_file(&config_file_path)?
        } else {
            if verbosity > 0 {
                eprintln!("No config file found in {}", &config_file_path.display());
                eprintln!("Default config values will be used")
            }
            String::new()
        };
        let parsed_data: BlocksConfigBuilder = toml::from_str(&conf_string)
            .wrap_err_with(|| format!("Failed to parse {}", config_file_path.display()))?;

        let data_dir = || -> Result<PathBuf> {
            Ok(dirs::data_dir()
                .ok_or_eyre("Could not determine user's data directory")?
                .join("blocks"))
        };

        let modules_root =
            Self::expand_config_path(&self.modules_root, &parsed_data.modules_root, || {
                Ok(data_dir()?.join("modules"))
            })?;

        let resources_root =
            Self::expand_config_path(&self.resources_root, &parsed_data.resources_root, || {
                Ok(data_dir()?.join("resources"))
            })?;

        let staging_root =
            Self::expand_config_path(&self.staging_root, &parsed_data.staging_root, || {
                Ok(modules_root.join(".staging"))
            })?;

        let store_path =
            Self::expand_config_path(&self.store_path, &parsed_data.store_path, data_dir)?;

        let logs_dir = Self::expand_config_path(
            &self.logs_dir,
            &parsed_data.logs_dir,
            crate::logs::get_default_log_dir,
        )?;

        Ok(BlocksConfig {
            overwrite: self
                .overwrite
                .unwrap_or(parsed_data.overwrite.unwrap_or(false)),
            config_file: config_file_path,
            modules_root,
            resources_root,
            staging_root,
            store_path,
            manifest_file: match self.manifest_file {
                Some(ref value) => value.clone(),
                None => parsed_data
                    .manifest_file
                    .unwrap_or_else(|| "module.json".to_string()),
            },
            default_language: match self.default_language {
                Some(ref value) => value.to_lowercase(),
                None => parsed_data
                    .default_language
                    .map(|l| l.to_lowercase())
                    .unwrap_or_else(|| "en".to_string()),
            },
            logs_dir,
            logs_max: self.logs_max.unwrap_or(parsed_data.logs_max.unwrap_or(15)),
        })
    }
}

// -------------------------------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------------------------------
