//! Error types of the package ingestion and registry components.
//!
//! Every component reports its own typed error so callers can tell the failure kinds apart. The
//! command layer converts them into `color_eyre` reports at the application boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading or editing a module manifest.
#[derive(Error, Debug)]
pub(crate) enum ManifestError {
    /// The manifest file does not exist in the module directory.
    #[error("No manifest found at {0}")]
    NotFound(PathBuf),

    /// The manifest exists but is unreadable, not valid JSON, or misses a required field.
    #[error("Invalid manifest {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },

    /// An override targeted a field the manifest does not have.
    #[error("Unknown manifest field '{0}'")]
    UnknownField(String),
}

/// Errors raised while unpacking or promoting a module archive.
#[derive(Error, Debug)]
pub(crate) enum ArchiveError {
    #[error("Corrupt archive {path}: {reason}")]
    CorruptArchive { path: PathBuf, reason: String },

    #[error("Failed to extract {path}")]
    ExtractionFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The promotion target is already installed and overwriting was not requested.
    #[error("Module directory {0} exists already")]
    TargetExists(PathBuf),

    #[error("Failed to promote {from} to {to}: {reason}")]
    PromotionFailed {
        from: PathBuf,
        to: PathBuf,
        reason: String,
    },
}

/// Errors raised by the module registry.
#[derive(Error, Debug)]
pub(crate) enum RegistryError {
    #[error("Registry storage failed")]
    Persistence(#[from] sqlx::Error),

    #[error("Module '{0}' not found")]
    NotFound(String),

    /// Image directory exists but could not be listed.
    #[error("Failed to list images in {path}")]
    Images {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors of a complete install from archive. The originating kind is kept as is.
#[derive(Error, Debug)]
pub(crate) enum InstallError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Failed to checksum {path}")]
    Checksum {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
