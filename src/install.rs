//! Installation of uploaded module archives.
//!
//! [`InstallationOrchestrator`] runs the complete "install from archive" pipeline:
//!
//! 1. unpack the archive into a staging directory
//! 2. read and validate the manifest of the staged module
//! 3. derive the install name from the manifest
//! 4. promote the staged module into the modules directory
//!
//! Registering the module in the catalog is left to the caller.

use crate::archive::ArchiveExtractor;
use crate::errors::InstallError;
use crate::manifest::{Manifest, ManifestReader};
use crate::utils::file_checksum::calculate_sha256_checksum;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Outcome of a successful installation.
#[derive(Debug, Clone)]
pub(crate) struct Installation {
    pub(crate) manifest: Manifest,
    /// Directory the module was installed to
    pub(crate) location: PathBuf,
    /// SHA256 checksum of the installed archive
    pub(crate) checksum: String,
}

#[derive(Debug, Clone)]
pub(crate) struct InstallationOrchestrator {
    extractor: ArchiveExtractor,
    reader: ManifestReader,
}

impl InstallationOrchestrator {
    pub(crate) fn new(extractor: ArchiveExtractor, reader: ManifestReader) -> Self {
        InstallationOrchestrator { extractor, reader }
    }

    /// Installs `archive` and reports whether every step succeeded.
    ///
    /// # Errors
    /// Returns the error of the failing step unchanged, see [`InstallationOrchestrator::install`].
    pub(crate) fn store<P: AsRef<Path>>(&self, archive: P) -> Result<bool, InstallError> {
        self.install(archive).map(|_| true)
    }

    /// Installs `archive` into `<modules_root>/<code>`, with `code` derived from the manifest
    /// name.
    ///
    /// # Errors
    /// * [`InstallError::Archive`] - unpacking or promotion failed
    /// * [`InstallError::Manifest`] - the staged module has no valid manifest
    /// * [`InstallError::Checksum`] - the archive could not be hashed
    ///
    /// The staging directory is removed on every failure, nothing is installed.
    #[instrument(skip(self, archive), fields(archive = %archive.as_ref().display()))]
    pub(crate) fn install<P: AsRef<Path>>(&self, archive: P) -> Result<Installation, InstallError> {
        let archive = archive.as_ref();
        let staging = self.extractor.unpack(archive)?;

        let promoted = calculate_sha256_checksum(archive)
            .map_err(|source| InstallError::Checksum {
                path: archive.to_path_buf(),
                source,
            })
            .and_then(|checksum| {
                let manifest = self.reader.describe(&staging)?;
                let code = manifest.code();
                debug!(code = %code, "Promoting {}", staging.display());
                let location = self.extractor.promote(&staging, &code)?;
                Ok((manifest, location, checksum))
            });

        match promoted {
            Ok((manifest, location, checksum)) => {
                info!(
                    code = %manifest.code(),
                    version = manifest.version(),
                    checksum = %checksum,
                    "Module installed"
                );
                Ok(Installation {
                    manifest,
                    location,
                    checksum,
                })
            }
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_dir_all(&staging) {
                    warn!(
                        "Failed to remove staging directory {}: {}",
                        staging.display(),
                        cleanup
                    );
                }
                Err(e)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn modules_root(&self) -> &Path {
        self.extractor.modules_root()
    }
}

// -------------------------------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------------------------------
