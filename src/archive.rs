//! Unpacking of uploaded module archives and promotion of their content into the modules
//! directory.
//!
//! Archives are extracted into a private staging directory first. Only once the content has been
//! validated is the staging directory renamed to its final location. A single rename keeps the
//! promotion atomic: readers of the modules directory see either the previous tree or the new one.

use crate::errors::ArchiveError;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Maximum number of entries accepted in an archive.
const MAX_ENTRY_COUNT: usize = 10_000;

/// Maximum total uncompressed size (500 MB).
const MAX_EXTRACTED_SIZE: u64 = 500_000_000;

/// File type bits of a unix mode.
const S_IFMT: u32 = 0o170000;
/// Symlink file type of a unix mode.
const S_IFLNK: u32 = 0o120000;

#[derive(Debug, Clone)]
pub(crate) struct ArchiveExtractor {
    /// Directory holding staging directories and promotion locks.
    staging_root: PathBuf,
    /// Canonical directory of installed modules.
    modules_root: PathBuf,
    /// Replace an installed module of the same name on promotion.
    overwrite: bool,
    /// Upper bound of the summed uncompressed entry sizes.
    max_extracted_size: u64,
}

impl ArchiveExtractor {
    pub(crate) fn new(staging_root: PathBuf, modules_root: PathBuf, overwrite: bool) -> Self {
        ArchiveExtractor {
            staging_root,
            modules_root,
            overwrite,
            max_extracted_size: MAX_EXTRACTED_SIZE,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_max_extracted_size(mut self, max_extracted_size: u64) -> Self {
        self.max_extracted_size = max_extracted_size;
        self
    }

    #[cfg(test)]
    pub(crate) fn modules_root(&self) -> &Path {
        &self.modules_root
    }

    /// Extracts `archive` into a fresh staging directory and returns its path.
    ///
    /// The staging directory is named after the archive's file stem plus a unique suffix, so that
    /// two uploads with the same file name never share a staging directory.
    ///
    /// # Errors
    /// * [`ArchiveError::CorruptArchive`] - the archive cannot be read, is not a zip file, contains
    ///   unsafe entries or exceeds the size limits
    /// * [`ArchiveError::ExtractionFailed`] - writing the extracted content failed
    ///
    /// On error the staging directory is removed again.
    #[instrument(skip(self, archive), fields(archive = %archive.as_ref().display()))]
    pub(crate) fn unpack<P: AsRef<Path>>(&self, archive: P) -> Result<PathBuf, ArchiveError> {
        let archive = archive.as_ref();
        let corrupt = |reason: String| ArchiveError::CorruptArchive {
            path: archive.to_path_buf(),
            reason,
        };

        let file = File::open(archive).map_err(|e| corrupt(e.to_string()))?;
        let mut zip = zip::ZipArchive::new(file).map_err(|e| corrupt(e.to_string()))?;

        if zip.len() > MAX_ENTRY_COUNT {
            return Err(corrupt(format!(
                "archive exceeds maximum entry count ({MAX_ENTRY_COUNT})"
            )));
        }

        let stem = archive
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| corrupt("archive has no file name".to_string()))?;

        let extraction_failed = |source: io::Error| ArchiveError::ExtractionFailed {
            path: archive.to_path_buf(),
            source,
        };

        fs::create_dir_all(&self.staging_root).map_err(extraction_failed)?;
        // Dropping the TempDir removes everything written so far, so any early return below leaves
        // no partial staging directory behind.
        let staging = tempfile::Builder::new()
            .prefix(&format!("{stem}."))
            .tempdir_in(&self.staging_root)
            .map_err(extraction_failed)?;

        let mut total_size: u64 = 0;
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i).map_err(|e| corrupt(e.to_string()))?;

            let relative = entry
                .enclosed_name()
                .ok_or_else(|| corrupt(format!("unsafe entry path '{}'", entry.name())))?;
            validate_entry_path(&relative)
                .map_err(|_| corrupt(format!("unsafe entry path '{}'", entry.name())))?;

            if entry
                .unix_mode()
                .is_some_and(|mode| mode & S_IFMT == S_IFLNK)
            {
                return Err(corrupt(format!("symlink entry '{}'", entry.name())));
            }

            total_size = total_size.saturating_add(entry.size());
            if total_size > self.max_extracted_size {
                return Err(corrupt(format!(
                    "archive exceeds maximum extracted size ({} bytes)",
                    self.max_extracted_size
                )));
            }

            let target = staging.path().join(&relative);
            if entry.is_dir() {
                fs::create_dir_all(&target).map_err(extraction_failed)?;
                continue;
            }

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(extraction_failed)?;
            }
            let mut out = File::create(&target).map_err(extraction_failed)?;
            // Read errors come from decompression and point at a damaged archive, write errors at
            // the filesystem.
            copy_entry(&mut entry, &mut out).map_err(|e| match e {
                CopyError::Read(e) => corrupt(format!("failed to read '{}': {e}", relative.display())),
                CopyError::Write(e) => extraction_failed(e),
            })?;
        }

        let staging = staging.keep();
        debug!(staging = %staging.display(), "Archive unpacked");
        Ok(staging)
    }

    /// Moves a staging directory to `<modules_root>/<final_name>`.
    ///
    /// Promotions of the same name are serialized through an exclusive lock file in
    /// `<staging_root>/.locks`.
    ///
    /// # Errors
    /// * [`ArchiveError::TargetExists`] - the target exists and overwriting is disabled
    /// * [`ArchiveError::PromotionFailed`] - `final_name` is not a plain directory name, or the
    ///   lock or rename failed
    ///
    /// A failed promotion leaves a previously installed module untouched.
    #[instrument(skip(self, staging), fields(staging = %staging.as_ref().display()))]
    pub(crate) fn promote<P: AsRef<Path>>(
        &self,
        staging: P,
        final_name: &str,
    ) -> Result<PathBuf, ArchiveError> {
        let staging = staging.as_ref();
        let target = self.modules_root.join(final_name);
        let failed = |reason: String| ArchiveError::PromotionFailed {
            from: staging.to_path_buf(),
            to: target.clone(),
            reason,
        };

        if !is_plain_name(final_name) {
            return Err(failed(format!("'{final_name}' is not a valid module name")));
        }
        if !staging.is_dir() {
            return Err(failed("staging directory does not exist".to_string()));
        }

        fs::create_dir_all(&self.modules_root).map_err(|e| failed(e.to_string()))?;
        let _lock = self
            .lock_target(final_name)
            .map_err(|e| failed(format!("failed to lock target: {e}")))?;

        match target.try_exists() {
            Ok(false) => {
                fs::rename(staging, &target).map_err(|e| failed(e.to_string()))?;
            }
            Ok(true) if !self.overwrite => return Err(ArchiveError::TargetExists(target.clone())),
            Ok(true) => self.replace(staging, &target).map_err(&failed)?,
            Err(e) => return Err(failed(e.to_string())),
        }

        info!(module = final_name, "Installed to {}", target.display());
        Ok(target)
    }

    /// Swaps an installed module for the staged one, restoring the old tree on failure.
    ///
    /// The old tree is moved into a fresh hidden directory of the staging root, so leftovers of
    /// earlier replacements never get in the way.
    fn replace(&self, staging: &Path, target: &Path) -> Result<(), String> {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let aside = tempfile::Builder::new()
            .prefix(&format!(".{name}.previous."))
            .tempdir_in(&self.staging_root)
            .map_err(|e| format!("failed to prepare previous version directory: {e}"))?;
        let previous = aside.path().join(&name);

        fs::rename(target, &previous).map_err(|e| format!("failed to move previous version: {e}"))?;

        if let Err(e) = fs::rename(staging, target) {
            if let Err(restore) = fs::rename(&previous, target) {
                // Keep the only remaining copy of the previous version
                let kept = aside.keep();
                warn!(
                    "Failed to restore {} from {}: {}",
                    target.display(),
                    kept.join(&name).display(),
                    restore
                );
            }
            return Err(e.to_string());
        }

        let aside_path = aside.path().to_path_buf();
        if let Err(e) = aside.close() {
            warn!("Failed to remove previous version {}: {}", aside_path.display(), e);
        }
        debug!("Replaced previous version of {}", target.display());
        Ok(())
    }

    /// Acquires the promotion lock of `name`. The lock is released when the file is dropped.
    fn lock_target(&self, name: &str) -> io::Result<File> {
        let lock_dir = self.staging_root.join(".locks");
        fs::create_dir_all(&lock_dir)?;
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_dir.join(format!("{name}.lock")))?;
        lock_file.lock_exclusive()?;
        Ok(lock_file)
    }
}

enum CopyError {
    Read(io::Error),
    Write(io::Error),
}

/// Copies a single archive entry, telling read failures apart from write failures.
fn copy_entry<R: io::Read, W: io::Write>(reader: &mut R, writer: &mut W) -> Result<(), CopyError> {
    let mut buf = [0u8; 8192];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Read(e)),
        };
        writer.write_all(&buf[..n]).map_err(CopyError::Write)?;
    }
    writer.flush().map_err(CopyError::Write)
}

/// Validate that an entry path has no traversal components or absolute paths.
fn validate_entry_path(path: &Path) -> Result<(), ()> {
    if path.is_absolute() || path.as_os_str().is_empty() {
        return Err(());
    }
    if path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::Prefix(_) | Component::RootDir
        )
    }) {
        return Err(());
    }
    Ok(())
}

/// Returns true if `name` is a single, normal path component.
fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.starts_with('.')
}

// -------------------------------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{create_module_zip, staging_entries};
    use color_eyre::Result;
    use tempfile::TempDir;

    fn extractor(root: &Path, overwrite: bool) -> ArchiveExtractor {
        ArchiveExtractor::new(
            root.join("modules").join(".staging"),
            root.join("modules"),
            overwrite,
        )
    }

    #[test]
    fn test_unpack_valid_archive() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let archive = temp_dir.path().join("uploaded-module.zip");
        create_module_zip(
            &archive,
            &[
                ("module.json", "{}"),
                ("assets/style.css", "body {}"),
                ("assets/img/", ""),
            ],
        )?;

        let ext = extractor(temp_dir.path(), false);
        let staging = ext.unpack(&archive)?;

        let dir_name = staging.file_name().unwrap().to_string_lossy().into_owned();
        assert!(
            dir_name.starts_with("uploaded-module."),
            "staging directory should be named after the archive, got {dir_name}"
        );
        assert!(staging.join("module.json").is_file());
        assert_eq!(
            fs::read_to_string(staging.join("assets").join("style.css"))?,
            "body {}"
        );
        assert!(staging.join("assets").join("img").is_dir());

        Ok(())
    }

    #[test]
    fn test_unpack_corrupt_archive() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let archive = temp_dir.path().join("corrupt.zip");
        fs::write(&archive, b"this is not a zip archive")?;

        let ext = extractor(temp_dir.path(), false);
        let res = ext.unpack(&archive);
        assert!(matches!(res, Err(ArchiveError::CorruptArchive { .. })));
        assert!(
            staging_entries(&ext.staging_root)?.is_empty(),
            "no staging directory should be left behind"
        );

        // A missing archive cannot be read either
        let res = ext.unpack(temp_dir.path().join("missing.zip"));
        assert!(matches!(res, Err(ArchiveError::CorruptArchive { .. })));

        Ok(())
    }

    #[test]
    fn test_unpack_rejects_path_traversal() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let archive = temp_dir.path().join("evil.zip");
        create_module_zip(&archive, &[("module.json", "{}"), ("../escape.txt", "gotcha")])?;

        let ext = extractor(temp_dir.path(), false);
        let res = ext.unpack(&archive);
        assert!(matches!(res, Err(ArchiveError::CorruptArchive { .. })));
        assert!(!temp_dir.path().join("modules").join("escape.txt").exists());
        assert!(staging_entries(&ext.staging_root)?.is_empty());

        Ok(())
    }

    #[test]
    fn test_unpack_rejects_symlink_entry() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let archive = temp_dir.path().join("link.zip");
        let mut zip = zip::ZipWriter::new(File::create(&archive)?);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("module.json", options)?;
        io::Write::write_all(&mut zip, b"{}")?;
        zip.add_symlink("evil", "/etc/passwd", options)?;
        zip.finish()?;

        let ext = extractor(temp_dir.path(), false);
        let res = ext.unpack(&archive);
        assert!(
            matches!(&res, Err(ArchiveError::CorruptArchive { reason, .. }) if reason.contains("symlink")),
            "expected symlink rejection, got {res:?}"
        );
        assert!(staging_entries(&ext.staging_root)?.is_empty());

        Ok(())
    }

    #[test]
    fn test_unpack_rejects_oversized_entry_count() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let archive = temp_dir.path().join("many.zip");
        let names: Vec<String> = (0..=MAX_ENTRY_COUNT).map(|i| format!("f{i}.txt")).collect();
        let entries: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "")).collect();
        create_module_zip(&archive, &entries)?;

        let ext = extractor(temp_dir.path(), false);
        let res = ext.unpack(&archive);
        assert!(
            matches!(&res, Err(ArchiveError::CorruptArchive { reason, .. }) if reason.contains("maximum entry count")),
            "expected entry count error, got {res:?}"
        );
        assert!(staging_entries(&ext.staging_root)?.is_empty());

        Ok(())
    }

    #[test]
    fn test_unpack_rejects_oversized_content() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let archive = temp_dir.path().join("large.zip");
        create_module_zip(
            &archive,
            &[("module.json", "{}"), ("data.bin", "more than sixteen bytes of data")],
        )?;

        let ext = extractor(temp_dir.path(), false).with_max_extracted_size(16);
        let res = ext.unpack(&archive);
        assert!(
            matches!(&res, Err(ArchiveError::CorruptArchive { reason, .. }) if reason.contains("maximum extracted size")),
            "expected size limit error, got {res:?}"
        );
        assert!(staging_entries(&ext.staging_root)?.is_empty());

        // The default limit accepts the same archive
        extractor(temp_dir.path(), false).unpack(&archive)?;

        Ok(())
    }

    #[test]
    fn test_promote() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let archive = temp_dir.path().join("uploaded-module.zip");
        create_module_zip(&archive, &[("module.json", "{}")])?;

        let ext = extractor(temp_dir.path(), false);
        let staging = ext.unpack(&archive)?;
        let target = ext.promote(&staging, "demo-module")?;

        assert_eq!(target, temp_dir.path().join("modules").join("demo-module"));
        assert!(target.join("module.json").is_file());
        assert!(!staging.exists(), "staging directory should have been moved");

        Ok(())
    }

    #[test]
    fn test_promote_target_exists() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let archive = temp_dir.path().join("uploaded-module.zip");
        create_module_zip(&archive, &[("module.json", "new")])?;

        let installed = temp_dir.path().join("modules").join("demo-module");
        fs::create_dir_all(&installed)?;
        fs::write(installed.join("module.json"), "old")?;

        let ext = extractor(temp_dir.path(), false);
        let staging = ext.unpack(&archive)?;
        let res = ext.promote(&staging, "demo-module");
        assert!(matches!(res, Err(ArchiveError::TargetExists(_))));
        assert_eq!(fs::read_to_string(installed.join("module.json"))?, "old");

        // With overwrite the staged version replaces the installed one
        let ext = extractor(temp_dir.path(), true);
        ext.promote(&staging, "demo-module")?;
        assert_eq!(fs::read_to_string(installed.join("module.json"))?, "new");

        Ok(())
    }

    #[test]
    fn test_repeated_overwrite() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let ext = extractor(temp_dir.path(), true);

        // Leftover of an interrupted replacement
        let stale = ext
            .staging_root
            .join(format!(".demo-module.previous.{}", std::process::id()));
        fs::create_dir_all(stale.join("demo-module"))?;
        fs::write(stale.join("demo-module").join("module.json"), "stale")?;

        let installed = temp_dir.path().join("modules").join("demo-module");
        for version in ["1", "2", "3"] {
            let archive = temp_dir.path().join(format!("upload-{version}.zip"));
            create_module_zip(&archive, &[("module.json", version)])?;
            let staging = ext.unpack(&archive)?;
            ext.promote(&staging, "demo-module")?;
            assert_eq!(fs::read_to_string(installed.join("module.json"))?, version);
        }
        assert!(staging_entries(&ext.staging_root)?.is_empty());

        Ok(())
    }

    #[test]
    fn test_promote_failure_keeps_previous_version() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let installed = temp_dir.path().join("modules").join("demo-module");
        fs::create_dir_all(&installed)?;
        fs::write(installed.join("module.json"), "old")?;

        let ext = extractor(temp_dir.path(), true);
        let res = ext.promote(temp_dir.path().join("vanished"), "demo-module");
        assert!(matches!(res, Err(ArchiveError::PromotionFailed { .. })));
        assert_eq!(fs::read_to_string(installed.join("module.json"))?, "old");

        Ok(())
    }

    #[test]
    fn test_promote_rejects_unsafe_names() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let staging = temp_dir.path().join("staged");
        fs::create_dir_all(&staging)?;

        let ext = extractor(temp_dir.path(), false);
        for name in ["", "..", "../outside", "a/b", ".hidden"] {
            assert!(
                matches!(
                    ext.promote(&staging, name),
                    Err(ArchiveError::PromotionFailed { .. })
                ),
                "'{name}' should be rejected"
            );
        }
        assert!(staging.is_dir());

        Ok(())
    }

    #[test]
    fn test_concurrent_promotion_of_same_name() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let ext = extractor(temp_dir.path(), false);

        let mut stagings = Vec::new();
        for i in 0..2 {
            let archive = temp_dir.path().join(format!("upload-{i}.zip"));
            create_module_zip(&archive, &[("module.json", &format!("{i}"))])?;
            stagings.push(ext.unpack(&archive)?);
        }

        let ext = &ext;
        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = stagings
                .iter()
                .map(|staging| s.spawn(move || ext.promote(staging, "demo-module")))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(ArchiveError::TargetExists(_))))
                .count(),
            1
        );

        Ok(())
    }
}
