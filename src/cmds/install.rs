use crate::errors::{ArchiveError, InstallError, ManifestError};
use crate::install::{Installation, InstallationOrchestrator};
use crate::registry::{DirectoryLister, ModuleFields, ModuleRegistry};
use crate::store::Store;
use color_eyre::eyre::WrapErr;
use color_eyre::{Report, Result, Section};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Installs a module archive without touching the catalog.
///
/// Prints the installation as JSON unless `quiet` is set.
///
/// # Errors
/// Returns an error if any install step fails, see [`InstallationOrchestrator::install`].
pub(crate) async fn install(
    archive: PathBuf,
    quiet: bool,
    orchestrator: Arc<InstallationOrchestrator>,
) -> Result<bool> {
    if quiet {
        return tokio::task::spawn_blocking(move || orchestrator.store(&archive))
            .await
            .wrap_err("Install task failed to complete")?
            .map_err(report_install_error);
    }

    let installation = run_install(archive, orchestrator).await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "code": installation.manifest.code(),
            "name": installation.manifest.name(),
            "version": installation.manifest.version(),
            "language": installation.manifest.language(),
            "title": installation.manifest.title(),
            "description": installation.manifest.description(),
            "translations": installation.manifest.translations(),
            "location": installation.location,
            "checksum": installation.checksum,
        }))?
    );
    Ok(true)
}

/// Installs a module archive and saves the module in the catalog.
///
/// The module is published unless `draft` is set. `version` replaces the version of the manifest.
///
/// # Errors
/// Returns an error if installing or saving fails. A module installed before saving failed stays
/// installed and can be published again.
pub(crate) async fn publish<S: Store, L: DirectoryLister>(
    archive: PathBuf,
    draft: bool,
    version: Option<String>,
    orchestrator: Arc<InstallationOrchestrator>,
    registry: &ModuleRegistry<S, L>,
) -> Result<bool> {
    let installation = run_install(archive, orchestrator).await?;

    let manifest = match version {
        Some(version) => installation
            .manifest
            .with_override("version", &version)
            .map_err(|e| report_install_error(InstallError::from(e)))?,
        None => installation.manifest,
    };

    let fields = ModuleFields::from(&manifest).with_status(!draft);
    registry
        .save(&fields)
        .await
        .wrap_err_with(|| format!("Failed to save module '{}'", fields.code))?;
    info!(
        code = %fields.code,
        version = %fields.version,
        "Module {}",
        if draft { "saved as draft" } else { "published" }
    );

    let record = registry
        .find(&fields.code, manifest.language())
        .await
        .wrap_err_with(|| format!("Failed to read back module '{}'", fields.code))?;
    println!("{}", serde_json::to_string_pretty(&record)?);

    Ok(true)
}

/// Runs the blocking install pipeline on the blocking thread pool.
async fn run_install(
    archive: PathBuf,
    orchestrator: Arc<InstallationOrchestrator>,
) -> Result<Installation> {
    tokio::task::spawn_blocking(move || orchestrator.install(&archive))
        .await
        .wrap_err("Install task failed to complete")?
        .map_err(report_install_error)
}

/// Turns an install error into a report with a hint on how to resolve it.
fn report_install_error(error: InstallError) -> Report {
    let suggestion = match &error {
        InstallError::Archive(ArchiveError::TargetExists(_)) => {
            Some("Use '--force' to replace the installed module")
        }
        InstallError::Archive(ArchiveError::CorruptArchive { .. }) => {
            Some("Make sure the file is a valid zip archive")
        }
        InstallError::Manifest(ManifestError::NotFound(_)) => {
            Some("The manifest must be placed at the root of the archive")
        }
        InstallError::Manifest(ManifestError::Invalid { .. }) => Some(
            "The manifest must be a JSON object with the string fields name, version, title and description",
        ),
        _ => None,
    };

    let report = Report::new(error).wrap_err("Failed to install module");
    match suggestion {
        Some(s) => report.suggestion(s),
        None => report,
    }
}

// -------------------------------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------------------------------
