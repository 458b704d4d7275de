use archive::ArchiveExtractor;
use clap::ArgMatches;
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use config::{BlocksConfig, BlocksConfigBuilder};
use install::InstallationOrchestrator;
use manifest::ManifestReader;
use registry::{FsLister, ImageCatalog, ModuleRegistry};
use std::path::PathBuf;
use store::Store;
use std::sync::Arc;
use tracing::debug;

mod archive;
mod cli;
mod cmds;
mod config;
mod errors;
mod install;
mod logs;
mod manifest;
mod registry;
mod store;
mod utils;

fn main() {
    // Initialize color_eyre
    color_eyre::install().unwrap_or_else(|e| panic!("Failed to initialize color_eyre: {:?}", e));

    let cli_matches = cli::build_cli().get_matches();

    let blocks_config = match init_config(&cli_matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to initialize config. Exiting");
            eprintln!("{:?}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    let logger = match logs::LoggerBuilder::default()
        .with_verbosity(cli_matches.get_count("verbosity").min(2))
        .with_log_dir(&blocks_config.logs_dir)
        .with_max_logs(blocks_config.logs_max)
        .build()
    {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to setup logging. Exiting");
            eprintln!("{:?}", e);
            std::process::exit(1);
        }
    };
    let log_guard = match logger.start() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging. Exiting");
            eprintln!("{:?}", e);
            std::process::exit(1);
        }
    };

    debug!(log_file = %logger.log_file().display(), "Logging initialized");
    debug!(
        config_file = %blocks_config.config_file.display(),
        "Config initialized:\n{:#?}", &blocks_config
    );

    let success = match run(blocks_config, &cli_matches) {
        Ok(success) => success,
        Err(e) => {
            eprintln!("An error occured. Exiting");
            eprintln!("{:?}", e);
            false
        }
    };

    // Flush the log file before exiting
    drop(log_guard);
    std::process::exit(if success { 0 } else { 1 });
}

/// Initializes the Blocks configuration by:
///
/// 1. Loading configuration from file (if present)
/// 2. Merging CLI arguments and environment variables with the file configuration
/// 3. Returning the final configuration
///
/// # Errors
///
/// Returns an error if:
/// - Configuration file parsing fails
/// - Required paths or values are missing
fn init_config(cli: &ArgMatches) -> Result<BlocksConfig> {
    BlocksConfigBuilder::default()
        .with_overwrite(cli::flag_is_enabled(cli, "force", "no_force"))
        .with_config_file(cli.get_one::<PathBuf>("config_file").cloned())
        .with_modules_root(cli.get_one::<PathBuf>("modules_root").cloned())
        .with_resources_root(cli.get_one::<PathBuf>("resources_root").cloned())
        .with_staging_root(cli.get_one::<PathBuf>("staging_root").cloned())
        .with_store_path(cli.get_one::<PathBuf>("store_path").cloned())
        .with_manifest_file(cli.get_one::<String>("manifest_file").cloned())
        .with_default_language(cli.get_one::<String>("lang").cloned())
        .with_logs_dir(cli.get_one::<PathBuf>("logs_dir").cloned())
        .with_logs_max(cli.get_one::<usize>("logs_max").copied())
        .build(cli.get_count("verbosity").min(2))
}

#[tokio::main]
async fn run(config: BlocksConfig, arg_matches: &ArgMatches) -> Result<bool> {
    // --
    // * Setup

    let command = cli::Commands::parse_command(arg_matches)?;

    // Completions do not need any state
    if let cli::Commands::Completions { shell, out } = command {
        let mut cmd = cli::build_cli();
        let name = cmd.get_name().to_string();
        match out {
            Some(out) => {
                clap_complete::generate_to(shell, &mut cmd, name, &out).wrap_err_with(|| {
                    format!(
                        "Failed to build completions for {} and write them to {}",
                        shell,
                        out.display()
                    )
                })?;
            }
            None => clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout()),
        }
        return Ok(true);
    }

    let orchestrator = Arc::new(InstallationOrchestrator::new(
        ArchiveExtractor::new(
            config.staging_root.clone(),
            config.modules_root.clone(),
            config.overwrite,
        ),
        ManifestReader::new(config.manifest_file.clone(), config.default_language.clone()),
    ));

    // Installing files alone does not need the catalog
    if let cli::Commands::Install { archive, quiet } = command {
        return cmds::install::install(archive, quiet, orchestrator).await;
    }

    let store = store::sqlite::init_sqlite_store(&config.store_path)
        .await
        .wrap_err("Failed to initialize module store")?;
    debug!(path = %store.path().display(), "Store initialized");
    let pool = store.pool.clone();

    let registry = ModuleRegistry::new(
        store,
        ImageCatalog::new(config.resources_root.clone(), FsLister),
    );
    let lang = config.default_language.as_str();

    // --
    // * Execute

    let cmd_result = match command {
        cli::Commands::Publish {
            archive,
            draft,
            version,
        } => cmds::install::publish(archive, draft, version, orchestrator, &registry).await,
        cli::Commands::Show { code } => cmds::query::show(&code, lang, &registry).await,
        cli::Commands::List => cmds::query::list(lang, &registry).await,
        cli::Commands::Languages { code } => cmds::query::languages(&code, &registry).await,
        cli::Commands::Images { code } => cmds::query::images(&code, &registry),
        cli::Commands::Status { code, publish } => {
            cmds::status::set_status(&code, publish, &registry).await
        }
        cli::Commands::Install { .. } | cli::Commands::Completions { .. } => Ok(true),
    };

    // --
    // * Pool shutdown

    pool.close().await;

    cmd_result
}
