//! This module defines the command-line interface (CLI) structure using clap's builder pattern

use clap::builder::{FalseyValueParser, TypedValueParser};
use clap::{
    Arg, ArgAction, ArgGroup, ArgMatches, Command, crate_name, crate_version, value_parser,
};
use clap_complete::Shell;
use color_eyre::Result;
use color_eyre::eyre::{OptionExt, eyre};
use std::env;
use std::path::PathBuf;

// -------------------------------------------------------------------------------------------------
// CLI builder
// -------------------------------------------------------------------------------------------------

/// Constructs the CLI application definition using clap's builder pattern
///
/// Defines all commands, arguments, and help documentation.
pub(crate) fn build_cli() -> Command {
    let cmd = Command::new(crate_name!())
        .version(crate_version!())
        .about("Blocks - Module package ingestion and registry")
        .subcommand_required(true)
        // --
        // * Main and global options
        .arg(
            Arg::new("lang")
                .long("lang")
                .short('l')
                .global(true)
                .env("BLOCKS_LANG")
                .value_parser(value_parser!(String))
                .help("Language of module information [default: default_language from config]"),
        )
        .arg(
            Arg::new("force")
                .short('f')
                .long("force")
                .global(true)
                .env("BLOCKS_FORCE")
                .value_parser(FalseyValueParser::new().map(|b| -> u8 {
                    if b { 1 } else { 0 }
                }))
                .action(ArgAction::Count)
                .help("Replace an installed module with the same code"),
        )
        .arg(
            Arg::new("no_force")
                .long("no-force")
                .global(true)
                .value_parser(FalseyValueParser::new().map(|b| -> u8 {
                    if b { 1 } else { 0 }
                }))
                .action(ArgAction::Count)
                .help("Refuse to replace installed modules [default]"),
        )
        .arg(
            Arg::new("config_file")
                .long("config-file")
                .global(true)
                .env("BLOCKS_CONFIG_FILE")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("modules_root")
                .long("modules-root")
                .global(true)
                .env("BLOCKS_MODULES_ROOT")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("resources_root")
                .long("resources-root")
                .global(true)
                .env("BLOCKS_RESOURCES_ROOT")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("staging_root")
                .long("staging-root")
                .global(true)
                .env("BLOCKS_STAGING_ROOT")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("store_path")
                .long("store")
                .global(true)
                .env("BLOCKS_STORE")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("manifest_file")
                .long("manifest-file")
                .global(true)
                .env("BLOCKS_MANIFEST_FILE")
                .value_parser(value_parser!(String))
                .help("File name of the manifest inside a module [default: module.json]"),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .global(true)
                .env("BLOCKS_VERBOSE")
                .action(ArgAction::Count)
                .help("Verbosity level (-v = debug, -vv = trace)"),
        )
        .arg(
            Arg::new("logs_dir")
                .long("logs-dir")
                .global(true)
                .env("BLOCKS_LOGS_DIR")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("logs_max")
                .long("logs-max")
                .global(true)
                .env("BLOCKS_LOGS_MAX")
                .value_parser(value_parser!(usize)),
        );

    // --
    // * Add subcommands

    let code_arg = || {
        Arg::new("code")
            .value_name("CODE")
            .required(true)
            .value_parser(value_parser!(String))
            .help("Code of the module")
    };

    // --
    // * install

    cmd.subcommand(
        Command::new("install")
            .about("Install a module archive without registering it")
            .arg(
                Arg::new("archive")
                    .value_name("ARCHIVE")
                    .required(true)
                    .value_parser(value_parser!(PathBuf))
                    .help("Zip archive containing the module"),
            )
            .arg(
                Arg::new("quiet")
                    .short('q')
                    .long("quiet")
                    .action(ArgAction::SetTrue)
                    .help("Do not print the installed module, only set the exit status"),
            ),
    )
    // --
    // * publish
    .subcommand(
        Command::new("publish")
            .about("Install a module archive and register it in the catalog")
            .arg(
                Arg::new("archive")
                    .value_name("ARCHIVE")
                    .required(true)
                    .value_parser(value_parser!(PathBuf))
                    .help("Zip archive containing the module"),
            )
            .arg(
                Arg::new("draft")
                    .long("draft")
                    .action(ArgAction::SetTrue)
                    .help("Register the module without publishing it"),
            )
            .arg(
                Arg::new("version")
                    .long("version")
                    .value_parser(value_parser!(String))
                    .help("Override the version of the manifest"),
            ),
    )
    // --
    // * show
    .subcommand(
        Command::new("show")
            .about("Show a module, its languages and its images")
            .arg(code_arg()),
    )
    // --
    // * list
    .subcommand(Command::new("list").about("List published modules"))
    // --
    // * languages
    .subcommand(
        Command::new("languages")
            .about("List the languages a module is translated to")
            .arg(code_arg()),
    )
    // --
    // * images
    .subcommand(
        Command::new("images")
            .about("List the images of a module in display order")
            .arg(code_arg()),
    )
    // --
    // * status
    .subcommand(
        Command::new("status")
            .about("Publish or unpublish a module")
            .arg(code_arg())
            .arg(
                Arg::new("publish")
                    .long("publish")
                    .action(ArgAction::SetTrue)
                    .help("Show the module in the published list"),
            )
            .arg(
                Arg::new("unpublish")
                    .long("unpublish")
                    .action(ArgAction::SetTrue)
                    .help("Hide the module from the published list"),
            )
            .group(
                ArgGroup::new("state")
                    .args(["publish", "unpublish"])
                    .required(true),
            ),
    )
    // --
    // * completions
    .subcommand(
        Command::new("completions")
            .about("Generate shell completions")
            .arg(
                Arg::new("shell")
                    .required(true)
                    .long("shell")
                    .short('s')
                    .value_parser(value_parser!(Shell))
                    .help("Set the shell for generating completions [values: bash, elvish, fish, powerShell, zsh]"),
            )
            .arg(
                Arg::new("out")
                    .long("out")
                    .value_parser(value_parser!(PathBuf))
                    .help("Set the out directory for writing completions file"),
            ),
    )
}

// -------------------------------------------------------------------------------------------------
// CLI Commands
// -------------------------------------------------------------------------------------------------

/// Represents parsed command-line subcommands and their arguments
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Commands {
    Install {
        archive: PathBuf,
        quiet: bool,
    },
    Publish {
        archive: PathBuf,
        draft: bool,
        version: Option<String>,
    },
    Show {
        code: String,
    },
    List,
    Languages {
        code: String,
    },
    Images {
        code: String,
    },
    Status {
        code: String,
        publish: bool,
    },
    Completions {
        shell: Shell,
        out: Option<PathBuf>,
    },
}

impl Commands {
    /// Converts raw CLI matches into structured Commands enum
    ///
    /// Acts as bridge between clap's ArgMatches structure and application logic.
    pub(crate) fn parse_command(matches: &ArgMatches) -> Result<Self> {
        let code = |m: &ArgMatches| -> Result<String> {
            m.get_one::<String>("code")
                .cloned()
                .ok_or_eyre("Missing module code")
        };
        let archive = |m: &ArgMatches| -> Result<PathBuf> {
            m.get_one::<PathBuf>("archive")
                .cloned()
                .ok_or_eyre("Missing archive path")
        };

        let command = match matches.subcommand() {
            Some(("install", m)) => Commands::Install {
                archive: archive(m)?,
                quiet: m.get_flag("quiet"),
            },
            Some(("publish", m)) => Commands::Publish {
                archive: archive(m)?,
                draft: m.get_flag("draft"),
                version: m.get_one::<String>("version").cloned(),
            },
            Some(("show", m)) => Commands::Show { code: code(m)? },
            Some(("list", _)) => Commands::List,
            Some(("languages", m)) => Commands::Languages { code: code(m)? },
            Some(("images", m)) => Commands::Images { code: code(m)? },
            Some(("status", m)) => Commands::Status {
                code: code(m)?,
                publish: m.get_flag("publish"),
            },
            Some(("completions", m)) => Commands::Completions {
                shell: *m
                    .get_one::<Shell>("shell")
                    .ok_or_eyre("Missing shell name")?,
                out: m.get_one::<PathBuf>("out").cloned(),
            },
            Some((name, _)) => return Err(eyre!("Unknown command '{}'", name)),
            None => return Err(eyre!("No command given")),
        };

        Ok(command)
    }
}

// -------------------------------------------------------------------------------------------------
// Flag parser
// -------------------------------------------------------------------------------------------------

/// Determines effective state of conflicting boolean flags with environment fallback
///
/// Resolves precedence between mutually exclusive flags (e.g. --force vs --no-force) by
/// considering:
///
/// * Last specified flag on command line
/// * Environment variable default
/// * Returns None if no relevant options were specified
pub(crate) fn flag_is_enabled(matches: &ArgMatches, on_flag: &str, off_flag: &str) -> Option<bool> {
    resolve_flag(matches, on_flag, off_flag, env::args())
}

fn resolve_flag<I>(matches: &ArgMatches, on_flag: &str, off_flag: &str, raw_args: I) -> Option<bool>
where
    I: IntoIterator<Item = String>,
{
    // Determine the name the raw flags, following the "FLAG"/"no-FLAG" pattern
    let raw_on_flag = ["--", &on_flag.replace('_', "-")].join("");
    let raw_off_flag = ["--", &off_flag.replace('_', "-")].join("");

    // Find the last occurrence of either --FLAG or --no-FLAG
    let mut last_on_position = None;
    let mut last_off_position = None;

    for (index, arg) in raw_args.into_iter().enumerate() {
        if arg == raw_on_flag {
            last_on_position = Some(index);
        } else if arg == raw_off_flag {
            last_off_position = Some(index);
        }
    }

    match (last_on_position, last_off_position) {
        (Some(on), Some(off)) => Some(on > off),
        (Some(_), None) => Some(true),
        (None, Some(_)) => Some(false),
        // Neither was specified on command line, check environment variable
        (None, None) => (matches.get_count(on_flag) > 0).then_some(true),
    }
}

// -------------------------------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------------------------------
