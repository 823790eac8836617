//! Advene CLI
//!
//! Command-line interface for Advene packages: create and inspect packages,
//! wire imports, add media and annotations, follow references.

use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use advene_core::{CamFactory, Config, Error, Registry};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "advene")]
#[command(about = "Advene - annotation packages on audiovisual documents")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log debug messages to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of the default one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new package
    Create {
        /// Package url or path (defaults to the data directory store)
        url: Option<String>,
    },
    /// Show a package: url, uri, imports and element counts
    Info {
        /// Package url or path (defaults to the data directory store)
        url: Option<String>,
    },
    /// List the elements of a package
    #[command(alias = "list")]
    Ls {
        /// Package url or path
        url: String,
        /// Include elements of imported packages
        #[arg(short, long)]
        all: bool,
        /// Only this kind (media, annotation, relation, view, resource, tag, list, query, import)
        #[arg(short, long)]
        kind: Option<String>,
    },
    /// Import another package under a name
    Import {
        /// Importing package url or path
        url: String,
        /// Name of the import (prefix of imported id-refs)
        name: String,
        /// Imported package url or path
        imported_url: String,
    },
    /// Add a media
    Media {
        /// Package url or path
        url: String,
        /// Media id
        id: String,
        /// Url of the audiovisual document
        media_url: String,
        /// Frame of reference of the time codes
        #[arg(long)]
        frame_of_reference: Option<String>,
    },
    /// Add an annotation on a media
    Annotate {
        /// Package url or path
        url: String,
        /// Annotation id
        id: String,
        /// Id-ref of the annotated media
        media: String,
        /// Begin time code
        begin: i64,
        /// End time code
        end: i64,
        /// Content mimetype
        #[arg(short, long, default_value = "text/plain")]
        mimetype: String,
        /// Content data
        #[arg(short, long)]
        data: Option<String>,
        /// Annotation type (created if missing)
        #[arg(short = 't', long = "type")]
        annotation_type: Option<String>,
    },
    /// Show what references an element
    Refs {
        /// Package url or path
        url: String,
        /// Id-ref of the element, relative to the package
        idref: String,
    },
    /// Rename an element, updating references to it
    #[command(alias = "mv")]
    Rename {
        /// Package url or path
        url: String,
        /// Current id
        id: String,
        /// New id
        new_id: String,
    },
    /// Show configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    let result = run(cli, &output);
    if let Err(e) = &result {
        if let Some(hint) = recovery_hint(e) {
            eprintln!("Hint: {}", hint);
        }
    }
    result
}

fn run(cli: Cli, output: &Output) -> Result<()> {
    // Commands that don't need a registry
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), cli.config.as_ref(), output);
    }

    let config = load_config(cli.config.as_ref())?;
    let registry = Registry::builder(config.clone())
        .factory(Rc::new(CamFactory::from_config(&config)))
        .build();

    match cli.command {
        Commands::Config { .. } => unreachable!(), // Handled above
        Commands::Create { url } => commands::package::create(&registry, url, output),
        Commands::Info { url } => commands::package::info(&registry, url, output),
        Commands::Ls { url, all, kind } => {
            commands::element::list(&registry, &url, all, kind.as_deref(), output)
        }
        Commands::Import {
            url,
            name,
            imported_url,
        } => commands::package::import(&registry, &url, &name, &imported_url, output),
        Commands::Media {
            url,
            id,
            media_url,
            frame_of_reference,
        } => commands::element::media(
            &registry,
            &url,
            &id,
            &media_url,
            frame_of_reference.as_deref(),
            output,
        ),
        Commands::Annotate {
            url,
            id,
            media,
            begin,
            end,
            mimetype,
            data,
            annotation_type,
        } => commands::element::annotate(
            &registry,
            &url,
            commands::element::NewAnnotation {
                id,
                media,
                begin,
                end,
                mimetype,
                data,
                annotation_type,
            },
            output,
        ),
        Commands::Refs { url, idref } => commands::element::refs(&registry, &url, &idref, output),
        Commands::Rename { url, id, new_id } => {
            commands::element::rename(&registry, &url, &id, &new_id, output)
        }
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
    }
}

/// Load configuration from `--config` or the default location
pub(crate) fn load_config(config_path: Option<&PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")
}

/// Recovery suggestion of the storage error behind `error`, if any
fn recovery_hint(error: &anyhow::Error) -> Option<&'static str> {
    error.chain().find_map(|cause| match cause.downcast_ref::<Error>() {
        Some(Error::Storage(storage)) => storage.recovery_suggestion(),
        _ => None,
    })
}

/// Log to stderr, filtered by RUST_LOG when set
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use advene_core::StorageError;

    #[test]
    fn test_recovery_hint_from_storage_error() {
        let storage = StorageError::WrongFormat {
            path: PathBuf::from("/tmp/notes.txt"),
            details: "not a package store".to_string(),
        };
        let err = anyhow::Error::from(Error::from(storage)).context("Failed to open package");
        assert!(recovery_hint(&err).is_some());

        let err = anyhow::Error::from(Error::Model("duplicate id".to_string()));
        assert!(recovery_hint(&err).is_none());
    }

    #[test]
    fn test_cli_parses_annotate() {
        let cli = Cli::try_parse_from([
            "advene", "--json", "annotate", "p.db", "a1", "m", "0", "1500", "--type", "shot",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Annotate {
                begin,
                end,
                mimetype,
                annotation_type,
                ..
            } => {
                assert_eq!((begin, end), (0, 1500));
                assert_eq!(mimetype, "text/plain");
                assert_eq!(annotation_type.as_deref(), Some("shot"));
            }
            _ => panic!("expected annotate"),
        }
    }
}
