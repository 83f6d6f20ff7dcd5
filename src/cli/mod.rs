//! Command-line interface for mongo-porter
//!
//! This module handles:
//! - Command-line argument parsing using clap
//! - Configuration loading and flag overrides
//! - Subcommand selection (HTTP server or one-shot transfers)

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use crate::error::{ConnectionError, Result};

pub mod commands;

/// MongoDB admin server with streaming export and import
#[derive(Parser, Debug)]
#[command(
    name = "mongo-porter",
    version,
    about = "Browser-facing MongoDB admin server with streaming export and import",
    long_about = "Serves an HTTP API for browsing and editing MongoDB databases, and runs
database exports and imports either over HTTP or directly from the command line."
)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    pub config_file: Option<PathBuf>,

    /// MongoDB connection URI
    ///
    /// Format: mongodb://[username:password@]host[:port][/database][?options]
    #[arg(long, value_name = "URI", global = true)]
    pub uri: Option<String>,

    /// Verbose mode (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Very verbose mode (trace logging)
    #[arg(long = "vv", global = true)]
    pub very_verbose: bool,

    /// Subcommand; defaults to `serve`
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Subcommands for mongo-porter
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Address to bind
        #[arg(long, value_name = "HOST")]
        host: Option<String>,

        /// Port to listen on
        #[arg(long, value_name = "PORT")]
        port: Option<u16>,
    },

    /// Export a database to a structured JSON file
    Export {
        #[arg(long, value_name = "NAME")]
        db: String,

        /// Output file
        #[arg(long, value_name = "FILE")]
        out: PathBuf,

        /// Comma-separated collection names (default: all)
        #[arg(long, value_name = "NAMES")]
        collections: Option<String>,

        /// Gzip the output
        #[arg(long)]
        gzip: bool,

        /// Documents per chunk
        #[arg(long, value_name = "N")]
        chunk_size: Option<u32>,
    },

    /// Export one collection to CSV
    ExportCsv {
        #[arg(long, value_name = "NAME")]
        db: String,

        #[arg(long, value_name = "NAME")]
        collection: String,

        /// Output file
        #[arg(long, value_name = "FILE")]
        out: PathBuf,

        /// Field delimiter
        #[arg(long, default_value_t = ',')]
        delimiter: char,

        /// Omit the header row
        #[arg(long)]
        no_header: bool,

        /// Gzip the output
        #[arg(long)]
        gzip: bool,
    },

    /// Import a structured export into a database
    Import {
        #[arg(long, value_name = "NAME")]
        db: String,

        /// Exported file, plain or gzip
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
    },
}

/// CLI interface handler
pub struct CliInterface {
    /// Parsed command-line arguments
    args: CliArgs,

    /// Loaded configuration
    config: Config,
}

impl CliInterface {
    /// Parse process arguments and load configuration
    pub fn new() -> Result<Self> {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(args: CliArgs) -> Result<Self> {
        let mut config = Config::load(args.config_file.as_deref())?;
        Self::apply_args_to_config(&mut config, &args);
        config.validate()?;
        Ok(Self { args, config })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the CLI arguments
    pub fn args(&self) -> &CliArgs {
        &self.args
    }

    /// Selected subcommand, `serve` when none was given
    pub fn command(&self) -> Commands {
        self.args.command.clone().unwrap_or(Commands::Serve {
            host: None,
            port: None,
        })
    }

    /// URI for one-shot commands
    pub fn connection_uri(&self) -> Result<String> {
        self.config
            .connection
            .default_uri
            .clone()
            .ok_or_else(|| {
                ConnectionError::InvalidUri("no URI given (use --uri or MONGO_PORTER_URI)".into())
                    .into()
            })
    }

    /// Override configuration values with CLI arguments where provided
    fn apply_args_to_config(config: &mut Config, args: &CliArgs) {
        if let Some(uri) = &args.uri {
            config.connection.default_uri = Some(uri.clone());
        }

        match &args.command {
            Some(Commands::Serve { host, port }) => {
                if let Some(host) = host {
                    config.server.host = host.clone();
                }
                if let Some(port) = port {
                    config.server.port = *port;
                }
            }
            Some(Commands::Export {
                chunk_size: Some(n),
                ..
            }) => config.transfer.chunk_size = *n,
            _ => {}
        }
    }

    /// Sanitize URI by hiding credentials
    pub fn sanitize_uri(uri: &str) -> String {
        match (uri.find("://"), uri.rfind('@')) {
            (Some(proto_end), Some(host_start)) if host_start > proto_end => {
                format!("{}***{}", &uri[..proto_end + 3], &uri[host_start..])
            }
            _ => uri.to_string(),
        }
    }
}
