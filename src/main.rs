//! mongo-porter
//!
//! Browser-facing MongoDB admin server with streaming database export and
//! import.
//!
//! # Usage
//!
//! ```bash
//! # HTTP server on 127.0.0.1:3000
//! mongo-porter serve
//!
//! # One-shot export
//! mongo-porter --uri mongodb://localhost:27017 export --db app --out app.json.gz --gzip
//! ```

use tracing::Level;
use tracing_subscriber::EnvFilter;

use mongo_porter::cli::{CliInterface, Commands, commands};
use mongo_porter::error::Result;
use mongo_porter::server::{AppState, serve};
use mongo_porter::transfer::CsvOptions;

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Parse arguments, set up logging and dispatch the subcommand
async fn run() -> Result<()> {
    let cli = CliInterface::new()?;
    initialize_logging(&cli);

    match cli.command() {
        Commands::Serve { .. } => serve(AppState::new(cli.config().clone())).await,
        Commands::Export {
            db,
            out,
            collections,
            gzip,
            ..
        } => {
            let collections = collections.map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            });
            commands::export(&cli, &db, &out, collections, gzip).await?;
            Ok(())
        }
        Commands::ExportCsv {
            db,
            collection,
            out,
            delimiter,
            no_header,
            gzip,
        } => {
            let csv = CsvOptions {
                delimiter,
                include_header: !no_header,
            };
            commands::export_csv(&cli, &db, &collection, &out, csv, gzip).await?;
            Ok(())
        }
        Commands::Import { db, file } => {
            commands::import(&cli, &db, &file).await?;
            Ok(())
        }
    }
}

/// Initialize logging based on verbosity flags, `RUST_LOG` and configuration
fn initialize_logging(cli: &CliInterface) {
    let level = if cli.args().very_verbose {
        Level::TRACE
    } else if cli.args().verbose {
        Level::DEBUG
    } else {
        cli.config().logging.level.to_tracing_level()
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if cli.config().logging.timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}
