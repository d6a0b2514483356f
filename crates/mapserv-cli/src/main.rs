//! mapserv command-line tool
//!
//! Loads a mapfile and runs a single CGI-style request through the async
//! bridge, writing the response headers and body to stdout. Logs go to
//! stderr so stdout stays the response stream.

mod commands;
mod logging;

use clap::{Parser, Subcommand};
use commands::run::RunArgs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mapserv")]
#[command(about = "Run MapServer-style requests against a mapfile", long_about = None)]
#[command(version)]
struct Cli {
    /// Runtime configuration file (mapserv.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one request against a mapfile
    Run {
        /// Mapfile to load
        mapfile: PathBuf,
        /// Query string, e.g. "mode=map&layers=all"
        #[arg(short, long)]
        query: Option<String>,
        /// HTTP request method (default: GET, or POST when --body is given)
        #[arg(short, long)]
        method: Option<String>,
        /// Extra CGI variable, may be repeated
        #[arg(short, long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
        /// File whose contents become the request body
        #[arg(short, long)]
        body: Option<PathBuf>,
        /// Print engine errors as JSON on stdout
        #[arg(long)]
        json_errors: bool,
    },

    /// Show bridge and engine versions
    Versions {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load a mapfile and report whether it parses
    Check {
        /// Mapfile to check
        mapfile: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = commands::load_config(cli.config.as_deref())?;
    logging::init(&config.logging.filter)?;

    match cli.command {
        Commands::Run {
            mapfile,
            query,
            method,
            env,
            body,
            json_errors,
        } => commands::run::execute(
            RunArgs {
                mapfile,
                query,
                method,
                env,
                body,
                json_errors,
            },
            &config,
        ),

        Commands::Versions { json } => commands::versions::execute(&config, json),

        Commands::Check { mapfile } => commands::check::execute(&mapfile, &config),
    }
}
