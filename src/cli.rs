use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "watchstate")]
#[command(author, version, about = "Synchronizes watched/unwatched play state across media-server backends")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reconcile a batch of incoming state observations into the canonical
    /// database.
    Import {
        /// JSON file containing an array of state observations. Reads from
        /// stdin if omitted.
        #[arg(long)]
        input: Option<PathBuf>,

        /// Only consider observations at or after this unix timestamp.
        #[arg(long)]
        after: Option<i64>,
    },

    /// Compare canonical state against every enabled backend and dispatch
    /// the actions needed to catch them up.
    Export {
        /// Only consider records updated at or after this unix timestamp.
        #[arg(long)]
        after: Option<i64>,
    },

    /// Validate a configuration file.
    ValidateConfig {
        /// Config file to validate (uses the default search path if
        /// omitted).
        config: Option<PathBuf>,
    },

    /// Show a summary of the canonical database's contents.
    Stats,

    /// Display version information.
    Version,
}
