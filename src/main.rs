use std::path::Path;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use watchstate::cli::{Cli, Commands};
use watchstate::{app, config};
use watchstate_core::State;
use watchstate_db::{get_conn, init_pool};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "watchstate=trace,watchstate_core=debug,watchstate_db=debug,watchstate_export=debug".to_string()
        } else {
            "watchstate=info".to_string()
        }
    });

    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(&env_filter)).init();

    match cli.command {
        Commands::Import { input, after } => import(cli.config.as_deref(), input.as_deref(), after),
        Commands::Export { after } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(export(cli.config.as_deref(), after))
        }
        Commands::ValidateConfig { config: config_path } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Stats => stats(cli.config.as_deref()),
        Commands::Version => {
            println!("watchstate {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn import(
    config_path: Option<&Path>,
    input: Option<&Path>,
    after: Option<i64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_config_or_default(config_path)?;

    let text = match input {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            use std::io::Read;
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let observations: Vec<State> = serde_json::from_str(&text)?;

    tracing::info!(count = observations.len(), "importing observations");
    let counters = app::run_import(&config, observations, after)?;
    println!("{counters}");
    Ok(())
}

async fn export(config_path: Option<&Path>, after: Option<i64>) -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_config_or_default(config_path)?;
    let stats = app::run_export(&config, after).await?;
    println!("{stats:?}");
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let config = config::load_config(p)?;
            println!("Configuration is valid");
            println!("  Database: {}", config.database.path.display());
            println!("  Backends: {}", config.backends.len());
            for backend in &config.backends {
                println!(
                    "    {} ({:?}) enabled={}",
                    backend.name, backend.kind, backend.enabled
                );
            }
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("  Database: {}", config.database.path.display());
        }
    }
    Ok(())
}

fn stats(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_config_or_default(config_path)?;
    let path = config.database.path.to_string_lossy().to_string();
    let pool = init_pool(&path)?;
    let conn = get_conn(&pool)?;

    let total: i64 = conn.query_row("SELECT COUNT(*) FROM state", [], |row| row.get(0))?;
    let movies: i64 = conn.query_row(
        "SELECT COUNT(*) FROM state WHERE type = 'movie'",
        [],
        |row| row.get(0),
    )?;
    let episodes: i64 = conn.query_row(
        "SELECT COUNT(*) FROM state WHERE type = 'episode'",
        [],
        |row| row.get(0),
    )?;
    let watched: i64 = conn.query_row(
        "SELECT COUNT(*) FROM state WHERE watched = 1",
        [],
        |row| row.get(0),
    )?;

    println!("Total records: {total}");
    println!("  Movies:   {movies}");
    println!("  Episodes: {episodes}");
    println!("  Watched:  {watched}");
    Ok(())
}
