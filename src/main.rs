use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dotlore::config::{ConfigResolver, Lookup, parse_value};
use dotlore::db::{DEFAULT_DB_PATH, Db, DbOptions};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Context management for code and research projects.
#[derive(Parser)]
#[command(name = "lore", version, about)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = ".lore/config.yaml")]
    config: String,

    /// Storage file
    #[arg(long, default_value = DEFAULT_DB_PATH)]
    db: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default configuration and create the store
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },
    /// View or set configuration
    Config { key: Option<String>, value: Option<String> },
    /// List all indexed sources
    List,
    /// Show one source
    Show { source_id: String },
    /// Show context statistics
    Status,
    /// Remove a source and its chunks
    Remove { source_id: String },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_store(config: &ConfigResolver, path: &str) -> Result<Db> {
    let dimensions = config.embedding_dimensions()?;
    Db::open(
        path,
        DbOptions {
            dimensions,
            ..DbOptions::default()
        },
    )
    .with_context(|| format!("failed to open store: {path}"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigResolver::new(&cli.config);

    match cli.command {
        Command::Init { force } => {
            if config.init(force)? {
                info!("Initialized {}", config.path().display());
            } else {
                info!("{} already exists", config.path().display());
            }
            open_store(&config, &cli.db)?;
        }
        Command::Config { key, value } => match (key, value) {
            (Some(key), Some(value)) => {
                config.set(&key, parse_value(&value))?;
                info!("Set {key}");
            }
            (Some(key), None) => match config.get(&key)? {
                Lookup::Found(v) => print!("{}", serde_yaml::to_string(&v)?),
                Lookup::Missing => bail!("`{key}` is not set"),
                Lookup::NoConfig => bail!("no configuration found; run `lore init`"),
            },
            (None, _) => {
                let doc = config.require_all().context("run `lore init` first")?;
                print!("{}", serde_yaml::to_string(&doc)?);
            }
        },
        Command::List => {
            let db = open_store(&config, &cli.db)?;
            print_json(&db.list_sources()?)?;
        }
        Command::Show { source_id } => {
            let db = open_store(&config, &cli.db)?;
            match db.get_source(&source_id)? {
                Some(source) => print_json(&source)?,
                None => bail!("source not found: {source_id}"),
            }
        }
        Command::Status => {
            let db = open_store(&config, &cli.db)?;
            print_json(&db.stats()?)?;
        }
        Command::Remove { source_id } => {
            let mut db = open_store(&config, &cli.db)?;
            db.remove_source(&source_id)?;
        }
    }

    Ok(())
}
