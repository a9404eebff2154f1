//! SketchIO CLI - Command Line Interface
//!
//! Creates, mutates and queries persisted sketches. Every command opens the
//! sketch, performs one operation and shuts the proxy down so the state is
//! saved before the process exits.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use sketchio_common::{Config, SketchId, SketchInfo, SketchKind};
use sketchio_sketch::{ProxyOptions, SketchProxy};
use sketchio_storage::StorageManager;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sketchio-cli")]
#[command(about = "SketchIO sketch storage CLI")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "SKETCHIO_CONFIG", default_value = "sketchio.toml")]
    config: PathBuf,

    /// Directory of sketch data files
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Directory of sketch metadata records
    #[arg(long)]
    info_dir: Option<PathBuf>,

    /// Log level (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a sketch
    Create {
        id: SketchId,
        kind: SketchKind,
        /// Sizing property as name=value (e.g. capacity=100000)
        #[arg(short, long = "property", value_parser = parse_property)]
        properties: Vec<(String, f64)>,
    },
    /// Add values to a sketch
    Add {
        id: SketchId,
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Remove values from a sketch
    Remove {
        id: SketchId,
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Query a sketch and print a JSON report
    Count { id: SketchId, values: Vec<String> },
    /// Write pending state to storage
    Flush { id: SketchId },
    /// Delete a sketch and its stored data
    Delete { id: SketchId },
    /// List all sketches
    List,
}

fn parse_property(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got {raw}"))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value for {name}: {e}"))?;
    Ok((name.trim().to_string(), value))
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    if let Some(dir) = &args.data_dir {
        config.storage.data_dir.clone_from(dir);
    }
    if let Some(dir) = &args.info_dir {
        config.storage.info_dir.clone_from(dir);
    }
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
    config.validate()?;
    Ok(config)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();
    let config = load_config(&args)?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let storage = Arc::new(StorageManager::new(&config.storage)?);
    let options = ProxyOptions::from(&config.persist);

    match args.command {
        Commands::Create {
            id,
            kind,
            properties,
        } => {
            if storage.load_info(&id).is_ok() {
                bail!("sketch {id} already exists");
            }
            let mut info = SketchInfo::new(id, kind);
            for (name, value) in properties {
                info.set_property(name, value);
            }
            let proxy = SketchProxy::create(info, Arc::clone(&storage), options)?;
            proxy.shutdown()?;
            print_json(&proxy.info())?;
        }
        Commands::Add { id, values } => {
            let proxy = SketchProxy::open(&id, Arc::clone(&storage), options)?;
            let result = proxy.add(&values);
            proxy.shutdown()?;
            println!("{}", result?);
        }
        Commands::Remove { id, values } => {
            let proxy = SketchProxy::open(&id, Arc::clone(&storage), options)?;
            let result = proxy.remove(&values);
            proxy.shutdown()?;
            println!("{}", result?);
        }
        Commands::Count { id, values } => {
            let proxy = SketchProxy::open(&id, Arc::clone(&storage), options)?;
            let report = proxy.count(&values);
            proxy.shutdown()?;
            print_json(&report)?;
        }
        Commands::Flush { id } => {
            let proxy = SketchProxy::open(&id, Arc::clone(&storage), options)?;
            proxy.flush()?;
            proxy.shutdown()?;
        }
        Commands::Delete { id } => match SketchProxy::open(&id, Arc::clone(&storage), options) {
            Ok(proxy) => proxy.delete()?,
            Err(e) if e.is_not_found() => bail!("sketch {id} not found"),
            Err(e) => {
                // Unreadable data still gets removed
                warn!(sketch_id = %id, "deleting unreadable sketch: {}", e);
                storage.delete_data(&id)?;
                storage.delete_info(&id)?;
            }
        },
        Commands::List => {
            print_json(&storage.list_infos()?)?;
        }
    }

    storage.flush_all()?;
    info!("done");
    Ok(())
}
