use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use fieldcache_cli::context::{build_engine, EngineOptions};
use fieldcache_cli::{commands, retry_policy, CliRetry};
use fieldcache_config::DEFAULT_CONNECTIVITY_PROBE_URL;
use fieldcache_core::Extent;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Service configuration file (defaults to the platform config dir)
    #[arg(long, global = true, env = "FIELDCACHE_ENVIRONMENT")]
    environment: Option<Utf8PathBuf>,
    /// Directory holding the cache files
    #[arg(long, global = true, env = "FIELDCACHE_CACHE_DIR")]
    cache_dir: Option<Utf8PathBuf>,
    #[arg(long, global = true, value_enum, default_value_t = CliRetry::Default)]
    retry: CliRetry,
    /// Override the preset's attempt count (1-10)
    #[arg(long, global = true)]
    retry_attempts: Option<u32>,
    #[arg(long, global = true, default_value = DEFAULT_CONNECTIVITY_PROBE_URL)]
    probe_url: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured services
    Services,
    /// List cached datasets
    Datasets,
    /// Check connectivity and free storage
    Preflight,
    /// Download services for offline use
    Download {
        #[arg(short, long = "service", help = "Service id (repeatable; all when omitted)")]
        services: Vec<String>,
        #[arg(long, help = "xmin,ymin,xmax,ymax")]
        extent: Extent,
        #[arg(long, help = "Spatial reference of --extent (default 4326)")]
        wkid: Option<u32>,
    },
    /// Synchronize one cached service
    Sync { service_id: String },
    /// Synchronize every configured service
    #[command(name = "sync-all")]
    SyncAll,
    /// Delete a service's cache
    Remove { service_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let options = EngineOptions {
        environment: cli.environment,
        cache_dir: cli.cache_dir,
        retry: retry_policy(cli.retry, cli.retry_attempts),
        probe_url: cli.probe_url,
        ..EngineOptions::default()
    };
    let engine = build_engine(&options)?;

    match cli.command {
        Commands::Services => {
            commands::cmd_services(&engine)?;
        }
        Commands::Datasets => {
            commands::cmd_datasets(&engine).await?;
        }
        Commands::Preflight => commands::cmd_preflight(&engine).await?,
        Commands::Download {
            services,
            extent,
            wkid,
        } => {
            let extent = match wkid {
                Some(wkid) => extent.with_wkid(wkid),
                None => extent,
            };
            commands::cmd_download(&engine, services, extent).await?;
        }
        Commands::Sync { service_id } => {
            if !commands::cmd_sync(&engine, &service_id).await? {
                anyhow::bail!("Service '{}' was not synchronized", service_id);
            }
        }
        Commands::SyncAll => {
            let results = commands::cmd_sync_all(&engine).await?;
            if results.values().any(|ok| !ok) {
                std::process::exit(1);
            }
        }
        Commands::Remove { service_id } => commands::cmd_remove(&engine, &service_id).await?,
    }

    Ok(())
}
