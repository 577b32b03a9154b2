use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use vmsampler::agent::Agent;
use vmsampler::config::Config;
use vmsampler::metric_set::HeapStorage;
use vmsampler::schema;
use vmsampler::source::{FileSource, DEFAULT_SOURCE_PATH};

/// Schema-discovering sampler for kernel counter files.
#[derive(Parser)]
#[command(name = "vmsampler", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    /// Overrides `log_level` from the config file.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,

    /// Discover and print the schema of a source file, then exit.
    Discover {
        /// Counter file to inspect.
        #[arg(default_value = DEFAULT_SOURCE_PATH)]
        source: PathBuf,
    },
}

/// Build-time version info, injected by build.rs.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("vmsampler {}", version::full());
        return Ok(());
    }

    if let Some(Command::Discover { source }) = &cli.command {
        init_logging(cli.log_level.as_deref().unwrap_or("info"))?;
        return print_schema(source);
    }

    // Config is required for the daemon.
    let config_path = cli
        .config
        .context("--config is required (use --help for usage)")?;

    let cfg = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    init_logging(cfg.log_filter(cli.log_level.as_deref()))?;

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting vmsampler",
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg).await })
}

fn init_logging(level: &str) -> Result<()> {
    let filter =
        EnvFilter::try_new(level).with_context(|| format!("invalid log level: {level}"))?;

    fmt().with_env_filter(filter).with_target(true).init();

    Ok(())
}

fn print_schema(path: &Path) -> Result<()> {
    let mut source = FileSource::new(path);
    let discovery = schema::discover(&mut source, &HeapStorage)
        .with_context(|| format!("discovering schema of {}", path.display()))?;

    for (i, metric) in discovery.schema.iter().enumerate() {
        println!("{i:>4}  {}  {}", metric.kind.as_str(), metric.name);
    }
    println!(
        "{} metrics, meta_size={} data_size={}",
        discovery.schema.len(),
        discovery.size.meta,
        discovery.size.data,
    );

    Ok(())
}

async fn run(cfg: Config) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }

        let _ = shutdown_tx.send(());
    });

    let mut agent = Agent::new(cfg)?;
    agent.start().await?;

    let _ = shutdown_rx.await;

    agent.stop().await?;

    tracing::info!("vmsampler stopped");

    Ok(())
}
