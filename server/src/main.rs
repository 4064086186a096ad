use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use aptvault_server::config;

/// Debian package archive daemon.
#[derive(Debug, Parser)]
#[clap(version)]
#[clap(propagate_version = true)]
struct Opts {
    /// Path to the config file.
    #[clap(short = 'f', long)]
    config: Option<PathBuf>,

    /// Mode to run.
    #[clap(long, default_value = "garbage-collector")]
    mode: ServerMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ServerMode {
    /// Run the garbage collector periodically.
    GarbageCollector,

    /// Run garbage collection then exit.
    GarbageCollectorOnce,

    /// Publish every distribution to the public path then exit.
    Publish,

    /// List the distributions then exit.
    ListDists,

    /// Check the configuration then exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::parse();

    init_logging();
    dump_version();

    let config = config::load_config(opts.config.as_deref())?;
    let state = aptvault_server::StateInner::new(config).await;

    match opts.mode {
        ServerMode::GarbageCollector => {
            aptvault_server::gc::run_garbage_collection(state).await;
        }
        ServerMode::GarbageCollectorOnce => {
            aptvault_server::gc::run_garbage_collection_once(state).await?;
        }
        ServerMode::Publish => {
            aptvault_server::publish_all(&state).await?;
        }
        ServerMode::ListDists => {
            aptvault_server::list_dists(&state).await?;
        }
        ServerMode::CheckConfig => {
            // The archive config is only fully validated on open
            state.archive().await?;
        }
    }

    Ok(())
}

fn init_logging() {
    let env_filter = EnvFilter::from_default_env();
    let fmt_layer = tracing_subscriber::fmt::layer().with_filter(env_filter);

    let error_layer = ErrorLayer::default();

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(error_layer)
        .init();
}

fn dump_version() {
    #[cfg(debug_assertions)]
    eprintln!("aptvaultd {} (debug)", env!("CARGO_PKG_VERSION"));

    #[cfg(not(debug_assertions))]
    eprintln!("aptvaultd {} (release)", env!("CARGO_PKG_VERSION"));
}
