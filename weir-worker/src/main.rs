//! The Weir stream-processing worker.

mod app;
mod config;
mod driver;
mod error;
mod feed;
#[cfg(test)]
mod fixtures;
mod operator;
mod scheduler;
mod tuple;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::prelude::*;

use weir_core::store::memory::MemoryStore;

use crate::app::App;
use crate::config::Config;
use crate::feed::FeedRegistry;
use crate::operator::OperatorRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    // Setup tracing/logging system.
    tracing_subscriber::registry()
        // Filter spans based on the RUST_LOG env var.
        .with(tracing_subscriber::EnvFilter::from_default_env())
        // Send a copy of all spans to stdout in compact form.
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true)
        )
        // Install this registry as the global tracing registry.
        .try_init()
        .context("error initializing logging/tracing system")?;

    let cfg = Arc::new(Config::new()?);
    tracing::info!(
        namespace_root = %cfg.namespace_root,
        tick_interval_seconds = %cfg.tick_interval_seconds,
        "starting Weir worker",
    );

    // Feed and operator catalogs start empty here; deployments register
    // their concrete feed readers and operator factories before spawn.
    let store = Arc::new(MemoryStore::new().session());
    let feeds = Arc::new(FeedRegistry::new());
    let operators = Arc::new(OperatorRegistry::new());
    if let Err(err) = App::new(cfg, store, feeds, operators).await?.spawn().await {
        tracing::error!(error = ?err);
    }

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    Ok(())
}
