//! Initiate or extend a MongoDB replica set.

mod cmd;
mod config;
mod credentials;
mod driver;
mod output;

use anyhow::{Context, Result};
use structopt::StructOpt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub use crate::output::ExitStatus;

/// Initiate or extend a MongoDB replica set.
#[derive(StructOpt)]
#[structopt(name = "replset")]
pub struct Replset {
    #[structopt(subcommand)]
    action: ReplsetSubcommands,
    /// Enable debug logging.
    #[structopt(short)]
    verbose: bool,
}

impl Replset {
    pub async fn run(self) -> Result<ExitStatus> {
        // Initialize logging based on CLI config. Logs go to stderr, leaving stdout for results.
        let level = if self.verbose { "debug" } else { "info" };
        let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        let fmt_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .try_init()
            .context("error initializing logging/tracing system")?;

        match &self.action {
            ReplsetSubcommands::Apply(inner) => inner.run(&self).await,
            ReplsetSubcommands::Env(inner) => inner.run(&self).await,
        }
    }
}

#[derive(StructOpt)]
pub enum ReplsetSubcommands {
    /// Reconcile a replica set using parameters given as flags.
    #[structopt(name = "apply")]
    Apply(cmd::apply::Apply),
    /// Reconcile a replica set using parameters read from `REPLSET_*` env vars.
    #[structopt(name = "env")]
    Env(cmd::env::Env),
}
