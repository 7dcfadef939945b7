//! CLI definitions for braid.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// braid - reliable Redis work queue.
#[derive(Parser)]
#[command(name = "braid")]
#[command(about = "Reliable work queue over Redis lists")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "braid.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Enqueue one task with a JSON payload
    Push {
        /// Payload, e.g. '{"email": "a@example.com"}'
        json: String,
    },

    /// Process tasks until Ctrl-C or until the queue stops
    Work {
        /// Concurrent workers
        #[arg(short, long, default_value_t = 1)]
        workers: usize,
    },

    /// Print queue lengths and status
    Stats,

    /// Report claims older than the SLA until Ctrl-C
    Monitor,
}
