//! concache CLI - cached concordance queries over plain-text corpora.

mod clean;
mod colors;
mod corpus;
mod describe;
mod query;
mod session;
mod sizes;
mod worker;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::query::QueryArgs;
use crate::session::Session;

#[derive(Parser)]
#[command(name = "concache")]
#[command(about = "Cached concordance queries over plain-text corpora")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Cache directory (default: $CONCACHE_CACHE_DIR, then the platform cache dir)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute a concordance, reusing cached results
    Query {
        /// Path to the corpus (one position per line)
        corpus: String,

        /// Operation, e.g. -q qdog -q r10 (repeatable, applied in order)
        #[arg(short = 'q', long = "op", required = true, allow_hyphen_values = true)]
        ops: Vec<String>,

        /// Compute in the background and follow progress
        #[arg(long = "async")]
        asynchronous: bool,

        /// With --async, return after the first page instead of following
        #[arg(long, requires = "asynchronous")]
        no_follow: bool,

        /// Neither read nor write the cache
        #[arg(long)]
        no_cache: bool,

        /// Sample size for online samples
        #[arg(long, default_value = "0")]
        sample: u64,

        /// Hits needed before showing results
        #[arg(long)]
        min_size: Option<u64>,

        /// Number of lines to show
        #[arg(short, long, default_value = "20")]
        lines: usize,
    },

    /// Show sizes of a cached or running concordance
    Sizes {
        /// Path to the corpus
        corpus: String,

        /// Operation (repeatable)
        #[arg(short = 'q', long = "op", required = true, allow_hyphen_values = true)]
        ops: Vec<String>,

        /// Contact address printed by `query --async`
        #[arg(long)]
        contact: Option<SocketAddr>,
    },

    /// Describe the operations of a query and their cached sizes
    Describe {
        /// Path to the corpus
        corpus: String,

        /// Operation (repeatable)
        #[arg(short = 'q', long = "op", required = true, allow_hyphen_values = true)]
        ops: Vec<String>,
    },

    /// Remove every cached concordance of a corpus
    Clean {
        /// Path to the corpus
        corpus: String,
    },

    /// Run one background computation (started by `query --async`)
    #[command(hide = true)]
    Worker {
        /// Path to the corpus
        corpus: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; a worker's stderr is its log file
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else if matches!(cli.command, Commands::Worker { .. }) {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Helper to format concache-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(core_err) = err.downcast_ref::<concache_core::Error>() {
            anyhow::anyhow!("{}", core_err.with_hint())
        } else {
            err
        }
    };

    let cache_dir = cli.cache_dir.as_deref();

    match cli.command {
        Commands::Query {
            corpus,
            ops,
            asynchronous,
            no_follow,
            no_cache,
            sample,
            min_size,
            lines,
        } => {
            let session = Session::open(&corpus, cache_dir).map_err(format_error)?;
            let args = QueryArgs {
                ops,
                asynchronous,
                follow: !no_follow,
                no_cache,
                sample,
                min_size,
                lines,
            };
            query::execute(session, args).await.map_err(format_error)?;
        }

        Commands::Sizes {
            corpus,
            ops,
            contact,
        } => {
            let session = Session::open(&corpus, cache_dir).map_err(format_error)?;
            sizes::execute(&session, &ops, contact).map_err(format_error)?;
        }

        Commands::Describe { corpus, ops } => {
            let session = Session::open(&corpus, cache_dir).map_err(format_error)?;
            describe::execute(&session, &ops).map_err(format_error)?;
        }

        Commands::Clean { corpus } => {
            clean::execute(&corpus, cache_dir).map_err(format_error)?;
        }

        Commands::Worker { corpus } => {
            let session = Session::open(&corpus, cache_dir).map_err(format_error)?;
            worker::execute(session).await.map_err(format_error)?;
        }
    }

    Ok(())
}
