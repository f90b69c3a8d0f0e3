//! Shared setup for commands: corpus, cache location and service.

use std::path::Path;
use std::sync::Arc;

use concache_core::{CacheConfig, ConcordanceService, DatasetIdentity, Query, WorkerCommand};

use crate::corpus::LineCorpus;

/// A corpus opened against a cache root.
pub struct Session {
    pub corpus: Arc<LineCorpus>,
    pub identity: DatasetIdentity,
    pub service: ConcordanceService<LineCorpus>,
}

impl Session {
    pub fn open(corpus_path: &str, cache_dir: Option<&Path>) -> anyhow::Result<Self> {
        let path = Path::new(corpus_path);
        if !path.exists() {
            anyhow::bail!("Corpus not found: {}", corpus_path);
        }

        let corpus = Arc::new(LineCorpus::open(path)?);
        let identity = corpus.identity();
        let config = cache_config(cache_dir);
        tracing::debug!("Corpus {} uses cache {}", identity, config.cache_root.display());

        let mut service = ConcordanceService::with_shared(Arc::clone(&corpus), config.clone());
        match worker_command(path, &config) {
            Ok(command) => service = service.with_worker_command(command),
            Err(e) => tracing::warn!("Background queries will run in this process: {}", e),
        }
        Ok(Self {
            corpus,
            identity,
            service,
        })
    }
}

/// `concache worker <corpus> --cache-dir <root>`, run by background queries
/// so they outlive this process.
fn worker_command(corpus_path: &Path, config: &CacheConfig) -> anyhow::Result<WorkerCommand> {
    let exe = std::env::current_exe()?;
    let corpus_path = corpus_path.canonicalize()?;
    Ok(WorkerCommand::new(exe)
        .arg("worker")
        .arg(corpus_path)
        .arg("--cache-dir")
        .arg(&config.cache_root))
}

/// Cache settings: `--cache-dir`, then `CONCACHE_CACHE_DIR`, then the
/// platform cache directory.
pub fn cache_config(cache_dir: Option<&Path>) -> CacheConfig {
    let config = CacheConfig::from_env();
    match cache_dir {
        Some(dir) => config.with_cache_root(dir),
        None if std::env::var_os("CONCACHE_CACHE_DIR").is_some() => config,
        None => match dirs::cache_dir() {
            Some(dir) => config.with_cache_root(dir.join("concache")),
            None => config,
        },
    }
}

/// Parse `-q` arguments into a query.
pub fn parse_query(ops: &[String]) -> anyhow::Result<Query> {
    Ok(Query::parse(ops)?)
}
