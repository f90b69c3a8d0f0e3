//! Clean command implementation for concache CLI.

use std::path::Path;

use concache_core::{CoordinationMap, DatasetIdentity};

use crate::colors;
use crate::corpus;
use crate::session;

/// Remove every cached concordance of a corpus.
///
/// Works from the corpus name alone, so the cache of a deleted or rewritten
/// corpus file can still be cleaned.
pub fn execute(corpus_path: &str, cache_dir: Option<&Path>) -> anyhow::Result<()> {
    let name = corpus::corpus_name(Path::new(corpus_path))?;
    let config = session::cache_config(cache_dir);
    let root = config.cache_root.clone();

    CoordinationMap::new(config).clear(&DatasetIdentity::new(name.as_str(), ""))?;

    println!(
        "{}Cleaned{} cache of {} in {}",
        colors::GREEN,
        colors::RESET,
        name,
        root.display()
    );
    Ok(())
}
