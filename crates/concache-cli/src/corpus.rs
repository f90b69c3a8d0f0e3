//! Reference query executor over plain-text corpora.
//!
//! A corpus is a UTF-8 file with one position per line. Queries are
//! substring matches; the result set is the list of matching line numbers.

use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

use concache_core::{
    DatasetIdentity, EngineError, EngineResult, Opcode, Operation, QueryExecutor, ResultSet,
    Sampling,
};
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

/// Lines scanned per computation step.
const SCAN_CHUNK: usize = 4096;

/// Name of the cache directory of the corpus at `path`: its file stem.
///
/// Hidden files are refused so a corpus never lands in a dot directory.
pub fn corpus_name(path: &Path) -> anyhow::Result<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty() && !s.starts_with('.'))
        .ok_or_else(|| anyhow::anyhow!("Cannot name a corpus after {}", path.display()))
}

/// A loaded line corpus.
pub struct LineCorpus {
    name: String,
    lines: Arc<Vec<String>>,
    content_hash: String,
}

impl LineCorpus {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read(path)
            .map_err(|e| anyhow::anyhow!("Failed to read corpus {}: {}", path.display(), e))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| anyhow::anyhow!("Corpus {} is not valid UTF-8", path.display()))?;

        let mut hasher = FxHasher::default();
        text.as_bytes().hash(&mut hasher);
        let content_hash = format!("{:016x}", hasher.finish());

        let name = corpus_name(path)?;
        let lines = text.lines().map(str::to_string).collect();

        Ok(Self {
            name,
            lines: Arc::new(lines),
            content_hash,
        })
    }

    /// Number of positions (lines).
    pub fn positions(&self) -> usize {
        self.lines.len()
    }

    pub fn identity(&self) -> DatasetIdentity {
        DatasetIdentity::new(self.name.clone(), self.content_hash.clone())
    }

    pub fn line(&self, index: u32) -> Option<&str> {
        self.lines.get(index as usize).map(String::as_str)
    }
}

impl QueryExecutor for LineCorpus {
    type ResultSet = LineConcordance;

    fn apply_first(
        &self,
        _identity: &DatasetIdentity,
        op: &Operation,
        sampling: Sampling,
    ) -> EngineResult<LineConcordance> {
        match op.opcode() {
            Opcode::Query => Ok(LineConcordance::search(
                Arc::clone(&self.lines),
                op.args(),
                None,
            )),
            Opcode::OnlineSample => {
                let base = op
                    .sample_base()
                    .map_err(|e| EngineError::new(e.to_string()))?
                    .filter(|b| b.opcode() == Opcode::Query)
                    .ok_or_else(|| EngineError::new("online samples are only supported over q"))?;
                let full_size = sampling
                    .full_size
                    .ok_or_else(|| EngineError::new("online sample needs the full size"))?;
                let sample = OnlineSample {
                    wanted: sampling.sample_size.min(full_size),
                    full_size,
                    seen: 0,
                };
                Ok(LineConcordance::search(
                    Arc::clone(&self.lines),
                    base.args(),
                    Some(sample),
                ))
            }
            other => Err(EngineError::new(format!(
                "'{}' ({}) cannot start a query",
                other.code(),
                other.label()
            ))),
        }
    }

    fn load(&self, _identity: &DatasetIdentity, path: &Path) -> EngineResult<LineConcordance> {
        let text = fs::read_to_string(path)?;
        let saved: SavedConcordance = serde_json::from_str(&text)
            .map_err(|e| EngineError::new(format!("corrupt concordance {}: {}", path.display(), e)))?;
        if saved.hits.iter().any(|&h| h as usize >= self.lines.len()) {
            return Err(EngineError::new(format!(
                "concordance {} points past the end of the corpus",
                path.display()
            )));
        }
        Ok(LineConcordance {
            lines: Arc::clone(&self.lines),
            needle: String::new(),
            next_line: self.lines.len(),
            hits: saved.hits,
            full_size: saved.full_size,
            sample: None,
            finished: saved.finished,
        })
    }

    fn search_size(&self, _identity: &DatasetIdentity) -> Option<u64> {
        Some(self.positions() as u64)
    }
}

/// Keeps `wanted` of `full_size` hits, spread evenly.
#[derive(Debug, Clone, Copy)]
struct OnlineSample {
    wanted: u64,
    full_size: u64,
    seen: u64,
}

impl OnlineSample {
    fn keep_next(&mut self) -> bool {
        let j = self.seen;
        self.seen += 1;
        if self.full_size == 0 {
            return false;
        }
        (j + 1) * self.wanted / self.full_size > j * self.wanted / self.full_size
    }
}

#[derive(Serialize, Deserialize)]
struct SavedConcordance {
    hits: Vec<u32>,
    full_size: u64,
    finished: bool,
}

/// Matching line numbers of a (possibly still running) search.
pub struct LineConcordance {
    lines: Arc<Vec<String>>,
    needle: String,
    next_line: usize,
    hits: Vec<u32>,
    full_size: u64,
    sample: Option<OnlineSample>,
    finished: bool,
}

impl LineConcordance {
    fn search(lines: Arc<Vec<String>>, needle: &str, sample: Option<OnlineSample>) -> Self {
        Self {
            lines,
            needle: needle.to_string(),
            next_line: 0,
            hits: Vec::new(),
            full_size: sample.map_or(0, |s| s.full_size),
            sample,
            finished: false,
        }
    }

    pub fn hits(&self) -> &[u32] {
        &self.hits
    }

    fn filter(&mut self, needle: &str, keep_matching: bool) {
        let lines = Arc::clone(&self.lines);
        self.hits
            .retain(|&h| lines[h as usize].contains(needle) == keep_matching);
        self.full_size = self.hits.len() as u64;
    }

    fn reduce(&mut self, wanted: u64) {
        let total = self.hits.len() as u64;
        if wanted >= total {
            return;
        }
        let mut sample = OnlineSample {
            wanted,
            full_size: total,
            seen: 0,
        };
        self.hits.retain(|_| sample.keep_next());
    }

    fn shuffle(&mut self, seed: &str) {
        self.hits.sort_by_cached_key(|&h| {
            let mut hasher = FxHasher::default();
            seed.hash(&mut hasher);
            h.hash(&mut hasher);
            hasher.finish()
        });
    }

    fn sort(&mut self, descending: bool) {
        let lines = Arc::clone(&self.lines);
        self.hits
            .sort_by(|&a, &b| lines[a as usize].cmp(&lines[b as usize]).then(a.cmp(&b)));
        if descending {
            self.hits.reverse();
        }
    }
}

impl ResultSet for LineConcordance {
    fn size(&self) -> u64 {
        self.hits.len() as u64
    }

    fn full_size(&self) -> u64 {
        self.full_size
    }

    fn finished(&self) -> bool {
        self.finished
    }

    fn advance(&mut self) -> EngineResult<()> {
        if self.finished {
            return Ok(());
        }
        let end = (self.next_line + SCAN_CHUNK).min(self.lines.len());
        for index in self.next_line..end {
            if !self.lines[index].contains(self.needle.as_str()) {
                continue;
            }
            let keep = match self.sample.as_mut() {
                Some(sample) => sample.keep_next(),
                None => {
                    self.full_size += 1;
                    true
                }
            };
            if keep {
                self.hits.push(index as u32);
            }
        }
        self.next_line = end;
        self.finished = end == self.lines.len();
        Ok(())
    }

    fn apply(&mut self, op: &Operation) -> EngineResult<()> {
        match op.opcode() {
            Opcode::NegativeFilter => self.filter(op.args(), false),
            Opcode::PositiveFilter => self.filter(op.args(), true),
            Opcode::Sort => self.sort(op.args().trim() == "-"),
            Opcode::Shuffle => self.shuffle(op.args()),
            Opcode::RandomSample => {
                let wanted = op.args().trim().parse().map_err(|_| {
                    EngineError::new(format!("random sample size {:?} is not a number", op.args()))
                })?;
                self.reduce(wanted);
            }
            other => {
                return Err(EngineError::new(format!(
                    "'{}' ({}) is not supported by the line engine",
                    other.code(),
                    other.label()
                )));
            }
        }
        Ok(())
    }

    fn save(&self, path: &Path) -> EngineResult<()> {
        let saved = SavedConcordance {
            hits: self.hits.clone(),
            full_size: self.full_size,
            finished: self.finished,
        };
        let json = serde_json::to_vec(&saved).map_err(|e| EngineError::new(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }
}
