//! Scripted query executor shared by the integration tests.
//!
//! The first operation's arguments script the computation:
//! `q<hits> [step=N] [delay=MS] [fail=N]` grows by `step` hits per
//! `advance` (sleeping `delay` ms each time) until `hits` are found, and
//! fails once `fail` hits are reached. Later operations: `r<N>` keeps the
//! first N hits, anything with `fail` in its arguments errors, everything
//! else leaves the size unchanged.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use concache_core::{
    CacheConfig, ConcordanceService, DatasetIdentity, EngineError, EngineResult, Opcode, Operation,
    Query, QueryExecutor, ResultSet, Sampling,
};
use tempfile::TempDir;

pub const SEARCH_SIZE: u64 = 1_000_000;

#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    computations: AtomicUsize,
    applied: Arc<Mutex<Vec<String>>>,
}

impl ScriptedExecutor {
    /// Number of `apply_first` calls so far.
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::SeqCst)
    }

    /// Every subsequent operation applied so far, in order.
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }
}

impl QueryExecutor for ScriptedExecutor {
    type ResultSet = ScriptedSet;

    fn apply_first(
        &self,
        _identity: &DatasetIdentity,
        op: &Operation,
        sampling: Sampling,
    ) -> EngineResult<ScriptedSet> {
        self.computations.fetch_add(1, Ordering::SeqCst);

        let base = op
            .sample_base()
            .map_err(|e| EngineError::new(e.to_string()))?;
        let script = base.as_ref().map_or(op.args(), Operation::args);
        let mut set = ScriptedSet::parse(script)?;
        set.applied = Some(Arc::clone(&self.applied));

        if sampling.sample_size > 0 && sampling.sample_size < set.target {
            set.target = sampling.sample_size;
        }
        if let Some(full_size) = sampling.full_size {
            set.full_size = full_size;
        }
        Ok(set)
    }

    fn load(&self, _identity: &DatasetIdentity, path: &Path) -> EngineResult<ScriptedSet> {
        let text = fs::read_to_string(path)?;
        let fields: Vec<u64> = text
            .split_whitespace()
            .map(|t| t.parse::<u64>())
            .collect::<Result<_, _>>()
            .map_err(|e| EngineError::new(format!("corrupt concordance file: {}", e)))?;
        match fields.as_slice() {
            [size, full_size, finished] => Ok(ScriptedSet {
                size: *size,
                target: *size,
                full_size: *full_size,
                finished: *finished == 1,
                applied: Some(Arc::clone(&self.applied)),
                ..ScriptedSet::default()
            }),
            _ => Err(EngineError::new("corrupt concordance file")),
        }
    }

    fn search_size(&self, _identity: &DatasetIdentity) -> Option<u64> {
        Some(SEARCH_SIZE)
    }
}

/// Result set growing by a fixed step per `advance`.
#[derive(Debug, Default)]
pub struct ScriptedSet {
    size: u64,
    target: u64,
    full_size: u64,
    step: u64,
    delay: Duration,
    fail_at: Option<u64>,
    finished: bool,
    applied: Option<Arc<Mutex<Vec<String>>>>,
}

impl ScriptedSet {
    fn parse(script: &str) -> EngineResult<Self> {
        let mut tokens = script.split_whitespace();
        let target: u64 = tokens
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| EngineError::new(format!("bad script {:?}", script)))?;

        let mut set = ScriptedSet {
            target,
            full_size: target,
            step: target.max(1),
            ..ScriptedSet::default()
        };
        for token in tokens {
            let (name, value) = token
                .split_once('=')
                .ok_or_else(|| EngineError::new(format!("bad token {:?}", token)))?;
            let value: u64 = value
                .parse()
                .map_err(|_| EngineError::new(format!("bad value {:?}", token)))?;
            match name {
                "step" => set.step = value.max(1),
                "delay" => set.delay = Duration::from_millis(value),
                "fail" => set.fail_at = Some(value),
                _ => return Err(EngineError::new(format!("unknown setting {:?}", name))),
            }
        }
        Ok(set)
    }
}

impl ResultSet for ScriptedSet {
    fn size(&self) -> u64 {
        self.size
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
        thread::sleep(self.delay);
        self.size = (self.size + self.step).min(self.target);
        if self.fail_at.is_some_and(|n| self.size >= n) {
            return Err(EngineError::new(format!("scripted failure at {} hits", self.size)));
        }
        self.finished = self.size == self.target;
        Ok(())
    }

    fn apply(&mut self, op: &Operation) -> EngineResult<()> {
        if let Some(applied) = &self.applied {
            applied.lock().unwrap().push(op.to_string());
        }
        if op.args().contains("fail") {
            return Err(EngineError::new(format!("scripted failure in {}", op)));
        }
        if op.opcode() == Opcode::RandomSample {
            let n: u64 = op
                .args()
                .trim()
                .parse()
                .map_err(|_| EngineError::new(format!("bad sample size in {}", op)))?;
            self.size = self.size.min(n);
        }
        Ok(())
    }

    fn save(&self, path: &Path) -> EngineResult<()> {
        let finished = u64::from(self.finished);
        fs::write(path, format!("{} {} {}", self.size, self.full_size, finished))?;
        Ok(())
    }
}

/// A service over a fresh cache root, plus a handle on its executor.
pub struct Harness {
    pub service: ConcordanceService<ScriptedExecutor>,
    pub executor: Arc<ScriptedExecutor>,
    temp: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    pub fn with_config(configure: impl FnOnce(CacheConfig) -> CacheConfig) -> Self {
        let temp = TempDir::new().unwrap();
        let config = configure(
            CacheConfig::new(temp.path()).with_poll_interval(Duration::from_millis(5)),
        );
        let executor = Arc::new(ScriptedExecutor::default());
        let service = ConcordanceService::with_shared(Arc::clone(&executor), config);
        Self {
            service,
            executor,
            temp,
        }
    }

    pub fn cache_root(&self) -> &Path {
        self.temp.path()
    }
}

pub fn identity(hash: &str) -> DatasetIdentity {
    DatasetIdentity::new("corpusA", hash)
}

pub fn query(ops: &[&str]) -> Query {
    Query::parse(ops).unwrap()
}
