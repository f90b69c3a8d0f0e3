//! End-to-end tests for concache CLI commands.
//!
//! These tests run the binary against small corpora in temporary
//! directories, each with its own cache root.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin for tests

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// A corpus file and a cache root in one temporary directory.
struct TestCorpus {
    temp_dir: TempDir,
    corpus_path: PathBuf,
}

impl TestCorpus {
    fn new(text: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let corpus_path = temp_dir.path().join("animals.txt");
        fs::write(&corpus_path, text).expect("Failed to write corpus");

        Self {
            temp_dir,
            corpus_path,
        }
    }

    fn path(&self) -> &str {
        self.corpus_path.to_str().expect("utf-8 temp path")
    }

    fn cache_dir(&self) -> PathBuf {
        self.temp_dir.path().join("cache")
    }

    fn corpus_cache(&self) -> PathBuf {
        self.cache_dir().join("animals")
    }

    fn rewrite(&self, text: &str) {
        fs::write(&self.corpus_path, text).expect("Failed to rewrite corpus");
    }

    /// `concache <subcommand> <corpus> --cache-dir <cache> [args]`.
    fn cmd(&self, subcommand: &str, args: &[&str]) -> Command {
        let mut cmd = concache_cmd();
        cmd.arg(subcommand)
            .arg(self.path())
            .arg("--cache-dir")
            .arg(self.cache_dir())
            .args(args);
        cmd
    }
}

fn concache_cmd() -> Command {
    let mut cmd = Command::cargo_bin("concache").unwrap();
    cmd.env_remove("CONCACHE_CACHE_DIR").env_remove("RUST_LOG");
    cmd
}

const ANIMALS: &str = "\
the dog barks
a cat sleeps
the dog sleeps
hot dog stand
a bird sings
dog days
";

fn cache_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.path().extension().is_some_and(|x| x == "conc"))
                .count()
        })
        .unwrap_or(0)
}

// =============================================================================
// Help
// =============================================================================

#[test]
fn test_help_lists_commands() {
    concache_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("query"))
        .stdout(predicate::str::contains("sizes"))
        .stdout(predicate::str::contains("describe"))
        .stdout(predicate::str::contains("clean"));
}

// =============================================================================
// Query
// =============================================================================

#[test]
fn test_query_prints_sizes_and_lines() {
    let corpus = TestCorpus::new(ANIMALS);

    corpus
        .cmd("query", &["-q", "qdog"])
        .assert()
        .success()
        .stdout(predicate::str::contains("finished: 1"))
        .stdout(predicate::str::contains("size: 4"))
        .stdout(predicate::str::contains("full size: 4"))
        .stdout(predicate::str::contains("hot dog stand"))
        .stdout(predicate::str::contains("a cat sleeps").not());

    assert_eq!(cache_files(&corpus.corpus_cache()), 1);
}

#[test]
fn test_query_caches_every_prefix() {
    let corpus = TestCorpus::new(ANIMALS);

    corpus
        .cmd("query", &["-q", "qdog", "-q", "nsleeps", "-q", "s"])
        .assert()
        .success()
        .stdout(predicate::str::contains("size: 3"));

    assert_eq!(cache_files(&corpus.corpus_cache()), 3);
}

#[test]
fn test_query_volatile_operation_is_not_cached() {
    let corpus = TestCorpus::new(ANIMALS);

    // The line engine cannot run a label filter, but the prefix before it
    // is still cached.
    corpus
        .cmd("query", &["-q", "qdog", "-q", "L0 1"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("size: 0"))
        .stderr(predicate::str::contains("computation failed at operation 'L0 1'"));

    assert_eq!(cache_files(&corpus.corpus_cache()), 1);
}

#[test]
fn test_query_no_cache_writes_nothing() {
    let corpus = TestCorpus::new(ANIMALS);

    corpus
        .cmd("query", &["-q", "qdog", "--no-cache"])
        .assert()
        .success()
        .stdout(predicate::str::contains("size: 4"));

    assert_eq!(cache_files(&corpus.corpus_cache()), 0);
}

#[test]
fn test_query_async_finishes() {
    let corpus = TestCorpus::new(ANIMALS);

    corpus
        .cmd("query", &["-q", "qdog", "--async"])
        .assert()
        .success()
        .stdout(predicate::str::contains("finished: 1"))
        .stdout(predicate::str::contains("size: 4"));
}

#[test]
fn test_async_query_outlives_caller() {
    let text: String = (0..400_000)
        .map(|i| if i % 3 == 0 { "the dog\n" } else { "a cat\n" })
        .collect();
    let corpus = TestCorpus::new(&text);

    corpus
        .cmd("query", &["-q", "qdog", "--async", "--no-follow", "--min-size", "1", "--lines", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("size:"));

    // The caller is gone; the worker process still commits.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(60);
    loop {
        let output = corpus.cmd("sizes", &["-q", "qdog"]).output().unwrap();
        if String::from_utf8_lossy(&output.stdout).contains("finished: 1\nsize: 133334") {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "background query never finished");
        std::thread::sleep(std::time::Duration::from_millis(100));
    }
    assert_eq!(cache_files(&corpus.corpus_cache()), 1);

    let logs = fs::read_dir(corpus.corpus_cache().join("run"))
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|x| x == "log"))
        .count();
    assert_eq!(logs, 1);
}

#[test]
fn test_no_follow_needs_async() {
    let corpus = TestCorpus::new(ANIMALS);
    corpus.cmd("query", &["-q", "qdog", "--no-follow"]).assert().failure();
}

#[test]
fn test_hidden_corpus_file_is_refused() {
    let corpus = TestCorpus::new(ANIMALS);
    let hidden = corpus.temp_dir.path().join(".hidden.txt");
    fs::write(&hidden, ANIMALS).unwrap();

    for subcommand in ["query", "clean"] {
        let mut cmd = concache_cmd();
        cmd.arg(subcommand).arg(&hidden).arg("--cache-dir").arg(corpus.cache_dir());
        if subcommand == "query" {
            cmd.args(["-q", "qdog"]);
        }
        cmd.assert()
            .failure()
            .stderr(predicate::str::contains("Cannot name a corpus"));
    }
}

#[test]
fn test_query_online_sample() {
    let corpus = TestCorpus::new(ANIMALS);

    corpus
        .cmd("query", &["-q", "Rqdog", "--sample", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("size: 2"))
        .stdout(predicate::str::contains("full size: 4"));
}

#[test]
fn test_query_unknown_opcode_shows_hint() {
    let corpus = TestCorpus::new(ANIMALS);

    corpus
        .cmd("query", &["-q", "zdog"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown opcode"))
        .stderr(predicate::str::contains("hint:"));
}

#[test]
fn test_query_missing_corpus() {
    let temp = TempDir::new().unwrap();
    concache_cmd()
        .arg("query")
        .arg(temp.path().join("nope.txt"))
        .args(["-q", "qdog"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Corpus not found"));
}

// =============================================================================
// Sizes
// =============================================================================

#[test]
fn test_sizes_miss_then_hit() {
    let corpus = TestCorpus::new(ANIMALS);

    corpus
        .cmd("sizes", &["-q", "qdog"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No cached or running concordance"));

    corpus.cmd("query", &["-q", "qdog"]).assert().success();

    // 4 hits in 6 positions
    corpus
        .cmd("sizes", &["-q", "qdog"])
        .assert()
        .success()
        .stdout(predicate::str::contains("finished: 1\nsize: 4\nrelative size: 666666.67\nfull size: 4"));
}

#[test]
fn test_rewritten_corpus_misses() {
    let corpus = TestCorpus::new(ANIMALS);
    corpus.cmd("query", &["-q", "qdog"]).assert().success();

    corpus.rewrite("dog\n");
    corpus.cmd("sizes", &["-q", "qdog"]).assert().failure();

    corpus
        .cmd("query", &["-q", "qdog"])
        .assert()
        .success()
        .stdout(predicate::str::contains("size: 1"));
}

// =============================================================================
// Describe and clean
// =============================================================================

#[test]
fn test_describe_shows_cached_sizes() {
    let corpus = TestCorpus::new(ANIMALS);
    corpus
        .cmd("query", &["-q", "qdog", "-q", "r2"])
        .assert()
        .success();

    corpus
        .cmd("describe", &["-q", "qdog", "-q", "r2", "-q", "L0 0 -5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dog"))
        .stdout(predicate::str::contains("[4]"))
        .stdout(predicate::str::contains("Random sample"))
        .stdout(predicate::str::contains("[2]"))
        .stdout(predicate::str::contains("Label filter"))
        .stdout(predicate::str::contains(": 5  [-]"));
}

#[test]
fn test_clean_removes_cache() {
    let corpus = TestCorpus::new(ANIMALS);
    corpus.cmd("query", &["-q", "qdog"]).assert().success();
    assert_eq!(cache_files(&corpus.corpus_cache()), 1);

    corpus
        .cmd("clean", &[])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleaned"));

    assert_eq!(cache_files(&corpus.corpus_cache()), 0);
    corpus.cmd("sizes", &["-q", "qdog"]).assert().failure();
}

// =============================================================================
// Multiple processes
// =============================================================================

#[test]
fn test_parallel_processes_agree() {
    let text: String = (0..200_000)
        .map(|i| if i % 7 == 0 { "the dog\n" } else { "a cat\n" })
        .collect();
    let corpus = TestCorpus::new(&text);
    let bin = assert_cmd::cargo::cargo_bin("concache");

    let children: Vec<_> = (0..4)
        .map(|_| {
            std::process::Command::new(&bin)
                .env_remove("CONCACHE_CACHE_DIR")
                .arg("query")
                .arg(corpus.path())
                .arg("--cache-dir")
                .arg(corpus.cache_dir())
                .args(["-q", "qdog", "--lines", "0"])
                .stdout(std::process::Stdio::piped())
                .spawn()
                .expect("failed to run concache")
        })
        .collect();

    for child in children {
        let output = child.wait_with_output().unwrap();
        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("size: 28572"), "unexpected output: {}", stdout);
    }
    assert_eq!(cache_files(&corpus.corpus_cache()), 1);
}
