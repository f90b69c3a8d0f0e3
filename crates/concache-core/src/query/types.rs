//! Dataset identity, operations and queries.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use crate::error::{Error, Result};

use super::opcode::Opcode;

/// Identity of the data a query runs against.
///
/// The content hash pins the exact version of the (sub)corpus; two identities
/// with the same name but different hashes never share cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetIdentity {
    corpus: String,
    content_hash: String,
}

impl DatasetIdentity {
    pub fn new(corpus: impl Into<String>, content_hash: impl Into<String>) -> Self {
        Self {
            corpus: corpus.into(),
            content_hash: content_hash.into(),
        }
    }

    pub fn corpus(&self) -> &str {
        &self.corpus
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }
}

impl fmt::Display for DatasetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.corpus, self.content_hash)
    }
}

/// One primitive query step: an opcode plus its (uninterpreted) arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Operation {
    opcode: Opcode,
    args: String,
}

impl Operation {
    pub fn new(opcode: Opcode, args: impl Into<String>) -> Self {
        Self {
            opcode,
            args: args.into(),
        }
    }

    /// Parse the wire form `<opcode><args>`, e.g. `q[word="dog"]`.
    pub fn parse(s: &str) -> Result<Self> {
        let mut chars = s.chars();
        let code = chars
            .next()
            .ok_or_else(|| Error::InvalidOperation("empty operation".to_string()))?;
        let opcode = Opcode::from_code(code)
            .ok_or_else(|| Error::InvalidOperation(format!("unknown opcode '{}' in {:?}", code, s)))?;
        Ok(Self::new(opcode, chars.as_str()))
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn args(&self) -> &str {
        &self.args
    }

    pub fn is_volatile(&self) -> bool {
        self.opcode.is_volatile()
    }

    /// The operation an online sample draws from (`Rq...` -> `q...`).
    ///
    /// Returns `Ok(None)` for every other opcode.
    pub fn sample_base(&self) -> Result<Option<Operation>> {
        if self.opcode != Opcode::OnlineSample {
            return Ok(None);
        }
        let base = Operation::parse(&self.args)?;
        if base.opcode == Opcode::OnlineSample {
            return Err(Error::InvalidOperation(format!(
                "nested online sample: {}",
                self
            )));
        }
        Ok(Some(base))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.opcode.code(), self.args)
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Ordered, immutable sequence of operations.
///
/// Each operation applies to the output of the previous one, so every leading
/// slice is itself a meaningful query (a prefix) and a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    ops: Vec<Operation>,
}

impl Query {
    /// Build a query; at least one operation is required.
    pub fn new(ops: Vec<Operation>) -> Result<Self> {
        if ops.is_empty() {
            return Err(Error::EmptyQuery);
        }
        Ok(Self { ops })
    }

    /// Parse every operation from its wire form.
    pub fn parse<I, S>(ops: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ops = ops
            .into_iter()
            .map(|s| Operation::parse(s.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::new(ops)
    }

    pub fn operations(&self) -> &[Operation] {
        &self.ops
    }

    /// The first `len` operations.
    pub fn prefix(&self, len: usize) -> &[Operation] {
        &self.ops[..len.min(self.ops.len())]
    }

    /// Length of the longest prefix free of volatile operations.
    pub fn cacheable_len(&self) -> usize {
        self.ops
            .iter()
            .position(Operation::is_volatile)
            .unwrap_or(self.ops.len())
    }
}

impl Deref for Query {
    type Target = [Operation];

    fn deref(&self) -> &[Operation] {
        &self.ops
    }
}
