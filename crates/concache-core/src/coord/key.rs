//! Cache keys for query prefixes.

use std::fmt;
use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use crate::query::{DatasetIdentity, Operation};

/// Key of one (dataset identity, query prefix) slot.
///
/// The digest names files on disk; the full operation list travels with it so
/// a digest collision is detected instead of served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixKey {
    identity: DatasetIdentity,
    operations: Vec<String>,
    digest: String,
}

impl PrefixKey {
    pub fn new(identity: &DatasetIdentity, ops: &[Operation]) -> Self {
        let operations: Vec<String> = ops.iter().map(ToString::to_string).collect();

        // FxHasher is unseeded, so digests agree across processes.
        let mut hasher = FxHasher::default();
        identity.content_hash().hash(&mut hasher);
        operations.hash(&mut hasher);
        let digest = format!("{:016x}", hasher.finish());

        Self {
            identity: identity.clone(),
            operations,
            digest,
        }
    }

    pub fn identity(&self) -> &DatasetIdentity {
        &self.identity
    }

    pub fn operations(&self) -> &[String] {
        &self.operations
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Number of operations in the prefix.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl fmt::Display for PrefixKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.identity, self.operations.join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Query;

    fn ops(raw: &[&str]) -> Vec<Operation> {
        Query::parse(raw).unwrap().operations().to_vec()
    }

    #[test]
    fn test_digest_is_stable() {
        let id = DatasetIdentity::new("bnc", "h1");
        let a = PrefixKey::new(&id, &ops(&["q[word=\"dog\"]"]));
        let b = PrefixKey::new(&id, &ops(&["q[word=\"dog\"]"]));
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 16);
    }

    #[test]
    fn test_digest_depends_on_hash_and_ops() {
        let h1 = DatasetIdentity::new("bnc", "h1");
        let h2 = DatasetIdentity::new("bnc", "h2");
        let q = ops(&["q[word=\"dog\"]", "r10"]);

        let base = PrefixKey::new(&h1, &q);
        assert_ne!(base.digest(), PrefixKey::new(&h2, &q).digest());
        assert_ne!(base.digest(), PrefixKey::new(&h1, &q[..1]).digest());
    }

    #[test]
    fn test_operation_boundaries_matter() {
        let id = DatasetIdentity::new("bnc", "h1");
        let split = PrefixKey::new(&id, &ops(&["qab", "r1"]));
        let joined = PrefixKey::new(&id, &ops(&["qabr1"]));
        assert_ne!(split.digest(), joined.digest());
    }
}
