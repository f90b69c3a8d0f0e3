//! Human-readable description of a query and its cached prefixes.

use crate::coord::ClaimState;
use crate::engine::QueryExecutor;
use crate::error::Result;
use crate::pipeline::ConcordanceService;
use crate::query::{DatasetIdentity, Opcode, Operation, Query};

/// One line of a query description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSummary {
    pub opcode: Opcode,
    pub label: String,
    /// Arguments as shown to the user.
    pub args: String,
    /// Attribute a query searches by default (`q` and `a` only).
    pub default_attr: Option<String>,
    /// Size of the prefix ending here, when it is cached.
    pub size: Option<u64>,
}

impl OperationSummary {
    /// Summarize the `index`-th operation of a query.
    pub fn new(index: usize, op: &Operation) -> Self {
        let opcode = op.opcode();
        let mut label = opcode.label().to_string();
        let mut args = op.args().to_string();
        let mut default_attr = None;

        match opcode {
            Opcode::LabelFilter => {
                if let Some(n) = op
                    .args()
                    .split_whitespace()
                    .last()
                    .and_then(|t| t.parse::<i64>().ok())
                {
                    args = n.unsigned_abs().to_string();
                }
            }
            Opcode::Query => default_attr = Some("word".to_string()),
            Opcode::AttrQuery => {
                if let Some((attr, cql)) = op.args().split_once(',') {
                    default_attr = Some(attr.to_string());
                    args = cql.to_string();
                }
            }
            Opcode::Sort => {
                if index > 0 && !args.starts_with('*') && args.split_whitespace().count() > 2 {
                    label = "Multilevel Sort".to_string();
                }
            }
            _ => {}
        }

        Self {
            opcode,
            label,
            args,
            default_attr,
            size: None,
        }
    }
}

impl<E: QueryExecutor> ConcordanceService<E> {
    /// Describe each operation of `query`, with cached sizes where known.
    ///
    /// Never starts a computation.
    pub fn describe(&self, identity: &DatasetIdentity, query: &Query) -> Result<Vec<OperationSummary>> {
        query
            .iter()
            .enumerate()
            .map(|(i, op)| {
                let mut summary = OperationSummary::new(i, op);
                if let ClaimState::Done(entry) = self.map().lookup(identity, query.prefix(i + 1))? {
                    summary.size = Some(entry.size);
                }
                Ok(summary)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(index: usize, raw: &str) -> OperationSummary {
        OperationSummary::new(index, &Operation::parse(raw).unwrap())
    }

    #[test]
    fn test_label_filter_shows_label_number() {
        let s = summary(1, "L0 0 -3");
        assert_eq!(s.label, "Label filter");
        assert_eq!(s.args, "3");
    }

    #[test]
    fn test_multilevel_sort() {
        assert_eq!(summary(1, "s word/i 0 tag 1").label, "Multilevel Sort");
        assert_eq!(summary(0, "s word/i 0 tag 1").label, "Sort");
        assert_eq!(summary(1, "s*word 0 tag").label, "Sort");
        assert_eq!(summary(1, "s word/ 0").label, "Sort");
    }

    #[test]
    fn test_query_default_attribute() {
        let q = summary(0, "q[word=\"dog\"]");
        assert_eq!(q.default_attr.as_deref(), Some("word"));

        let a = summary(0, "alemma,\"run\"");
        assert_eq!(a.default_attr.as_deref(), Some("lemma"));
        assert_eq!(a.args, "\"run\"");
    }
}
