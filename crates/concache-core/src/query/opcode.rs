//! Opcode classification.
//!
//! Every primitive step of a query is identified by a single character. The
//! table below is the only place that decides whether an opcode's result may
//! be shared between users.

use std::fmt;

/// Closed set of primitive query operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Query,
    AttrQuery,
    OnlineSample,
    RandomSample,
    Sort,
    Shuffle,
    SubpartsFilter,
    FirstHitFilter,
    NegativeFilter,
    NegativeFilterNoKwic,
    PositiveFilter,
    PositiveFilterNoKwic,
    WordSketchItem,
    Term,
    Gdex,
    GdexScores,
    SwitchKwic,
    AlignedFilter,
    LabelFilter,
    SortLabels,
}

/// Static facts about an opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeInfo {
    pub opcode: Opcode,
    pub code: char,
    pub label: &'static str,
    /// User/session specific: results must never be cached for reuse.
    pub volatile: bool,
}

const fn info(opcode: Opcode, code: char, label: &'static str, volatile: bool) -> OpcodeInfo {
    OpcodeInfo {
        opcode,
        code,
        label,
        volatile,
    }
}

/// Classification table, one row per opcode.
pub const OPCODES: [OpcodeInfo; 20] = [
    info(Opcode::Query, 'q', "Query", false),
    info(Opcode::AttrQuery, 'a', "Query", true),
    info(Opcode::OnlineSample, 'R', "Query", false),
    info(Opcode::RandomSample, 'r', "Random sample", false),
    info(Opcode::Sort, 's', "Sort", false),
    info(Opcode::Shuffle, 'f', "Shuffle", false),
    info(Opcode::SubpartsFilter, 'D', "Subparts filter", false),
    info(
        Opcode::FirstHitFilter,
        'F',
        "Filter all but first hit in the structure",
        false,
    ),
    info(Opcode::NegativeFilter, 'n', "Negative filter", false),
    info(
        Opcode::NegativeFilterNoKwic,
        'N',
        "Negative filter (excluding KWIC)",
        false,
    ),
    info(Opcode::PositiveFilter, 'p', "Positive filter", false),
    info(
        Opcode::PositiveFilterNoKwic,
        'P',
        "Positive filter (excluding KWIC)",
        false,
    ),
    info(Opcode::WordSketchItem, 'w', "Word sketch item", false),
    info(Opcode::Term, 't', "Term", false),
    info(Opcode::Gdex, 'e', "GDEX", false),
    info(Opcode::GdexScores, 'E', "GDEX", true),
    info(Opcode::SwitchKwic, 'x', "Switch KWIC", false),
    info(Opcode::AlignedFilter, 'X', "Filter by aligned corpus", false),
    info(Opcode::LabelFilter, 'L', "Label filter", true),
    info(Opcode::SortLabels, 'g', "Sort labels", true),
];

impl Opcode {
    /// Look up an opcode by its character.
    pub fn from_code(code: char) -> Option<Self> {
        OPCODES.iter().find(|i| i.code == code).map(|i| i.opcode)
    }

    /// Table row for this opcode.
    pub fn info(self) -> &'static OpcodeInfo {
        // The table holds every variant exactly once, in declaration order.
        &OPCODES[self as usize]
    }

    pub fn code(self) -> char {
        self.info().code
    }

    pub fn label(self) -> &'static str {
        self.info().label
    }

    pub fn is_volatile(self) -> bool {
        self.info().volatile
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_matches_declaration_order() {
        for (idx, row) in OPCODES.iter().enumerate() {
            assert_eq!(row.opcode as usize, idx, "row {} out of order", row.code);
            assert_eq!(Opcode::from_code(row.code), Some(row.opcode));
        }
    }

    #[test]
    fn test_volatile_opcodes() {
        let volatile: String = OPCODES
            .iter()
            .filter(|i| i.volatile)
            .map(|i| i.code)
            .collect();
        assert_eq!(volatile, "aELg");
    }

    #[test]
    fn test_unknown_code() {
        assert_eq!(Opcode::from_code('z'), None);
        assert_eq!(Opcode::from_code('Q'), None);
    }
}
