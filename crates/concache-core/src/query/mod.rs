//! Query model: dataset identities, operations and the opcode table.

mod opcode;
mod types;

pub use opcode::{OPCODES, Opcode, OpcodeInfo};
pub use types::{DatasetIdentity, Operation, Query};
