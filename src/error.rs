//! Error definitions for assembly and verification.
//!
//! Every variant is a fail-fast rejection of the input: there is no partial
//! result and no recovery. The C emitter is total on verified IR and has no
//! error type of its own.

use thiserror::Error;

use crate::types::PrimKind;
use crate::value::{Position, Value};

/// Errors that can occur while assembling and verifying a function.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("expected a tuple or keyword record, found {found} at {position}")]
    MalformedRecord { found: Value, position: Position },

    #[error("instruction record is empty at {position}")]
    MissingOpcode { position: Position },

    #[error("expected an opcode symbol, found {found} at {position}")]
    NonSymbolOpcode { found: Value, position: Position },

    #[error("unknown opcode '{name}' at {position}")]
    UnknownOpcode { name: String, position: Position },

    #[error("unknown primitive type '{name}' at {position}")]
    UnknownPrimitive { name: String, position: Position },

    #[error("expected a primitive type symbol, found {found} at {position}")]
    NonSymbolPrimitive { found: Value, position: Position },

    #[error("expected a scalar primitive type, found '{name}' at {position}")]
    NonScalarPrimitive { name: String, position: Position },

    #[error("'{opcode}' expects {expected} operands, found {found} at {position}")]
    OperandCountMismatch {
        opcode: String,
        expected: usize,
        found: usize,
        position: Position,
    },

    #[error("'{opcode}' expects at least {expected} operands, found {found} at {position}")]
    TooFewOperands {
        opcode: String,
        expected: usize,
        found: usize,
        position: Position,
    },

    #[error("expected a non-negative integer operand, found {found} at {position}")]
    InvalidOperand { found: Value, position: Position },

    #[error("last instruction must be a jump or a return")]
    MissingTerminator,

    #[error("jump target {target} is out of range ({count} instructions) at {position}")]
    InvalidJumpTarget {
        target: u32,
        count: usize,
        position: Position,
    },

    #[error("argument {argument} of instruction {index} has no carrier instruction")]
    MissingArgumentCarrier { index: usize, argument: u32 },

    #[error("constant index {index} is out of range ({count} pooled constants) at {position}")]
    InvalidConstantIndex {
        index: u32,
        count: usize,
        position: Position,
    },

    #[error("type mismatch: type {expected} vs type {actual} at {position}")]
    TypeMismatch {
        expected: u32,
        actual: u32,
        position: Position,
    },

    #[error("expected an integer register, found {actual} at {position}")]
    ExpectedInteger { actual: PrimKind, position: Position },

    #[error("expected a boolean register, found {actual} at {position}")]
    ExpectedBoolean { actual: PrimKind, position: Position },

    #[error("expected a pointer register, found {actual} at {position}")]
    ExpectedPointer { actual: PrimKind, position: Position },

    #[error("expected a struct register, found {actual} at {position}")]
    ExpectedStruct { actual: PrimKind, position: Position },

    #[error("field index {field} is out of range for type {type_id} with {field_count} fields at {position}")]
    InvalidFieldIndex {
        field: u32,
        type_id: u32,
        field_count: u32,
        position: Position,
    },

    #[error("conflicting return types: type {first} vs type {second} at {position}")]
    ConflictingReturnType {
        first: u32,
        second: u32,
        position: Position,
    },
}

/// Result type for assembly and verification.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_position() {
        let error = Error::UnknownOpcode {
            name: "frobnicate".to_string(),
            position: Position::new(4, 2),
        };
        assert_eq!(error.to_string(), "unknown opcode 'frobnicate' at 4:2");
    }

    #[test]
    fn test_type_mismatch_display() {
        let error = Error::TypeMismatch {
            expected: 0,
            actual: 1,
            position: Position::new(9, 1),
        };
        assert!(error.to_string().contains("type 0 vs type 1"));
    }
}
