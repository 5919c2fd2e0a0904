//! Typed register-based intermediate representation with a C backend.
//!
//! The crate assembles a front-end's instruction records into a compact,
//! verified IR and lowers it to a self-contained C translation unit. The
//! pipeline is strictly forward: record parsing discovers registers, types,
//! and pooled constants; the type environment is materialized; every
//! instruction is checked; and only then does the backend print C. A
//! verified [`IrFunction`] is immutable and owns all of its arrays.
//!
//! ```
//! use regir::{assemble, to_c, Program, Record, Value};
//!
//! let program = Program {
//!     instructions: vec![
//!         Record::new(Value::Tuple(vec![Value::symbol("prim"), 0.into(), Value::symbol("s32")])),
//!         Record::new(Value::Tuple(vec![Value::symbol("add"), 2.into(), 0.into(), 1.into()])),
//!         Record::new(Value::Tuple(vec![Value::symbol("return"), 2.into()])),
//!     ],
//!     parameter_count: 2,
//!     link_name: "add2".to_string(),
//! };
//! let ir = assemble(&program).unwrap();
//! assert!(to_c(&ir).contains("_r2 = _r0 + _r1;"));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod assembler;
pub mod codegen;
pub mod error;
pub mod instruction;
pub mod typecheck;
pub mod types;
pub mod value;

// Re-export main types
pub use assembler::assemble;
pub use codegen::{emit_c, to_c};
pub use error::{Error, Result};
pub use instruction::{BinaryOp, Insn, Instruction, Opcode};
pub use types::{Field, PrimKind, TypeDef, TypeEnv};
pub use value::{Position, Record, Value};

/// The input side of the pipeline: a function body as instruction records,
/// plus the metadata needed to emit its signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Program {
    pub instructions: Vec<Record>,
    pub parameter_count: u32,
    pub link_name: String,
}

/// A verified, immutable IR function: the output of [`assemble`] and the
/// input of [`emit_c`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrFunction {
    /// The C identifier emitted for the function.
    pub link_name: String,
    /// The first `parameter_count` registers are the parameters, in order.
    pub parameter_count: u32,
    pub instructions: Vec<Insn>,
    /// Highest register index referenced, plus one.
    pub register_count: u32,
    /// Flat type-def table; type-id 0 is the `s32` default.
    pub type_defs: Vec<TypeDef>,
    /// Shared struct field table.
    pub fields: Vec<Field>,
    /// Interned constant pool in insertion order.
    pub constants: Vec<Value>,
    /// Type-id per register.
    pub register_types: Vec<u32>,
    /// Common type-id of every `return`, inferred by the verifier.
    pub return_type: u32,
}

impl IrFunction {
    /// The type-id bound to a register.
    pub fn register_type(&self, register: u32) -> u32 {
        self.register_types[register as usize]
    }

    /// The field slice owned by a struct type-def.
    pub fn struct_fields(&self, def: &TypeDef) -> &[Field] {
        let start = def.field_start as usize;
        &self.fields[start..start + def.field_count as usize]
    }
}

impl fmt::Display for IrFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "; function {} ({} params, return type {})",
            self.link_name, self.parameter_count, self.return_type
        )?;
        for (index, insn) in self.instructions.iter().enumerate() {
            writeln!(f, "{:3}: {}", index, insn)?;
        }
        Ok(())
    }
}
