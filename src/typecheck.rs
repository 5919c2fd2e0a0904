//! Per-instruction type verification.
//!
//! Runs after the type environment is fully materialized and before any
//! emission. Checks are purely local to each instruction except for return
//! types, which must agree across the whole body; the common return type is
//! the verifier's one piece of inferred output.
//!
//! Comparisons require the destination, left, and right operands to share
//! one type, and that shared type must be boolean.

use log::debug;

use crate::error::{Error, Result};
use crate::instruction::{Insn, Instruction};
use crate::types::{PrimKind, TypeEnv};
use crate::value::Position;

/// Verify every instruction and infer the function return type-id.
pub fn check(instructions: &[Insn], env: &TypeEnv) -> Result<u32> {
    let mut checker = Checker { env, return_type: None };
    for insn in instructions {
        checker.check_insn(insn)?;
    }
    let return_type = checker.return_type.unwrap_or(0);
    debug!("verified {} instructions, return type {}", instructions.len(), return_type);
    Ok(return_type)
}

struct Checker<'a> {
    env: &'a TypeEnv,
    return_type: Option<u32>,
}

impl Checker<'_> {
    fn check_insn(&mut self, insn: &Insn) -> Result<()> {
        let position = insn.position;
        match insn.op {
            Instruction::Binary { op, dest, lhs, rhs } => {
                if op.requires_integer() {
                    self.integer(lhs, position)?;
                }
                self.equal(lhs, rhs, position)?;
                self.equal(dest, lhs, position)?;
                if op.is_comparison() {
                    self.boolean(dest, position)?;
                }
                Ok(())
            }
            Instruction::Move { dest, src } => self.equal(dest, src, position),
            // A cast reinterprets; nothing to verify
            Instruction::Cast { .. } => Ok(()),
            Instruction::BitNot { dest, src } => {
                self.integer(src, position)?;
                self.equal(dest, src, position)
            }
            Instruction::Address { dest, .. } => self.pointer(dest, position),
            Instruction::Load { src, .. } => self.pointer(src, position),
            Instruction::Store { dest, .. } => self.pointer(dest, position),
            Instruction::Jump { .. } => Ok(()),
            Instruction::Branch { cond, .. } => self.boolean(cond, position),
            Instruction::Return { src } => self.check_return(src, position),
            Instruction::Constant { .. } => Ok(()),
            Instruction::Call { callee, .. } => self.pointer(callee, position),
            // No signature table exists for named targets yet
            Instruction::CallNamed { .. } => Ok(()),
            Instruction::Args { .. }
            | Instruction::TypePrim { .. }
            | Instruction::TypeStruct { .. }
            | Instruction::Bind { .. } => Ok(()),
            Instruction::FieldGet { dest, object, field } => {
                self.field(object, field, dest, position)
            }
            Instruction::FieldSet { object, field, src } => {
                self.field(object, field, src, position)
            }
        }
    }

    /// The first return fixes the function return type; every later one
    /// must produce the same type-id.
    fn check_return(&mut self, src: u32, position: Position) -> Result<()> {
        let ty = self.env.register_type(src);
        match self.return_type {
            None => {
                self.return_type = Some(ty);
                Ok(())
            }
            Some(expected) if expected == ty => Ok(()),
            Some(expected) => Err(Error::ConflictingReturnType {
                first: expected,
                second: ty,
                position,
            }),
        }
    }

    /// A field access checks three things: the object really is a struct,
    /// the index is inside its field slice, and the declared field type
    /// matches the register on the other side.
    fn field(&self, object: u32, field: u32, register: u32, position: Position) -> Result<()> {
        let object_type = self.env.register_type(object);
        let def = self.env.type_defs[object_type as usize];
        if def.prim != PrimKind::Struct {
            return Err(Error::ExpectedStruct { actual: def.prim, position });
        }
        if field >= def.field_count {
            return Err(Error::InvalidFieldIndex {
                field,
                type_id: object_type,
                field_count: def.field_count,
                position,
            });
        }
        let slot = self.env.fields[(def.field_start + field) as usize];
        let register_type = self.env.register_type(register);
        if slot.type_id != register_type {
            return Err(Error::TypeMismatch {
                expected: slot.type_id,
                actual: register_type,
                position,
            });
        }
        Ok(())
    }

    fn equal(&self, a: u32, b: u32, position: Position) -> Result<()> {
        let type_a = self.env.register_type(a);
        let type_b = self.env.register_type(b);
        if type_a != type_b {
            return Err(Error::TypeMismatch {
                expected: type_a,
                actual: type_b,
                position,
            });
        }
        Ok(())
    }

    fn integer(&self, register: u32, position: Position) -> Result<()> {
        let prim = self.env.prim_of(self.env.register_type(register));
        if !prim.is_integer() {
            return Err(Error::ExpectedInteger { actual: prim, position });
        }
        Ok(())
    }

    fn boolean(&self, register: u32, position: Position) -> Result<()> {
        let prim = self.env.prim_of(self.env.register_type(register));
        if prim != PrimKind::Boolean {
            return Err(Error::ExpectedBoolean { actual: prim, position });
        }
        Ok(())
    }

    fn pointer(&self, register: u32, position: Position) -> Result<()> {
        let prim = self.env.prim_of(self.env.register_type(register));
        if prim != PrimKind::Pointer {
            return Err(Error::ExpectedPointer { actual: prim, position });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::BinaryOp;
    use crate::value::Position;

    fn insn(op: Instruction) -> Insn {
        Insn::new(op, Position::default())
    }

    fn env_of(instructions: &[Insn], registers: u32, types: u32) -> TypeEnv {
        TypeEnv::build(instructions, registers, types).unwrap()
    }

    #[test]
    fn test_arithmetic_requires_matching_types() {
        let instructions = [
            insn(Instruction::TypePrim { dest: 1, prim: PrimKind::F32 }),
            insn(Instruction::Bind { register: 1, type_id: 1 }),
            insn(Instruction::Binary { op: BinaryOp::Add, dest: 0, lhs: 0, rhs: 1 }),
            insn(Instruction::Return { src: 0 }),
        ];
        let env = env_of(&instructions, 2, 2);
        let result = check(&instructions, &env);
        assert!(matches!(
            result,
            Err(Error::TypeMismatch { expected: 0, actual: 1, .. })
        ));
    }

    #[test]
    fn test_bitwise_requires_integers() {
        let instructions = [
            insn(Instruction::TypePrim { dest: 1, prim: PrimKind::F64 }),
            insn(Instruction::Bind { register: 0, type_id: 1 }),
            insn(Instruction::Bind { register: 1, type_id: 1 }),
            insn(Instruction::Bind { register: 2, type_id: 1 }),
            insn(Instruction::Binary { op: BinaryOp::BitwiseAnd, dest: 2, lhs: 0, rhs: 1 }),
        ];
        let env = env_of(&instructions, 3, 2);
        assert!(matches!(
            check(&instructions, &env),
            Err(Error::ExpectedInteger { actual: PrimKind::F64, .. })
        ));
    }

    #[test]
    fn test_comparison_operands_share_the_boolean_type() {
        // dest, lhs, and rhs must all carry the boolean type
        let instructions = [
            insn(Instruction::Binary { op: BinaryOp::LessThan, dest: 2, lhs: 0, rhs: 1 }),
            insn(Instruction::Return { src: 2 }),
        ];
        let env = env_of(&instructions, 3, 1);
        assert!(matches!(
            check(&instructions, &env),
            Err(Error::ExpectedBoolean { actual: PrimKind::S32, .. })
        ));

        let instructions = [
            insn(Instruction::TypePrim { dest: 1, prim: PrimKind::Boolean }),
            insn(Instruction::Bind { register: 0, type_id: 1 }),
            insn(Instruction::Bind { register: 1, type_id: 1 }),
            insn(Instruction::Bind { register: 2, type_id: 1 }),
            insn(Instruction::Binary { op: BinaryOp::LessThan, dest: 2, lhs: 0, rhs: 1 }),
            insn(Instruction::Return { src: 2 }),
        ];
        let env = env_of(&instructions, 3, 2);
        assert_eq!(check(&instructions, &env), Ok(1));
    }

    #[test]
    fn test_branch_condition_must_be_boolean() {
        let instructions = [
            insn(Instruction::Branch { cond: 0, to: 1 }),
            insn(Instruction::Return { src: 0 }),
        ];
        let env = env_of(&instructions, 1, 1);
        assert!(matches!(
            check(&instructions, &env),
            Err(Error::ExpectedBoolean { actual: PrimKind::S32, .. })
        ));
    }

    #[test]
    fn test_load_requires_pointer_source() {
        let instructions = [insn(Instruction::Load { dest: 0, src: 1 })];
        let env = env_of(&instructions, 2, 1);
        assert!(matches!(
            check(&instructions, &env),
            Err(Error::ExpectedPointer { actual: PrimKind::S32, .. })
        ));
    }

    #[test]
    fn test_return_types_must_agree() {
        let instructions = [
            insn(Instruction::TypePrim { dest: 1, prim: PrimKind::U8 }),
            insn(Instruction::Bind { register: 1, type_id: 1 }),
            insn(Instruction::Return { src: 0 }),
            insn(Instruction::Return { src: 1 }),
        ];
        let env = env_of(&instructions, 2, 2);
        assert!(matches!(
            check(&instructions, &env),
            Err(Error::ConflictingReturnType { first: 0, second: 1, .. })
        ));
    }

    #[test]
    fn test_unbound_return_register_defaults_to_type_zero() {
        let instructions = [insn(Instruction::Return { src: 4 })];
        let env = env_of(&instructions, 5, 1);
        assert_eq!(check(&instructions, &env), Ok(0));
    }

    #[test]
    fn test_jump_only_body_defaults_to_type_zero() {
        let instructions = [insn(Instruction::Jump { to: 0 })];
        let env = env_of(&instructions, 0, 1);
        assert_eq!(check(&instructions, &env), Ok(0));
    }

    #[test]
    fn test_field_access_checks_index_and_type() {
        let instructions = [
            insn(Instruction::TypeStruct { dest: 1, field_count: 1 }),
            insn(Instruction::Args { values: [0, 0, 0] }),
            insn(Instruction::Bind { register: 0, type_id: 1 }),
            insn(Instruction::FieldGet { dest: 1, object: 0, field: 2 }),
        ];
        let env = env_of(&instructions, 2, 2);
        assert!(matches!(
            check(&instructions, &env),
            Err(Error::InvalidFieldIndex { field: 2, field_count: 1, .. })
        ));
    }

    #[test]
    fn test_field_access_on_scalar_is_rejected() {
        let instructions = [insn(Instruction::FieldSet { object: 0, field: 0, src: 1 })];
        let env = env_of(&instructions, 2, 1);
        assert!(matches!(
            check(&instructions, &env),
            Err(Error::ExpectedStruct { actual: PrimKind::S32, .. })
        ));
    }
}
