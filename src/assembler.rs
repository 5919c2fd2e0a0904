//! Record parsing: instruction records in, a verified [`IrFunction`] out.
//!
//! The assembler runs the whole pipeline: it decodes every record into the
//! compact instruction array, interns call targets and constants into the
//! pool, discovers the register and type-def counts, materializes the type
//! environment, and hands the result to the type checker. On success the
//! caller receives an immutable [`IrFunction`]; on any failure nothing is
//! produced.

use indexmap::{IndexMap, IndexSet};
use log::{debug, trace};

use crate::error::{Error, Result};
use crate::instruction::{BinaryOp, Insn, Instruction, Opcode};
use crate::typecheck;
use crate::types::{PrimKind, TypeEnv};
use crate::value::{Position, Record, Value};
use crate::{IrFunction, Program};

/// Assemble, verify, and type-check one input program.
pub fn assemble(program: &Program) -> Result<IrFunction> {
    let mut assembler = Assembler::new();
    for record in &program.instructions {
        assembler.push_record(record)?;
    }
    assembler.finish(program)
}

/// Parser state for one function body.
struct Assembler {
    instructions: Vec<Insn>,
    register_count: u32,
    type_count: u32,
    /// Interned constant pool; insertion order is the emission order.
    constants: IndexSet<Value>,
    /// Reserved hook for named labels; nothing populates it yet, so label
    /// operands fall through to raw instruction indices.
    labels: IndexMap<String, u32>,
}

impl Assembler {
    fn new() -> Self {
        Self {
            instructions: Vec::new(),
            register_count: 0,
            type_count: 0,
            constants: IndexSet::new(),
            labels: IndexMap::new(),
        }
    }

    fn push_record(&mut self, record: &Record) -> Result<()> {
        let position = record.position();
        match &record.body {
            Value::Keyword(name) => {
                // Label markers are accepted and skipped
                trace!("skipping marker :{}", name);
                Ok(())
            }
            Value::Tuple(items) => self.push_tuple(items, position),
            other => Err(Error::MalformedRecord { found: other.clone(), position }),
        }
    }

    fn push_tuple(&mut self, items: &[Value], position: Position) -> Result<()> {
        let head = items.first().ok_or(Error::MissingOpcode { position })?;
        let name = head
            .as_symbol()
            .ok_or_else(|| Error::NonSymbolOpcode { found: head.clone(), position })?;
        let opcode = Opcode::lookup(name)
            .ok_or_else(|| Error::UnknownOpcode { name: name.to_string(), position })?;
        let operands = &items[1..];

        match opcode {
            Opcode::Add => self.push_binary(BinaryOp::Add, operands, position),
            Opcode::Sub => self.push_binary(BinaryOp::Subtract, operands, position),
            Opcode::Mul => self.push_binary(BinaryOp::Multiply, operands, position),
            Opcode::Div => self.push_binary(BinaryOp::Divide, operands, position),
            Opcode::Band => self.push_binary(BinaryOp::BitwiseAnd, operands, position),
            Opcode::Bor => self.push_binary(BinaryOp::BitwiseOr, operands, position),
            Opcode::Bxor => self.push_binary(BinaryOp::BitwiseXor, operands, position),
            Opcode::Shl => self.push_binary(BinaryOp::LeftShift, operands, position),
            Opcode::Shr => self.push_binary(BinaryOp::RightShift, operands, position),
            Opcode::Gt => self.push_binary(BinaryOp::GreaterThan, operands, position),
            Opcode::Lt => self.push_binary(BinaryOp::LessThan, operands, position),
            Opcode::Eq => self.push_binary(BinaryOp::Equal, operands, position),
            Opcode::Neq => self.push_binary(BinaryOp::NotEqual, operands, position),
            Opcode::Gte => self.push_binary(BinaryOp::GreaterEqual, operands, position),
            Opcode::Lte => self.push_binary(BinaryOp::LessEqual, operands, position),
            Opcode::Move => self.push_pair(opcode, operands, position, |dest, src| {
                Instruction::Move { dest, src }
            }),
            Opcode::Cast => self.push_pair(opcode, operands, position, |dest, src| {
                Instruction::Cast { dest, src }
            }),
            Opcode::Bnot => self.push_pair(opcode, operands, position, |dest, src| {
                Instruction::BitNot { dest, src }
            }),
            Opcode::Address => self.push_pair(opcode, operands, position, |dest, src| {
                Instruction::Address { dest, src }
            }),
            Opcode::Load => self.push_pair(opcode, operands, position, |dest, src| {
                Instruction::Load { dest, src }
            }),
            Opcode::Store => self.push_pair(opcode, operands, position, |dest, src| {
                Instruction::Store { dest, src }
            }),
            Opcode::Jump => {
                self.exact(opcode, operands, 1, position)?;
                let to = self.label(&operands[0], position)?;
                self.push(Instruction::Jump { to }, position)
            }
            Opcode::Branch => {
                self.exact(opcode, operands, 2, position)?;
                let cond = self.register(&operands[0], position)?;
                let to = self.label(&operands[1], position)?;
                self.push(Instruction::Branch { cond, to }, position)
            }
            Opcode::Return => {
                self.exact(opcode, operands, 1, position)?;
                let src = self.register(&operands[0], position)?;
                self.push(Instruction::Return { src }, position)
            }
            Opcode::Constant => {
                self.exact(opcode, operands, 2, position)?;
                let dest = self.register(&operands[0], position)?;
                let index = self.intern(&operands[1]);
                self.push(Instruction::Constant { dest, index }, position)
            }
            Opcode::Call => self.push_call(operands, position),
            Opcode::Callk => {
                self.at_least(opcode, operands, 2, position)?;
                let dest = self.register(&operands[0], position)?;
                let index = self.index(&operands[1], position)?;
                let args = self.registers(&operands[2..], position)?;
                let arg_count = args.len() as u32;
                self.push(Instruction::CallNamed { dest, index, arg_count }, position)?;
                self.push_carriers(&args, position)
            }
            Opcode::Arg => {
                if operands.len() > 3 {
                    return Err(Error::OperandCountMismatch {
                        opcode: opcode.name().to_string(),
                        expected: 3,
                        found: operands.len(),
                        position,
                    });
                }
                let mut values = [0u32; 3];
                for (slot, operand) in values.iter_mut().zip(operands) {
                    *slot = self.register(operand, position)?;
                }
                self.push(Instruction::Args { values }, position)
            }
            Opcode::Prim => {
                self.exact(opcode, operands, 2, position)?;
                let dest = self.type_id(&operands[0], position)?;
                let prim = self.primitive(&operands[1], position)?;
                self.push(Instruction::TypePrim { dest, prim }, position)
            }
            Opcode::Struct => {
                self.at_least(opcode, operands, 2, position)?;
                let dest = self.type_id(&operands[0], position)?;
                let mut fields = Vec::with_capacity(operands.len() - 1);
                for operand in &operands[1..] {
                    fields.push(self.type_id(operand, position)?);
                }
                let field_count = fields.len() as u32;
                self.push(Instruction::TypeStruct { dest, field_count }, position)?;
                self.push_carriers(&fields, position)
            }
            Opcode::Bind => {
                self.exact(opcode, operands, 2, position)?;
                let register = self.register(&operands[0], position)?;
                let type_id = self.type_id(&operands[1], position)?;
                self.push(Instruction::Bind { register, type_id }, position)
            }
            Opcode::Fget => {
                self.exact(opcode, operands, 3, position)?;
                let dest = self.register(&operands[0], position)?;
                let object = self.register(&operands[1], position)?;
                let field = self.index(&operands[2], position)?;
                self.push(Instruction::FieldGet { dest, object, field }, position)
            }
            Opcode::Fset => {
                self.exact(opcode, operands, 3, position)?;
                let object = self.register(&operands[0], position)?;
                let field = self.index(&operands[1], position)?;
                let src = self.register(&operands[2], position)?;
                self.push(Instruction::FieldSet { object, field, src }, position)
            }
        }
    }

    fn push_binary(&mut self, op: BinaryOp, operands: &[Value], position: Position) -> Result<()> {
        if operands.len() != 3 {
            return Err(Error::OperandCountMismatch {
                opcode: op.to_string(),
                expected: 3,
                found: operands.len(),
                position,
            });
        }
        let dest = self.register(&operands[0], position)?;
        let lhs = self.register(&operands[1], position)?;
        let rhs = self.register(&operands[2], position)?;
        self.push(Instruction::Binary { op, dest, lhs, rhs }, position)
    }

    fn push_pair(
        &mut self,
        opcode: Opcode,
        operands: &[Value],
        position: Position,
        build: impl FnOnce(u32, u32) -> Instruction,
    ) -> Result<()> {
        self.exact(opcode, operands, 2, position)?;
        let dest = self.register(&operands[0], position)?;
        let src = self.register(&operands[1], position)?;
        self.push(build(dest, src), position)
    }

    /// A call target that is a symbol is interned into the constant pool and
    /// the call becomes an indirect-by-name `callk`.
    fn push_call(&mut self, operands: &[Value], position: Position) -> Result<()> {
        self.at_least(Opcode::Call, operands, 2, position)?;
        let dest = self.register(&operands[0], position)?;
        let args = self.registers(&operands[2..], position)?;
        let arg_count = args.len() as u32;
        let header = match operands[1].as_symbol() {
            Some(_) => {
                let index = self.intern(&operands[1]);
                Instruction::CallNamed { dest, index, arg_count }
            }
            None => {
                let callee = self.register(&operands[1], position)?;
                Instruction::Call { dest, callee, arg_count }
            }
        };
        self.push(header, position)?;
        self.push_carriers(&args, position)
    }

    fn push(&mut self, op: Instruction, position: Position) -> Result<()> {
        self.instructions.push(Insn::new(op, position));
        Ok(())
    }

    /// Pack trailing operands three per carrier instruction.
    fn push_carriers(&mut self, values: &[u32], position: Position) -> Result<()> {
        for chunk in values.chunks(3) {
            let mut packed = [0u32; 3];
            packed[..chunk.len()].copy_from_slice(chunk);
            self.push(Instruction::Args { values: packed }, position)?;
        }
        Ok(())
    }

    fn exact(
        &self,
        opcode: Opcode,
        operands: &[Value],
        expected: usize,
        position: Position,
    ) -> Result<()> {
        if operands.len() != expected {
            return Err(Error::OperandCountMismatch {
                opcode: opcode.name().to_string(),
                expected,
                found: operands.len(),
                position,
            });
        }
        Ok(())
    }

    fn at_least(
        &self,
        opcode: Opcode,
        operands: &[Value],
        expected: usize,
        position: Position,
    ) -> Result<()> {
        if operands.len() < expected {
            return Err(Error::TooFewOperands {
                opcode: opcode.name().to_string(),
                expected,
                found: operands.len(),
                position,
            });
        }
        Ok(())
    }

    fn index(&self, value: &Value, position: Position) -> Result<u32> {
        value
            .as_index()
            .ok_or_else(|| Error::InvalidOperand { found: value.clone(), position })
    }

    /// Register operands grow the register file.
    fn register(&mut self, value: &Value, position: Position) -> Result<u32> {
        let index = self.index(value, position)?;
        self.register_count = self.register_count.max(index + 1);
        Ok(index)
    }

    fn registers(&mut self, operands: &[Value], position: Position) -> Result<Vec<u32>> {
        operands
            .iter()
            .map(|operand| self.register(operand, position))
            .collect()
    }

    /// Type operands grow the type-def table.
    fn type_id(&mut self, value: &Value, position: Position) -> Result<u32> {
        let index = self.index(value, position)?;
        self.type_count = self.type_count.max(index + 1);
        Ok(index)
    }

    fn primitive(&self, value: &Value, position: Position) -> Result<PrimKind> {
        match value {
            Value::Symbol(name) => match PrimKind::lookup(name) {
                // Aggregates are declared only through the struct opcode
                Some(PrimKind::Struct) => {
                    Err(Error::NonScalarPrimitive { name: name.clone(), position })
                }
                Some(prim) => Ok(prim),
                None => Err(Error::UnknownPrimitive { name: name.clone(), position }),
            },
            other => Err(Error::NonSymbolPrimitive { found: other.clone(), position }),
        }
    }

    /// Named labels resolve through the label map; raw instruction indices
    /// are accepted directly.
    fn label(&self, value: &Value, position: Position) -> Result<u32> {
        if let Some(name) = value.as_symbol() {
            if let Some(target) = self.labels.get(name) {
                return Ok(*target);
            }
        }
        self.index(value, position)
    }

    fn intern(&mut self, value: &Value) -> u32 {
        let (index, _) = self.constants.insert_full(value.clone());
        index as u32
    }

    fn finish(mut self, program: &Program) -> Result<IrFunction> {
        match self.instructions.last() {
            Some(insn) if insn.op.is_terminator() => {}
            _ => return Err(Error::MissingTerminator),
        }

        // Parameters occupy the low registers even when the body never
        // mentions them
        self.register_count = self.register_count.max(program.parameter_count);

        let count = self.instructions.len();
        for insn in &self.instructions {
            match insn.op {
                Instruction::Jump { to } | Instruction::Branch { to, .. } => {
                    if to as usize >= count {
                        return Err(Error::InvalidJumpTarget {
                            target: to,
                            count,
                            position: insn.position,
                        });
                    }
                }
                Instruction::CallNamed { index, .. } | Instruction::Constant { index, .. } => {
                    if index as usize >= self.constants.len() {
                        return Err(Error::InvalidConstantIndex {
                            index,
                            count: self.constants.len(),
                            position: insn.position,
                        });
                    }
                }
                _ => {}
            }
        }

        let env = TypeEnv::build(&self.instructions, self.register_count, self.type_count)?;
        let return_type = typecheck::check(&self.instructions, &env)?;

        debug!(
            "assembled '{}': {} instructions, {} registers, {} types, {} constants",
            program.link_name,
            self.instructions.len(),
            self.register_count,
            env.type_defs.len(),
            self.constants.len()
        );

        Ok(IrFunction {
            link_name: program.link_name.clone(),
            parameter_count: program.parameter_count,
            instructions: self.instructions,
            register_count: self.register_count,
            type_defs: env.type_defs,
            fields: env.fields,
            constants: self.constants.into_iter().collect(),
            register_types: env.register_types,
            return_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tuple(items: Vec<Value>) -> Record {
        Record::new(Value::Tuple(items))
    }

    fn program(records: Vec<Record>) -> Program {
        Program {
            instructions: records,
            parameter_count: 0,
            link_name: "f".to_string(),
        }
    }

    #[test]
    fn test_register_count_follows_highest_index() {
        let ir = assemble(&program(vec![
            tuple(vec![Value::symbol("add"), 4.into(), 0.into(), 1.into()]),
            tuple(vec![Value::symbol("return"), 4.into()]),
        ]))
        .unwrap();
        assert_eq!(ir.register_count, 5);
        assert_eq!(ir.instructions.len(), 2);
    }

    #[test]
    fn test_keyword_records_are_skipped() {
        let ir = assemble(&program(vec![
            Record::new(Value::keyword("entry")),
            tuple(vec![Value::symbol("return"), 0.into()]),
        ]))
        .unwrap();
        assert_eq!(ir.instructions.len(), 1);
    }

    #[test]
    fn test_unknown_opcode_is_rejected() {
        let result = assemble(&program(vec![tuple(vec![
            Value::symbol("frob"),
            0.into(),
        ])]));
        assert!(matches!(result, Err(Error::UnknownOpcode { .. })));
    }

    #[test]
    fn test_non_tuple_record_is_rejected() {
        let result = assemble(&program(vec![Record::new(Value::Int(3))]));
        assert!(matches!(result, Err(Error::MalformedRecord { .. })));
    }

    #[test]
    fn test_operand_count_is_checked() {
        let result = assemble(&program(vec![tuple(vec![
            Value::symbol("add"),
            0.into(),
            1.into(),
        ])]));
        assert!(matches!(
            result,
            Err(Error::OperandCountMismatch { expected: 3, found: 2, .. })
        ));
    }

    #[test]
    fn test_struct_is_not_a_scalar_primitive() {
        let result = assemble(&program(vec![tuple(vec![
            Value::symbol("prim"),
            0.into(),
            Value::symbol("struct"),
        ])]));
        assert!(matches!(result, Err(Error::NonScalarPrimitive { .. })));
    }

    #[test]
    fn test_negative_operand_is_rejected() {
        let result = assemble(&program(vec![tuple(vec![
            Value::symbol("return"),
            Value::Int(-2),
        ])]));
        assert!(matches!(result, Err(Error::InvalidOperand { .. })));
    }

    #[test]
    fn test_empty_program_has_no_terminator() {
        assert_eq!(assemble(&program(vec![])), Err(Error::MissingTerminator));
    }

    #[test]
    fn test_last_instruction_must_terminate() {
        let result = assemble(&program(vec![tuple(vec![
            Value::symbol("move"),
            0.into(),
            0.into(),
        ])]));
        assert_eq!(result, Err(Error::MissingTerminator));
    }

    #[test]
    fn test_jump_target_is_validated() {
        let result = assemble(&program(vec![tuple(vec![Value::symbol("jump"), 9.into()])]));
        assert!(matches!(
            result,
            Err(Error::InvalidJumpTarget { target: 9, count: 1, .. })
        ));
    }

    #[test]
    fn test_symbol_callee_becomes_named_call() {
        let ir = assemble(&program(vec![
            tuple(vec![Value::symbol("call"), 0.into(), Value::symbol("putchar"), 0.into()]),
            tuple(vec![Value::symbol("return"), 0.into()]),
        ]))
        .unwrap();
        assert_eq!(
            ir.instructions[0].op,
            Instruction::CallNamed { dest: 0, index: 0, arg_count: 1 }
        );
        assert_eq!(ir.instructions[1].op, Instruction::Args { values: [0, 0, 0] });
        assert_eq!(ir.constants, vec![Value::symbol("putchar")]);
    }

    #[test]
    fn test_call_targets_are_interned_once() {
        let ir = assemble(&program(vec![
            tuple(vec![Value::symbol("call"), 0.into(), Value::symbol("getchar")]),
            tuple(vec![Value::symbol("call"), 1.into(), Value::symbol("getchar")]),
            tuple(vec![Value::symbol("return"), 0.into()]),
        ]))
        .unwrap();
        assert_eq!(ir.constants, vec![Value::symbol("getchar")]);
        assert_eq!(
            ir.instructions[1].op,
            Instruction::CallNamed { dest: 1, index: 0, arg_count: 0 }
        );
    }

    #[test]
    fn test_call_arguments_pack_three_per_carrier() {
        let ir = assemble(&program(vec![
            tuple(vec![Value::symbol("prim"), 1.into(), Value::symbol("pointer")]),
            tuple(vec![Value::symbol("bind"), 1.into(), 1.into()]),
            tuple(vec![
                Value::symbol("call"),
                0.into(),
                1.into(),
                2.into(),
                3.into(),
                4.into(),
                5.into(),
            ]),
            tuple(vec![Value::symbol("return"), 0.into()]),
        ]))
        .unwrap();
        assert_eq!(
            ir.instructions[2].op,
            Instruction::Call { dest: 0, callee: 1, arg_count: 4 }
        );
        assert_eq!(ir.instructions[3].op, Instruction::Args { values: [2, 3, 4] });
        assert_eq!(ir.instructions[4].op, Instruction::Args { values: [5, 0, 0] });
    }

    #[test]
    fn test_parameter_count_reserves_registers() {
        let ir = assemble(&Program {
            instructions: vec![tuple(vec![Value::symbol("return"), 0.into()])],
            parameter_count: 3,
            link_name: "f".to_string(),
        })
        .unwrap();
        assert_eq!(ir.register_count, 3);
    }

    #[test]
    fn test_constant_is_pooled() {
        let ir = assemble(&program(vec![
            tuple(vec![Value::symbol("constant"), 0.into(), 42.into()]),
            tuple(vec![Value::symbol("constant"), 1.into(), 42.into()]),
            tuple(vec![Value::symbol("return"), 0.into()]),
        ]))
        .unwrap();
        assert_eq!(ir.constants, vec![Value::Int(42)]);
        assert_eq!(ir.instructions[1].op, Instruction::Constant { dest: 1, index: 0 });
    }
}
