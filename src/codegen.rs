//! C code generation from verified IR.
//!
//! The emitter performs no checking of its own: every property it relies on
//! was established by the verifier, so emission is total and deterministic.
//! Output goes into an append-only `String` buffer supplied by the caller.
//!
//! Identifier conventions: `_t<n>` for types, `_r<n>` for registers,
//! `_f<n>` for struct fields, `_i<n>` for instruction labels. Source lines
//! surface as `#line` directives wherever the input carried one.

use std::fmt::Write;

use log::debug;

use crate::instruction::{BinaryOp, Instruction};
use crate::types::PrimKind;
use crate::value::Position;
use crate::IrFunction;

/// Append the C translation unit for a verified function to `out`.
pub fn emit_c(ir: &IrFunction, out: &mut String) {
    let mut emitter = Emitter { ir, out };
    emitter.emit();
    debug!("emitted C for '{}'", ir.link_name);
}

/// Emit into a fresh buffer.
pub fn to_c(ir: &IrFunction) -> String {
    let mut out = String::new();
    emit_c(ir, &mut out);
    out
}

/// The C spelling of a scalar primitive kind.
fn c_primitive(prim: PrimKind) -> &'static str {
    match prim {
        PrimKind::U8 => "uint8_t",
        PrimKind::U16 => "uint16_t",
        PrimKind::U32 => "uint32_t",
        PrimKind::U64 => "uint64_t",
        PrimKind::S8 => "int8_t",
        PrimKind::S16 => "int16_t",
        PrimKind::S32 => "int32_t",
        PrimKind::S64 => "int64_t",
        PrimKind::F32 => "float",
        PrimKind::F64 => "double",
        PrimKind::Pointer => "char *",
        // The native keyword, so the prelude needs no stdbool.h
        PrimKind::Boolean => "_Bool",
        PrimKind::Struct => "struct",
    }
}

/// The C operator for a three-operand operation.
fn c_operator(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Subtract => "-",
        BinaryOp::Multiply => "*",
        BinaryOp::Divide => "/",
        BinaryOp::BitwiseAnd => "&",
        BinaryOp::BitwiseOr => "|",
        BinaryOp::BitwiseXor => "^",
        BinaryOp::LeftShift => "<<",
        BinaryOp::RightShift => ">>",
        BinaryOp::GreaterThan => ">",
        BinaryOp::LessThan => "<",
        BinaryOp::Equal => "==",
        BinaryOp::NotEqual => "!=",
        BinaryOp::GreaterEqual => ">=",
        BinaryOp::LessEqual => "<=",
    }
}

struct Emitter<'a> {
    ir: &'a IrFunction,
    out: &'a mut String,
}

impl Emitter<'_> {
    fn emit(&mut self) {
        self.emit_prelude();
        self.emit_types();
        self.emit_signature();
        self.emit_declarations();
        self.emit_body();
        writeln!(self.out, "}}").unwrap();
    }

    fn emit_prelude(&mut self) {
        writeln!(self.out, "#include <stdint.h>").unwrap();
        writeln!(self.out, "#include <tgmath.h>").unwrap();
        writeln!(self.out).unwrap();
    }

    /// One typedef per type-creation instruction, in source order.
    fn emit_types(&mut self) {
        for insn in &self.ir.instructions {
            match insn.op {
                Instruction::TypePrim { dest, prim } => {
                    self.line_directive(insn.position);
                    writeln!(self.out, "typedef {} _t{};", c_primitive(prim), dest).unwrap();
                }
                Instruction::TypeStruct { dest, .. } => {
                    self.line_directive(insn.position);
                    writeln!(self.out, "typedef struct {{").unwrap();
                    let def = self.ir.type_defs[dest as usize];
                    for (j, field) in self.ir.struct_fields(&def).iter().enumerate() {
                        writeln!(self.out, "    _t{} _f{};", field.type_id, j).unwrap();
                    }
                    writeln!(self.out, "}} _t{};", dest).unwrap();
                }
                _ => {}
            }
        }
        writeln!(self.out).unwrap();
    }

    fn emit_signature(&mut self) {
        write!(self.out, "_t{} {}(", self.ir.return_type, self.ir.link_name).unwrap();
        for register in 0..self.ir.parameter_count {
            if register > 0 {
                write!(self.out, ", ").unwrap();
            }
            write!(self.out, "_t{} _r{}", self.ir.register_type(register), register).unwrap();
        }
        writeln!(self.out, ") {{").unwrap();
    }

    fn emit_declarations(&mut self) {
        for register in self.ir.parameter_count..self.ir.register_count {
            writeln!(
                self.out,
                "    _t{} _r{};",
                self.ir.register_type(register),
                register
            )
            .unwrap();
        }
    }

    fn emit_body(&mut self) {
        for (index, insn) in self.ir.instructions.iter().enumerate() {
            if insn.op.is_declaration() {
                continue;
            }
            writeln!(self.out, "_i{}:", index).unwrap();
            self.line_directive(insn.position);
            self.emit_statement(index, &insn.op);
        }
    }

    fn emit_statement(&mut self, index: usize, op: &Instruction) {
        match *op {
            Instruction::Binary { op, dest, lhs, rhs } => {
                writeln!(
                    self.out,
                    "    _r{} = _r{} {} _r{};",
                    dest,
                    lhs,
                    c_operator(op),
                    rhs
                )
                .unwrap();
            }
            Instruction::Move { dest, src } => {
                writeln!(self.out, "    _r{} = _r{};", dest, src).unwrap();
            }
            Instruction::Cast { dest, src } => {
                writeln!(
                    self.out,
                    "    _r{} = (_t{}) _r{};",
                    dest,
                    self.ir.register_type(dest),
                    src
                )
                .unwrap();
            }
            Instruction::BitNot { dest, src } => {
                writeln!(self.out, "    _r{} = ~_r{};", dest, src).unwrap();
            }
            Instruction::Address { dest, src } => {
                writeln!(self.out, "    _r{} = (char *) &_r{};", dest, src).unwrap();
            }
            Instruction::Load { dest, src } => {
                writeln!(
                    self.out,
                    "    _r{} = *(({} *) _r{});",
                    dest,
                    self.pointer_base(dest),
                    src
                )
                .unwrap();
            }
            Instruction::Store { dest, src } => {
                writeln!(
                    self.out,
                    "    *(({} *) _r{}) = _r{};",
                    self.pointer_base(src),
                    dest,
                    src
                )
                .unwrap();
            }
            Instruction::Jump { to } => {
                writeln!(self.out, "    goto _i{};", to).unwrap();
            }
            Instruction::Branch { cond, to } => {
                writeln!(self.out, "    if (_r{}) goto _i{};", cond, to).unwrap();
            }
            Instruction::Return { src } => {
                writeln!(self.out, "    return _r{};", src).unwrap();
            }
            Instruction::Constant { dest, index } => {
                writeln!(
                    self.out,
                    "    _r{} = (_t{}) {};",
                    dest,
                    self.ir.register_type(dest),
                    self.ir.constants[index as usize]
                )
                .unwrap();
            }
            Instruction::Call { dest, callee, arg_count } => {
                write!(self.out, "    _r{} = _r{}(", dest, callee).unwrap();
                self.emit_arguments(index, arg_count);
                writeln!(self.out, ");").unwrap();
            }
            Instruction::CallNamed { dest, index: constant, arg_count } => {
                write!(
                    self.out,
                    "    _r{} = {}(",
                    dest, self.ir.constants[constant as usize]
                )
                .unwrap();
                self.emit_arguments(index, arg_count);
                writeln!(self.out, ");").unwrap();
            }
            Instruction::FieldGet { dest, object, field } => {
                writeln!(self.out, "    _r{} = _r{}._f{};", dest, object, field).unwrap();
            }
            Instruction::FieldSet { object, field, src } => {
                writeln!(self.out, "    _r{}._f{} = _r{};", object, field, src).unwrap();
            }
            Instruction::Args { .. }
            | Instruction::TypePrim { .. }
            | Instruction::TypeStruct { .. }
            | Instruction::Bind { .. } => {}
        }
    }

    /// Unpack the logical argument list from the carriers that follow the
    /// header at `index`.
    fn emit_arguments(&mut self, index: usize, arg_count: u32) {
        for k in 0..arg_count {
            if k > 0 {
                write!(self.out, ", ").unwrap();
            }
            let carrier = index + 1 + (k / 3) as usize;
            let register = match self.ir.instructions[carrier].op {
                Instruction::Args { values } => values[(k % 3) as usize],
                // Verified input always has its carriers
                _ => 0,
            };
            write!(self.out, "_r{}", register).unwrap();
        }
    }

    /// The pointee spelling for loads and stores: the scalar C name, or the
    /// typedef name for aggregates.
    fn pointer_base(&self, register: u32) -> String {
        let type_id = self.ir.register_type(register);
        let prim = self.ir.type_defs[type_id as usize].prim;
        if prim == PrimKind::Struct {
            format!("_t{}", type_id)
        } else {
            c_primitive(prim).to_string()
        }
    }

    fn line_directive(&mut self, position: Position) {
        if position.line > 0 {
            writeln!(self.out, "#line {}", position.line).unwrap();
        }
    }
}
