//! Fused function-body decoding and validation.
//!
//! Bodies are decoded instruction by instruction while an abstract type
//! stack and a control stack of block frames track what the operand stack
//! will hold at run time. Popping checks the expected operand types,
//! pushing records results, and code after an unconditional transfer is
//! checked against a polymorphic bottom type until the enclosing block
//! ends.
//!
//! Validation and branch-target computation happen in the same pass: every
//! block frame owns a slot in the function's branch target table, `loop`
//! slots are filled on entry, and `block`/`if` slots are filled when the
//! matching `end` is reached. The emitted [`Instr`] stream references
//! those slots, which is what lets execution branch in constant time.

use super::instruction::{BlockType, BranchTarget, Instr, MemArg};
use super::limits;
use super::module::{Code, ConstExpr, FunctionType, Module, ValueType};
use super::reader::Reader;
use super::ParseError;

/// An entry on the abstract type stack. `Unknown` is the polymorphic
/// bottom type that appears only in unreachable code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MaybeType {
    Val(ValueType),
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Function,
    Block,
    Loop,
    If,
    Else,
}

/// A block frame on the control stack.
#[derive(Debug, Clone, Copy)]
struct CtrlFrame {
    kind: FrameKind,
    result: Option<ValueType>,
    /// Abstract stack height at frame entry.
    height: usize,
    /// Set after an unconditional transfer; the rest of the frame is
    /// checked polymorphically.
    unreachable: bool,
    /// Branch target slot for branches to this frame.
    label: u32,
    /// Extra slot for the false edge of an `if`.
    else_label: Option<u32>,
}

/// Decode and validate one function body, producing the flat code stream
/// and its branch target table.
///
/// `declared_locals` is the expanded list from the body's local
/// declarations; parameters are taken from `func_type`.
pub(crate) fn decode_function_body(
    reader: &mut Reader<'_>,
    module: &Module,
    func_type: &FunctionType,
    declared_locals: Vec<ValueType>,
) -> Result<Code, ParseError> {
    let mut locals = func_type.params.clone();
    locals.extend_from_slice(&declared_locals);

    let mut v = BodyValidator {
        module,
        func_type,
        locals,
        vals: Vec::new(),
        ctrls: Vec::new(),
        code: Vec::new(),
        labels: Vec::new(),
    };

    // The implicit function-level frame; its slot is always index 0 and
    // `return` branches through it.
    let label = v.alloc_label();
    v.ctrls.push(CtrlFrame {
        kind: FrameKind::Function,
        result: func_type.result(),
        height: 0,
        unreachable: false,
        label,
        else_label: None,
    });

    v.run(reader)?;

    Ok(Code {
        locals: declared_locals,
        instrs: v.code,
        labels: v.labels,
    })
}

/// Decode a constant initializer expression of the expected type.
///
/// Only a single literal or a `global.get` of a previously declared
/// imported immutable global is accepted, terminated by `end`.
pub(crate) fn decode_const_expr(
    reader: &mut Reader<'_>,
    module: &Module,
    expected: ValueType,
) -> Result<ConstExpr, ParseError> {
    let opcode = reader.read_byte()?;
    let (expr, actual) = match opcode {
        0x23 => {
            let idx = reader.read_var_u32()?;
            if idx as usize >= module.imported_global_count() {
                return Err(ParseError::ConstExprInvalidGlobal(idx));
            }
            let global_type = module.imported_globals[idx as usize];
            if global_type.mutable {
                return Err(ParseError::ConstExprInvalidGlobal(idx));
            }
            (ConstExpr::GlobalGet(idx), global_type.value_type)
        }
        0x41 => (ConstExpr::I32(reader.read_var_s32()?), ValueType::I32),
        0x42 => (ConstExpr::I64(reader.read_var_s64()?), ValueType::I64),
        0x43 => (ConstExpr::F32(reader.read_f32()?), ValueType::F32),
        0x44 => (ConstExpr::F64(reader.read_f64()?), ValueType::F64),
        _ => return Err(ParseError::InvalidConstantExpression),
    };
    if actual != expected {
        return Err(ParseError::ConstExprTypeMismatch {
            expected,
            actual,
        });
    }
    if reader.read_byte()? != 0x0b {
        return Err(ParseError::InvalidConstantExpression);
    }
    Ok(expr)
}

struct BodyValidator<'m> {
    module: &'m Module,
    func_type: &'m FunctionType,
    /// Parameters followed by declared locals.
    locals: Vec<ValueType>,
    vals: Vec<MaybeType>,
    ctrls: Vec<CtrlFrame>,
    code: Vec<Instr>,
    labels: Vec<BranchTarget>,
}

impl BodyValidator<'_> {
    fn run(&mut self, reader: &mut Reader<'_>) -> Result<(), ParseError> {
        use ValueType::{F32, F64, I32, I64};

        loop {
            let opcode = reader.read_byte()?;
            match opcode {
                0x00 => {
                    self.code.push(Instr::Unreachable);
                    self.set_unreachable()?;
                }
                0x01 => self.code.push(Instr::Nop),

                0x02 | 0x03 => {
                    let block_type = self.read_block_type(reader)?;
                    let pc = self.code.len() as u32;
                    let kind = if opcode == 0x02 {
                        self.code.push(Instr::Block);
                        FrameKind::Block
                    } else {
                        self.code.push(Instr::Loop);
                        FrameKind::Loop
                    };
                    let label = self.alloc_label();
                    if kind == FrameKind::Loop {
                        // Branches to a loop jump back to its head and
                        // carry nothing.
                        self.labels[label as usize] = BranchTarget {
                            pc,
                            stack_height: self.vals.len() as u32,
                            arity: 0,
                        };
                    }
                    self.ctrls.push(CtrlFrame {
                        kind,
                        result: block_type.result(),
                        height: self.vals.len(),
                        unreachable: false,
                        label,
                        else_label: None,
                    });
                }

                0x04 => {
                    let block_type = self.read_block_type(reader)?;
                    self.pop_expected(I32)?;
                    let else_label = self.alloc_label();
                    self.code.push(Instr::If {
                        false_target: else_label,
                    });
                    let label = self.alloc_label();
                    self.ctrls.push(CtrlFrame {
                        kind: FrameKind::If,
                        result: block_type.result(),
                        height: self.vals.len(),
                        unreachable: false,
                        label,
                        else_label: Some(else_label),
                    });
                }

                0x05 => {
                    let frame = self.pop_ctrl()?;
                    if frame.kind != FrameKind::If {
                        return Err(ParseError::UnexpectedElse);
                    }
                    let Some(else_label) = frame.else_label else {
                        return Err(ParseError::UnexpectedElse);
                    };
                    // Reached at the end of the then arm: jump over the
                    // else arm. The false edge of the `if` enters just
                    // after this instruction.
                    let pc = self.code.len() as u32;
                    self.code.push(Instr::Else {
                        end_target: frame.label,
                    });
                    self.labels[else_label as usize] = BranchTarget {
                        pc: pc + 1,
                        stack_height: frame.height as u32,
                        arity: 0,
                    };
                    self.ctrls.push(CtrlFrame {
                        kind: FrameKind::Else,
                        result: frame.result,
                        height: frame.height,
                        unreachable: false,
                        label: frame.label,
                        else_label: None,
                    });
                }

                0x0b => {
                    let frame = self.pop_ctrl()?;
                    let end_pc = self.code.len() as u32;
                    if frame.kind == FrameKind::If {
                        // No else arm: the false edge falls through to the
                        // end, so the if cannot produce a value.
                        if frame.result.is_some() {
                            return Err(ParseError::TypeMismatch(
                                "if without else cannot yield a value",
                            ));
                        }
                        if let Some(else_label) = frame.else_label {
                            self.labels[else_label as usize] = BranchTarget {
                                pc: end_pc,
                                stack_height: frame.height as u32,
                                arity: 0,
                            };
                        }
                    }
                    self.code.push(Instr::End);
                    if frame.kind != FrameKind::Loop {
                        self.labels[frame.label as usize] = BranchTarget {
                            pc: end_pc,
                            stack_height: frame.height as u32,
                            arity: if frame.result.is_some() { 1 } else { 0 },
                        };
                    }
                    if let Some(t) = frame.result {
                        self.push_val(t);
                    }
                    if self.ctrls.is_empty() {
                        // The function's terminal end.
                        return Ok(());
                    }
                }

                0x0c => {
                    let depth = reader.read_var_u32()?;
                    let frame = self.frame_at_depth(depth)?;
                    if let Some(t) = Self::label_result(&frame) {
                        self.pop_expected(t)?;
                    }
                    self.code.push(Instr::Br { target: frame.label });
                    self.set_unreachable()?;
                }

                0x0d => {
                    let depth = reader.read_var_u32()?;
                    let frame = self.frame_at_depth(depth)?;
                    self.pop_expected(I32)?;
                    if let Some(t) = Self::label_result(&frame) {
                        self.pop_expected(t)?;
                        self.push_val(t);
                    }
                    self.code.push(Instr::BrIf { target: frame.label });
                }

                0x0e => {
                    let count = reader.read_var_u32()?;
                    if count > limits::MAX_BR_TABLE_LABELS {
                        return Err(ParseError::LimitExceeded {
                            kind: "br_table labels",
                            count: u64::from(count),
                        });
                    }
                    let mut depths = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        depths.push(reader.read_var_u32()?);
                    }
                    let default_depth = reader.read_var_u32()?;

                    self.pop_expected(I32)?;
                    let default_frame = self.frame_at_depth(default_depth)?;
                    let expected = Self::label_result(&default_frame);
                    let mut targets = Vec::with_capacity(count as usize);
                    for depth in depths {
                        let frame = self.frame_at_depth(depth)?;
                        if Self::label_result(&frame) != expected {
                            return Err(ParseError::TypeMismatch(
                                "br_table targets disagree on arity",
                            ));
                        }
                        targets.push(frame.label);
                    }
                    if let Some(t) = expected {
                        self.pop_expected(t)?;
                    }
                    self.code.push(Instr::BrTable {
                        targets: targets.into_boxed_slice(),
                        default: default_frame.label,
                    });
                    self.set_unreachable()?;
                }

                0x0f => {
                    if let Some(t) = self.func_type.result() {
                        self.pop_expected(t)?;
                    }
                    self.code.push(Instr::Return);
                    self.set_unreachable()?;
                }

                0x10 => {
                    let func_idx = reader.read_var_u32()?;
                    if func_idx as usize >= self.module.function_count() {
                        return Err(ParseError::UnknownFunction(func_idx));
                    }
                    let ty = self.module.function_type(func_idx).clone();
                    for param in ty.params.iter().rev() {
                        self.pop_expected(*param)?;
                    }
                    if let Some(r) = ty.result() {
                        self.push_val(r);
                    }
                    self.code.push(Instr::Call { func_idx });
                }

                0x11 => {
                    let type_idx = reader.read_var_u32()?;
                    if type_idx as usize >= self.module.types.len() {
                        return Err(ParseError::UnknownType(type_idx));
                    }
                    let reserved = reader.read_byte()?;
                    if reserved != 0x00 {
                        return Err(ParseError::InvalidReservedByte(reserved));
                    }
                    if !self.module.has_table() {
                        return Err(ParseError::MissingTable);
                    }
                    self.pop_expected(I32)?;
                    let ty = self.module.types[type_idx as usize].clone();
                    for param in ty.params.iter().rev() {
                        self.pop_expected(*param)?;
                    }
                    if let Some(r) = ty.result() {
                        self.push_val(r);
                    }
                    self.code.push(Instr::CallIndirect { type_idx });
                }

                0x1a => {
                    self.pop_val()?;
                    self.code.push(Instr::Drop);
                }

                0x1b => {
                    self.pop_expected(I32)?;
                    let t1 = self.pop_val()?;
                    let t2 = self.pop_val()?;
                    match (t1, t2) {
                        (MaybeType::Val(a), MaybeType::Val(b)) if a != b => {
                            return Err(ParseError::TypeMismatch(
                                "select operands must have the same type",
                            ));
                        }
                        _ => {}
                    }
                    self.vals.push(if t1 == MaybeType::Unknown { t2 } else { t1 });
                    self.code.push(Instr::Select);
                }

                0x20 => {
                    let idx = reader.read_var_u32()?;
                    let t = self.local_type(idx)?;
                    self.push_val(t);
                    self.code.push(Instr::LocalGet(idx));
                }
                0x21 => {
                    let idx = reader.read_var_u32()?;
                    let t = self.local_type(idx)?;
                    self.pop_expected(t)?;
                    self.code.push(Instr::LocalSet(idx));
                }
                0x22 => {
                    let idx = reader.read_var_u32()?;
                    let t = self.local_type(idx)?;
                    self.pop_expected(t)?;
                    self.push_val(t);
                    self.code.push(Instr::LocalTee(idx));
                }
                0x23 => {
                    let idx = reader.read_var_u32()?;
                    if idx as usize >= self.module.global_count() {
                        return Err(ParseError::UnknownGlobal(idx));
                    }
                    self.push_val(self.module.global_type(idx).value_type);
                    self.code.push(Instr::GlobalGet(idx));
                }
                0x24 => {
                    let idx = reader.read_var_u32()?;
                    if idx as usize >= self.module.global_count() {
                        return Err(ParseError::UnknownGlobal(idx));
                    }
                    let global_type = self.module.global_type(idx);
                    if !global_type.mutable {
                        return Err(ParseError::GlobalIsImmutable(idx));
                    }
                    self.pop_expected(global_type.value_type)?;
                    self.code.push(Instr::GlobalSet(idx));
                }

                0x28 => self.load(reader, I32, 4, Instr::I32Load)?,
                0x29 => self.load(reader, I64, 8, Instr::I64Load)?,
                0x2a => self.load(reader, F32, 4, Instr::F32Load)?,
                0x2b => self.load(reader, F64, 8, Instr::F64Load)?,
                0x2c => self.load(reader, I32, 1, Instr::I32Load8S)?,
                0x2d => self.load(reader, I32, 1, Instr::I32Load8U)?,
                0x2e => self.load(reader, I32, 2, Instr::I32Load16S)?,
                0x2f => self.load(reader, I32, 2, Instr::I32Load16U)?,
                0x30 => self.load(reader, I64, 1, Instr::I64Load8S)?,
                0x31 => self.load(reader, I64, 1, Instr::I64Load8U)?,
                0x32 => self.load(reader, I64, 2, Instr::I64Load16S)?,
                0x33 => self.load(reader, I64, 2, Instr::I64Load16U)?,
                0x34 => self.load(reader, I64, 4, Instr::I64Load32S)?,
                0x35 => self.load(reader, I64, 4, Instr::I64Load32U)?,
                0x36 => self.store(reader, I32, 4, Instr::I32Store)?,
                0x37 => self.store(reader, I64, 8, Instr::I64Store)?,
                0x38 => self.store(reader, F32, 4, Instr::F32Store)?,
                0x39 => self.store(reader, F64, 8, Instr::F64Store)?,
                0x3a => self.store(reader, I32, 1, Instr::I32Store8)?,
                0x3b => self.store(reader, I32, 2, Instr::I32Store16)?,
                0x3c => self.store(reader, I64, 1, Instr::I64Store8)?,
                0x3d => self.store(reader, I64, 2, Instr::I64Store16)?,
                0x3e => self.store(reader, I64, 4, Instr::I64Store32)?,

                0x3f => {
                    self.check_memory_instr(reader)?;
                    self.push_val(I32);
                    self.code.push(Instr::MemorySize);
                }
                0x40 => {
                    self.check_memory_instr(reader)?;
                    self.pop_expected(I32)?;
                    self.push_val(I32);
                    self.code.push(Instr::MemoryGrow);
                }

                0x41 => {
                    let v = reader.read_var_s32()?;
                    self.push_val(I32);
                    self.code.push(Instr::I32Const(v));
                }
                0x42 => {
                    let v = reader.read_var_s64()?;
                    self.push_val(I64);
                    self.code.push(Instr::I64Const(v));
                }
                0x43 => {
                    let v = reader.read_f32()?;
                    self.push_val(F32);
                    self.code.push(Instr::F32Const(v));
                }
                0x44 => {
                    let v = reader.read_f64()?;
                    self.push_val(F64);
                    self.code.push(Instr::F64Const(v));
                }

                0x45 => self.testop(I32, Instr::I32Eqz)?,
                0x46 => self.relop(I32, Instr::I32Eq)?,
                0x47 => self.relop(I32, Instr::I32Ne)?,
                0x48 => self.relop(I32, Instr::I32LtS)?,
                0x49 => self.relop(I32, Instr::I32LtU)?,
                0x4a => self.relop(I32, Instr::I32GtS)?,
                0x4b => self.relop(I32, Instr::I32GtU)?,
                0x4c => self.relop(I32, Instr::I32LeS)?,
                0x4d => self.relop(I32, Instr::I32LeU)?,
                0x4e => self.relop(I32, Instr::I32GeS)?,
                0x4f => self.relop(I32, Instr::I32GeU)?,

                0x50 => self.testop(I64, Instr::I64Eqz)?,
                0x51 => self.relop(I64, Instr::I64Eq)?,
                0x52 => self.relop(I64, Instr::I64Ne)?,
                0x53 => self.relop(I64, Instr::I64LtS)?,
                0x54 => self.relop(I64, Instr::I64LtU)?,
                0x55 => self.relop(I64, Instr::I64GtS)?,
                0x56 => self.relop(I64, Instr::I64GtU)?,
                0x57 => self.relop(I64, Instr::I64LeS)?,
                0x58 => self.relop(I64, Instr::I64LeU)?,
                0x59 => self.relop(I64, Instr::I64GeS)?,
                0x5a => self.relop(I64, Instr::I64GeU)?,

                0x5b => self.relop(F32, Instr::F32Eq)?,
                0x5c => self.relop(F32, Instr::F32Ne)?,
                0x5d => self.relop(F32, Instr::F32Lt)?,
                0x5e => self.relop(F32, Instr::F32Gt)?,
                0x5f => self.relop(F32, Instr::F32Le)?,
                0x60 => self.relop(F32, Instr::F32Ge)?,

                0x61 => self.relop(F64, Instr::F64Eq)?,
                0x62 => self.relop(F64, Instr::F64Ne)?,
                0x63 => self.relop(F64, Instr::F64Lt)?,
                0x64 => self.relop(F64, Instr::F64Gt)?,
                0x65 => self.relop(F64, Instr::F64Le)?,
                0x66 => self.relop(F64, Instr::F64Ge)?,

                0x67 => self.unop(I32, Instr::I32Clz)?,
                0x68 => self.unop(I32, Instr::I32Ctz)?,
                0x69 => self.unop(I32, Instr::I32Popcnt)?,
                0x6a => self.binop(I32, Instr::I32Add)?,
                0x6b => self.binop(I32, Instr::I32Sub)?,
                0x6c => self.binop(I32, Instr::I32Mul)?,
                0x6d => self.binop(I32, Instr::I32DivS)?,
                0x6e => self.binop(I32, Instr::I32DivU)?,
                0x6f => self.binop(I32, Instr::I32RemS)?,
                0x70 => self.binop(I32, Instr::I32RemU)?,
                0x71 => self.binop(I32, Instr::I32And)?,
                0x72 => self.binop(I32, Instr::I32Or)?,
                0x73 => self.binop(I32, Instr::I32Xor)?,
                0x74 => self.binop(I32, Instr::I32Shl)?,
                0x75 => self.binop(I32, Instr::I32ShrS)?,
                0x76 => self.binop(I32, Instr::I32ShrU)?,
                0x77 => self.binop(I32, Instr::I32Rotl)?,
                0x78 => self.binop(I32, Instr::I32Rotr)?,

                0x79 => self.unop(I64, Instr::I64Clz)?,
                0x7a => self.unop(I64, Instr::I64Ctz)?,
                0x7b => self.unop(I64, Instr::I64Popcnt)?,
                0x7c => self.binop(I64, Instr::I64Add)?,
                0x7d => self.binop(I64, Instr::I64Sub)?,
                0x7e => self.binop(I64, Instr::I64Mul)?,
                0x7f => self.binop(I64, Instr::I64DivS)?,
                0x80 => self.binop(I64, Instr::I64DivU)?,
                0x81 => self.binop(I64, Instr::I64RemS)?,
                0x82 => self.binop(I64, Instr::I64RemU)?,
                0x83 => self.binop(I64, Instr::I64And)?,
                0x84 => self.binop(I64, Instr::I64Or)?,
                0x85 => self.binop(I64, Instr::I64Xor)?,
                0x86 => self.binop(I64, Instr::I64Shl)?,
                0x87 => self.binop(I64, Instr::I64ShrS)?,
                0x88 => self.binop(I64, Instr::I64ShrU)?,
                0x89 => self.binop(I64, Instr::I64Rotl)?,
                0x8a => self.binop(I64, Instr::I64Rotr)?,

                0x8b => self.unop(F32, Instr::F32Abs)?,
                0x8c => self.unop(F32, Instr::F32Neg)?,
                0x8d => self.unop(F32, Instr::F32Ceil)?,
                0x8e => self.unop(F32, Instr::F32Floor)?,
                0x8f => self.unop(F32, Instr::F32Trunc)?,
                0x90 => self.unop(F32, Instr::F32Nearest)?,
                0x91 => self.unop(F32, Instr::F32Sqrt)?,
                0x92 => self.binop(F32, Instr::F32Add)?,
                0x93 => self.binop(F32, Instr::F32Sub)?,
                0x94 => self.binop(F32, Instr::F32Mul)?,
                0x95 => self.binop(F32, Instr::F32Div)?,
                0x96 => self.binop(F32, Instr::F32Min)?,
                0x97 => self.binop(F32, Instr::F32Max)?,
                0x98 => self.binop(F32, Instr::F32Copysign)?,

                0x99 => self.unop(F64, Instr::F64Abs)?,
                0x9a => self.unop(F64, Instr::F64Neg)?,
                0x9b => self.unop(F64, Instr::F64Ceil)?,
                0x9c => self.unop(F64, Instr::F64Floor)?,
                0x9d => self.unop(F64, Instr::F64Trunc)?,
                0x9e => self.unop(F64, Instr::F64Nearest)?,
                0x9f => self.unop(F64, Instr::F64Sqrt)?,
                0xa0 => self.binop(F64, Instr::F64Add)?,
                0xa1 => self.binop(F64, Instr::F64Sub)?,
                0xa2 => self.binop(F64, Instr::F64Mul)?,
                0xa3 => self.binop(F64, Instr::F64Div)?,
                0xa4 => self.binop(F64, Instr::F64Min)?,
                0xa5 => self.binop(F64, Instr::F64Max)?,
                0xa6 => self.binop(F64, Instr::F64Copysign)?,

                0xa7 => self.cvtop(I64, I32, Instr::I32WrapI64)?,
                0xa8 => self.cvtop(F32, I32, Instr::I32TruncF32S)?,
                0xa9 => self.cvtop(F32, I32, Instr::I32TruncF32U)?,
                0xaa => self.cvtop(F64, I32, Instr::I32TruncF64S)?,
                0xab => self.cvtop(F64, I32, Instr::I32TruncF64U)?,
                0xac => self.cvtop(I32, I64, Instr::I64ExtendI32S)?,
                0xad => self.cvtop(I32, I64, Instr::I64ExtendI32U)?,
                0xae => self.cvtop(F32, I64, Instr::I64TruncF32S)?,
                0xaf => self.cvtop(F32, I64, Instr::I64TruncF32U)?,
                0xb0 => self.cvtop(F64, I64, Instr::I64TruncF64S)?,
                0xb1 => self.cvtop(F64, I64, Instr::I64TruncF64U)?,
                0xb2 => self.cvtop(I32, F32, Instr::F32ConvertI32S)?,
                0xb3 => self.cvtop(I32, F32, Instr::F32ConvertI32U)?,
                0xb4 => self.cvtop(I64, F32, Instr::F32ConvertI64S)?,
                0xb5 => self.cvtop(I64, F32, Instr::F32ConvertI64U)?,
                0xb6 => self.cvtop(F64, F32, Instr::F32DemoteF64)?,
                0xb7 => self.cvtop(I32, F64, Instr::F64ConvertI32S)?,
                0xb8 => self.cvtop(I32, F64, Instr::F64ConvertI32U)?,
                0xb9 => self.cvtop(I64, F64, Instr::F64ConvertI64S)?,
                0xba => self.cvtop(I64, F64, Instr::F64ConvertI64U)?,
                0xbb => self.cvtop(F32, F64, Instr::F64PromoteF32)?,
                0xbc => self.cvtop(F32, I32, Instr::I32ReinterpretF32)?,
                0xbd => self.cvtop(F64, I64, Instr::I64ReinterpretF64)?,
                0xbe => self.cvtop(I32, F32, Instr::F32ReinterpretI32)?,
                0xbf => self.cvtop(I64, F64, Instr::F64ReinterpretI64)?,

                0xc0 => self.unop(I32, Instr::I32Extend8S)?,
                0xc1 => self.unop(I32, Instr::I32Extend16S)?,
                0xc2 => self.unop(I64, Instr::I64Extend8S)?,
                0xc3 => self.unop(I64, Instr::I64Extend16S)?,
                0xc4 => self.unop(I64, Instr::I64Extend32S)?,

                0xfc => {
                    let sub = reader.read_var_u32()?;
                    match sub {
                        0 => self.cvtop(F32, I32, Instr::I32TruncSatF32S)?,
                        1 => self.cvtop(F32, I32, Instr::I32TruncSatF32U)?,
                        2 => self.cvtop(F64, I32, Instr::I32TruncSatF64S)?,
                        3 => self.cvtop(F64, I32, Instr::I32TruncSatF64U)?,
                        4 => self.cvtop(F32, I64, Instr::I64TruncSatF32S)?,
                        5 => self.cvtop(F32, I64, Instr::I64TruncSatF32U)?,
                        6 => self.cvtop(F64, I64, Instr::I64TruncSatF64S)?,
                        7 => self.cvtop(F64, I64, Instr::I64TruncSatF64U)?,
                        _ => return Err(ParseError::InvalidPrefixedOpcode(sub)),
                    }
                }

                _ => return Err(ParseError::InvalidOpcode(opcode)),
            }
        }
    }

    // Abstract stack ---------------------------------------------------------

    fn push_val(&mut self, t: ValueType) {
        self.vals.push(MaybeType::Val(t));
    }

    fn pop_val(&mut self) -> Result<MaybeType, ParseError> {
        let frame = self.top_frame()?;
        if self.vals.len() == frame.height {
            if frame.unreachable {
                return Ok(MaybeType::Unknown);
            }
            return Err(ParseError::TypeMismatch("operand stack underflow"));
        }
        // The frame height bounds the stack from below, so the stack
        // cannot be empty here.
        self.vals
            .pop()
            .ok_or(ParseError::TypeMismatch("operand stack underflow"))
    }

    fn pop_expected(&mut self, expected: ValueType) -> Result<(), ParseError> {
        match self.pop_val()? {
            MaybeType::Val(t) if t != expected => {
                Err(ParseError::TypeMismatch("operand type mismatch"))
            }
            _ => Ok(()),
        }
    }

    // Control stack ----------------------------------------------------------

    fn top_frame(&self) -> Result<&CtrlFrame, ParseError> {
        self.ctrls
            .last()
            .ok_or(ParseError::TypeMismatch("control stack underflow"))
    }

    fn alloc_label(&mut self) -> u32 {
        self.labels.push(BranchTarget::default());
        (self.labels.len() - 1) as u32
    }

    /// Check the frame's results are on the stack and nothing else, then
    /// pop the frame. The caller re-pushes the results.
    fn pop_ctrl(&mut self) -> Result<CtrlFrame, ParseError> {
        let frame = *self.top_frame()?;
        if let Some(t) = frame.result {
            self.pop_expected(t)?;
        }
        if self.vals.len() != frame.height {
            return Err(ParseError::TypeMismatch(
                "values remain on the stack at the end of a block",
            ));
        }
        self.ctrls.pop();
        Ok(frame)
    }

    fn set_unreachable(&mut self) -> Result<(), ParseError> {
        let frame = self
            .ctrls
            .last_mut()
            .ok_or(ParseError::TypeMismatch("control stack underflow"))?;
        frame.unreachable = true;
        let height = frame.height;
        self.vals.truncate(height);
        Ok(())
    }

    fn frame_at_depth(&self, depth: u32) -> Result<CtrlFrame, ParseError> {
        self.ctrls
            .iter()
            .rev()
            .nth(depth as usize)
            .copied()
            .ok_or(ParseError::UnknownLabel(depth))
    }

    /// The value a branch to this frame transfers: the block result, or
    /// nothing for a loop (branches re-enter its head).
    fn label_result(frame: &CtrlFrame) -> Option<ValueType> {
        if frame.kind == FrameKind::Loop {
            None
        } else {
            frame.result
        }
    }

    // Immediates -------------------------------------------------------------

    fn read_block_type(&mut self, reader: &mut Reader<'_>) -> Result<BlockType, ParseError> {
        let byte = reader.read_byte()?;
        if byte == 0x40 {
            return Ok(BlockType::Empty);
        }
        match ValueType::decode(byte) {
            Ok(t) => Ok(BlockType::Value(t)),
            Err(_) => Err(ParseError::InvalidBlockType(byte)),
        }
    }

    fn read_mem_arg(
        &mut self,
        reader: &mut Reader<'_>,
        access_width: u32,
    ) -> Result<MemArg, ParseError> {
        if !self.module.has_memory() {
            return Err(ParseError::MissingMemory);
        }
        let align = reader.read_var_u32()?;
        // The hint may not exceed the natural alignment of the access.
        if align >= 32 || (1u64 << align) > u64::from(access_width) {
            return Err(ParseError::InvalidAlignment { align });
        }
        let offset = reader.read_var_u32()?;
        Ok(MemArg { align, offset })
    }

    fn check_memory_instr(&mut self, reader: &mut Reader<'_>) -> Result<(), ParseError> {
        let reserved = reader.read_byte()?;
        if reserved != 0x00 {
            return Err(ParseError::InvalidReservedByte(reserved));
        }
        if !self.module.has_memory() {
            return Err(ParseError::MissingMemory);
        }
        Ok(())
    }

    fn local_type(&self, idx: u32) -> Result<ValueType, ParseError> {
        self.locals
            .get(idx as usize)
            .copied()
            .ok_or(ParseError::UnknownLocal(idx))
    }

    // Instruction signatures -------------------------------------------------

    fn testop(&mut self, t: ValueType, instr: Instr) -> Result<(), ParseError> {
        self.pop_expected(t)?;
        self.push_val(ValueType::I32);
        self.code.push(instr);
        Ok(())
    }

    fn relop(&mut self, t: ValueType, instr: Instr) -> Result<(), ParseError> {
        self.pop_expected(t)?;
        self.pop_expected(t)?;
        self.push_val(ValueType::I32);
        self.code.push(instr);
        Ok(())
    }

    fn unop(&mut self, t: ValueType, instr: Instr) -> Result<(), ParseError> {
        self.pop_expected(t)?;
        self.push_val(t);
        self.code.push(instr);
        Ok(())
    }

    fn binop(&mut self, t: ValueType, instr: Instr) -> Result<(), ParseError> {
        self.pop_expected(t)?;
        self.pop_expected(t)?;
        self.push_val(t);
        self.code.push(instr);
        Ok(())
    }

    fn cvtop(&mut self, from: ValueType, to: ValueType, instr: Instr) -> Result<(), ParseError> {
        self.pop_expected(from)?;
        self.push_val(to);
        self.code.push(instr);
        Ok(())
    }

    fn load(
        &mut self,
        reader: &mut Reader<'_>,
        t: ValueType,
        access_width: u32,
        make: fn(MemArg) -> Instr,
    ) -> Result<(), ParseError> {
        let memarg = self.read_mem_arg(reader, access_width)?;
        self.pop_expected(ValueType::I32)?;
        self.push_val(t);
        self.code.push(make(memarg));
        Ok(())
    }

    fn store(
        &mut self,
        reader: &mut Reader<'_>,
        t: ValueType,
        access_width: u32,
        make: fn(MemArg) -> Instr,
    ) -> Result<(), ParseError> {
        let memarg = self.read_mem_arg(reader, access_width)?;
        self.pop_expected(t)?;
        self.pop_expected(ValueType::I32)?;
        self.code.push(make(memarg));
        Ok(())
    }
}
