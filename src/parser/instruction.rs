//! Flat instruction representation with pre-resolved branch targets.
//!
//! Function bodies are decoded into a linear `Vec<Instr>` plus a read-only
//! branch target table (`Vec<BranchTarget>`). Every structured block gets a
//! slot in the table holding the program counter a branch to it jumps to,
//! the number of values the branch transfers, and the operand stack height
//! at the block's entry. Branch instructions carry an index into the table,
//! so a taken branch is a stack truncation and a jump; execution never
//! scans for an `end` and keeps no label stack of its own.
//!
//! `block` and `loop` survive in the stream as no-ops so that program
//! counters line up with the original instruction order. An `if` carries
//! the target taken when its condition is false (the `else` arm, or the
//! matching `end`); an `else` carries the jump over its own arm to `end`.

use std::fmt;

use super::module::ValueType;

/// Alignment hint and constant offset for a memory access.
///
/// The alignment is informational only; unaligned accesses are legal and
/// never trap. The offset is added to the dynamic address with 33-bit
/// precision before the bounds check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemArg {
    pub align: u32,
    pub offset: u32,
}

/// Pre-computed metadata for one branch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BranchTarget {
    /// Program counter a taken branch continues from.
    pub pc: u32,
    /// Operand stack height at the target block's entry, relative to the
    /// function activation.
    pub stack_height: u32,
    /// Number of values a taken branch carries to the target (0 or 1).
    pub arity: u32,
}

/// Block type of a structured control instruction: no result or exactly
/// one. (The function-type form belongs to multi-value, which is out of
/// scope for WebAssembly 1.0.)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Empty,
    Value(ValueType),
}

impl BlockType {
    pub fn result(&self) -> Option<ValueType> {
        match self {
            BlockType::Empty => None,
            BlockType::Value(t) => Some(*t),
        }
    }
}

/// One decoded instruction.
///
/// Branch-shaped variants hold indices into the function's branch target
/// table rather than relative label depths; the depths were resolved
/// during validation.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    // Control
    Unreachable,
    Nop,
    Block,
    Loop,
    If { false_target: u32 },
    Else { end_target: u32 },
    End,
    Br { target: u32 },
    BrIf { target: u32 },
    BrTable { targets: Box<[u32]>, default: u32 },
    Return,
    Call { func_idx: u32 },
    CallIndirect { type_idx: u32 },

    // Parametric
    Drop,
    Select,

    // Variables
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),

    // Memory
    I32Load(MemArg),
    I64Load(MemArg),
    F32Load(MemArg),
    F64Load(MemArg),
    I32Load8S(MemArg),
    I32Load8U(MemArg),
    I32Load16S(MemArg),
    I32Load16U(MemArg),
    I64Load8S(MemArg),
    I64Load8U(MemArg),
    I64Load16S(MemArg),
    I64Load16U(MemArg),
    I64Load32S(MemArg),
    I64Load32U(MemArg),
    I32Store(MemArg),
    I64Store(MemArg),
    F32Store(MemArg),
    F64Store(MemArg),
    I32Store8(MemArg),
    I32Store16(MemArg),
    I64Store8(MemArg),
    I64Store16(MemArg),
    I64Store32(MemArg),
    MemorySize,
    MemoryGrow,

    // Constants
    I32Const(i32),
    I64Const(i64),
    F32Const(f32),
    F64Const(f64),

    // i32 test/comparison
    I32Eqz,
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32LeU,
    I32GeS,
    I32GeU,

    // i64 test/comparison
    I64Eqz,
    I64Eq,
    I64Ne,
    I64LtS,
    I64LtU,
    I64GtS,
    I64GtU,
    I64LeS,
    I64LeU,
    I64GeS,
    I64GeU,

    // f32 comparison
    F32Eq,
    F32Ne,
    F32Lt,
    F32Gt,
    F32Le,
    F32Ge,

    // f64 comparison
    F64Eq,
    F64Ne,
    F64Lt,
    F64Gt,
    F64Le,
    F64Ge,

    // i32 arithmetic and bitwise
    I32Clz,
    I32Ctz,
    I32Popcnt,
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32DivU,
    I32RemS,
    I32RemU,
    I32And,
    I32Or,
    I32Xor,
    I32Shl,
    I32ShrS,
    I32ShrU,
    I32Rotl,
    I32Rotr,

    // i64 arithmetic and bitwise
    I64Clz,
    I64Ctz,
    I64Popcnt,
    I64Add,
    I64Sub,
    I64Mul,
    I64DivS,
    I64DivU,
    I64RemS,
    I64RemU,
    I64And,
    I64Or,
    I64Xor,
    I64Shl,
    I64ShrS,
    I64ShrU,
    I64Rotl,
    I64Rotr,

    // f32 arithmetic
    F32Abs,
    F32Neg,
    F32Ceil,
    F32Floor,
    F32Trunc,
    F32Nearest,
    F32Sqrt,
    F32Add,
    F32Sub,
    F32Mul,
    F32Div,
    F32Min,
    F32Max,
    F32Copysign,

    // f64 arithmetic
    F64Abs,
    F64Neg,
    F64Ceil,
    F64Floor,
    F64Trunc,
    F64Nearest,
    F64Sqrt,
    F64Add,
    F64Sub,
    F64Mul,
    F64Div,
    F64Min,
    F64Max,
    F64Copysign,

    // Conversions
    I32WrapI64,
    I32TruncF32S,
    I32TruncF32U,
    I32TruncF64S,
    I32TruncF64U,
    I64ExtendI32S,
    I64ExtendI32U,
    I64TruncF32S,
    I64TruncF32U,
    I64TruncF64S,
    I64TruncF64U,
    F32ConvertI32S,
    F32ConvertI32U,
    F32ConvertI64S,
    F32ConvertI64U,
    F32DemoteF64,
    F64ConvertI32S,
    F64ConvertI32U,
    F64ConvertI64S,
    F64ConvertI64U,
    F64PromoteF32,
    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,

    // Sign extension
    I32Extend8S,
    I32Extend16S,
    I64Extend8S,
    I64Extend16S,
    I64Extend32S,

    // Saturating truncation (0xFC prefix)
    I32TruncSatF32S,
    I32TruncSatF32U,
    I32TruncSatF64S,
    I32TruncSatF64U,
    I64TruncSatF32S,
    I64TruncSatF32U,
    I64TruncSatF64S,
    I64TruncSatF64U,
}

impl Instr {
    /// The text-format mnemonic for this instruction.
    pub fn mnemonic(&self) -> &'static str {
        use Instr::*;
        match self {
            Unreachable => "unreachable",
            Nop => "nop",
            Block => "block",
            Loop => "loop",
            If { .. } => "if",
            Else { .. } => "else",
            End => "end",
            Br { .. } => "br",
            BrIf { .. } => "br_if",
            BrTable { .. } => "br_table",
            Return => "return",
            Call { .. } => "call",
            CallIndirect { .. } => "call_indirect",

            Drop => "drop",
            Select => "select",

            LocalGet(_) => "local.get",
            LocalSet(_) => "local.set",
            LocalTee(_) => "local.tee",
            GlobalGet(_) => "global.get",
            GlobalSet(_) => "global.set",

            I32Load(_) => "i32.load",
            I64Load(_) => "i64.load",
            F32Load(_) => "f32.load",
            F64Load(_) => "f64.load",
            I32Load8S(_) => "i32.load8_s",
            I32Load8U(_) => "i32.load8_u",
            I32Load16S(_) => "i32.load16_s",
            I32Load16U(_) => "i32.load16_u",
            I64Load8S(_) => "i64.load8_s",
            I64Load8U(_) => "i64.load8_u",
            I64Load16S(_) => "i64.load16_s",
            I64Load16U(_) => "i64.load16_u",
            I64Load32S(_) => "i64.load32_s",
            I64Load32U(_) => "i64.load32_u",
            I32Store(_) => "i32.store",
            I64Store(_) => "i64.store",
            F32Store(_) => "f32.store",
            F64Store(_) => "f64.store",
            I32Store8(_) => "i32.store8",
            I32Store16(_) => "i32.store16",
            I64Store8(_) => "i64.store8",
            I64Store16(_) => "i64.store16",
            I64Store32(_) => "i64.store32",
            MemorySize => "memory.size",
            MemoryGrow => "memory.grow",

            I32Const(_) => "i32.const",
            I64Const(_) => "i64.const",
            F32Const(_) => "f32.const",
            F64Const(_) => "f64.const",

            I32Eqz => "i32.eqz",
            I32Eq => "i32.eq",
            I32Ne => "i32.ne",
            I32LtS => "i32.lt_s",
            I32LtU => "i32.lt_u",
            I32GtS => "i32.gt_s",
            I32GtU => "i32.gt_u",
            I32LeS => "i32.le_s",
            I32LeU => "i32.le_u",
            I32GeS => "i32.ge_s",
            I32GeU => "i32.ge_u",
            I64Eqz => "i64.eqz",
            I64Eq => "i64.eq",
            I64Ne => "i64.ne",
            I64LtS => "i64.lt_s",
            I64LtU => "i64.lt_u",
            I64GtS => "i64.gt_s",
            I64GtU => "i64.gt_u",
            I64LeS => "i64.le_s",
            I64LeU => "i64.le_u",
            I64GeS => "i64.ge_s",
            I64GeU => "i64.ge_u",
            F32Eq => "f32.eq",
            F32Ne => "f32.ne",
            F32Lt => "f32.lt",
            F32Gt => "f32.gt",
            F32Le => "f32.le",
            F32Ge => "f32.ge",
            F64Eq => "f64.eq",
            F64Ne => "f64.ne",
            F64Lt => "f64.lt",
            F64Gt => "f64.gt",
            F64Le => "f64.le",
            F64Ge => "f64.ge",

            I32Clz => "i32.clz",
            I32Ctz => "i32.ctz",
            I32Popcnt => "i32.popcnt",
            I32Add => "i32.add",
            I32Sub => "i32.sub",
            I32Mul => "i32.mul",
            I32DivS => "i32.div_s",
            I32DivU => "i32.div_u",
            I32RemS => "i32.rem_s",
            I32RemU => "i32.rem_u",
            I32And => "i32.and",
            I32Or => "i32.or",
            I32Xor => "i32.xor",
            I32Shl => "i32.shl",
            I32ShrS => "i32.shr_s",
            I32ShrU => "i32.shr_u",
            I32Rotl => "i32.rotl",
            I32Rotr => "i32.rotr",
            I64Clz => "i64.clz",
            I64Ctz => "i64.ctz",
            I64Popcnt => "i64.popcnt",
            I64Add => "i64.add",
            I64Sub => "i64.sub",
            I64Mul => "i64.mul",
            I64DivS => "i64.div_s",
            I64DivU => "i64.div_u",
            I64RemS => "i64.rem_s",
            I64RemU => "i64.rem_u",
            I64And => "i64.and",
            I64Or => "i64.or",
            I64Xor => "i64.xor",
            I64Shl => "i64.shl",
            I64ShrS => "i64.shr_s",
            I64ShrU => "i64.shr_u",
            I64Rotl => "i64.rotl",
            I64Rotr => "i64.rotr",

            F32Abs => "f32.abs",
            F32Neg => "f32.neg",
            F32Ceil => "f32.ceil",
            F32Floor => "f32.floor",
            F32Trunc => "f32.trunc",
            F32Nearest => "f32.nearest",
            F32Sqrt => "f32.sqrt",
            F32Add => "f32.add",
            F32Sub => "f32.sub",
            F32Mul => "f32.mul",
            F32Div => "f32.div",
            F32Min => "f32.min",
            F32Max => "f32.max",
            F32Copysign => "f32.copysign",
            F64Abs => "f64.abs",
            F64Neg => "f64.neg",
            F64Ceil => "f64.ceil",
            F64Floor => "f64.floor",
            F64Trunc => "f64.trunc",
            F64Nearest => "f64.nearest",
            F64Sqrt => "f64.sqrt",
            F64Add => "f64.add",
            F64Sub => "f64.sub",
            F64Mul => "f64.mul",
            F64Div => "f64.div",
            F64Min => "f64.min",
            F64Max => "f64.max",
            F64Copysign => "f64.copysign",

            I32WrapI64 => "i32.wrap_i64",
            I32TruncF32S => "i32.trunc_f32_s",
            I32TruncF32U => "i32.trunc_f32_u",
            I32TruncF64S => "i32.trunc_f64_s",
            I32TruncF64U => "i32.trunc_f64_u",
            I64ExtendI32S => "i64.extend_i32_s",
            I64ExtendI32U => "i64.extend_i32_u",
            I64TruncF32S => "i64.trunc_f32_s",
            I64TruncF32U => "i64.trunc_f32_u",
            I64TruncF64S => "i64.trunc_f64_s",
            I64TruncF64U => "i64.trunc_f64_u",
            F32ConvertI32S => "f32.convert_i32_s",
            F32ConvertI32U => "f32.convert_i32_u",
            F32ConvertI64S => "f32.convert_i64_s",
            F32ConvertI64U => "f32.convert_i64_u",
            F32DemoteF64 => "f32.demote_f64",
            F64ConvertI32S => "f64.convert_i32_s",
            F64ConvertI32U => "f64.convert_i32_u",
            F64ConvertI64S => "f64.convert_i64_s",
            F64ConvertI64U => "f64.convert_i64_u",
            F64PromoteF32 => "f64.promote_f32",
            I32ReinterpretF32 => "i32.reinterpret_f32",
            I64ReinterpretF64 => "i64.reinterpret_f64",
            F32ReinterpretI32 => "f32.reinterpret_i32",
            F64ReinterpretI64 => "f64.reinterpret_i64",

            I32Extend8S => "i32.extend8_s",
            I32Extend16S => "i32.extend16_s",
            I64Extend8S => "i64.extend8_s",
            I64Extend16S => "i64.extend16_s",
            I64Extend32S => "i64.extend32_s",

            I32TruncSatF32S => "i32.trunc_sat_f32_s",
            I32TruncSatF32U => "i32.trunc_sat_f32_u",
            I32TruncSatF64S => "i32.trunc_sat_f64_s",
            I32TruncSatF64U => "i32.trunc_sat_f64_u",
            I64TruncSatF32S => "i64.trunc_sat_f32_s",
            I64TruncSatF32U => "i64.trunc_sat_f32_u",
            I64TruncSatF64S => "i64.trunc_sat_f64_s",
            I64TruncSatF64U => "i64.trunc_sat_f64_u",
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instr::*;

        write!(f, "{}", self.mnemonic())?;
        match self {
            Call { func_idx } => write!(f, " {func_idx}"),
            CallIndirect { type_idx } => write!(f, " (type {type_idx})"),
            LocalGet(idx) | LocalSet(idx) | LocalTee(idx) | GlobalGet(idx) | GlobalSet(idx) => {
                write!(f, " {idx}")
            }
            I32Const(v) => write!(f, " {v}"),
            I64Const(v) => write!(f, " {v}"),
            F32Const(v) => write!(f, " {v}"),
            F64Const(v) => write!(f, " {v}"),
            I32Load(m) | I64Load(m) | F32Load(m) | F64Load(m) | I32Load8S(m) | I32Load8U(m)
            | I32Load16S(m) | I32Load16U(m) | I64Load8S(m) | I64Load8U(m) | I64Load16S(m)
            | I64Load16U(m) | I64Load32S(m) | I64Load32U(m) | I32Store(m) | I64Store(m)
            | F32Store(m) | F64Store(m) | I32Store8(m) | I32Store16(m) | I64Store8(m)
            | I64Store16(m) | I64Store32(m) => write!(f, " align={} offset={}", m.align, m.offset),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mnemonics() {
        assert_eq!(Instr::Unreachable.mnemonic(), "unreachable");
        assert_eq!(Instr::I32Add.mnemonic(), "i32.add");
        assert_eq!(Instr::F64Copysign.mnemonic(), "f64.copysign");
        assert_eq!(Instr::I64TruncSatF64U.mnemonic(), "i64.trunc_sat_f64_u");
    }

    #[test]
    fn test_display_with_immediates() {
        assert_eq!(Instr::I32Const(-7).to_string(), "i32.const -7");
        assert_eq!(Instr::LocalGet(3).to_string(), "local.get 3");
        assert_eq!(
            Instr::I32Load(MemArg { align: 2, offset: 16 }).to_string(),
            "i32.load align=2 offset=16"
        );
        assert_eq!(Instr::Call { func_idx: 1 }.to_string(), "call 1");
    }

    #[test]
    fn test_block_type_result() {
        assert_eq!(BlockType::Empty.result(), None);
        assert_eq!(BlockType::Value(ValueType::F32).result(), Some(ValueType::F32));
    }
}
