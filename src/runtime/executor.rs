//! The interpreter loop.
//!
//! Each function activation is one call to [`invoke`]: it owns the
//! function's locals and operand stack and walks the flat instruction
//! stream with a plain program counter. Guest calls recurse with
//! `depth + 1`, so the native call stack is the frame stack and the depth
//! guard bounds it. Branches are constant-time: every branch instruction
//! indexes the function's pre-computed [`BranchTarget`] table and the
//! operand stack is unwound to the recorded height.
//!
//! Host calls leave and re-enter through a value-returning protocol; a
//! trap never unwinds across a host frame.

use log::debug;

use super::host::ExternalFunction;
use super::instance::Instance;
use super::ops::{bitwise, comparison, conversion, memory as memory_ops, numeric};
use super::stack::Stack;
use super::{ExecutionResult, SharedMemory, SharedTable, Trap, Value};
use crate::parser::instruction::{BranchTarget, Instr};
use crate::parser::limits::CALL_STACK_LIMIT;

/// Execute a function on an instance.
///
/// `func_idx` indexes the full function index space, imported functions
/// included. Arguments must match the function's signature. Embedders
/// normally pass `depth = 0`; a host function calling back in passes the
/// depth it was given plus one.
///
/// # Panics
///
/// Panics if `func_idx` is out of bounds or the arguments do not match
/// the signature; both are embedder contract violations, not runtime
/// conditions.
pub fn execute(instance: &mut Instance, func_idx: u32, args: &[Value], depth: u32) -> ExecutionResult {
    match invoke(instance, func_idx, args, depth) {
        Ok(Some(value)) => ExecutionResult::Value(value),
        Ok(None) => ExecutionResult::Void,
        Err(trap) => {
            debug!("execution of function {func_idx} trapped: {trap}");
            ExecutionResult::Trap
        }
    }
}

/// Run one activation to completion. Returns the function's result value,
/// if it declares one.
pub(crate) fn invoke(
    instance: &mut Instance,
    func_idx: u32,
    args: &[Value],
    depth: u32,
) -> Result<Option<Value>, Trap> {
    if depth >= CALL_STACK_LIMIT {
        return Err(Trap::CallStackExhausted);
    }

    if (func_idx as usize) < instance.imported_function_count() {
        let host = instance.imported_function(func_idx);
        return call_host(&host, instance, args, depth);
    }

    let module = instance.module_handle();
    let code = module.function_code(func_idx);
    let result_type = module.function_type(func_idx).result();
    debug_assert_eq!(args.len(), module.function_type(func_idx).params.len());

    let mut locals = Vec::with_capacity(args.len() + code.locals.len());
    locals.extend_from_slice(args);
    locals.extend(code.locals.iter().map(|t| Value::zero(*t)));

    let memory = instance.memory().cloned();
    let table = instance.table().cloned();
    let instrs = &code.instrs;
    let labels = &code.labels;
    let mut stack = Stack::new();
    let mut pc = 0usize;

    while pc < instrs.len() {
        let instr = &instrs[pc];
        pc += 1;
        match instr {
            Instr::Unreachable => return Err(Trap::Unreachable),
            // block and loop carry no runtime behaviour of their own;
            // their structure lives in the branch target table.
            Instr::Nop | Instr::Block | Instr::Loop | Instr::End => {}

            Instr::If { false_target } => {
                if stack.pop_i32() == 0 {
                    pc = take_branch(&mut stack, &labels[*false_target as usize]);
                }
            }
            // Reached only at the end of a then arm: skip the else arm.
            Instr::Else { end_target } => pc = labels[*end_target as usize].pc as usize,

            Instr::Br { target } => pc = take_branch(&mut stack, &labels[*target as usize]),
            Instr::BrIf { target } => {
                if stack.pop_i32() != 0 {
                    pc = take_branch(&mut stack, &labels[*target as usize]);
                }
            }
            Instr::BrTable { targets, default } => {
                let index = stack.pop_u32() as usize;
                let slot = targets.get(index).copied().unwrap_or(*default);
                pc = take_branch(&mut stack, &labels[slot as usize]);
            }
            // The function-level target is always slot 0.
            Instr::Return => pc = take_branch(&mut stack, &labels[0]),

            Instr::Call { func_idx } => call_function(instance, *func_idx, &mut stack, depth)?,
            Instr::CallIndirect { type_idx } => {
                let elem_idx = stack.pop_u32();
                let entry = expect_table(&table).borrow().get(elem_idx)?;
                let callee = entry.ok_or(Trap::UninitializedElement)?;
                if module.function_type(callee) != &module.types[*type_idx as usize] {
                    return Err(Trap::IndirectCallTypeMismatch);
                }
                call_function(instance, callee, &mut stack, depth)?;
            }

            Instr::Drop => {
                stack.pop();
            }
            Instr::Select => {
                let condition = stack.pop_i32();
                let on_false = stack.pop();
                let on_true = stack.pop();
                stack.push(if condition != 0 { on_true } else { on_false });
            }

            Instr::LocalGet(idx) => stack.push(locals[*idx as usize]),
            Instr::LocalSet(idx) => locals[*idx as usize] = stack.pop(),
            Instr::LocalTee(idx) => locals[*idx as usize] = stack.top(),
            Instr::GlobalGet(idx) => stack.push(instance.global_get(*idx)),
            Instr::GlobalSet(idx) => instance.global_set(*idx, stack.pop()),

            Instr::I32Load(m) => memory_ops::i32_load(&mut stack, expect_memory(&memory), *m)?,
            Instr::I64Load(m) => memory_ops::i64_load(&mut stack, expect_memory(&memory), *m)?,
            Instr::F32Load(m) => memory_ops::f32_load(&mut stack, expect_memory(&memory), *m)?,
            Instr::F64Load(m) => memory_ops::f64_load(&mut stack, expect_memory(&memory), *m)?,
            Instr::I32Load8S(m) => memory_ops::i32_load8_s(&mut stack, expect_memory(&memory), *m)?,
            Instr::I32Load8U(m) => memory_ops::i32_load8_u(&mut stack, expect_memory(&memory), *m)?,
            Instr::I32Load16S(m) => {
                memory_ops::i32_load16_s(&mut stack, expect_memory(&memory), *m)?
            }
            Instr::I32Load16U(m) => {
                memory_ops::i32_load16_u(&mut stack, expect_memory(&memory), *m)?
            }
            Instr::I64Load8S(m) => memory_ops::i64_load8_s(&mut stack, expect_memory(&memory), *m)?,
            Instr::I64Load8U(m) => memory_ops::i64_load8_u(&mut stack, expect_memory(&memory), *m)?,
            Instr::I64Load16S(m) => {
                memory_ops::i64_load16_s(&mut stack, expect_memory(&memory), *m)?
            }
            Instr::I64Load16U(m) => {
                memory_ops::i64_load16_u(&mut stack, expect_memory(&memory), *m)?
            }
            Instr::I64Load32S(m) => {
                memory_ops::i64_load32_s(&mut stack, expect_memory(&memory), *m)?
            }
            Instr::I64Load32U(m) => {
                memory_ops::i64_load32_u(&mut stack, expect_memory(&memory), *m)?
            }
            Instr::I32Store(m) => memory_ops::i32_store(&mut stack, expect_memory(&memory), *m)?,
            Instr::I64Store(m) => memory_ops::i64_store(&mut stack, expect_memory(&memory), *m)?,
            Instr::F32Store(m) => memory_ops::f32_store(&mut stack, expect_memory(&memory), *m)?,
            Instr::F64Store(m) => memory_ops::f64_store(&mut stack, expect_memory(&memory), *m)?,
            Instr::I32Store8(m) => memory_ops::i32_store8(&mut stack, expect_memory(&memory), *m)?,
            Instr::I32Store16(m) => {
                memory_ops::i32_store16(&mut stack, expect_memory(&memory), *m)?
            }
            Instr::I64Store8(m) => memory_ops::i64_store8(&mut stack, expect_memory(&memory), *m)?,
            Instr::I64Store16(m) => {
                memory_ops::i64_store16(&mut stack, expect_memory(&memory), *m)?
            }
            Instr::I64Store32(m) => {
                memory_ops::i64_store32(&mut stack, expect_memory(&memory), *m)?
            }
            Instr::MemorySize => {
                let pages = expect_memory(&memory).borrow().size();
                stack.push(Value::I32(pages as i32));
            }
            Instr::MemoryGrow => {
                let delta = stack.pop_u32();
                let previous = expect_memory(&memory).borrow_mut().grow(delta);
                stack.push(Value::I32(previous));
            }

            Instr::I32Const(v) => stack.push(Value::I32(*v)),
            Instr::I64Const(v) => stack.push(Value::I64(*v)),
            Instr::F32Const(v) => stack.push(Value::F32(*v)),
            Instr::F64Const(v) => stack.push(Value::F64(*v)),

            Instr::I32Eqz => comparison::i32_eqz(&mut stack),
            Instr::I32Eq => comparison::i32_eq(&mut stack),
            Instr::I32Ne => comparison::i32_ne(&mut stack),
            Instr::I32LtS => comparison::i32_lt_s(&mut stack),
            Instr::I32LtU => comparison::i32_lt_u(&mut stack),
            Instr::I32GtS => comparison::i32_gt_s(&mut stack),
            Instr::I32GtU => comparison::i32_gt_u(&mut stack),
            Instr::I32LeS => comparison::i32_le_s(&mut stack),
            Instr::I32LeU => comparison::i32_le_u(&mut stack),
            Instr::I32GeS => comparison::i32_ge_s(&mut stack),
            Instr::I32GeU => comparison::i32_ge_u(&mut stack),
            Instr::I64Eqz => comparison::i64_eqz(&mut stack),
            Instr::I64Eq => comparison::i64_eq(&mut stack),
            Instr::I64Ne => comparison::i64_ne(&mut stack),
            Instr::I64LtS => comparison::i64_lt_s(&mut stack),
            Instr::I64LtU => comparison::i64_lt_u(&mut stack),
            Instr::I64GtS => comparison::i64_gt_s(&mut stack),
            Instr::I64GtU => comparison::i64_gt_u(&mut stack),
            Instr::I64LeS => comparison::i64_le_s(&mut stack),
            Instr::I64LeU => comparison::i64_le_u(&mut stack),
            Instr::I64GeS => comparison::i64_ge_s(&mut stack),
            Instr::I64GeU => comparison::i64_ge_u(&mut stack),
            Instr::F32Eq => comparison::f32_eq(&mut stack),
            Instr::F32Ne => comparison::f32_ne(&mut stack),
            Instr::F32Lt => comparison::f32_lt(&mut stack),
            Instr::F32Gt => comparison::f32_gt(&mut stack),
            Instr::F32Le => comparison::f32_le(&mut stack),
            Instr::F32Ge => comparison::f32_ge(&mut stack),
            Instr::F64Eq => comparison::f64_eq(&mut stack),
            Instr::F64Ne => comparison::f64_ne(&mut stack),
            Instr::F64Lt => comparison::f64_lt(&mut stack),
            Instr::F64Gt => comparison::f64_gt(&mut stack),
            Instr::F64Le => comparison::f64_le(&mut stack),
            Instr::F64Ge => comparison::f64_ge(&mut stack),

            Instr::I32Clz => numeric::i32_clz(&mut stack),
            Instr::I32Ctz => numeric::i32_ctz(&mut stack),
            Instr::I32Popcnt => numeric::i32_popcnt(&mut stack),
            Instr::I32Add => numeric::i32_add(&mut stack),
            Instr::I32Sub => numeric::i32_sub(&mut stack),
            Instr::I32Mul => numeric::i32_mul(&mut stack),
            Instr::I32DivS => numeric::i32_div_s(&mut stack)?,
            Instr::I32DivU => numeric::i32_div_u(&mut stack)?,
            Instr::I32RemS => numeric::i32_rem_s(&mut stack)?,
            Instr::I32RemU => numeric::i32_rem_u(&mut stack)?,
            Instr::I32And => bitwise::i32_and(&mut stack),
            Instr::I32Or => bitwise::i32_or(&mut stack),
            Instr::I32Xor => bitwise::i32_xor(&mut stack),
            Instr::I32Shl => bitwise::i32_shl(&mut stack),
            Instr::I32ShrS => bitwise::i32_shr_s(&mut stack),
            Instr::I32ShrU => bitwise::i32_shr_u(&mut stack),
            Instr::I32Rotl => bitwise::i32_rotl(&mut stack),
            Instr::I32Rotr => bitwise::i32_rotr(&mut stack),
            Instr::I64Clz => numeric::i64_clz(&mut stack),
            Instr::I64Ctz => numeric::i64_ctz(&mut stack),
            Instr::I64Popcnt => numeric::i64_popcnt(&mut stack),
            Instr::I64Add => numeric::i64_add(&mut stack),
            Instr::I64Sub => numeric::i64_sub(&mut stack),
            Instr::I64Mul => numeric::i64_mul(&mut stack),
            Instr::I64DivS => numeric::i64_div_s(&mut stack)?,
            Instr::I64DivU => numeric::i64_div_u(&mut stack)?,
            Instr::I64RemS => numeric::i64_rem_s(&mut stack)?,
            Instr::I64RemU => numeric::i64_rem_u(&mut stack)?,
            Instr::I64And => bitwise::i64_and(&mut stack),
            Instr::I64Or => bitwise::i64_or(&mut stack),
            Instr::I64Xor => bitwise::i64_xor(&mut stack),
            Instr::I64Shl => bitwise::i64_shl(&mut stack),
            Instr::I64ShrS => bitwise::i64_shr_s(&mut stack),
            Instr::I64ShrU => bitwise::i64_shr_u(&mut stack),
            Instr::I64Rotl => bitwise::i64_rotl(&mut stack),
            Instr::I64Rotr => bitwise::i64_rotr(&mut stack),

            Instr::F32Abs => numeric::f32_abs(&mut stack),
            Instr::F32Neg => numeric::f32_neg(&mut stack),
            Instr::F32Ceil => numeric::f32_ceil(&mut stack),
            Instr::F32Floor => numeric::f32_floor(&mut stack),
            Instr::F32Trunc => numeric::f32_trunc(&mut stack),
            Instr::F32Nearest => numeric::f32_nearest(&mut stack),
            Instr::F32Sqrt => numeric::f32_sqrt(&mut stack),
            Instr::F32Add => numeric::f32_add(&mut stack),
            Instr::F32Sub => numeric::f32_sub(&mut stack),
            Instr::F32Mul => numeric::f32_mul(&mut stack),
            Instr::F32Div => numeric::f32_div(&mut stack),
            Instr::F32Min => numeric::f32_min(&mut stack),
            Instr::F32Max => numeric::f32_max(&mut stack),
            Instr::F32Copysign => numeric::f32_copysign(&mut stack),
            Instr::F64Abs => numeric::f64_abs(&mut stack),
            Instr::F64Neg => numeric::f64_neg(&mut stack),
            Instr::F64Ceil => numeric::f64_ceil(&mut stack),
            Instr::F64Floor => numeric::f64_floor(&mut stack),
            Instr::F64Trunc => numeric::f64_trunc(&mut stack),
            Instr::F64Nearest => numeric::f64_nearest(&mut stack),
            Instr::F64Sqrt => numeric::f64_sqrt(&mut stack),
            Instr::F64Add => numeric::f64_add(&mut stack),
            Instr::F64Sub => numeric::f64_sub(&mut stack),
            Instr::F64Mul => numeric::f64_mul(&mut stack),
            Instr::F64Div => numeric::f64_div(&mut stack),
            Instr::F64Min => numeric::f64_min(&mut stack),
            Instr::F64Max => numeric::f64_max(&mut stack),
            Instr::F64Copysign => numeric::f64_copysign(&mut stack),

            Instr::I32WrapI64 => conversion::i32_wrap_i64(&mut stack),
            Instr::I32TruncF32S => conversion::i32_trunc_f32_s(&mut stack)?,
            Instr::I32TruncF32U => conversion::i32_trunc_f32_u(&mut stack)?,
            Instr::I32TruncF64S => conversion::i32_trunc_f64_s(&mut stack)?,
            Instr::I32TruncF64U => conversion::i32_trunc_f64_u(&mut stack)?,
            Instr::I64ExtendI32S => conversion::i64_extend_i32_s(&mut stack),
            Instr::I64ExtendI32U => conversion::i64_extend_i32_u(&mut stack),
            Instr::I64TruncF32S => conversion::i64_trunc_f32_s(&mut stack)?,
            Instr::I64TruncF32U => conversion::i64_trunc_f32_u(&mut stack)?,
            Instr::I64TruncF64S => conversion::i64_trunc_f64_s(&mut stack)?,
            Instr::I64TruncF64U => conversion::i64_trunc_f64_u(&mut stack)?,
            Instr::F32ConvertI32S => conversion::f32_convert_i32_s(&mut stack),
            Instr::F32ConvertI32U => conversion::f32_convert_i32_u(&mut stack),
            Instr::F32ConvertI64S => conversion::f32_convert_i64_s(&mut stack),
            Instr::F32ConvertI64U => conversion::f32_convert_i64_u(&mut stack),
            Instr::F32DemoteF64 => conversion::f32_demote_f64(&mut stack),
            Instr::F64ConvertI32S => conversion::f64_convert_i32_s(&mut stack),
            Instr::F64ConvertI32U => conversion::f64_convert_i32_u(&mut stack),
            Instr::F64ConvertI64S => conversion::f64_convert_i64_s(&mut stack),
            Instr::F64ConvertI64U => conversion::f64_convert_i64_u(&mut stack),
            Instr::F64PromoteF32 => conversion::f64_promote_f32(&mut stack),
            Instr::I32ReinterpretF32 => conversion::i32_reinterpret_f32(&mut stack),
            Instr::I64ReinterpretF64 => conversion::i64_reinterpret_f64(&mut stack),
            Instr::F32ReinterpretI32 => conversion::f32_reinterpret_i32(&mut stack),
            Instr::F64ReinterpretI64 => conversion::f64_reinterpret_i64(&mut stack),

            Instr::I32Extend8S => conversion::i32_extend8_s(&mut stack),
            Instr::I32Extend16S => conversion::i32_extend16_s(&mut stack),
            Instr::I64Extend8S => conversion::i64_extend8_s(&mut stack),
            Instr::I64Extend16S => conversion::i64_extend16_s(&mut stack),
            Instr::I64Extend32S => conversion::i64_extend32_s(&mut stack),

            Instr::I32TruncSatF32S => conversion::i32_trunc_sat_f32_s(&mut stack),
            Instr::I32TruncSatF32U => conversion::i32_trunc_sat_f32_u(&mut stack),
            Instr::I32TruncSatF64S => conversion::i32_trunc_sat_f64_s(&mut stack),
            Instr::I32TruncSatF64U => conversion::i32_trunc_sat_f64_u(&mut stack),
            Instr::I64TruncSatF32S => conversion::i64_trunc_sat_f32_s(&mut stack),
            Instr::I64TruncSatF32U => conversion::i64_trunc_sat_f32_u(&mut stack),
            Instr::I64TruncSatF64S => conversion::i64_trunc_sat_f64_s(&mut stack),
            Instr::I64TruncSatF64U => conversion::i64_trunc_sat_f64_u(&mut stack),
        }
    }

    Ok(result_type.map(|_| stack.pop()))
}

/// Transfer the branch's values and jump: the heart of constant-time
/// control flow.
#[inline]
fn take_branch(stack: &mut Stack, target: &BranchTarget) -> usize {
    stack.unwind(target.stack_height as usize, target.arity as usize);
    target.pc as usize
}

/// Pop the callee's arguments and run it, pushing its result back.
fn call_function(
    instance: &mut Instance,
    func_idx: u32,
    stack: &mut Stack,
    depth: u32,
) -> Result<(), Trap> {
    let param_count = instance.module().function_type(func_idx).params.len();
    let args = stack.pop_n(param_count);
    if let Some(result) = invoke(instance, func_idx, &args, depth + 1)? {
        stack.push(result);
    }
    Ok(())
}

/// Invoke a host function and police its declared result type: a result
/// that violates the signature becomes a trap rather than a corrupted
/// operand stack.
fn call_host(
    host: &ExternalFunction,
    instance: &mut Instance,
    args: &[Value],
    depth: u32,
) -> Result<Option<Value>, Trap> {
    match (host.func)(instance, args, depth) {
        ExecutionResult::Trap => Err(Trap::HostFunctionTrapped),
        ExecutionResult::Void => match host.func_type.result() {
            None => Ok(None),
            Some(_) => Err(Trap::HostResultTypeMismatch),
        },
        ExecutionResult::Value(value) => match host.func_type.result() {
            Some(t) if value.value_type() == t => Ok(Some(value)),
            _ => Err(Trap::HostResultTypeMismatch),
        },
    }
}

#[inline]
fn expect_memory(memory: &Option<SharedMemory>) -> &SharedMemory {
    match memory {
        Some(m) => m,
        None => unreachable!("memory instruction in a module without memory"),
    }
}

#[inline]
fn expect_table(table: &Option<SharedTable>) -> &SharedTable {
    match table {
        Some(t) => t,
        None => unreachable!("call_indirect in a module without table"),
    }
}
