//! Test and comparison operations. All of them produce an i32 that is 0
//! or 1. Any comparison with a NaN operand is false, except `ne`, which
//! is true.

use super::{Stack, Value};

#[inline]
fn push_bool(stack: &mut Stack, b: bool) {
    stack.push(Value::I32(i32::from(b)));
}

pub fn i32_eqz(stack: &mut Stack) {
    let c1 = stack.pop_i32();
    push_bool(stack, c1 == 0);
}

pub fn i32_eq(stack: &mut Stack) {
    let c2 = stack.pop_i32();
    let c1 = stack.pop_i32();
    push_bool(stack, c1 == c2);
}

pub fn i32_ne(stack: &mut Stack) {
    let c2 = stack.pop_i32();
    let c1 = stack.pop_i32();
    push_bool(stack, c1 != c2);
}

pub fn i32_lt_s(stack: &mut Stack) {
    let c2 = stack.pop_i32();
    let c1 = stack.pop_i32();
    push_bool(stack, c1 < c2);
}

pub fn i32_lt_u(stack: &mut Stack) {
    let c2 = stack.pop_u32();
    let c1 = stack.pop_u32();
    push_bool(stack, c1 < c2);
}

pub fn i32_gt_s(stack: &mut Stack) {
    let c2 = stack.pop_i32();
    let c1 = stack.pop_i32();
    push_bool(stack, c1 > c2);
}

pub fn i32_gt_u(stack: &mut Stack) {
    let c2 = stack.pop_u32();
    let c1 = stack.pop_u32();
    push_bool(stack, c1 > c2);
}

pub fn i32_le_s(stack: &mut Stack) {
    let c2 = stack.pop_i32();
    let c1 = stack.pop_i32();
    push_bool(stack, c1 <= c2);
}

pub fn i32_le_u(stack: &mut Stack) {
    let c2 = stack.pop_u32();
    let c1 = stack.pop_u32();
    push_bool(stack, c1 <= c2);
}

pub fn i32_ge_s(stack: &mut Stack) {
    let c2 = stack.pop_i32();
    let c1 = stack.pop_i32();
    push_bool(stack, c1 >= c2);
}

pub fn i32_ge_u(stack: &mut Stack) {
    let c2 = stack.pop_u32();
    let c1 = stack.pop_u32();
    push_bool(stack, c1 >= c2);
}

pub fn i64_eqz(stack: &mut Stack) {
    let c1 = stack.pop_i64();
    push_bool(stack, c1 == 0);
}

pub fn i64_eq(stack: &mut Stack) {
    let c2 = stack.pop_i64();
    let c1 = stack.pop_i64();
    push_bool(stack, c1 == c2);
}

pub fn i64_ne(stack: &mut Stack) {
    let c2 = stack.pop_i64();
    let c1 = stack.pop_i64();
    push_bool(stack, c1 != c2);
}

pub fn i64_lt_s(stack: &mut Stack) {
    let c2 = stack.pop_i64();
    let c1 = stack.pop_i64();
    push_bool(stack, c1 < c2);
}

pub fn i64_lt_u(stack: &mut Stack) {
    let c2 = stack.pop_u64();
    let c1 = stack.pop_u64();
    push_bool(stack, c1 < c2);
}

pub fn i64_gt_s(stack: &mut Stack) {
    let c2 = stack.pop_i64();
    let c1 = stack.pop_i64();
    push_bool(stack, c1 > c2);
}

pub fn i64_gt_u(stack: &mut Stack) {
    let c2 = stack.pop_u64();
    let c1 = stack.pop_u64();
    push_bool(stack, c1 > c2);
}

pub fn i64_le_s(stack: &mut Stack) {
    let c2 = stack.pop_i64();
    let c1 = stack.pop_i64();
    push_bool(stack, c1 <= c2);
}

pub fn i64_le_u(stack: &mut Stack) {
    let c2 = stack.pop_u64();
    let c1 = stack.pop_u64();
    push_bool(stack, c1 <= c2);
}

pub fn i64_ge_s(stack: &mut Stack) {
    let c2 = stack.pop_i64();
    let c1 = stack.pop_i64();
    push_bool(stack, c1 >= c2);
}

pub fn i64_ge_u(stack: &mut Stack) {
    let c2 = stack.pop_u64();
    let c1 = stack.pop_u64();
    push_bool(stack, c1 >= c2);
}

pub fn f32_eq(stack: &mut Stack) {
    let c2 = stack.pop_f32();
    let c1 = stack.pop_f32();
    push_bool(stack, c1 == c2);
}

pub fn f32_ne(stack: &mut Stack) {
    let c2 = stack.pop_f32();
    let c1 = stack.pop_f32();
    push_bool(stack, c1 != c2);
}

pub fn f32_lt(stack: &mut Stack) {
    let c2 = stack.pop_f32();
    let c1 = stack.pop_f32();
    push_bool(stack, c1 < c2);
}

pub fn f32_gt(stack: &mut Stack) {
    let c2 = stack.pop_f32();
    let c1 = stack.pop_f32();
    push_bool(stack, c1 > c2);
}

pub fn f32_le(stack: &mut Stack) {
    let c2 = stack.pop_f32();
    let c1 = stack.pop_f32();
    push_bool(stack, c1 <= c2);
}

pub fn f32_ge(stack: &mut Stack) {
    let c2 = stack.pop_f32();
    let c1 = stack.pop_f32();
    push_bool(stack, c1 >= c2);
}

pub fn f64_eq(stack: &mut Stack) {
    let c2 = stack.pop_f64();
    let c1 = stack.pop_f64();
    push_bool(stack, c1 == c2);
}

pub fn f64_ne(stack: &mut Stack) {
    let c2 = stack.pop_f64();
    let c1 = stack.pop_f64();
    push_bool(stack, c1 != c2);
}

pub fn f64_lt(stack: &mut Stack) {
    let c2 = stack.pop_f64();
    let c1 = stack.pop_f64();
    push_bool(stack, c1 < c2);
}

pub fn f64_gt(stack: &mut Stack) {
    let c2 = stack.pop_f64();
    let c1 = stack.pop_f64();
    push_bool(stack, c1 > c2);
}

pub fn f64_le(stack: &mut Stack) {
    let c2 = stack.pop_f64();
    let c1 = stack.pop_f64();
    push_bool(stack, c1 <= c2);
}

pub fn f64_ge(stack: &mut Stack) {
    let c2 = stack.pop_f64();
    let c1 = stack.pop_f64();
    push_bool(stack, c1 >= c2);
}
