//! Bitwise operations, shifts and rotates.
//!
//! Shift and rotate amounts use only the low 5 bits (i32) or 6 bits
//! (i64) of the second operand.

use super::{Stack, Value};

pub fn i32_and(stack: &mut Stack) {
    let c2 = stack.pop_i32();
    let c1 = stack.pop_i32();
    stack.push(Value::I32(c1 & c2));
}

pub fn i32_or(stack: &mut Stack) {
    let c2 = stack.pop_i32();
    let c1 = stack.pop_i32();
    stack.push(Value::I32(c1 | c2));
}

pub fn i32_xor(stack: &mut Stack) {
    let c2 = stack.pop_i32();
    let c1 = stack.pop_i32();
    stack.push(Value::I32(c1 ^ c2));
}

pub fn i32_shl(stack: &mut Stack) {
    let c2 = stack.pop_u32();
    let c1 = stack.pop_i32();
    stack.push(Value::I32(c1 << (c2 & 31)));
}

pub fn i32_shr_s(stack: &mut Stack) {
    let c2 = stack.pop_u32();
    let c1 = stack.pop_i32();
    stack.push(Value::I32(c1 >> (c2 & 31)));
}

pub fn i32_shr_u(stack: &mut Stack) {
    let c2 = stack.pop_u32();
    let c1 = stack.pop_u32();
    stack.push(Value::I32((c1 >> (c2 & 31)) as i32));
}

pub fn i32_rotl(stack: &mut Stack) {
    let c2 = stack.pop_u32();
    let c1 = stack.pop_u32();
    stack.push(Value::I32(c1.rotate_left(c2 & 31) as i32));
}

pub fn i32_rotr(stack: &mut Stack) {
    let c2 = stack.pop_u32();
    let c1 = stack.pop_u32();
    stack.push(Value::I32(c1.rotate_right(c2 & 31) as i32));
}

pub fn i64_and(stack: &mut Stack) {
    let c2 = stack.pop_i64();
    let c1 = stack.pop_i64();
    stack.push(Value::I64(c1 & c2));
}

pub fn i64_or(stack: &mut Stack) {
    let c2 = stack.pop_i64();
    let c1 = stack.pop_i64();
    stack.push(Value::I64(c1 | c2));
}

pub fn i64_xor(stack: &mut Stack) {
    let c2 = stack.pop_i64();
    let c1 = stack.pop_i64();
    stack.push(Value::I64(c1 ^ c2));
}

pub fn i64_shl(stack: &mut Stack) {
    let c2 = stack.pop_u64();
    let c1 = stack.pop_i64();
    stack.push(Value::I64(c1 << (c2 & 63)));
}

pub fn i64_shr_s(stack: &mut Stack) {
    let c2 = stack.pop_u64();
    let c1 = stack.pop_i64();
    stack.push(Value::I64(c1 >> (c2 & 63)));
}

pub fn i64_shr_u(stack: &mut Stack) {
    let c2 = stack.pop_u64();
    let c1 = stack.pop_u64();
    stack.push(Value::I64((c1 >> (c2 & 63)) as i64));
}

pub fn i64_rotl(stack: &mut Stack) {
    let c2 = stack.pop_u64();
    let c1 = stack.pop_u64();
    stack.push(Value::I64(c1.rotate_left((c2 & 63) as u32) as i64));
}

pub fn i64_rotr(stack: &mut Stack) {
    let c2 = stack.pop_u64();
    let c1 = stack.pop_u64();
    stack.push(Value::I64(c1.rotate_right((c2 & 63) as u32) as i64));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_i32(f: fn(&mut Stack), a: i32, b: i32) -> i32 {
        let mut stack = Stack::new();
        stack.push(Value::I32(a));
        stack.push(Value::I32(b));
        f(&mut stack);
        stack.pop_i32()
    }

    fn run_i64(f: fn(&mut Stack), a: i64, b: i64) -> i64 {
        let mut stack = Stack::new();
        stack.push(Value::I64(a));
        stack.push(Value::I64(b));
        f(&mut stack);
        stack.pop_i64()
    }

    #[test]
    fn test_logic() {
        assert_eq!(run_i32(i32_and, 0b1100, 0b1010), 0b1000);
        assert_eq!(run_i32(i32_or, 0b1100, 0b1010), 0b1110);
        assert_eq!(run_i32(i32_xor, 0b1100, 0b1010), 0b0110);
        assert_eq!(run_i64(i64_and, -1, 0x0f), 0x0f);
    }

    #[test]
    fn test_shift_amount_is_masked() {
        assert_eq!(run_i32(i32_shl, 1, 32), 1); // 32 & 31 == 0
        assert_eq!(run_i32(i32_shl, 1, 33), 2);
        assert_eq!(run_i64(i64_shl, 1, 64), 1);
        assert_eq!(run_i64(i64_shl, 1, 65), 2);
    }

    #[test]
    fn test_signed_vs_unsigned_shift() {
        assert_eq!(run_i32(i32_shr_s, -8, 1), -4);
        assert_eq!(run_i32(i32_shr_u, -8, 1), 0x7fff_fffc);
        assert_eq!(run_i64(i64_shr_s, i64::MIN, 63), -1);
        assert_eq!(run_i64(i64_shr_u, i64::MIN, 63), 1);
    }

    #[test]
    fn test_rotates() {
        assert_eq!(run_i32(i32_rotl, 0x8000_0001u32 as i32, 1), 3);
        assert_eq!(run_i32(i32_rotr, 3, 1), 0x8000_0001u32 as i32);
        assert_eq!(run_i64(i64_rotl, 1, 1), 2);
        assert_eq!(run_i64(i64_rotr, 1, 1), i64::MIN);
    }
}
