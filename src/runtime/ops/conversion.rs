//! Conversions between the numeric types.
//!
//! The checked truncations trap on NaN and on values whose truncated
//! integer part does not fit the target; the saturating variants clamp
//! instead and map NaN to zero. All range checks run in f64, where every
//! f32 and every relevant bound is exact. `reinterpret` is a bitwise
//! cast.

use super::{Stack, Trap, Value};

/// Truncate toward zero and check the result against [min, max_exclusive).
///
/// The exclusive upper bound keeps the bounds representable: e.g.
/// `i64::MAX` rounds when cast to f64, but 2^63 is exact.
fn trunc_checked(x: f64, min: f64, max_exclusive: f64) -> Result<f64, Trap> {
    if x.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = x.trunc();
    if t < min || t >= max_exclusive {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t)
}

fn trunc_saturating(x: f64, min: f64, max_exclusive: f64) -> f64 {
    if x.is_nan() {
        return 0.0;
    }
    let t = x.trunc();
    if t < min {
        min
    } else if t >= max_exclusive {
        // The largest representable value below the bound is the target
        // type's maximum, which the caller casts back exactly.
        max_exclusive - 1.0
    } else {
        t
    }
}

const I32_MIN: f64 = -2_147_483_648.0;
const I32_BOUND: f64 = 2_147_483_648.0;
const U32_BOUND: f64 = 4_294_967_296.0;
const I64_MIN: f64 = -9_223_372_036_854_775_808.0;
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;
const U64_BOUND: f64 = 18_446_744_073_709_551_616.0;

// i32 <- i64 -----------------------------------------------------------------

pub fn i32_wrap_i64(stack: &mut Stack) {
    let c1 = stack.pop_i64();
    stack.push(Value::I32(c1 as i32));
}

// i32 <- float ---------------------------------------------------------------

pub fn i32_trunc_f32_s(stack: &mut Stack) -> Result<(), Trap> {
    let c1 = f64::from(stack.pop_f32());
    let t = trunc_checked(c1, I32_MIN, I32_BOUND)?;
    stack.push(Value::I32(t as i32));
    Ok(())
}

pub fn i32_trunc_f32_u(stack: &mut Stack) -> Result<(), Trap> {
    let c1 = f64::from(stack.pop_f32());
    let t = trunc_checked(c1, 0.0, U32_BOUND)?;
    stack.push(Value::I32(t as u32 as i32));
    Ok(())
}

pub fn i32_trunc_f64_s(stack: &mut Stack) -> Result<(), Trap> {
    let c1 = stack.pop_f64();
    let t = trunc_checked(c1, I32_MIN, I32_BOUND)?;
    stack.push(Value::I32(t as i32));
    Ok(())
}

pub fn i32_trunc_f64_u(stack: &mut Stack) -> Result<(), Trap> {
    let c1 = stack.pop_f64();
    let t = trunc_checked(c1, 0.0, U32_BOUND)?;
    stack.push(Value::I32(t as u32 as i32));
    Ok(())
}

pub fn i32_trunc_sat_f32_s(stack: &mut Stack) {
    let c1 = f64::from(stack.pop_f32());
    let t = trunc_saturating(c1, I32_MIN, I32_BOUND);
    stack.push(Value::I32(t as i32));
}

pub fn i32_trunc_sat_f32_u(stack: &mut Stack) {
    let c1 = f64::from(stack.pop_f32());
    let t = trunc_saturating(c1, 0.0, U32_BOUND);
    stack.push(Value::I32(t as u32 as i32));
}

pub fn i32_trunc_sat_f64_s(stack: &mut Stack) {
    let c1 = stack.pop_f64();
    let t = trunc_saturating(c1, I32_MIN, I32_BOUND);
    stack.push(Value::I32(t as i32));
}

pub fn i32_trunc_sat_f64_u(stack: &mut Stack) {
    let c1 = stack.pop_f64();
    let t = trunc_saturating(c1, 0.0, U32_BOUND);
    stack.push(Value::I32(t as u32 as i32));
}

// i64 <- i32 -----------------------------------------------------------------

pub fn i64_extend_i32_s(stack: &mut Stack) {
    let c1 = stack.pop_i32();
    stack.push(Value::I64(i64::from(c1)));
}

pub fn i64_extend_i32_u(stack: &mut Stack) {
    let c1 = stack.pop_u32();
    stack.push(Value::I64(i64::from(c1)));
}

// i64 <- float ---------------------------------------------------------------

pub fn i64_trunc_f32_s(stack: &mut Stack) -> Result<(), Trap> {
    let c1 = f64::from(stack.pop_f32());
    let t = trunc_checked(c1, I64_MIN, I64_BOUND)?;
    stack.push(Value::I64(t as i64));
    Ok(())
}

pub fn i64_trunc_f32_u(stack: &mut Stack) -> Result<(), Trap> {
    let c1 = f64::from(stack.pop_f32());
    let t = trunc_checked(c1, 0.0, U64_BOUND)?;
    stack.push(Value::I64(t as u64 as i64));
    Ok(())
}

pub fn i64_trunc_f64_s(stack: &mut Stack) -> Result<(), Trap> {
    let c1 = stack.pop_f64();
    let t = trunc_checked(c1, I64_MIN, I64_BOUND)?;
    stack.push(Value::I64(t as i64));
    Ok(())
}

pub fn i64_trunc_f64_u(stack: &mut Stack) -> Result<(), Trap> {
    let c1 = stack.pop_f64();
    let t = trunc_checked(c1, 0.0, U64_BOUND)?;
    stack.push(Value::I64(t as u64 as i64));
    Ok(())
}

pub fn i64_trunc_sat_f32_s(stack: &mut Stack) {
    let c1 = f64::from(stack.pop_f32());
    if c1.is_nan() {
        stack.push(Value::I64(0));
    } else if c1 < I64_MIN {
        stack.push(Value::I64(i64::MIN));
    } else if c1 >= I64_BOUND {
        stack.push(Value::I64(i64::MAX));
    } else {
        stack.push(Value::I64(c1.trunc() as i64));
    }
}

pub fn i64_trunc_sat_f32_u(stack: &mut Stack) {
    let c1 = f64::from(stack.pop_f32());
    if c1.is_nan() || c1 <= -1.0 {
        stack.push(Value::I64(0));
    } else if c1 >= U64_BOUND {
        stack.push(Value::I64(u64::MAX as i64));
    } else {
        stack.push(Value::I64(c1.trunc() as u64 as i64));
    }
}

pub fn i64_trunc_sat_f64_s(stack: &mut Stack) {
    let c1 = stack.pop_f64();
    if c1.is_nan() {
        stack.push(Value::I64(0));
    } else if c1 < I64_MIN {
        stack.push(Value::I64(i64::MIN));
    } else if c1 >= I64_BOUND {
        stack.push(Value::I64(i64::MAX));
    } else {
        stack.push(Value::I64(c1.trunc() as i64));
    }
}

pub fn i64_trunc_sat_f64_u(stack: &mut Stack) {
    let c1 = stack.pop_f64();
    if c1.is_nan() || c1 <= -1.0 {
        stack.push(Value::I64(0));
    } else if c1 >= U64_BOUND {
        stack.push(Value::I64(u64::MAX as i64));
    } else {
        stack.push(Value::I64(c1.trunc() as u64 as i64));
    }
}

// float <- int ---------------------------------------------------------------

pub fn f32_convert_i32_s(stack: &mut Stack) {
    let c1 = stack.pop_i32();
    stack.push(Value::F32(c1 as f32));
}

pub fn f32_convert_i32_u(stack: &mut Stack) {
    let c1 = stack.pop_u32();
    stack.push(Value::F32(c1 as f32));
}

pub fn f32_convert_i64_s(stack: &mut Stack) {
    let c1 = stack.pop_i64();
    stack.push(Value::F32(c1 as f32));
}

pub fn f32_convert_i64_u(stack: &mut Stack) {
    let c1 = stack.pop_u64();
    stack.push(Value::F32(c1 as f32));
}

pub fn f64_convert_i32_s(stack: &mut Stack) {
    let c1 = stack.pop_i32();
    stack.push(Value::F64(f64::from(c1)));
}

pub fn f64_convert_i32_u(stack: &mut Stack) {
    let c1 = stack.pop_u32();
    stack.push(Value::F64(f64::from(c1)));
}

pub fn f64_convert_i64_s(stack: &mut Stack) {
    let c1 = stack.pop_i64();
    stack.push(Value::F64(c1 as f64));
}

pub fn f64_convert_i64_u(stack: &mut Stack) {
    let c1 = stack.pop_u64();
    stack.push(Value::F64(c1 as f64));
}

// float <-> float ------------------------------------------------------------

pub fn f32_demote_f64(stack: &mut Stack) {
    let c1 = stack.pop_f64();
    stack.push(Value::F32(c1 as f32));
}

pub fn f64_promote_f32(stack: &mut Stack) {
    let c1 = stack.pop_f32();
    stack.push(Value::F64(f64::from(c1)));
}

// Bitwise casts --------------------------------------------------------------

pub fn i32_reinterpret_f32(stack: &mut Stack) {
    let c1 = stack.pop_f32();
    stack.push(Value::I32(c1.to_bits() as i32));
}

pub fn i64_reinterpret_f64(stack: &mut Stack) {
    let c1 = stack.pop_f64();
    stack.push(Value::I64(c1.to_bits() as i64));
}

pub fn f32_reinterpret_i32(stack: &mut Stack) {
    let c1 = stack.pop_u32();
    stack.push(Value::F32(f32::from_bits(c1)));
}

pub fn f64_reinterpret_i64(stack: &mut Stack) {
    let c1 = stack.pop_u64();
    stack.push(Value::F64(f64::from_bits(c1)));
}

// Sign extension within a width ----------------------------------------------

pub fn i32_extend8_s(stack: &mut Stack) {
    let c1 = stack.pop_i32();
    stack.push(Value::I32(i32::from(c1 as i8)));
}

pub fn i32_extend16_s(stack: &mut Stack) {
    let c1 = stack.pop_i32();
    stack.push(Value::I32(i32::from(c1 as i16)));
}

pub fn i64_extend8_s(stack: &mut Stack) {
    let c1 = stack.pop_i64();
    stack.push(Value::I64(i64::from(c1 as i8)));
}

pub fn i64_extend16_s(stack: &mut Stack) {
    let c1 = stack.pop_i64();
    stack.push(Value::I64(i64::from(c1 as i16)));
}

pub fn i64_extend32_s(stack: &mut Stack) {
    let c1 = stack.pop_i64();
    stack.push(Value::I64(i64::from(c1 as i32)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trunc_f64_to_i32(x: f64) -> Result<i32, Trap> {
        let mut stack = Stack::new();
        stack.push(Value::F64(x));
        i32_trunc_f64_s(&mut stack)?;
        Ok(stack.pop_i32())
    }

    #[test]
    fn test_trunc_rounds_toward_zero() {
        assert_eq!(trunc_f64_to_i32(1.9).unwrap(), 1);
        assert_eq!(trunc_f64_to_i32(-1.9).unwrap(), -1);
        assert_eq!(trunc_f64_to_i32(-0.5).unwrap(), 0);
    }

    #[test]
    fn test_trunc_range_edges() {
        assert_eq!(trunc_f64_to_i32(2_147_483_647.9).unwrap(), i32::MAX);
        assert_eq!(trunc_f64_to_i32(-2_147_483_648.9).unwrap(), i32::MIN);
        assert_eq!(
            trunc_f64_to_i32(2_147_483_648.0),
            Err(Trap::IntegerOverflow)
        );
        assert_eq!(
            trunc_f64_to_i32(-2_147_483_649.0),
            Err(Trap::IntegerOverflow)
        );
        assert_eq!(trunc_f64_to_i32(f64::NAN), Err(Trap::InvalidConversionToInteger));
        assert_eq!(
            trunc_f64_to_i32(f64::INFINITY),
            Err(Trap::IntegerOverflow)
        );
    }

    #[test]
    fn test_trunc_unsigned() {
        let mut stack = Stack::new();
        stack.push(Value::F64(4_294_967_295.9));
        i32_trunc_f64_u(&mut stack).unwrap();
        assert_eq!(stack.pop_u32(), u32::MAX);

        stack.push(Value::F64(-0.7));
        i32_trunc_f64_u(&mut stack).unwrap();
        assert_eq!(stack.pop_i32(), 0);

        stack.push(Value::F64(-1.0));
        assert_eq!(i32_trunc_f64_u(&mut stack), Err(Trap::IntegerOverflow));
    }

    #[test]
    fn test_trunc_i64_bounds() {
        let mut stack = Stack::new();
        // 2^63 is exactly representable and out of range.
        stack.push(Value::F64(9_223_372_036_854_775_808.0));
        assert_eq!(i64_trunc_f64_s(&mut stack), Err(Trap::IntegerOverflow));

        stack.push(Value::F64(-9_223_372_036_854_775_808.0));
        i64_trunc_f64_s(&mut stack).unwrap();
        assert_eq!(stack.pop_i64(), i64::MIN);
    }

    #[test]
    fn test_trunc_sat() {
        let mut stack = Stack::new();
        stack.push(Value::F32(f32::NAN));
        i32_trunc_sat_f32_s(&mut stack);
        assert_eq!(stack.pop_i32(), 0);

        stack.push(Value::F32(1e10));
        i32_trunc_sat_f32_s(&mut stack);
        assert_eq!(stack.pop_i32(), i32::MAX);

        stack.push(Value::F32(-1e10));
        i32_trunc_sat_f32_s(&mut stack);
        assert_eq!(stack.pop_i32(), i32::MIN);

        stack.push(Value::F64(-5.0));
        i32_trunc_sat_f64_u(&mut stack);
        assert_eq!(stack.pop_i32(), 0);

        stack.push(Value::F64(1e300));
        i64_trunc_sat_f64_u(&mut stack);
        assert_eq!(stack.pop_u64(), u64::MAX);

        stack.push(Value::F64(f64::NEG_INFINITY));
        i64_trunc_sat_f64_s(&mut stack);
        assert_eq!(stack.pop_i64(), i64::MIN);
    }

    #[test]
    fn test_wrap_and_extend() {
        let mut stack = Stack::new();
        stack.push(Value::I64(0x1_0000_0001));
        i32_wrap_i64(&mut stack);
        assert_eq!(stack.pop_i32(), 1);

        stack.push(Value::I32(-1));
        i64_extend_i32_s(&mut stack);
        assert_eq!(stack.pop_i64(), -1);

        stack.push(Value::I32(-1));
        i64_extend_i32_u(&mut stack);
        assert_eq!(stack.pop_i64(), 0xffff_ffff);
    }

    #[test]
    fn test_sign_extension_ops() {
        let mut stack = Stack::new();
        stack.push(Value::I32(0x80));
        i32_extend8_s(&mut stack);
        assert_eq!(stack.pop_i32(), -128);

        stack.push(Value::I32(0x7f));
        i32_extend8_s(&mut stack);
        assert_eq!(stack.pop_i32(), 127);

        stack.push(Value::I64(0x8000));
        i64_extend16_s(&mut stack);
        assert_eq!(stack.pop_i64(), -32768);

        stack.push(Value::I64(0x8000_0000));
        i64_extend32_s(&mut stack);
        assert_eq!(stack.pop_i64(), i64::from(i32::MIN));
    }

    #[test]
    fn test_reinterpret_round_trips_bits() {
        let mut stack = Stack::new();
        stack.push(Value::F32(-0.0));
        i32_reinterpret_f32(&mut stack);
        assert_eq!(stack.pop_i32(), i32::MIN); // just the sign bit

        stack.push(Value::I64(0x7ff8_0000_0000_0000));
        f64_reinterpret_i64(&mut stack);
        assert!(stack.pop_f64().is_nan());
    }

    #[test]
    fn test_convert_unsigned() {
        let mut stack = Stack::new();
        stack.push(Value::I32(-1));
        f64_convert_i32_u(&mut stack);
        assert_eq!(stack.pop_f64(), 4_294_967_295.0);

        stack.push(Value::I64(-1));
        f32_convert_i64_u(&mut stack);
        assert_eq!(stack.pop_f32(), 1.8446744e19);
    }

    #[test]
    fn test_demote_promote() {
        let mut stack = Stack::new();
        stack.push(Value::F64(1e300));
        f32_demote_f64(&mut stack);
        assert!(stack.pop_f32().is_infinite());

        stack.push(Value::F32(1.5));
        f64_promote_f32(&mut stack);
        assert_eq!(stack.pop_f64(), 1.5);
    }
}
