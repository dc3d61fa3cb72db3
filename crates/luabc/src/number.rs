//! Lua numeral literal lowering, ported from `_tonumber`/`tonumber` in
//! `orz/lua/runtime/builtins.py`. A numeral lowers to a host integer only
//! when it is a hex literal with neither a fractional part nor a `p`
//! exponent; every other numeral (decimal, or hex with fraction/exponent)
//! lowers to the `f64` nearest to the exact value the digits denote.

/// Bits of mantissa precision in an IEEE-754 double (`sys.float_info.mant_dig`).
const MANT_DIG: i64 = 53;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LuaNumber {
    Int(i64),
    Float(f64),
}

fn bit_length(v: u128) -> i64 {
    (128 - v.leading_zeros()) as i64
}

/// Parses a Lua numeral token's text (already validated by the lexer's
/// number grammar) into its lowered constant form.
pub fn parse_numeral(text: &str) -> LuaNumber {
    let e = text.trim().to_lowercase();

    if !e.starts_with("0x") {
        return LuaNumber::Float(e.parse::<f64>().unwrap_or(f64::NAN));
    }

    let rest = &e[2..];

    let (base_part, exp_str) = match rest.split_once('p') {
        Some((b, ex)) => (b, ex),
        None => (rest, ""),
    };
    let (mantissa_part, frac_part) = match base_part.split_once('.') {
        Some((m, f)) => (m, f),
        None => (base_part, ""),
    };

    if exp_str.is_empty() && frac_part.is_empty() {
        let v = i128::from_str_radix(mantissa_part, 16).unwrap_or(0);
        return LuaNumber::Int(v as i64);
    }

    let mut base_str = String::with_capacity(mantissa_part.len() + frac_part.len());
    base_str.push_str(mantissa_part);
    base_str.push_str(frac_part);

    let frac_len = frac_part.len() as i64;
    let original_len = base_str.len();
    let trimmed = base_str.trim_end_matches('0');
    let l = (original_len - trimmed.len()) as i64;

    let base_hex = if trimmed.is_empty() { "0" } else { trimmed };
    let mut base = u128::from_str_radix(base_hex, 16).unwrap_or(0);

    let mut exp = exp_str.parse::<i64>().unwrap_or(0) - frac_len * 4 + l * 4;

    let bits = bit_length(base) - MANT_DIG;
    if bits > 0 {
        base >>= (bits - 1) as u32;
        if base & 1 == 1 {
            base += 1;
        }
        base >>= 1;
        exp += bits;
    }

    LuaNumber::Float(base as f64 * 2f64.powi(exp as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_is_always_float() {
        assert_eq!(parse_numeral("42"), LuaNumber::Float(42.0));
        assert_eq!(parse_numeral("3.5"), LuaNumber::Float(3.5));
    }

    #[test]
    fn hex_without_fraction_is_int() {
        assert_eq!(parse_numeral("0x1F"), LuaNumber::Int(31));
        assert_eq!(parse_numeral("0xff"), LuaNumber::Int(255));
    }

    #[test]
    fn hex_with_fraction_is_float() {
        match parse_numeral("0x1.8p1") {
            LuaNumber::Float(f) => assert!((f - 3.0).abs() < 1e-9),
            other => panic!("expected float, got {:?}", other),
        }
    }

    #[test]
    fn hex_with_exponent_only_is_float() {
        match parse_numeral("0x10p4") {
            LuaNumber::Float(f) => assert!((f - 256.0).abs() < 1e-9),
            other => panic!("expected float, got {:?}", other),
        }
    }
}
