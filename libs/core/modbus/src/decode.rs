//! Per-pin decode/encode pipeline.
//!
//! Decode: raw words -> decode by format (big-endian, u16 low-bit masked) ->
//! optional bit extract -> linear/quadratic formula -> multiply by scale ->
//! round to precision. Encode is the inverse for the write path.

use talos_domain_models::RegisterFormat;

/// Combines raw register words (big-endian word order) into an unsigned
/// integer according to `format`.
pub fn words_to_raw_u64(format: RegisterFormat, words: &[u16]) -> u64 {
    match format {
        RegisterFormat::U16 | RegisterFormat::I16 => (words[0] & 0xFFFF) as u64,
        RegisterFormat::U32 | RegisterFormat::I32 | RegisterFormat::F32 => {
            ((words[0] as u32) << 16 | (words[1] as u32)) as u64
        }
        RegisterFormat::U64 => {
            (words[0] as u64) << 48 | (words[1] as u64) << 32 | (words[2] as u64) << 16 | (words[3] as u64)
        }
    }
}

/// Reinterprets the combined raw word(s) as the declared format, returning
/// a plain `f64` for downstream arithmetic.
pub fn raw_to_value(format: RegisterFormat, words: &[u16]) -> f64 {
    let raw = words_to_raw_u64(format, words);
    match format {
        RegisterFormat::U16 => raw as f64,
        RegisterFormat::I16 => (raw as u16) as i16 as f64,
        RegisterFormat::U32 => raw as f64,
        RegisterFormat::I32 => (raw as u32) as i32 as f64,
        RegisterFormat::U64 => raw as f64,
        RegisterFormat::F32 => f32::from_bits(raw as u32) as f64,
    }
}

/// Encodes a plain value back into the register words for `format`,
/// inverse of [`raw_to_value`].
pub fn value_to_words(format: RegisterFormat, value: f64) -> Vec<u16> {
    match format {
        RegisterFormat::U16 => vec![value as u16],
        RegisterFormat::I16 => vec![(value as i16) as u16],
        RegisterFormat::U32 => {
            let raw = value as u32;
            vec![(raw >> 16) as u16, (raw & 0xFFFF) as u16]
        }
        RegisterFormat::I32 => {
            let raw = (value as i32) as u32;
            vec![(raw >> 16) as u16, (raw & 0xFFFF) as u16]
        }
        RegisterFormat::F32 => {
            let raw = (value as f32).to_bits();
            vec![(raw >> 16) as u16, (raw & 0xFFFF) as u16]
        }
        RegisterFormat::U64 => {
            let raw = value as u64;
            vec![
                ((raw >> 48) & 0xFFFF) as u16,
                ((raw >> 32) & 0xFFFF) as u16,
                ((raw >> 16) & 0xFFFF) as u16,
                (raw & 0xFFFF) as u16,
            ]
        }
    }
}

/// Extracts a single bit from a decoded value, for bit-packed pins.
pub fn extract_bit(value: f64, bit: Option<u8>) -> f64 {
    match bit {
        None => value,
        Some(b) => (((value as i64) >> b) & 1) as f64,
    }
}

/// Applies a linear/quadratic formula `v = a + b*v + c*v^2 + ...` using as
/// many declared coefficients as present.
pub fn apply_formula(value: f64, formula: Option<&[f64]>) -> f64 {
    let Some(coeffs) = formula else { return value };
    coeffs
        .iter()
        .enumerate()
        .map(|(power, coeff)| coeff * value.powi(power as i32))
        .sum()
}

pub fn apply_scale(value: f64, scale: Option<f64>, offset_value: Option<f64>) -> f64 {
    let scaled = value * scale.unwrap_or(1.0);
    scaled + offset_value.unwrap_or(0.0)
}

pub fn round_precision(value: f64, precision: Option<u32>) -> f64 {
    match precision {
        None => value,
        Some(p) => {
            let factor = 10f64.powi(p as i32);
            (value * factor).round() / factor
        }
    }
}

/// Combines two big-endian words into an unsigned 32-bit value.
pub fn combine_32bit_be(words: &[u16; 2]) -> u32 {
    (words[0] as u32) << 16 | (words[1] as u32)
}

/// Combines four big-endian words into a value with `decimal_places`
/// implied fractional digits.
pub fn combine_64bit_4word_with_dp(words: &[u16; 4], decimal_places: u32) -> f64 {
    let raw = (words[0] as u64) << 48 | (words[1] as u64) << 32 | (words[2] as u64) << 16 | (words[3] as u64);
    raw as f64 / 10f64.powi(decimal_places as i32)
}

/// Applies the inverse scale to a logical value before writing, so that
/// `write_value(x); read_value()` round-trips modulo rounding.
pub fn inverse_scale(value: f64, scale: Option<f64>, offset_value: Option<f64>) -> f64 {
    let unshifted = value - offset_value.unwrap_or(0.0);
    match scale {
        Some(s) if s != 0.0 => unshifted / s,
        _ => unshifted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u16_roundtrips() {
        let words = value_to_words(RegisterFormat::U16, 1234.0);
        assert_eq!(raw_to_value(RegisterFormat::U16, &words), 1234.0);
    }

    #[test]
    fn i32_handles_negative_values() {
        let words = value_to_words(RegisterFormat::I32, -5000.0);
        assert_eq!(raw_to_value(RegisterFormat::I32, &words), -5000.0);
    }

    #[test]
    fn f32_roundtrips_within_precision() {
        let words = value_to_words(RegisterFormat::F32, 12.5);
        assert_eq!(raw_to_value(RegisterFormat::F32, &words), 12.5);
    }

    #[test]
    fn scale_and_inverse_scale_are_reciprocal() {
        let raw = 100.0;
        let scaled = apply_scale(raw, Some(0.1), None);
        assert_eq!(scaled, 10.0);
        let back = inverse_scale(scaled, Some(0.1), None);
        assert_eq!(back, raw);
    }

    #[test]
    fn bit_extract_pulls_single_bit() {
        assert_eq!(extract_bit(0b1010.0, Some(1)), 1.0);
        assert_eq!(extract_bit(0b1010.0, Some(0)), 0.0);
    }

    #[test]
    fn precision_rounds_to_declared_decimals() {
        assert_eq!(round_precision(1.2345, Some(2)), 1.23);
        assert_eq!(round_precision(1.235, Some(2)), 1.24);
    }
}
