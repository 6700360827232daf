//! Exact scaled-integer money math.
//!
//! All monetary values are `i128` integers scaled by `10^decimals`. Scaling
//! in and out goes through decimal strings, never through floating point, so
//! a value survives serialize/restore bit-exact.

use crate::error::EngineError;

/// Largest decimal scale representable: `10^39` overflows i128. Untrusted
/// inputs (feed payloads, snapshot documents) must be checked against this
/// before any value reaches [`pow10`].
pub const MAX_DECIMALS: u32 = 38;

/// 10^decimals as i128. Callers guarantee `decimals <= MAX_DECIMALS`.
pub fn pow10(decimals: u32) -> i128 {
    10i128.pow(decimals)
}

/// Parse a human decimal string into a scaled integer.
///
/// The fractional part is right-padded with zeros to exactly `decimals`
/// digits and truncated past that, so `"1.5"` at 2 decimals is `150` and
/// `"1.999"` at 2 decimals is `199`.
pub fn to_scaled(human: &str, decimals: u32) -> Result<i128, EngineError> {
    let s = human.trim();
    let (neg, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };

    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(EngineError::BadDecimal(human.to_string()));
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(EngineError::BadDecimal(human.to_string()));
    }

    let int_val: i128 = if int_part.is_empty() {
        0
    } else {
        int_part
            .parse()
            .map_err(|_| EngineError::BadDecimal(human.to_string()))?
    };

    // Pad / truncate the fraction to exactly `decimals` digits.
    let mut frac = String::from(frac_part);
    while (frac.len() as u32) < decimals {
        frac.push('0');
    }
    frac.truncate(decimals as usize);

    let frac_val: i128 = if frac.is_empty() {
        0
    } else {
        frac.parse()
            .map_err(|_| EngineError::BadDecimal(human.to_string()))?
    };

    let scaled = int_val
        .checked_mul(pow10(decimals))
        .and_then(|v| v.checked_add(frac_val))
        .ok_or_else(|| EngineError::BadDecimal(human.to_string()))?;

    Ok(if neg { -scaled } else { scaled })
}

/// Format a scaled integer back into a decimal string.
///
/// Inverse of [`to_scaled`] for canonical inputs: integer division by
/// `10^decimals`, remainder zero-padded to `decimals` digits.
pub fn format_scaled(scaled: i128, decimals: u32) -> String {
    let neg = scaled < 0;
    let v = scaled.unsigned_abs();
    let base = pow10(decimals) as u128;

    let int_part = v / base;
    let frac_part = v % base;

    let sign = if neg { "-" } else { "" };
    if decimals == 0 {
        format!("{sign}{int_part}")
    } else {
        format!(
            "{sign}{int_part}.{frac_part:0width$}",
            width = decimals as usize
        )
    }
}

/// Parse a decimal string that must already be an integer (no point),
/// as used for scaled values in snapshots and feed payloads.
pub fn parse_scaled(raw: &str) -> Result<i128, EngineError> {
    raw.trim()
        .parse::<i128>()
        .map_err(|_| EngineError::BadDecimal(raw.to_string()))
}
