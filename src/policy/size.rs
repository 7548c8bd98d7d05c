//! Human-readable byte sizes ("20000", "20 kB", "1.5GiB").
//!
//! Decimal units (`kB`, `MB`, ...) are powers of 1000 and binary units
//! (`KiB`, `MiB`, ...) are powers of 1024. Units are case-insensitive, the
//! trailing `B` is optional and thousands separators are ignored.

use crate::error::{Error, Result};

const UNITS: &[(&str, f64)] = &[
    ("", 1.0),
    ("b", 1.0),
    ("k", 1e3),
    ("kb", 1e3),
    ("ki", 1024.0),
    ("kib", 1024.0),
    ("m", 1e6),
    ("mb", 1e6),
    ("mi", 1048576.0),
    ("mib", 1048576.0),
    ("g", 1e9),
    ("gb", 1e9),
    ("gi", 1073741824.0),
    ("gib", 1073741824.0),
    ("t", 1e12),
    ("tb", 1e12),
    ("ti", 1099511627776.0),
    ("tib", 1099511627776.0),
    ("p", 1e15),
    ("pb", 1e15),
    ("pi", 1125899906842624.0),
    ("pib", 1125899906842624.0),
];

pub fn parse_bytes(input: &str) -> Result<u64> {
    let invalid = |reason| Error::InvalidSize {
        input: input.to_string(),
        reason,
    };

    let cleaned: String = input.trim().chars().filter(|c| *c != ',').collect();
    let split = cleaned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(cleaned.len());
    let (number, unit) = cleaned.split_at(split);
    if number.is_empty() {
        return Err(invalid("missing number"));
    }

    let value: f64 = number.parse().map_err(|_| invalid("malformed number"))?;
    let unit = unit.trim().to_ascii_lowercase();
    let multiplier = UNITS
        .iter()
        .find(|(name, _)| *name == unit)
        .map(|(_, mult)| *mult)
        .ok_or_else(|| invalid("unknown unit"))?;

    let bytes = value * multiplier;
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(invalid("too large"));
    }
    Ok(bytes as u64)
}
