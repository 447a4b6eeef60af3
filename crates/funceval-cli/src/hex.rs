//! Hex text for byte buffers

use anyhow::{bail, Result};
use std::fmt::Write;

/// Lowercase hex, two digits per byte
pub fn encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Parse hex digits, ignoring whitespace and an optional `0x` prefix
pub fn decode(text: &str) -> Result<Vec<u8>> {
    let text = text.trim();
    let text = text.strip_prefix("0x").unwrap_or(text);
    let digits: Vec<u8> = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c.to_digit(16) {
            Some(d) => Ok(d as u8),
            None => bail!("'{}' is not a hex digit", c),
        })
        .collect::<Result<_>>()?;

    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits ({})", digits.len());
    }
    Ok(digits.chunks(2).map(|pair| pair[0] << 4 | pair[1]).collect())
}
