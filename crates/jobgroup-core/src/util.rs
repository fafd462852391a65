//! Utility functions

use crate::error::{JobError, Result};

/// Parse memory size string (e.g., "100M", "1G")
pub fn parse_memory_size(s: &str) -> Result<u64> {
    let s = s.trim().to_uppercase();

    let (num_str, multiplier) = if let Some(num) = s.strip_suffix('G') {
        (num, 1024u64 * 1024 * 1024)
    } else if let Some(num) = s.strip_suffix('M') {
        (num, 1024u64 * 1024)
    } else if let Some(num) = s.strip_suffix('K') {
        (num, 1024u64)
    } else if let Some(num) = s.strip_suffix('B') {
        (num, 1u64)
    } else {
        (s.as_str(), 1u64)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| JobError::InvalidConfig(format!("Invalid memory size: {}", s)))?;

    num.checked_mul(multiplier)
        .ok_or_else(|| JobError::InvalidConfig(format!("Memory size overflow: {}", s)))
}

/// Byte count that fits the platform's pointer-sized limit fields
pub fn memory_size_to_usize(bytes: u64) -> Result<usize> {
    usize::try_from(bytes)
        .map_err(|_| JobError::InvalidConfig(format!("Memory size too large: {}", bytes)))
}
