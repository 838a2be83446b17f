//! Keel Utils - Utility Functions
//!
//! Alignment arithmetic used by the allocator and the file coalescer, plus
//! human-readable size parsing and formatting for configuration and tooling.
//!
//! @version 0.1.0
//! @author Keel Development Team

// =============================================================================
// Alignment Utilities
// =============================================================================

/// Align a value up to the nearest multiple of alignment.
#[inline]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Align a file offset down to the nearest multiple of alignment.
#[inline]
pub const fn align_down_u64(value: u64, alignment: u64) -> u64 {
    value & !(alignment - 1)
}

// =============================================================================
// Size Formatting
// =============================================================================

const SIZE_UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

/// Format a byte size as a human-readable string.
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < SIZE_UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, SIZE_UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, SIZE_UNITS[unit_index])
    }
}

/// Parse a human-readable size string ("64KB", "1.5 MB", "512") to bytes.
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim().to_uppercase();

    let (num_str, unit) = if let Some(n) = s.strip_suffix("PB") {
        (n, 1024_u64.pow(5))
    } else if let Some(n) = s.strip_suffix("TB") {
        (n, 1024_u64.pow(4))
    } else if let Some(n) = s.strip_suffix("GB") {
        (n, 1024_u64.pow(3))
    } else if let Some(n) = s.strip_suffix("MB") {
        (n, 1024_u64.pow(2))
    } else if let Some(n) = s.strip_suffix("KB") {
        (n, 1024_u64)
    } else if let Some(n) = s.strip_suffix('B') {
        (n, 1_u64)
    } else {
        (s.as_str(), 1_u64)
    };

    let n = num_str.trim().parse::<f64>().ok()?;
    if n.is_sign_negative() || !n.is_finite() {
        return None;
    }
    Some((n * unit as f64) as u64)
}

// =============================================================================
// Tests
// =============================================================================
