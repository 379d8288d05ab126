//! Human-readable size parsing (e.g., "2GB", "500MB").

use thiserror::Error;

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;

/// Error parsing a size string.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid size '{input}' - expected format like '2GB', '500MB', or '1024KB'")]
pub struct SizeParseError {
    input: String,
}

impl SizeParseError {
    fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// Parse a human-readable size string into bytes.
///
/// Accepts a bare byte count or a `B`, `K`/`KB`, `M`/`MB`, `G`/`GB` suffix
/// (binary multiples), case-insensitive, with optional whitespace before the
/// suffix.
///
/// # Examples
///
/// ```
/// use imgcache::config::parse_size;
///
/// assert_eq!(parse_size("1024").unwrap(), 1024);
/// assert_eq!(parse_size("256 MB").unwrap(), 256 * 1024 * 1024);
/// assert_eq!(parse_size("2gb").unwrap(), 2 * 1024 * 1024 * 1024);
/// ```
pub fn parse_size(s: &str) -> Result<u64, SizeParseError> {
    let trimmed = s.trim();
    let upper = trimmed.to_ascii_uppercase();

    let (digits, multiplier) = [("GB", GB), ("G", GB), ("MB", MB), ("M", MB), ("KB", KB), ("K", KB), ("B", 1)]
        .iter()
        .find_map(|(suffix, mult)| upper.strip_suffix(suffix).map(|rest| (rest, *mult)))
        .unwrap_or((upper.as_str(), 1));

    let digits = digits.trim_end();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SizeParseError::new(trimmed));
    }

    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| SizeParseError::new(trimmed))
}

/// Format a byte count using the largest unit that divides it evenly.
///
/// ```
/// use imgcache::config::format_size;
///
/// assert_eq!(format_size(256 * 1024 * 1024), "256MB");
/// assert_eq!(format_size(1000), "1000");
/// ```
pub fn format_size(bytes: u64) -> String {
    match bytes {
        b if b >= GB && b % GB == 0 => format!("{}GB", b / GB),
        b if b >= MB && b % MB == 0 => format!("{}MB", b / MB),
        b if b >= KB && b % KB == 0 => format!("{}KB", b / KB),
        b => b.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_number() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("0").unwrap(), 0);
        assert_eq!(parse_size("512B").unwrap(), 512);
    }

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(parse_size("1K").unwrap(), 1024);
        assert_eq!(parse_size("100kb").unwrap(), 100 * 1024);
        assert_eq!(parse_size("1M").unwrap(), 1024 * 1024);
        assert_eq!(parse_size("500MB").unwrap(), 500 * 1024 * 1024);
        assert_eq!(parse_size("2G").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("20GB").unwrap(), 20 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_parse_whitespace() {
        assert_eq!(parse_size("  2GB  ").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("500 MB").unwrap(), 500 * 1024 * 1024);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_size("").is_err());
        assert!(parse_size("MB").is_err());
        assert!(parse_size("abc").is_err());
        assert!(parse_size("2TB").is_err());
        assert!(parse_size("-1GB").is_err());
        assert!(parse_size("1.5GB").is_err());
        assert!(parse_size("99999999999999999999GB").is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(1024), "1KB");
        assert_eq!(format_size(256 * 1024 * 1024), "256MB");
        assert_eq!(format_size(2 * 1024 * 1024 * 1024), "2GB");
        assert_eq!(format_size(1000), "1000");
        assert_eq!(format_size(0), "0");
    }

    #[test]
    fn test_format_then_parse() {
        for bytes in [4096, 256 * 1024 * 1024, 3 * 1024 * 1024 * 1024] {
            assert_eq!(parse_size(&format_size(bytes)).unwrap(), bytes);
        }
    }
}
