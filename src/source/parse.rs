//! Line parsing for key/value counter files.
//!
//! A data line is `<name> <whitespace> <unsigned decimal>`, optionally
//! followed by further whitespace-separated content which is ignored.
//! Parsing never allocates on success: the returned name borrows from the
//! input line.

use thiserror::Error;

/// Longest metric name accepted from a source line, in bytes.
pub const MAX_NAME_LEN: usize = 127;

/// Reasons a line is rejected as "not a data line".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty line")]
    Empty,

    #[error("metric {name:?} has no value")]
    MissingValue { name: String },

    #[error("metric {name:?} has invalid value {token:?}")]
    InvalidValue { name: String, token: String },

    #[error("metric name is {len} bytes, limit is {}", MAX_NAME_LEN)]
    NameTooLong { len: usize },

    #[error("invalid UTF-8 after byte {valid_up_to}")]
    InvalidUtf8 { valid_up_to: usize },
}

/// Parse one raw source line. Bytes that are not valid UTF-8 make the whole
/// line a non-data line.
pub fn parse_raw_line(line: &[u8]) -> Result<(&str, u64), ParseError> {
    let text = std::str::from_utf8(line).map_err(|e| ParseError::InvalidUtf8 {
        valid_up_to: e.valid_up_to(),
    })?;
    parse_line(text)
}

/// Parse one source line into `(name, value)`.
pub fn parse_line(line: &str) -> Result<(&str, u64), ParseError> {
    let mut tokens = line.split_ascii_whitespace();

    let name = tokens.next().ok_or(ParseError::Empty)?;
    if name.len() > MAX_NAME_LEN {
        return Err(ParseError::NameTooLong { len: name.len() });
    }

    let token = tokens.next().ok_or_else(|| ParseError::MissingValue {
        name: name.to_string(),
    })?;

    let value = parse_u64(token).ok_or_else(|| ParseError::InvalidValue {
        name: name.to_string(),
        token: token.to_string(),
    })?;

    Ok((name, value))
}

/// Strict unsigned decimal: digits only, no sign, no overflow.
#[inline]
fn parse_u64(token: &str) -> Option<u64> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse::<u64>().ok()
}
