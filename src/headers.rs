//! Scans over framing-critical header values
//!
//! Header values are opaque byte sequences. Comparisons here are
//! case-insensitive with surrounding whitespace stripped, values are
//! never copied or validated as utf-8.

fn eq_token(val: &[u8], token: &[u8]) -> bool {
    let start = match val.iter()
        .position(|&ch| !matches!(ch, b'\r' | b'\n' | b' ' | b'\t'))
    {
        Some(x) => x,
        None => return false,
    };
    let end = val.iter()
        .rposition(|&ch| !matches!(ch, b'\r' | b'\n' | b' ' | b'\t'))
        .unwrap() + 1;
    let val = &val[start..end];
    val.len() == token.len() &&
        val.iter().zip(token.iter())
            .all(|(&a, &b)| a.to_ascii_lowercase() == b)
}

pub fn is_close(val: &[u8]) -> bool {
    eq_token(val, b"close")
}

pub fn is_chunked(val: &[u8]) -> bool {
    eq_token(val, b"chunked")
}

/// Checks a (possibly comma-separated) `Connection` value for `close`
pub fn connection_close(val: &[u8]) -> bool {
    val.split(|&ch| ch == b',').any(is_close)
}

/// Checks whether the last transfer coding in the value is `chunked`
///
/// Only the last one matters: any coding applied after chunked makes
/// the message length undeterminable, and that's the peer's error.
pub fn last_token_chunked(val: &[u8]) -> bool {
    val.split(|&ch| ch == b',').last().map(is_chunked).unwrap_or(false)
}
