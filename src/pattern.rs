//! Test payload generation.
//!
//! The pattern is a fixed-length byte buffer that the engines transmit
//! cyclically. Because it repeats forever, `pattern[offset % len]` is the
//! expected byte at any absolute stream offset.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How the pattern buffer is filled.
///
/// # Examples
///
/// ```
/// use echoprobe::pattern::PatternKind;
///
/// assert_eq!(PatternKind::from_selector(0), PatternKind::Random);
/// assert_eq!(PatternKind::from_selector(-1), PatternKind::IncreasingByte);
/// assert_eq!(PatternKind::from_selector(-2), PatternKind::IncreasingAscii);
/// assert_eq!(PatternKind::from_selector(0x41), PatternKind::Constant(0x41));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternKind {
    /// Every byte has the same value
    Constant(u8),
    /// Printable characters cycling through `33..127`
    IncreasingAscii,
    /// Bytes cycling through `0..=255`
    IncreasingByte,
    /// Uniformly random bytes drawn once at startup
    #[default]
    Random,
}

impl PatternKind {
    /// Maps the command-line character selector to a pattern kind.
    ///
    /// `0` selects random data, `-1` increasing bytes, `-2` increasing
    /// printable characters, anything else a constant (truncated to a byte).
    pub fn from_selector(selector: i32) -> Self {
        match selector {
            0 => PatternKind::Random,
            -1 => PatternKind::IncreasingByte,
            -2 => PatternKind::IncreasingAscii,
            c => PatternKind::Constant(c as u8),
        }
    }
}

/// First printable character used by [`PatternKind::IncreasingAscii`].
const ASCII_FIRST: usize = 33;
/// Number of characters in the printable cycle (`33..127`).
const ASCII_SPAN: usize = 127 - 33;

/// Fills a new buffer of `len` bytes according to `kind`.
///
/// Deterministic for every kind except [`PatternKind::Random`].
///
/// # Examples
///
/// ```
/// use echoprobe::pattern::{generate, PatternKind};
///
/// let p = generate(4, PatternKind::IncreasingAscii);
/// assert_eq!(&p[..], b"!\"#$");
/// ```
pub fn generate(len: usize, kind: PatternKind) -> Arc<[u8]> {
    let mut buf = vec![0u8; len];
    match kind {
        PatternKind::Constant(c) => buf.fill(c),
        PatternKind::IncreasingAscii => {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = (ASCII_FIRST + i % ASCII_SPAN) as u8;
            }
        }
        PatternKind::IncreasingByte => {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = (i % 256) as u8;
            }
        }
        PatternKind::Random => rand::thread_rng().fill_bytes(&mut buf),
    }
    buf.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_pattern() {
        let p = generate(1024, PatternKind::Constant(0xAA));
        assert_eq!(p.len(), 1024);
        assert!(p.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_increasing_ascii_wraps_at_127() {
        let p = generate(200, PatternKind::IncreasingAscii);
        assert_eq!(p[0], 33);
        assert_eq!(p[93], 126);
        assert_eq!(p[94], 33);
        assert!(p.iter().all(|&b| (33..127).contains(&b)));
    }

    #[test]
    fn test_increasing_byte_wraps_at_256() {
        let p = generate(1024, PatternKind::IncreasingByte);
        assert_eq!(p[0], 0);
        assert_eq!(p[255], 255);
        assert_eq!(p[256], 0);
        assert_eq!(p[1023], 255);
    }

    #[test]
    fn test_deterministic_kinds_are_reproducible() {
        for kind in [
            PatternKind::Constant(7),
            PatternKind::IncreasingAscii,
            PatternKind::IncreasingByte,
        ] {
            assert_eq!(generate(512, kind), generate(512, kind));
        }
    }

    #[test]
    fn test_random_pattern_length() {
        let p = generate(64, PatternKind::Random);
        assert_eq!(p.len(), 64);
    }

    #[test]
    fn test_selector_truncates_constant() {
        assert_eq!(PatternKind::from_selector(0x1FF), PatternKind::Constant(0xFF));
    }
}
