use core::fmt;

/// A register block did not have the shape its map expects.
///
/// These are never transient: re-reading the same block yields the same
/// words, so callers surface them instead of retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    WordCount {
        map: &'static str,
        expected: usize,
        actual: usize,
    },
    UnknownCode {
        field: &'static str,
        code: u16,
    },
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WordCount {
                map,
                expected,
                actual,
            } => write!(f, "{map} expects {expected} registers, got {actual}"),
            Self::UnknownCode { field, code } => write!(f, "unknown {field} code {code}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RegisterError {}
