//! Error types for PrefStore operations
//!
//! Two layers: [`CodecError`] is produced by the pure byte codec, [`PrefError`]
//! by everything that touches the store, the file or the writer thread.
//! Both are `Clone` so a recorded load failure can be returned to every reader.

use std::path::PathBuf;

use thiserror::Error;

use crate::value::ValueType;

/// Failures while encoding or decoding the binary preference format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A declared length or fixed-width field runs past the end of the buffer
    #[error("truncated input at offset {offset}: need {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// An entry carries a type tag this decoder does not know
    #[error("unknown value type tag {tag} at offset {offset}")]
    UnknownType { tag: u8, offset: usize },

    /// Structurally invalid data (negative counts, bad magic, stray bytes)
    #[error("malformed input at offset {offset}: {reason}")]
    Malformed { offset: usize, reason: String },

    /// File written by an incompatible format version
    #[error("unsupported format version {found}")]
    UnsupportedVersion { found: u8 },

    /// Trailer checksum does not match the header and body
    #[error("checksum mismatch: expected 0x{expected:08x}, got 0x{actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// A key, string or collection is too large for its wire length field
    #[error("{component} too large: {size} exceeds limit of {max}")]
    Oversized {
        component: &'static str,
        size: usize,
        max: usize,
    },
}

/// PrefStore error types with enough context to diagnose the failing file.
#[derive(Debug, Clone, Error)]
pub enum PrefError {
    /// I/O operation failed
    #[error("I/O error{}: {message} ({kind})", display_path(.path))]
    Io {
        /// The file path where the error occurred
        path: Option<PathBuf>,
        /// The underlying I/O error kind
        kind: std::io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// The backing file could not be decoded
    #[error("corrupt preference file{}: {source}", display_path(.path))]
    Codec {
        path: Option<PathBuf>,
        #[source]
        source: CodecError,
    },

    /// The initial load failed; every read reports the recorded cause
    #[error("preference storage unavailable: {cause}")]
    StorageUnavailable { cause: Box<PrefError> },

    /// A typed getter found a value of a different type
    #[error("preference '{key}' holds {found}, not {expected}")]
    TypeMismatch {
        key: String,
        expected: ValueType,
        found: ValueType,
    },

    /// A staged key or value exceeds the configured limits
    #[error("{component} too large: {size} exceeds limit of {max}")]
    Oversized {
        component: &'static str,
        size: u64,
        max: u64,
    },

    /// Rejected configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The sequential writer has shut down and cannot accept work
    #[error("preference writer is closed")]
    WriterClosed,
}

fn display_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" in {}", path.display()),
        None => String::new(),
    }
}

impl PrefError {
    /// Build an `Io` error carrying the failing path.
    pub fn io_at(path: impl Into<PathBuf>, err: &std::io::Error, what: &str) -> Self {
        PrefError::Io {
            path: Some(path.into()),
            kind: err.kind(),
            message: format!("{}: {}", what, err),
        }
    }

    /// Attach a path to a codec failure.
    pub fn codec_at(path: impl Into<PathBuf>, source: CodecError) -> Self {
        PrefError::Codec {
            path: Some(path.into()),
            source,
        }
    }
}

/// Convert std::io::Error to PrefError::Io
impl From<std::io::Error> for PrefError {
    fn from(err: std::io::Error) -> Self {
        PrefError::Io {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<CodecError> for PrefError {
    fn from(source: CodecError) -> Self {
        PrefError::Codec { path: None, source }
    }
}

/// Result type alias for PrefStore operations
pub type PrefResult<T> = Result<T, PrefError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CodecError::ChecksumMismatch {
            expected: 0x12345678,
            actual: 0x87654321,
        };

        let display = format!("{}", err);
        assert!(display.contains("checksum mismatch"));
        assert!(display.contains("0x12345678"));
        assert!(display.contains("0x87654321"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let pref_err: PrefError = io_err.into();

        match pref_err {
            PrefError::Io { kind, path, .. } => {
                assert_eq!(kind, std::io::ErrorKind::PermissionDenied);
                assert!(path.is_none());
            }
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_codec_error_with_path() {
        let err = PrefError::codec_at(
            "/tmp/settings.bin",
            CodecError::UnknownType { tag: 9, offset: 17 },
        );
        let display = err.to_string();
        assert!(display.contains("/tmp/settings.bin"));
        assert!(display.contains("unknown value type tag 9"));
    }

    #[test]
    fn test_unavailable_wraps_cause() {
        let cause = PrefError::from(CodecError::Truncated {
            offset: 10,
            needed: 4,
            available: 1,
        });
        let err = PrefError::StorageUnavailable {
            cause: Box::new(cause),
        };
        assert!(err.to_string().contains("truncated input"));
    }
}
