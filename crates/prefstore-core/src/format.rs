//! Binary layout of a preference file
//!
//! File = FileHeader (6 bytes) + body + CRC32C trailer (4 bytes).
//!
//! Layout:
//!   [0..4]  magic:   [u8;4] - "BPRF"
//!   [4]     version: u8     - FORMAT_VERSION
//!   [5]     flags:   u8     - bit 0 = FLAG_KEY_HASHES
//!   body:   entry_count(i32) + entries
//!   trailer: crc32c(u32) over header + body
//!
//! Entry: key_len(u16) + key + [key_hash(i32)] + type(u8) + payload.
//! All integers are big-endian.

use crate::error::CodecError;

/// Magic bytes identifying a preference file
pub const MAGIC_ARRAY: [u8; 4] = *b"BPRF";

/// Current format version
pub const FORMAT_VERSION: u8 = 1;

/// Entries carry their cached key hash after the key bytes
pub const FLAG_KEY_HASHES: u8 = 0x01;

/// All flag bits this version understands
pub const KNOWN_FLAGS: u8 = FLAG_KEY_HASHES;

/// Header size in bytes
pub const HEADER_SIZE: usize = 6;

/// Trailer size in bytes
pub const TRAILER_SIZE: usize = 4;

/// Largest key or string the u16 length prefix can describe
pub const MAX_WIRE_STRING: usize = u16::MAX as usize;

/// Smallest possible encoded entry: key_len(2) + type(1) + bool payload(1)
pub const MIN_ENTRY_SIZE: usize = 4;

/// Fixed-size file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub flags: u8,
}

impl FileHeader {
    pub fn new(key_hashes: bool) -> Self {
        Self {
            magic: MAGIC_ARRAY,
            version: FORMAT_VERSION,
            flags: if key_hashes { FLAG_KEY_HASHES } else { 0 },
        }
    }

    pub fn has_key_hashes(&self) -> bool {
        (self.flags & FLAG_KEY_HASHES) != 0
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4] = self.version;
        buf[5] = self.flags;
        buf
    }

    /// Parse and validate a header from the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < HEADER_SIZE {
            return Err(CodecError::Truncated {
                offset: 0,
                needed: HEADER_SIZE,
                available: data.len(),
            });
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&data[0..4]);
        if magic != MAGIC_ARRAY {
            return Err(CodecError::Malformed {
                offset: 0,
                reason: format!(
                    "bad magic {:02x}{:02x}{:02x}{:02x}",
                    magic[0], magic[1], magic[2], magic[3]
                ),
            });
        }

        let version = data[4];
        if version != FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion { found: version });
        }

        let flags = data[5];
        if flags & !KNOWN_FLAGS != 0 {
            return Err(CodecError::Malformed {
                offset: 5,
                reason: format!("unknown header flags 0x{:02x}", flags),
            });
        }

        Ok(Self { magic, version, flags })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = FileHeader::new(true);
        let parsed = FileHeader::parse(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
        assert!(parsed.has_key_hashes());
        assert!(!FileHeader::new(false).has_key_hashes());
    }

    #[test]
    fn test_short_header_is_truncated() {
        let bytes = FileHeader::new(false).to_bytes();
        for len in 0..HEADER_SIZE {
            assert!(matches!(
                FileHeader::parse(&bytes[..len]),
                Err(CodecError::Truncated { .. })
            ));
        }
    }

    #[test]
    fn test_bad_magic_detected() {
        let mut bytes = FileHeader::new(false).to_bytes();
        bytes[0] = 0xFF;
        assert!(matches!(
            FileHeader::parse(&bytes),
            Err(CodecError::Malformed { offset: 0, .. })
        ));
    }

    #[test]
    fn test_future_version_rejected() {
        let mut bytes = FileHeader::new(false).to_bytes();
        bytes[4] = FORMAT_VERSION + 1;
        assert_eq!(
            FileHeader::parse(&bytes),
            Err(CodecError::UnsupportedVersion { found: FORMAT_VERSION + 1 })
        );
    }

    #[test]
    fn test_unknown_flags_rejected() {
        let mut bytes = FileHeader::new(false).to_bytes();
        bytes[5] = 0x80;
        assert!(matches!(
            FileHeader::parse(&bytes),
            Err(CodecError::Malformed { offset: 5, .. })
        ));
    }
}
