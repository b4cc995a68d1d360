//! Preference keys with a cached hash
//!
//! A [`Key`] keeps the raw UTF-8 bytes exactly as read from disk together
//! with a precomputed hash, so loading a file needs neither a UTF-8 decode
//! nor a rehash per entry. Equality is byte-for-byte; the hash only routes
//! lookups. The text form is materialized on first use and cached.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use hashbrown::Equivalent;
use once_cell::sync::OnceCell;

/// Hash stored alongside each key: CRC32C of the key bytes.
pub fn key_hash(bytes: &[u8]) -> i32 {
    crc32c::crc32c(bytes) as i32
}

/// Immutable preference key.
#[derive(Clone)]
pub struct Key {
    hash: i32,
    bytes: Arc<[u8]>,
    text: OnceCell<String>,
}

impl Key {
    /// Key from its text form; the text is cached immediately.
    pub fn new(text: &str) -> Self {
        let text = text.to_owned();
        let bytes: Arc<[u8]> = Arc::from(text.as_bytes());
        Self {
            hash: key_hash(&bytes),
            bytes,
            text: OnceCell::with_value(text),
        }
    }

    /// Key from raw bytes and a previously computed hash.
    ///
    /// The caller vouches that `hash == key_hash(&bytes)`; the codec only
    /// passes hashes from checksum-verified files.
    pub fn from_parts(hash: i32, bytes: Vec<u8>) -> Self {
        Self {
            hash,
            bytes: Arc::from(bytes),
            text: OnceCell::new(),
        }
    }

    /// Key from raw bytes, computing the hash.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let hash = key_hash(&bytes);
        Self::from_parts(hash, bytes)
    }

    pub fn hash_code(&self) -> i32 {
        self.hash
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Text form. Invalid UTF-8, possible only through [`Key::from_bytes`] or
    /// [`Key::from_parts`], is replaced rather than rejected.
    pub fn as_str(&self) -> &str {
        self.text
            .get_or_init(|| String::from_utf8_lossy(&self.bytes).into_owned())
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_i32(self.hash);
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Key").field(&self.as_str()).finish()
    }
}

impl From<&str> for Key {
    fn from(text: &str) -> Self {
        Key::new(text)
    }
}

/// Borrowed lookup probe: hashes like a [`Key`] without allocating one.
pub struct KeyRef<'a> {
    hash: i32,
    bytes: &'a [u8],
}

impl<'a> KeyRef<'a> {
    pub fn new(text: &'a str) -> Self {
        let bytes = text.as_bytes();
        Self {
            hash: key_hash(bytes),
            bytes,
        }
    }
}

impl Hash for KeyRef<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_i32(self.hash);
    }
}

impl Equivalent<Key> for KeyRef<'_> {
    fn equivalent(&self, key: &Key) -> bool {
        self.bytes == key.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::HashMap;

    #[test]
    fn test_equality_is_bytewise() {
        let a = Key::from_parts(42, b"alpha".to_vec());
        let b = Key::from_parts(42, b"omega".to_vec());
        // Same cached hash, different bytes: a collision, not a match
        assert_ne!(a, b);
        assert_eq!(Key::new("alpha"), Key::from_bytes(b"alpha".to_vec()));
    }

    #[test]
    fn test_hash_matches_for_text_and_bytes() {
        let from_text = Key::new("launch_count");
        let from_disk = Key::from_bytes(b"launch_count".to_vec());
        assert_eq!(from_text.hash_code(), from_disk.hash_code());
    }

    #[test]
    fn test_lazy_text() {
        let key = Key::from_bytes("größe".as_bytes().to_vec());
        assert!(key.text.get().is_none());
        assert_eq!(key.as_str(), "größe");
        assert!(key.text.get().is_some());
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let key = Key::from_bytes(vec![b'k', 0xFF]);
        assert_eq!(key.as_str(), "k\u{FFFD}");
    }

    #[test]
    fn test_keyref_lookup() {
        let mut map = HashMap::new();
        map.insert(Key::from_bytes(b"dark_mode".to_vec()), 1);
        assert_eq!(map.get(&KeyRef::new("dark_mode")), Some(&1));
        assert_eq!(map.get(&KeyRef::new("light_mode")), None);
    }
}
