//! Configuration for a preference store
//!
//! Presets cover the common trade-offs between open latency and write
//! durability; fields are public for custom setups.

use crate::error::{PrefError, PrefResult};
use crate::format::MAX_WIRE_STRING;

/// When the backing file is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Load inside `open`; the store is readable as soon as `open` returns.
    Blocking,
    /// Load on a dedicated thread; reads block until it finishes.
    Background,
}

/// PrefStore configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Initial load strategy
    pub load_mode: LoadMode,
    /// Sync the temp file and its directory around every atomic replace
    pub durable_writes: bool,
    /// Persist each key's cached hash so loads skip rehashing
    pub cache_key_hashes: bool,
    /// Maximum key size in bytes
    pub max_key_size: usize,
    /// Maximum string value (or set element) size in bytes
    pub max_string_size: usize,
    /// Maximum number of elements in a string set
    pub max_set_len: usize,
    /// Files larger than this are refused at load
    pub max_file_size: u64,
}

impl Config {
    /// Blocking load, fsync on every write.
    pub fn durable() -> Self {
        Self {
            load_mode: LoadMode::Blocking,
            durable_writes: true,
            cache_key_hashes: true,
            max_key_size: 1024,
            max_string_size: MAX_WIRE_STRING,
            max_set_len: 64 * 1024,
            max_file_size: 64 * 1024 * 1024,
        }
    }

    /// Background load so `open` returns immediately.
    pub fn lazy() -> Self {
        Self {
            load_mode: LoadMode::Background,
            ..Self::durable()
        }
    }

    /// No fsync: writes survive process crashes but not power loss.
    pub fn fast() -> Self {
        Self {
            durable_writes: false,
            ..Self::durable()
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> PrefResult<()> {
        if self.max_key_size == 0 || self.max_key_size > MAX_WIRE_STRING {
            return Err(PrefError::InvalidConfig(format!(
                "max_key_size must be in [1, {}]",
                MAX_WIRE_STRING
            )));
        }
        if self.max_string_size == 0 || self.max_string_size > MAX_WIRE_STRING {
            return Err(PrefError::InvalidConfig(format!(
                "max_string_size must be in [1, {}]",
                MAX_WIRE_STRING
            )));
        }
        if self.max_set_len == 0 || self.max_set_len > i32::MAX as usize {
            return Err(PrefError::InvalidConfig(
                "max_set_len must be in [1, i32::MAX]".into(),
            ));
        }
        if self.max_file_size < 1024 {
            return Err(PrefError::InvalidConfig(
                "max_file_size must be >= 1KB".into(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::durable()
    }
}
