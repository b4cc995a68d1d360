//! PrefStore Core: Embedded Binary Preference Store
//!
//! A typed key-value store for small application settings. The whole map
//! lives in RAM and is persisted as one compact binary file, replaced
//! atomically on every write.
//!
//! # Architecture
//!
//! - **Read path**: Serve from the in-memory map once the initial load finishes
//! - **Write path**: Stage in an [`Editor`], merge under one lock, queue a snapshot
//! - **Writer thread**: The only thread that touches the file, in merge order
//! - **Callbacks**: Changed keys are delivered to listeners on a designated executor
//!
//! # Example
//!
//! ```no_run
//! use prefstore_core::{Config, Preferences};
//!
//! let prefs = Preferences::open("/tmp/settings.bin", Config::default())?;
//! let count = prefs.get_int("count", 0)?;
//! prefs.edit().put_int("count", count + 1).apply()?;
//! # Ok::<(), prefstore_core::PrefError>(())
//! ```

pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod dispatch;
pub mod durability;
pub mod editor;
pub mod error;
pub mod format;
pub mod key;
pub mod persist;
pub mod prefs;
pub mod store;
pub mod value;
pub mod writer;

// Re-export key types for convenience
pub use config::{Config, LoadMode};
pub use diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, TracingSink};
pub use dispatch::{CallbackExecutor, DedicatedExecutor, OnChangeListener, Task};
pub use editor::Editor;
pub use error::{CodecError, PrefError, PrefResult};
pub use key::Key;
pub use prefs::{Preferences, PreferencesBuilder};
pub use store::LoadState;
pub use value::{FromValue, Value, ValueType};
pub use writer::WriterStats;
