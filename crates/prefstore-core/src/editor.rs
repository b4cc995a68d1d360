//! Staged edits
//!
//! An [`Editor`] collects puts, removals and a clear flag without touching
//! the store. `commit` or `apply` consumes it: the staged batch is checked
//! against the configured limits, merged into the store under its lock,
//! and handed to the sequential writer.
//!
//! Merge order is clear, then removals, then puts, so a put always wins over
//! a removal of the same key from the same editor.

use std::collections::BTreeSet;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use tracing::debug;

use crate::config::Config;
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::error::{PrefError, PrefResult};
use crate::prefs::Preferences;
use crate::store::Batch;
use crate::value::Value;

/// Per-session staging area, obtained from [`Preferences::edit`].
#[must_use = "an Editor does nothing until commit() or apply()"]
pub struct Editor {
    prefs: Preferences,
    puts: HashMap<String, Value>,
    removed: HashSet<String>,
    clear: bool,
}

impl Editor {
    pub(crate) fn new(prefs: Preferences) -> Self {
        Self {
            prefs,
            puts: HashMap::new(),
            removed: HashSet::new(),
            clear: false,
        }
    }

    /// Stage any value.
    pub fn put(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.puts.insert(key.into(), value.into());
        self
    }

    pub fn put_string(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.put(key, Value::String(value.into()))
    }

    pub fn put_string_set<I, S>(self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        self.put(key, Value::StringSet(set))
    }

    pub fn put_int(self, key: impl Into<String>, value: i32) -> Self {
        self.put(key, Value::Int(value))
    }

    pub fn put_long(self, key: impl Into<String>, value: i64) -> Self {
        self.put(key, Value::Long(value))
    }

    pub fn put_float(self, key: impl Into<String>, value: f32) -> Self {
        self.put(key, Value::Float(value))
    }

    pub fn put_bool(self, key: impl Into<String>, value: bool) -> Self {
        self.put(key, Value::Bool(value))
    }

    /// Stage removal of `key`. A put of the same key in this editor still wins.
    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.removed.insert(key.into());
        self
    }

    /// Empty the store on merge and drop the puts staged so far.
    pub fn clear(mut self) -> Self {
        self.puts.clear();
        self.clear = true;
        self
    }

    /// Merge, then block until the snapshot is on disk.
    pub fn commit(self) -> PrefResult<()> {
        let (prefs, batch) = self.into_batch()?;
        if batch.is_empty() {
            return prefs.store().wait_loaded();
        }

        let mut pending = Err(PrefError::WriterClosed);
        let mut notify = false;
        let merged = prefs.store().merge(batch, |snapshot, merged| {
            pending = prefs.writer().submit_commit(Arc::clone(snapshot), merged.generation);
            notify = prefs.dispatcher().enqueue(&merged.changed);
        })?;
        debug!(generation = merged.generation, changed = merged.changed.len(), "committed preferences");
        if notify {
            prefs.dispatcher().post(&prefs);
        }

        pending?.recv().map_err(|_| PrefError::WriterClosed)?
    }

    /// Merge, queue the write and return without waiting for disk.
    ///
    /// Only rejections before the merge are returned. Write failures are
    /// reported to the store's diagnostic sink.
    pub fn apply(self) -> PrefResult<()> {
        let (prefs, batch) = self.into_batch()?;
        if batch.is_empty() {
            return prefs.store().wait_loaded();
        }

        let mut submitted = Ok(());
        let mut notify = false;
        let merged = prefs.store().merge(batch, |snapshot, merged| {
            submitted = prefs.writer().submit_apply(Arc::clone(snapshot), merged.generation);
            notify = prefs.dispatcher().enqueue(&merged.changed);
        })?;
        debug!(generation = merged.generation, changed = merged.changed.len(), "applied preferences");
        if notify {
            prefs.dispatcher().post(&prefs);
        }

        if let Err(error) = submitted {
            prefs.sink().report(Diagnostic {
                kind: DiagnosticKind::WriteFailed,
                path: prefs.path().to_path_buf(),
                error,
            });
        }
        Ok(())
    }

    fn into_batch(self) -> PrefResult<(Preferences, Batch)> {
        self.validate(self.prefs.config())?;
        let batch = Batch {
            clear: self.clear,
            removed: self.removed.into_iter().collect(),
            puts: self.puts.into_iter().collect(),
        };
        Ok((self.prefs, batch))
    }

    fn validate(&self, config: &Config) -> PrefResult<()> {
        let keys = self.puts.keys().chain(self.removed.iter());
        for key in keys {
            check_len("key", key.len(), config.max_key_size)?;
        }

        for value in self.puts.values() {
            match value {
                Value::String(s) => check_len("string", s.len(), config.max_string_size)?,
                Value::StringSet(set) => {
                    check_len("string set", set.len(), config.max_set_len)?;
                    for s in set {
                        check_len("string", s.len(), config.max_string_size)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn check_len(component: &'static str, size: usize, max: usize) -> PrefResult<()> {
    if size > max {
        return Err(PrefError::Oversized {
            component,
            size: size as u64,
            max: max as u64,
        });
    }
    Ok(())
}
