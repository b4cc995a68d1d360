//! Preferences: the public face of a preference store.
//!
//! `Preferences` ties together the in-memory [`Store`], the sequential
//! writer, the listener dispatcher and the diagnostic sink for one backing
//! file. It is a cheap `Clone` handle; all clones share the same store.
//!
//! **Read path**: block until loaded, then read the map under the store lock
//! **Write path**: `edit()` stages, `commit()`/`apply()` merge then queue the write
//! **Background**: one writer thread, one callback thread, optionally one load thread

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use tracing::debug;

use crate::config::{Config, LoadMode};
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, TracingSink};
use crate::dispatch::{CallbackExecutor, DedicatedExecutor, Dispatcher, OnChangeListener};
use crate::editor::Editor;
use crate::error::{PrefError, PrefResult};
use crate::persist::PrefFile;
use crate::store::{FileBudget, LoadState, Store};
use crate::value::{FromValue, Value};
use crate::writer::{SequentialWriter, WriterStats};

struct Shared {
    path: PathBuf,
    config: Config,
    store: Arc<Store>,
    writer: SequentialWriter,
    dispatcher: Dispatcher,
    sink: Arc<dyn DiagnosticSink>,
}

/// Handle to a file-backed preference store.
#[derive(Clone)]
pub struct Preferences {
    shared: Arc<Shared>,
}

/// Wires a store to its collaborators before opening it.
pub struct PreferencesBuilder {
    path: PathBuf,
    config: Config,
    executor: Option<Arc<dyn CallbackExecutor>>,
    sink: Option<Arc<dyn DiagnosticSink>>,
}

impl PreferencesBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Designated context for change notifications. Defaults to a
    /// [`DedicatedExecutor`] thread named `prefstore-callbacks`.
    pub fn callback_executor(mut self, executor: Arc<dyn CallbackExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Receiver for failed background loads and writes. Defaults to [`TracingSink`].
    pub fn diagnostic_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Start the writer and the initial load.
    ///
    /// A load failure does not fail `open`; it is recorded and returned by
    /// every subsequent read as `StorageUnavailable`.
    pub fn open(self) -> PrefResult<Preferences> {
        self.config.validate()?;

        let sink = self.sink.unwrap_or_else(|| Arc::new(TracingSink));
        let executor: Arc<dyn CallbackExecutor> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(DedicatedExecutor::spawn("prefstore-callbacks")?),
        };

        let file = PrefFile::new(&self.path, &self.config);
        let writer = SequentialWriter::start(file.clone(), Arc::clone(&sink))?;
        let store = Arc::new(Store::with_budget(FileBudget {
            max_file_size: self.config.max_file_size,
            key_hashes: self.config.cache_key_hashes,
        }));

        start_load(&store, file, self.config.load_mode, Arc::clone(&sink));

        Ok(Preferences {
            shared: Arc::new(Shared {
                path: self.path,
                config: self.config,
                store,
                writer,
                dispatcher: Dispatcher::new(executor),
                sink,
            }),
        })
    }
}

fn start_load(store: &Arc<Store>, file: PrefFile, mode: LoadMode, sink: Arc<dyn DiagnosticSink>) {
    if !store.begin_load() {
        return;
    }

    match mode {
        LoadMode::Blocking => run_load(store, &file, sink.as_ref()),
        LoadMode::Background => {
            let spawned = {
                let store = Arc::clone(store);
                let file = file.clone();
                let sink = Arc::clone(&sink);
                thread::Builder::new()
                    .name("prefstore-load".to_string())
                    .spawn(move || run_load(&store, &file, sink.as_ref()))
            };
            if let Err(e) = spawned {
                let error = PrefError::io_at(file.path(), &e, "failed to spawn load thread");
                report_load_failure(&file, sink.as_ref(), &error);
                store.complete_load(Err(error));
            }
        }
    }
}

fn run_load(store: &Store, file: &PrefFile, sink: &dyn DiagnosticSink) {
    let result = file.load();
    if let Err(error) = &result {
        report_load_failure(file, sink, error);
    }
    store.complete_load(result);
}

fn report_load_failure(file: &PrefFile, sink: &dyn DiagnosticSink, error: &PrefError) {
    sink.report(Diagnostic {
        kind: DiagnosticKind::LoadFailed,
        path: file.path().to_path_buf(),
        error: error.clone(),
    });
}

impl Preferences {
    pub fn builder(path: impl Into<PathBuf>) -> PreferencesBuilder {
        PreferencesBuilder {
            path: path.into(),
            config: Config::default(),
            executor: None,
            sink: None,
        }
    }

    /// Open or create the store backed by `path`.
    pub fn open(path: impl Into<PathBuf>, config: Config) -> PrefResult<Self> {
        Self::builder(path).config(config).open()
    }

    /// Open the store named `name` inside the directory `dir`.
    pub fn open_in(dir: impl AsRef<Path>, name: &str, config: Config) -> PrefResult<Self> {
        Self::open(dir.as_ref().join(name), config)
    }

    /// Value for `key`, or `None` if absent.
    pub fn get(&self, key: &str) -> PrefResult<Option<Value>> {
        self.shared.store.get(key)
    }

    pub fn get_string(&self, key: &str, default: &str) -> PrefResult<String> {
        self.get_typed(key, default.to_owned())
    }

    pub fn get_string_set(&self, key: &str, default: BTreeSet<String>) -> PrefResult<BTreeSet<String>> {
        self.get_typed(key, default)
    }

    pub fn get_int(&self, key: &str, default: i32) -> PrefResult<i32> {
        self.get_typed(key, default)
    }

    pub fn get_long(&self, key: &str, default: i64) -> PrefResult<i64> {
        self.get_typed(key, default)
    }

    pub fn get_float(&self, key: &str, default: f32) -> PrefResult<f32> {
        self.get_typed(key, default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> PrefResult<bool> {
        self.get_typed(key, default)
    }

    fn get_typed<T: FromValue>(&self, key: &str, default: T) -> PrefResult<T> {
        match self.shared.store.get(key)? {
            None => Ok(default),
            Some(value) => T::from_value(value).map_err(|found| PrefError::TypeMismatch {
                key: key.to_owned(),
                expected: T::TYPE,
                found: found.value_type(),
            }),
        }
    }

    /// Copy of every entry; later edits do not show through it.
    pub fn get_all(&self) -> PrefResult<std::collections::HashMap<String, Value>> {
        self.shared.store.get_all()
    }

    pub fn contains(&self, key: &str) -> PrefResult<bool> {
        self.shared.store.contains(key)
    }

    /// Number of stored preferences.
    pub fn len(&self) -> PrefResult<usize> {
        self.shared.store.len()
    }

    pub fn is_empty(&self) -> PrefResult<bool> {
        self.shared.store.is_empty()
    }

    /// Fresh editor bound to this store.
    pub fn edit(&self) -> Editor {
        Editor::new(self.clone())
    }

    /// Returns `false` if the listener was already registered.
    pub fn register_listener(&self, listener: Arc<dyn OnChangeListener>) -> bool {
        self.shared.dispatcher.listeners().register(listener)
    }

    /// Returns `false` if the listener was not registered.
    pub fn unregister_listener(&self, listener: &Arc<dyn OnChangeListener>) -> bool {
        self.shared.dispatcher.listeners().unregister(listener)
    }

    pub fn load_state(&self) -> LoadState {
        self.shared.store.load_state()
    }

    /// True once the initial load finished, successfully or not.
    pub fn is_loaded(&self) -> bool {
        self.load_state() == LoadState::Loaded
    }

    /// Block until the initial load finishes; returns its failure, if any.
    pub fn wait_until_loaded(&self) -> PrefResult<()> {
        self.shared.store.wait_loaded()
    }

    /// Block until every write queued so far has reached disk (or failed).
    pub fn flush(&self) -> PrefResult<()> {
        self.shared.writer.flush()?;
        debug!(path = %self.shared.path.display(), "preference writes flushed");
        Ok(())
    }

    pub fn writer_stats(&self) -> &WriterStats {
        self.shared.writer.stats()
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub(crate) fn store(&self) -> &Store {
        &self.shared.store
    }

    pub(crate) fn writer(&self) -> &SequentialWriter {
        &self.shared.writer
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    pub(crate) fn sink(&self) -> &dyn DiagnosticSink {
        self.shared.sink.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::testing::RecordingSink;
    use crate::value::ValueType;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_prefs() -> (Preferences, TempDir) {
        let dir = TempDir::new().unwrap();
        let prefs = Preferences::open(dir.path().join("prefs.bin"), Config::fast()).unwrap();
        (prefs, dir)
    }

    #[test]
    fn test_open_empty() {
        let (prefs, _dir) = test_prefs();
        assert!(prefs.is_loaded());
        assert!(prefs.is_empty().unwrap());
        assert!(prefs.get_all().unwrap().is_empty());
    }

    #[test]
    fn test_typed_defaults() {
        let (prefs, _dir) = test_prefs();
        assert_eq!(prefs.get_int("missing", 4).unwrap(), 4);
        assert_eq!(prefs.get_long("missing", -4).unwrap(), -4);
        assert_eq!(prefs.get_float("missing", 0.5).unwrap(), 0.5);
        assert!(prefs.get_bool("missing", true).unwrap());
        assert_eq!(prefs.get_string("missing", "dflt").unwrap(), "dflt");
        assert!(prefs.get_string_set("missing", BTreeSet::new()).unwrap().is_empty());
        assert_eq!(prefs.get("missing").unwrap(), None);
    }

    #[test]
    fn test_every_type_roundtrips_through_disk() {
        let (prefs, dir) = test_prefs();
        prefs
            .edit()
            .put_string("s", "text")
            .put_string_set("set", ["a", "b"])
            .put_int("i", -7)
            .put_long("l", i64::MAX)
            .put_float("f", 2.25)
            .put_bool("b", true)
            .commit()
            .unwrap();

        let reopened = Preferences::open(dir.path().join("prefs.bin"), Config::fast()).unwrap();
        assert_eq!(reopened.get_string("s", "").unwrap(), "text");
        let expected: BTreeSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(reopened.get_string_set("set", BTreeSet::new()).unwrap(), expected);
        assert_eq!(reopened.get_int("i", 0).unwrap(), -7);
        assert_eq!(reopened.get_long("l", 0).unwrap(), i64::MAX);
        assert_eq!(reopened.get_float("f", 0.0).unwrap(), 2.25);
        assert!(reopened.get_bool("b", false).unwrap());
        assert_eq!(reopened.len().unwrap(), 6);
    }

    #[test]
    fn test_type_mismatch_reported() {
        let (prefs, _dir) = test_prefs();
        prefs.edit().put_long("n", 1).commit().unwrap();
        match prefs.get_int("n", 0) {
            Err(PrefError::TypeMismatch { key, expected, found }) => {
                assert_eq!(key, "n");
                assert_eq!(expected, ValueType::Int);
                assert_eq!(found, ValueType::Long);
            }
            other => panic!("expected type mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_apply_visible_immediately() {
        let (prefs, _dir) = test_prefs();
        prefs.edit().put_int("count", 1).apply().unwrap();
        assert_eq!(prefs.get_int("count", 0).unwrap(), 1);

        let other = prefs.clone();
        let seen = thread::spawn(move || other.get_int("count", 0).unwrap())
            .join()
            .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_listener_called_once_per_changed_key() {
        let (prefs, _dir) = test_prefs();
        prefs.edit().put_int("untouched", 1).commit().unwrap();

        let (tx, rx) = mpsc::channel();
        let tx = parking_lot::Mutex::new(tx);
        let listener: Arc<dyn OnChangeListener> = Arc::new(move |_: &Preferences, key: &str| {
            let name = thread::current().name().map(str::to_owned);
            tx.lock().send((key.to_owned(), name)).unwrap();
        });
        assert!(prefs.register_listener(listener.clone()));

        prefs.edit().put_int("k", 2).commit().unwrap();

        let (key, thread_name) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(key, "k");
        assert_eq!(thread_name.as_deref(), Some("prefstore-callbacks"));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        assert!(prefs.unregister_listener(&listener));
        prefs.edit().put_int("k", 3).commit().unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_background_load_blocks_reads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.bin");
        {
            let prefs = Preferences::open(&path, Config::fast()).unwrap();
            prefs.edit().put_int("count", 9).commit().unwrap();
        }

        let mut config = Config::lazy();
        config.durable_writes = false;
        let prefs = Preferences::open(&path, config).unwrap();
        // Reads wait for the background load instead of returning the default
        assert_eq!(prefs.get_int("count", 0).unwrap(), 9);
        assert!(prefs.is_loaded());
    }

    #[test]
    fn test_load_failure_reported_and_surfaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.bin");
        std::fs::write(&path, b"BPRF\x01\x00").unwrap();

        let sink = Arc::new(RecordingSink::default());
        let prefs = Preferences::builder(&path)
            .config(Config::fast())
            .diagnostic_sink(sink.clone())
            .open()
            .unwrap();

        assert!(matches!(prefs.get_int("count", 0), Err(PrefError::StorageUnavailable { .. })));
        assert!(matches!(
            prefs.edit().put_int("count", 1).apply(),
            Err(PrefError::StorageUnavailable { .. })
        ));
        let reports = sink.reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, DiagnosticKind::LoadFailed);
        // The corrupt file is left as it was
        assert_eq!(std::fs::read(&path).unwrap(), b"BPRF\x01\x00");
    }

    #[test]
    fn test_commit_and_apply_share_one_writer() {
        let (prefs, _dir) = test_prefs();
        prefs.edit().put_int("a", 1).apply().unwrap();
        prefs.edit().put_int("b", 2).commit().unwrap();
        prefs.edit().put_int("c", 3).apply().unwrap();
        prefs.flush().unwrap();

        let stats = prefs.writer_stats();
        assert_eq!(stats.writes_completed() + stats.writes_skipped(), 3);
        assert_eq!(stats.writes_failed(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.max_key_size = 0;
        assert!(matches!(
            Preferences::open(dir.path().join("p.bin"), config),
            Err(PrefError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_open_in_joins_name() {
        let dir = TempDir::new().unwrap();
        let prefs = Preferences::open_in(dir.path(), "settings", Config::fast()).unwrap();
        assert_eq!(prefs.path(), dir.path().join("settings").as_path());
    }
}
