//! Change notification delivery
//!
//! Listeners are owned by the store, not by editors. Each merge queues its
//! changed keys while the store lock is still held, so the queue is in merge
//! order. A task posted to the designated callback context (a
//! [`CallbackExecutor`]) then drains the queue front to back; listeners never
//! run on the merging thread and never concurrently with each other as long
//! as the executor runs tasks one at a time.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::error::{PrefError, PrefResult};
use crate::prefs::Preferences;

/// Unit of work posted to a callback context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The designated callback context: accepts a task and runs it later on
/// that context.
pub trait CallbackExecutor: Send + Sync {
    fn execute(&self, task: Task);
}

/// Callback context backed by one dedicated thread fed through a channel.
pub struct DedicatedExecutor {
    queue: Option<Sender<Task>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl DedicatedExecutor {
    pub fn spawn(name: &str) -> PrefResult<Self> {
        let (queue, tasks) = mpsc::channel::<Task>();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for task in tasks {
                    task();
                }
            })
            .map_err(|e| PrefError::Io {
                path: None,
                kind: e.kind(),
                message: format!("failed to spawn callback thread: {}", e),
            })?;

        Ok(Self {
            queue: Some(queue),
            thread: Some(thread),
        })
    }
}

impl CallbackExecutor for DedicatedExecutor {
    fn execute(&self, task: Task) {
        let sent = self.queue.as_ref().map(|queue| queue.send(task).is_ok());
        if sent != Some(true) {
            warn!("callback executor stopped, dropping notification");
        }
    }
}

impl Drop for DedicatedExecutor {
    fn drop(&mut self) {
        self.queue.take();
        if let Some(handle) = self.thread.take() {
            // The last store handle may be released by a callback task itself
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// Receives the key of every changed preference.
pub trait OnChangeListener: Send + Sync {
    fn on_changed(&self, prefs: &Preferences, key: &str);
}

impl<F> OnChangeListener for F
where
    F: Fn(&Preferences, &str) + Send + Sync,
{
    fn on_changed(&self, prefs: &Preferences, key: &str) {
        self(prefs, key)
    }
}

/// Store-owned set of listeners, compared by identity.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<Vec<Arc<dyn OnChangeListener>>>,
}

fn same_listener(a: &Arc<dyn OnChangeListener>, b: &Arc<dyn OnChangeListener>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl ListenerRegistry {
    /// Returns `false` if the listener was already registered.
    pub fn register(&self, listener: Arc<dyn OnChangeListener>) -> bool {
        let mut listeners = self.listeners.lock();
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Returns `false` if the listener was not registered.
    pub fn unregister(&self, listener: &Arc<dyn OnChangeListener>) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn OnChangeListener>> {
        self.listeners.lock().clone()
    }
}

/// Routes changed keys from merges to listeners on the callback context.
pub struct Dispatcher {
    executor: Arc<dyn CallbackExecutor>,
    listeners: ListenerRegistry,
    pending: Mutex<VecDeque<Vec<String>>>,
}

impl Dispatcher {
    pub fn new(executor: Arc<dyn CallbackExecutor>) -> Self {
        Self {
            executor,
            listeners: ListenerRegistry::default(),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Queue `keys` for delivery. Called with the store lock held so batches
    /// queue in merge order. Returns `false` when there is nothing to deliver.
    pub fn enqueue(&self, keys: &[String]) -> bool {
        if keys.is_empty() || self.listeners.is_empty() {
            return false;
        }
        self.pending.lock().push_back(keys.to_vec());
        true
    }

    /// Post a task that delivers every queued batch, oldest first. Listeners
    /// are read per batch, so a listener removed in the meantime is not called.
    pub fn post(&self, prefs: &Preferences) {
        let prefs = prefs.clone();
        self.executor.execute(Box::new(move || {
            let dispatcher = prefs.dispatcher();
            loop {
                let Some(keys) = dispatcher.pending.lock().pop_front() else {
                    break;
                };
                let listeners = dispatcher.listeners.snapshot();
                deliver(&prefs, &listeners, &keys);
            }
        }));
    }
}

fn deliver(prefs: &Preferences, listeners: &[Arc<dyn OnChangeListener>], keys: &[String]) {
    for key in keys {
        for listener in listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_changed(prefs, key)));
            if outcome.is_err() {
                error!(key = %key, "preference listener panicked");
            }
        }
    }
}
