//! Sequential writer, the single thread that touches the backing file
//!
//! Every physical write, whether from `apply` or `commit`, is a job on one
//! FIFO queue served by one dedicated thread, so writes reach disk in the
//! order their merges happened and never race each other.
//!
//! Jobs carry a full snapshot. An `apply` job whose generation is older than
//! the newest job already enqueued is skipped: the newer snapshot contains
//! its changes. `commit` jobs are always written because a caller waits
//! on their result.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use tracing::debug;

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::error::{PrefError, PrefResult};
use crate::persist::PrefFile;
use crate::store::PrefMap;

/// Counters describing the writer's work since start.
#[derive(Debug, Default)]
pub struct WriterStats {
    completed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl WriterStats {
    /// Snapshots written to disk.
    pub fn writes_completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Apply jobs superseded by a newer queued snapshot.
    pub fn writes_skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Writes that returned an error.
    pub fn writes_failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

enum Job {
    Write {
        snapshot: Arc<PrefMap>,
        generation: u64,
        reply: Option<Sender<PrefResult<()>>>,
    },
    Barrier(Sender<()>),
}

/// Handle to the writer thread. Dropping it drains the queue and joins the thread.
pub struct SequentialWriter {
    queue: Option<Sender<Job>>,
    thread: Option<thread::JoinHandle<()>>,
    latest: Arc<AtomicU64>,
    stats: Arc<WriterStats>,
}

impl SequentialWriter {
    /// Spawn the writer thread for `file`.
    pub fn start(file: PrefFile, sink: Arc<dyn DiagnosticSink>) -> PrefResult<Self> {
        let (queue, jobs) = mpsc::channel();
        let latest = Arc::new(AtomicU64::new(0));
        let stats = Arc::new(WriterStats::default());
        let path = file.path().to_path_buf();

        let thread = {
            let latest = Arc::clone(&latest);
            let stats = Arc::clone(&stats);
            thread::Builder::new()
                .name("prefstore-writer".to_string())
                .spawn(move || writer_loop(jobs, file, latest, stats, sink))
                .map_err(|e| PrefError::io_at(path, &e, "failed to spawn writer thread"))?
        };

        Ok(Self {
            queue: Some(queue),
            thread: Some(thread),
            latest,
            stats,
        })
    }

    /// Queue a fire-and-forget write; failures go to the diagnostic sink.
    pub fn submit_apply(&self, snapshot: Arc<PrefMap>, generation: u64) -> PrefResult<()> {
        self.send(Job::Write {
            snapshot,
            generation,
            reply: None,
        })
    }

    /// Queue a write and return the channel its result arrives on.
    pub fn submit_commit(
        &self,
        snapshot: Arc<PrefMap>,
        generation: u64,
    ) -> PrefResult<Receiver<PrefResult<()>>> {
        let (reply, result) = mpsc::channel();
        self.send(Job::Write {
            snapshot,
            generation,
            reply: Some(reply),
        })?;
        Ok(result)
    }

    /// Block until every job queued before this call has finished.
    pub fn flush(&self) -> PrefResult<()> {
        let (done, wait) = mpsc::channel();
        self.send(Job::Barrier(done))?;
        wait.recv().map_err(|_| PrefError::WriterClosed)
    }

    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    fn send(&self, job: Job) -> PrefResult<()> {
        if let Job::Write { generation, .. } = &job {
            self.latest.fetch_max(*generation, Ordering::AcqRel);
        }
        let queue = self.queue.as_ref().ok_or(PrefError::WriterClosed)?;
        queue.send(job).map_err(|_| PrefError::WriterClosed)
    }

    /// Drain the queue and join the writer thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.queue.take();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SequentialWriter {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Main writer loop; runs on the writer thread until every sender is gone.
fn writer_loop(
    jobs: Receiver<Job>,
    file: PrefFile,
    latest: Arc<AtomicU64>,
    stats: Arc<WriterStats>,
    sink: Arc<dyn DiagnosticSink>,
) {
    for job in jobs {
        match job {
            Job::Write {
                snapshot,
                generation,
                reply,
            } => {
                if reply.is_none() && generation < latest.load(Ordering::Acquire) {
                    stats.skipped.fetch_add(1, Ordering::Relaxed);
                    debug!(generation, "skipping superseded preference write");
                    continue;
                }

                let result = file.save(snapshot.iter());
                // Release the snapshot before replying so the next merge can reuse it
                drop(snapshot);

                match &result {
                    Ok(()) => stats.completed.fetch_add(1, Ordering::Relaxed),
                    Err(_) => stats.failed.fetch_add(1, Ordering::Relaxed),
                };

                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(error) = result {
                            sink.report(Diagnostic {
                                kind: DiagnosticKind::WriteFailed,
                                path: file.path().to_path_buf(),
                                error,
                            });
                        }
                    }
                }
            }
            Job::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!(path = %file.path().display(), "preference writer stopped");
}
