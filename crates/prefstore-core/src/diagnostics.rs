//! Out-of-band reporting of non-fatal failures
//!
//! Failures that have no caller to return to (a background load, a write
//! queued by `apply`) are handed to a [`DiagnosticSink`]. The default sink
//! logs through `tracing`.

use std::path::PathBuf;

use tracing::error;

use crate::error::PrefError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// The initial load failed; reads will report `StorageUnavailable`
    LoadFailed,
    /// A write queued by `apply` did not reach disk
    WriteFailed,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub path: PathBuf,
    pub error: PrefError,
}

/// Receiver for failures that cannot be returned to a caller.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);
}

/// Logs every diagnostic at `error` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, diagnostic: Diagnostic) {
        match diagnostic.kind {
            DiagnosticKind::LoadFailed => error!(
                path = %diagnostic.path.display(),
                error = %diagnostic.error,
                "failed to load preferences"
            ),
            DiagnosticKind::WriteFailed => error!(
                path = %diagnostic.path.display(),
                error = %diagnostic.error,
                "failed to write preferences"
            ),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;

    #[test]
    fn test_tracing_sink_accepts_reports() {
        TracingSink.report(Diagnostic {
            kind: DiagnosticKind::WriteFailed,
            path: PathBuf::from("/tmp/prefs.bin"),
            error: PrefError::WriterClosed,
        });
    }

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingSink::default();
        for kind in [DiagnosticKind::LoadFailed, DiagnosticKind::WriteFailed] {
            sink.report(Diagnostic {
                kind,
                path: PathBuf::from("p"),
                error: PrefError::WriterClosed,
            });
        }
        let kinds: Vec<_> = sink.reports.lock().iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![DiagnosticKind::LoadFailed, DiagnosticKind::WriteFailed]);
    }
}
