//! Durable sync for preference files and their directories
//!
//! A save is only crash-safe if the temp file's data reaches media before the
//! rename, and the rename itself reaches media after. [`durable_sync`] covers
//! the first, [`sync_dir`] the second.

use std::fs::File;
use std::io;
use std::path::Path;

/// Flush file data to persistent storage using the strongest primitive the
/// platform offers.
///
/// - Linux: `fdatasync()`
/// - macOS/iOS: `fcntl(F_FULLFSYNC)`, plain fsync stops at the drive cache
/// - Windows: `FlushFileBuffers()`
/// - Other: `File::sync_data()`
///
/// May block for a long time under heavy I/O; never call it with the store lock held.
pub fn durable_sync(file: &File) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the fd comes from a live `File` borrowed for the whole call.
        let result = unsafe { libc::fdatasync(file.as_raw_fd()) };
        check(result == 0)
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the fd comes from a live `File` borrowed for the whole call.
        let result = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_FULLFSYNC) };
        check(result == 0)
    }

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::io::AsRawHandle;
        use winapi::um::fileapi::FlushFileBuffers;
        // SAFETY: the handle comes from a live `File` borrowed for the whole call.
        let result = unsafe { FlushFileBuffers(file.as_raw_handle() as *mut _) };
        check(result != 0)
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "macos",
        target_os = "ios",
        target_os = "windows"
    )))]
    {
        file.sync_data()
    }
}

/// Persist directory metadata (a completed rename) on platforms that allow
/// opening directories. No-op on Windows.
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        let handle = File::open(dir)?;
        handle.sync_all()
    }

    #[cfg(not(unix))]
    {
        let _ = dir;
        Ok(())
    }
}

#[allow(dead_code)]
fn check(ok: bool) -> io::Result<()> {
    if ok {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_durable_sync_success() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"prefs").unwrap();

        let result = durable_sync(file.as_file());
        assert!(result.is_ok(), "durable_sync failed: {:?}", result.err());
    }

    #[test]
    fn test_sync_dir_success() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(sync_dir(dir.path()).is_ok());
    }
}
