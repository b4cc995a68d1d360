//! Backing file I/O
//!
//! [`PrefFile`] loads a snapshot (a missing file is an empty snapshot, not
//! an error) and saves one with the atomic replace pattern:
//! 1. Encode the snapshot in memory
//! 2. Write it to `<name>.tmp` next to the target
//! 3. durable_sync the temp file
//! 4. Rename over the target (atomic on POSIX)
//! 5. durable_sync the directory
//!
//! A crash before step 4 leaves the previous file intact and an orphaned
//! temp file, which the next save truncates.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::codec::{self, Snapshot};
use crate::config::Config;
use crate::durability::{durable_sync, sync_dir};
use crate::error::{PrefError, PrefResult};
use crate::key::Key;
use crate::value::Value;

/// Handle to the file backing one preference store.
#[derive(Debug, Clone)]
pub struct PrefFile {
    path: PathBuf,
    tmp_path: PathBuf,
    durable: bool,
    key_hashes: bool,
    max_file_size: u64,
}

impl PrefFile {
    pub fn new(path: impl Into<PathBuf>, config: &Config) -> Self {
        let path = path.into();
        let mut tmp_name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        Self {
            path,
            tmp_path,
            durable: config.durable_writes,
            key_hashes: config.cache_key_hashes,
            max_file_size: config.max_file_size,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and decode the backing file.
    pub fn load(&self) -> PrefResult<Snapshot> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no preference file, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(PrefError::io_at(&self.path, &e, "failed to open preference file")),
        };

        let len = file
            .metadata()
            .map_err(|e| PrefError::io_at(&self.path, &e, "failed to stat preference file"))?
            .len();
        if len > self.max_file_size {
            return Err(PrefError::Oversized {
                component: "preference file",
                size: len,
                max: self.max_file_size,
            });
        }

        let mut bytes = Vec::with_capacity(len as usize);
        BufReader::new(file)
            .read_to_end(&mut bytes)
            .map_err(|e| PrefError::io_at(&self.path, &e, "failed to read preference file"))?;

        let snapshot =
            codec::decode(&bytes).map_err(|e| PrefError::codec_at(&self.path, e))?;
        debug!(
            path = %self.path.display(),
            entries = snapshot.len(),
            bytes = bytes.len(),
            "loaded preferences"
        );
        Ok(snapshot)
    }

    /// Encode `entries` and atomically replace the backing file.
    pub fn save<'a, I>(&self, entries: I) -> PrefResult<()>
    where
        I: IntoIterator<Item = (&'a Key, &'a Value)>,
        I::IntoIter: ExactSizeIterator,
    {
        let bytes = codec::encode(entries, self.key_hashes)
            .map_err(|e| PrefError::codec_at(&self.path, e))?;
        // Anything larger would be refused by the next load
        if bytes.len() as u64 > self.max_file_size {
            return Err(PrefError::Oversized {
                component: "preference file",
                size: bytes.len() as u64,
                max: self.max_file_size,
            });
        }

        if let Err(e) = self.replace_with(&bytes) {
            if let Err(cleanup) = fs::remove_file(&self.tmp_path) {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.tmp_path.display(), error = %cleanup, "failed to remove temp file");
                }
            }
            return Err(e);
        }

        debug!(path = %self.path.display(), bytes = bytes.len(), "saved preferences");
        Ok(())
    }

    fn replace_with(&self, bytes: &[u8]) -> PrefResult<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf);

        if let Some(parent) = &parent {
            fs::create_dir_all(parent)
                .map_err(|e| PrefError::io_at(parent, &e, "failed to create preference directory"))?;
        }

        {
            let mut tmp = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.tmp_path)
                .map_err(|e| PrefError::io_at(&self.tmp_path, &e, "failed to create temp file"))?;

            tmp.write_all(bytes)
                .map_err(|e| PrefError::io_at(&self.tmp_path, &e, "failed to write temp file"))?;

            if self.durable {
                durable_sync(&tmp)
                    .map_err(|e| PrefError::io_at(&self.tmp_path, &e, "failed to sync temp file"))?;
            }
        }

        fs::rename(&self.tmp_path, &self.path)
            .map_err(|e| PrefError::io_at(&self.path, &e, "failed to rename temp file into place"))?;

        if self.durable {
            if let Some(parent) = &parent {
                sync_dir(parent)
                    .map_err(|e| PrefError::io_at(parent, &e, "failed to sync preference directory"))?;
            }
        }
        Ok(())
    }
}
