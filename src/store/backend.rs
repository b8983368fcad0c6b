use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tempfile::NamedTempFile;

use crate::error::PersistenceError;

/// Byte-addressable durable storage holding the serialized snapshot mapping.
pub trait StorageBackend: Send + Sync {
    /// Returns `None` when nothing has been persisted yet.
    fn read_all(&self) -> Result<Option<Vec<u8>>, PersistenceError>;
    /// Replaces the stored bytes as a whole. Readers never observe a partial write.
    fn write_all(&self, bytes: &[u8]) -> Result<(), PersistenceError>;
    fn describe(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Fails only when the path cannot hold a file: it names a directory, or its
    /// parent directory neither exists nor can be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();

        if path.is_dir() {
            return Err(PersistenceError::InvalidPath(format!(
                "{} is a directory",
                path.display()
            )));
        }

        let dir = parent_dir(&path);
        fs::create_dir_all(dir).map_err(|e| {
            PersistenceError::InvalidPath(format!("cannot create {}: {e}", dir.display()))
        })?;

        Ok(Self { path })
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Flushes directory entries so a completed rename survives a power loss.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

impl StorageBackend for FileBackend {
    fn read_all(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::Read(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }

    fn write_all(&self, bytes: &[u8]) -> Result<(), PersistenceError> {
        let write_err = |e: std::io::Error| {
            PersistenceError::Write(format!("{}: {e}", self.path.display()))
        };

        // Same directory as the target so the rename stays on one filesystem.
        let mut tmp = NamedTempFile::new_in(parent_dir(&self.path)).map_err(write_err)?;
        tmp.write_all(bytes).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;
        sync_dir(parent_dir(&self.path)).map_err(write_err)?;

        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Process-local backend. Contents do not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    bytes: Mutex<Option<Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Mutex::new(Some(bytes.into())),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent `write_all` fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn contents(&self) -> Option<Vec<u8>> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StorageBackend for MemoryBackend {
    fn read_all(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.contents())
    }

    fn write_all(&self, bytes: &[u8]) -> Result<(), PersistenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Write("memory backend rejected write".into()));
        }
        *self.bytes.lock().unwrap_or_else(PoisonError::into_inner) = Some(bytes.to_vec());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
