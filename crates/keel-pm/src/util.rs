//! Filesystem helpers shared by the pins store and configuration.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};

/// Write `contents` to `path` atomically: the bytes land in a temporary
/// file in the same directory and are renamed into place, so a crashed
/// write never leaves a half-written file behind.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} has no parent directory", path.display()),
        ))
    })?;
    fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// An exclusive advisory lock on a directory, held for the duration of a
/// load-mutate-save window on a file inside it.
///
/// The lock is a marker file created with `create_new`; dropping the guard
/// removes it.
#[derive(Debug)]
pub struct DirectoryLock {
    lock_path: PathBuf,
}

impl DirectoryLock {
    const RETRIES: u32 = 50;
    const RETRY_DELAY: Duration = Duration::from_millis(100);

    /// Acquire the lock for `dir`, retrying for a few seconds if another
    /// owner holds it.
    pub fn acquire(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let lock_path = dir.join(".keel.lock");

        for attempt in 0..Self::RETRIES {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut file) => {
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(Self { lock_path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if attempt + 1 < Self::RETRIES {
                        thread::sleep(Self::RETRY_DELAY);
                    }
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }

        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::WouldBlock,
            format!("could not acquire lock on {}", dir.display()),
        )))
    }
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_and_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.json");

        atomic_write(&path, b"first").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"first");

        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn test_directory_lock_excludes_second_owner() {
        let dir = TempDir::new().unwrap();

        let lock = DirectoryLock::acquire(dir.path()).unwrap();
        assert!(dir.path().join(".keel.lock").exists());

        drop(lock);
        assert!(!dir.path().join(".keel.lock").exists());

        // Re-acquirable after release
        let _lock = DirectoryLock::acquire(dir.path()).unwrap();
    }
}
