// src/fs/mod.rs

use std::fmt::Debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};

pub mod mock;

pub use mock::MockFileSystem;

/// The subset of file metadata the searcher and dispatch pipeline look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub is_dir: bool,
    pub len: u64,
    /// Not every platform/filesystem reports creation time.
    pub created: Option<SystemTime>,
    pub modified: Option<SystemTime>,
}

/// Abstract filesystem interface.
///
/// `rename` and `try_open_exclusive` return raw `io::Result`s because the
/// dispatch pipeline classifies failures by `io::ErrorKind`.
pub trait FileSystem: Send + Sync + Debug {
    fn exists(&self, path: &Path) -> bool;
    fn is_file(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;

    /// Return a list of entries in a directory.
    /// Returns full paths.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;

    fn metadata(&self, path: &Path) -> Result<FileMeta>;
    fn read(&self, path: &Path) -> Result<Vec<u8>>;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Succeeds when the file can be opened for reading and exclusively
    /// locked right now. The lock is released before returning.
    fn try_open_exclusive(&self, path: &Path) -> io::Result<()>;
}

/// Implementation that uses `std::fs`.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path).with_context(|| format!("reading dir {:?}", path))? {
            let entry = entry.with_context(|| format!("reading entry of {:?}", path))?;
            entries.push(entry.path());
        }
        Ok(entries)
    }

    fn metadata(&self, path: &Path) -> Result<FileMeta> {
        let md = fs::metadata(path).with_context(|| format!("reading metadata of {:?}", path))?;
        Ok(FileMeta {
            is_dir: md.is_dir(),
            len: md.len(),
            created: md.created().ok(),
            modified: md.modified().ok(),
        })
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).with_context(|| format!("reading file {:?}", path))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn try_open_exclusive(&self, path: &Path) -> io::Result<()> {
        let file = fs::OpenOptions::new().read(true).open(path)?;
        fs2::FileExt::try_lock_exclusive(&file)?;
        // Dropping the handle releases the lock.
        Ok(())
    }
}
