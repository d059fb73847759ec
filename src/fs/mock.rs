// src/fs/mock.rs

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use anyhow::{anyhow, Result};

use super::{FileMeta, FileSystem};

#[derive(Debug, Clone)]
pub enum MockEntry {
    File {
        content: Vec<u8>,
        created: SystemTime,
        modified: SystemTime,
    },
    Dir,
}

#[derive(Debug, Default)]
struct MockState {
    entries: BTreeMap<PathBuf, MockEntry>,
    /// Paths that fail the exclusive-open probe.
    locked: HashSet<PathBuf>,
    /// Directories whose listing fails.
    unreadable: HashSet<PathBuf>,
    /// Pending rename failures per source path, consumed one per attempt.
    rename_failures: HashMap<PathBuf, Vec<io::ErrorKind>>,
    lock_checks: HashMap<PathBuf, usize>,
    rename_attempts: HashMap<PathBuf, usize>,
}

/// In-memory filesystem with programmable lock and rename failures.
///
/// Cloning shares the underlying state, so a test can keep a handle while the
/// controller owns another.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    state: Arc<Mutex<MockState>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let now = SystemTime::now();
        self.add_file_with_times(path, content, now, now);
    }

    pub fn add_file_with_times(
        &self,
        path: impl AsRef<Path>,
        content: impl Into<Vec<u8>>,
        created: SystemTime,
        modified: SystemTime,
    ) {
        let path = path.as_ref().to_path_buf();
        let mut state = self.state();
        ensure_parents(&mut state.entries, &path);
        state.entries.insert(
            path,
            MockEntry::File {
                content: content.into(),
                created,
                modified,
            },
        );
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        let mut state = self.state();
        ensure_parents(&mut state.entries, &path);
        state.entries.insert(path, MockEntry::Dir);
    }

    /// Remove a file or directory (and everything below it).
    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut state = self.state();
        state.entries.retain(|p, _| !p.starts_with(path));
    }

    pub fn lock(&self, path: impl AsRef<Path>) {
        self.state().locked.insert(path.as_ref().to_path_buf());
    }

    pub fn unlock(&self, path: impl AsRef<Path>) {
        self.state().locked.remove(path.as_ref());
    }

    pub fn make_unreadable(&self, dir: impl AsRef<Path>) {
        self.state().unreadable.insert(dir.as_ref().to_path_buf());
    }

    /// The next `kinds.len()` renames of `path` fail with the given kinds,
    /// in order.
    pub fn fail_renames(&self, path: impl AsRef<Path>, kinds: Vec<io::ErrorKind>) {
        let mut kinds = kinds;
        kinds.reverse();
        self.state()
            .rename_failures
            .insert(path.as_ref().to_path_buf(), kinds);
    }

    pub fn lock_checks(&self, path: impl AsRef<Path>) -> usize {
        self.state()
            .lock_checks
            .get(path.as_ref())
            .copied()
            .unwrap_or(0)
    }

    pub fn rename_attempts(&self, path: impl AsRef<Path>) -> usize {
        self.state()
            .rename_attempts
            .get(path.as_ref())
            .copied()
            .unwrap_or(0)
    }
}

fn ensure_parents(entries: &mut BTreeMap<PathBuf, MockEntry>, path: &Path) {
    let mut parent = path.parent();
    while let Some(dir) = parent {
        if dir.as_os_str().is_empty() {
            break;
        }
        entries.entry(dir.to_path_buf()).or_insert(MockEntry::Dir);
        parent = dir.parent();
    }
}

impl FileSystem for MockFileSystem {
    fn exists(&self, path: &Path) -> bool {
        self.state().entries.contains_key(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        matches!(self.state().entries.get(path), Some(MockEntry::File { .. }))
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.state().entries.get(path), Some(MockEntry::Dir))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let state = self.state();
        if state.unreadable.contains(path) {
            return Err(anyhow!("permission denied: {:?}", path));
        }
        match state.entries.get(path) {
            Some(MockEntry::Dir) => Ok(state
                .entries
                .keys()
                .filter(|p| p.parent() == Some(path))
                .cloned()
                .collect()),
            _ => Err(anyhow!("Not a directory or not found: {:?}", path)),
        }
    }

    fn metadata(&self, path: &Path) -> Result<FileMeta> {
        match self.state().entries.get(path) {
            Some(MockEntry::File {
                content,
                created,
                modified,
            }) => Ok(FileMeta {
                is_dir: false,
                len: content.len() as u64,
                created: Some(*created),
                modified: Some(*modified),
            }),
            Some(MockEntry::Dir) => Ok(FileMeta {
                is_dir: true,
                len: 0,
                created: None,
                modified: None,
            }),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        match self.state().entries.get(path) {
            Some(MockEntry::File { content, .. }) => Ok(content.clone()),
            Some(MockEntry::Dir) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut state = self.state();
        *state.rename_attempts.entry(from.to_path_buf()).or_default() += 1;

        if let Some(kind) = state.rename_failures.get_mut(from).and_then(|k| k.pop()) {
            return Err(io::Error::new(kind, format!("injected rename failure for {:?}", from)));
        }

        match state.entries.remove(from) {
            Some(entry) => {
                state.entries.insert(to.to_path_buf(), entry);
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("File not found: {:?}", from),
            )),
        }
    }

    fn try_open_exclusive(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state();
        *state.lock_checks.entry(path.to_path_buf()).or_default() += 1;

        if !matches!(state.entries.get(path), Some(MockEntry::File { .. })) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such file"));
        }
        if state.locked.contains(path) {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "file is locked"));
        }
        Ok(())
    }
}
