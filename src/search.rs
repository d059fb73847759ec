// src/search.rs

//! Recursive, filtered directory walk used for startup and poll scans.
//!
//! The walk never aborts on a bad directory: failures are reported to the
//! [`SearchObserver`] and the remaining siblings are still visited.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use regex::bytes::Regex;
use tracing::{debug, trace};

use crate::fs::FileSystem;

/// A file found by the searcher, with the timestamps the poll scan needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub path: PathBuf,
    pub created: Option<SystemTime>,
    pub modified: Option<SystemTime>,
}

/// Progress and error callbacks for a walk.
pub trait SearchObserver {
    /// Called once per directory, before its files are listed.
    fn directory_entered(&mut self, _dir: &Path) {}

    /// Called when a directory (or one of its entries) cannot be read.
    fn directory_failed(&mut self, _dir: &Path, _error: &anyhow::Error) {}

    /// Polled between directories; returning true ends the walk early.
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl SearchObserver for () {}

pub struct DirectorySearcher<'a> {
    fs: &'a dyn FileSystem,
}

impl<'a> DirectorySearcher<'a> {
    pub fn new(fs: &'a dyn FileSystem) -> Self {
        Self { fs }
    }

    /// Walk `root`, returning every file whose *name* matches `name_regex`
    /// (all files when `None`).
    ///
    /// Files of a directory are listed before its subdirectories are entered.
    pub fn search(
        &self,
        root: &Path,
        recursive: bool,
        name_regex: Option<&Regex>,
        observer: &mut dyn SearchObserver,
    ) -> Vec<FileRef> {
        let mut found = Vec::new();
        self.walk(root, recursive, name_regex, observer, &mut found);
        debug!(root = ?root, files = found.len(), "directory search finished");
        found
    }

    fn walk(
        &self,
        dir: &Path,
        recursive: bool,
        name_regex: Option<&Regex>,
        observer: &mut dyn SearchObserver,
        found: &mut Vec<FileRef>,
    ) {
        if observer.is_cancelled() {
            return;
        }
        observer.directory_entered(dir);

        let mut entries = match self.fs.read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                observer.directory_failed(dir, &err);
                return;
            }
        };
        entries.sort();

        let mut subdirs = Vec::new();
        for entry in entries {
            let meta = match self.fs.metadata(&entry) {
                Ok(meta) => meta,
                Err(err) => {
                    // Entry vanished or is unreadable; keep going.
                    trace!(path = ?entry, error = %err, "skipping unreadable entry");
                    continue;
                }
            };

            if meta.is_dir {
                subdirs.push(entry);
                continue;
            }

            let name_matches = match (name_regex, entry.file_name()) {
                (None, _) => true,
                (Some(re), Some(name)) => re.is_match(name.as_encoded_bytes()),
                (Some(_), None) => false,
            };
            if name_matches {
                found.push(FileRef {
                    path: entry,
                    created: meta.created,
                    modified: meta.modified,
                });
            }
        }

        if !recursive {
            return;
        }
        for sub in subdirs {
            self.walk(&sub, recursive, name_regex, observer, found);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;

    #[derive(Default)]
    struct Recorder {
        entered: Vec<PathBuf>,
        failed: Vec<PathBuf>,
    }

    impl SearchObserver for Recorder {
        fn directory_entered(&mut self, dir: &Path) {
            self.entered.push(dir.to_path_buf());
        }
        fn directory_failed(&mut self, dir: &Path, _error: &anyhow::Error) {
            self.failed.push(dir.to_path_buf());
        }
    }

    fn tree() -> MockFileSystem {
        let fs = MockFileSystem::new();
        fs.add_file("/w/top.csv", "1");
        fs.add_file("/w/top.txt", "2");
        fs.add_file("/w/a/inner.csv", "3");
        fs.add_file("/w/b/deep/leaf.csv", "4");
        fs
    }

    fn paths(found: &[FileRef]) -> Vec<&str> {
        found.iter().map(|f| f.path.to_str().unwrap()).collect()
    }

    #[test]
    fn non_recursive_lists_only_top_level_files() {
        let fs = tree();
        let found = DirectorySearcher::new(&fs).search(Path::new("/w"), false, None, &mut ());
        assert_eq!(paths(&found), vec!["/w/top.csv", "/w/top.txt"]);
    }

    #[test]
    fn files_come_before_subdirectories_and_regex_uses_file_name() {
        let fs = tree();
        let re = Regex::new(r"\.csv$").unwrap();
        let found =
            DirectorySearcher::new(&fs).search(Path::new("/w"), true, Some(&re), &mut ());
        assert_eq!(
            paths(&found),
            vec!["/w/top.csv", "/w/a/inner.csv", "/w/b/deep/leaf.csv"]
        );
    }

    #[test]
    fn failing_subdirectory_does_not_stop_the_walk() {
        let fs = tree();
        fs.make_unreadable("/w/a");
        let mut rec = Recorder::default();

        let found = DirectorySearcher::new(&fs).search(Path::new("/w"), true, None, &mut rec);

        assert_eq!(rec.failed, vec![PathBuf::from("/w/a")]);
        assert!(paths(&found).contains(&"/w/b/deep/leaf.csv"));
        assert_eq!(
            rec.entered,
            vec![
                PathBuf::from("/w"),
                PathBuf::from("/w/a"),
                PathBuf::from("/w/b"),
                PathBuf::from("/w/b/deep"),
            ]
        );
    }

    #[test]
    fn missing_root_reports_error_and_returns_nothing() {
        let fs = MockFileSystem::new();
        let mut rec = Recorder::default();
        let found =
            DirectorySearcher::new(&fs).search(Path::new("/nope"), true, None, &mut rec);
        assert!(found.is_empty());
        assert_eq!(rec.failed.len(), 1);
    }
}
