// src/config/model.rs

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::types::{ChangeKind, DaemonName};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [controller]
/// synchronized_execution = false
/// run_queued_on_stop = true
///
/// [daemon.inbox]
/// path = "/srv/inbox"
/// filter = "*.csv"
///
/// [daemon.inbox.action]
/// type = "process"
/// program = "/usr/local/bin/import"
/// arguments = "--file {file}"
/// ```
///
/// This is the unvalidated form. Use [`ConfigFile::try_from`] (or
/// [`crate::config::load_and_validate`]) to obtain a [`ConfigFile`].
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub controller: RawControllerSection,

    /// All daemons from `[daemon.<name>]`, keyed by daemon name.
    #[serde(default)]
    pub daemon: BTreeMap<String, RawDaemonConfig>,
}

/// `[controller]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RawControllerSection {
    /// Only one action in flight across all daemons at a time.
    #[serde(default)]
    pub synchronized_execution: bool,

    /// Whether a stop waits for queued work to be dispatched and finished.
    #[serde(default = "default_true")]
    pub run_queued_on_stop: bool,

    /// Upper bound on the queue length when re-enqueueing locked files.
    /// `0` means unlimited.
    #[serde(default)]
    pub queue_limit: usize,

    /// Sleep used when every outstanding task is waiting on something.
    #[serde(default = "default_idle_sleep")]
    pub idle_sleep: String,
}

impl Default for RawControllerSection {
    fn default() -> Self {
        Self {
            synchronized_execution: false,
            run_queued_on_stop: true,
            queue_limit: 0,
            idle_sleep: default_idle_sleep(),
        }
    }
}

/// `[daemon.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RawDaemonConfig {
    pub path: PathBuf,

    /// Glob matched against the file name only (not the full path).
    #[serde(default = "default_filter")]
    pub filter: String,

    #[serde(default)]
    pub recursive: bool,

    /// Change kinds this daemon subscribes to.
    #[serde(default = "default_events")]
    pub events: Vec<ChangeKind>,

    #[serde(default)]
    pub generate_events_at_startup: bool,

    /// Duplicate suppression window. Absent disables filtering.
    #[serde(default)]
    pub dedup_window: Option<String>,

    #[serde(default)]
    pub path_filters: RawPathFilters,

    #[serde(default)]
    pub recovery: RawRecovery,

    pub action: RawAction,

    #[serde(default)]
    pub policy: RawPolicy,
}

/// `[daemon.<name>.path_filters]`: one regex per change kind, matched
/// against the full path.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawPathFilters {
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub changed: Option<String>,
    #[serde(default)]
    pub deleted: Option<String>,
    #[serde(default)]
    pub renamed: Option<String>,
}

/// `[daemon.<name>.recovery]`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRecovery {
    #[serde(default = "default_tick")]
    pub tick: String,
    #[serde(default)]
    pub recycle: bool,
    #[serde(default)]
    pub recycle_interval: Option<String>,
    #[serde(default)]
    pub poll: bool,
    #[serde(default = "default_poll_ticks")]
    pub poll_ticks: u32,
}

impl Default for RawRecovery {
    fn default() -> Self {
        Self {
            tick: default_tick(),
            recycle: false,
            recycle_interval: None,
            poll: false,
            poll_ticks: default_poll_ticks(),
        }
    }
}

/// `[daemon.<name>.action]`, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RawAction {
    Process {
        program: String,
        #[serde(default)]
        arguments: String,
        #[serde(default)]
        working_dir: Option<PathBuf>,
        #[serde(default)]
        shell: bool,
        #[serde(default)]
        window: WindowStyle,
        #[serde(default)]
        redirect_stdout: bool,
        #[serde(default)]
        redirect_stderr: bool,
        #[serde(default)]
        wait_for_exit: bool,
        #[serde(default)]
        max_wait: Option<String>,
        #[serde(default)]
        run_as: Option<Credentials>,
    },
    Sink {
        endpoint: String,
        #[serde(default)]
        stream_content: bool,
    },
}

/// `[daemon.<name>.policy]`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPolicy {
    #[serde(default = "default_zero_duration")]
    pub delay: String,
    #[serde(default)]
    pub must_exist: bool,
    #[serde(default)]
    pub lock_check: bool,
    #[serde(default = "default_zero_duration")]
    pub lock_grace: String,
    #[serde(default)]
    pub max_lock_retries: u32,
    #[serde(default)]
    pub rename_before_run: bool,
    #[serde(default = "default_max_rename_retries")]
    pub max_rename_retries: u32,
    #[serde(default)]
    pub batch_size: usize,
}

impl Default for RawPolicy {
    fn default() -> Self {
        Self {
            delay: default_zero_duration(),
            must_exist: false,
            lock_check: false,
            lock_grace: default_zero_duration(),
            max_lock_retries: 0,
            rename_before_run: false,
            max_rename_retries: default_max_rename_retries(),
            batch_size: 0,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_idle_sleep() -> String {
    "20ms".to_string()
}

fn default_filter() -> String {
    "*".to_string()
}

fn default_events() -> Vec<ChangeKind> {
    vec![ChangeKind::Created, ChangeKind::Changed, ChangeKind::Deleted, ChangeKind::Renamed]
}

fn default_tick() -> String {
    "1s".to_string()
}

fn default_poll_ticks() -> u32 {
    60
}

fn default_zero_duration() -> String {
    "0ms".to_string()
}

fn default_max_rename_retries() -> u32 {
    3
}

// ---------------------------------------------------------------------------
// Validated model
// ---------------------------------------------------------------------------

/// Validated configuration file.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub controller: ControllerOptions,
    pub daemons: Vec<WatcherConfig>,
}

/// Controller-wide dispatch options.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub synchronized_execution: bool,
    pub run_queued_on_stop: bool,
    pub queue_limit: usize,
    pub idle_sleep: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            synchronized_execution: false,
            run_queued_on_stop: true,
            queue_limit: 0,
            idle_sleep: Duration::from_millis(20),
        }
    }
}

/// Immutable configuration of one daemon (a watcher plus its action).
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub name: DaemonName,
    pub path: PathBuf,
    pub name_filter: NameFilter,
    pub recursive: bool,
    pub subscriptions: Subscriptions,
    pub path_filters: PathFilters,
    /// `Some(window)` enables duplicate filtering.
    pub dedup_window: Option<Duration>,
    pub generate_events_at_startup: bool,
    pub recovery: RecoverySettings,
    pub action: ActionConfig,
    pub policy: DispatchPolicy,
}

/// File-name filter compiled from a glob.
///
/// Stored as a byte regex so that non UTF-8 file names can still be matched.
#[derive(Debug, Clone)]
pub struct NameFilter {
    pattern: String,
    regex: regex::bytes::Regex,
}

impl NameFilter {
    pub(crate) fn new(pattern: String, regex: regex::bytes::Regex) -> Self {
        Self { pattern, regex }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn regex(&self) -> &regex::bytes::Regex {
        &self.regex
    }

    pub fn is_match(&self, file_name: &OsStr) -> bool {
        self.regex.is_match(file_name.as_encoded_bytes())
    }

    /// Match the final component of `path`. Paths without one never match.
    pub fn matches_path(&self, path: &Path) -> bool {
        path.file_name().is_some_and(|n| self.is_match(n))
    }
}

/// Per-kind subscription flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Subscriptions {
    pub created: bool,
    pub changed: bool,
    pub deleted: bool,
    pub renamed: bool,
}

impl Subscriptions {
    pub fn all() -> Self {
        Self {
            created: true,
            changed: true,
            deleted: true,
            renamed: true,
        }
    }

    pub fn from_kinds(kinds: &[ChangeKind]) -> Self {
        let mut subs = Self::default();
        for kind in kinds {
            match kind {
                ChangeKind::Created => subs.created = true,
                ChangeKind::Changed => subs.changed = true,
                ChangeKind::Deleted => subs.deleted = true,
                ChangeKind::Renamed => subs.renamed = true,
                ChangeKind::SystemGenerated => {}
            }
        }
        subs
    }

    pub fn accepts(&self, kind: ChangeKind) -> bool {
        match kind {
            ChangeKind::Created => self.created,
            ChangeKind::Changed => self.changed,
            ChangeKind::Deleted => self.deleted,
            ChangeKind::Renamed => self.renamed,
            ChangeKind::SystemGenerated => true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.created || self.changed || self.deleted || self.renamed)
    }
}

/// Optional full-path regex per change kind.
#[derive(Debug, Clone, Default)]
pub struct PathFilters {
    pub created: Option<Regex>,
    pub changed: Option<Regex>,
    pub deleted: Option<Regex>,
    pub renamed: Option<Regex>,
}

impl PathFilters {
    pub fn for_kind(&self, kind: ChangeKind) -> Option<&Regex> {
        match kind {
            ChangeKind::Created => self.created.as_ref(),
            ChangeKind::Changed => self.changed.as_ref(),
            ChangeKind::Deleted => self.deleted.as_ref(),
            ChangeKind::Renamed => self.renamed.as_ref(),
            ChangeKind::SystemGenerated => None,
        }
    }

    /// True when `path` passes the filter for `kind` (no filter = pass).
    pub fn accepts(&self, kind: ChangeKind, path: &Path) -> bool {
        match self.for_kind(kind) {
            Some(re) => re.is_match(&path.to_string_lossy()),
            None => true,
        }
    }
}

/// Recycle and polling settings for the recovery loop.
#[derive(Debug, Clone)]
pub struct RecoverySettings {
    pub tick: Duration,
    pub recycle: bool,
    pub recycle_interval: Option<Duration>,
    pub poll: bool,
    pub poll_ticks: u32,
}

impl RecoverySettings {
    pub fn recycling_enabled(&self) -> bool {
        self.recycle || self.recycle_interval.is_some()
    }

    /// The recovery loop only runs when it has something to do.
    pub fn is_active(&self) -> bool {
        self.recycling_enabled() || self.poll
    }
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            recycle: false,
            recycle_interval: None,
            poll: false,
            poll_ticks: default_poll_ticks(),
        }
    }
}

/// What to do with a change once it survives the dispatch pipeline.
#[derive(Debug, Clone)]
pub enum ActionConfig {
    Process(ProcessAction),
    Sink(SinkAction),
}

impl ActionConfig {
    /// Whether the dispatch worker waits for this action before continuing.
    pub fn waits_for_exit(&self) -> bool {
        matches!(self, ActionConfig::Process(p) if p.wait_for_exit)
    }

    /// Upper bound on that wait; `None` waits for as long as it takes.
    pub fn max_wait(&self) -> Option<Duration> {
        match self {
            ActionConfig::Process(p) => p.max_wait,
            ActionConfig::Sink(_) => None,
        }
    }
}

/// Process-spawn surface, passed through to the OS unchanged.
#[derive(Debug, Clone)]
pub struct ProcessAction {
    pub program: String,
    /// Argument template containing escape tokens such as `{file}`.
    pub arguments: String,
    pub working_dir: Option<PathBuf>,
    /// Run through the platform shell (`sh -c` / `cmd /C`).
    pub shell: bool,
    pub window: WindowStyle,
    pub redirect_stdout: bool,
    pub redirect_stderr: bool,
    pub wait_for_exit: bool,
    pub max_wait: Option<Duration>,
    pub run_as: Option<Credentials>,
}

impl ProcessAction {
    pub fn new(program: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            arguments: arguments.into(),
            working_dir: None,
            shell: false,
            window: WindowStyle::default(),
            redirect_stdout: false,
            redirect_stderr: false,
            wait_for_exit: false,
            max_wait: None,
            run_as: None,
        }
    }
}

/// Remote action sink target.
#[derive(Debug, Clone)]
pub struct SinkAction {
    pub endpoint: String,
    /// Stream the file bytes together with the notification.
    pub stream_content: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowStyle {
    #[default]
    Normal,
    Hidden,
    Minimized,
    Maximized,
}

/// Identity a child process is started under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default)]
    pub gid: Option<u32>,
}

/// Per-daemon dispatch policy.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub delay: Duration,
    pub must_exist: bool,
    pub lock_check: bool,
    /// A file written more recently than this is treated as still locked.
    pub lock_grace: Duration,
    /// `0` means unlimited.
    pub max_lock_retries: u32,
    pub rename_before_run: bool,
    pub max_rename_retries: u32,
    /// Maximum concurrent actions for this daemon; `0` means unlimited.
    pub batch_size: usize,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            must_exist: false,
            lock_check: false,
            lock_grace: Duration::ZERO,
            max_lock_retries: 0,
            rename_before_run: false,
            max_rename_retries: default_max_rename_retries(),
            batch_size: 0,
        }
    }
}
