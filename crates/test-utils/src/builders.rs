#![allow(dead_code)]

use std::path::Path;

use dirwatch::config::{
    ControllerOptions, RawAction, RawDaemonConfig, RawPathFilters, RawPolicy, RawRecovery,
    WatcherConfig, WindowStyle,
};
use dirwatch::types::ChangeKind;

/// Builder for `WatcherConfig` to simplify test setup.
///
/// Goes through the same raw form a TOML file produces, so every built
/// config has passed validation.
pub struct WatcherConfigBuilder {
    name: String,
    raw: RawDaemonConfig,
}

impl WatcherConfigBuilder {
    /// A daemon watching `path` whose action runs `/bin/true`.
    pub fn new(name: &str, path: impl AsRef<Path>) -> Self {
        Self {
            name: name.to_string(),
            raw: RawDaemonConfig {
                path: path.as_ref().to_path_buf(),
                filter: "*".to_string(),
                recursive: false,
                events: vec![
                    ChangeKind::Created,
                    ChangeKind::Changed,
                    ChangeKind::Deleted,
                    ChangeKind::Renamed,
                ],
                generate_events_at_startup: false,
                dedup_window: None,
                path_filters: RawPathFilters::default(),
                recovery: RawRecovery::default(),
                action: process_action("/bin/true", ""),
                policy: RawPolicy::default(),
            },
        }
    }

    pub fn filter(mut self, glob: &str) -> Self {
        self.raw.filter = glob.to_string();
        self
    }

    pub fn recursive(mut self) -> Self {
        self.raw.recursive = true;
        self
    }

    pub fn events(mut self, kinds: &[ChangeKind]) -> Self {
        self.raw.events = kinds.to_vec();
        self
    }

    pub fn startup_scan(mut self) -> Self {
        self.raw.generate_events_at_startup = true;
        self
    }

    pub fn dedup_window(mut self, window: &str) -> Self {
        self.raw.dedup_window = Some(window.to_string());
        self
    }

    pub fn recovery(mut self, edit: impl FnOnce(&mut RawRecovery)) -> Self {
        edit(&mut self.raw.recovery);
        self
    }

    pub fn policy(mut self, edit: impl FnOnce(&mut RawPolicy)) -> Self {
        edit(&mut self.raw.policy);
        self
    }

    pub fn batch_size(self, n: usize) -> Self {
        self.policy(|p| p.batch_size = n)
    }

    pub fn must_exist(self) -> Self {
        self.policy(|p| p.must_exist = true)
    }

    pub fn process(mut self, program: &str, arguments: &str) -> Self {
        self.raw.action = process_action(program, arguments);
        self
    }

    /// Edit the process action in place; no-op for sink actions.
    pub fn process_options(mut self, edit: impl FnOnce(&mut ProcessOptions)) -> Self {
        if let RawAction::Process {
            shell,
            redirect_stdout,
            redirect_stderr,
            wait_for_exit,
            max_wait,
            ..
        } = &mut self.raw.action
        {
            let mut opts = ProcessOptions {
                shell: *shell,
                redirect_stdout: *redirect_stdout,
                redirect_stderr: *redirect_stderr,
                wait_for_exit: *wait_for_exit,
                max_wait: max_wait.clone(),
            };
            edit(&mut opts);
            *shell = opts.shell;
            *redirect_stdout = opts.redirect_stdout;
            *redirect_stderr = opts.redirect_stderr;
            *wait_for_exit = opts.wait_for_exit;
            *max_wait = opts.max_wait;
        }
        self
    }

    pub fn sink(mut self, endpoint: &str, stream_content: bool) -> Self {
        self.raw.action = RawAction::Sink {
            endpoint: endpoint.to_string(),
            stream_content,
        };
        self
    }

    pub fn raw(self) -> RawDaemonConfig {
        self.raw
    }

    pub fn build(self) -> WatcherConfig {
        WatcherConfig::from_raw(self.name, self.raw)
            .expect("Failed to build valid daemon config from builder")
    }
}

/// The process action knobs tests commonly flip.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub shell: bool,
    pub redirect_stdout: bool,
    pub redirect_stderr: bool,
    pub wait_for_exit: bool,
    pub max_wait: Option<String>,
}

fn process_action(program: &str, arguments: &str) -> RawAction {
    RawAction::Process {
        program: program.to_string(),
        arguments: arguments.to_string(),
        working_dir: None,
        shell: false,
        window: WindowStyle::Normal,
        redirect_stdout: false,
        redirect_stderr: false,
        wait_for_exit: false,
        max_wait: None,
        run_as: None,
    }
}

/// Controller options with a short idle sleep so tests settle quickly.
pub fn fast_options() -> ControllerOptions {
    ControllerOptions {
        idle_sleep: std::time::Duration::from_millis(5),
        ..ControllerOptions::default()
    }
}
