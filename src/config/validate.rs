// src/config/validate.rs

use std::time::Duration;

use globset::GlobBuilder;
use regex::Regex;

use crate::config::duration::parse_duration;
use crate::config::model::{
    ActionConfig, ConfigFile, ControllerOptions, DispatchPolicy, NameFilter, PathFilters,
    ProcessAction, RawAction, RawConfigFile, RawControllerSection, RawDaemonConfig,
    RawPathFilters, RawPolicy, RawRecovery, RecoverySettings, SinkAction, Subscriptions,
    WatcherConfig,
};
use crate::errors::{DirwatchError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = DirwatchError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let controller = ControllerOptions::try_from(raw.controller)?;

        let mut daemons = Vec::with_capacity(raw.daemon.len());
        for (name, daemon) in raw.daemon {
            daemons.push(WatcherConfig::from_raw(name, daemon)?);
        }

        Ok(ConfigFile {
            controller,
            daemons,
        })
    }
}

impl TryFrom<RawControllerSection> for ControllerOptions {
    type Error = DirwatchError;

    fn try_from(raw: RawControllerSection) -> std::result::Result<Self, Self::Error> {
        let idle_sleep = duration_field("[controller].idle_sleep", &raw.idle_sleep)?;
        if idle_sleep.is_zero() {
            return Err(DirwatchError::config(
                "[controller].idle_sleep must be greater than zero",
            ));
        }

        Ok(ControllerOptions {
            synchronized_execution: raw.synchronized_execution,
            run_queued_on_stop: raw.run_queued_on_stop,
            queue_limit: raw.queue_limit,
            idle_sleep,
        })
    }
}

impl WatcherConfig {
    /// Validate a raw `[daemon.<name>]` section and compile its filters.
    ///
    /// This is the only place configuration errors are raised; once a
    /// `WatcherConfig` exists it is known to be usable.
    pub fn from_raw(name: impl Into<String>, raw: RawDaemonConfig) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DirwatchError::config("daemon name must not be empty"));
        }
        if raw.path.as_os_str().is_empty() {
            return Err(DirwatchError::config(format!(
                "daemon '{name}' has an empty `path`"
            )));
        }

        let subscriptions = Subscriptions::from_kinds(&raw.events);
        if subscriptions.is_empty() {
            return Err(DirwatchError::config(format!(
                "daemon '{name}' must subscribe to at least one of created, changed, deleted, renamed"
            )));
        }

        let name_filter = compile_name_filter(&name, &raw.filter)?;
        let path_filters = compile_path_filters(&name, raw.path_filters)?;

        let dedup_window = raw
            .dedup_window
            .as_deref()
            .map(|s| duration_field(&format!("daemon '{name}' dedup_window"), s))
            .transpose()?;

        let recovery = compile_recovery(&name, raw.recovery)?;
        let action = compile_action(&name, raw.action)?;
        let policy = compile_policy(&name, raw.policy)?;

        Ok(WatcherConfig {
            name,
            path: raw.path,
            name_filter,
            recursive: raw.recursive,
            subscriptions,
            path_filters,
            dedup_window,
            generate_events_at_startup: raw.generate_events_at_startup,
            recovery,
            action,
            policy,
        })
    }
}

impl ActionConfig {
    /// Reject action settings the OS cannot honour together.
    pub fn validate(&self, daemon: &str) -> Result<()> {
        match self {
            ActionConfig::Process(p) => p.validate(daemon),
            ActionConfig::Sink(s) => {
                if s.endpoint.trim().is_empty() {
                    return Err(DirwatchError::config(format!(
                        "daemon '{daemon}': sink action requires a non-empty `endpoint`"
                    )));
                }
                Ok(())
            }
        }
    }
}

impl ProcessAction {
    /// Shell execution cannot be combined with stream redirection or with
    /// explicit credentials.
    pub fn validate(&self, daemon: &str) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(DirwatchError::config(format!(
                "daemon '{daemon}': process action requires a non-empty `program`"
            )));
        }
        if self.shell && (self.redirect_stdout || self.redirect_stderr) {
            return Err(DirwatchError::config(format!(
                "daemon '{daemon}': `shell = true` cannot be combined with output redirection"
            )));
        }
        if self.shell && self.run_as.is_some() {
            return Err(DirwatchError::config(format!(
                "daemon '{daemon}': `shell = true` cannot be combined with `run_as` credentials"
            )));
        }
        Ok(())
    }
}

fn duration_field(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value).map_err(|e| DirwatchError::config(format!("{field}: {e}")))
}

fn compile_name_filter(daemon: &str, pattern: &str) -> Result<NameFilter> {
    let pattern = if pattern.trim().is_empty() { "*" } else { pattern };

    let glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .case_insensitive(cfg!(windows))
        .build()
        .map_err(|e| {
            DirwatchError::config(format!(
                "daemon '{daemon}': invalid filter glob '{pattern}': {e}"
            ))
        })?;

    let regex = regex::bytes::Regex::new(glob.regex()).map_err(|e| {
        DirwatchError::config(format!(
            "daemon '{daemon}': filter glob '{pattern}' does not compile: {e}"
        ))
    })?;

    Ok(NameFilter::new(pattern.to_string(), regex))
}

fn compile_path_filters(daemon: &str, raw: RawPathFilters) -> Result<PathFilters> {
    let compile = |kind: &str, src: Option<String>| -> Result<Option<Regex>> {
        match src {
            None => Ok(None),
            Some(src) => Regex::new(&src).map(Some).map_err(|e| {
                DirwatchError::config(format!(
                    "daemon '{daemon}': invalid {kind} path filter '{src}': {e}"
                ))
            }),
        }
    };

    Ok(PathFilters {
        created: compile("created", raw.created)?,
        changed: compile("changed", raw.changed)?,
        deleted: compile("deleted", raw.deleted)?,
        renamed: compile("renamed", raw.renamed)?,
    })
}

fn compile_recovery(daemon: &str, raw: RawRecovery) -> Result<RecoverySettings> {
    let tick = duration_field(&format!("daemon '{daemon}' recovery.tick"), &raw.tick)?;
    if tick.is_zero() {
        return Err(DirwatchError::config(format!(
            "daemon '{daemon}': recovery.tick must be greater than zero"
        )));
    }

    let recycle_interval = raw
        .recycle_interval
        .as_deref()
        .map(|s| duration_field(&format!("daemon '{daemon}' recovery.recycle_interval"), s))
        .transpose()?;

    if raw.poll && raw.poll_ticks == 0 {
        return Err(DirwatchError::config(format!(
            "daemon '{daemon}': recovery.poll_ticks must be >= 1 when polling (got 0)"
        )));
    }

    Ok(RecoverySettings {
        tick,
        recycle: raw.recycle,
        recycle_interval,
        poll: raw.poll,
        poll_ticks: raw.poll_ticks,
    })
}

fn compile_action(daemon: &str, raw: RawAction) -> Result<ActionConfig> {
    let action = match raw {
        RawAction::Process {
            program,
            arguments,
            working_dir,
            shell,
            window,
            redirect_stdout,
            redirect_stderr,
            wait_for_exit,
            max_wait,
            run_as,
        } => {
            let max_wait = max_wait
                .as_deref()
                .map(|s| duration_field(&format!("daemon '{daemon}' action.max_wait"), s))
                .transpose()?;

            ActionConfig::Process(ProcessAction {
                program,
                arguments,
                working_dir,
                shell,
                window,
                redirect_stdout,
                redirect_stderr,
                wait_for_exit,
                max_wait,
                run_as,
            })
        }
        RawAction::Sink {
            endpoint,
            stream_content,
        } => ActionConfig::Sink(SinkAction {
            endpoint,
            stream_content,
        }),
    };

    action.validate(daemon)?;
    Ok(action)
}

fn compile_policy(daemon: &str, raw: RawPolicy) -> Result<DispatchPolicy> {
    Ok(DispatchPolicy {
        delay: duration_field(&format!("daemon '{daemon}' policy.delay"), &raw.delay)?,
        must_exist: raw.must_exist,
        lock_check: raw.lock_check,
        lock_grace: duration_field(
            &format!("daemon '{daemon}' policy.lock_grace"),
            &raw.lock_grace,
        )?,
        max_lock_retries: raw.max_lock_retries,
        rename_before_run: raw.rename_before_run,
        max_rename_retries: raw.max_rename_retries,
        batch_size: raw.batch_size,
    })
}
