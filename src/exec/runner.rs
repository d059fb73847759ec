// src/exec/runner.rs

//! Launching and supervising one external process per change.

use std::io;
use std::process::Stdio;
use std::time::SystemTime;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::config::{Credentials, ProcessAction, WindowStyle};
use crate::events::{Notification, Notifier};
use crate::exec::backend::ActionError;
use crate::exec::command_line::CommandLine;
use crate::types::{ChangeEvent, DaemonName, ProcessErrorKind};

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Spawns a process for a change and reports its lifecycle.
///
/// The configuration is expected to have been validated with
/// [`ProcessAction::validate`] before the first run.
#[derive(Debug, Clone)]
pub struct ActionRunner {
    notifier: Notifier,
}

impl ActionRunner {
    pub fn new(notifier: Notifier) -> Self {
        Self { notifier }
    }

    /// Run `action` for `event` and resolve when the process has exited and
    /// its redirected output has been drained.
    ///
    /// Launch failures are returned as [`ActionError::Process`]; a non-zero
    /// exit code is not an error and is only reported in `ProcessExited`.
    pub async fn run(&self, action: &ProcessAction, event: &ChangeEvent) -> Result<(), ActionError> {
        let line = CommandLine::build(action, event);
        let rendered = line.display();

        let mut cmd = Command::new(&line.program);
        cmd.args(&line.args).stdin(Stdio::null());
        if let Some(dir) = &action.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdout(if action.redirect_stdout {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stderr(if action.redirect_stderr {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        apply_credentials(&mut cmd, action.run_as)?;
        apply_window(&mut cmd, action.window);

        debug!(daemon = %event.daemon, id = event.id, command = %rendered, "spawning process");
        let mut child = cmd
            .spawn()
            .map_err(|err| launch_error(&err, action.run_as.is_some(), &rendered))?;

        let pid = child.id();
        info!(daemon = %event.daemon, id = event.id, ?pid, command = %rendered, "process started");
        self.notifier.emit(Notification::ProcessStarted {
            daemon: event.daemon.clone(),
            id: event.id,
            pid,
            command_line: rendered.clone(),
            started_at: SystemTime::now(),
        });

        let mut readers: Vec<JoinHandle<()>> = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(self.forward_lines(stdout, event.daemon.clone(), pid, Stream::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(self.forward_lines(stderr, event.daemon.clone(), pid, Stream::Stderr));
        }

        let status = child.wait().await.map_err(|err| ActionError::Process {
            kind: ProcessErrorKind::Other,
            message: format!("waiting for '{rendered}': {err}"),
        })?;
        for reader in readers {
            let _ = reader.await;
        }

        info!(
            daemon = %event.daemon,
            id = event.id,
            ?pid,
            exit_code = ?status.code(),
            success = status.success(),
            "process exited"
        );
        self.notifier.emit(Notification::ProcessExited {
            daemon: event.daemon.clone(),
            id: event.id,
            pid,
            exit_code: status.code(),
            exited_at: SystemTime::now(),
        });
        Ok(())
    }

    fn forward_lines<R>(
        &self,
        reader: R,
        daemon: DaemonName,
        pid: Option<u32>,
        stream: Stream,
    ) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let notification = match stream {
                            Stream::Stdout => Notification::ProcessOutput {
                                daemon: daemon.clone(),
                                pid,
                                line,
                            },
                            Stream::Stderr => Notification::ProcessErrorOutput {
                                daemon: daemon.clone(),
                                pid,
                                line,
                            },
                        };
                        notifier.emit(notification);
                    }
                    Ok(None) => break,
                    Err(err) => {
                        trace!(daemon = %daemon, ?pid, ?stream, error = %err, "output stream closed");
                        break;
                    }
                }
            }
        })
    }
}

fn launch_error(err: &io::Error, has_credentials: bool, rendered: &str) -> ActionError {
    let kind = match err.kind() {
        io::ErrorKind::NotFound => ProcessErrorKind::FileNotFound,
        io::ErrorKind::PermissionDenied if has_credentials => ProcessErrorKind::BadCredentials,
        io::ErrorKind::PermissionDenied => ProcessErrorKind::AccessDenied,
        _ => ProcessErrorKind::Other,
    };
    ActionError::Process {
        kind,
        message: format!("failed to start '{rendered}': {err}"),
    }
}

#[cfg(unix)]
fn apply_credentials(cmd: &mut Command, run_as: Option<Credentials>) -> Result<(), ActionError> {
    if let Some(creds) = run_as {
        if let Some(gid) = creds.gid {
            cmd.gid(gid);
        }
        if let Some(uid) = creds.uid {
            cmd.uid(uid);
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_credentials(_cmd: &mut Command, run_as: Option<Credentials>) -> Result<(), ActionError> {
    match run_as {
        None => Ok(()),
        Some(_) => Err(ActionError::Process {
            kind: ProcessErrorKind::BadCredentials,
            message: "run_as is only supported on unix".to_string(),
        }),
    }
}

#[cfg(windows)]
fn apply_window(cmd: &mut Command, window: WindowStyle) {
    // CREATE_NO_WINDOW
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    if window == WindowStyle::Hidden {
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
}

#[cfg(not(windows))]
fn apply_window(_cmd: &mut Command, window: WindowStyle) {
    if window != WindowStyle::Normal {
        trace!(?window, "window style has no effect on this platform");
    }
}
