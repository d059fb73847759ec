// src/exec/command_line.rs

//! Argument templating for process actions.
//!
//! Recognised tokens:
//!
//! | token        | replaced with                                   |
//! |--------------|-------------------------------------------------|
//! | `{file}`     | full path of the changed file                   |
//! | `{old_file}` | previous full path (empty unless renamed)       |
//! | `{change}`   | change kind (`Created`, `Renamed`, ...)         |
//! | `{name}`     | file name of the changed file                   |
//! | `{daemon}`   | daemon name                                     |
//!
//! Unknown tokens are left as they are.

use crate::config::ProcessAction;
use crate::types::ChangeEvent;

/// A resolved program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    /// Build the invocation for `event`.
    ///
    /// Without `shell`, the template is split into arguments first and each
    /// argument is substituted on its own, so a path containing spaces stays
    /// a single argument. With `shell`, program and substituted arguments
    /// are handed to the platform shell as one string.
    pub fn build(action: &ProcessAction, event: &ChangeEvent) -> Self {
        if action.shell {
            let arguments = substitute(&action.arguments, event);
            let line = if arguments.trim().is_empty() {
                action.program.clone()
            } else {
                format!("{} {}", action.program, arguments.trim())
            };
            return shell_command(line);
        }

        Self {
            program: action.program.clone(),
            args: split_args(&action.arguments)
                .iter()
                .map(|arg| substitute(arg, event))
                .collect(),
        }
    }

    /// Human-readable form used in notifications and logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("\"{part}\"")
                } else {
                    part.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(windows)]
fn shell_command(line: String) -> CommandLine {
    CommandLine {
        program: "cmd".to_string(),
        args: vec!["/C".to_string(), line],
    }
}

#[cfg(not(windows))]
fn shell_command(line: String) -> CommandLine {
    CommandLine {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), line],
    }
}

/// Replace every known token in `template`.
pub fn substitute(template: &str, event: &ChangeEvent) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open..];
        let Some(close) = after.find('}') else {
            out.push_str(after);
            return out;
        };
        let token = &after[1..close];
        match token_value(token, event) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&after[..=close]),
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

fn token_value(token: &str, event: &ChangeEvent) -> Option<String> {
    let value = match token {
        "file" => event.path.to_string_lossy().into_owned(),
        "old_file" => event
            .old_path
            .as_deref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default(),
        "change" => event.kind.as_str().to_string(),
        "name" => event.file_name(),
        "daemon" => event.daemon.clone(),
        _ => return None,
    };
    Some(value)
}

/// Split an argument template on whitespace, honouring single and double
/// quotes. Quotes are removed; `""` yields an empty argument.
pub fn split_args(template: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quote: Option<char> = None;

    for c in template.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_arg = true;
            }
            None if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            None => {
                current.push(c);
                in_arg = true;
            }
        }
    }
    if in_arg {
        args.push(current);
    }
    args
}
