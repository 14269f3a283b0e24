//! External command execution.
//!
//! The node engines only shell out for format detection, but operators
//! sometimes need to force extra flags onto a specific tool (for example a
//! `blkid` cache location). [`ForcedParamsExec`] wraps any [`CommandRunner`]
//! and injects those flags without touching call sites.

use std::collections::HashMap;
use std::process::Command;

use tracing::debug;

use crate::config::NODE_CONFIG;
use crate::error::NodeError;

/// Result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with status 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stdout followed by stderr, the way a combined-output reader sees it.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Runs external programs.
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` to completion, capturing its output.
    ///
    /// A non-zero exit status is not an error at this level; only failing to
    /// start the program is.
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, NodeError>;
}

/// Runs commands on the host via [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OsExec;

impl CommandRunner for OsExec {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, NodeError> {
        debug!(program, ?args, "running command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| NodeError::CommandFailed {
                command: render(program, args),
                code: None,
                output: e.to_string(),
            })?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// A runner that prepends operator-supplied parameters to selected commands.
#[derive(Debug, Clone)]
pub struct ForcedParamsExec<R = OsExec> {
    inner: R,
    cmd_param_mapping: HashMap<String, String>,
}

impl ForcedParamsExec<OsExec> {
    /// Wrap the host runner with the given command -> parameters mapping.
    pub fn new(cmd_param_mapping: HashMap<String, String>) -> Self {
        Self::with_runner(OsExec, cmd_param_mapping)
    }

    /// Wrap the host runner using the mapping from [`NODE_CONFIG`].
    pub fn from_config() -> Self {
        Self::new(NODE_CONFIG.forced_cmd_params.clone())
    }
}

impl<R: CommandRunner> ForcedParamsExec<R> {
    /// Wrap an arbitrary runner.
    pub fn with_runner(inner: R, cmd_param_mapping: HashMap<String, String>) -> Self {
        Self {
            inner,
            cmd_param_mapping,
        }
    }

    /// Arguments actually passed for `program`: forced parameters first,
    /// since options conventionally precede operands.
    pub fn effective_args(&self, program: &str, args: &[&str]) -> Vec<String> {
        let mut params: Vec<String> = self
            .cmd_param_mapping
            .get(program)
            .map(|value| value.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default();
        params.extend(args.iter().map(|a| (*a).to_owned()));
        params
    }
}

impl<R: CommandRunner> CommandRunner for ForcedParamsExec<R> {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, NodeError> {
        let params = self.effective_args(program, args);
        let params: Vec<&str> = params.iter().map(String::as_str).collect();
        self.inner.run(program, &params)
    }
}

/// Render a command line for error messages.
pub(crate) fn render(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}
