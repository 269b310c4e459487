//! The single seam every external command goes through.

use std::fmt;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, trace};

use crate::error::CommandError;

/// An external command, described independently of how it is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Needs root; prefixed with `sudo` when escalation is enabled.
    pub privileged: bool,
    /// Run as this user instead of the operator.
    pub run_as: Option<String>,
}

impl SystemCommand {
    /// Creates a command with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            privileged: false,
            run_as: None,
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Marks the command as needing root.
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    /// Runs the command as another user.
    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.run_as = Some(user.into());
        self
    }

    /// Returns true if this is `program` with exactly the leading `args`.
    pub fn is(&self, program: &str, args: &[&str]) -> bool {
        self.program == program
            && self.args.len() >= args.len()
            && self.args.iter().zip(args).all(|(a, b)| a == b)
    }
}

impl fmt::Display for SystemCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.run_as {
            write!(f, "sudo -u {} ", user)?;
        } else if self.privileged {
            f.write_str("sudo ")?;
        }
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Exit code and captured output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// A successful result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed result with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns true for exit code zero.
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Both streams, trimmed, for surfacing a tool's own diagnostics.
    pub fn diagnostics(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => String::from("(no output)"),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{}\n{}", stdout, stderr),
        }
    }
}

/// Executes external commands.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Runs the command to completion. A non-zero exit is not an error here.
    async fn run(&self, command: &SystemCommand) -> Result<CommandOutput, CommandError>;

    /// Runs the command and turns a non-zero exit into [`CommandError::Failed`].
    async fn check(&self, command: &SystemCommand) -> Result<CommandOutput, CommandError> {
        let output = self.run(command).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(CommandError::Failed {
                command: command.to_string(),
                code: output.code,
                output: output.diagnostics(),
            })
        }
    }

    /// Returns true if `tool` resolves on the PATH.
    async fn has_tool(&self, tool: &str) -> Result<bool, CommandError> {
        let output = self.run(&SystemCommand::new("which").arg(tool)).await?;
        Ok(output.success())
    }
}

/// Runs commands as real processes through tokio.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    /// Prefix privileged commands with `sudo`.
    sudo: bool,
}

impl ProcessRunner {
    /// Creates a runner; `sudo` controls escalation of privileged commands.
    pub fn new(sudo: bool) -> Self {
        Self { sudo }
    }

    fn build(&self, command: &SystemCommand) -> Command {
        let mut cmd = match (&command.run_as, command.privileged && self.sudo) {
            (Some(user), _) => {
                let mut cmd = Command::new("sudo");
                cmd.arg("-u").arg(user).arg(&command.program);
                cmd
            }
            (None, true) => {
                let mut cmd = Command::new("sudo");
                cmd.arg(&command.program);
                cmd
            }
            (None, false) => Command::new(&command.program),
        };
        cmd.args(&command.args);
        cmd
    }
}

impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &SystemCommand) -> Result<CommandOutput, CommandError> {
        let mut cmd = self.build(command);

        debug!(cmd = %command, "Running command");

        let output = cmd
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| CommandError::SpawnFailed {
                command: command.to_string(),
                message: e.to_string(),
            })?;

        let result = CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        trace!(cmd = %command, code = result.code, stdout = %result.stdout, stderr = %result.stderr, "Command finished");
        Ok(result)
    }
}
