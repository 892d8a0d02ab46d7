//! Execution of external host programs such as `systemctl`, `busctl` and `irqbalance`.
//!
//! Everything that shells out goes through the [`CommandRunner`] trait so the callers can be
//! exercised against a recording mock.

use std::fmt;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` failed with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A program invocation with arguments and extra environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable on top of the inherited environment.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The program followed by its arguments, without the environment.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{key}={value} ")?;
        }
        f.write_str(&self.command_line())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Runs external commands and looks up binaries.
pub trait CommandRunner: fmt::Debug + Send + Sync {
    /// Runs the command to completion and captures its output. A non-zero exit is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if the program cannot be started.
    fn output(&self, command: &Command) -> Result<Output>;

    /// Looks up `program` in `PATH`.
    fn look_path(&self, program: &str) -> Option<PathBuf>;

    /// Runs the command and fails unless it exits successfully.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] or [`Error::Failed`].
    fn run(&self, command: &Command) -> Result<Output> {
        let output = self.output(command)?;
        if !output.success {
            return Err(Error::Failed {
                command: command.to_string(),
                status: output
                    .code
                    .map_or_else(|| "signal".to_owned(), |code| format!("exit code {code}")),
                stderr: output.stderr.trim().to_owned(),
            });
        }
        Ok(output)
    }
}

/// [`CommandRunner`] backed by [`std::process::Command`] and the `which` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn output(&self, command: &Command) -> Result<Output> {
        log::debug!("Running `{command}`");
        let output = std::process::Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k, v)))
            .output()
            .map_err(|source| Error::Spawn {
                command: command.to_string(),
                source,
            })?;

        Ok(Output {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn look_path(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}
