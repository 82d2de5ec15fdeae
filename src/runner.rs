use anyhow::{Context, Result};
use std::borrow::Cow;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

const PASSWORD_PREFIX: &str = "--password=";

/// Runs external programs on behalf of the backup executor.
///
/// Every process the tool spawns goes through this trait, which keeps the
/// credential-bearing command lines in one place and lets tests substitute
/// a fake runner.
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;
}

/// A single external command: program, arguments and an optional file that
/// receives its standard output.
#[derive(Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub stdout: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    /// Program name without its directory, used in error messages.
    pub fn program_name(&self) -> Cow<'_, str> {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| self.program.to_string_lossy())
    }

    fn masked_args(&self) -> impl Iterator<Item = Cow<'_, str>> {
        self.args.iter().map(|arg| {
            let arg = arg.to_string_lossy();
            if arg.starts_with(PASSWORD_PREFIX) {
                Cow::Owned(format!("{}****", PASSWORD_PREFIX))
            } else {
                arg
            }
        })
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in self.masked_args() {
            write!(f, " {}", arg)?;
        }
        if let Some(ref stdout) = self.stdout {
            write!(f, " > {}", stdout.display())?;
        }
        Ok(())
    }
}

// Debug output ends up in test failures and panics, so it is masked too.
impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.masked_args().collect::<Vec<_>>())
            .field("stdout", &self.stdout)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    /// Captured only when the invocation does not redirect stdout to a file.
    pub stdout: String,
    pub stderr: String,
}

#[cfg(test)]
impl CommandOutput {
    pub fn success() -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn with_stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::success()
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

impl CommandOutput {
    /// Human readable description of a failed run.
    pub fn describe_failure(&self, program: &str) -> String {
        let status = match self.code {
            Some(code) => format!("{} exited with status {}", program, code),
            None => format!("{} was terminated by a signal", program),
        };
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            status
        } else {
            format!("{}: {}", status, stderr)
        }
    }
}

/// Spawns real processes and waits for them.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        debug!("Executing: {}", invocation);

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args).stdin(Stdio::null());
        if let Some(ref path) = invocation.stdout {
            cmd.stdout(create_output(path)?);
        }

        let output = cmd
            .output()
            .with_context(|| format!("Failed to execute {}", invocation.program.display()))?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn create_output(path: &Path) -> Result<fs::File> {
    fs::File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))
}
