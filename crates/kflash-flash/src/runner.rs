//! Bounded subprocess execution behind a trait seam
//!
//! Every external tool kflash drives (flashtool.py, `make flash`,
//! `systemctl`, `sudo tee`) is invoked through [`CommandRunner`] with an
//! explicit timeout. Orchestration code depends on the trait, never on
//! `std::process` directly, so tests substitute recording fakes the same
//! way the rest of the workspace mocks hardware.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// A fully described subprocess invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Program name or path
    pub program: String,
    /// Arguments in order
    pub args: Vec<String>,
    /// Working directory, if different from the caller's
    pub cwd: Option<PathBuf>,
    /// Data written to the child's stdin before waiting
    pub stdin: Option<String>,
}

impl CommandSpec {
    /// Start a spec for `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            stdin: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set data to feed the child's stdin.
    pub fn stdin_data(mut self, data: impl Into<String>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    /// Loggable rendering, e.g. `sudo systemctl stop klipper`.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Captured output of a completed subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl CommandOutput {
    /// True when the process exited zero.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Best diagnostic line: trimmed stderr, falling back to stdout.
    pub fn message(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            stderr.to_string()
        } else {
            self.stdout.trim().to_string()
        }
    }
}

/// How a bounded invocation ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The process exited within the timeout
    Completed(CommandOutput),
    /// The timeout expired; the process was killed
    TimedOut,
}

/// Runs a subprocess to completion within a timeout.
pub trait CommandRunner {
    /// Run `spec`, waiting at most `timeout`.
    ///
    /// `Err` means the process could not be spawned or its pipes failed;
    /// a non-zero exit or timeout is an `Ok` outcome the caller inspects.
    fn run(&self, spec: &CommandSpec, timeout: Duration) -> std::io::Result<RunOutcome>;
}

/// Production runner over `std::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec, timeout: Duration) -> std::io::Result<RunOutcome> {
        log::debug!("running: {}", spec.display());

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command.stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn()?;
        if let Some(data) = &spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(data.as_bytes())?;
            }
        }

        // Drain both pipes on threads while waiting; `make flash` emits more
        // than a pipe buffer holds and would otherwise block against the
        // timeout.
        let stdout_reader = spawn_pipe_reader(child.stdout.take());
        let stderr_reader = spawn_pipe_reader(child.stderr.take());

        match child.wait_timeout(timeout)? {
            Some(status) => Ok(RunOutcome::Completed(CommandOutput {
                code: status.code(),
                stdout: stdout_reader.join().unwrap_or_default(),
                stderr: stderr_reader.join().unwrap_or_default(),
            })),
            None => {
                log::debug!("timed out after {:?}: {}", timeout, spec.display());
                child.kill().ok();
                child.wait().ok();
                stdout_reader.join().ok();
                stderr_reader.join().ok();
                Ok(RunOutcome::TimedOut)
            }
        }
    }
}

fn spawn_pipe_reader<R: std::io::Read + Send + 'static>(
    pipe: Option<R>,
) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_string(&mut buf).ok();
        }
        buf
    })
}
