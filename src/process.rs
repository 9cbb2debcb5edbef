//! Centralized command execution with consistent error handling.
//!
//! Every external tool the pipeline touches (simg2img, lpunpack, mount,
//! umount, cp, debugfs, 7z) is described by a [`Cmd`] and executed through a
//! [`CommandRunner`]. The runner is injectable so the pipeline can be driven
//! without real mounts, and it is the only place that knows about `sudo`.

use std::io::Read;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Run-level cancellation flag shared by every stage.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `Err(Error::Cancelled)` once the token has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status of the command.
    pub status: ExitStatus,
    /// Captured stdout as a string.
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
}

impl CommandResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }

    /// One-line description of a failed run, stderr included when present.
    pub fn diagnostic(&self, program: &str) -> String {
        let stderr = self.stderr_trimmed();
        if stderr.is_empty() {
            format!("'{}' exited with code {}", program, self.code())
        } else {
            format!("'{}' exited with code {}: {}", program, self.code(), stderr)
        }
    }
}

/// A fully described external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Needs elevated privileges (mount, umount, copying out of a mount).
    pub privileged: bool,
}

impl Invocation {
    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Executes invocations. Implemented by [`SystemRunner`] and by test fakes.
pub trait CommandRunner: Send + Sync {
    /// Run to completion, or until `cancel` fires.
    ///
    /// Fails only when the command cannot be run at all or was cancelled;
    /// a non-zero exit is reported through [`CommandResult::status`].
    fn run(&self, invocation: &Invocation, cancel: Option<&CancelToken>) -> Result<CommandResult>;

    /// Whether `program` can be found on this host.
    fn has_tool(&self, program: &str) -> bool;
}

/// Runs real processes, prefixing privileged ones with `sudo` when asked to.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    use_sudo: bool,
}

impl SystemRunner {
    pub fn new(use_sudo: bool) -> Self {
        Self { use_sudo }
    }

    /// Program and argument vector actually handed to the OS.
    pub fn argv(&self, invocation: &Invocation) -> (String, Vec<String>) {
        if invocation.privileged && self.use_sudo {
            let mut args = Vec::with_capacity(invocation.args.len() + 1);
            args.push(invocation.program.clone());
            args.extend(invocation.args.iter().cloned());
            ("sudo".to_string(), args)
        } else {
            (invocation.program.clone(), invocation.args.clone())
        }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation, cancel: Option<&CancelToken>) -> Result<CommandResult> {
        if let Some(token) = cancel {
            token.check()?;
        }

        let (program, args) = self.argv(invocation);
        debug!(command = %invocation.display(), privileged = invocation.privileged, "exec");

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::io(
                    format!("failed to execute '{}'. Is it installed?", program),
                    e,
                )
            })?;

        // Drain both pipes on their own threads so a chatty tool cannot block.
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let status = loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|e| Error::io(format!("waiting for '{}'", program), e))?
            {
                break status;
            }
            if cancel.is_some_and(CancelToken::is_cancelled) {
                let _ = child.kill();
                let _ = child.wait();
                join_reader(stdout_reader);
                join_reader(stderr_reader);
                return Err(Error::Cancelled);
            }
            thread::sleep(POLL_INTERVAL);
        };

        Ok(CommandResult {
            status,
            stdout: join_reader(stdout_reader),
            stderr: join_reader(stderr_reader),
        })
    }

    fn has_tool(&self, program: &str) -> bool {
        which(program).is_some()
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

/// Builder for configuring command execution.
pub struct Cmd<'a> {
    program: String,
    args: Vec<String>,
    privileged: bool,
    cancel: Option<&'a CancelToken>,
}

impl<'a> Cmd<'a> {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            privileged: false,
            cancel: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Mark the command as needing elevated privileges.
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    /// Kill the command when `token` fires. Cleanup commands leave this unset.
    pub fn cancel_on(mut self, token: &'a CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn invocation(&self) -> Invocation {
        Invocation {
            program: self.program.clone(),
            args: self.args.clone(),
            privileged: self.privileged,
        }
    }

    /// Run the command and capture output.
    pub fn run(self, runner: &dyn CommandRunner) -> Result<CommandResult> {
        runner.run(&self.invocation(), self.cancel)
    }
}

/// Check if a program exists in PATH.
///
/// Returns the full path if found, None otherwise.
pub fn which(program: &str) -> Option<String> {
    which::which(program)
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
}

// =============================================================================
// Tests
// =============================================================================
