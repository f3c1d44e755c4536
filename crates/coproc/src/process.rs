//! Managed child process handle and its public I/O surface

use std::collections::HashMap;
use std::io;
use std::os::fd::OwnedFd;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::unistd::Pid;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::ProcessConfig;
use crate::error::{ProcessError, Result};
use crate::pipe::{ReadPipe, WritePipe};
use crate::status::StatusMonitor;
use crate::waiter::Budget;

/// Output collected by [`CoProcess::drain`]. Each side is independently
/// absent when its pipe reported no data.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Drained {
    pub stdout: Option<Vec<u8>>,
    pub stderr: Option<Vec<u8>>,
}

struct Started {
    pid: Pid,
    monitor: SyncMutex<StatusMonitor>,
    stdin: Mutex<Option<WritePipe>>,
    stdout: Mutex<ReadPipe>,
    stderr: Mutex<ReadPipe>,
    stdout_eof: Arc<AtomicBool>,
    stderr_eof: Arc<AtomicBool>,
}

impl Drop for Started {
    fn drop(&mut self) {
        // One non-blocking reap so an already-dead child does not linger as
        // a zombie. A still-running child keeps running; the pipes close on
        // their own as the owned fds drop.
        let mut monitor = self.monitor.lock();
        if monitor.exit_code().is_none() && monitor.poll().running {
            debug!(pid = %self.pid, "handle dropped while child still running");
        }
    }
}

/// A child process driven through non-blocking pipes with per-call timeout
/// budgets.
///
/// The handle starts in a configuring state: command, arguments, working
/// directory, and environment can be set until [`run`](Self::run) spawns the
/// child, after which configuration is frozen and the I/O surface opens up.
///
/// Operations on different pipes may be interleaved freely from concurrent
/// tasks; operations on the same pipe serialize against each other.
///
/// Dropping the handle closes all pipes and releases the OS handle. The
/// child itself is not killed.
///
/// # Examples
/// ```no_run
/// use coproc::CoProcess;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut proc = CoProcess::new();
/// proc.set_command("tr")?.add_args(["a-z", "A-Z"])?;
/// proc.run()?;
///
/// proc.write_stdin(b"hello\n", Some(Duration::from_secs(1))).await?;
/// proc.close_stdin().await?;
/// let upper = proc.drain_stdout(Some(Duration::from_secs(5))).await?;
/// assert_eq!(upper.as_deref(), Some(&b"HELLO\n"[..]));
/// # Ok(())
/// # }
/// ```
pub struct CoProcess {
    config: ProcessConfig,
    started: Option<Started>,
}

impl CoProcess {
    /// Create an unconfigured handle.
    pub fn new() -> Self {
        Self {
            config: ProcessConfig::default(),
            started: None,
        }
    }

    /// Create a handle from a prebuilt configuration.
    pub fn with_config(config: ProcessConfig) -> Self {
        Self {
            config,
            started: None,
        }
    }

    fn configuring(&mut self) -> Result<&mut ProcessConfig> {
        if self.started.is_some() {
            return Err(ProcessError::AlreadyStarted);
        }
        Ok(&mut self.config)
    }

    fn started(&self) -> Result<&Started> {
        self.started.as_ref().ok_or(ProcessError::NotStarted)
    }

    /// Set the command to execute. Rejected once the process has started.
    pub fn set_command(&mut self, command: impl Into<String>) -> Result<&mut Self> {
        self.configuring()?.command = command.into();
        Ok(self)
    }

    /// Append one argument.
    pub fn add_arg(&mut self, arg: impl Into<String>) -> Result<&mut Self> {
        self.configuring()?.args.push(arg.into());
        Ok(self)
    }

    /// Append several arguments.
    pub fn add_args<I, S>(&mut self, args: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.configuring()?
            .args
            .extend(args.into_iter().map(Into::into));
        Ok(self)
    }

    /// Set the working directory. The directory must exist.
    pub fn set_working_dir(&mut self, dir: impl AsRef<Path>) -> Result<&mut Self> {
        let config = self.configuring()?;
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(ProcessError::InvalidConfig(format!(
                "working directory does not exist: {}",
                dir.display()
            )));
        }
        config.working_dir = Some(dir.to_path_buf());
        Ok(self)
    }

    /// Set one environment variable on top of the ambient environment.
    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<&mut Self> {
        self.configuring()?.env.insert(key.into(), value.into());
        Ok(self)
    }

    /// Replace the child's entire environment with `envs`.
    pub fn set_envs(&mut self, envs: HashMap<String, String>) -> Result<&mut Self> {
        let config = self.configuring()?;
        config.env = envs;
        config.env_clear = true;
        Ok(self)
    }

    /// Spawn the configured command with all three stdio streams piped and
    /// switched to non-blocking mode.
    ///
    /// Synchronous: no suspension happens here. It must still be called from
    /// within a tokio runtime, because registering the pipes with the
    /// reactor requires one. Consumes the configuring state irreversibly;
    /// every later configuration call fails with
    /// [`ProcessError::AlreadyStarted`].
    ///
    /// # Errors
    /// [`ProcessError::MissingCommand`] when no command was configured,
    /// [`ProcessError::SpawnFailed`] when the OS cannot create the process.
    pub fn run(&mut self) -> Result<()> {
        if self.started.is_some() {
            return Err(ProcessError::AlreadyStarted);
        }
        if self.config.command.is_empty() {
            return Err(ProcessError::MissingCommand);
        }
        let command_line = self.config.command_line();
        debug!(command = %command_line, "spawning child process");

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        if self.config.env_clear {
            cmd.env_clear();
        }
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(ProcessError::SpawnFailed)?;
        let pid = Pid::from_raw(child.id() as i32);

        let stdin_fd: OwnedFd = child.stdin.take().map(Into::into).ok_or_else(|| missing_pipe("stdin"))?;
        let stdout_fd: OwnedFd = child.stdout.take().map(Into::into).ok_or_else(|| missing_pipe("stdout"))?;
        let stderr_fd: OwnedFd = child.stderr.take().map(Into::into).ok_or_else(|| missing_pipe("stderr"))?;
        // The std handle is discarded here; liveness and reaping belong to
        // the status monitor from now on.
        drop(child);

        let stdin = WritePipe::new(stdin_fd).map_err(ProcessError::SpawnFailed)?;
        let stdout = ReadPipe::new(stdout_fd).map_err(ProcessError::SpawnFailed)?;
        let stderr = ReadPipe::new(stderr_fd).map_err(ProcessError::SpawnFailed)?;

        info!(pid = %pid, command = %command_line, "child process spawned");

        let stdout_eof = stdout.eof_flag();
        let stderr_eof = stderr.eof_flag();
        self.started = Some(Started {
            pid,
            monitor: SyncMutex::new(StatusMonitor::new(pid)),
            stdin: Mutex::new(Some(stdin)),
            stdout: Mutex::new(stdout),
            stderr: Mutex::new(stderr),
            stdout_eof,
            stderr_eof,
        });
        Ok(())
    }

    /// Whether `run()` has succeeded.
    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }

    /// Whether the child is currently alive. `false` before `run()`.
    pub fn is_running(&self) -> bool {
        match &self.started {
            Some(started) => started.monitor.lock().poll().running,
            None => false,
        }
    }

    /// The child's exit code. `None` before `run()` and while the child is
    /// still running; afterwards the first observed code, forever.
    pub fn exit_code(&self) -> Option<i32> {
        let started = self.started.as_ref()?;
        let mut monitor = started.monitor.lock();
        monitor.poll();
        monitor.exit_code()
    }

    /// The child's process ID, once started.
    pub fn pid(&self) -> Option<u32> {
        self.started.as_ref().map(|s| s.pid.as_raw() as u32)
    }

    /// Whether stdout has reported end-of-stream.
    pub fn eof_stdout(&self) -> bool {
        self.started
            .as_ref()
            .is_some_and(|s| s.stdout_eof.load(Ordering::Relaxed))
    }

    /// Whether stderr has reported end-of-stream.
    pub fn eof_stderr(&self) -> bool {
        self.started
            .as_ref()
            .is_some_and(|s| s.stderr_eof.load(Ordering::Relaxed))
    }

    /// Read up to `max_len` bytes from the child's stdout.
    ///
    /// Returns `Ok(None)` for end-of-stream, a closed pipe, or an exhausted
    /// budget; the caller tells them apart only by knowing whether it asked
    /// for a timeout. A `timeout` of `None` or zero waits indefinitely.
    pub async fn read_stdout(
        &self,
        max_len: usize,
        timeout: Option<Duration>,
    ) -> Result<Option<Vec<u8>>> {
        let started = self.started()?;
        let budget = Budget::new(timeout);
        let mut pipe = started.stdout.lock().await;
        pipe.read_block(max_len, budget).await.map_err(ProcessError::Io)
    }

    /// Read up to `max_len` bytes from the child's stderr.
    pub async fn read_stderr(
        &self,
        max_len: usize,
        timeout: Option<Duration>,
    ) -> Result<Option<Vec<u8>>> {
        let started = self.started()?;
        let budget = Budget::new(timeout);
        let mut pipe = started.stderr.lock().await;
        pipe.read_block(max_len, budget).await.map_err(ProcessError::Io)
    }

    /// Drain stdout until end-of-stream or budget exhaustion.
    pub async fn drain_stdout(&self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>> {
        let started = self.started()?;
        let budget = Budget::new(timeout);
        let mut pipe = started.stdout.lock().await;
        pipe.drain(budget).await.map_err(ProcessError::Io)
    }

    /// Drain stderr until end-of-stream or budget exhaustion.
    pub async fn drain_stderr(&self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>> {
        let started = self.started()?;
        let budget = Budget::new(timeout);
        let mut pipe = started.stderr.lock().await;
        pipe.drain(budget).await.map_err(ProcessError::Io)
    }

    /// Drain stdout and stderr concurrently under one shared budget.
    ///
    /// Returns `Ok(None)` when both pipes report no data; otherwise both
    /// sides, each independently possibly absent.
    pub async fn drain(&self, timeout: Option<Duration>) -> Result<Option<Drained>> {
        let started = self.started()?;
        let budget = Budget::new(timeout);
        let (out, err) = tokio::join!(
            async { started.stdout.lock().await.drain(budget).await },
            async { started.stderr.lock().await.drain(budget).await },
        );
        let stdout = out.map_err(ProcessError::Io)?;
        let stderr = err.map_err(ProcessError::Io)?;
        if stdout.is_none() && stderr.is_none() {
            return Ok(None);
        }
        Ok(Some(Drained { stdout, stderr }))
    }

    /// Drain both output pipes, discard the payload, and report whether the
    /// child has stopped running.
    pub async fn wait_close(&self, timeout: Option<Duration>) -> Result<bool> {
        self.drain(timeout).await?;
        Ok(!self.is_running())
    }

    /// Write `data` to the child's stdin, retrying partial writes until all
    /// bytes are sent, the child dies, the pipe closes, or the budget runs
    /// out.
    ///
    /// Returns the number of bytes actually written. A short count is an
    /// ordinary result, not an error; bytes unsent when the child has died
    /// are silently dropped.
    pub async fn write_stdin(&self, data: &[u8], timeout: Option<Duration>) -> Result<usize> {
        let started = self.started()?;
        let budget = Budget::new(timeout);
        let mut stdin = started.stdin.lock().await;
        let pipe = stdin.as_mut().ok_or_else(stdin_closed)?;
        let monitor = &started.monitor;
        pipe.write_all(data, budget, || monitor.lock().poll().running)
            .await
            .map_err(ProcessError::Io)
    }

    /// Close the child's stdin, signalling end of input.
    ///
    /// Closing twice is a caller error and reported as an I/O failure, as is
    /// writing after an explicit close.
    pub async fn close_stdin(&self) -> Result<()> {
        let started = self.started()?;
        let mut stdin = started.stdin.lock().await;
        match stdin.take() {
            Some(pipe) => {
                drop(pipe);
                debug!(pid = %started.pid, "closed child stdin");
                Ok(())
            }
            None => Err(stdin_closed()),
        }
    }
}

impl Default for CoProcess {
    fn default() -> Self {
        Self::new()
    }
}

fn missing_pipe(name: &str) -> ProcessError {
    ProcessError::SpawnFailed(io::Error::other(format!("{name} pipe was not created")))
}

fn stdin_closed() -> ProcessError {
    ProcessError::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        "stdin already closed",
    ))
}
