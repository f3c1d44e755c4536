//! Child liveness polling and exit-status caching

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, warn};

/// Exit code reported while the real code is unknown.
pub const UNKNOWN_EXIT_CODE: i32 = -1;

/// Fixed-shape snapshot of one liveness poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStatus {
    /// Whether the child was alive at poll time.
    pub running: bool,
    /// The exit code, or [`UNKNOWN_EXIT_CODE`] while running or unknown.
    pub exit_code: i32,
}

/// Polls the OS for child liveness, remembering the exit code forever.
///
/// `waitpid` yields a valid status exactly once: the first call after the
/// child dies reaps it, and every later call reports `ECHILD`. The first
/// non-sentinel code is cached permanently and returned by all subsequent
/// polls regardless of what the OS reports.
pub(crate) struct StatusMonitor {
    pid: Pid,
    cached_exit_code: Option<i32>,
}

impl StatusMonitor {
    pub(crate) fn new(pid: Pid) -> Self {
        Self {
            pid,
            cached_exit_code: None,
        }
    }

    /// Queries the OS once, without blocking.
    pub(crate) fn poll(&mut self) -> ProcessStatus {
        if let Some(code) = self.cached_exit_code {
            return ProcessStatus {
                running: false,
                exit_code: code,
            };
        }

        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => ProcessStatus {
                running: true,
                exit_code: UNKNOWN_EXIT_CODE,
            },
            Ok(WaitStatus::Exited(_, code)) => {
                debug!(pid = %self.pid, code, "child exited");
                self.cache(code)
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                debug!(pid = %self.pid, signal = ?signal, "child killed by signal");
                // Shell convention for signal deaths.
                self.cache(128 + signal as i32)
            }
            // Stopped or continued children are still alive.
            Ok(_) => ProcessStatus {
                running: true,
                exit_code: UNKNOWN_EXIT_CODE,
            },
            Err(Errno::ECHILD) => {
                // Already reaped; the primitive only reports the sentinel
                // from here on, and sentinels are never cached.
                ProcessStatus {
                    running: false,
                    exit_code: UNKNOWN_EXIT_CODE,
                }
            }
            Err(err) => {
                warn!(pid = %self.pid, error = %err, "waitpid failed");
                ProcessStatus {
                    running: false,
                    exit_code: UNKNOWN_EXIT_CODE,
                }
            }
        }
    }

    /// The cached exit code. `None` while the child lives, or when it died
    /// without the monitor ever observing a valid status.
    pub(crate) fn exit_code(&self) -> Option<i32> {
        self.cached_exit_code
    }

    fn cache(&mut self, code: i32) -> ProcessStatus {
        if code != UNKNOWN_EXIT_CODE {
            self.cached_exit_code = Some(code);
        }
        ProcessStatus {
            running: false,
            exit_code: code,
        }
    }
}
