//! Readiness suspension and timeout budgets
//!
//! `wait_ready` is the sole suspension point of the crate: every retry loop
//! in the pipe driver parks here until the OS reports the pipe usable, the
//! peer closes it, the reactor reports an error condition, or the budget
//! runs out.

use std::io;
use std::os::fd::OwnedFd;
use std::time::{Duration, Instant};

use tokio::io::unix::{AsyncFd, AsyncFdReadyGuard};
use tokio::time::timeout;

/// Direction a pipe end is waited on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Read,
    Write,
}

/// Shrinking wall-clock allowance threaded through a retry loop.
///
/// Constructed once per public call; every retry measures what is left
/// against the same deadline. A budget of `None` or zero never expires.
/// Exhaustion ends the loop without raising an error.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Budget {
    deadline: Option<Instant>,
}

impl Budget {
    pub(crate) fn new(timeout: Option<Duration>) -> Self {
        let deadline = timeout.filter(|t| !t.is_zero()).map(|t| Instant::now() + t);
        Self { deadline }
    }

    /// Time left, or `None` for an unbounded budget.
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

/// Outcome of a readiness wait.
pub(crate) enum Waited<'a> {
    /// The pipe woke up: ready in the requested direction, or carrying a
    /// closed/error condition that the next I/O attempt will observe.
    Ready(AsyncFdReadyGuard<'a, OwnedFd>),
    /// The budget ran out first.
    TimedOut,
}

/// Suspends until `fd` is usable in `direction` or the budget elapses.
///
/// Closed and error conditions complete the wait exactly like readiness
/// does; they surface through the read or write attempt that follows (an
/// end-of-stream read, an `EPIPE` write, or a hard I/O error).
pub(crate) async fn wait_ready<'a>(
    fd: &'a AsyncFd<OwnedFd>,
    direction: Direction,
    budget: &Budget,
) -> io::Result<Waited<'a>> {
    let wait = async {
        match direction {
            Direction::Read => fd.readable().await,
            Direction::Write => fd.writable().await,
        }
    };

    match budget.remaining() {
        None => Ok(Waited::Ready(wait.await?)),
        Some(left) if left.is_zero() => Ok(Waited::TimedOut),
        Some(left) => match timeout(left, wait).await {
            Ok(guard) => Ok(Waited::Ready(guard?)),
            Err(_elapsed) => Ok(Waited::TimedOut),
        },
    }
}
