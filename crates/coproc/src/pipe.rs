//! Non-blocking pipe ends and the read/write/drain driver loops

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::libc;
use tokio::io::unix::AsyncFd;
use tracing::{debug, trace};

use crate::waiter::{wait_ready, Budget, Direction, Waited};

/// Default length of a single read block.
pub const DEFAULT_BLOCK_SIZE: usize = 8192;

/// Puts `fd` into non-blocking mode. Must happen before the fd is wrapped
/// in an `AsyncFd`; the driver loops rely on reads and writes never blocking.
pub(crate) fn set_nonblocking(fd: BorrowedFd<'_>) -> io::Result<()> {
    // SAFETY: fcntl on a valid, open descriptor.
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn read_fd(fd: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: reading into a valid buffer from a valid non-blocking descriptor.
    let n = unsafe {
        libc::read(
            fd.as_raw_fd(),
            buf.as_mut_ptr().cast::<libc::c_void>(),
            buf.len(),
        )
    };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn write_fd(fd: BorrowedFd<'_>, buf: &[u8]) -> io::Result<usize> {
    // SAFETY: writing from a valid buffer to a valid non-blocking descriptor.
    let n = unsafe {
        libc::write(
            fd.as_raw_fd(),
            buf.as_ptr().cast::<libc::c_void>(),
            buf.len(),
        )
    };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Read end of a child output pipe (stdout or stderr, parent's view).
pub(crate) struct ReadPipe {
    fd: AsyncFd<OwnedFd>,
    eof: Arc<AtomicBool>,
}

impl ReadPipe {
    pub(crate) fn new(fd: OwnedFd) -> io::Result<Self> {
        set_nonblocking(fd.as_fd())?;
        Ok(Self {
            fd: AsyncFd::new(fd)?,
            eof: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Shared flag that flips once end-of-stream has been observed.
    pub(crate) fn eof_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.eof)
    }

    pub(crate) fn at_eof(&self) -> bool {
        self.eof.load(Ordering::Relaxed)
    }

    fn mark_eof(&self) {
        self.eof.store(true, Ordering::Relaxed);
    }

    /// Reads one block of up to `max_len` bytes.
    ///
    /// Returns `Ok(None)` for end-of-stream, a closed pipe, and an exhausted
    /// budget alike; the three are deliberately indistinguishable here. Data
    /// already queued in the pipe returns without suspending.
    pub(crate) async fn read_block(
        &mut self,
        max_len: usize,
        budget: Budget,
    ) -> io::Result<Option<Vec<u8>>> {
        if self.at_eof() {
            return Ok(None);
        }
        let mut buf = vec![0u8; max_len.max(1)];

        match read_fd(self.fd.get_ref().as_fd(), &mut buf) {
            Ok(0) => {
                self.mark_eof();
                return Ok(None);
            }
            Ok(n) => {
                buf.truncate(n);
                return Ok(Some(buf));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }

        loop {
            let mut guard = match wait_ready(&self.fd, Direction::Read, &budget).await? {
                Waited::Ready(guard) => guard,
                Waited::TimedOut => return Ok(None),
            };
            match guard.try_io(|inner| read_fd(inner.get_ref().as_fd(), &mut buf)) {
                Ok(Ok(0)) => {
                    drop(guard);
                    self.mark_eof();
                    return Ok(None);
                }
                Ok(Ok(n)) => {
                    buf.truncate(n);
                    return Ok(Some(buf));
                }
                Ok(Err(e)) => return Err(e),
                // Readiness was stale; cleared by try_io, wait again.
                Err(_would_block) => continue,
            }
        }
    }

    /// Drains the pipe until end-of-stream or budget exhaustion, accumulating
    /// every block read.
    ///
    /// Returns `Ok(None)` only when the pipe was already at end-of-stream on
    /// entry and nothing was read. A timeout with nothing accumulated yields
    /// an empty buffer instead; the caller cannot tell a timeout from EOF any
    /// other way.
    pub(crate) async fn drain(&mut self, budget: Budget) -> io::Result<Option<Vec<u8>>> {
        let was_eof = self.at_eof();
        let mut collected = Vec::new();
        loop {
            match self.read_block(DEFAULT_BLOCK_SIZE, budget).await? {
                Some(block) => collected.extend_from_slice(&block),
                None => break,
            }
        }
        if collected.is_empty() && was_eof {
            return Ok(None);
        }
        trace!(bytes = collected.len(), eof = self.at_eof(), "drained pipe");
        Ok(Some(collected))
    }
}

/// Write end of the child's stdin pipe.
pub(crate) struct WritePipe {
    fd: AsyncFd<OwnedFd>,
}

impl WritePipe {
    pub(crate) fn new(fd: OwnedFd) -> io::Result<Self> {
        set_nonblocking(fd.as_fd())?;
        Ok(Self {
            fd: AsyncFd::new(fd)?,
        })
    }

    /// Writes as much of `data` as the pipe and the budget allow, retrying
    /// partial writes through readiness suspension.
    ///
    /// A dead child, a closed read end, and an exhausted budget all end the
    /// loop early with the count written so far; none of them is an error.
    /// Unsent bytes for a dead child are silently dropped.
    pub(crate) async fn write_all(
        &mut self,
        data: &[u8],
        budget: Budget,
        mut still_running: impl FnMut() -> bool,
    ) -> io::Result<usize> {
        let mut written = 0;
        while written < data.len() {
            if !still_running() {
                debug!(
                    written,
                    requested = data.len(),
                    "child gone, dropping unsent bytes"
                );
                return Ok(written);
            }

            match write_fd(self.fd.get_ref().as_fd(), &data[written..]) {
                Ok(n) => {
                    written += n;
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    debug!(written, "read end closed, short write");
                    return Ok(written);
                }
                Err(e) => return Err(e),
            }

            match wait_ready(&self.fd, Direction::Write, &budget).await? {
                Waited::TimedOut => return Ok(written),
                Waited::Ready(mut guard) => {
                    match guard.try_io(|inner| write_fd(inner.get_ref().as_fd(), &data[written..]))
                    {
                        Ok(Ok(n)) => written += n,
                        Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                            debug!(written, "read end closed, short write");
                            return Ok(written);
                        }
                        Ok(Err(e)) => return Err(e),
                        Err(_would_block) => {}
                    }
                }
            }
        }
        Ok(written)
    }
}
