//! # coproc
//!
//! **Purpose**: cooperative child-process management over non-blocking pipes
//!
//! Runs an external command and exposes its stdin, stdout, and stderr
//! through asynchronous, timeout-budgeted operations that suspend
//! cooperatively instead of blocking a thread. Designed for callers on a
//! single-threaded runtime who interleave process I/O with other work.
//!
//! ## Features
//!
//! - **Lifecycle**: configure, spawn, and observe a child through one handle
//! - **Non-Blocking Pipes**: all three stdio pipes switch to `O_NONBLOCK` at spawn
//! - **Timeout Budgets**: every read, write, and drain carries a wall-clock
//!   budget; exhausting it is an ordinary result, never an error
//! - **Partial-Write Retry**: stdin writes retry through readiness suspension
//!   and report short counts when the child goes away
//! - **Exit-Status Caching**: the first post-exit status is remembered for the
//!   life of the handle, hiding the one-shot OS primitive underneath
//!
//! ## Usage
//!
//! ```rust,no_run
//! use coproc::CoProcess;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut proc = CoProcess::new();
//! proc.set_command("tr")?.add_args(["a-z", "A-Z"])?;
//! proc.run()?;
//!
//! proc.write_stdin(b"hello\n", Some(Duration::from_secs(1))).await?;
//! proc.close_stdin().await?;
//! let upper = proc.drain_stdout(Some(Duration::from_secs(5))).await?;
//! assert_eq!(upper.as_deref(), Some(&b"HELLO\n"[..]));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod pipe;
pub mod process;
pub mod quote;
pub mod status;

mod waiter;

pub use config::ProcessConfig;
pub use error::{ProcessError, Result};
pub use pipe::DEFAULT_BLOCK_SIZE;
pub use process::{CoProcess, Drained};
pub use status::{ProcessStatus, UNKNOWN_EXIT_CODE};
