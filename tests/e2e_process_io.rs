//! End-to-end process I/O workflows against real commands.

use std::collections::HashMap;
use std::time::Duration;

use coproc::{CoProcess, ProcessConfig, ProcessError, DEFAULT_BLOCK_SIZE};

const IO_TIMEOUT: Option<Duration> = Some(Duration::from_secs(10));

/// Drains until the child is observed dead, then returns its exit code.
async fn wait_for_exit(proc: &CoProcess) -> i32 {
    for _ in 0..500 {
        if proc
            .wait_close(Some(Duration::from_millis(100)))
            .await
            .unwrap()
        {
            return proc.exit_code().expect("exit code after close");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("process did not exit in time");
}

#[tokio::test]
async fn echo_literal_argument_and_reach_eof() {
    let mut proc = CoProcess::with_config(ProcessConfig::new("printf").args(["%s", "Hello"]));
    proc.run().unwrap();
    assert!(!proc.eof_stdout());

    let out = proc.drain_stdout(IO_TIMEOUT).await.unwrap();
    assert_eq!(out.as_deref(), Some(&b"Hello"[..]));
    assert!(proc.eof_stdout());
}

#[tokio::test]
async fn stdin_bytes_come_back_case_swapped() {
    let mut proc = CoProcess::new();
    proc.set_command("tr")
        .unwrap()
        .add_args(["a-zA-Z", "A-Za-z"])
        .unwrap();
    proc.run().unwrap();

    let written = proc.write_stdin(b"Hello", IO_TIMEOUT).await.unwrap();
    assert_eq!(written, 5);
    proc.close_stdin().await.unwrap();

    let out = proc.drain_stdout(IO_TIMEOUT).await.unwrap();
    assert_eq!(out.as_deref(), Some(&b"hELLO"[..]));
}

#[tokio::test]
async fn working_directory_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    let expected = std::fs::canonicalize(dir.path()).unwrap();

    let mut proc = CoProcess::new();
    proc.set_command("sh").unwrap().add_args(["-c", "pwd"]).unwrap();
    proc.set_working_dir(dir.path()).unwrap();
    proc.run().unwrap();

    let out = proc.drain_stdout(IO_TIMEOUT).await.unwrap().unwrap();
    let printed = String::from_utf8(out).unwrap();
    let printed = std::fs::canonicalize(printed.trim()).unwrap();
    assert_eq!(printed, expected);
}

#[tokio::test]
async fn environment_override_reaches_the_child() {
    let mut proc = CoProcess::new();
    proc.set_command("sh")
        .unwrap()
        .add_args(["-c", "printf '%s' \"$COPROC_E2E_MARKER\""])
        .unwrap();
    proc.set_env("COPROC_E2E_MARKER", "sentinel-value").unwrap();
    proc.run().unwrap();

    let out = proc.drain_stdout(IO_TIMEOUT).await.unwrap();
    assert_eq!(out.as_deref(), Some(&b"sentinel-value"[..]));
}

#[tokio::test]
async fn bulk_environment_replaces_everything() {
    let mut envs = HashMap::new();
    envs.insert("ONLY_VAR".to_string(), "kept".to_string());

    let mut proc = CoProcess::new();
    proc.set_command("/bin/sh")
        .unwrap()
        .add_args(["-c", "printf '%s:%s' \"$ONLY_VAR\" \"${HOME:-gone}\""])
        .unwrap();
    proc.set_envs(envs).unwrap();
    proc.run().unwrap();

    let out = proc.drain_stdout(IO_TIMEOUT).await.unwrap();
    assert_eq!(out.as_deref(), Some(&b"kept:gone"[..]));
}

#[tokio::test]
async fn stderr_carries_the_error_line() {
    let mut proc = CoProcess::with_config(
        ProcessConfig::new("sh").args(["-c", "printf 'missing operand\\nmore detail\\n' >&2; exit 1"]),
    );
    proc.run().unwrap();

    let err = proc.drain_stderr(IO_TIMEOUT).await.unwrap().unwrap();
    let text = String::from_utf8(err).unwrap();
    assert_eq!(text.lines().next(), Some("missing operand"));
    assert!(proc.eof_stderr());
}

#[tokio::test]
async fn exit_code_survives_repeated_queries() {
    let mut proc = CoProcess::with_config(ProcessConfig::new("sh").args(["-c", "exit 2"]));
    proc.run().unwrap();

    let code = wait_for_exit(&proc).await;
    assert_eq!(code, 2);
    // The raw OS primitive would report a sentinel on a second poll; the
    // cached value must not budge.
    assert_eq!(proc.exit_code(), Some(2));
    assert_eq!(proc.exit_code(), Some(2));
    assert!(!proc.is_running());
    assert!(proc.is_started());
}

#[tokio::test]
async fn lifecycle_misuse_is_rejected_in_both_directions() {
    let proc = CoProcess::new();
    assert!(matches!(
        proc.read_stdout(DEFAULT_BLOCK_SIZE, IO_TIMEOUT).await,
        Err(ProcessError::NotStarted)
    ));
    assert!(matches!(
        proc.drain(IO_TIMEOUT).await,
        Err(ProcessError::NotStarted)
    ));

    let mut proc = CoProcess::with_config(ProcessConfig::new("cat"));
    proc.run().unwrap();
    assert!(matches!(
        proc.set_command("ls"),
        Err(ProcessError::AlreadyStarted)
    ));
    assert!(matches!(
        proc.set_working_dir("/"),
        Err(ProcessError::AlreadyStarted)
    ));
    proc.close_stdin().await.unwrap();
    wait_for_exit(&proc).await;
}

#[tokio::test]
async fn large_write_reconstructs_byte_for_byte() {
    let mut proc = CoProcess::with_config(ProcessConfig::new("cat"));
    proc.run().unwrap();

    // Far beyond one pipe buffer, so the writer has to retry through
    // readiness suspension while the reader keeps the pipe moving.
    let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
    let expected = payload.len();

    let (written, collected) = tokio::join!(proc.write_stdin(&payload, IO_TIMEOUT), async {
        let mut collected = Vec::with_capacity(expected);
        while collected.len() < expected {
            match proc
                .read_stdout(DEFAULT_BLOCK_SIZE, IO_TIMEOUT)
                .await
                .unwrap()
            {
                Some(block) => collected.extend_from_slice(&block),
                None => break,
            }
        }
        collected
    });

    assert_eq!(written.unwrap(), expected);
    assert_eq!(collected, payload);

    proc.close_stdin().await.unwrap();
    wait_for_exit(&proc).await;
}

#[tokio::test]
async fn drain_after_eof_returns_the_sentinel_not_an_error() {
    let mut proc = CoProcess::with_config(ProcessConfig::new("printf").args(["%s", "once"]));
    proc.run().unwrap();

    let first = proc.drain_stdout(IO_TIMEOUT).await.unwrap();
    assert_eq!(first.as_deref(), Some(&b"once"[..]));

    let second = proc.drain_stdout(IO_TIMEOUT).await.unwrap();
    assert_eq!(second, None);
}

#[tokio::test]
async fn plural_drain_collects_both_sides() {
    let mut proc = CoProcess::with_config(
        ProcessConfig::new("sh").args(["-c", "printf out; printf err >&2"]),
    );
    proc.run().unwrap();

    let drained = proc.drain(IO_TIMEOUT).await.unwrap().unwrap();
    assert_eq!(drained.stdout.as_deref(), Some(&b"out"[..]));
    assert_eq!(drained.stderr.as_deref(), Some(&b"err"[..]));

    // Both sides exhausted: the combined result collapses to the sentinel.
    assert_eq!(proc.drain(IO_TIMEOUT).await.unwrap(), None);
}
