//! Child process management for engine invocations.
//!
//! Provides [`run_command`]: spawn a prepared [`tokio::process::Command`],
//! capture stdout/stderr, and wait for exit. The child is killed if the
//! returned future is dropped, which is how the pool enforces its
//! invocation timeout.

use std::process::Stdio;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use super::engine::ScriptError;

/// Maximum stdout or stderr size captured per stream (10 MiB).
///
/// Reading stops at the limit and the pipe is closed, so a child still
/// writing past it sees a broken pipe.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Captured result of a finished child process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code (`-1` if killed by a signal).
    pub exit_code: i32,
    pub duration_ms: u64,
}

/// Spawn `cmd`, capture its output, and wait for it to exit.
///
/// Stdin is closed. The caller sets the program and arguments.
pub async fn run_command(cmd: &mut Command) -> Result<ProcessOutput, ScriptError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();

    let mut child = cmd.spawn().map_err(|source| ScriptError::Spawn {
        program: cmd.as_std().get_program().to_string_lossy().into_owned(),
        source,
    })?;

    // Read both pipes concurrently with `wait()` so a chatty child can
    // never block on a full pipe.
    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();

    let (status, stdout_bytes, stderr_bytes) = tokio::join!(
        child.wait(),
        read_stream(stdout_handle),
        read_stream(stderr_handle),
    );
    let status = status?;

    Ok(ProcessOutput {
        stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
        stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
        exit_code: status.code().unwrap_or(-1),
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Read an entire output stream into a byte buffer, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
