//! Child process execution with a timeout and bounded output capture.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Lossy stderr with a truncation marker, for error messages.
    pub fn stderr_excerpt(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stderr).trim_end().to_string();
        if self.stderr_truncated > 0 {
            text.push_str(&format!(" [stderr truncated {} bytes]", self.stderr_truncated));
        }
        text
    }
}

/// Run a command, feeding `stdin`, and wait at most `timeout`.
///
/// stdout and stderr are drained on reader threads while the child runs so a
/// chatty child cannot block on a full pipe. At most `output_limit_bytes` of
/// each stream is kept; the rest is counted and dropped. A child still running
/// at the deadline is killed and reported with `timed_out`.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = cmd.spawn().map_err(|err| {
        error!(err = %err, "failed to spawn command");
        anyhow!(err).context("spawn command")
    })?;

    let stdout_reader = spawn_capture(child.stdout.take(), output_limit_bytes)?;
    let stderr_reader = spawn_capture(child.stderr.take(), output_limit_bytes)?;

    if let Some(input) = stdin {
        let mut pipe = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        // A child that exits without reading stdin closes the pipe early.
        if let Err(err) = pipe.write_all(input) {
            warn!(err = %err, "child did not consume stdin");
        }
    }

    let waited = child.wait_timeout(timeout).context("wait for command")?;
    let timed_out = waited.is_none();
    let status = match waited {
        Some(status) => status,
        None => {
            warn!("command timed out, killing");
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let stdout = finish_capture(stdout_reader).context("collect stdout")?;
    let stderr = finish_capture(stderr_reader).context("collect stderr")?;
    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_truncated = stdout.dropped,
            stderr_truncated = stderr.dropped,
            "output truncated"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout: stdout.kept,
        stderr: stderr.kept,
        stdout_truncated: stdout.dropped,
        stderr_truncated: stderr.dropped,
        timed_out,
    })
}

/// Bytes kept from one stream, plus how many were discarded past the limit.
#[derive(Debug, Default)]
struct Capture {
    kept: Vec<u8>,
    dropped: usize,
}

type CaptureHandle = thread::JoinHandle<Result<Capture>>;

fn spawn_capture<R: Read + Send + 'static>(stream: Option<R>, limit: usize) -> Result<CaptureHandle> {
    let stream = stream.ok_or_else(|| anyhow!("output stream was not piped"))?;
    Ok(thread::spawn(move || capture(stream, limit)))
}

fn finish_capture(handle: CaptureHandle) -> Result<Capture> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

fn capture<R: Read>(mut reader: R, limit: usize) -> Result<Capture> {
    let mut out = Capture::default();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(out);
        }
        let keep = n.min(limit.saturating_sub(out.kept.len()));
        out.kept.extend_from_slice(&chunk[..keep]);
        out.dropped += n - keep;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdin_echo_and_exit_status() {
        let output = run_command_with_timeout(
            sh("cat; echo oops >&2; exit 3"),
            Some(b"hello".as_slice()),
            Duration::from_secs(10),
            1000,
        )
        .expect("run");
        assert_eq!(output.stdout, b"hello");
        assert_eq!(output.stderr_excerpt(), "oops");
        assert_eq!(output.status.code(), Some(3));
        assert!(!output.timed_out);
    }

    #[test]
    fn output_beyond_limit_is_counted() {
        let output = run_command_with_timeout(
            sh("printf '0123456789'"),
            None,
            Duration::from_secs(10),
            4,
        )
        .expect("run");
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.stdout_truncated, 6);
    }

    #[test]
    fn slow_child_is_killed() {
        let output =
            run_command_with_timeout(sh("exec sleep 5"), None, Duration::from_millis(100), 100)
                .expect("run");
        assert!(output.timed_out);
        assert!(!output.status.success());
    }
}
