//! External tool boundary.
//!
//! Every shell-out goes through here so that failures arrive as structured
//! [`SourceError`] kinds instead of free-form stderr text.

use std::io::{self, Read};
use std::process::{Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::SourceError;

/// Default ceiling for tools that may hang (network lookups, container engines).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

fn classify(program: &str, output: &Output) -> SourceError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let msg = stderr.trim();
    let lower = msg.to_ascii_lowercase();
    let subject = format!("{program}: {msg}");
    if lower.contains("permission denied")
        || lower.contains("operation not permitted")
        || lower.contains("must be root")
        || lower.contains("you need to be root")
    {
        SourceError::PermissionDenied(subject)
    } else if lower.contains("no such")
        || lower.contains("not found")
        || lower.contains("does not exist")
    {
        SourceError::NotFound(subject)
    } else if msg.is_empty() {
        SourceError::Failed(format!("{program} exited with {}", output.status))
    } else {
        SourceError::Failed(subject)
    }
}

fn spawn_error(program: &str, e: io::Error) -> SourceError {
    if e.kind() == io::ErrorKind::NotFound {
        SourceError::Unavailable(program.to_string())
    } else {
        SourceError::Io(e)
    }
}

fn into_stdout(program: &str, output: Output) -> Result<String, SourceError> {
    if !output.status.success() {
        return Err(classify(program, &output));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Runs `program` on the current thread with [`DEFAULT_TIMEOUT`] and returns
/// its stdout.
///
/// A missing binary is `Unavailable`; a non-zero exit is classified from stderr.
pub fn run_blocking(program: &str, args: &[&str]) -> Result<String, SourceError> {
    run_blocking_with(program, args, DEFAULT_TIMEOUT)
}

/// [`run_blocking`] with an explicit deadline. A child still running at the
/// deadline is killed and reported as `Failed`.
pub fn run_blocking_with(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<String, SourceError> {
    let mut child = std::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(program, e))?;
    // drained on their own threads so a chatty child cannot fill a pipe and stall
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(timed_out(program, timeout));
            }
            None => thread::sleep(POLL_INTERVAL),
        }
    };
    let output = Output {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
    };
    into_stdout(program, output)
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut p| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = p.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn timed_out(program: &str, timeout: Duration) -> SourceError {
    SourceError::Failed(format!(
        "{program} timed out after {:.1}s",
        timeout.as_secs_f32()
    ))
}

/// Async variant with a deadline; the child is killed if the deadline passes.
pub async fn run(program: &str, args: &[&str], timeout: Duration) -> Result<String, SourceError> {
    let child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();
    match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => into_stdout(program, output),
        Ok(Err(e)) => Err(spawn_error(program, e)),
        Err(_) => Err(timed_out(program, timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_unavailable() {
        let e = run_blocking("syspeek-definitely-missing-tool", &[]).unwrap_err();
        assert!(matches!(e, SourceError::Unavailable(_)));
    }

    #[test]
    fn stdout_is_returned() {
        assert_eq!(run_blocking("echo", &["hello"]).unwrap().trim(), "hello");
    }

    #[test]
    fn stderr_is_classified() {
        let e = run_blocking("sh", &["-c", "echo 'No such container: abc' >&2; exit 1"])
            .unwrap_err();
        assert!(matches!(e, SourceError::NotFound(_)));
        let e = run_blocking("sh", &["-c", "echo 'Operation not permitted' >&2; exit 1"])
            .unwrap_err();
        assert!(matches!(e, SourceError::PermissionDenied(_)));
        let e = run_blocking("sh", &["-c", "exit 3"]).unwrap_err();
        assert!(matches!(e, SourceError::Failed(_)));
    }

    #[test]
    fn hung_tool_is_killed_at_deadline() {
        let started = Instant::now();
        let e = run_blocking_with("sleep", &["20"], Duration::from_millis(200)).unwrap_err();
        assert!(matches!(e, SourceError::Failed(_)));
        assert!(e.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn large_output_does_not_stall() {
        let out = run_blocking("head", &["-c", "200000", "/dev/zero"]).unwrap();
        assert_eq!(out.len(), 200_000);
    }

    #[tokio::test]
    async fn slow_tools_time_out() {
        let e = run("sleep", &["5"], Duration::from_millis(100)).await.unwrap_err();
        assert!(e.to_string().contains("timed out"));
    }
}
