/// Bounded execution of external system tools
///
/// Probes and the process-backed object detector shell out to platform
/// utilities. Every call is bounded: output is drained on background threads
/// while the caller polls for exit, and a child that outlives its deadline is
/// killed and reported as [`ProbeError::Timeout`].
use crate::config::types::ProbeError;
use log::debug;
use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Captured result of a finished tool
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }

    /// Map a non-zero exit to [`ProbeError::Execution`].
    pub fn require_success(self, tool: &str) -> Result<Self, ProbeError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ProbeError::execution(
                tool,
                format!(
                    "exit status {}: {}",
                    self.code()
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "signal".to_string()),
                    self.stderr.trim()
                ),
            ))
        }
    }
}

/// Run `program args...` with a deadline.
pub fn run_tool(program: &str, args: &[&str], timeout: Duration) -> Result<ToolOutput, ProbeError> {
    run_tool_with_input(program, args, None, timeout)
}

/// Run a tool, feeding `input` on stdin, with a deadline.
pub fn run_tool_with_input(
    program: &str,
    args: &[&str],
    input: Option<&[u8]>,
    timeout: Duration,
) -> Result<ToolOutput, ProbeError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ProbeError::ToolMissing {
            tool: program.to_string(),
        },
        _ => ProbeError::execution(program, format!("spawn failed: {}", e)),
    })?;

    let stdin_handle = match (input, child.stdin.take()) {
        (Some(bytes), Some(mut stdin)) => {
            let bytes = bytes.to_vec();
            // a child that exits early closes the pipe; that is not our error
            Some(thread::spawn(move || {
                let _ = stdin.write_all(&bytes);
            }))
        }
        _ => None,
    };

    let stdout_handle = child.stdout.take().map(|mut stdout| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = stdout.read_to_end(&mut buffer);
            buffer
        })
    });
    let stderr_handle = child.stderr.take().map(|mut stderr| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = stderr.read_to_end(&mut buffer);
            buffer
        })
    });

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if started.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    debug!("{} killed after {:?}", program, timeout);
                    return Err(ProbeError::Timeout {
                        tool: program.to_string(),
                        timeout,
                    });
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                let _ = child.kill();
                return Err(ProbeError::execution(program, format!("wait failed: {}", e)));
            }
        }
    };

    if let Some(handle) = stdin_handle {
        let _ = handle.join();
    }
    let stdout = stdout_handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    let stderr = stderr_handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default();

    Ok(ToolOutput {
        status,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary_is_tool_missing() {
        let err = run_tool(
            "examguard-definitely-not-installed",
            &[],
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, ProbeError::ToolMissing { .. }));
        assert!(err.is_negative());
    }

    #[test]
    fn test_captures_stdout() {
        let output = run_tool("sh", &["-c", "echo hello"], Duration::from_secs(5)).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn test_feeds_stdin() {
        let output =
            run_tool_with_input("cat", &[], Some(b"frame-bytes"), Duration::from_secs(5)).unwrap();
        assert_eq!(output.stdout, "frame-bytes");
    }

    #[test]
    fn test_nonzero_exit_is_execution_error() {
        let output = run_tool("sh", &["-c", "echo oops >&2; exit 3"], Duration::from_secs(5))
            .unwrap();
        assert_eq!(output.code(), Some(3));

        let err = output.require_success("sh").unwrap_err();
        assert!(matches!(err, ProbeError::Execution { .. }));
        assert!(err.to_string().contains("oops"));
    }

    #[test]
    fn test_slow_tool_times_out() {
        let started = Instant::now();
        let err = run_tool("sleep", &["5"], Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, ProbeError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
