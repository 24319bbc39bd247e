use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },
}

impl CommandError {
    /// Timeouts and non-zero exits are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Exit { .. })
    }
}

/// Runs one external command and hands back its stdout.
pub trait CommandRunner {
    fn run(
        &self,
        argv: &[String],
        limit: Duration,
    ) -> impl Future<Output = Result<String, CommandError>>;
}

/// Spawns real processes; the child is killed if it outlives `limit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn run(&self, argv: &[String], limit: Duration) -> Result<String, CommandError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(CommandError::Launch {
                program: String::new(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
            });
        };

        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::null()).kill_on_drop(true);

        let output = match tokio::time::timeout(limit, command.output()).await {
            Ok(result) => result.map_err(|source| CommandError::Launch {
                program: program.clone(),
                source,
            })?,
            Err(_) => return Err(CommandError::Timeout(limit)),
        };

        if !output.status.success() {
            return Err(CommandError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn returns_stdout_on_success() {
        let out = ProcessRunner
            .run(&argv(&["sh", "-c", "echo 42"]), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out, "42\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_retryable() {
        let err = ProcessRunner
            .run(
                &argv(&["sh", "-c", "echo nope >&2; exit 3"]),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Exit { ref stderr, .. } if stderr == "nope"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let err = ProcessRunner
            .run(&argv(&["sleep", "5"]), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Timeout(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn missing_program_is_not_retryable() {
        let err = ProcessRunner
            .run(
                &argv(&["/nonexistent/mic-volume-tool"]),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Launch { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn empty_command_is_a_launch_error() {
        let err = ProcessRunner
            .run(&[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Launch { .. }));
    }
}
