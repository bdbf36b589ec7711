use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

const MAX_CAPTURE_BYTES: usize = 200_000;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    #[error("IO error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, for error reporting.
    pub fn combined(&self) -> String {
        let mut s = self.stdout.trim_end().to_string();
        let err = self.stderr.trim_end();
        if !err.is_empty() {
            if !s.is_empty() {
                s.push('\n');
            }
            s.push_str(err);
        }
        s
    }
}

/// Runs external programs with a hard upper bound on their duration.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Runs `program` in `cwd`, capturing stdout and stderr.
    pub async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        stdin: Option<&str>,
    ) -> Result<CommandOutput, ProcessError> {
        let start = Instant::now();
        info!(%program, ?args, "process start");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|source| ProcessError::Io {
                    program: program.to_string(),
                    source,
                })?;
            // Close stdin so the child sees EOF
            drop(pipe);
        }

        let out = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ProcessError::Io {
                program: program.to_string(),
                source,
            })?,
            Err(_) => {
                warn!(%program, timeout_secs = self.timeout.as_secs(), "process timed out");
                return Err(ProcessError::Timeout {
                    program: program.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        let output = CommandOutput {
            exit_code: out.status.code().unwrap_or(-1),
            stdout: clip(String::from_utf8_lossy(&out.stdout).to_string()),
            stderr: clip(String::from_utf8_lossy(&out.stderr).to_string()),
            duration: start.elapsed(),
        };
        info!(
            %program,
            exit = output.exit_code,
            stdout_len = out.stdout.len(),
            stderr_len = out.stderr.len(),
            took_ms = output.duration.as_millis() as u64,
            "process end"
        );
        Ok(output)
    }

    /// Runs `program` with stdout and stderr both redirected into `output_path`
    /// (truncated first). Returns the exit code.
    pub async fn run_to_file(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        output_path: &Path,
    ) -> Result<i32, ProcessError> {
        let start = Instant::now();
        info!(%program, ?args, output = %output_path.display(), "process start");

        let io_err = |source| ProcessError::Io {
            program: program.to_string(),
            source,
        };
        let stdout_file = std::fs::File::create(output_path).map_err(io_err)?;
        let stderr_file = stdout_file.try_clone().map_err(io_err)?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file))
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(result) => result.map_err(io_err)?,
            Err(_) => {
                let _ = child.kill().await;
                warn!(%program, timeout_secs = self.timeout.as_secs(), "process timed out");
                return Err(ProcessError::Timeout {
                    program: program.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        let exit_code = status.code().unwrap_or(-1);
        info!(
            %program,
            exit = exit_code,
            took_ms = start.elapsed().as_millis() as u64,
            "process end"
        );
        Ok(exit_code)
    }
}

fn clip(mut s: String) -> String {
    if s.len() > MAX_CAPTURE_BYTES {
        let mut cut = MAX_CAPTURE_BYTES;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("\n[truncated]\n");
    }
    s
}

pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}
