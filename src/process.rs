//! Process runner: spawn an external command and capture its output.
//!
//! The runner knows nothing about TeX. Stage adapters build a [`SpawnSpec`],
//! hand it to a [`ProcessRunner`], and interpret the [`ProcessOutput`].
//!
//! [`TokioProcessRunner`] is the production implementation. Tests inject
//! their own runner to script tool behaviour and count spawns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Everything needed to spawn one external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Extra variables merged over the ambient environment.
    pub env: Vec<(String, String)>,
    /// Working directory of the child.
    pub cwd: PathBuf,
    /// When `false`, captured lines are also echoed as they arrive.
    pub silent: bool,
    /// Kill the child if it runs longer than this.
    pub timeout: Option<Duration>,
}

impl SpawnSpec {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: cwd.into(),
            silent: true,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Shell-ish rendering for log lines.
    pub fn display_command(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last `n` non-empty lines of stderr, falling back to stdout.
    pub fn tail(&self, n: usize) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let lines: Vec<&str> = source.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].join("\n")
    }
}

/// Why a process could not be run to completion.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The program does not exist.
    #[error("program '{program}' not found")]
    NotFound { program: String },

    /// The program exceeded its timeout and was killed.
    #[error("program '{program}' timed out after {}s", .after.as_secs())]
    Timeout { program: String, after: Duration },

    /// Any other spawn or wait failure.
    #[error("failed to run '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Spawns external commands on behalf of the pipeline.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `spec` to completion and capture its output.
    ///
    /// A non-zero exit status is *not* an error here; callers inspect
    /// [`ProcessOutput::exit_code`].
    async fn run(&self, spec: &SpawnSpec) -> Result<ProcessOutput, SpawnError>;
}

/// Default runner backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, spec: &SpawnSpec) -> Result<ProcessOutput, SpawnError> {
        debug!("spawn: {} (cwd {})", spec.display_command(), spec.cwd.display());

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&spec.cwd)
            // TeX drops to an interactive prompt on errors when stdin is open.
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout also reaches grandchildren
        // (latexmk's engine, shell-escape helpers).
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SpawnError::NotFound {
                    program: spec.program.clone(),
                }
            } else {
                SpawnError::Io {
                    program: spec.program.clone(),
                    source: e,
                }
            }
        })?;

        let echo = !spec.silent;
        let stdout_task = tokio::spawn(drain(child.stdout.take(), echo));
        let stderr_task = tokio::spawn(drain(child.stderr.take(), echo));

        let waited = match spec.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    warn!("'{}' exceeded {:?}; killing", spec.program, limit);
                    terminate(&mut child, &spec.program).await;
                    stdout_task.abort();
                    stderr_task.abort();
                    return Err(SpawnError::Timeout {
                        program: spec.program.clone(),
                        after: limit,
                    });
                }
            },
            None => child.wait().await,
        };

        let status = waited.map_err(|e| SpawnError::Io {
            program: spec.program.clone(),
            source: e,
        })?;

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        debug!("'{}' exited with {:?}", spec.program, status.code());

        Ok(ProcessOutput {
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }
}

/// Kill the child's whole process group, then the child itself.
async fn terminate(child: &mut Child, program: &str) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pgid) = child.id().and_then(|id| i32::try_from(id).ok()) {
            if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                warn!("failed to kill process group of '{}': {}", program, e);
            }
        }
    }
    if let Err(e) = child.kill().await {
        warn!("failed to kill '{}': {}", program, e);
    }
}

/// Read a child pipe to the end, line by line, tolerating non-UTF-8 bytes.
async fn drain<R>(reader: Option<R>, echo: bool) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return String::new();
    };
    let mut reader = BufReader::new(reader);
    let mut captured = String::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                if echo {
                    info!(target: "tex2svg::process", "{}", line.trim_end());
                }
                captured.push_str(&line);
            }
            Err(e) => {
                warn!("error reading child output: {}", e);
                break;
            }
        }
    }

    captured
}
