//! External program execution.
//!
//! A rule's executable is launched directly (no shell) with the triggering
//! message text as its only argument. Stdout and stderr are captured into a
//! single buffer in the order chunks arrive. No timeout is applied: a hung
//! program holds its dispatch until it exits.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::error::ExecError;

/// Read buffer size per pipe.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Exit code reported when the process was terminated by a signal.
pub const SIGNALLED_EXIT_CODE: i32 = -1;

/// Outcome of a program that launched and ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Interleaved stdout and stderr.
    pub combined_output: Vec<u8>,
    /// Process exit code, or [`SIGNALLED_EXIT_CODE`].
    pub exit_code: i32,
}

/// Runs a program with a single argument.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, executable: &Path, argument: &str) -> Result<CommandResult, ExecError>;
}

/// Runs programs as child processes.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner {
    /// Working directory for children (if None, inherits ours).
    working_dir: Option<PathBuf>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run children in `dir` (config `workingDir`).
    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, executable: &Path, argument: &str) -> Result<CommandResult, ExecError> {
        let mut command = Command::new(executable);
        command
            .arg(argument)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| ExecError::Launch {
            path: executable.to_path_buf(),
            source,
        })?;

        let wait_failed = |source: std::io::Error| ExecError::Wait {
            path: executable.to_path_buf(),
            source,
        };

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut out_buf = vec![0u8; READ_CHUNK_SIZE];
        let mut err_buf = vec![0u8; READ_CHUNK_SIZE];
        let mut combined = Vec::new();

        while stdout.is_some() || stderr.is_some() {
            tokio::select! {
                read = read_chunk(&mut stdout, &mut out_buf) => match read.map_err(wait_failed)? {
                    0 => stdout = None,
                    n => combined.extend_from_slice(&out_buf[..n]),
                },
                read = read_chunk(&mut stderr, &mut err_buf) => match read.map_err(wait_failed)? {
                    0 => stderr = None,
                    n => combined.extend_from_slice(&err_buf[..n]),
                },
            }
        }

        let status = child.wait().await.map_err(wait_failed)?;

        Ok(CommandResult {
            combined_output: combined,
            exit_code: status.code().unwrap_or(SIGNALLED_EXIT_CODE),
        })
    }
}

/// Read from a pipe that may already be closed. A closed pipe never resolves,
/// so `select!` keeps waiting on the other one.
async fn read_chunk<R>(pipe: &mut Option<R>, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match pipe {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}
