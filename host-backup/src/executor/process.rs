//! Running external archivers.
//!
//! Every long step (tar, rsync) is a child process awaited to completion. The
//! exit status is the success signal; stderr is kept only for diagnostics. A
//! cancelled run sends SIGTERM to the child and reaps it before returning.

use crate::utils::{BackupError, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const STDERR_TAIL_LINES: usize = 20;
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Exit status and the tail of stderr
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stderr: String,
}

impl ToolOutput {
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }

    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Spawn `cmd`, optionally feed `input` on stdin, and wait for it.
pub async fn run_tool(
    mut cmd: Command,
    input: Option<Vec<u8>>,
    cancel: &CancellationToken,
) -> Result<ToolOutput> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    debug!(command = ?cmd.as_std(), "Spawning");

    cmd.stdin(if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::null())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => BackupError::MissingTool(program.clone()),
        _ => BackupError::Io(e),
    })?;

    let writer = match (input, child.stdin.take()) {
        (Some(data), Some(mut stdin)) => Some(tokio::spawn(async move {
            // The child may exit early and close the pipe; its status reports that
            let _ = stdin.write_all(&data).await;
            let _ = stdin.shutdown().await;
        })),
        _ => None,
    };

    let reader = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        })
    });

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = cancel.cancelled() => {
            warn!(program = %program, "Cancellation requested, terminating child");
            if let Some(id) = child.id() {
                let _ = kill(Pid::from_raw(id as i32), Signal::SIGTERM);
            }
            if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_err() {
                let _ = child.kill().await;
            }
            return Err(BackupError::Cancelled);
        }
    };

    if let Some(writer) = writer {
        let _ = writer.await;
    }
    let stderr = match reader {
        Some(reader) => reader.await.unwrap_or_default(),
        None => Vec::new(),
    };

    Ok(ToolOutput {
        status,
        stderr: tail(&String::from_utf8_lossy(&stderr), STDERR_TAIL_LINES),
    })
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
