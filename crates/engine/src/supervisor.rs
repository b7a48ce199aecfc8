//! Lifecycle of one external process at a time: spawn, stream every output
//! line to a sink, honor cancellation, report the exit status.

use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::warn;

use crate::cancel::CancelToken;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The tool binary does not exist at the resolved path. Fatal to the
    /// whole batch: no later file could succeed either.
    #[error("{program} not found - install it or fix the configured path ({source})")]
    ToolNotFound {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl SupervisorError {
    /// Whether this failure poisons the rest of the batch (the binary is
    /// unusable) rather than just the current item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SupervisorError::ToolNotFound { .. } | SupervisorError::Spawn { .. }
        )
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).is_err() {
            break;
        }
    }
}

/// Run `argv` (program path first) to completion, forwarding every stdout
/// and stderr line to `on_line` as it arrives. Cancellation requests a
/// best-effort kill of the child; the exit status is still collected and
/// returned.
pub async fn run<F>(
    argv: &[String],
    cancel: &CancelToken,
    mut on_line: F,
) -> Result<ExitStatus, SupervisorError>
where
    F: FnMut(&str),
{
    let program = argv.first().cloned().unwrap_or_default();

    let mut cmd = Command::new(&program);
    cmd.args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SupervisorError::ToolNotFound {
                program: program.clone(),
                source: e,
            }
        } else {
            SupervisorError::Spawn {
                program: program.clone(),
                source: e,
            }
        }
    })?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, tx.clone()));
    }
    drop(tx);

    let mut kill_sent = false;
    loop {
        tokio::select! {
            line = rx.recv() => match line {
                Some(line) => on_line(&line),
                None => break,
            },
            _ = cancel.cancelled(), if !kill_sent => {
                kill_sent = true;
                if let Err(e) = child.start_kill() {
                    warn!("failed to kill {}: {}", program, e);
                }
            }
        }
    }

    // The child may have closed its pipes while still running; keep
    // honoring cancellation until it actually exits.
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            _ = cancel.cancelled(), if !kill_sent => {
                kill_sent = true;
                if let Err(e) = child.start_kill() {
                    warn!("failed to kill {}: {}", program, e);
                }
            }
        }
    };

    status.map_err(|e| SupervisorError::Wait {
        program,
        source: e,
    })
}
