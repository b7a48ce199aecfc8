//! The batch state machine: one background task walks the file list (or the
//! single concatenation job), drives the compiler and supervisor per item,
//! and reports lifecycle events over a channel. The caller stays
//! responsive; exactly one external process runs at a time.
//!
//! Cancellation is cooperative and does not roll anything back: a
//! destination that was mid-encode when the kill landed stays on disk.

use std::fs;
use std::path::Path;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::command;
use crate::duration;
use crate::error::EngineError;
use crate::naming;
use crate::spec::EncodeJobSpec;
use crate::supervisor::{self, SupervisorError};
use crate::tools::ToolPaths;

/// Lifecycle events, in guaranteed order per item: `FileStarted`, zero or
/// more `LogLine`/`FileProgress`, then `FileFinished`. `Done` is always the
/// final event of a batch, exactly once; `FatalError` (at most once)
/// precedes it.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    LogLine(String),
    FileStarted {
        index: usize,
        total: usize,
        filename: String,
    },
    /// Advisory progress fraction in `0.0..=1.0`; absent entirely when no
    /// duration estimate is available.
    FileProgress {
        index: usize,
        total: usize,
        fraction: f64,
    },
    FileFinished {
        index: usize,
        total: usize,
        filename: String,
        success: bool,
    },
    FatalError(String),
    Done,
}

/// Handle to a running batch: event stream plus cancellation.
pub struct BatchHandle {
    events: UnboundedReceiver<BatchEvent>,
    cancel: CancelToken,
    task: JoinHandle<()>,
}

impl BatchHandle {
    /// Request cancellation. Idempotent, callable at any time.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Next event, or `None` after `Done` has been consumed and the worker
    /// has finished.
    pub async fn next_event(&mut self) -> Option<BatchEvent> {
        self.events.recv().await
    }

    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Start a batch on a background task.
pub fn spawn_batch(spec: EncodeJobSpec, tools: ToolPaths) -> BatchHandle {
    let (tx, events) = mpsc::unbounded_channel();
    let cancel = CancelToken::new();
    let task = tokio::spawn(run_batch(spec, tools, tx, cancel.clone()));
    BatchHandle {
        events,
        cancel,
        task,
    }
}

fn emit(tx: &UnboundedSender<BatchEvent>, event: BatchEvent) {
    // A dropped receiver means nobody is listening anymore; the batch
    // still runs to completion.
    let _ = tx.send(event);
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_else(|| path.as_os_str())
        .to_string_lossy()
        .to_string()
}

/// Run a batch to completion, emitting events on `tx`. The terminal `Done`
/// event is emitted exactly once on every path out of this function.
pub async fn run_batch(
    spec: EncodeJobSpec,
    tools: ToolPaths,
    tx: UnboundedSender<BatchEvent>,
    cancel: CancelToken,
) {
    info!(
        "starting batch: {} file(s) -> {}",
        spec.files.len(),
        spec.output_dir.display()
    );

    match drive(&spec, &tools, &tx, &cancel).await {
        Ok(()) => {
            if cancel.is_cancelled() {
                emit(&tx, BatchEvent::LogLine("--- batch cancelled ---".to_string()));
            } else {
                emit(&tx, BatchEvent::LogLine("=== batch complete ===".to_string()));
            }
        }
        Err(e) => {
            error!("fatal batch error: {}", e);
            emit(&tx, BatchEvent::FatalError(e.to_string()));
        }
    }
    emit(&tx, BatchEvent::Done);
}

async fn drive(
    spec: &EncodeJobSpec,
    tools: &ToolPaths,
    tx: &UnboundedSender<BatchEvent>,
    cancel: &CancelToken,
) -> Result<(), EngineError> {
    fs::create_dir_all(&spec.output_dir).map_err(|source| EngineError::OutputDir {
        dir: spec.output_dir.clone(),
        source,
    })?;

    if spec.is_concat_batch() {
        run_concat(spec, tools, tx, cancel).await
    } else {
        run_files(spec, tools, tx, cancel).await
    }
}

async fn run_files(
    spec: &EncodeJobSpec,
    tools: &ToolPaths,
    tx: &UnboundedSender<BatchEvent>,
    cancel: &CancelToken,
) -> Result<(), EngineError> {
    let total = spec.files.len();

    for (i, source) in spec.files.iter().enumerate() {
        let index = i + 1;
        if cancel.is_cancelled() {
            debug!("cancelled, {} file(s) not attempted", total - i);
            break;
        }

        let filename = display_name(source);
        let dest = naming::output_name(spec, source);

        // The tool also receives -n in this case; the filesystem check
        // here and the tool's own refusal are deliberately redundant.
        if dest.exists() && !spec.overwrite {
            emit(
                tx,
                BatchEvent::LogLine(format!("[{}/{}] skip (exists): {}", index, total, filename)),
            );
            emit(
                tx,
                BatchEvent::FileFinished {
                    index,
                    total,
                    filename,
                    success: true,
                },
            );
            continue;
        }

        emit(
            tx,
            BatchEvent::FileStarted {
                index,
                total,
                filename: filename.clone(),
            },
        );
        emit(
            tx,
            BatchEvent::LogLine(format!("[{}/{}] encode: {}", index, total, filename)),
        );

        match encode_one(spec, tools, source, &dest, index, total, tx, cancel).await {
            Ok(success) => {
                emit(
                    tx,
                    BatchEvent::FileFinished {
                        index,
                        total,
                        filename,
                        success,
                    },
                );
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                // One file's failure never takes the batch down.
                warn!("item failed for {}: {}", source.display(), e);
                emit(tx, BatchEvent::LogLine(format!("[error] {}: {}", filename, e)));
                emit(
                    tx,
                    BatchEvent::FileFinished {
                        index,
                        total,
                        filename,
                        success: false,
                    },
                );
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn encode_one(
    spec: &EncodeJobSpec,
    tools: &ToolPaths,
    source: &Path,
    dest: &Path,
    index: usize,
    total: usize,
    tx: &UnboundedSender<BatchEvent>,
    cancel: &CancelToken,
) -> Result<bool, SupervisorError> {
    let probed = duration::probe_duration(&tools.ffprobe, source).await;
    let estimate = duration::estimated_duration(probed, spec.trim_for(source));

    let argv = command::compile_encode(spec, &tools.ffmpeg, source, dest);
    emit(
        tx,
        BatchEvent::LogLine(format!("> {}", command::render_command(&argv))),
    );

    let status = run_supervised(argv, estimate, index, total, tx, cancel).await?;
    let success = status.success() && !cancel.is_cancelled();

    if success {
        emit(
            tx,
            BatchEvent::LogLine(format!("done -> {}", display_name(dest))),
        );
    } else if !cancel.is_cancelled() {
        emit(
            tx,
            BatchEvent::LogLine(format!(
                "[warning] encoder exited with code {:?} on: {}",
                status.code(),
                display_name(source)
            )),
        );
    }

    Ok(success)
}

async fn run_concat(
    spec: &EncodeJobSpec,
    tools: &ToolPaths,
    tx: &UnboundedSender<BatchEvent>,
    cancel: &CancelToken,
) -> Result<(), EngineError> {
    let dest = naming::merged_output_name(spec);
    let filename = display_name(&dest);

    if dest.exists() && !spec.overwrite {
        emit(
            tx,
            BatchEvent::LogLine(format!("[1/1] skip (exists): {}", filename)),
        );
        emit(
            tx,
            BatchEvent::FileFinished {
                index: 1,
                total: 1,
                filename,
                success: true,
            },
        );
        return Ok(());
    }

    emit(
        tx,
        BatchEvent::FileStarted {
            index: 1,
            total: 1,
            filename: filename.clone(),
        },
    );
    emit(
        tx,
        BatchEvent::LogLine(format!(
            "[1/1] concatenate {} files -> {}",
            spec.files.len(),
            filename
        )),
    );

    let mut probed = Vec::with_capacity(spec.files.len());
    for file in &spec.files {
        probed.push(duration::probe_duration(&tools.ffprobe, file).await);
    }
    let estimate = sum_known_durations(probed);

    let list_path = dest.with_extension("list.txt");
    let guard = match command::write_concat_list(&list_path, &spec.files) {
        Ok(guard) => guard,
        Err(e) => {
            warn!("cannot write concat list {}: {}", list_path.display(), e);
            emit(
                tx,
                BatchEvent::LogLine(format!("[error] cannot write concat list: {}", e)),
            );
            emit(
                tx,
                BatchEvent::FileFinished {
                    index: 1,
                    total: 1,
                    filename,
                    success: false,
                },
            );
            return Ok(());
        }
    };

    let argv = command::compile_concat(spec, &tools.ffmpeg, guard.path(), &dest);
    emit(
        tx,
        BatchEvent::LogLine(format!("> {}", command::render_command(&argv))),
    );

    let status = match run_supervised(argv, estimate, 1, 1, tx, cancel).await {
        Ok(status) => status,
        // Guard drops on both paths, removing the list file.
        Err(e) if e.is_fatal() => return Err(e.into()),
        Err(e) => {
            warn!("concat job failed: {}", e);
            emit(tx, BatchEvent::LogLine(format!("[error] {}: {}", filename, e)));
            emit(
                tx,
                BatchEvent::FileFinished {
                    index: 1,
                    total: 1,
                    filename,
                    success: false,
                },
            );
            return Ok(());
        }
    };
    drop(guard);

    let success = status.success() && !cancel.is_cancelled();
    if success {
        emit(tx, BatchEvent::LogLine(format!("done -> {}", filename)));
    } else if !cancel.is_cancelled() {
        emit(
            tx,
            BatchEvent::LogLine(format!(
                "[warning] concat exited with code {:?}",
                status.code()
            )),
        );
    }
    emit(
        tx,
        BatchEvent::FileFinished {
            index: 1,
            total: 1,
            filename,
            success,
        },
    );

    Ok(())
}

/// Best-effort total for the concat progress estimate: sources whose probe
/// failed are left out of the sum; `None` only when nothing probed.
fn sum_known_durations(durations: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    let mut total = None;
    for d in durations.into_iter().flatten() {
        *total.get_or_insert(0.0) += d;
    }
    total
}

/// Progress reporting flags are prepended at execution time so the compiled
/// command itself stays exactly what was logged and tested.
const PROGRESS_ARGS: &[&str] = &["-progress", "pipe:1", "-nostats"];

async fn run_supervised(
    mut argv: Vec<String>,
    estimate: Option<f64>,
    index: usize,
    total: usize,
    tx: &UnboundedSender<BatchEvent>,
    cancel: &CancelToken,
) -> Result<std::process::ExitStatus, SupervisorError> {
    argv.splice(1..1, PROGRESS_ARGS.iter().map(|s| s.to_string()));

    let mut parser = ProgressParser::new(estimate);
    supervisor::run(&argv, cancel, |line| match parser.absorb(line) {
        LineClass::Flush(Some(fraction)) => emit(
            tx,
            BatchEvent::FileProgress {
                index,
                total,
                fraction,
            },
        ),
        LineClass::Flush(None) | LineClass::Swallowed => {}
        LineClass::Log => emit(tx, BatchEvent::LogLine(line.to_string())),
    })
    .await
}

enum LineClass {
    /// A `progress=` flush marker, carrying a fraction when one is known.
    Flush(Option<f64>),
    /// A progress key-value pair that was consumed.
    Swallowed,
    /// An ordinary tool output line.
    Log,
}

/// Separates `-progress pipe:1` key-value lines from ordinary tool output
/// and converts decode position into a completion fraction.
struct ProgressParser {
    estimate: Option<f64>,
    out_time_secs: Option<f64>,
}

impl ProgressParser {
    fn new(estimate: Option<f64>) -> Self {
        Self {
            estimate,
            out_time_secs: None,
        }
    }

    fn absorb(&mut self, line: &str) -> LineClass {
        let trimmed = line.trim();
        let Some((key, value)) = trimmed.split_once('=') else {
            return LineClass::Log;
        };
        if !is_progress_key(key) {
            return LineClass::Log;
        }
        match key {
            // out_time_ms is microseconds despite the name.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<u64>() {
                    self.out_time_secs = Some(us as f64 / 1_000_000.0);
                }
                LineClass::Swallowed
            }
            "out_time" => {
                if self.out_time_secs.is_none() {
                    if let Some(secs) = duration::parse_hms(value) {
                        self.out_time_secs = Some(secs);
                    }
                }
                LineClass::Swallowed
            }
            "progress" => LineClass::Flush(self.fraction()),
            _ => LineClass::Swallowed,
        }
    }

    fn fraction(&self) -> Option<f64> {
        match (self.out_time_secs, self.estimate) {
            (Some(t), Some(d)) if d > 0.0 => Some((t / d).clamp(0.0, 1.0)),
            _ => None,
        }
    }
}

fn is_progress_key(key: &str) -> bool {
    matches!(
        key,
        "frame"
            | "fps"
            | "bitrate"
            | "total_size"
            | "out_time_us"
            | "out_time_ms"
            | "out_time"
            | "dup_frames"
            | "drop_frames"
            | "speed"
            | "progress"
    ) || key.starts_with("stream_")
}
