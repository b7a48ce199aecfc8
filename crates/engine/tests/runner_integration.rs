#![cfg(unix)]

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use vbatch_engine::naming;
use vbatch_engine::spec::{CodecParams, EncodeJobSpec, RateControl};
use vbatch_engine::tools::ToolPaths;
use vbatch_engine::{run_batch, spawn_batch, BatchEvent, CancelToken};

fn fake_tool(dir: &Path, name: &str, script: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

/// An encoder stand-in that creates its destination (the last argument)
/// and exits cleanly.
fn touching_encoder(dir: &Path) -> PathBuf {
    fake_tool(
        dir,
        "ffmpeg",
        "for last in \"$@\"; do :; done\ntouch \"$last\"\nexit 0",
    )
}

fn spec_for(files: Vec<PathBuf>, output_dir: PathBuf) -> EncodeJobSpec {
    EncodeJobSpec {
        files,
        output_dir,
        target_width: 1280,
        target_height: 720,
        video_codec: "libsvtav1".to_string(),
        params: CodecParams {
            preset: Some("8".to_string()),
            rate: RateControl::Quality {
                key: "crf".to_string(),
                value: "32".to_string(),
            },
            extras: vec![],
        },
        pixel_format: None,
        audio_codec: "copy".to_string(),
        subtitle_codec: "copy".to_string(),
        frame_rate: None,
        overwrite: false,
        container_override: None,
        trims: BTreeMap::new(),
        concatenate: false,
    }
}

fn tools_with(ffmpeg: PathBuf, dir: &Path) -> ToolPaths {
    // ffprobe is absent on purpose; duration probing is advisory.
    ToolPaths {
        ffmpeg,
        ffprobe: dir.join("no-such-ffprobe"),
    }
}

async fn collect(spec: EncodeJobSpec, tools: ToolPaths) -> Vec<BatchEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    timeout(
        Duration::from_secs(30),
        run_batch(spec, tools, tx, CancelToken::new()),
    )
    .await
    .expect("batch did not finish in time");

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn finished(events: &[BatchEvent]) -> Vec<(usize, bool)> {
    events
        .iter()
        .filter_map(|e| match e {
            BatchEvent::FileFinished { index, success, .. } => Some((*index, *success)),
            _ => None,
        })
        .collect()
}

fn started_indices(events: &[BatchEvent]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|e| match e {
            BatchEvent::FileStarted { index, .. } => Some(*index),
            _ => None,
        })
        .collect()
}

fn assert_done_last(events: &[BatchEvent]) {
    assert_eq!(events.last(), Some(&BatchEvent::Done), "{:?}", events);
    assert_eq!(
        events.iter().filter(|e| **e == BatchEvent::Done).count(),
        1,
        "Done must appear exactly once"
    );
}

#[tokio::test]
async fn existing_destination_is_skipped_mid_batch() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    fs::create_dir(&out).unwrap();

    let sources: Vec<PathBuf> = ["a.mkv", "b.mkv", "c.mkv"]
        .iter()
        .map(|n| {
            let p = dir.path().join(n);
            fs::write(&p, b"x").unwrap();
            p
        })
        .collect();

    let spec = spec_for(sources, out);
    // Pre-create the middle destination so only it is skipped.
    fs::write(naming::output_name(&spec, &spec.files[1]), b"").unwrap();

    let ffmpeg = touching_encoder(dir.path());
    let events = collect(spec, tools_with(ffmpeg, dir.path())).await;

    assert_done_last(&events);
    assert_eq!(finished(&events), vec![(1, true), (2, true), (3, true)]);
    // The skipped item never starts.
    assert_eq!(started_indices(&events), vec![1, 3]);
    assert!(events
        .iter()
        .any(|e| matches!(e, BatchEvent::LogLine(l) if l.contains("skip (exists)"))));
}

#[tokio::test]
async fn second_run_skips_everything() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let src = dir.path().join("a.mkv");
    fs::write(&src, b"x").unwrap();

    let spec = spec_for(vec![src], out);
    let ffmpeg = touching_encoder(dir.path());

    let first = collect(spec.clone(), tools_with(ffmpeg.clone(), dir.path())).await;
    assert_eq!(finished(&first), vec![(1, true)]);
    assert_eq!(started_indices(&first), vec![1]);

    let second = collect(spec, tools_with(ffmpeg, dir.path())).await;
    assert_done_last(&second);
    assert_eq!(finished(&second), vec![(1, true)]);
    assert!(started_indices(&second).is_empty());
}

#[tokio::test]
async fn nonzero_exit_fails_item_but_batch_continues() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let sources: Vec<PathBuf> = ["a.mkv", "b.mkv"]
        .iter()
        .map(|n| {
            let p = dir.path().join(n);
            fs::write(&p, b"x").unwrap();
            p
        })
        .collect();

    let ffmpeg = fake_tool(dir.path(), "ffmpeg", "exit 2");
    let events = collect(spec_for(sources, out), tools_with(ffmpeg, dir.path())).await;

    assert_done_last(&events);
    assert_eq!(finished(&events), vec![(1, false), (2, false)]);
    assert!(!events
        .iter()
        .any(|e| matches!(e, BatchEvent::FatalError(_))));
}

#[tokio::test]
async fn missing_tool_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let src = dir.path().join("a.mkv");
    fs::write(&src, b"x").unwrap();

    let missing = dir.path().join("no-such-ffmpeg");
    let events = collect(spec_for(vec![src], out), tools_with(missing, dir.path())).await;

    assert_done_last(&events);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, BatchEvent::FatalError(_)))
            .count(),
        1
    );
    assert!(finished(&events).is_empty());
}

#[tokio::test]
async fn uncreatable_output_dir_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    // A file where the output directory should go.
    let blocker = dir.path().join("out");
    fs::write(&blocker, b"").unwrap();
    let src = dir.path().join("a.mkv");
    fs::write(&src, b"x").unwrap();

    let ffmpeg = touching_encoder(dir.path());
    let events = collect(
        spec_for(vec![src], blocker.join("nested")),
        tools_with(ffmpeg, dir.path()),
    )
    .await;

    assert_done_last(&events);
    assert!(events
        .iter()
        .any(|e| matches!(e, BatchEvent::FatalError(_))));
    assert!(finished(&events).is_empty());
    assert!(started_indices(&events).is_empty());
}

#[tokio::test]
async fn cancellation_stops_remaining_files() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let sources: Vec<PathBuf> = ["a.mkv", "b.mkv"]
        .iter()
        .map(|n| {
            let p = dir.path().join(n);
            fs::write(&p, b"x").unwrap();
            p
        })
        .collect();

    let ffmpeg = fake_tool(dir.path(), "ffmpeg", "exec sleep 30");
    let mut handle = spawn_batch(spec_for(sources, out), tools_with(ffmpeg, dir.path()));

    let mut events = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(30), handle.next_event())
            .await
            .expect("batch stalled")
            .expect("channel closed before Done");
        let is_done = event == BatchEvent::Done;
        if matches!(event, BatchEvent::FileStarted { .. }) {
            handle.cancel();
        }
        events.push(event);
        if is_done {
            break;
        }
    }
    handle.join().await;

    assert_done_last(&events);
    assert_eq!(started_indices(&events), vec![1]);
    assert_eq!(finished(&events), vec![(1, false)]);
}

#[tokio::test]
async fn concat_emits_single_item_and_removes_list() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let sources: Vec<PathBuf> = ["a.mkv", "b.mkv"]
        .iter()
        .map(|n| {
            let p = dir.path().join(n);
            fs::write(&p, b"x").unwrap();
            p
        })
        .collect();

    let mut spec = spec_for(sources, out.clone());
    spec.concatenate = true;
    let merged = naming::merged_output_name(&spec);
    let list = merged.with_extension("list.txt");

    let ffmpeg = touching_encoder(dir.path());
    let events = collect(spec, tools_with(ffmpeg, dir.path())).await;

    assert_done_last(&events);
    assert_eq!(started_indices(&events), vec![1]);
    assert_eq!(finished(&events), vec![(1, true)]);
    assert!(!list.exists(), "concat list must be removed after the job");
}

#[tokio::test]
async fn tool_output_is_forwarded_as_log_lines() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let src = dir.path().join("a.mkv");
    fs::write(&src, b"x").unwrap();

    let ffmpeg = fake_tool(
        dir.path(),
        "ffmpeg",
        "echo \"hello from stdout\"\necho \"hello from stderr\" >&2\nexit 0",
    );
    let events = collect(spec_for(vec![src], out), tools_with(ffmpeg, dir.path())).await;

    assert!(events
        .iter()
        .any(|e| matches!(e, BatchEvent::LogLine(l) if l == "hello from stdout")));
    assert!(events
        .iter()
        .any(|e| matches!(e, BatchEvent::LogLine(l) if l == "hello from stderr")));
}

#[tokio::test]
async fn progress_lines_become_progress_events_not_logs() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let src = dir.path().join("a.mkv");
    fs::write(&src, b"x").unwrap();

    let ffmpeg = fake_tool(
        dir.path(),
        "ffmpeg",
        "echo \"frame=100\"\necho \"out_time_ms=1000000\"\necho \"progress=end\"\nexit 0",
    );
    let events = collect(spec_for(vec![src], out), tools_with(ffmpeg, dir.path())).await;

    assert!(!events
        .iter()
        .any(|e| matches!(e, BatchEvent::LogLine(l) if l.starts_with("frame="))));
    // No duration estimate here, so no FileProgress either; the key-value
    // stream is simply swallowed.
    assert!(!events
        .iter()
        .any(|e| matches!(e, BatchEvent::FileProgress { .. })));
    assert_eq!(finished(&events), vec![(1, true)]);
}
