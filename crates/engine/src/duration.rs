//! Best-effort source duration estimation. Used only for progress
//! fractions; every failure path degrades to `None` instead of an error so
//! a broken probe can never block or fail a job.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::warn;

use crate::spec::TrimWindow;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Query a file's duration in seconds via ffprobe. Missing binary, timeout,
/// nonzero exit, and unparseable output all yield `None`.
pub async fn probe_duration(ffprobe: &Path, file: &Path) -> Option<f64> {
    probe_with_timeout(ffprobe, file, PROBE_TIMEOUT).await
}

async fn probe_with_timeout(ffprobe: &Path, file: &Path, limit: Duration) -> Option<f64> {
    // kill_on_drop: a timed-out probe child must not outlive the batch.
    let output = Command::new(ffprobe)
        .arg("-v")
        .arg("quiet")
        .arg("-print_format")
        .arg("json")
        .arg("-show_format")
        .arg(file)
        .kill_on_drop(true)
        .output();

    let output = match timeout(limit, output).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!("duration probe failed for {}: {}", file.display(), e);
            return None;
        }
        Err(_) => {
            warn!("duration probe timed out for {}", file.display());
            return None;
        }
    };

    if !output.status.success() {
        warn!(
            "duration probe exited with {:?} for {}",
            output.status.code(),
            file.display()
        );
        return None;
    }

    let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout).ok()?;
    parsed.format?.duration?.parse::<f64>().ok()
}

/// Parse a `HH:MM:SS` (optionally fractional seconds) timestamp into
/// seconds.
pub fn parse_hms(value: &str) -> Option<f64> {
    let parts: Vec<&str> = value.trim().split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours = parts[0].parse::<u32>().ok()?;
    let minutes = parts[1].parse::<u32>().ok()?;
    let seconds = parts[2].parse::<f64>().ok()?;
    if minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return None;
    }
    Some(f64::from(hours) * 3600.0 + f64::from(minutes) * 60.0 + seconds)
}

/// Adjust a probed source duration for a trim window.
///
/// A trim end wins outright: the estimate is `end - start` regardless of
/// the probed value. A lone trim start subtracts from a known duration.
/// Results are floored at zero.
pub fn estimated_duration(source: Option<f64>, trim: Option<&TrimWindow>) -> Option<f64> {
    let trim = match trim {
        Some(trim) => trim,
        None => return source,
    };

    let start = trim.start.as_deref().and_then(parse_hms).unwrap_or(0.0);
    if let Some(end) = trim.end.as_deref().and_then(parse_hms) {
        return Some((end - start).max(0.0));
    }
    if trim.start.is_some() {
        return source.map(|d| (d - start).max(0.0));
    }
    source
}
