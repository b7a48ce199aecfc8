use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

use vbatch_engine::scan;
use vbatch_engine::tools;
use vbatch_engine::{
    spawn_batch, BatchEvent, CodecParams, EncodeJobSpec, RateControl, ToolPaths, TrimWindow,
};

#[derive(Parser, Debug)]
#[command(name = "vbatch")]
#[command(about = "Batch video transcoder driving ffmpeg", long_about = None)]
#[command(version)]
struct Args {
    /// Input video files or directories (directories are walked recursively)
    inputs: Vec<PathBuf>,

    /// Load the whole job from a TOML file instead of flags
    #[arg(short, long, value_name = "FILE", conflicts_with_all = ["inputs", "output_dir"])]
    job_file: Option<PathBuf>,

    /// Directory for encoded outputs
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Target width in pixels
    #[arg(short = 'W', long, default_value_t = 1280)]
    width: u32,

    /// Target height in pixels
    #[arg(short = 'H', long, default_value_t = 720)]
    height: u32,

    /// Video codec (software like libsvtav1, or hardware like hevc_nvenc)
    #[arg(short, long, default_value = "libsvtav1")]
    codec: String,

    /// Encoder preset
    #[arg(short, long)]
    preset: Option<String>,

    /// Constant-quality value (crf for software codecs, the vendor flag
    /// for hardware codecs)
    #[arg(long, conflicts_with = "bitrate")]
    crf: Option<String>,

    /// Quality key for software codecs (crf, qp or q:v)
    #[arg(long, default_value = "crf")]
    quality_key: String,

    /// Target bitrate, e.g. 2M
    #[arg(short, long)]
    bitrate: Option<String>,

    /// Extra codec parameter as KEY=VALUE, repeatable
    #[arg(long = "extra", value_name = "KEY=VALUE")]
    extras: Vec<String>,

    /// Output pixel format, e.g. yuv420p10le
    #[arg(long)]
    pix_fmt: Option<String>,

    /// Output frame rate
    #[arg(long)]
    fps: Option<String>,

    /// Audio codec, copy by default
    #[arg(long, default_value = "copy")]
    audio_codec: String,

    /// Subtitle codec, copy by default
    #[arg(long, default_value = "copy")]
    subtitle_codec: String,

    /// Output container extension override, e.g. mp4
    #[arg(long)]
    container: Option<String>,

    /// Overwrite existing destinations instead of skipping them
    #[arg(short = 'y', long)]
    overwrite: bool,

    /// Stream-copy all inputs into one merged file instead of encoding
    #[arg(long)]
    concat: bool,

    /// Trim window as FILE=START or FILE=START..END (HH:MM:SS), repeatable
    #[arg(long = "trim", value_name = "FILE=START[..END]")]
    trims: Vec<String>,
}

fn parse_extra(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("--extra expects KEY=VALUE, got '{}'", raw))?;
    if key.trim().is_empty() || value.trim().is_empty() {
        bail!("--extra expects non-empty KEY=VALUE, got '{}'", raw);
    }
    Ok((key.trim().to_string(), value.trim().to_string()))
}

fn parse_trim(raw: &str) -> Result<(PathBuf, TrimWindow)> {
    let (file, window) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("--trim expects FILE=START[..END], got '{}'", raw))?;
    if file.trim().is_empty() || window.trim().is_empty() {
        bail!("--trim expects FILE=START[..END], got '{}'", raw);
    }

    let (start, end) = match window.split_once("..") {
        Some((start, end)) => (start.trim(), Some(end.trim())),
        None => (window.trim(), None),
    };

    let window = TrimWindow {
        start: (!start.is_empty()).then(|| start.to_string()),
        end: end.filter(|e| !e.is_empty()).map(str::to_string),
    };
    if window.start.is_none() && window.end.is_none() {
        bail!("--trim needs at least a start or an end time: '{}'", raw);
    }
    Ok((PathBuf::from(file.trim()), window))
}

fn spec_from_args(args: &Args) -> Result<EncodeJobSpec> {
    if let Some(job_file) = &args.job_file {
        let text = fs::read_to_string(job_file)
            .with_context(|| format!("cannot read job file {}", job_file.display()))?;
        let spec: EncodeJobSpec = toml::from_str(&text)
            .with_context(|| format!("cannot parse job file {}", job_file.display()))?;
        return Ok(spec);
    }

    if args.inputs.is_empty() {
        bail!("no input files given (and no --job-file)");
    }
    let output_dir = args
        .output_dir
        .clone()
        .ok_or_else(|| anyhow!("--output-dir is required"))?;

    let files = scan::expand_inputs(&args.inputs);
    if files.is_empty() {
        bail!("no video files found under the given inputs");
    }

    let rate = match (&args.crf, &args.bitrate) {
        (_, Some(target)) => RateControl::Bitrate {
            target: target.clone(),
        },
        (Some(value), None) => RateControl::Quality {
            key: args.quality_key.clone(),
            value: value.clone(),
        },
        (None, None) => RateControl::Quality {
            key: args.quality_key.clone(),
            value: "32".to_string(),
        },
    };

    let extras = args
        .extras
        .iter()
        .map(|raw| parse_extra(raw))
        .collect::<Result<Vec<_>>>()?;

    let mut trims = BTreeMap::new();
    for raw in &args.trims {
        let (file, window) = parse_trim(raw)?;
        trims.insert(file, window);
    }

    Ok(EncodeJobSpec {
        files,
        output_dir,
        target_width: args.width,
        target_height: args.height,
        video_codec: args.codec.clone(),
        params: CodecParams {
            preset: args.preset.clone(),
            rate,
            extras,
        },
        pixel_format: args.pix_fmt.clone(),
        audio_codec: args.audio_codec.clone(),
        subtitle_codec: args.subtitle_codec.clone(),
        frame_rate: args.fps.clone(),
        overwrite: args.overwrite,
        container_override: args.container.clone(),
        trims,
        concatenate: args.concat,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_ansi(true)
        .init();

    let args = Args::parse();
    let spec = spec_from_args(&args)?;
    spec.validate()?;

    let tool_paths = ToolPaths::resolve();
    match tools::ffmpeg_version(&tool_paths.ffmpeg) {
        Ok((major, minor, patch)) => {
            info!("ffmpeg version: {}.{}.{}", major, minor, patch);
        }
        Err(e) => {
            warn!("could not determine ffmpeg version: {}", e);
        }
    }
    info!(
        "{} file(s) -> {} ({}, {}x{})",
        spec.files.len(),
        spec.output_dir.display(),
        spec.video_codec,
        spec.target_width,
        spec.target_height
    );

    let mut handle = spawn_batch(spec, tool_paths);
    let cancel = handle.cancel_token();

    let mut fatal: Option<String> = None;
    let mut failed = 0usize;
    let mut last_pct: Option<u32> = None;

    loop {
        let event = tokio::select! {
            event = handle.next_event() => match event {
                Some(event) => event,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupt received, cancelling batch");
                cancel.cancel();
                continue;
            }
        };

        match event {
            BatchEvent::LogLine(line) => info!("{}", line),
            BatchEvent::FileStarted { .. } => {
                last_pct = None;
            }
            BatchEvent::FileProgress {
                index,
                total,
                fraction,
            } => {
                let pct = (fraction * 100.0) as u32;
                if last_pct != Some(pct) {
                    last_pct = Some(pct);
                    info!("[{}/{}] {}%", index, total, pct);
                }
            }
            BatchEvent::FileFinished { success, .. } => {
                if !success {
                    failed += 1;
                }
            }
            BatchEvent::FatalError(message) => {
                fatal = Some(message);
            }
            BatchEvent::Done => break,
        }
    }
    handle.join().await;

    if let Some(message) = fatal {
        return Err(anyhow!(message));
    }
    if failed > 0 {
        return Err(anyhow!("{} file(s) failed", failed));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_parses_key_value() {
        assert_eq!(
            parse_extra("tune=0").unwrap(),
            ("tune".to_string(), "0".to_string())
        );
        assert!(parse_extra("tune").is_err());
        assert!(parse_extra("=3").is_err());
    }

    #[test]
    fn trim_parses_start_only() {
        let (file, window) = parse_trim("a.mkv=00:01:00").unwrap();
        assert_eq!(file, PathBuf::from("a.mkv"));
        assert_eq!(window.start.as_deref(), Some("00:01:00"));
        assert_eq!(window.end, None);
    }

    #[test]
    fn trim_parses_start_and_end() {
        let (_, window) = parse_trim("a.mkv=00:01:00..00:02:00").unwrap();
        assert_eq!(window.start.as_deref(), Some("00:01:00"));
        assert_eq!(window.end.as_deref(), Some("00:02:00"));
    }

    #[test]
    fn trim_parses_end_only() {
        let (_, window) = parse_trim("a.mkv=..00:02:00").unwrap();
        assert_eq!(window.start, None);
        assert_eq!(window.end.as_deref(), Some("00:02:00"));
    }

    #[test]
    fn trim_rejects_empty_window() {
        assert!(parse_trim("a.mkv=").is_err());
        assert!(parse_trim("a.mkv").is_err());
    }
}
