//! Pure command-line compilation for the external encoding tool. Nothing
//! in here spawns a process; the compiled argument vector (program path
//! first) is handed to the supervisor unchanged.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::capability::{capability_for, GpuCapability};
use crate::spec::{EncodeJobSpec, RateControl};

/// Quality-mode keys that must never appear in a bitrate-mode command, in
/// any vendor's spelling.
pub const RESERVED_QUALITY_KEYS: &[&str] =
    &["crf", "qp", "q:v", "cq", "global_quality", "qp_i", "qp_p"];

fn push_pair(args: &mut Vec<String>, flag: &str, value: &str) {
    args.push(flag.to_string());
    args.push(value.to_string());
}

fn overwrite_flag(spec: &EncodeJobSpec) -> &'static str {
    // The runner also checks for an existing destination; the tool-side
    // flag is kept consistent so the two mechanisms cannot disagree on
    // intent even if they race on the filesystem.
    if spec.overwrite {
        "-y"
    } else {
        "-n"
    }
}

fn push_preset(args: &mut Vec<String>, spec: &EncodeJobSpec, cap: Option<&GpuCapability>) {
    if let Some(preset) = &spec.params.preset {
        let flag = match cap {
            Some(cap) => format!("-{}", cap.preset_flag),
            None => "-preset".to_string(),
        };
        args.push(flag);
        args.push(preset.trim().to_string());
    }
}

fn push_extras(args: &mut Vec<String>, spec: &EncodeJobSpec) {
    for (key, value) in &spec.params.extras {
        push_pair(args, &format!("-{}", key), value);
    }
}

/// Compile the argument vector for a single-file encode, including trim
/// and hardware-decode placement. Pure and deterministic.
pub fn compile_encode(
    spec: &EncodeJobSpec,
    ffmpeg: &Path,
    source: &Path,
    dest: &Path,
) -> Vec<String> {
    let cap = capability_for(&spec.video_codec);
    let trim = spec.trim_for(source);

    let mut args = vec![
        ffmpeg.to_string_lossy().to_string(),
        "-hide_banner".to_string(),
        overwrite_flag(spec).to_string(),
    ];

    // Trim start goes before -i so the demuxer fast-seeks instead of
    // decoding up to the start point.
    if let Some(start) = trim.and_then(|t| t.start.as_deref()) {
        push_pair(&mut args, "-ss", start.trim());
    }

    if let Some(accel) = cap.and_then(|c| c.decode_accel) {
        args.extend(accel.iter().map(|s| s.to_string()));
    }

    push_pair(&mut args, "-i", &source.to_string_lossy());

    // Trim end is an output option: it bounds how much gets decoded.
    if let Some(end) = trim.and_then(|t| t.end.as_deref()) {
        push_pair(&mut args, "-to", end.trim());
    }

    // Fixed stream selection: first video stream, all audio and subtitle
    // streams if present, metadata and chapters carried over.
    push_pair(&mut args, "-map_metadata", "0");
    push_pair(&mut args, "-map_chapters", "0");
    push_pair(&mut args, "-map", "0:v:0");
    push_pair(&mut args, "-map", "0:a?");
    push_pair(&mut args, "-map", "0:s?");

    push_pair(
        &mut args,
        "-vf",
        &format!("scale={}:{}", spec.target_width, spec.target_height),
    );
    push_pair(&mut args, "-c:v", &spec.video_codec);

    if let Some(fps) = &spec.frame_rate {
        if !fps.trim().is_empty() {
            push_pair(&mut args, "-r", fps.trim());
        }
    }

    match &spec.params.rate {
        RateControl::Bitrate { target } => {
            let target = target.trim();
            push_pair(&mut args, "-b:v", target);
            push_preset(&mut args, spec, cap);
            push_extras(&mut args, spec);
            match cap {
                Some(cap) => {
                    push_pair(&mut args, "-maxrate", target);
                    push_pair(&mut args, "-bufsize", target);
                    if let Some(mode) = cap.bitrate_rc_mode {
                        push_pair(&mut args, "-rc", mode);
                    }
                }
                None => {
                    // SVT-AV1 defaults to constant-quality rate control and
                    // rejects -b:v unless VBR is forced.
                    if spec.video_codec == "libsvtav1" {
                        push_pair(&mut args, "-svtav1-params", "rc=1");
                    }
                }
            }
        }
        RateControl::Quality { key, value } => {
            push_preset(&mut args, spec, cap);
            push_extras(&mut args, spec);
            let value = value.trim();
            match cap {
                Some(cap) => {
                    if let Some(mode) = cap.quality_rc_mode {
                        push_pair(&mut args, "-rc", mode);
                    }
                    push_pair(&mut args, &format!("-{}", cap.quality_flag), value);
                    if let Some(mirror) = cap.mirrored_quality_flag {
                        push_pair(&mut args, &format!("-{}", mirror), value);
                    }
                }
                None => {
                    push_pair(&mut args, &format!("-{}", key), value);
                }
            }
        }
    }

    if let Some(pix_fmt) = &spec.pixel_format {
        if !pix_fmt.trim().is_empty() {
            push_pair(&mut args, "-pix_fmt", pix_fmt.trim());
        }
    }

    push_pair(&mut args, "-c:a", &spec.audio_codec);
    push_pair(&mut args, "-c:s", &spec.subtitle_codec);
    args.push(dest.to_string_lossy().to_string());

    args
}

/// Compile the argument vector for the stream-copy concatenation job.
pub fn compile_concat(
    spec: &EncodeJobSpec,
    ffmpeg: &Path,
    list_file: &Path,
    dest: &Path,
) -> Vec<String> {
    let mut args = vec![
        ffmpeg.to_string_lossy().to_string(),
        "-hide_banner".to_string(),
        overwrite_flag(spec).to_string(),
    ];
    push_pair(&mut args, "-f", "concat");
    push_pair(&mut args, "-safe", "0");
    push_pair(&mut args, "-i", &list_file.to_string_lossy());
    push_pair(&mut args, "-c", "copy");
    args.push(dest.to_string_lossy().to_string());
    args
}

/// Escape a path for a concat-demuxer list line: single quotes become
/// `'\''`.
pub fn escape_concat_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "'\\''")
}

/// Removes the concat list file on drop, so cleanup happens on success,
/// failure, and cancellation alike.
#[derive(Debug)]
pub struct ConcatListGuard {
    path: PathBuf,
}

impl ConcatListGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ConcatListGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Write the concat-demuxer list file, one `file '<path>'` line per input.
pub fn write_concat_list(list_path: &Path, files: &[PathBuf]) -> std::io::Result<ConcatListGuard> {
    let mut out = fs::File::create(list_path)?;
    for file in files {
        writeln!(out, "file '{}'", escape_concat_path(file))?;
    }
    out.sync_all()?;
    Ok(ConcatListGuard {
        path: list_path.to_path_buf(),
    })
}

/// Render an argument vector for the log stream, quoting arguments that
/// contain spaces.
pub fn render_command(args: &[String]) -> String {
    args.iter()
        .map(|a| {
            if a.contains(' ') {
                format!("\"{}\"", a)
            } else {
                a.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
