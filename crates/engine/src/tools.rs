//! Resolution of the external tool binaries. Resolution never fails: when
//! no PATH candidate exists the bare command name is returned and the
//! spawn itself surfaces the problem (which the runner treats as fatal).

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl ToolPaths {
    pub fn resolve() -> Self {
        Self {
            ffmpeg: resolve_tool("ffmpeg"),
            ffprobe: resolve_tool("ffprobe"),
        }
    }
}

/// Find `name` on PATH, falling back to the bare name.
pub fn resolve_tool(name: &str) -> PathBuf {
    if let Some(paths) = env::var_os("PATH") {
        for dir in env::split_paths(&paths) {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return candidate;
            }
            #[cfg(windows)]
            {
                let candidate = dir.join(format!("{}.exe", name));
                if candidate.is_file() {
                    return candidate;
                }
            }
        }
    }
    PathBuf::from(name)
}

/// Parse `ffmpeg -version` output into (major, minor, patch). Used only
/// for a startup log line; failure here is advisory.
pub fn ffmpeg_version(ffmpeg: &Path) -> Result<(u32, u32, u32)> {
    let output = Command::new(ffmpeg)
        .arg("-version")
        .output()
        .with_context(|| format!("failed to execute {} -version", ffmpeg.display()))?;

    if !output.status.success() {
        return Err(anyhow!("{} -version exited nonzero", ffmpeg.display()));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_version_output(&stdout)
}

fn parse_version_output(stdout: &str) -> Result<(u32, u32, u32)> {
    let re = Regex::new(r"ffmpeg version[^\d]*(\d+)\.(\d+)(?:\.(\d+))?").unwrap();
    let caps = re
        .captures(stdout)
        .ok_or_else(|| anyhow!("unrecognized ffmpeg version output"))?;

    let major: u32 = caps[1].parse().context("bad major version")?;
    let minor: u32 = caps[2].parse().context("bad minor version")?;
    let patch: u32 = caps
        .get(3)
        .map(|m| m.as_str().parse())
        .transpose()
        .context("bad patch version")?
        .unwrap_or(0);

    Ok((major, minor, patch))
}
