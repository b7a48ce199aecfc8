use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extensions the CLI treats as video when expanding directory arguments.
const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "mov", "m4v", "webm", "ts", "flv", "wmv", "mpg", "mpeg",
];

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let lower = ext.to_lowercase();
            VIDEO_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

/// Expand a mixed list of files and directories into a flat file list.
/// Explicit file arguments pass through untouched; directories are walked
/// recursively and filtered by extension, with the results sorted for a
/// stable batch order.
pub fn expand_inputs(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for input in inputs {
        if input.is_dir() {
            let mut found = Vec::new();
            for entry in WalkDir::new(input).follow_links(false) {
                match entry {
                    Ok(entry) => {
                        if entry.file_type().is_file() && is_video_file(entry.path()) {
                            found.push(entry.path().to_path_buf());
                        }
                    }
                    Err(e) => {
                        warn!("error walking {}: {}", input.display(), e);
                    }
                }
            }
            found.sort();
            debug!("{}: {} video file(s)", input.display(), found.len());
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }

    files
}
