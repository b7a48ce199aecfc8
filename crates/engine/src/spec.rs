use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::capability::capability_for;
use crate::command::RESERVED_QUALITY_KEYS;
use crate::duration::parse_hms;

/// Quality keys the generic software path accepts. Hardware codecs ignore
/// the key and use their capability descriptor's flag instead.
const SOFTWARE_QUALITY_KEYS: &[&str] = &["crf", "qp", "q:v"];

/// Rate-control selection. Exactly one mode is active per batch; holding the
/// quality value and the bitrate target in one enum makes the
/// both-at-once misconfiguration unrepresentable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateControl {
    /// Constant-quality mode, e.g. `{ key = "crf", value = "32" }`.
    Quality { key: String, value: String },
    /// Target-bitrate mode, e.g. `{ target = "2M" }`.
    Bitrate { target: String },
}

impl RateControl {
    pub fn is_bitrate(&self) -> bool {
        matches!(self, RateControl::Bitrate { .. })
    }
}

/// Codec parameters in a fixed declaration order: preset, rate control,
/// then free-form extras. That order is also the output-filename suffix
/// order, which keeps destination paths deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecParams {
    #[serde(default)]
    pub preset: Option<String>,
    pub rate: RateControl,
    /// Additional `-<key> <value>` pairs (e.g. `tune`), emitted in order.
    #[serde(default)]
    pub extras: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrimWindow {
    /// `HH:MM:SS` start time; seeked on the input side.
    #[serde(default)]
    pub start: Option<String>,
    /// `HH:MM:SS` end time; bounds decoding on the output side.
    #[serde(default)]
    pub end: Option<String>,
}

/// A declarative batch encoding request, constructed once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeJobSpec {
    pub files: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub target_width: u32,
    pub target_height: u32,
    /// Software codec name or a hardware variant like `hevc_nvenc`.
    pub video_codec: String,
    pub params: CodecParams,
    #[serde(default)]
    pub pixel_format: Option<String>,
    #[serde(default = "default_copy")]
    pub audio_codec: String,
    #[serde(default = "default_copy")]
    pub subtitle_codec: String,
    #[serde(default)]
    pub frame_rate: Option<String>,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub container_override: Option<String>,
    #[serde(default)]
    pub trims: BTreeMap<PathBuf, TrimWindow>,
    #[serde(default)]
    pub concatenate: bool,
}

fn default_copy() -> String {
    "copy".to_string()
}

impl EncodeJobSpec {
    pub fn trim_for(&self, source: &Path) -> Option<&TrimWindow> {
        self.trims.get(source)
    }

    /// True when the batch collapses into a single stream-copy
    /// concatenation job instead of per-file encodes.
    pub fn is_concat_batch(&self) -> bool {
        self.concatenate && self.files.len() > 1
    }

    pub fn validate(&self) -> Result<()> {
        if self.files.is_empty() {
            anyhow::bail!("files cannot be empty");
        }
        if self.target_width == 0 || self.target_height == 0 {
            anyhow::bail!("target resolution must be positive");
        }
        if self.video_codec.trim().is_empty() {
            anyhow::bail!("video_codec cannot be empty");
        }

        match &self.params.rate {
            RateControl::Quality { key, value } => {
                if value.trim().is_empty() {
                    anyhow::bail!("quality value cannot be empty");
                }
                if capability_for(&self.video_codec).is_none()
                    && !SOFTWARE_QUALITY_KEYS.contains(&key.as_str())
                {
                    anyhow::bail!(
                        "unknown quality key '{}' (expected one of {:?})",
                        key,
                        SOFTWARE_QUALITY_KEYS
                    );
                }
            }
            RateControl::Bitrate { target } => {
                if target.trim().is_empty() {
                    anyhow::bail!("bitrate target cannot be empty");
                }
            }
        }

        if let Some(preset) = &self.params.preset {
            if preset.trim().is_empty() {
                anyhow::bail!("preset cannot be empty when set");
            }
        }

        for (key, value) in &self.params.extras {
            if key.trim().is_empty() || value.trim().is_empty() {
                anyhow::bail!("extra codec parameters must have non-empty key and value");
            }
            if RESERVED_QUALITY_KEYS.contains(&key.as_str()) {
                anyhow::bail!(
                    "'{}' is a rate-control key and cannot be passed as an extra parameter",
                    key
                );
            }
        }

        for (path, trim) in &self.trims {
            for time in [trim.start.as_deref(), trim.end.as_deref()].into_iter().flatten() {
                if parse_hms(time).is_none() {
                    anyhow::bail!(
                        "invalid trim time '{}' for {} (expected HH:MM:SS)",
                        time,
                        path.display()
                    );
                }
            }
        }

        Ok(())
    }
}
