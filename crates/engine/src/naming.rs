//! Deterministic destination naming. The skip-if-exists policy relies on
//! two identical requests producing byte-identical paths, so every naming
//! input is folded in a fixed order: preset, quality value, extras, frame
//! rate, bitrate.

use std::path::{Path, PathBuf};

use crate::capability::capability_for;
use crate::spec::{EncodeJobSpec, RateControl};

/// Resolve the output container extension: explicit override, then a
/// hardware encoder's preferred container, then webm for libvpx-vp9, then
/// mkv.
pub fn container_extension(spec: &EncodeJobSpec) -> String {
    if let Some(ext) = &spec.container_override {
        return ext.trim_start_matches('.').to_string();
    }
    if let Some(cap) = capability_for(&spec.video_codec) {
        return cap.preferred_container.to_string();
    }
    if spec.video_codec == "libvpx-vp9" {
        return "webm".to_string();
    }
    "mkv".to_string()
}

fn quality_flag_name(spec: &EncodeJobSpec, key: &str) -> String {
    match capability_for(&spec.video_codec) {
        Some(cap) => cap.quality_flag.to_string(),
        None => key.to_string(),
    }
}

fn preset_flag_name(spec: &EncodeJobSpec) -> String {
    match capability_for(&spec.video_codec) {
        Some(cap) => cap.preset_flag.to_string(),
        None => "preset".to_string(),
    }
}

fn param_parts(spec: &EncodeJobSpec) -> Vec<String> {
    let mut parts = Vec::new();

    if let Some(preset) = &spec.params.preset {
        parts.push(format!("{}{}", preset_flag_name(spec), preset.trim()));
    }
    if let RateControl::Quality { key, value } = &spec.params.rate {
        parts.push(format!("{}{}", quality_flag_name(spec, key), value.trim()));
    }
    for (key, value) in &spec.params.extras {
        parts.push(format!("{}{}", key, value));
    }
    if let Some(fps) = &spec.frame_rate {
        if !fps.trim().is_empty() {
            parts.push(format!("{}fps", fps.trim()));
        }
    }
    if let RateControl::Bitrate { target } = &spec.params.rate {
        parts.push(format!("br{}", target.trim()));
    }

    parts
}

fn base_name(source: &Path) -> String {
    source
        .file_stem()
        .unwrap_or_else(|| source.as_os_str())
        .to_string_lossy()
        .to_string()
}

/// Destination path for one source file:
/// `<outdir>/<base>.<WxH>.<codec>[.<params>].<ext>`.
pub fn output_name(spec: &EncodeJobSpec, source: &Path) -> PathBuf {
    let base = base_name(source);
    let label = format!("{}x{}", spec.target_width, spec.target_height);
    let ext = container_extension(spec);

    let parts = param_parts(spec);
    let name = if parts.is_empty() {
        format!("{}.{}.{}.{}", base, label, spec.video_codec, ext)
    } else {
        format!(
            "{}.{}.{}.{}.{}",
            base,
            label,
            spec.video_codec,
            parts.join("."),
            ext
        )
    };

    spec.output_dir.join(name)
}

/// Destination path for the concatenation job:
/// `<outdir>/<first-file-base>.merged.<ext>`.
pub fn merged_output_name(spec: &EncodeJobSpec) -> PathBuf {
    let base = spec
        .files
        .first()
        .map(|f| base_name(f))
        .unwrap_or_else(|| "output".to_string());
    let ext = container_extension(spec);
    spec.output_dir.join(format!("{}.merged.{}", base, ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::CodecParams;
    use std::collections::BTreeMap;

    fn spec_with(codec: &str, rate: RateControl) -> EncodeJobSpec {
        EncodeJobSpec {
            files: vec![PathBuf::from("/in/a.mkv"), PathBuf::from("/in/b.mkv")],
            output_dir: PathBuf::from("/out"),
            target_width: 1280,
            target_height: 720,
            video_codec: codec.to_string(),
            params: CodecParams {
                preset: Some("8".to_string()),
                rate,
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

    fn crf32() -> RateControl {
        RateControl::Quality {
            key: "crf".to_string(),
            value: "32".to_string(),
        }
    }

    #[test]
    fn software_quality_name() {
        let spec = spec_with("libsvtav1", crf32());
        let path = output_name(&spec, Path::new("/in/movie.mkv"));
        assert_eq!(
            path,
            PathBuf::from("/out/movie.1280x720.libsvtav1.preset8.crf32.mkv")
        );
    }

    #[test]
    fn bitrate_and_fps_in_suffix_order() {
        let mut spec = spec_with(
            "libsvtav1",
            RateControl::Bitrate {
                target: "2M".to_string(),
            },
        );
        spec.frame_rate = Some("30".to_string());
        let path = output_name(&spec, Path::new("/in/movie.mkv"));
        assert_eq!(
            path,
            PathBuf::from("/out/movie.1280x720.libsvtav1.preset8.30fps.br2M.mkv")
        );
    }

    #[test]
    fn no_params_omits_suffix_segment() {
        let mut spec = spec_with("libx264", crf32());
        spec.params.preset = None;
        spec.params.rate = RateControl::Quality {
            key: "crf".to_string(),
            value: "23".to_string(),
        };
        spec.params.extras.clear();
        // Only the quality part remains.
        let path = output_name(&spec, Path::new("/in/clip.mp4"));
        assert_eq!(path, PathBuf::from("/out/clip.1280x720.libx264.crf23.mkv"));
    }

    #[test]
    fn hardware_codec_uses_capability_flag_and_container() {
        let mut spec = spec_with("hevc_nvenc", crf32());
        spec.params.preset = Some("p5".to_string());
        let path = output_name(&spec, Path::new("/in/movie.mkv"));
        assert_eq!(
            path,
            PathBuf::from("/out/movie.1280x720.hevc_nvenc.presetp5.cq32.mp4")
        );
    }

    #[test]
    fn vp9_prefers_webm() {
        let spec = spec_with("libvpx-vp9", crf32());
        let path = output_name(&spec, Path::new("/in/movie.mkv"));
        assert!(path.to_string_lossy().ends_with(".webm"));
    }

    #[test]
    fn container_override_wins() {
        let mut spec = spec_with("hevc_nvenc", crf32());
        spec.container_override = Some(".mov".to_string());
        assert_eq!(container_extension(&spec), "mov");
    }

    #[test]
    fn merged_name_uses_first_base() {
        let mut spec = spec_with("libsvtav1", crf32());
        spec.concatenate = true;
        assert_eq!(
            merged_output_name(&spec),
            PathBuf::from("/out/a.merged.mkv")
        );
    }

    #[test]
    fn deterministic() {
        let spec = spec_with("libsvtav1", crf32());
        let a = output_name(&spec, Path::new("/in/movie.mkv"));
        let b = output_name(&spec, Path::new("/in/movie.mkv"));
        assert_eq!(a, b);
    }
}
