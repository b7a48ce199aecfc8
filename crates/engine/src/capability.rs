//! Static capability descriptors for hardware-accelerated encoders.
//!
//! The orchestrator never probes hardware itself; it only consumes these
//! read-only descriptors. Software codecs have no entry and take the
//! generic command path.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
}

#[derive(Debug, Clone, Copy)]
pub struct GpuCapability {
    pub vendor: GpuVendor,
    /// Flag name for the speed/quality preset (`preset` for NVENC/QSV,
    /// `quality` for AMF).
    pub preset_flag: &'static str,
    pub preset_values: &'static [&'static str],
    /// Flag name for the constant-quality value (`cq`, `qp_i`, `global_quality`).
    pub quality_flag: &'static str,
    pub quality_range: (u32, u32),
    /// Rate-control mode that must accompany the quality flag for the value
    /// to take effect, if the encoder needs one.
    pub quality_rc_mode: Option<&'static str>,
    /// Second quality flag that must mirror the first (AMF requires matching
    /// I-frame and P-frame quantizers).
    pub mirrored_quality_flag: Option<&'static str>,
    /// Rate-control mode appended in target-bitrate mode. QSV has no `-rc`
    /// option; its driver picks the mode from `-b:v`/`-maxrate`.
    pub bitrate_rc_mode: Option<&'static str>,
    /// Decode-acceleration arguments inserted immediately before `-i`.
    pub decode_accel: Option<&'static [&'static str]>,
    pub max_bit_depth: u8,
    pub preferred_container: &'static str,
}

const NVENC_PRESETS: &[&str] = &["p1", "p2", "p3", "p4", "p5", "p6", "p7"];
const AMF_PRESETS: &[&str] = &["speed", "balanced", "quality"];
const QSV_PRESETS: &[&str] = &[
    "veryfast", "faster", "fast", "medium", "slow", "slower", "veryslow",
];

const NVENC_DECODE: &[&str] = &["-hwaccel", "cuda"];
const QSV_DECODE: &[&str] = &["-hwaccel", "qsv"];

const fn nvenc(max_bit_depth: u8) -> GpuCapability {
    GpuCapability {
        vendor: GpuVendor::Nvidia,
        preset_flag: "preset",
        preset_values: NVENC_PRESETS,
        quality_flag: "cq",
        quality_range: (0, 51),
        quality_rc_mode: Some("vbr"),
        mirrored_quality_flag: None,
        bitrate_rc_mode: Some("cbr"),
        decode_accel: Some(NVENC_DECODE),
        max_bit_depth,
        preferred_container: "mp4",
    }
}

const fn amf(max_bit_depth: u8) -> GpuCapability {
    GpuCapability {
        vendor: GpuVendor::Amd,
        preset_flag: "quality",
        preset_values: AMF_PRESETS,
        quality_flag: "qp_i",
        quality_range: (0, 51),
        quality_rc_mode: Some("cqp"),
        mirrored_quality_flag: Some("qp_p"),
        bitrate_rc_mode: Some("vbr_peak"),
        decode_accel: None,
        max_bit_depth,
        preferred_container: "mp4",
    }
}

const fn qsv(max_bit_depth: u8) -> GpuCapability {
    GpuCapability {
        vendor: GpuVendor::Intel,
        preset_flag: "preset",
        preset_values: QSV_PRESETS,
        quality_flag: "global_quality",
        quality_range: (1, 51),
        quality_rc_mode: None,
        mirrored_quality_flag: None,
        bitrate_rc_mode: None,
        decode_accel: Some(QSV_DECODE),
        max_bit_depth,
        preferred_container: "mp4",
    }
}

// H.264 hardware encoders are 8-bit only across all three vendors.
static CAPABILITIES: &[(&str, GpuCapability)] = &[
    ("h264_nvenc", nvenc(8)),
    ("hevc_nvenc", nvenc(10)),
    ("av1_nvenc", nvenc(10)),
    ("h264_amf", amf(8)),
    ("hevc_amf", amf(10)),
    ("av1_amf", amf(10)),
    ("h264_qsv", qsv(8)),
    ("hevc_qsv", qsv(10)),
    ("av1_qsv", qsv(10)),
];

/// Look up the capability descriptor for a codec identifier. Returns `None`
/// for software codecs.
pub fn capability_for(codec: &str) -> Option<&'static GpuCapability> {
    CAPABILITIES
        .iter()
        .find(|(name, _)| *name == codec)
        .map(|(_, cap)| cap)
}

pub fn is_hardware_codec(codec: &str) -> bool {
    capability_for(codec).is_some()
}
