use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{RenderError, Result};
use crate::profiles::ExportProfile;

pub type Rgb = [u8; 3];

pub const DEFAULT_GENERATOR: &str = "pulsing_core";

/// Inputs to one render job. Owned by the caller; the pipeline only
/// substitutes resolution and fps temporarily during a preview.
#[derive(Clone, Debug)]
pub struct RenderConfig {
    pub audio_path: PathBuf,
    pub output_path: PathBuf,
    pub generator: String,
    pub resolution: (u32, u32),
    pub fps: u32,
    pub colors: ColorPalette,
    pub postprocess: PostProcessParams,
    /// Overrides resolution, fps and encoder quality when set.
    pub profile: Option<ExportProfile>,
    pub encoder: EncoderSettings,
}

impl RenderConfig {
    pub fn new(audio_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            audio_path: audio_path.into(),
            output_path: output_path.into(),
            generator: DEFAULT_GENERATOR.to_string(),
            resolution: (default_width(), default_height()),
            fps: default_fps(),
            colors: ColorPalette::default(),
            postprocess: PostProcessParams::default(),
            profile: None,
            encoder: EncoderSettings::default(),
        }
    }

    pub fn effective_resolution(&self) -> (u32, u32) {
        self.profile.map_or(self.resolution, |p| p.resolution)
    }

    pub fn effective_fps(&self) -> u32 {
        self.profile.map_or(self.fps, |p| p.fps)
    }

    pub fn effective_encoder(&self) -> EncoderSettings {
        match self.profile {
            Some(p) => EncoderSettings {
                preset: p.preset.to_string(),
                crf: p.crf,
                audio_bitrate: p.audio_bitrate.to_string(),
            },
            None => self.encoder.clone(),
        }
    }

    /// Reject settings the encoder or post-processor cannot honour.
    pub fn validate(&self) -> Result<()> {
        let (w, h) = self.effective_resolution();
        if w == 0 || h == 0 {
            return Err(RenderError::InvalidConfig(format!("resolution {w}x{h} must be non-zero")));
        }
        if w % 2 != 0 || h % 2 != 0 {
            return Err(RenderError::InvalidConfig(format!(
                "resolution {w}x{h} must be even (required for yuv420p output)"
            )));
        }
        let fps = self.effective_fps();
        if fps == 0 || fps > 240 {
            return Err(RenderError::InvalidConfig(format!("fps {fps} must be within 1..=240")));
        }
        if self.encoder.crf > 51 {
            return Err(RenderError::InvalidConfig(format!(
                "crf {} must be within 0..=51",
                self.encoder.crf
            )));
        }
        if self.generator.trim().is_empty() {
            return Err(RenderError::InvalidConfig("generator id is empty".into()));
        }
        self.postprocess.validate().map_err(RenderError::InvalidConfig)
    }
}

/// x264 quality knobs plus the mux audio bitrate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncoderSettings {
    pub preset: String,
    pub crf: u8,
    pub audio_bitrate: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            preset: default_preset(),
            crf: default_crf(),
            audio_bitrate: default_audio_bitrate(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorPalette {
    pub primary: Rgb,
    pub secondary: Rgb,
    pub background: Rgb,
}

impl Default for ColorPalette {
    fn default() -> Self {
        Self {
            primary: [0xFF, 0x00, 0x55],
            secondary: [0x00, 0xCC, 0xFF],
            background: [0x0A, 0x0A, 0x0A],
        }
    }
}

impl ColorPalette {
    pub fn from_hex(primary: &str, secondary: &str, background: &str) -> std::result::Result<Self, String> {
        Ok(Self {
            primary: parse_hex(primary)?,
            secondary: parse_hex(secondary)?,
            background: parse_hex(background)?,
        })
    }
}

/// Parse `#rrggbb` or `#rgb` (leading `#` optional).
pub fn parse_hex(s: &str) -> std::result::Result<Rgb, String> {
    let hex = s.trim().trim_start_matches('#');
    let digits: Vec<u8> = hex
        .chars()
        .map(|c| c.to_digit(16).map(|d| d as u8))
        .collect::<Option<_>>()
        .ok_or_else(|| format!("invalid hex color '{s}'"))?;
    match digits.as_slice() {
        [r, g, b] => Ok([r * 17, g * 17, b * 17]),
        [r1, r0, g1, g0, b1, b0] => Ok([r1 * 16 + r0, g1 * 16 + g0, b1 * 16 + b0]),
        _ => Err(format!("invalid hex color '{s}': expected 3 or 6 digits")),
    }
}

/// Color grading parameters. Neutral values leave frames untouched.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct PostProcessParams {
    pub contrast: f32,
    pub saturation: f32,
    pub brightness: f32,
    pub grain: f32,
    pub vignette: f32,
    pub chromatic_aberration: f32,
    /// Seed for film grain; combined with the frame index.
    pub grain_seed: u64,
}

impl Default for PostProcessParams {
    fn default() -> Self {
        Self {
            contrast: 1.0,
            saturation: 1.0,
            brightness: 1.0,
            grain: 0.0,
            vignette: 0.0,
            chromatic_aberration: 0.0,
            grain_seed: 0,
        }
    }
}

impl PostProcessParams {
    pub fn is_neutral(&self) -> bool {
        self.contrast == 1.0
            && self.saturation == 1.0
            && self.brightness == 1.0
            && self.grain == 0.0
            && self.vignette == 0.0
            && self.chromatic_aberration == 0.0
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        let ranges = [
            ("contrast", self.contrast, 0.5, 2.0),
            ("saturation", self.saturation, 0.0, 2.0),
            ("brightness", self.brightness, 0.5, 2.0),
            ("grain", self.grain, 0.0, 1.0),
            ("vignette", self.vignette, 0.0, 1.0),
            ("chromatic_aberration", self.chromatic_aberration, 0.0, 5.0),
        ];
        for (name, value, lo, hi) in ranges {
            if !(lo..=hi).contains(&value) {
                return Err(format!("{name} {value} is outside {lo}..={hi}"));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TOML file configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub render: RenderSection,
    #[serde(default)]
    pub colors: ColorsConfig,
    #[serde(default)]
    pub postprocess: PostProcessParams,
}

#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_crf")]
    pub crf: u8,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    #[serde(default)]
    pub profile: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct RenderSection {
    #[serde(default = "default_generator")]
    pub generator: String,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

#[derive(Debug, Deserialize)]
pub struct ColorsConfig {
    #[serde(default = "default_primary")]
    pub primary: String,
    #[serde(default = "default_secondary")]
    pub secondary: String,
    #[serde(default = "default_background")]
    pub background: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            preset: default_preset(),
            crf: default_crf(),
            audio_bitrate: default_audio_bitrate(),
            profile: None,
        }
    }
}

impl Default for RenderSection {
    fn default() -> Self {
        Self {
            generator: default_generator(),
            parallel: false,
            workers: None,
            chunk_size: default_chunk_size(),
        }
    }
}

impl Default for ColorsConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            secondary: default_secondary(),
            background: default_background(),
        }
    }
}

pub fn default_width() -> u32 { 1920 }
pub fn default_height() -> u32 { 1080 }
pub fn default_fps() -> u32 { 30 }
pub fn default_preset() -> String { "medium".into() }
pub fn default_crf() -> u8 { 23 }
pub fn default_audio_bitrate() -> String { "320k".into() }
pub fn default_generator() -> String { DEFAULT_GENERATOR.into() }
pub fn default_chunk_size() -> usize { 10 }
pub fn default_primary() -> String { "#FF0055".into() }
pub fn default_secondary() -> String { "#00CCFF".into() }
pub fn default_background() -> String { "#0A0A0A".into() }

/// `vizcast.toml` in the working directory, else the per-user config file.
pub fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("vizcast.toml");
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|d| d.join("vizcast").join("config.toml"))
        .filter(|p| p.exists())
}

pub fn load_config(path: &Path) -> Option<FileConfig> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            log::warn!("Ignoring malformed config {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles;

    #[test]
    fn hex_parsing() {
        assert_eq!(parse_hex("#FF0055"), Ok([255, 0, 85]));
        assert_eq!(parse_hex("0a0a0a"), Ok([10, 10, 10]));
        assert_eq!(parse_hex("#fff"), Ok([255, 255, 255]));
        assert!(parse_hex("#12345").is_err());
        assert!(parse_hex("#zzzzzz").is_err());
        assert_eq!(
            ColorPalette::from_hex("#FF0055", "#00CCFF", "#0A0A0A"),
            Ok(ColorPalette::default())
        );
    }

    #[test]
    fn postprocess_ranges() {
        assert!(PostProcessParams::default().validate().is_ok());
        assert!(PostProcessParams::default().is_neutral());
        let bad = PostProcessParams {
            contrast: 3.0,
            ..Default::default()
        };
        assert!(bad.validate().unwrap_err().contains("contrast"));
        let bad = PostProcessParams {
            chromatic_aberration: 5.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn profile_overrides_without_mutating() {
        let mut cfg = RenderConfig::new("in.wav", "out.mp4");
        cfg.profile = profiles::find("instagram_feed");
        assert_eq!(cfg.effective_resolution(), (1080, 1080));
        assert_eq!(cfg.effective_fps(), 30);
        assert_eq!(cfg.effective_encoder().audio_bitrate, "128k");
        assert_eq!(cfg.resolution, (1920, 1080));
    }

    #[test]
    fn odd_resolution_is_rejected() {
        let mut cfg = RenderConfig::new("in.wav", "out.mp4");
        cfg.resolution = (321, 240);
        assert!(matches!(cfg.validate(), Err(RenderError::InvalidConfig(_))));
        cfg.resolution = (320, 240);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn toml_sections_default_independently() {
        let cfg: FileConfig = toml::from_str(
            r#"
            [output]
            fps = 60

            [render]
            parallel = true

            [postprocess]
            grain = 0.3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.output.fps, 60);
        assert_eq!(cfg.output.width, 1920);
        assert!(cfg.render.parallel);
        assert_eq!(cfg.render.chunk_size, 10);
        assert_eq!(cfg.postprocess.grain, 0.3);
        assert_eq!(cfg.postprocess.contrast, 1.0);
        assert_eq!(cfg.colors.primary, "#FF0055");
        assert!(cfg.analysis.cache_dir.is_none());
    }
}
