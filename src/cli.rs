use clap::Parser;
use std::path::PathBuf;

use vizcast::config::{self, FileConfig};

#[derive(Parser, Debug)]
#[command(name = "vizcast", version, about = "Render audio-reactive videos from audio files")]
pub struct Cli {
    /// Input audio file (MP3, WAV, FLAC, AAC, OGG, M4A, WMA)
    pub input: Option<PathBuf>,

    /// Output video file
    #[arg(short, long, default_value = "output.mp4")]
    pub output: PathBuf,

    /// Frame generator id (see --list-generators)
    #[arg(short, long, default_value = config::DEFAULT_GENERATOR)]
    pub generator: String,

    /// Video width in pixels (must be even)
    #[arg(long, default_value_t = 1920)]
    pub width: u32,

    /// Video height in pixels (must be even)
    #[arg(long, default_value_t = 1080)]
    pub height: u32,

    /// Frames per second
    #[arg(long, default_value_t = 30)]
    pub fps: u32,

    /// x264 preset
    #[arg(long, default_value = "medium")]
    pub preset: String,

    /// H.264 CRF quality (0-51, lower = better)
    #[arg(long, default_value_t = 23)]
    pub crf: u8,

    /// AAC bitrate for the muxed audio track
    #[arg(long, default_value = "320k")]
    pub audio_bitrate: String,

    /// Export profile overriding resolution, fps and quality (see --list-profiles)
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Render a short low-resolution preview
    #[arg(long)]
    pub preview: bool,

    /// Preview length in seconds
    #[arg(long, default_value_t = 5.0)]
    pub preview_duration: f64,

    /// Render frames on a worker pool
    #[arg(long)]
    pub parallel: bool,

    /// Worker threads for --parallel (default: cores - 1)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Frames per worker chunk for --parallel
    #[arg(long, default_value_t = 10)]
    pub chunk_size: usize,

    /// Ignore cached audio features and re-analyze
    #[arg(long)]
    pub force_analyze: bool,

    /// Delete all cached audio features (exits unless an input is given)
    #[arg(long)]
    pub clear_cache: bool,

    /// Feature cache directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Config file (default: ./vizcast.toml or the user config directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// List frame generators and exit
    #[arg(long)]
    pub list_generators: bool,

    /// List export profiles and exit
    #[arg(long)]
    pub list_profiles: bool,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Primary color (#rrggbb)
    #[arg(long, default_value = "#FF0055")]
    pub primary: String,

    /// Secondary color (#rrggbb)
    #[arg(long, default_value = "#00CCFF")]
    pub secondary: String,

    /// Background color (#rrggbb)
    #[arg(long, default_value = "#0A0A0A")]
    pub background: String,

    /// Contrast gain (0.5-2.0)
    #[arg(long, default_value_t = 1.0)]
    pub contrast: f32,

    /// Saturation gain (0.0-2.0)
    #[arg(long, default_value_t = 1.0)]
    pub saturation: f32,

    /// Brightness gain (0.5-2.0)
    #[arg(long, default_value_t = 1.0)]
    pub brightness: f32,

    /// Film grain intensity (0.0-1.0)
    #[arg(long, default_value_t = 0.0)]
    pub grain: f32,

    /// Vignette intensity (0.0-1.0)
    #[arg(long, default_value_t = 0.0)]
    pub vignette: f32,

    /// Chromatic aberration intensity (0.0-5.0)
    #[arg(long, default_value_t = 0.0)]
    pub chromatic_aberration: f32,

    /// Seed for film grain noise
    #[arg(long, default_value_t = 0)]
    pub grain_seed: u64,
}

impl Cli {
    /// Config values apply only where the CLI is still at its default.
    pub fn merge(&mut self, cfg: FileConfig) {
        if self.width == 1920 { self.width = cfg.output.width; }
        if self.height == 1080 { self.height = cfg.output.height; }
        if self.fps == 30 { self.fps = cfg.output.fps; }
        if self.preset == "medium" { self.preset = cfg.output.preset; }
        if self.crf == 23 { self.crf = cfg.output.crf; }
        if self.audio_bitrate == "320k" { self.audio_bitrate = cfg.output.audio_bitrate; }
        if self.profile.is_none() { self.profile = cfg.output.profile; }
        if self.cache_dir.is_none() { self.cache_dir = cfg.analysis.cache_dir; }
        if self.generator == config::DEFAULT_GENERATOR { self.generator = cfg.render.generator; }
        if !self.parallel { self.parallel = cfg.render.parallel; }
        if self.workers.is_none() { self.workers = cfg.render.workers; }
        if self.chunk_size == 10 { self.chunk_size = cfg.render.chunk_size; }
        if self.primary == "#FF0055" { self.primary = cfg.colors.primary; }
        if self.secondary == "#00CCFF" { self.secondary = cfg.colors.secondary; }
        if self.background == "#0A0A0A" { self.background = cfg.colors.background; }

        let pp = cfg.postprocess;
        if self.contrast == 1.0 { self.contrast = pp.contrast; }
        if self.saturation == 1.0 { self.saturation = pp.saturation; }
        if self.brightness == 1.0 { self.brightness = pp.brightness; }
        if self.grain == 0.0 { self.grain = pp.grain; }
        if self.vignette == 0.0 { self.vignette = pp.vignette; }
        if self.chromatic_aberration == 0.0 { self.chromatic_aberration = pp.chromatic_aberration; }
        if self.grain_seed == 0 { self.grain_seed = pp.grain_seed; }
    }
}
