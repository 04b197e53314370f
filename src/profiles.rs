//! Platform export presets that override resolution, fps and encoder quality.

/// Bitrate suggested when a profile has no file-size limit.
const DEFAULT_BITRATE_KBPS: u32 = 8000;
const MIN_BITRATE_KBPS: u32 = 1000;
const MAX_BITRATE_KBPS: u32 = 20_000;
/// Audio bitrate assumed when budgeting a size-limited upload.
const BUDGET_AUDIO_KBPS: f64 = 128.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExportProfile {
    /// Identifier used on the command line and in config files.
    pub id: &'static str,
    pub name: &'static str,
    pub resolution: (u32, u32),
    pub fps: u32,
    pub aspect_ratio: &'static str,
    pub preset: &'static str,
    pub crf: u8,
    pub audio_bitrate: &'static str,
    /// Seconds; longer renders are allowed but warned about.
    pub max_duration: Option<u32>,
    /// Megabytes.
    pub max_file_size: Option<u32>,
    pub description: &'static str,
}

pub const PROFILES: [ExportProfile; 7] = [
    ExportProfile {
        id: "youtube",
        name: "YouTube (1080p)",
        resolution: (1920, 1080),
        fps: 60,
        aspect_ratio: "16:9",
        preset: "slow",
        crf: 18,
        audio_bitrate: "320k",
        max_duration: None,
        max_file_size: None,
        description: "Full HD upload quality",
    },
    ExportProfile {
        id: "youtube_4k",
        name: "YouTube (4K)",
        resolution: (3840, 2160),
        fps: 60,
        aspect_ratio: "16:9",
        preset: "medium",
        crf: 20,
        audio_bitrate: "320k",
        max_duration: None,
        max_file_size: None,
        description: "4K upload quality",
    },
    ExportProfile {
        id: "instagram_feed",
        name: "Instagram Feed",
        resolution: (1080, 1080),
        fps: 30,
        aspect_ratio: "1:1",
        preset: "medium",
        crf: 23,
        audio_bitrate: "128k",
        max_duration: Some(60),
        max_file_size: Some(100),
        description: "Square feed post",
    },
    ExportProfile {
        id: "instagram_reels",
        name: "Instagram Reels",
        resolution: (1080, 1920),
        fps: 30,
        aspect_ratio: "9:16",
        preset: "medium",
        crf: 23,
        audio_bitrate: "128k",
        max_duration: Some(90),
        max_file_size: Some(100),
        description: "Vertical reel",
    },
    ExportProfile {
        id: "tiktok",
        name: "TikTok",
        resolution: (1080, 1920),
        fps: 30,
        aspect_ratio: "9:16",
        preset: "fast",
        crf: 25,
        audio_bitrate: "128k",
        max_duration: Some(180),
        max_file_size: Some(287),
        description: "Vertical short, fast upload",
    },
    ExportProfile {
        id: "tiktok_hd",
        name: "TikTok (HD)",
        resolution: (1080, 1920),
        fps: 60,
        aspect_ratio: "9:16",
        preset: "medium",
        crf: 20,
        audio_bitrate: "192k",
        max_duration: Some(180),
        max_file_size: Some(287),
        description: "Vertical short, high quality",
    },
    ExportProfile {
        id: "custom",
        name: "Custom",
        resolution: (1920, 1080),
        fps: 60,
        aspect_ratio: "16:9",
        preset: "medium",
        crf: 23,
        audio_bitrate: "320k",
        max_duration: None,
        max_file_size: None,
        description: "General purpose 1080p60",
    },
];

/// Look a profile up by id or display name, case-insensitively.
pub fn find(name: &str) -> Option<ExportProfile> {
    PROFILES
        .iter()
        .find(|p| p.id.eq_ignore_ascii_case(name) || p.name.eq_ignore_ascii_case(name))
        .copied()
}

pub fn ids() -> Vec<&'static str> {
    PROFILES.iter().map(|p| p.id).collect()
}

impl ExportProfile {
    /// Video bitrate that keeps a `duration_secs` render under the file-size
    /// limit, clamped to 1000..=20000 kbps.
    pub fn recommended_bitrate_kbps(&self, duration_secs: f64) -> u32 {
        let Some(max_mb) = self.max_file_size else {
            return DEFAULT_BITRATE_KBPS;
        };
        if duration_secs <= 0.0 {
            return MAX_BITRATE_KBPS;
        }
        let audio_kb = duration_secs * BUDGET_AUDIO_KBPS / 8.0;
        let video_kb = max_mb as f64 * 1024.0 - audio_kb;
        let kbps = (video_kb * 8.0 / duration_secs).floor();
        kbps.clamp(MIN_BITRATE_KBPS as f64, MAX_BITRATE_KBPS as f64) as u32
    }

    /// `true` when `duration_secs` exceeds the platform limit.
    pub fn exceeds_duration(&self, duration_secs: f64) -> bool {
        self.max_duration.is_some_and(|max| duration_secs > max as f64)
    }
}
