use std::fs;
use std::path::Path;

use super::analysis::{AudioAnalysis, ExtractParams, SpectralAnalyzer, ToneAlgorithm};
use super::cache::{CacheKey, FeatureStore};
use super::features::{
    normalize_min_max, resample_linear, target_frame_count, AnalysisStrategy, ContentMode,
    FeatureTimeline, PITCH_CLASSES, PITCH_NAMES, TIMBRE_COEFFS,
};
use crate::error::AnalysisError;

/// Inputs above this size use the memory-bounded strategy.
pub const STANDARD_MAX_BYTES: u64 = 200 * 1024 * 1024;
/// Inputs longer than this use the memory-bounded strategy.
pub const STANDARD_MAX_SECONDS: f64 = 600.0;
pub const BOUNDED_SAMPLE_RATE: u32 = 22_050;
pub const LONG_HOP_FACTOR: usize = 4;
pub const MIN_HOP: usize = 512;
/// Key estimation is skipped at or above this duration.
pub const KEY_CEILING_SECONDS: f64 = 600.0;
/// Audio prefix used for mode classification.
pub const MODE_PREFIX_SECONDS: f64 = 5.0;
const REDUCED_TIMBRE_SECONDS: f64 = 300.0;
const REDUCED_TIMBRE_COEFFS: usize = 8;

// Krumhansl-Kessler probe-tone ratings, tonic first.
const MAJOR_PROFILE: [f32; PITCH_CLASSES] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];
const MINOR_PROFILE: [f32; PITCH_CLASSES] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

/// Turns an audio file into a cached, frame-aligned [`FeatureTimeline`].
pub struct FeatureExtractor {
    store: FeatureStore,
    analysis: Box<dyn AudioAnalysis>,
}

impl FeatureExtractor {
    pub fn new(store: FeatureStore) -> Self {
        Self::with_analysis(store, Box::new(SpectralAnalyzer))
    }

    pub fn with_analysis(store: FeatureStore, analysis: Box<dyn AudioAnalysis>) -> Self {
        Self { store, analysis }
    }

    pub fn store(&self) -> &FeatureStore {
        &self.store
    }

    /// Return the timeline for `path` at `fps`, from the cache when possible.
    ///
    /// Cache problems never fail the call: an unreadable artifact is
    /// recomputed and a failed write is only logged.
    pub fn analyze(&self, path: &Path, fps: u32, force: bool) -> Result<FeatureTimeline, AnalysisError> {
        let open_err = |source| AnalysisError::Open {
            path: path.to_path_buf(),
            source,
        };
        let size = fs::metadata(path).map_err(open_err)?.len();
        let key = CacheKey::for_file(path, fps).map_err(open_err)?;

        if force {
            log::info!("[cache] forced re-analysis of {}", path.display());
        } else {
            match self.store.load(&key) {
                Ok(Some(timeline)) if timeline.fps == fps && timeline.is_aligned() => {
                    log::info!("[cache] hit for {} ({} frames)", path.display(), timeline.frame_count());
                    return Ok(timeline);
                }
                Ok(Some(_)) => log::warn!("[cache] artifact {} is misaligned, recomputing", key),
                Ok(None) => log::info!("[cache] miss for {}", path.display()),
                Err(e) => log::warn!("[cache] unreadable artifact {}: {}; recomputing", key, e),
            }
        }

        let probed = self.analysis.probe_duration(path);
        let strategy = choose_strategy(size, probed);
        log::info!(
            "Analyzing {} ({:.1} MB, {}) with {:?} strategy",
            path.display(),
            size as f64 / (1024.0 * 1024.0),
            probed.map_or_else(|| "unknown duration".to_string(), |d| format!("{d:.1}s")),
            strategy
        );

        let timeline = self.compute(path, fps, strategy)?;

        if let Err(e) = self.store.store(&key, &timeline) {
            log::warn!("[cache] could not save features for {}: {}", path.display(), e);
        }
        Ok(timeline)
    }

    fn compute(&self, path: &Path, fps: u32, strategy: AnalysisStrategy) -> Result<FeatureTimeline, AnalysisError> {
        let bounded = strategy == AnalysisStrategy::MemoryBounded;
        let audio = self
            .analysis
            .decode(path, bounded.then_some(BOUNDED_SAMPLE_RATE))?;
        let duration = audio.duration();

        let mut hop = (audio.sample_rate / fps.max(1)) as usize;
        hop = hop.max(MIN_HOP);
        if bounded && duration > STANDARD_MAX_SECONDS {
            hop *= LONG_HOP_FACTOR;
        }
        let params = ExtractParams {
            hop_length: hop,
            tone: if bounded { ToneAlgorithm::Fast } else { ToneAlgorithm::Precise },
            timbre_coeffs: if bounded && duration > REDUCED_TIMBRE_SECONDS {
                REDUCED_TIMBRE_COEFFS
            } else {
                TIMBRE_COEFFS
            },
            tempogram: !bounded,
        };
        log::debug!("extract params: {:?}", params);

        let raw = self.analysis.extract(&audio, &params);
        let frames = target_frame_count(duration, fps);

        let onset = normalize_min_max(&raw.onset);
        let align = |values: &[f32]| resample_linear(&normalize_min_max(values), frames);

        let prefix_len = ((MODE_PREFIX_SECONDS * audio.sample_rate as f64) as usize).min(audio.samples.len());
        let bandwidth = self
            .analysis
            .spectral_bandwidth(&audio.samples[..prefix_len], audio.sample_rate);
        let mode = classify_mode(raw.tempo, std_dev(&onset), bandwidth);

        let key = if duration < KEY_CEILING_SECONDS {
            estimate_key(&raw.tone_profile.row_means())
        } else {
            log::info!("Skipping key estimation for {:.0}s input", duration);
            None
        };

        let timeline = FeatureTimeline {
            duration,
            sample_rate: audio.sample_rate,
            fps,
            loudness: align(&raw.loudness),
            onset_strength: resample_linear(&onset, frames),
            spectral_centroid: align(&raw.spectral_centroid),
            spectral_rolloff: align(&raw.spectral_rolloff),
            zero_crossing_rate: align(&raw.zero_crossing_rate),
            tone_profile: raw.tone_profile.resample(frames),
            timbre: raw.timbre.resample(frames),
            tempogram: raw.tempogram.resample(frames),
            tempo: raw.tempo,
            key,
            mode,
            strategy,
        };

        log::info!(
            "Features ready: {} frames @ {}fps, tempo {:.1} BPM, key {}, {:?}",
            timeline.frame_count(),
            fps,
            timeline.tempo,
            timeline.key.as_deref().unwrap_or("n/a"),
            timeline.mode
        );
        Ok(timeline)
    }
}

/// Memory-bounded for inputs over 200 MB or 600 s; an unknown duration
/// only counts against the size limit.
pub fn choose_strategy(size_bytes: u64, duration: Option<f64>) -> AnalysisStrategy {
    if size_bytes > STANDARD_MAX_BYTES || duration.is_some_and(|d| d > STANDARD_MAX_SECONDS) {
        AnalysisStrategy::MemoryBounded
    } else {
        AnalysisStrategy::Standard
    }
}

/// Music needs a plausible tempo, varied onsets and a wide spectrum.
pub fn classify_mode(tempo: f32, onset_std: f32, bandwidth_hz: f32) -> ContentMode {
    if tempo > 60.0 && onset_std > 0.1 && bandwidth_hz > 2000.0 {
        ContentMode::Music
    } else {
        ContentMode::Speech
    }
}

/// Best Krumhansl-Kessler match for a mean tone profile, e.g. `"A minor"`.
/// `None` when the profile carries no energy.
pub fn estimate_key(chroma: &[f32]) -> Option<String> {
    if chroma.len() != PITCH_CLASSES || chroma.iter().sum::<f32>() <= 1e-6 {
        return None;
    }

    let mut best: Option<(f32, usize, &str)> = None;
    for tonic in 0..PITCH_CLASSES {
        for (profile, quality) in [(&MAJOR_PROFILE, "major"), (&MINOR_PROFILE, "minor")] {
            let rotated: Vec<f32> = (0..PITCH_CLASSES)
                .map(|pc| profile[(pc + PITCH_CLASSES - tonic) % PITCH_CLASSES])
                .collect();
            let r = pearson(chroma, &rotated);
            if best.map_or(true, |(score, _, _)| r > score) {
                best = Some((r, tonic, quality));
            }
        }
    }
    best.map(|(_, tonic, quality)| format!("{} {}", PITCH_NAMES[tonic], quality))
}

fn pearson(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len() as f32;
    let mean_a = a.iter().sum::<f32>() / n;
    let mean_b = b.iter().sum::<f32>() / n;
    let (mut cov, mut var_a, mut var_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    let denom = (var_a * var_b).sqrt();
    if denom < 1e-12 {
        0.0
    } else {
        cov / denom
    }
}

fn std_dev(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n).sqrt()
}
