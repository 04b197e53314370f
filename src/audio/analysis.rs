use std::path::Path;

use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};

use super::decode::{self, AudioData};
use super::features::{FeatureMatrix, PITCH_CLASSES, TEMPOGRAM_BINS, TIMBRE_COEFFS};
use crate::error::AnalysisError;

const FFT_SIZE: usize = 2048;
/// Long window used by the precise tone-profile algorithm.
const TONE_FFT_SIZE: usize = 8192;
const MEL_BANDS: usize = 26;
const ROLLOFF_PERCENT: f32 = 0.85;
/// Lowest and highest pitch tracked for the tone profile (C1..C8).
const TONE_MIN_HZ: f32 = 32.70;
const TONE_MAX_HZ: f32 = 4186.0;
/// Tempo used when too few beats are found.
pub const DEFAULT_TEMPO: f32 = 120.0;

/// Tone profile algorithm. `Fast` reuses the main STFT; `Precise` runs a
/// second, longer FFT for better low-frequency pitch resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToneAlgorithm {
    Precise,
    Fast,
}

/// Knobs for one extraction pass.
#[derive(Clone, Debug)]
pub struct ExtractParams {
    /// Samples between analysis frames.
    pub hop_length: usize,
    pub tone: ToneAlgorithm,
    /// Cepstral coefficients to compute; the rest of the 13 rows stay zero.
    pub timbre_coeffs: usize,
    /// When `false` the tempogram is zero-filled.
    pub tempogram: bool,
}

/// Unnormalized analysis output at the internal frame rate.
#[derive(Clone, Debug)]
pub struct RawFeatures {
    pub loudness: Vec<f32>,
    pub onset: Vec<f32>,
    pub spectral_centroid: Vec<f32>,
    pub spectral_rolloff: Vec<f32>,
    pub zero_crossing_rate: Vec<f32>,
    pub tone_profile: FeatureMatrix,
    pub timbre: FeatureMatrix,
    pub tempogram: FeatureMatrix,
    pub tempo: f32,
}

impl RawFeatures {
    pub fn frames(&self) -> usize {
        self.loudness.len()
    }
}

/// Numerical audio analysis used by the feature extractor.
///
/// Implementations must be deterministic for a given input.
pub trait AudioAnalysis: Send + Sync {
    fn probe_duration(&self, path: &Path) -> Option<f64>;
    fn decode(&self, path: &Path, target_rate: Option<u32>) -> Result<AudioData, AnalysisError>;
    fn extract(&self, audio: &AudioData, params: &ExtractParams) -> RawFeatures;
    /// Mean spectral bandwidth in Hz.
    fn spectral_bandwidth(&self, samples: &[f32], sample_rate: u32) -> f32;
}

/// STFT-based analysis on top of symphonia decoding and rustfft.
#[derive(Clone, Debug, Default)]
pub struct SpectralAnalyzer;

impl AudioAnalysis for SpectralAnalyzer {
    fn probe_duration(&self, path: &Path) -> Option<f64> {
        decode::probe_duration(path)
    }

    fn decode(&self, path: &Path, target_rate: Option<u32>) -> Result<AudioData, AnalysisError> {
        decode::decode_audio(path, target_rate)
    }

    fn extract(&self, audio: &AudioData, params: &ExtractParams) -> RawFeatures {
        extract_features(audio, params)
    }

    fn spectral_bandwidth(&self, samples: &[f32], sample_rate: u32) -> f32 {
        mean_bandwidth(samples, sample_rate)
    }
}

struct FrameStats {
    rms: f32,
    zcr: f32,
    centroid: f32,
    rolloff: f32,
    magnitudes: Vec<f32>,
    tone: [f32; PITCH_CLASSES],
    cepstrum: Vec<f32>,
}

fn extract_features(audio: &AudioData, params: &ExtractParams) -> RawFeatures {
    let samples = &audio.samples;
    let sr = audio.sample_rate;
    let hop = params.hop_length.max(1);
    let n_frames = samples.len() / hop + 1;
    let hann = hann_window(FFT_SIZE);
    let tone_hann = hann_window(TONE_FFT_SIZE);
    let mel = mel_filterbank(sr, FFT_SIZE, MEL_BANDS);
    let coeffs = params.timbre_coeffs.min(TIMBRE_COEFFS);

    log::debug!(
        "STFT: {} frames, hop {}, tone={:?}, timbre coeffs={}",
        n_frames,
        hop,
        params.tone,
        coeffs
    );

    let stats: Vec<FrameStats> = (0..n_frames)
        .into_par_iter()
        .map_init(FftPlanner::<f32>::new, |planner, frame_idx| {
            let center = frame_idx * hop;
            let magnitudes = windowed_magnitudes(planner, samples, center, &hann);
            let window = raw_window(samples, center, FFT_SIZE);

            let tone = match params.tone {
                ToneAlgorithm::Fast => tone_from_magnitudes(&magnitudes, sr, FFT_SIZE),
                ToneAlgorithm::Precise => {
                    let long = windowed_magnitudes(planner, samples, center, &tone_hann);
                    tone_from_magnitudes(&long, sr, TONE_FFT_SIZE)
                }
            };

            FrameStats {
                rms: rms(window),
                zcr: zero_crossing_rate(window),
                centroid: centroid(&magnitudes, sr, FFT_SIZE),
                rolloff: rolloff(&magnitudes, sr, FFT_SIZE),
                cepstrum: cepstrum(&magnitudes, &mel, coeffs),
                tone,
                magnitudes,
            }
        })
        .collect();

    // Spectral flux needs the previous frame, so it runs sequentially.
    let mut onset = vec![0.0f32; n_frames];
    for i in 1..n_frames {
        onset[i] = stats[i]
            .magnitudes
            .iter()
            .zip(stats[i - 1].magnitudes.iter())
            .map(|(cur, prev)| (cur - prev).max(0.0))
            .sum();
    }

    let flux_values: Vec<(f32, f32)> = onset
        .iter()
        .enumerate()
        .map(|(i, &f)| ((i * hop) as f32 / sr as f32, f))
        .collect();
    let beat_times = detect_beats(&flux_values);
    let tempo = estimate_tempo(&beat_times);

    let mut tone_profile = FeatureMatrix::zeros(PITCH_CLASSES, n_frames);
    let mut timbre = FeatureMatrix::zeros(TIMBRE_COEFFS, n_frames);
    for (c, s) in stats.iter().enumerate() {
        for (pc, &v) in s.tone.iter().enumerate() {
            tone_profile.set(pc, c, v);
        }
        for (k, &v) in s.cepstrum.iter().enumerate() {
            timbre.set(k, c, v);
        }
    }
    tone_profile.normalize_columns();

    let tempogram = if params.tempogram {
        tempogram(&onset)
    } else {
        FeatureMatrix::zeros(TEMPOGRAM_BINS, n_frames)
    };

    log::info!(
        "Analysis: {} frames, {} beats, tempo={:.1} BPM",
        n_frames,
        beat_times.len(),
        tempo
    );

    RawFeatures {
        loudness: stats.iter().map(|s| s.rms).collect(),
        spectral_centroid: stats.iter().map(|s| s.centroid).collect(),
        spectral_rolloff: stats.iter().map(|s| s.rolloff).collect(),
        zero_crossing_rate: stats.iter().map(|s| s.zcr).collect(),
        onset,
        tone_profile,
        timbre,
        tempogram,
        tempo,
    }
}

fn raw_window(samples: &[f32], center: usize, size: usize) -> &[f32] {
    let start = center.saturating_sub(size / 2).min(samples.len());
    let end = (start + size).min(samples.len());
    &samples[start..end]
}

fn windowed_magnitudes(
    planner: &mut FftPlanner<f32>,
    samples: &[f32],
    center: usize,
    window: &[f32],
) -> Vec<f32> {
    let size = window.len();
    let fft = planner.plan_fft_forward(size);
    let raw = raw_window(samples, center, size);

    let mut buffer = vec![Complex::new(0.0f32, 0.0); size];
    for (i, &s) in raw.iter().enumerate() {
        buffer[i] = Complex::new(s * window[i], 0.0);
    }
    fft.process(&mut buffer);

    buffer[..size / 2].iter().map(|c| c.norm()).collect()
}

fn rms(window: &[f32]) -> f32 {
    if window.is_empty() {
        return 0.0;
    }
    (window.iter().map(|s| s * s).sum::<f32>() / window.len() as f32).sqrt()
}

fn zero_crossing_rate(window: &[f32]) -> f32 {
    if window.len() < 2 {
        return 0.0;
    }
    let crossings = window
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / window.len() as f32
}

fn bin_hz(bin: usize, sample_rate: u32, fft_size: usize) -> f32 {
    bin as f32 * sample_rate as f32 / fft_size as f32
}

fn centroid(magnitudes: &[f32], sample_rate: u32, fft_size: usize) -> f32 {
    let total: f32 = magnitudes.iter().sum();
    if total <= 1e-10 {
        return 0.0;
    }
    magnitudes
        .iter()
        .enumerate()
        .map(|(i, &m)| bin_hz(i, sample_rate, fft_size) * m)
        .sum::<f32>()
        / total
}

fn rolloff(magnitudes: &[f32], sample_rate: u32, fft_size: usize) -> f32 {
    let total: f32 = magnitudes.iter().sum();
    if total <= 1e-10 {
        return 0.0;
    }
    let threshold = total * ROLLOFF_PERCENT;
    let mut acc = 0.0f32;
    for (i, &m) in magnitudes.iter().enumerate() {
        acc += m;
        if acc >= threshold {
            return bin_hz(i, sample_rate, fft_size);
        }
    }
    bin_hz(magnitudes.len().saturating_sub(1), sample_rate, fft_size)
}

fn tone_from_magnitudes(magnitudes: &[f32], sample_rate: u32, fft_size: usize) -> [f32; PITCH_CLASSES] {
    let mut tone = [0.0f32; PITCH_CLASSES];
    for (i, &m) in magnitudes.iter().enumerate().skip(1) {
        let hz = bin_hz(i, sample_rate, fft_size);
        if !(TONE_MIN_HZ..=TONE_MAX_HZ).contains(&hz) {
            continue;
        }
        let midi = 69.0 + 12.0 * (hz / 440.0).log2();
        let pc = (midi.round() as i64).rem_euclid(PITCH_CLASSES as i64) as usize;
        tone[pc] += m * m;
    }
    tone
}

/// Triangular mel filters as `(bin, weight)` lists.
fn mel_filterbank(sample_rate: u32, fft_size: usize, bands: usize) -> Vec<Vec<(usize, f32)>> {
    let hz_to_mel = |hz: f32| 2595.0 * (1.0 + hz / 700.0).log10();
    let mel_to_hz = |mel: f32| 700.0 * (10f32.powf(mel / 2595.0) - 1.0);

    let nyquist = sample_rate as f32 / 2.0;
    let max_mel = hz_to_mel(nyquist);
    let edges: Vec<f32> = (0..bands + 2)
        .map(|i| mel_to_hz(max_mel * i as f32 / (bands + 1) as f32))
        .collect();
    let half = fft_size / 2;

    (0..bands)
        .map(|b| {
            let (lo, mid, hi) = (edges[b], edges[b + 1], edges[b + 2]);
            (0..half)
                .filter_map(|k| {
                    let hz = bin_hz(k, sample_rate, fft_size);
                    let w = if hz > lo && hz <= mid {
                        (hz - lo) / (mid - lo)
                    } else if hz > mid && hz < hi {
                        (hi - hz) / (hi - mid)
                    } else {
                        0.0
                    };
                    (w > 0.0).then_some((k, w))
                })
                .collect()
        })
        .collect()
}

/// Log-mel energies followed by a DCT-II, truncated to `coeffs`.
fn cepstrum(magnitudes: &[f32], mel: &[Vec<(usize, f32)>], coeffs: usize) -> Vec<f32> {
    if coeffs == 0 {
        return Vec::new();
    }
    let log_mel: Vec<f32> = mel
        .iter()
        .map(|filter| {
            let energy: f32 = filter
                .iter()
                .map(|&(k, w)| magnitudes.get(k).map_or(0.0, |m| m * m) * w)
                .sum();
            (energy + 1e-10).ln()
        })
        .collect();
    let n = log_mel.len() as f32;
    (0..coeffs)
        .map(|k| {
            log_mel
                .iter()
                .enumerate()
                .map(|(i, &v)| {
                    v * (std::f32::consts::PI * k as f32 * (i as f32 + 0.5) / n).cos()
                })
                .sum::<f32>()
        })
        .collect()
}

/// Local autocorrelation of the onset envelope, one column per frame.
fn tempogram(onset: &[f32]) -> FeatureMatrix {
    let n = onset.len();
    let mut out = FeatureMatrix::zeros(TEMPOGRAM_BINS, n);
    let half = TEMPOGRAM_BINS;
    for t in 0..n {
        let start = t.saturating_sub(half);
        let end = (t + half).min(n);
        let win = &onset[start..end];
        let zero_lag: f32 = win.iter().map(|v| v * v).sum();
        if zero_lag <= 1e-10 {
            continue;
        }
        for lag in 0..TEMPOGRAM_BINS.min(win.len()) {
            let acf: f32 = win.iter().zip(win[lag..].iter()).map(|(a, b)| a * b).sum();
            out.set(lag, t, acf / zero_lag);
        }
    }
    out
}

fn mean_bandwidth(samples: &[f32], sample_rate: u32) -> f32 {
    const HOP: usize = 512;
    if samples.is_empty() {
        return 0.0;
    }
    let hann = hann_window(FFT_SIZE);
    let mut planner = FftPlanner::<f32>::new();
    let mut total = 0.0f32;
    let mut count = 0usize;
    let mut center = 0;
    while center < samples.len() {
        let mags = windowed_magnitudes(&mut planner, samples, center, &hann);
        let sum: f32 = mags.iter().sum();
        if sum > 1e-10 {
            let c = centroid(&mags, sample_rate, FFT_SIZE);
            let var = mags
                .iter()
                .enumerate()
                .map(|(i, &m)| m * (bin_hz(i, sample_rate, FFT_SIZE) - c).powi(2))
                .sum::<f32>()
                / sum;
            total += var.sqrt();
        }
        count += 1;
        center += HOP;
    }
    total / count.max(1) as f32
}

fn detect_beats(flux_values: &[(f32, f32)]) -> Vec<f32> {
    if flux_values.is_empty() {
        return Vec::new();
    }

    let window = 20;
    let mut beat_times = Vec::new();

    for i in 0..flux_values.len() {
        let start = i.saturating_sub(window);
        let end = (i + window + 1).min(flux_values.len());
        let local_mean: f32 =
            flux_values[start..end].iter().map(|(_, f)| f).sum::<f32>() / (end - start) as f32;

        let threshold = local_mean * 1.5 + 0.01;

        if flux_values[i].1 > threshold {
            let is_peak = (i == 0 || flux_values[i].1 >= flux_values[i - 1].1)
                && (i == flux_values.len() - 1 || flux_values[i].1 >= flux_values[i + 1].1);

            // Minimum gap between beats (100ms)
            let far_enough = beat_times
                .last()
                .map_or(true, |&last: &f32| flux_values[i].0 - last > 0.1);

            if is_peak && far_enough {
                beat_times.push(flux_values[i].0);
            }
        }
    }

    beat_times
}

fn estimate_tempo(beat_times: &[f32]) -> f32 {
    if beat_times.len() < 2 {
        return DEFAULT_TEMPO;
    }

    // Filter reasonable intervals (60-200 BPM → 0.3-1.0s)
    let mut reasonable: Vec<f32> = beat_times
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|&i| (0.3..=1.0).contains(&i))
        .collect();

    if reasonable.is_empty() {
        return DEFAULT_TEMPO;
    }

    reasonable.sort_by(f32::total_cmp);
    60.0 / reasonable[reasonable.len() / 2]
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sr: u32, secs: f32) -> AudioData {
        let n = (sr as f32 * secs) as usize;
        AudioData {
            samples: (0..n)
                .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sr as f32).sin() * 0.5)
                .collect(),
            sample_rate: sr,
        }
    }

    fn params(hop: usize, tone: ToneAlgorithm) -> ExtractParams {
        ExtractParams {
            hop_length: hop,
            tone,
            timbre_coeffs: TIMBRE_COEFFS,
            tempogram: true,
        }
    }

    #[test]
    fn sine_tone_profile_peaks_at_its_pitch_class() {
        // A4 = 440 Hz → pitch class 9.
        let audio = sine(440.0, 22_050, 1.0);
        for algo in [ToneAlgorithm::Fast, ToneAlgorithm::Precise] {
            let raw = SpectralAnalyzer.extract(&audio, &params(735, algo));
            let mid = raw.frames() / 2;
            let column = raw.tone_profile.column(mid);
            let best = column
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i);
            assert_eq!(best, Some(9), "{algo:?}");
            assert!((column[9] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn all_series_share_frame_count() {
        let audio = sine(220.0, 22_050, 0.5);
        let raw = SpectralAnalyzer.extract(&audio, &params(512, ToneAlgorithm::Fast));
        let n = raw.frames();
        assert_eq!(n, audio.samples.len() / 512 + 1);
        assert_eq!(raw.onset.len(), n);
        assert_eq!(raw.spectral_rolloff.len(), n);
        assert_eq!(raw.zero_crossing_rate.len(), n);
        assert_eq!(raw.tone_profile.cols(), n);
        assert_eq!(raw.timbre.cols(), n);
        assert_eq!(raw.tempogram.cols(), n);
    }

    #[test]
    fn disabled_tempogram_and_reduced_timbre_are_zero_filled() {
        let audio = sine(220.0, 22_050, 0.5);
        let p = ExtractParams {
            hop_length: 512,
            tone: ToneAlgorithm::Fast,
            timbre_coeffs: 8,
            tempogram: false,
        };
        let raw = SpectralAnalyzer.extract(&audio, &p);
        assert!(raw.tempogram.as_slice().iter().all(|&v| v == 0.0));
        for row in 8..TIMBRE_COEFFS {
            assert!(raw.timbre.row(row).iter().all(|&v| v == 0.0));
        }
        assert!(raw.timbre.row(0).iter().any(|&v| v != 0.0));
    }

    #[test]
    fn centroid_tracks_sine_frequency() {
        let audio = sine(1000.0, 22_050, 0.5);
        let raw = SpectralAnalyzer.extract(&audio, &params(512, ToneAlgorithm::Fast));
        let mid = raw.spectral_centroid[raw.frames() / 2];
        assert!((mid - 1000.0).abs() < 150.0, "centroid {mid}");
    }

    #[test]
    fn tempo_defaults_without_beats() {
        assert_eq!(estimate_tempo(&[]), DEFAULT_TEMPO);
        assert_eq!(estimate_tempo(&[0.0, 0.05]), DEFAULT_TEMPO);
        let t = estimate_tempo(&[0.0, 0.5, 1.0, 1.5]);
        assert!((t - 120.0).abs() < 1e-3);
    }

    #[test]
    fn zcr_of_alternating_signal_is_high() {
        let alt: Vec<f32> = (0..100).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert!(zero_crossing_rate(&alt) > 0.9);
        assert_eq!(zero_crossing_rate(&[1.0; 10]), 0.0);
    }
}
