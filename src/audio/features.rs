use serde::{Deserialize, Serialize};

/// Number of pitch classes in a tone profile column.
pub const PITCH_CLASSES: usize = 12;
/// Rows in the timbre matrix (cepstral coefficients).
pub const TIMBRE_COEFFS: usize = 13;
/// Rows in the tempogram (onset autocorrelation lags).
pub const TEMPOGRAM_BINS: usize = 64;

pub const PITCH_NAMES: [&str; PITCH_CLASSES] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Coarse content classification of the source audio.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentMode {
    Music,
    Speech,
    Hybrid,
}

/// How the timeline was computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStrategy {
    Standard,
    MemoryBounded,
}

/// Row-major `rows x cols` matrix; one column per frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl FeatureMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Build from explicit rows. Returns `None` when rows differ in length.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Option<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != cols) {
            return None;
        }
        let n = rows.len();
        Some(Self {
            rows: n,
            cols,
            data: rows.into_iter().flatten().collect(),
        })
    }

    /// Build from a flat row-major buffer. Returns `None` on a shape mismatch.
    pub fn from_raw(rows: usize, cols: usize, data: Vec<f32>) -> Option<Self> {
        (data.len() == rows * cols).then_some(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn row(&self, r: usize) -> &[f32] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    pub fn get(&self, r: usize, c: usize) -> f32 {
        self.data[r * self.cols + c]
    }

    pub fn set(&mut self, r: usize, c: usize, value: f32) {
        self.data[r * self.cols + c] = value;
    }

    pub fn column(&self, c: usize) -> Vec<f32> {
        (0..self.rows).map(|r| self.get(r, c)).collect()
    }

    /// Mean of every row across all columns.
    pub fn row_means(&self) -> Vec<f32> {
        (0..self.rows)
            .map(|r| {
                if self.cols == 0 {
                    0.0
                } else {
                    self.row(r).iter().sum::<f32>() / self.cols as f32
                }
            })
            .collect()
    }

    /// Linearly resample every row to `cols` columns.
    pub fn resample(&self, cols: usize) -> Self {
        if cols == self.cols {
            return self.clone();
        }
        let mut data = Vec::with_capacity(self.rows * cols);
        for r in 0..self.rows {
            data.extend(resample_linear(self.row(r), cols));
        }
        Self {
            rows: self.rows,
            cols,
            data,
        }
    }

    /// Scale each column so its largest value is 1.0. All-zero columns stay zero.
    pub fn normalize_columns(&mut self) {
        for c in 0..self.cols {
            let peak = (0..self.rows).map(|r| self.get(r, c)).fold(0.0f32, f32::max);
            if peak > 1e-10 {
                for r in 0..self.rows {
                    let v = self.get(r, c) / peak;
                    self.set(r, c, v);
                }
            }
        }
    }
}

/// Time-aligned feature bundle, one entry per video frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureTimeline {
    /// Seconds of decoded audio.
    pub duration: f64,
    /// Sample rate the features were computed at.
    pub sample_rate: u32,
    pub fps: u32,
    pub loudness: Vec<f32>,
    pub onset_strength: Vec<f32>,
    pub spectral_centroid: Vec<f32>,
    pub spectral_rolloff: Vec<f32>,
    pub zero_crossing_rate: Vec<f32>,
    /// 12 x frames, each column normalized per analysis window.
    pub tone_profile: FeatureMatrix,
    /// 13 x frames cepstral timbre fingerprint.
    pub timbre: FeatureMatrix,
    /// 64 x frames rhythmic structure.
    pub tempogram: FeatureMatrix,
    pub tempo: f32,
    pub key: Option<String>,
    pub mode: ContentMode,
    pub strategy: AnalysisStrategy,
}

/// Feature values for a single frame, as consumed by frame generators.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameFeatures {
    pub loudness: f32,
    pub onset: f32,
    pub spectral_centroid: f32,
    pub spectral_rolloff: f32,
    pub zero_crossing_rate: f32,
    pub tone: [f32; PITCH_CLASSES],
    /// Position in the track, 0.0 at the first frame.
    pub progress: f32,
    /// Seconds since the start of the track.
    pub time: f32,
}

impl FrameFeatures {
    /// Index of the strongest pitch class.
    pub fn dominant_pitch(&self) -> usize {
        self.tone
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
            .0
    }
}

impl FeatureTimeline {
    /// Number of video frames, `round(duration * fps)`.
    pub fn frame_count(&self) -> usize {
        self.loudness.len()
    }

    /// Check that every per-frame series and matrix agrees on the frame count.
    pub fn is_aligned(&self) -> bool {
        let n = self.frame_count();
        [
            self.onset_strength.len(),
            self.spectral_centroid.len(),
            self.spectral_rolloff.len(),
            self.zero_crossing_rate.len(),
            self.tone_profile.cols(),
            self.timbre.cols(),
            self.tempogram.cols(),
        ]
        .iter()
        .all(|&len| len == n)
            && self.tone_profile.rows() == PITCH_CLASSES
    }

    /// Features at `frame_idx`, clamped to the last frame.
    pub fn at(&self, frame_idx: usize) -> FrameFeatures {
        let n = self.frame_count();
        if n == 0 {
            return FrameFeatures {
                loudness: 0.0,
                onset: 0.0,
                spectral_centroid: 0.0,
                spectral_rolloff: 0.0,
                zero_crossing_rate: 0.0,
                tone: [0.0; PITCH_CLASSES],
                progress: 0.0,
                time: 0.0,
            };
        }
        let idx = frame_idx.min(n - 1);
        let mut tone = [0.0f32; PITCH_CLASSES];
        for (pc, slot) in tone.iter_mut().enumerate() {
            *slot = self.tone_profile.get(pc, idx);
        }
        FrameFeatures {
            loudness: self.loudness[idx],
            onset: self.onset_strength[idx],
            spectral_centroid: self.spectral_centroid[idx],
            spectral_rolloff: self.spectral_rolloff[idx],
            zero_crossing_rate: self.zero_crossing_rate[idx],
            tone,
            progress: frame_idx as f32 / n as f32,
            time: frame_idx as f32 / self.fps.max(1) as f32,
        }
    }
}

/// `round(duration * fps)`.
pub fn target_frame_count(duration: f64, fps: u32) -> usize {
    (duration * fps as f64).round().max(0.0) as usize
}

/// Min-max normalize into [0, 1]; a constant series becomes all zeros.
pub fn normalize_min_max(values: &[f32]) -> Vec<f32> {
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    if values.is_empty() || !range.is_finite() || range < 1e-8 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - min) / range).collect()
}

/// Linear interpolation of `values` onto `target_len` points spread over a
/// shared [0, 1] time axis.
pub fn resample_linear(values: &[f32], target_len: usize) -> Vec<f32> {
    if values.len() == target_len {
        return values.to_vec();
    }
    match (values.len(), target_len) {
        (_, 0) => Vec::new(),
        (0, n) => vec![0.0; n],
        (1, n) => vec![values[0]; n],
        (_, 1) => vec![values[0]],
        (src_len, n) => {
            let last_src = (src_len - 1) as f64;
            let last_dst = (n - 1) as f64;
            (0..n)
                .map(|i| {
                    let pos = i as f64 / last_dst * last_src;
                    let lo = pos.floor() as usize;
                    let hi = (lo + 1).min(src_len - 1);
                    let t = (pos - lo as f64) as f32;
                    values[lo] + (values[hi] - values[lo]) * t
                })
                .collect()
        }
    }
}
