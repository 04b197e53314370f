use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::error::AnalysisError;

/// Mono PCM samples at a known rate.
#[derive(Clone, Debug)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioData {
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

fn open_format(path: &Path) -> Result<Box<dyn FormatReader>, AnalysisError> {
    let file = File::open(path).map_err(|source| AnalysisError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AnalysisError::Decode {
            path: path.to_path_buf(),
            reason: format!("unrecognized container: {e}"),
        })?;

    Ok(probed.format)
}

/// Read the track header only. `None` when the container does not declare
/// a frame count (common for VBR mp3).
pub fn probe_duration(path: &Path) -> Option<f64> {
    let format = open_format(path).ok()?;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)?;
    let frames = track.codec_params.n_frames?;
    let rate = track.codec_params.sample_rate?;
    Some(frames as f64 / rate as f64)
}

/// Decode the first audio track to mono, optionally resampled to `target_rate`.
pub fn decode_audio(path: &Path, target_rate: Option<u32>) -> Result<AudioData, AnalysisError> {
    let decode_err = |reason: String| AnalysisError::Decode {
        path: path.to_path_buf(),
        reason,
    };

    let mut format = open_format(path)?;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| decode_err("no audio tracks found".into()))?;

    let track_id = track.id;
    let channels = track.codec_params.channels.map_or(1, |c| c.count()).max(1);
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| decode_err("unknown sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| decode_err(format!("unsupported codec: {e}")))?;

    let mut resampler = match target_rate {
        Some(target) if target != sample_rate => Some(
            StreamResampler::new(sample_rate, target)
                .map_err(|reason| resample_err(path, reason))?,
        ),
        _ => None,
    };
    let mut all_samples: Vec<f32> = Vec::new();
    let mut mono: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(decode_err(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(decode_err(e.to_string())),
        };

        let spec = *decoded.spec();
        let num_frames = decoded.frames();

        let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        let samples = sample_buf.samples();

        // Downmix to mono
        mono.clear();
        if channels == 1 {
            mono.extend_from_slice(samples);
        } else {
            mono.extend(
                samples
                    .chunks(channels)
                    .map(|frame_samples| frame_samples.iter().sum::<f32>() / channels as f32),
            );
        }

        // Only the resampled signal is kept when a target rate is set.
        match resampler.as_mut() {
            Some(r) => r.push(&mono).map_err(|reason| resample_err(path, reason))?,
            None => all_samples.extend_from_slice(&mono),
        }
    }

    let rate = match resampler {
        Some(r) => {
            let target = r.to_rate;
            all_samples = r.finish().map_err(|reason| resample_err(path, reason))?;
            log::info!("Resampled {}Hz -> {}Hz while decoding", sample_rate, target);
            target
        }
        None => sample_rate,
    };

    if all_samples.is_empty() {
        return Err(AnalysisError::Empty {
            path: path.to_path_buf(),
        });
    }

    log::info!(
        "Decoded audio: {} samples, {}Hz, {:.1}s",
        all_samples.len(),
        rate,
        all_samples.len() as f32 / rate as f32
    );

    Ok(AudioData {
        samples: all_samples,
        sample_rate: rate,
    })
}

fn resample_err(path: &Path, reason: String) -> AnalysisError {
    AnalysisError::Resample {
        path: path.to_path_buf(),
        reason,
    }
}

/// Input frames per resampler call. Bounds the working set independent of
/// the file length.
const RESAMPLE_CHUNK: usize = 4096;

/// Incremental mono sinc resampler.
///
/// Input is buffered only up to one chunk; output is trimmed for the filter
/// delay so the result lines up with the input and has
/// `round(input_len * ratio)` samples.
pub struct StreamResampler {
    inner: SincFixedIn<f32>,
    pending: Vec<f32>,
    out: Vec<f32>,
    delay_left: usize,
    consumed: usize,
    ratio: f64,
    to_rate: u32,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, String> {
        if from_rate == 0 || to_rate == 0 {
            return Err(format!("invalid resampling {from_rate}Hz -> {to_rate}Hz"));
        }
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let ratio = to_rate as f64 / from_rate as f64;
        let inner = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)
            .map_err(|e| e.to_string())?;
        Ok(Self {
            delay_left: inner.output_delay(),
            inner,
            pending: Vec::with_capacity(RESAMPLE_CHUNK),
            out: Vec::new(),
            consumed: 0,
            ratio,
            to_rate,
        })
    }

    pub fn push(&mut self, samples: &[f32]) -> Result<(), String> {
        self.consumed += samples.len();
        self.pending.extend_from_slice(samples);
        loop {
            let need = self.inner.input_frames_next();
            if self.pending.len() < need {
                return Ok(());
            }
            let input: [&[f32]; 1] = [&self.pending[..need]];
            let chunk = self.inner.process(&input[..], None).map_err(|e| e.to_string())?;
            self.pending.drain(..need);
            self.emit(&chunk[0]);
        }
    }

    /// Flush the buffered tail and the filter delay.
    pub fn finish(mut self) -> Result<Vec<f32>, String> {
        let expected = (self.consumed as f64 * self.ratio).round() as usize;
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            let input: [&[f32]; 1] = [&tail[..]];
            let chunk = self
                .inner
                .process_partial(Some(&input[..]), None)
                .map_err(|e| e.to_string())?;
            self.emit(&chunk[0]);
        }
        while self.out.len() < expected {
            let before = self.out.len();
            let chunk = self
                .inner
                .process_partial(None::<&[&[f32]]>, None)
                .map_err(|e| e.to_string())?;
            self.emit(&chunk[0]);
            if self.out.len() == before && self.delay_left == 0 {
                break;
            }
        }
        self.out.truncate(expected);
        Ok(self.out)
    }

    fn emit(&mut self, chunk: &[f32]) {
        let skip = self.delay_left.min(chunk.len());
        self.delay_left -= skip;
        self.out.extend_from_slice(&chunk[skip..]);
    }
}

/// Sinc resampling of mono audio with rubato.
pub fn resample(audio: &AudioData, to_rate: u32) -> Result<AudioData, String> {
    if audio.sample_rate == to_rate {
        return Ok(audio.clone());
    }
    let mut resampler = StreamResampler::new(audio.sample_rate, to_rate)?;
    for block in audio.samples.chunks(RESAMPLE_CHUNK) {
        resampler.push(block)?;
    }
    Ok(AudioData {
        samples: resampler.finish()?,
        sample_rate: to_rate,
    })
}
