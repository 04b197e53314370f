use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use vizcast::audio::{FeatureExtractor, FeatureStore};
use vizcast::config::{EncoderSettings, RenderConfig};
use vizcast::encode::ffmpeg::is_ffmpeg_on_path;
use vizcast::encode::{FfmpegBackend, FrameSink, MediaBackend, SinkConfig};
use vizcast::render::pipeline::{PREVIEW_FPS, PREVIEW_RESOLUTION};
use vizcast::render::{Frame, GeneratorRegistry, RenderPipeline, RunOptions, SchedulerConfig, Stage};
use vizcast::{profiles, RenderError};

type Recorded = Arc<Mutex<Vec<(usize, Vec<u8>)>>>;

fn write_sine_wav(path: &Path, seconds: f32, sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let total = (seconds * sample_rate as f32) as usize;
    for n in 0..total {
        let t = n as f32 / sample_rate as f32;
        // 440 Hz tone with a 2 Hz amplitude pulse so onsets are non-trivial
        let env = 0.5 + 0.5 * (2.0 * std::f32::consts::PI * 2.0 * t).sin().abs();
        let s = env * (2.0 * std::f32::consts::PI * 440.0 * t).sin();
        writer.write_sample((s * 0.6 * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Step at which a `RecordingBackend` reports failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FailAt {
    PushFrame(usize),
    End,
    Mux,
}

/// Records frames in memory and writes a marker file instead of muxing.
#[derive(Default)]
struct RecordingBackend {
    frames: Recorded,
    configs: Arc<Mutex<Vec<SinkConfig>>>,
    unavailable: bool,
    fail_at: Option<FailAt>,
}

struct RecordingSink {
    frames: Recorded,
    configs: Arc<Mutex<Vec<SinkConfig>>>,
    fail_at: Option<FailAt>,
}

fn encoder_exit(stderr: &str) -> RenderError {
    RenderError::Encoding {
        status: "exit status: 1".into(),
        stderr: stderr.into(),
    }
}

impl FrameSink for RecordingSink {
    fn begin(&mut self, cfg: SinkConfig) -> vizcast::Result<()> {
        self.configs.lock().unwrap().push(cfg);
        Ok(())
    }

    fn push_frame(&mut self, idx: usize, frame: &Frame) -> vizcast::Result<()> {
        if self.fail_at == Some(FailAt::PushFrame(idx)) {
            return Err(encoder_exit("broken pipe"));
        }
        self.frames.lock().unwrap().push((idx, frame.as_bytes().to_vec()));
        Ok(())
    }

    fn end(&mut self) -> vizcast::Result<()> {
        if self.fail_at == Some(FailAt::End) {
            return Err(encoder_exit("moov atom not written"));
        }
        Ok(())
    }
}

impl MediaBackend for RecordingBackend {
    fn check(&self) -> vizcast::Result<String> {
        if self.unavailable {
            return Err(RenderError::EncoderUnavailable {
                reason: "not installed".into(),
                hint: "install it",
            });
        }
        Ok("recording backend 1.0".into())
    }

    fn open_encoder(&self, _output: &Path, _settings: &EncoderSettings) -> vizcast::Result<Box<dyn FrameSink>> {
        Ok(Box::new(RecordingSink {
            frames: Arc::clone(&self.frames),
            configs: Arc::clone(&self.configs),
            fail_at: self.fail_at,
        }))
    }

    fn mux(&self, _video: &Path, _audio: &Path, output: &Path, _audio_bitrate: &str) -> vizcast::Result<()> {
        if self.fail_at == Some(FailAt::Mux) {
            return Err(RenderError::Mux {
                status: "exit status: 1".into(),
                stderr: "invalid data found when processing input".into(),
            });
        }
        std::fs::write(output, b"muxed").map_err(|e| RenderError::io("muxing", e))
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    audio: PathBuf,
    output: PathBuf,
    cache: PathBuf,
}

fn fixture(seconds: f32) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let audio = dir.path().join("tone.wav");
    write_sine_wav(&audio, seconds, 44_100);
    Fixture {
        output: dir.path().join("out").join("video.mp4"),
        cache: dir.path().join("cache"),
        audio,
        _dir: dir,
    }
}

/// Intermediate videos left next to the output.
fn leftover_videos(output: &Path) -> Vec<PathBuf> {
    let Some(dir) = output.parent() else {
        return Vec::new();
    };
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(".vizcast-video-"))
        .map(|e| e.path())
        .collect()
}

fn pipeline_with(backend: RecordingBackend, cache: &Path) -> RenderPipeline {
    RenderPipeline::new(
        GeneratorRegistry::with_builtin(),
        Box::new(backend),
        FeatureExtractor::new(FeatureStore::new(cache)),
    )
}

fn small_config(fx: &Fixture) -> RenderConfig {
    let mut cfg = RenderConfig::new(&fx.audio, &fx.output);
    cfg.resolution = (64, 48);
    cfg.fps = 30;
    cfg
}

#[test]
fn progress_is_monotonic_and_ends_at_one() {
    let fx = fixture(2.0);
    let backend = RecordingBackend::default();
    let frames = Arc::clone(&backend.frames);
    let pipeline = pipeline_with(backend, &fx.cache);
    let mut cfg = small_config(&fx);

    let mut calls: Vec<(f32, String)> = Vec::new();
    let report = pipeline
        .run(&mut cfg, &RunOptions::default(), &mut |p, msg| calls.push((p, msg.to_string())))
        .unwrap();

    assert_eq!(report.frames, 60);
    assert_eq!(report.resolution, (64, 48));
    assert!(fx.output.exists());
    assert_eq!(frames.lock().unwrap().len(), 60);

    assert!(calls.windows(2).all(|w| w[0].0 <= w[1].0), "{calls:?}");
    assert!(calls.iter().all(|(p, _)| (0.0..=1.0).contains(p)));
    assert_eq!(calls.first().map(|c| c.0), Some(0.0));
    assert_eq!(calls.last().map(|c| (c.0, c.1.as_str())), Some((1.0, "done")));
}

#[test]
fn frames_arrive_in_order_and_stages_are_linear() {
    let fx = fixture(1.0);
    let backend = RecordingBackend::default();
    let frames = Arc::clone(&backend.frames);
    let configs = Arc::clone(&backend.configs);
    let pipeline = pipeline_with(backend, &fx.cache);
    let mut cfg = small_config(&fx);

    let report = pipeline.run(&mut cfg, &RunOptions::default(), &mut |_, _| {}).unwrap();

    let order: Vec<usize> = frames.lock().unwrap().iter().map(|(i, _)| *i).collect();
    assert_eq!(order, (0..30).collect::<Vec<_>>());
    assert_eq!(
        configs.lock().unwrap().as_slice(),
        &[SinkConfig {
            width: 64,
            height: 48,
            fps: 30
        }]
    );
    assert_eq!(
        report.stages,
        vec![
            Stage::Idle,
            Stage::EnvironmentChecked,
            Stage::AudioValidated,
            Stage::Analyzed,
            Stage::GeneratorReady,
            Stage::Encoding,
            Stage::Muxing,
            Stage::Done,
        ]
    );
}

#[test]
fn missing_encoder_fails_before_analysis() {
    let fx = fixture(1.0);
    let pipeline = pipeline_with(
        RecordingBackend {
            unavailable: true,
            ..Default::default()
        },
        &fx.cache,
    );
    let mut cfg = small_config(&fx);

    let err = pipeline.run(&mut cfg, &RunOptions::default(), &mut |_, _| {}).unwrap_err();
    assert!(matches!(err, RenderError::EncoderUnavailable { .. }), "{err}");
    assert!(!fx.cache.exists() || std::fs::read_dir(&fx.cache).unwrap().next().is_none());
    assert!(!fx.output.exists());
}

#[test]
fn unknown_generator_lists_the_available_ones() {
    let fx = fixture(1.0);
    let pipeline = pipeline_with(RecordingBackend::default(), &fx.cache);
    let mut cfg = small_config(&fx);
    cfg.generator = "kaleidoscope".into();

    match pipeline.run(&mut cfg, &RunOptions::default(), &mut |_, _| {}) {
        Err(RenderError::UnknownGenerator { name, available }) => {
            assert_eq!(name, "kaleidoscope");
            assert!(available.iter().any(|g| g == "pulsing_core"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn unsupported_input_is_a_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    let text = dir.path().join("notes.txt");
    std::fs::write(&text, "not audio").unwrap();
    let pipeline = pipeline_with(RecordingBackend::default(), &dir.path().join("cache"));
    let mut cfg = RenderConfig::new(&text, dir.path().join("out.mp4"));

    let err = pipeline.run(&mut cfg, &RunOptions::default(), &mut |_, _| {}).unwrap_err();
    assert!(matches!(err, RenderError::AudioValidation { .. }), "{err}");
    assert!(err.is_input_error());
}

#[test]
fn preview_restores_config_after_success_and_failure() {
    let fx = fixture(2.0);
    let backend = RecordingBackend::default();
    let configs = Arc::clone(&backend.configs);
    let pipeline = pipeline_with(backend, &fx.cache);

    let mut cfg = small_config(&fx);
    cfg.resolution = (1280, 720);
    cfg.fps = 60;
    cfg.profile = profiles::find("youtube");
    let options = RunOptions {
        preview: true,
        preview_seconds: 1.0,
        ..Default::default()
    };

    let report = pipeline.run(&mut cfg, &options, &mut |_, _| {}).unwrap();
    assert_eq!(report.resolution, PREVIEW_RESOLUTION);
    assert_eq!(report.fps, PREVIEW_FPS);
    assert_eq!(report.frames, PREVIEW_FPS as usize);
    assert_eq!(configs.lock().unwrap()[0].width, PREVIEW_RESOLUTION.0);
    assert_eq!((cfg.resolution, cfg.fps), ((1280, 720), 60));
    assert_eq!(cfg.profile.map(|p| p.id), Some("youtube"));

    cfg.generator = "missing".into();
    assert!(pipeline.run(&mut cfg, &options, &mut |_, _| {}).is_err());
    assert_eq!((cfg.resolution, cfg.fps), ((1280, 720), 60));
    assert_eq!(cfg.profile.map(|p| p.id), Some("youtube"));
}

#[test]
fn parallel_render_matches_serial_render() {
    let fx = fixture(2.0);
    let mut cfg = small_config(&fx);
    cfg.postprocess.grain = 0.3;
    cfg.postprocess.grain_seed = 11;
    cfg.postprocess.vignette = 0.4;

    let serial = RecordingBackend::default();
    let serial_frames = Arc::clone(&serial.frames);
    pipeline_with(serial, &fx.cache)
        .run(&mut cfg, &RunOptions::default(), &mut |_, _| {})
        .unwrap();

    let parallel = RecordingBackend::default();
    let parallel_frames = Arc::clone(&parallel.frames);
    let options = RunOptions {
        scheduler: Some(SchedulerConfig {
            workers: 3,
            chunk_size: 4,
        }),
        ..Default::default()
    };
    pipeline_with(parallel, &fx.cache)
        .run(&mut cfg, &options, &mut |_, _| {})
        .unwrap();

    let serial_frames = serial_frames.lock().unwrap();
    let parallel_frames = parallel_frames.lock().unwrap();
    assert_eq!(serial_frames.len(), 60);
    assert!(*serial_frames == *parallel_frames);
}

#[test]
fn intermediate_video_is_removed_when_a_later_stage_fails() {
    for fail_at in [FailAt::PushFrame(7), FailAt::End, FailAt::Mux] {
        let fx = fixture(1.0);
        let pipeline = pipeline_with(
            RecordingBackend {
                fail_at: Some(fail_at),
                ..Default::default()
            },
            &fx.cache,
        );
        let mut cfg = small_config(&fx);
        let mut last = 0.0f32;

        let err = pipeline
            .run(&mut cfg, &RunOptions::default(), &mut |p, _| last = p)
            .unwrap_err();
        match fail_at {
            FailAt::PushFrame(_) | FailAt::End => {
                assert!(matches!(err, RenderError::Encoding { .. }), "{fail_at:?}: {err}");
                assert!(last < 0.95, "{fail_at:?}: progress {last}");
            }
            FailAt::Mux => {
                assert!(matches!(err, RenderError::Mux { .. }), "{err}");
                assert_eq!(last, 0.95);
            }
        }
        assert!(!err.is_input_error());
        assert!(leftover_videos(&fx.output).is_empty(), "{fail_at:?} left a temp video");
        assert!(!fx.output.exists());
    }
}

#[test]
fn intermediate_video_is_removed_after_success() {
    let fx = fixture(1.0);
    let pipeline = pipeline_with(RecordingBackend::default(), &fx.cache);
    let mut cfg = small_config(&fx);
    pipeline.run(&mut cfg, &RunOptions::default(), &mut |_, _| {}).unwrap();
    assert!(fx.output.exists());
    assert!(leftover_videos(&fx.output).is_empty());
}

fn ffprobe_video_duration(path: &Path) -> Option<f64> {
    let out = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    String::from_utf8_lossy(&out.stdout).trim().parse().ok()
}

fn ffprobe_on_path() -> bool {
    Command::new("ffprobe")
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[test]
fn renders_a_two_second_tone_to_mp4_with_ffmpeg() {
    if !is_ffmpeg_on_path() {
        eprintln!("skipping: ffmpeg not on PATH");
        return;
    }
    let fx = fixture(2.0);
    let pipeline = RenderPipeline::new(
        GeneratorRegistry::with_builtin(),
        Box::new(FfmpegBackend::new()),
        FeatureExtractor::new(FeatureStore::new(&fx.cache)),
    );
    let mut cfg = RenderConfig::new(&fx.audio, &fx.output);
    cfg.resolution = (320, 240);
    cfg.fps = 30;
    cfg.generator = "solid".into();
    cfg.encoder.preset = "ultrafast".into();

    let report = pipeline.run(&mut cfg, &RunOptions::default(), &mut |_, _| {}).unwrap();
    assert_eq!(report.frames, 60);
    assert!(std::fs::metadata(&fx.output).unwrap().len() > 0);
    assert!(leftover_videos(&fx.output).is_empty(), "intermediate video was not removed");

    if !ffprobe_on_path() {
        eprintln!("skipping duration check: ffprobe not on PATH");
        return;
    }
    let video = ffprobe_video_duration(&fx.output).expect("video stream duration");
    assert!((video - 2.0).abs() <= 1.0 / 30.0 + 1e-3, "video stream is {video}s");
}
