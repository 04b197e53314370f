use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::frame::Frame;
use super::generator::{FrameGenerator, GeneratorContext, GeneratorRegistry};
use super::postprocess::PostProcessor;
use super::scheduler::{FrameScheduler, RenderTask, SchedulerConfig};
use crate::audio::features::target_frame_count;
use crate::audio::{ContentMode, FeatureExtractor};
use crate::config::RenderConfig;
use crate::encode::{MediaBackend, SinkConfig};
use crate::error::{RenderError, Result};
use crate::profiles::ExportProfile;
use crate::validate::validate_audio;

pub const PREVIEW_RESOLUTION: (u32, u32) = (854, 480);
pub const PREVIEW_FPS: u32 = 30;
pub const PREVIEW_SECONDS: f64 = 5.0;
/// Frames between progress reports while encoding.
pub const PROGRESS_INTERVAL: usize = 30;
/// Parallel batches span this many chunks per worker.
const WINDOW_CHUNKS_PER_WORKER: usize = 4;

/// Linear job states. `Failed` is reachable from every non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Idle,
    EnvironmentChecked,
    AudioValidated,
    Analyzed,
    GeneratorReady,
    Encoding,
    Muxing,
    Done,
    Failed,
}

#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Render a short, low-resolution clip.
    pub preview: bool,
    pub preview_seconds: f64,
    /// Ignore any cached analysis.
    pub force_analyze: bool,
    /// Render frames on a worker pool when set.
    pub scheduler: Option<SchedulerConfig>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            preview: false,
            preview_seconds: PREVIEW_SECONDS,
            force_analyze: false,
            scheduler: None,
        }
    }
}

/// Summary of a finished render.
#[derive(Clone, Debug)]
pub struct RenderReport {
    pub output: PathBuf,
    pub frames: usize,
    pub resolution: (u32, u32),
    pub fps: u32,
    /// Seconds of video written.
    pub duration: f64,
    pub tempo: f32,
    pub key: Option<String>,
    pub mode: ContentMode,
    pub encoder_version: String,
    pub elapsed: Duration,
    pub stages: Vec<Stage>,
}

/// Orchestrates one audio-to-video job: environment check, validation,
/// analysis, generator setup, encoding and muxing.
pub struct RenderPipeline {
    registry: GeneratorRegistry,
    backend: Box<dyn MediaBackend>,
    extractor: FeatureExtractor,
}

impl RenderPipeline {
    pub fn new(registry: GeneratorRegistry, backend: Box<dyn MediaBackend>, extractor: FeatureExtractor) -> Self {
        Self {
            registry,
            backend,
            extractor,
        }
    }

    pub fn registry(&self) -> &GeneratorRegistry {
        &self.registry
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    /// Run one render job.
    ///
    /// `progress` receives non-decreasing fractions in `[0, 1]`; the last
    /// call on success is `(1.0, "done")`. In preview mode `config` is
    /// temporarily switched to preview resolution and fps and restored on
    /// every exit path.
    pub fn run(
        &self,
        config: &mut RenderConfig,
        options: &RunOptions,
        progress: &mut dyn FnMut(f32, &str),
    ) -> Result<RenderReport> {
        let mut tracker = StageTracker::new();
        let result = if options.preview {
            let mut preview = PreviewGuard::apply(config);
            self.execute(&mut preview, options, progress, &mut tracker)
        } else {
            self.execute(config, options, progress, &mut tracker)
        };
        if let Err(e) = &result {
            tracker.fail(e);
        }
        result
    }

    fn execute(
        &self,
        config: &mut RenderConfig,
        options: &RunOptions,
        progress: &mut dyn FnMut(f32, &str),
        stage: &mut StageTracker,
    ) -> Result<RenderReport> {
        let started = Instant::now();

        progress(0.0, "checking encoder");
        let encoder_version = self.backend.check()?;
        log::info!("Encoder available: {}", encoder_version);
        stage.advance(Stage::EnvironmentChecked);

        config.validate()?;
        validate_audio(&config.audio_path)?;
        stage.advance(Stage::AudioValidated);
        progress(0.02, "audio validated");

        let (width, height) = config.effective_resolution();
        let fps = config.effective_fps();
        let timeline = Arc::new(
            self.extractor
                .analyze(&config.audio_path, fps, options.force_analyze)?,
        );
        let mut frame_count = timeline.frame_count();
        let mut duration = timeline.duration;
        if options.preview {
            duration = duration.min(options.preview_seconds);
            frame_count = frame_count.min(target_frame_count(options.preview_seconds, fps));
        }
        if frame_count == 0 {
            return Err(RenderError::AudioValidation {
                path: config.audio_path.clone(),
                reason: format!("{:.3}s of audio is too short for one frame at {fps}fps", duration),
            });
        }
        if let Some(profile) = config.profile {
            warn_profile_limits(&profile, duration);
        }
        stage.advance(Stage::Analyzed);
        progress(0.05, "audio analyzed");

        let context = GeneratorContext {
            width,
            height,
            fps,
            colors: config.colors,
            timeline: Arc::clone(&timeline),
        };
        let source = match options.scheduler {
            // Workers build their own generators per chunk; only the id is checked here.
            Some(cfg) => {
                self.registry.ensure(&config.generator)?;
                FrameSource::Parallel(FrameScheduler::new(cfg)?)
            }
            None => {
                let mut generator = self.registry.create(&config.generator, context.clone())?;
                generator.setup()?;
                FrameSource::Serial(generator)
            }
        };
        stage.advance(Stage::GeneratorReady);
        progress(0.1, "generator ready");

        let post = PostProcessor::new(config.postprocess);
        let settings = config.effective_encoder();
        let temp_video = temp_video_path(&config.output_path)?;

        log::info!(
            "Rendering {} frames at {}x{} @ {}fps with '{}'{}",
            frame_count,
            width,
            height,
            fps,
            config.generator,
            if matches!(source, FrameSource::Parallel(_)) { " (parallel)" } else { "" }
        );

        let mut sink = self.backend.open_encoder(&temp_video, &settings)?;
        sink.begin(SinkConfig { width, height, fps })?;
        stage.advance(Stage::Encoding);

        {
            let mut emit = |idx: usize, frame: Frame| -> Result<()> {
                let graded = post.apply(frame, idx);
                sink.push_frame(idx, &graded)?;
                if (idx + 1) % PROGRESS_INTERVAL == 0 || idx + 1 == frame_count {
                    let fraction = 0.1 + 0.8 * idx as f32 / frame_count as f32;
                    progress(fraction, &format!("encoding frame {}/{}", idx + 1, frame_count));
                }
                Ok(())
            };

            match &source {
                FrameSource::Parallel(scheduler) => {
                    let task = RenderTask {
                        generator: config.generator.clone(),
                        context,
                    };
                    let cfg = scheduler.config();
                    let window = (cfg.workers * cfg.chunk_size * WINDOW_CHUNKS_PER_WORKER).max(1);
                    let mut start = 0;
                    while start < frame_count {
                        let end = (start + window).min(frame_count);
                        let indices: Vec<usize> = (start..end).collect();
                        for (idx, frame) in scheduler.render_tasks(&self.registry, &task, &indices)? {
                            emit(idx, frame)?;
                        }
                        start = end;
                    }
                }
                FrameSource::Serial(generator) => {
                    for idx in 0..frame_count {
                        emit(idx, generator.render_frame(idx)?)?;
                    }
                }
            }
        }
        sink.end()?;

        stage.advance(Stage::Muxing);
        progress(0.95, "muxing audio");
        self.backend
            .mux(&temp_video, &config.audio_path, &config.output_path, &settings.audio_bitrate)?;
        if let Err(e) = temp_video.close() {
            log::warn!("Could not remove intermediate video: {}", e);
        }

        stage.advance(Stage::Done);
        progress(1.0, "done");
        log::info!(
            "Render complete: {} ({} frames in {:.1}s)",
            config.output_path.display(),
            frame_count,
            started.elapsed().as_secs_f64()
        );

        Ok(RenderReport {
            output: config.output_path.clone(),
            frames: frame_count,
            resolution: (width, height),
            fps,
            duration: frame_count as f64 / fps as f64,
            tempo: timeline.tempo,
            key: timeline.key.clone(),
            mode: timeline.mode,
            encoder_version,
            elapsed: started.elapsed(),
            stages: stage.visited.clone(),
        })
    }
}

/// Where encoded frames come from: one generator in the calling thread, or
/// a worker pool rebuilding the generator per chunk.
enum FrameSource {
    Serial(Box<dyn FrameGenerator>),
    Parallel(FrameScheduler),
}

fn warn_profile_limits(profile: &ExportProfile, duration: f64) {
    if profile.exceeds_duration(duration) {
        log::warn!(
            "{:.0}s exceeds the {} limit of {}s",
            duration,
            profile.name,
            profile.max_duration.unwrap_or_default()
        );
    }
    if let Some(max_mb) = profile.max_file_size {
        log::info!(
            "{} caps uploads at {} MB; recommended video bitrate {} kbps",
            profile.name,
            max_mb,
            profile.recommended_bitrate_kbps(duration)
        );
    }
}

/// Scratch path for the silent video, next to the final output so the mux
/// step does not cross filesystems. Deleted when dropped.
fn temp_video_path(output: &Path) -> Result<tempfile::TempPath> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|e| RenderError::io("output directory", e))?;
            parent.to_path_buf()
        }
        _ => PathBuf::from("."),
    };
    tempfile::Builder::new()
        .prefix(".vizcast-video-")
        .suffix(".mp4")
        .tempfile_in(dir)
        .map(|f| f.into_temp_path())
        .map_err(|e| RenderError::io("intermediate video", e))
}

/// Swaps in preview resolution and fps; restores the caller's values on drop.
struct PreviewGuard<'a> {
    config: &'a mut RenderConfig,
    resolution: (u32, u32),
    fps: u32,
    profile: Option<ExportProfile>,
}

impl<'a> PreviewGuard<'a> {
    fn apply(config: &'a mut RenderConfig) -> Self {
        let saved = (config.resolution, config.fps, config.profile.take());
        config.resolution = PREVIEW_RESOLUTION;
        config.fps = PREVIEW_FPS;
        log::info!(
            "Preview mode: {}x{} @ {}fps",
            PREVIEW_RESOLUTION.0,
            PREVIEW_RESOLUTION.1,
            PREVIEW_FPS
        );
        Self {
            config,
            resolution: saved.0,
            fps: saved.1,
            profile: saved.2,
        }
    }
}

impl Deref for PreviewGuard<'_> {
    type Target = RenderConfig;

    fn deref(&self) -> &RenderConfig {
        self.config
    }
}

impl DerefMut for PreviewGuard<'_> {
    fn deref_mut(&mut self) -> &mut RenderConfig {
        self.config
    }
}

impl Drop for PreviewGuard<'_> {
    fn drop(&mut self) {
        self.config.resolution = self.resolution;
        self.config.fps = self.fps;
        self.config.profile = self.profile.take();
    }
}

struct StageTracker {
    current: Stage,
    visited: Vec<Stage>,
}

impl StageTracker {
    fn new() -> Self {
        Self {
            current: Stage::Idle,
            visited: vec![Stage::Idle],
        }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(next > self.current, "stage {:?} after {:?}", next, self.current);
        log::info!("[pipeline] {:?} -> {:?}", self.current, next);
        self.current = next;
        self.visited.push(next);
    }

    fn fail(&mut self, err: &RenderError) {
        log::error!(
            "[pipeline] failed after {:?} ({} error): {}",
            self.current,
            err.stage(),
            err
        );
        self.current = Stage::Failed;
        self.visited.push(Stage::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles;

    #[test]
    fn preview_guard_restores_on_drop() {
        let mut cfg = RenderConfig::new("a.wav", "b.mp4");
        cfg.resolution = (1280, 720);
        cfg.fps = 60;
        cfg.profile = profiles::find("tiktok");
        {
            let guard = PreviewGuard::apply(&mut cfg);
            assert_eq!(guard.effective_resolution(), PREVIEW_RESOLUTION);
            assert_eq!(guard.effective_fps(), PREVIEW_FPS);
        }
        assert_eq!(cfg.resolution, (1280, 720));
        assert_eq!(cfg.fps, 60);
        assert_eq!(cfg.profile.map(|p| p.id), Some("tiktok"));
    }

    #[test]
    fn stages_only_move_forward() {
        let mut tracker = StageTracker::new();
        tracker.advance(Stage::EnvironmentChecked);
        tracker.advance(Stage::AudioValidated);
        tracker.fail(&RenderError::InvalidConfig("x".into()));
        assert_eq!(
            tracker.visited,
            vec![Stage::Idle, Stage::EnvironmentChecked, Stage::AudioValidated, Stage::Failed]
        );
    }

    #[test]
    fn temp_video_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_video_path(&dir.path().join("nested").join("out.mp4")).unwrap();
        let kept: PathBuf = path.to_path_buf();
        assert!(kept.exists());
        assert_eq!(kept.parent(), Some(dir.path().join("nested").as_path()));
        drop(path);
        assert!(!kept.exists());
    }
}
