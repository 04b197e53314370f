use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;

use super::sink::{check_frame, FrameSink, SinkConfig};
use crate::config::EncoderSettings;
use crate::error::{RenderError, Result};
use crate::render::frame::Frame;

/// External tools the render pipeline depends on: an encoder reading raw
/// frames and a muxer joining the silent video with the source audio.
pub trait MediaBackend: Send + Sync {
    /// Verify the tool can run. Returns its version line.
    fn check(&self) -> Result<String>;

    /// Start encoding raw frames into `output`.
    fn open_encoder(&self, output: &Path, settings: &EncoderSettings) -> Result<Box<dyn FrameSink>>;

    /// Copy the video stream of `video`, re-encode `audio`, trim to the
    /// shorter input and write `output`.
    fn mux(&self, video: &Path, audio: &Path, output: &Path, audio_bitrate: &str) -> Result<()>;
}

pub fn install_hint() -> &'static str {
    if cfg!(target_os = "macos") {
        "Install ffmpeg with `brew install ffmpeg` and make sure it is on PATH."
    } else if cfg!(target_os = "windows") {
        "Install ffmpeg with `winget install ffmpeg` (or from https://ffmpeg.org) and add it to PATH."
    } else {
        "Install ffmpeg with your package manager, e.g. `sudo apt install ffmpeg`, and make sure it is on PATH."
    }
}

/// Run `<program> -version` and return the first line of its output.
pub fn check_encoder(program: &Path) -> Result<String> {
    let unavailable = |reason: String| RenderError::EncoderUnavailable {
        reason,
        hint: install_hint(),
    };
    let output = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| unavailable(format!("could not run '{}': {}", program.display(), e)))?;
    if !output.status.success() {
        return Err(unavailable(format!(
            "'{} -version' failed ({}): {}",
            program.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn encode_args(output: &Path, cfg: &SinkConfig, settings: &EncoderSettings) -> Vec<OsString> {
    let size = format!("{}x{}", cfg.width, cfg.height);
    let fps = cfg.fps.to_string();
    let crf = settings.crf.to_string();
    let mut args: Vec<OsString> = [
        "-y",
        "-loglevel",
        "error",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgb24",
        "-s",
        size.as_str(),
        "-r",
        fps.as_str(),
        "-i",
        "pipe:0",
        "-an",
        "-c:v",
        "libx264",
        "-pix_fmt",
        "yuv420p",
        "-preset",
        settings.preset.as_str(),
        "-crf",
        crf.as_str(),
        "-movflags",
        "+faststart",
    ]
    .iter()
    .map(OsString::from)
    .collect();
    args.push(output.as_os_str().to_owned());
    args
}

pub fn mux_args(video: &Path, audio: &Path, output: &Path, audio_bitrate: &str) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-loglevel".into(), "error".into(), "-i".into()];
    args.push(video.as_os_str().to_owned());
    args.push("-i".into());
    args.push(audio.as_os_str().to_owned());
    args.extend(
        [
            "-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy", "-c:a", "aac", "-b:a", audio_bitrate,
            "-shortest",
        ]
        .iter()
        .map(OsString::from),
    );
    args.push(output.as_os_str().to_owned());
    args
}

/// Backend driving the system `ffmpeg` binary.
#[derive(Clone, Debug)]
pub struct FfmpegBackend {
    program: PathBuf,
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::with_program("ffmpeg")
    }
}

impl FfmpegBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl MediaBackend for FfmpegBackend {
    fn check(&self) -> Result<String> {
        check_encoder(&self.program)
    }

    fn open_encoder(&self, output: &Path, settings: &EncoderSettings) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(FfmpegSink::new(&self.program, output, settings.clone())))
    }

    fn mux(&self, video: &Path, audio: &Path, output: &Path, audio_bitrate: &str) -> Result<()> {
        ensure_parent_dir(output)?;
        let result = Command::new(&self.program)
            .args(mux_args(video, audio, output, audio_bitrate))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| RenderError::io("muxing", e))?;
        if !result.status.success() {
            return Err(RenderError::Mux {
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        log::info!("Muxed audio into {}", output.display());
        Ok(())
    }
}

/// Streams raw RGB24 frames into an `ffmpeg` child process over stdin.
///
/// Writes block once the pipe buffer is full, so the encoder paces the
/// renderer. Stderr is drained on a separate thread to avoid a deadlock
/// when ffmpeg logs heavily.
pub struct FfmpegSink {
    program: PathBuf,
    output: PathBuf,
    settings: EncoderSettings,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    cfg: Option<SinkConfig>,
    last_idx: Option<usize>,
}

impl FfmpegSink {
    pub fn new(program: &Path, output: &Path, settings: EncoderSettings) -> Self {
        Self {
            program: program.to_path_buf(),
            output: output.to_path_buf(),
            settings,
            child: None,
            stdin: None,
            stderr_drain: None,
            cfg: None,
            last_idx: None,
        }
    }

    /// Close stdin, wait for the child and collect its stderr.
    fn finish_child(&mut self) -> Result<(std::process::ExitStatus, String)> {
        drop(self.stdin.take());
        let mut child = self.child.take().ok_or_else(|| RenderError::Encoding {
            status: "encoder not started".into(),
            stderr: String::new(),
        })?;
        let status = child.wait().map_err(|e| RenderError::io("encoding", e))?;
        let stderr = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| RenderError::Encoding {
                    status: status.to_string(),
                    stderr: "stderr drain thread panicked".into(),
                })?
                .map_err(|e| RenderError::io("encoding", e))?,
            None => Vec::new(),
        };
        Ok((status, String::from_utf8_lossy(&stderr).trim().to_string()))
    }
}

impl FrameSink for FfmpegSink {
    fn begin(&mut self, cfg: SinkConfig) -> Result<()> {
        if cfg.width % 2 != 0 || cfg.height % 2 != 0 {
            return Err(RenderError::InvalidConfig(format!(
                "encoder size {}x{} must be even (required for yuv420p)",
                cfg.width, cfg.height
            )));
        }
        ensure_parent_dir(&self.output)?;

        let mut child = Command::new(&self.program)
            .args(encode_args(&self.output, &cfg, &self.settings))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RenderError::EncoderUnavailable {
                reason: format!("failed to spawn '{}': {}", self.program.display(), e),
                hint: install_hint(),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| RenderError::Encoding {
            status: "no stdin".into(),
            stderr: "failed to open encoder stdin".into(),
        })?;
        let mut stderr = child.stderr.take().ok_or_else(|| RenderError::Encoding {
            status: "no stderr".into(),
            stderr: "failed to open encoder stderr".into(),
        })?;
        let stderr_drain = std::thread::spawn(move || {
            let mut bytes = Vec::new();
            stderr.read_to_end(&mut bytes)?;
            Ok(bytes)
        });

        log::info!(
            "FFmpeg encoder started: {}x{} @ {}fps, preset={}, crf={}",
            cfg.width,
            cfg.height,
            cfg.fps,
            self.settings.preset,
            self.settings.crf
        );

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stderr_drain = Some(stderr_drain);
        self.cfg = Some(cfg);
        self.last_idx = None;
        Ok(())
    }

    fn push_frame(&mut self, idx: usize, frame: &Frame) -> Result<()> {
        let cfg = self.cfg.ok_or_else(|| RenderError::Encoding {
            status: "encoder not started".into(),
            stderr: String::new(),
        })?;
        check_frame(&cfg, self.last_idx, idx, frame)?;
        self.last_idx = Some(idx);

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(RenderError::Encoding {
                status: "encoder already finalized".into(),
                stderr: String::new(),
            });
        };
        if let Err(write_err) = stdin.write_all(frame.as_bytes()) {
            // Usually a broken pipe because ffmpeg died; its stderr says why.
            let (status, stderr) = self.finish_child()?;
            return Err(RenderError::Encoding {
                status: status.to_string(),
                stderr: format!("write of frame {idx} failed ({write_err}): {stderr}"),
            });
        }
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        let (status, stderr) = self.finish_child()?;
        self.cfg = None;
        if !status.success() {
            return Err(RenderError::Encoding {
                status: status.to_string(),
                stderr,
            });
        }
        log::info!("FFmpeg encoding complete");
        Ok(())
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            // Abandoned mid-stream: do not leave a half-written encoder running.
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|e| RenderError::io("output directory", e))
        }
        _ => Ok(()),
    }
}
