use crate::error::{RenderError, Result};
use crate::render::frame::Frame;

/// Stream parameters handed to a sink before the first frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Consumer of rendered frames in timeline order.
///
/// `push_frame` is called with strictly increasing indices. Implementations
/// may block in `push_frame`; that is how a slow encoder paces the renderer.
pub trait FrameSink: Send {
    fn begin(&mut self, cfg: SinkConfig) -> Result<()>;
    fn push_frame(&mut self, idx: usize, frame: &Frame) -> Result<()>;
    /// Flush and finalize. Called once after the last frame.
    fn end(&mut self) -> Result<()>;
}

/// Check a frame against the sink configuration and the previous index.
pub fn check_frame(cfg: &SinkConfig, last_idx: Option<usize>, idx: usize, frame: &Frame) -> Result<()> {
    if last_idx.is_some_and(|last| idx <= last) {
        return Err(RenderError::Encoding {
            status: "out-of-order frame".into(),
            stderr: format!("frame {idx} pushed after frame {}", last_idx.unwrap_or_default()),
        });
    }
    if frame.width() != cfg.width || frame.height() != cfg.height {
        return Err(RenderError::Encoding {
            status: "frame size mismatch".into(),
            stderr: format!(
                "got {}x{}, expected {}x{}",
                frame.width(),
                frame.height(),
                cfg.width,
                cfg.height
            ),
        });
    }
    Ok(())
}

/// Sink that keeps every frame in memory, for tests and debugging.
#[derive(Debug, Default)]
pub struct InMemorySink {
    cfg: Option<SinkConfig>,
    frames: Vec<(usize, Frame)>,
    finished: bool,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(&self) -> Option<SinkConfig> {
        self.cfg
    }

    pub fn frames(&self) -> &[(usize, Frame)] {
        &self.frames
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl FrameSink for InMemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> Result<()> {
        self.cfg = Some(cfg);
        self.frames.clear();
        self.finished = false;
        Ok(())
    }

    fn push_frame(&mut self, idx: usize, frame: &Frame) -> Result<()> {
        let cfg = self
            .cfg
            .ok_or_else(|| RenderError::Encoding {
                status: "sink not started".into(),
                stderr: String::new(),
            })?;
        check_frame(&cfg, self.frames.last().map(|(i, _)| *i), idx, frame)?;
        self.frames.push((idx, frame.clone()));
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_sink_enforces_order_and_size() {
        let mut sink = InMemorySink::new();
        let cfg = SinkConfig {
            width: 4,
            height: 2,
            fps: 30,
        };
        sink.begin(cfg).unwrap();
        sink.push_frame(0, &Frame::new(4, 2)).unwrap();
        sink.push_frame(2, &Frame::new(4, 2)).unwrap();
        assert!(sink.push_frame(1, &Frame::new(4, 2)).is_err());
        assert!(sink.push_frame(3, &Frame::new(2, 2)).is_err());
        sink.end().unwrap();
        assert!(sink.is_finished());
        assert_eq!(sink.frames().len(), 2);
        assert_eq!(sink.config(), Some(cfg));
    }

    #[test]
    fn push_before_begin_fails() {
        let mut sink = InMemorySink::new();
        assert!(sink.push_frame(0, &Frame::new(1, 1)).is_err());
    }
}
