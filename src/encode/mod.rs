pub mod ffmpeg;
pub mod sink;

pub use ffmpeg::{FfmpegBackend, MediaBackend};
pub use sink::{FrameSink, InMemorySink, SinkConfig};
