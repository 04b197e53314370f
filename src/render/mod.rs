//! Frame production: generators, grading, parallel scheduling and the
//! end-to-end render pipeline.

pub mod frame;
pub mod generator;
pub mod pipeline;
pub mod postprocess;
pub mod scheduler;
pub mod styles;

pub use frame::Frame;
pub use generator::{FrameGenerator, GeneratorContext, GeneratorRegistry};
pub use pipeline::{RenderPipeline, RenderReport, RunOptions, Stage};
pub use postprocess::PostProcessor;
pub use scheduler::{FrameScheduler, RenderTask, SchedulerConfig};
