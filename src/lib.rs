//! Audio-reactive video rendering.
//!
//! An audio file is analysed into a frame-aligned [`audio::FeatureTimeline`]
//! (cached on disk), a [`render::FrameGenerator`] turns each frame's features
//! into pixels, [`render::PostProcessor`] grades them and an external encoder
//! turns the stream into a video that is finally muxed with the source audio.

pub mod audio;
pub mod config;
pub mod encode;
pub mod error;
pub mod profiles;
pub mod render;
pub mod validate;

pub use error::{AnalysisError, FailureKind, RenderError, Result};
