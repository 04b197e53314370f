//! Audio understanding: decoding, numerical analysis, and the cached,
//! frame-aligned feature timeline built from them.

pub mod analysis;
pub mod cache;
pub mod decode;
pub mod extractor;
pub mod features;

pub use cache::{CacheKey, FeatureStore};
pub use extractor::FeatureExtractor;
pub use features::{ContentMode, FeatureTimeline, FrameFeatures};
