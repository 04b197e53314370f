use std::collections::BTreeMap;
use std::sync::Arc;

use super::frame::Frame;
use crate::audio::FeatureTimeline;
use crate::config::ColorPalette;
use crate::error::{RenderError, Result};

/// Everything a generator may depend on. Passed explicitly so a worker can
/// rebuild an identical generator from an id and a context.
#[derive(Clone, Debug)]
pub struct GeneratorContext {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub colors: ColorPalette,
    pub timeline: Arc<FeatureTimeline>,
}

/// One visual style.
///
/// `render_frame` must be deterministic for a given context and index;
/// parallel rendering relies on it.
pub trait FrameGenerator: Send {
    /// One-time preparation before the first frame.
    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    fn render_frame(&self, index: usize) -> Result<Frame>;
}

pub type GeneratorFactory = fn(GeneratorContext) -> Box<dyn FrameGenerator>;

struct Entry {
    description: &'static str,
    factory: GeneratorFactory,
}

/// Explicit id -> factory table, built by the host and handed to the pipeline.
#[derive(Default)]
pub struct GeneratorRegistry {
    entries: BTreeMap<String, Entry>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in styles.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        super::styles::register_builtin(&mut registry);
        registry
    }

    /// Add or replace a generator.
    pub fn register(&mut self, id: impl Into<String>, description: &'static str, factory: GeneratorFactory) {
        let id = id.into();
        if self.entries.contains_key(&id) {
            log::warn!("Replacing frame generator '{}'", id);
        }
        self.entries.insert(id, Entry { description, factory });
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Sorted ids.
    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn describe(&self) -> impl Iterator<Item = (&str, &'static str)> {
        self.entries.iter().map(|(id, e)| (id.as_str(), e.description))
    }

    /// `UnknownGenerator` listing the registered ids when `id` is missing.
    pub fn ensure(&self, id: &str) -> Result<()> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(self.unknown(id))
        }
    }

    pub fn create(&self, id: &str, ctx: GeneratorContext) -> Result<Box<dyn FrameGenerator>> {
        let entry = self.entries.get(id).ok_or_else(|| self.unknown(id))?;
        Ok((entry.factory)(ctx))
    }

    fn unknown(&self, id: &str) -> RenderError {
        RenderError::UnknownGenerator {
            name: id.to_string(),
            available: self.ids(),
        }
    }
}

/// Synthetic context for unit tests.
#[cfg(test)]
pub(crate) fn test_context(width: u32, height: u32, frames: usize) -> GeneratorContext {
    use crate::audio::features::*;
    GeneratorContext {
        width,
        height,
        fps: 30,
        colors: ColorPalette::default(),
        timeline: Arc::new(FeatureTimeline {
            duration: frames as f64 / 30.0,
            sample_rate: 44_100,
            fps: 30,
            loudness: (0..frames).map(|i| (i % 10) as f32 / 10.0).collect(),
            onset_strength: (0..frames).map(|i| ((i * 7) % 10) as f32 / 10.0).collect(),
            spectral_centroid: vec![0.5; frames],
            spectral_rolloff: vec![0.5; frames],
            zero_crossing_rate: vec![0.1; frames],
            tone_profile: FeatureMatrix::from_raw(
                PITCH_CLASSES,
                frames,
                (0..PITCH_CLASSES * frames).map(|i| (i % 5) as f32 / 4.0).collect(),
            )
            .unwrap(),
            timbre: FeatureMatrix::zeros(TIMBRE_COEFFS, frames),
            tempogram: FeatureMatrix::zeros(TEMPOGRAM_BINS, frames),
            tempo: 120.0,
            key: None,
            mode: ContentMode::Music,
            strategy: AnalysisStrategy::Standard,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flat(GeneratorContext);

    impl FrameGenerator for Flat {
        fn render_frame(&self, _index: usize) -> Result<Frame> {
            Ok(Frame::filled(self.0.width, self.0.height, [7, 7, 7]))
        }
    }

    fn flat(ctx: GeneratorContext) -> Box<dyn FrameGenerator> {
        Box::new(Flat(ctx))
    }

    #[test]
    fn unknown_id_lists_registered_ones() {
        let mut registry = GeneratorRegistry::new();
        registry.register("flat", "test", flat);
        let err = registry.create("missing", test_context(4, 4, 1)).err().unwrap();
        match err {
            RenderError::UnknownGenerator { name, available } => {
                assert_eq!(name, "missing");
                assert_eq!(available, vec!["flat".to_string()]);
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn ensure_checks_ids_without_building() {
        let registry = GeneratorRegistry::with_builtin();
        assert!(registry.ensure("spectrum_bars").is_ok());
        assert!(matches!(
            registry.ensure("nope"),
            Err(RenderError::UnknownGenerator { .. })
        ));
    }

    #[test]
    fn builtin_registry_has_reference_styles() {
        let registry = GeneratorRegistry::with_builtin();
        for id in ["solid", "pulsing_core", "spectrum_bars"] {
            assert!(registry.contains(id), "{id}");
        }
        let mut gen = registry.create("solid", test_context(8, 6, 3)).unwrap();
        gen.setup().unwrap();
        let frame = gen.render_frame(0).unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 6));
    }
}
