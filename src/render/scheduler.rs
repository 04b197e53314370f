//! Optional parallel frame rendering.
//!
//! Work is split into contiguous chunks of frame indices. Each chunk runs on
//! a bounded rayon pool and results are stable-sorted by index, so the output
//! sequence is identical to a serial render. Any chunk failure aborts the
//! whole batch.

use std::io::{BufWriter, Seek, SeekFrom, Write};

use rayon::prelude::*;

use super::frame::Frame;
use super::generator::{GeneratorContext, GeneratorRegistry};
use super::postprocess::PostProcessor;
use crate::error::{RenderError, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 10;

/// Available cores minus one for the encoder, at least one.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(1)
        .max(1)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub chunk_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// What a worker needs to rebuild a generator on its own: an id to look up
/// in the registry and the context to construct it with. No generator state
/// crosses threads.
#[derive(Clone, Debug)]
pub struct RenderTask {
    pub generator: String,
    pub context: GeneratorContext,
}

pub struct FrameScheduler {
    config: SchedulerConfig,
    pool: Option<rayon::ThreadPool>,
}

impl FrameScheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        if config.workers == 0 {
            return Err(RenderError::InvalidConfig("scheduler workers must be >= 1".into()));
        }
        if config.chunk_size == 0 {
            return Err(RenderError::InvalidConfig("scheduler chunk size must be >= 1".into()));
        }
        let pool = if config.workers > 1 {
            Some(build_thread_pool(config.workers)?)
        } else {
            None
        };
        log::info!(
            "Frame scheduler: {} worker(s), chunks of {} frames",
            config.workers,
            config.chunk_size
        );
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Short batches and single-worker setups render in the calling thread.
    pub fn is_serial_for(&self, len: usize) -> bool {
        self.pool.is_none() || len < 2 * self.config.chunk_size
    }

    /// Render `indices` with `render_one`, returning frames ordered by index.
    pub fn render_many<F>(&self, render_one: F, indices: &[usize]) -> Result<Vec<(usize, Frame)>>
    where
        F: Fn(usize) -> Result<Frame> + Sync,
    {
        self.run_chunks(indices, |chunk| {
            chunk.iter().map(|&i| render_one(i).map(|f| (i, f))).collect()
        })
    }

    /// Render `indices` by rebuilding the task's generator once per chunk.
    pub fn render_tasks(
        &self,
        registry: &GeneratorRegistry,
        task: &RenderTask,
        indices: &[usize],
    ) -> Result<Vec<(usize, Frame)>> {
        self.run_chunks(indices, |chunk| {
            let mut generator = registry.create(&task.generator, task.context.clone())?;
            generator.setup()?;
            chunk
                .iter()
                .map(|&i| generator.render_frame(i).map(|f| (i, f)))
                .collect()
        })
    }

    /// Render, grade and write raw RGB24 bytes for `indices` to `out`.
    ///
    /// Each parallel chunk spills to its own temporary file; the files are
    /// then concatenated in index order, so memory use stays at one chunk
    /// per worker. Returns the number of bytes written.
    pub fn render_to_file<W: Write>(
        &self,
        registry: &GeneratorRegistry,
        task: &RenderTask,
        post: &PostProcessor,
        indices: &[usize],
        out: &mut W,
    ) -> Result<u64> {
        let io_err = |e| RenderError::io("scheduler", e);

        if self.is_serial_for(indices.len()) {
            let mut generator = registry.create(&task.generator, task.context.clone())?;
            generator.setup()?;
            let mut written = 0u64;
            for &i in indices {
                let frame = post.apply(generator.render_frame(i)?, i);
                out.write_all(frame.as_bytes()).map_err(io_err)?;
                written += frame.as_bytes().len() as u64;
            }
            return Ok(written);
        }

        let spills = self.run_chunks(indices, |chunk| {
            let mut generator = registry.create(&task.generator, task.context.clone())?;
            generator.setup()?;
            let mut tmp = tempfile::NamedTempFile::new().map_err(io_err)?;
            {
                let mut writer = BufWriter::new(tmp.as_file_mut());
                for &i in chunk {
                    let frame = post.apply(generator.render_frame(i)?, i);
                    writer.write_all(frame.as_bytes()).map_err(io_err)?;
                }
                writer.flush().map_err(io_err)?;
            }
            Ok(vec![(chunk[0], tmp)])
        })?;

        let mut written = 0u64;
        for (_, mut tmp) in spills {
            let file = tmp.as_file_mut();
            file.seek(SeekFrom::Start(0)).map_err(io_err)?;
            written += std::io::copy(file, out).map_err(io_err)?;
        }
        Ok(written)
    }

    fn run_chunks<T, F>(&self, indices: &[usize], per_chunk: F) -> Result<Vec<(usize, T)>>
    where
        T: Send,
        F: Fn(&[usize]) -> Result<Vec<(usize, T)>> + Sync,
    {
        let pool = match &self.pool {
            Some(pool) if !self.is_serial_for(indices.len()) => pool,
            _ => {
                log::debug!("Rendering {} frames serially", indices.len());
                let mut out = per_chunk(indices)?;
                out.sort_by_key(|(i, _)| *i);
                return Ok(out);
            }
        };

        let chunks: Vec<&[usize]> = indices.chunks(self.config.chunk_size).collect();
        log::debug!(
            "Rendering {} frames in {} chunks on {} workers",
            indices.len(),
            chunks.len(),
            self.config.workers
        );

        let batches = pool.install(|| {
            chunks
                .par_iter()
                .map(|chunk| per_chunk(chunk).map_err(|e| chunk_failure(chunk[0], e)))
                .collect::<Result<Vec<_>>>()
        })?;

        let mut out: Vec<(usize, T)> = batches.into_iter().flatten().collect();
        out.sort_by_key(|(i, _)| *i);
        Ok(out)
    }
}

fn chunk_failure(chunk_start: usize, err: RenderError) -> RenderError {
    match err {
        e @ RenderError::Scheduler { .. } => e,
        e => RenderError::Scheduler {
            chunk_start,
            reason: e.to_string(),
        },
    }
}

fn build_thread_pool(threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("vizcast-render-{i}"))
        .build()
        .map_err(|e| RenderError::InvalidConfig(format!("failed to build render thread pool: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PostProcessParams;
    use crate::render::generator::test_context;

    fn scheduler(workers: usize, chunk_size: usize) -> FrameScheduler {
        FrameScheduler::new(SchedulerConfig { workers, chunk_size }).unwrap()
    }

    fn task() -> RenderTask {
        RenderTask {
            generator: "pulsing_core".into(),
            context: test_context(64, 48, 60),
        }
    }

    fn serial_frames(indices: &[usize]) -> Vec<(usize, Frame)> {
        let registry = GeneratorRegistry::with_builtin();
        let t = task();
        let mut generator = registry.create(&t.generator, t.context).unwrap();
        generator.setup().unwrap();
        indices.iter().map(|&i| (i, generator.render_frame(i).unwrap())).collect()
    }

    #[test]
    fn parallel_tasks_match_serial_render() {
        let indices: Vec<usize> = (0..57).collect();
        let registry = GeneratorRegistry::with_builtin();
        let parallel = scheduler(3, 4).render_tasks(&registry, &task(), &indices).unwrap();
        assert_eq!(parallel, serial_frames(&indices));
    }

    #[test]
    fn render_many_returns_frames_in_index_order() {
        let indices: Vec<usize> = (0..40).rev().collect();
        let frames = scheduler(4, 3)
            .render_many(|i| Ok(Frame::filled(2, 2, [i as u8, 0, 0])), &indices)
            .unwrap();
        let order: Vec<usize> = frames.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, (0..40).collect::<Vec<_>>());
        assert_eq!(frames[17].1.pixel(0, 0), [17, 0, 0]);
    }

    #[test]
    fn small_batches_stay_serial() {
        let s = scheduler(4, 10);
        assert!(s.is_serial_for(19));
        assert!(!s.is_serial_for(20));
        assert!(scheduler(1, 10).is_serial_for(1000));
    }

    #[test]
    fn a_failing_chunk_aborts_the_batch() {
        let indices: Vec<usize> = (0..50).collect();
        let err = scheduler(3, 10)
            .render_many(
                |i| {
                    if i == 23 {
                        Err(RenderError::generator("boom", "frame 23 exploded"))
                    } else {
                        Ok(Frame::new(2, 2))
                    }
                },
                &indices,
            )
            .unwrap_err();
        match err {
            RenderError::Scheduler { chunk_start, reason } => {
                assert_eq!(chunk_start, 20);
                assert!(reason.contains("exploded"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn streamed_file_matches_serial_bytes() {
        let indices: Vec<usize> = (0..45).collect();
        let registry = GeneratorRegistry::with_builtin();
        let post = PostProcessor::new(PostProcessParams {
            grain: 0.2,
            grain_seed: 7,
            vignette: 0.5,
            ..Default::default()
        });

        let mut streamed = Vec::new();
        let written = scheduler(3, 5)
            .render_to_file(&registry, &task(), &post, &indices, &mut streamed)
            .unwrap();

        let expected: Vec<u8> = serial_frames(&indices)
            .into_iter()
            .flat_map(|(i, f)| post.apply(f, i).into_bytes())
            .collect();
        assert_eq!(written as usize, expected.len());
        assert_eq!(streamed, expected);
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert!(FrameScheduler::new(SchedulerConfig {
            workers: 0,
            chunk_size: 10
        })
        .is_err());
    }
}
