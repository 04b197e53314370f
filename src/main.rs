mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use cli::Cli;
use vizcast::audio::{FeatureExtractor, FeatureStore};
use vizcast::config::{self, ColorPalette, EncoderSettings, PostProcessParams, RenderConfig};
use vizcast::encode::FfmpegBackend;
use vizcast::profiles;
use vizcast::render::scheduler::{default_workers, SchedulerConfig};
use vizcast::render::{GeneratorRegistry, RenderPipeline, RunOptions};

const PROGRESS_TICKS: u64 = 1000;

fn main() -> Result<()> {
    let mut cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();

    // Config file: explicit --config, else ./vizcast.toml or the user config dir
    if let Some(path) = cli.config.clone().or_else(config::find_config_file) {
        match config::load_config(&path) {
            Some(cfg) => {
                log::info!("Loaded config from {}", path.display());
                cli.merge(cfg);
            }
            None => log::warn!("Failed to load config from {}", path.display()),
        }
    }

    let registry = GeneratorRegistry::with_builtin();

    if cli.list_generators {
        println!("Available generators:");
        for (id, description) in registry.describe() {
            println!("  {:<16} {}", id, description);
        }
        return Ok(());
    }

    if cli.list_profiles {
        println!("Available export profiles:");
        for p in profiles::PROFILES {
            println!(
                "  {:<16} {:<18} {}x{} @ {}fps  {}  crf {}  {}",
                p.id, p.name, p.resolution.0, p.resolution.1, p.fps, p.aspect_ratio, p.crf, p.description
            );
        }
        return Ok(());
    }

    let store = FeatureStore::new(cli.cache_dir.clone().unwrap_or_else(FeatureStore::default_dir));

    if cli.clear_cache {
        let before = store.size_bytes();
        let removed = store.clear();
        println!(
            "Cleared {} cached analyses ({:.1} MB) from {}",
            removed,
            before as f64 / (1024.0 * 1024.0),
            store.dir().display()
        );
        if cli.input.is_none() {
            return Ok(());
        }
    }

    let input = cli.input.clone().context("Input audio file is required")?;

    let profile = match cli.profile.as_deref() {
        Some(name) => Some(profiles::find(name).with_context(|| {
            format!("Unknown export profile '{}'. Available: {}", name, profiles::ids().join(", "))
        })?),
        None => None,
    };

    let colors = ColorPalette::from_hex(&cli.primary, &cli.secondary, &cli.background)
        .map_err(anyhow::Error::msg)
        .context("Invalid color")?;

    let mut render_config = RenderConfig {
        audio_path: input,
        output_path: cli.output.clone(),
        generator: cli.generator.clone(),
        resolution: (cli.width, cli.height),
        fps: cli.fps,
        colors,
        postprocess: PostProcessParams {
            contrast: cli.contrast,
            saturation: cli.saturation,
            brightness: cli.brightness,
            grain: cli.grain,
            vignette: cli.vignette,
            chromatic_aberration: cli.chromatic_aberration,
            grain_seed: cli.grain_seed,
        },
        profile,
        encoder: EncoderSettings {
            preset: cli.preset.clone(),
            crf: cli.crf,
            audio_bitrate: cli.audio_bitrate.clone(),
        },
    };

    let options = RunOptions {
        preview: cli.preview,
        preview_seconds: cli.preview_duration,
        force_analyze: cli.force_analyze,
        scheduler: cli.parallel.then(|| SchedulerConfig {
            workers: cli.workers.unwrap_or_else(default_workers),
            chunk_size: cli.chunk_size,
        }),
    };

    log::info!("vizcast - audio-reactive video renderer");
    log::info!("Input: {}", render_config.audio_path.display());
    log::info!("Output: {}", render_config.output_path.display());
    log::info!("Generator: {}", render_config.generator);
    if let Some(p) = profile {
        log::info!("Profile: {} ({}x{} @ {}fps)", p.name, p.resolution.0, p.resolution.1, p.fps);
    }

    let pipeline = RenderPipeline::new(
        registry,
        Box::new(FfmpegBackend::new()),
        FeatureExtractor::new(store),
    );

    let pb = ProgressBar::new(PROGRESS_TICKS);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {percent:>3}% {msg}")?
            .progress_chars("=>-"),
    );

    let result = pipeline.run(&mut render_config, &options, &mut |fraction, message| {
        pb.set_position((fraction.clamp(0.0, 1.0) * PROGRESS_TICKS as f32) as u64);
        pb.set_message(message.to_string());
    });

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            pb.abandon_with_message("failed");
            let stage = e.stage();
            let kind = e.failure_kind();
            return Err(anyhow::Error::new(e).context(format!("{kind} during {stage}")));
        }
    };
    pb.finish_with_message("Rendering complete");

    println!(
        "Wrote {} ({} frames, {}x{} @ {}fps, {:.1}s) in {:.1}s",
        report.output.display(),
        report.frames,
        report.resolution.0,
        report.resolution.1,
        report.fps,
        report.duration,
        report.elapsed.as_secs_f64()
    );
    println!(
        "Audio: {:.1} BPM, key {}, {:?}",
        report.tempo,
        report.key.as_deref().unwrap_or("unknown"),
        report.mode
    );
    Ok(())
}
